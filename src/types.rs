// src/types.rs
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use ndarray::{s, Array3, ArrayView3};
use serde::{Deserialize, Serialize};

use crate::drivers::error::RppgError;
use crate::model::RppgResult;

/// One RGB video frame. `pixels` is laid out `(height, width, channel)`.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    pub index: u64,
    pub timestamp: Duration,
    pub pixels: Array3<u8>,
}

impl Frame {
    pub fn new(index: u64, timestamp: Duration, pixels: Array3<u8>) -> Self {
        Self { index, timestamp, pixels }
    }

    pub fn height(&self) -> usize {
        self.pixels.dim().0
    }

    pub fn width(&self) -> usize {
        self.pixels.dim().1
    }

    pub fn channels(&self) -> usize {
        self.pixels.dim().2
    }

    /// Centered square-ish region covering `fraction` of each side.
    pub fn roi(&self, fraction: f32) -> ArrayView3<'_, u8> {
        let (h, w, _) = self.pixels.dim();
        let fraction = fraction.clamp(0.05, 1.0);
        let rh = ((h as f32 * fraction).round() as usize).clamp(1, h.max(1));
        let rw = ((w as f32 * fraction).round() as usize).clamp(1, w.max(1));
        let top = (h - rh.min(h)) / 2;
        let left = (w - rw.min(w)) / 2;
        self.pixels.slice(s![top..top + rh.min(h), left..left + rw.min(w), ..])
    }

    /// Mean of each color channel over the central region.
    pub fn roi_mean(&self, fraction: f32) -> [f32; 3] {
        let roi = self.roi(fraction);
        let mut sums = [0f64; 3];
        let mut count = 0usize;
        for pixel in roi.rows() {
            for (c, sum) in sums.iter_mut().enumerate() {
                *sum += pixel.get(c).copied().unwrap_or(0) as f64;
            }
            count += 1;
        }
        if count == 0 {
            return [0.0; 3];
        }
        sums.map(|s| (s / count as f64) as f32)
    }
}

/// Fixed-length run of frames handed to the waveform extractor.
#[derive(Clone, Debug)]
pub struct FrameWindow {
    frames: Arc<[Frame]>,
    sample_rate_hz: f32,
}

impl FrameWindow {
    /// Builds a window of exactly `expected_len` frames. Short windows are rejected,
    /// surplus frames past the expected length are ignored.
    pub fn assemble(
        mut frames: Vec<Frame>,
        expected_len: usize,
        sample_rate_hz: f32,
        dropped: usize,
    ) -> Result<Self, RppgError> {
        if expected_len == 0 || frames.len() < expected_len {
            return Err(RppgError::InsufficientFrames {
                expected: expected_len,
                received: frames.len(),
                dropped,
            });
        }
        frames.truncate(expected_len);
        Ok(Self {
            frames: frames.into(),
            sample_rate_hz,
        })
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn sample_rate_hz(&self) -> f32 {
        self.sample_rate_hz
    }

    /// `(height, width, channels)` of the first frame.
    pub fn frame_dim(&self) -> Option<(usize, usize, usize)> {
        self.frames.first().map(|f| f.pixels.dim())
    }

    pub fn channel_means(&self, roi_fraction: f32) -> RgbTrace {
        let mut trace = RgbTrace::with_capacity(self.len(), self.sample_rate_hz);
        for frame in self.frames.iter() {
            let [r, g, b] = frame.roi_mean(roi_fraction);
            trace.red.push(r);
            trace.green.push(g);
            trace.blue.push(b);
        }
        trace
    }
}

/// Per-frame mean color of the skin region.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RgbTrace {
    pub sample_rate_hz: f32,
    pub red: Vec<f32>,
    pub green: Vec<f32>,
    pub blue: Vec<f32>,
}

impl RgbTrace {
    pub fn with_capacity(len: usize, sample_rate_hz: f32) -> Self {
        Self {
            sample_rate_hz,
            red: Vec::with_capacity(len),
            green: Vec::with_capacity(len),
            blue: Vec::with_capacity(len),
        }
    }

    pub fn len(&self) -> usize {
        self.red.len()
    }

    pub fn is_empty(&self) -> bool {
        self.red.is_empty()
    }
}

/// Extractor output, one sample per frame of the window.
#[derive(Clone, Debug, PartialEq)]
pub struct RawPulseSignal {
    samples: Vec<f32>,
    sample_rate_hz: f32,
}

impl RawPulseSignal {
    pub fn new(samples: Vec<f32>, sample_rate_hz: f32) -> Self {
        Self { samples, sample_rate_hz }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate_hz(&self) -> f32 {
        self.sample_rate_hz
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Detrended, band-limited, unit-variance pulse waveform.
#[derive(Clone, Debug, PartialEq)]
pub struct ConditionedSignal {
    samples: Vec<f32>,
    sample_rate_hz: f32,
}

impl ConditionedSignal {
    pub fn new(samples: Vec<f32>, sample_rate_hz: f32) -> Self {
        Self { samples, sample_rate_hz }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate_hz(&self) -> f32 {
        self.sample_rate_hz
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_secs(&self) -> f32 {
        if self.sample_rate_hz <= 0.0 {
            return 0.0;
        }
        self.samples.len() as f32 / self.sample_rate_hz
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn random() -> Self {
        Self(format!("{:032x}", rand::random::<u128>()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle of a measurement session. Each transition replaces the whole value.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionState {
    Idle,
    Aligning,
    Recording { progress: f32, elapsed_secs: f32 },
    Processing,
    Completed(Arc<RppgResult>),
    Failed(RppgError),
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Aligning => "aligning",
            SessionState::Recording { .. } => "recording",
            SessionState::Processing => "processing",
            SessionState::Completed(_) => "completed",
            SessionState::Failed(_) => "failed",
        }
    }

    /// Aligning, Recording and Processing hold the frame source.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SessionState::Aligning | SessionState::Recording { .. } | SessionState::Processing
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Completed(_) | SessionState::Failed(_))
    }
}

/// What subscribers receive: every state transition plus recoverable warnings.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    State(SessionState),
    Warning(RppgError),
}
