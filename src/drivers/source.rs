use std::collections::VecDeque;
use std::f64::consts::PI;
use std::time::{Duration, Instant};
use ndarray::Array3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use crate::config::CaptureConfig;
use crate::drivers::error::RppgError;
use crate::types::Frame;
/// What a source is asked to produce for one session.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CaptureSpec {
    pub duration_secs: f32,
    pub target_fps: f32,
    pub frame_width: usize,
    pub frame_height: usize,
}
impl CaptureSpec {
    pub fn expected_frames(&self) -> usize {
        (self.duration_secs * self.target_fps).round().max(0.0) as usize
    }
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.target_fps.max(f32::EPSILON) as f64)
    }
}
impl From<&CaptureConfig> for CaptureSpec {
    fn from(config: &CaptureConfig) -> Self {
        Self {
            duration_secs: config.duration_secs,
            target_fps: config.target_fps,
            frame_width: config.frame_width,
            frame_height: config.frame_height,
        }
    }
}
/// Something that yields time-ordered frames for a bounded session.
///
/// `next_frame` returns `Ok(None)` once the session's frames are exhausted or the
/// source was cancelled. `cancel` must release any underlying device handle.
pub trait FrameSource: Send {
    fn start(&mut self, spec: &CaptureSpec) -> Result<(), RppgError>;
    fn next_frame(&mut self) -> Result<Option<Frame>, RppgError>;
    fn cancel(&mut self);
}
/// In-memory source useful for tests and deterministic playback.
pub struct ManualSource {
    queue: VecDeque<Frame>,
}
impl ManualSource {
    pub fn new(frames: impl IntoIterator<Item = Frame>) -> Self {
        Self {
            queue: frames.into_iter().collect(),
        }
    }
}
impl FrameSource for ManualSource {
    fn start(&mut self, _spec: &CaptureSpec) -> Result<(), RppgError> {
        Ok(())
    }
    fn next_frame(&mut self) -> Result<Option<Frame>, RppgError> {
        Ok(self.queue.pop_front())
    }
    fn cancel(&mut self) {
        self.queue.clear();
    }
}
/// Parameters of the simulated face video.
#[derive(Clone, Debug, PartialEq)]
pub struct SyntheticPulse {
    pub bpm: f32,
    /// Relative modulation depth of skin color by the pulse.
    pub depth: f32,
    /// Per-channel pulse strength (R, G, B).
    pub signature: [f32; 3],
    /// Resting skin color (R, G, B).
    pub skin: [f32; 3],
    pub background: [f32; 3],
    /// Relative beat-to-beat rate modulation and its frequency.
    pub rate_jitter: f32,
    pub jitter_hz: f32,
    /// Second harmonic amplitude relative to the fundamental.
    pub harmonic: f32,
    /// Illumination change across the whole session, relative.
    pub drift: f32,
    /// Half-width of the uniform per-pixel sensor noise, in 8-bit levels.
    pub noise: f32,
}
impl Default for SyntheticPulse {
    fn default() -> Self {
        Self {
            bpm: 75.0,
            depth: 0.01,
            signature: [0.40, 0.77, 0.53],
            skin: [170.0, 120.0, 95.0],
            background: [45.0, 50.0, 55.0],
            rate_jitter: 0.03,
            jitter_hz: 0.25,
            harmonic: 0.3,
            drift: 0.03,
            noise: 2.0,
        }
    }
}
struct Running {
    spec: CaptureSpec,
    rng: StdRng,
    next_index: u64,
    total: u64,
    phase: f64,
    started: Instant,
}
/// Deterministic face-like video: an elliptical skin patch whose color follows a
/// pulse waveform, over a static background.
pub struct SyntheticFaceSource {
    pulse: SyntheticPulse,
    seed: u64,
    realtime: bool,
    running: Option<Running>,
}
impl SyntheticFaceSource {
    pub fn new(pulse: SyntheticPulse, seed: u64) -> Self {
        Self {
            pulse,
            seed,
            realtime: false,
            running: None,
        }
    }
    /// Paces frames at the target rate instead of producing them as fast as possible.
    pub fn realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }
    pub fn pulse(&self) -> &SyntheticPulse {
        &self.pulse
    }
    /// Pulse value at the accumulated cardiac `phase`.
    fn waveform(&self, phase: f64) -> f64 {
        phase.sin() + self.pulse.harmonic as f64 * (2.0 * phase + 0.8).sin()
    }
    fn render(&self, run: &mut Running, t: f64, p: f64) -> Array3<u8> {
        let (h, w) = (run.spec.frame_height, run.spec.frame_width);
        let pulse = &self.pulse;
        let illumination = 1.0 + pulse.drift as f64 * t / run.spec.duration_secs.max(f32::EPSILON) as f64;
        let (cy, cx) = ((h as f64 - 1.0) / 2.0, (w as f64 - 1.0) / 2.0);
        let (ry, rx) = (0.5 * h as f64, 0.45 * w as f64);
        let mut pixels = Array3::<u8>::zeros((h, w, 3));
        for y in 0..h {
            for x in 0..w {
                let dy = (y as f64 - cy) / ry;
                let dx = (x as f64 - cx) / rx;
                let on_face = dx * dx + dy * dy <= 1.0;
                for c in 0..3 {
                    let level = if on_face {
                        pulse.skin[c] as f64
                            * illumination
                            * (1.0 + pulse.depth as f64 * pulse.signature[c] as f64 * p)
                    } else {
                        pulse.background[c] as f64 * illumination
                    };
                    let noisy = if pulse.noise > 0.0 {
                        level + run.rng.gen_range(-pulse.noise..pulse.noise) as f64
                    } else {
                        level
                    };
                    pixels[[y, x, c]] = noisy.round().clamp(0.0, 255.0) as u8;
                }
            }
        }
        pixels
    }
}
impl FrameSource for SyntheticFaceSource {
    fn start(&mut self, spec: &CaptureSpec) -> Result<(), RppgError> {
        self.running = Some(Running {
            spec: *spec,
            rng: StdRng::seed_from_u64(self.seed),
            next_index: 0,
            total: spec.expected_frames() as u64,
            phase: 0.0,
            started: Instant::now(),
        });
        Ok(())
    }
    fn next_frame(&mut self) -> Result<Option<Frame>, RppgError> {
        let Some(mut run) = self.running.take() else {
            return Ok(None);
        };
        if run.next_index >= run.total {
            self.running = Some(run);
            return Ok(None);
        }
        let index = run.next_index;
        let dt = 1.0 / run.spec.target_fps as f64;
        let t = index as f64 * dt;
        if self.realtime {
            let due = run.started + run.spec.frame_interval() * index as u32;
            let now = Instant::now();
            if due > now {
                std::thread::sleep(due - now);
            }
        }
        let p = self.waveform(run.phase);
        let pixels = self.render(&mut run, t, p);
        let f0 = self.pulse.bpm as f64 / 60.0;
        let rate = f0
            * (1.0
                + self.pulse.rate_jitter as f64 * (2.0 * PI * self.pulse.jitter_hz as f64 * t).sin());
        run.phase += 2.0 * PI * rate * dt;
        run.next_index += 1;
        self.running = Some(run);
        Ok(Some(Frame::new(index, Duration::from_secs_f64(t), pixels)))
    }
    fn cancel(&mut self) {
        self.running = None;
    }
}
#[cfg(test)]
mod tests {
    use super::*;
    fn spec(duration_secs: f32) -> CaptureSpec {
        CaptureSpec {
            duration_secs,
            target_fps: 30.0,
            frame_width: 16,
            frame_height: 12,
        }
    }
    #[test]
    fn synthetic_source_emits_the_configured_count() {
        let mut source = SyntheticFaceSource::new(SyntheticPulse::default(), 3);
        source.start(&spec(1.0)).unwrap();
        let mut frames = Vec::new();
        while let Some(frame) = source.next_frame().unwrap() {
            frames.push(frame);
        }
        assert_eq!(frames.len(), 30);
        assert_eq!(frames[0].pixels.dim(), (12, 16, 3));
        assert!(frames.windows(2).all(|w| w[1].timestamp > w[0].timestamp));
    }
    #[test]
    fn same_seed_same_video() {
        let mut a = SyntheticFaceSource::new(SyntheticPulse::default(), 9);
        let mut b = SyntheticFaceSource::new(SyntheticPulse::default(), 9);
        a.start(&spec(0.2)).unwrap();
        b.start(&spec(0.2)).unwrap();
        for _ in 0..6 {
            assert_eq!(a.next_frame().unwrap(), b.next_frame().unwrap());
        }
    }
    #[test]
    fn cancel_stops_emission() {
        let mut source = SyntheticFaceSource::new(SyntheticPulse::default(), 1);
        source.start(&spec(1.0)).unwrap();
        assert!(source.next_frame().unwrap().is_some());
        source.cancel();
        assert!(source.next_frame().unwrap().is_none());
    }
    #[test]
    fn skin_is_brighter_red_than_background() {
        let mut source = SyntheticFaceSource::new(SyntheticPulse::default(), 5);
        source.start(&spec(0.1)).unwrap();
        let frame = source.next_frame().unwrap().unwrap();
        let centre = frame.roi_mean(0.5);
        assert!(centre[0] > 150.0 && centre[0] < 190.0);
        assert!(frame.pixels[[0, 0, 0]] < 60);
    }
    #[test]
    fn manual_source_replays_then_ends() {
        let frames = (0..3).map(|i| {
            Frame::new(i, Duration::from_millis(i * 40), Array3::zeros((2, 2, 3)))
        });
        let mut source = ManualSource::new(frames);
        source.start(&spec(1.0)).unwrap();
        assert_eq!(source.next_frame().unwrap().unwrap().index, 0);
        source.cancel();
        assert!(source.next_frame().unwrap().is_none());
    }
}
