use ndarray::{Array5, ArrayView5};
use crate::config::{ExtractorConfig, ProjectionMethod};
use crate::drivers::error::RppgError;
use crate::types::{FrameWindow, RawPulseSignal, RgbTrace};
/// Turns a window of frames into one pulse sample per frame.
///
/// Implementations must be deterministic and all-or-nothing: either a signal of
/// exactly `window.len()` samples or a `ModelFailure`.
pub trait WaveformExtractor: Send + Sync {
    fn infer(&self, window: &FrameWindow) -> Result<RawPulseSignal, RppgError>;
}
/// Length of the POS sliding window in seconds.
const POS_WINDOW_SECS: f32 = 1.6;
/// Built-in projection model over the mean color of a central skin region.
#[derive(Clone, Debug)]
pub struct PosExtractor {
    method: ProjectionMethod,
    roi_fraction: f32,
    frame_dim: (usize, usize),
}
impl PosExtractor {
    /// `frame_dim` is `(height, width)`.
    pub fn new(config: &ExtractorConfig, frame_dim: (usize, usize)) -> Self {
        Self {
            method: config.method,
            roi_fraction: config.roi_fraction,
            frame_dim,
        }
    }
    fn project(&self, trace: &RgbTrace) -> Vec<f32> {
        match self.method {
            ProjectionMethod::Pos => pos(trace),
            ProjectionMethod::Chrom => chrom(trace),
            ProjectionMethod::Green => {
                let g = normalized(&trace.green);
                g.iter().map(|v| v - 1.0).collect()
            }
        }
    }
}
impl WaveformExtractor for PosExtractor {
    fn infer(&self, window: &FrameWindow) -> Result<RawPulseSignal, RppgError> {
        check_dims(window, self.frame_dim)?;
        let trace = window.channel_means(self.roi_fraction);
        let samples = self.project(&trace);
        finish(samples, window)
    }
}
fn check_dims(window: &FrameWindow, (height, width): (usize, usize)) -> Result<(), RppgError> {
    if window.is_empty() {
        return Err(RppgError::ModelFailure("empty frame window".into()));
    }
    for frame in window.frames() {
        let dim = frame.pixels.dim();
        if dim != (height, width, 3) {
            return Err(RppgError::ModelFailure(format!(
                "frame {} is {}x{}x{}, expected {height}x{width}x3",
                frame.index, dim.0, dim.1, dim.2
            )));
        }
    }
    Ok(())
}
fn finish(samples: Vec<f32>, window: &FrameWindow) -> Result<RawPulseSignal, RppgError> {
    if samples.len() != window.len() {
        return Err(RppgError::ModelFailure(format!(
            "model produced {} samples for {} frames",
            samples.len(),
            window.len()
        )));
    }
    if let Some(pos) = samples.iter().position(|v| !v.is_finite()) {
        return Err(RppgError::ModelFailure(format!("non-finite output at sample {pos}")));
    }
    Ok(RawPulseSignal::new(samples, window.sample_rate_hz()))
}
/// Channel divided by its mean; all zeros if the channel is black.
fn normalized(channel: &[f32]) -> Vec<f32> {
    let m = mean(channel);
    if m.abs() < 1e-6 {
        return vec![0.0; channel.len()];
    }
    channel.iter().map(|v| v / m).collect()
}
fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f32>() / values.len() as f32
}
fn std_dev(values: &[f32]) -> f32 {
    let m = mean(values);
    if values.is_empty() {
        return 0.0;
    }
    (values.iter().map(|v| (v - m).powi(2)).sum::<f32>() / values.len() as f32).sqrt()
}
/// Plane-orthogonal-to-skin projection with overlap-add of short windows.
fn pos(trace: &RgbTrace) -> Vec<f32> {
    let n = trace.len();
    let l = ((POS_WINDOW_SECS * trace.sample_rate_hz).ceil() as usize).clamp(1, n.max(1));
    let mut out = vec![0.0f32; n];
    if n == 0 {
        return out;
    }
    for start in 0..=n - l {
        let end = start + l;
        let r = normalized(&trace.red[start..end]);
        let g = normalized(&trace.green[start..end]);
        let b = normalized(&trace.blue[start..end]);
        let s1: Vec<f32> = g.iter().zip(&b).map(|(g, b)| g - b).collect();
        let s2: Vec<f32> = r
            .iter()
            .zip(g.iter().zip(&b))
            .map(|(r, (g, b))| g + b - 2.0 * r)
            .collect();
        let sd2 = std_dev(&s2);
        let alpha = if sd2 > 1e-12 { std_dev(&s1) / sd2 } else { 0.0 };
        let h: Vec<f32> = s1.iter().zip(&s2).map(|(a, b)| a + alpha * b).collect();
        let h_mean = mean(&h);
        for (acc, v) in out[start..end].iter_mut().zip(&h) {
            *acc += v - h_mean;
        }
    }
    out
}
/// Chrominance projection over the whole window.
fn chrom(trace: &RgbTrace) -> Vec<f32> {
    let r = normalized(&trace.red);
    let g = normalized(&trace.green);
    let b = normalized(&trace.blue);
    let x: Vec<f32> = r.iter().zip(&g).map(|(r, g)| 3.0 * r - 2.0 * g).collect();
    let y: Vec<f32> = r
        .iter()
        .zip(g.iter().zip(&b))
        .map(|(r, (g, b))| 1.5 * r + g - 1.5 * b)
        .collect();
    let sy = std_dev(&y);
    let alpha = if sy > 1e-12 { std_dev(&x) / sy } else { 0.0 };
    x.iter().zip(&y).map(|(x, y)| x - alpha * y).collect()
}
/// ImageNet channel statistics the trained model was fitted with.
const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];
/// A trained network taking a `[1, 3, T, H, W]` tensor and returning `T` samples.
pub trait TensorModel: Send + Sync {
    /// `(height, width)` the network was trained on.
    fn input_dims(&self) -> (usize, usize);
    fn run(&self, input: ArrayView5<'_, f32>) -> Result<Vec<f32>, String>;
}
/// Adapts a [`TensorModel`] to the extractor contract.
pub struct TensorModelExtractor<M> {
    model: M,
}
impl<M: TensorModel> TensorModelExtractor<M> {
    pub fn new(model: M) -> Self {
        Self { model }
    }
    pub fn model(&self) -> &M {
        &self.model
    }
}
impl<M: TensorModel> WaveformExtractor for TensorModelExtractor<M> {
    fn infer(&self, window: &FrameWindow) -> Result<RawPulseSignal, RppgError> {
        check_dims(window, self.model.input_dims())?;
        let input = input_tensor(window);
        let samples = self.model.run(input.view()).map_err(RppgError::ModelFailure)?;
        finish(samples, window)
    }
}
/// Window as a normalized `[1, C, T, H, W]` tensor.
pub fn input_tensor(window: &FrameWindow) -> Array5<f32> {
    let (h, w, _) = window.frame_dim().unwrap_or((0, 0, 3));
    let frames = window.frames();
    Array5::from_shape_fn((1, 3, frames.len(), h, w), |(_, c, t, y, x)| {
        let v = frames[t].pixels[[y, x, c]] as f32 / 255.0;
        (v - IMAGENET_MEAN[c]) / IMAGENET_STD[c]
    })
}
