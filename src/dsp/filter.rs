use std::f64::consts::PI;

use crate::config::ConditionerConfig;
use crate::drivers::error::RppgError;
use crate::types::{ConditionedSignal, RawPulseSignal};

#[derive(Clone, Copy, Debug)]
pub enum FilterKind {
    Highpass { cutoff_hz: f64, q: f64 },
    Lowpass { cutoff_hz: f64, q: f64 },
}
#[derive(Clone, Copy, Debug)]
struct BiquadCoeffs {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
}
impl BiquadCoeffs {
    fn dc_gain(&self) -> f64 {
        let den = 1.0 + self.a1 + self.a2;
        if den.abs() < f64::EPSILON {
            0.0
        } else {
            (self.b0 + self.b1 + self.b2) / den
        }
    }
}
#[derive(Clone, Copy, Debug, Default)]
struct BiquadState {
    z1: f64,
    z2: f64,
}
#[derive(Clone, Copy, Debug)]
struct BiquadFilter {
    coeffs: BiquadCoeffs,
    state: BiquadState,
}
impl BiquadFilter {
    fn new(coeffs: BiquadCoeffs) -> Self {
        Self {
            coeffs,
            state: BiquadState::default(),
        }
    }
    fn process(&mut self, input: f64) -> f64 {
        // Transposed direct form II
        let y = self.coeffs.b0 * input + self.state.z1;
        self.state.z1 = self.coeffs.b1 * input - self.coeffs.a1 * y + self.state.z2;
        self.state.z2 = self.coeffs.b2 * input - self.coeffs.a2 * y;
        y
    }
    /// Loads the state a constant input `u` would settle to. Returns the settled output.
    fn prime(&mut self, u: f64) -> f64 {
        let y = self.coeffs.dc_gain() * u;
        self.state.z1 = y - self.coeffs.b0 * u;
        self.state.z2 = self.coeffs.b2 * u - self.coeffs.a2 * y;
        y
    }
}
/// Cascade of second-order sections.
#[derive(Clone, Debug, Default)]
pub struct FilterChain {
    sections: Vec<BiquadFilter>,
}
impl FilterChain {
    pub fn from_kinds(sample_rate_hz: f64, kinds: &[FilterKind]) -> Self {
        let nyquist = sample_rate_hz * 0.5;
        let sections = kinds
            .iter()
            .map(|kind| {
                let coeffs = match *kind {
                    FilterKind::Highpass { cutoff_hz, q } => {
                        highpass(nyquist_clamp(cutoff_hz, nyquist), sample_rate_hz, q)
                    }
                    FilterKind::Lowpass { cutoff_hz, q } => {
                        lowpass(nyquist_clamp(cutoff_hz, nyquist), sample_rate_hz, q)
                    }
                };
                BiquadFilter::new(coeffs)
            })
            .collect();
        Self { sections }
    }
    /// Butterworth band-pass of the given (even) order per edge.
    pub fn butterworth_bandpass(sample_rate_hz: f64, low_hz: f64, high_hz: f64, order: usize) -> Self {
        let qs = butterworth_qs(order);
        let mut kinds: Vec<FilterKind> = qs
            .iter()
            .map(|&q| FilterKind::Highpass { cutoff_hz: low_hz, q })
            .collect();
        kinds.extend(qs.iter().map(|&q| FilterKind::Lowpass { cutoff_hz: high_hz, q }));
        Self::from_kinds(sample_rate_hz, &kinds)
    }
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }
    pub fn reset(&mut self) {
        for section in &mut self.sections {
            section.state = BiquadState::default();
        }
    }
    fn prime(&mut self, mut value: f64) {
        for section in &mut self.sections {
            value = section.prime(value);
        }
    }
    pub fn process_sample(&mut self, mut value: f64) -> f64 {
        for section in &mut self.sections {
            value = section.process(value);
        }
        value
    }
    /// Forward-backward filtering with odd-reflection padding: zero phase,
    /// squared magnitude response.
    pub fn filtfilt(&self, input: &[f64], pad: usize) -> Vec<f64> {
        let n = input.len();
        if n == 0 || self.is_empty() {
            return input.to_vec();
        }
        let pad = pad.min(n.saturating_sub(1));
        let mut padded = Vec::with_capacity(n + 2 * pad);
        let first = input[0];
        let last = input[n - 1];
        padded.extend((1..=pad).rev().map(|i| 2.0 * first - input[i]));
        padded.extend_from_slice(input);
        padded.extend((1..=pad).map(|i| 2.0 * last - input[n - 1 - i]));
        let mut chain = self.clone();
        let forward = chain.run_primed(padded.iter().copied());
        let mut backward = chain.run_primed(forward.iter().rev().copied());
        backward.reverse();
        backward[pad..pad + n].to_vec()
    }
    fn run_primed(&mut self, input: impl Iterator<Item = f64>) -> Vec<f64> {
        let mut input = input.peekable();
        self.reset();
        if let Some(&head) = input.peek() {
            self.prime(head);
        }
        input.map(|x| self.process_sample(x)).collect()
    }
}
/// Section Qs of an even-order Butterworth prototype.
fn butterworth_qs(order: usize) -> Vec<f64> {
    let order = order.max(2) & !1;
    (1..=order / 2)
        .map(|k| 1.0 / (2.0 * ((2 * k - 1) as f64 * PI / (2 * order) as f64).cos()))
        .collect()
}
fn nyquist_clamp(freq_hz: f64, nyquist: f64) -> f64 {
    freq_hz.clamp(0.01, nyquist - 0.01)
}
fn lowpass(freq_hz: f64, sample_rate_hz: f64, q: f64) -> BiquadCoeffs {
    let w0 = 2.0 * PI * freq_hz / sample_rate_hz;
    let alpha = w0.sin() / (2.0 * q);
    let cos_w0 = w0.cos();
    let b0 = (1.0 - cos_w0) * 0.5;
    let b1 = 1.0 - cos_w0;
    let b2 = b0;
    let a0 = 1.0 + alpha;
    let a1 = -2.0 * cos_w0;
    let a2 = 1.0 - alpha;
    normalize(b0, b1, b2, a0, a1, a2)
}
fn highpass(freq_hz: f64, sample_rate_hz: f64, q: f64) -> BiquadCoeffs {
    let w0 = 2.0 * PI * freq_hz / sample_rate_hz;
    let alpha = w0.sin() / (2.0 * q);
    let cos_w0 = w0.cos();
    let b0 = (1.0 + cos_w0) * 0.5;
    let b1 = -(1.0 + cos_w0);
    let b2 = b0;
    let a0 = 1.0 + alpha;
    let a1 = -2.0 * cos_w0;
    let a2 = 1.0 - alpha;
    normalize(b0, b1, b2, a0, a1, a2)
}
fn normalize(b0: f64, b1: f64, b2: f64, a0: f64, a1: f64, a2: f64) -> BiquadCoeffs {
    let a0_inv = 1.0 / a0;
    BiquadCoeffs {
        b0: b0 * a0_inv,
        b1: b1 * a0_inv,
        b2: b2 * a0_inv,
        a1: a1 * a0_inv,
        a2: a2 * a0_inv,
    }
}
/// Least-squares linear detrend.
pub fn detrend(samples: &[f32]) -> Vec<f64> {
    let n = samples.len();
    if n < 2 {
        return samples.iter().map(|_| 0.0).collect();
    }
    let t_mean = (n - 1) as f64 / 2.0;
    let x_mean = samples.iter().map(|&x| x as f64).sum::<f64>() / n as f64;
    let (mut sxy, mut sxx) = (0.0, 0.0);
    for (i, &x) in samples.iter().enumerate() {
        let dt = i as f64 - t_mean;
        sxy += dt * (x as f64 - x_mean);
        sxx += dt * dt;
    }
    let slope = sxy / sxx;
    samples
        .iter()
        .enumerate()
        .map(|(i, &x)| x as f64 - x_mean - slope * (i as f64 - t_mean))
        .collect()
}
/// Zero mean, unit (population) variance. A flat input maps to all zeros.
pub fn zscore(values: &[f64]) -> Vec<f32> {
    if values.is_empty() {
        return Vec::new();
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let std = var.sqrt();
    if std < 1e-12 {
        return vec![0.0; values.len()];
    }
    values.iter().map(|v| ((v - mean) / std) as f32).collect()
}
/// Detrend, band-pass and normalize a raw pulse signal. Stateless between calls.
#[derive(Clone, Debug)]
pub struct SignalConditioner {
    low_hz: f32,
    high_hz: f32,
    order: usize,
}
impl SignalConditioner {
    pub const MIN_SAMPLES: usize = 8;
    pub fn new(config: &ConditionerConfig) -> Self {
        Self {
            low_hz: config.low_hz,
            high_hz: config.high_hz,
            order: config.filter_order,
        }
    }
    pub fn band(&self) -> (f32, f32) {
        (self.low_hz, self.high_hz)
    }
    pub fn condition(&self, raw: &RawPulseSignal) -> Result<ConditionedSignal, RppgError> {
        let fs = raw.sample_rate_hz();
        if raw.len() < Self::MIN_SAMPLES {
            return Err(RppgError::InsufficientFrames {
                expected: Self::MIN_SAMPLES,
                received: raw.len(),
                dropped: 0,
            });
        }
        if !(fs > 0.0) {
            return Err(RppgError::ModelFailure(format!("invalid sample rate {fs}")));
        }
        if let Some(pos) = raw.samples().iter().position(|v| !v.is_finite()) {
            return Err(RppgError::ModelFailure(format!(
                "non-finite pulse sample at index {pos}"
            )));
        }
        let filtered = self.bandpass(raw.samples(), fs);
        Ok(ConditionedSignal::new(zscore(&filtered), fs))
    }
    /// Detrended, band-passed copy of any trace sampled at `sample_rate_hz`,
    /// without amplitude normalization.
    pub fn bandpass(&self, samples: &[f32], sample_rate_hz: f32) -> Vec<f64> {
        let fs = sample_rate_hz as f64;
        let chain = FilterChain::butterworth_bandpass(
            fs,
            self.low_hz as f64,
            self.high_hz as f64,
            self.order,
        );
        let pad = (3.0 * fs / self.low_hz.max(0.05) as f64).ceil() as usize;
        chain.filtfilt(&detrend(samples), pad)
    }
}
