use std::collections::HashMap;
use std::f32::consts::PI;
use std::ops::RangeInclusive;
use std::sync::{Arc, Mutex};
use once_cell::sync::Lazy;
use rustfft::{num_complex::Complex32, Fft, FftPlanner};
static PLANS: Lazy<Mutex<HashMap<usize, Arc<dyn Fft<f32>>>>> = Lazy::new(|| Mutex::new(HashMap::new()));
fn forward_plan(size: usize) -> Arc<dyn Fft<f32>> {
    let mut plans = PLANS.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    plans
        .entry(size)
        .or_insert_with(|| FftPlanner::<f32>::new().plan_fft_forward(size))
        .clone()
}
/// One-sided power spectrum of a Hann-windowed, zero-padded signal.
#[derive(Clone, Debug)]
pub struct PowerSpectrum {
    pub sample_rate_hz: f32,
    pub fft_size: usize,
    pub signal_len: usize,
    pub power: Vec<f32>, // bins 0..=fft_size/2
}
impl PowerSpectrum {
    pub fn bin_width_hz(&self) -> f32 {
        self.sample_rate_hz / self.fft_size as f32
    }
    pub fn frequency(&self, bin: usize) -> f32 {
        bin as f32 * self.bin_width_hz()
    }
    pub fn frequencies_hz(&self) -> Vec<f32> {
        (0..self.power.len()).map(|k| self.frequency(k)).collect()
    }
    /// Padded bins spanned by one bin of the unpadded transform.
    pub fn native_bin_span(&self) -> f32 {
        self.fft_size as f32 / self.signal_len.max(1) as f32
    }
    /// Bins whose centre lies in `[low_hz, high_hz]`; `None` when the band holds no bin.
    pub fn band_bins(&self, low_hz: f32, high_hz: f32) -> Option<RangeInclusive<usize>> {
        let df = self.bin_width_hz();
        let last = self.power.len().checked_sub(1)?;
        let lo = (low_hz / df).ceil().max(0.0) as usize;
        let hi = ((high_hz / df).floor().max(0.0) as usize).min(last);
        (lo <= hi).then_some(lo..=hi)
    }
    pub fn energy(&self, bins: RangeInclusive<usize>) -> f32 {
        self.power
            .get(bins)
            .map(|slice| slice.iter().sum())
            .unwrap_or(0.0)
    }
    pub fn peak_in(&self, bins: RangeInclusive<usize>) -> Option<(usize, f32)> {
        let start = *bins.start();
        self.power
            .get(bins)?
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, &p)| (start + i, p))
    }
    /// `bins` widened by `half_width` on each side, clipped to `within`.
    pub fn around(
        &self,
        centre: usize,
        half_width: usize,
        within: &RangeInclusive<usize>,
    ) -> RangeInclusive<usize> {
        let lo = centre.saturating_sub(half_width).max(*within.start());
        let hi = (centre + half_width).min(*within.end());
        lo..=hi.max(lo)
    }
    /// Peak frequency refined by a parabola through the peak bin and its neighbours.
    pub fn refined_frequency(&self, bin: usize) -> f32 {
        if bin == 0 || bin + 1 >= self.power.len() {
            return self.frequency(bin);
        }
        let (a, b, c) = (self.power[bin - 1], self.power[bin], self.power[bin + 1]);
        let denom = a - 2.0 * b + c;
        let offset = if denom.abs() > f32::EPSILON {
            (0.5 * (a - c) / denom).clamp(-0.5, 0.5)
        } else {
            0.0
        };
        (bin as f32 + offset) * self.bin_width_hz()
    }
}
/// Computes power spectra with at least `fft_size` points.
pub struct SpectrumBuilder {
    fft_size: usize,
}
impl SpectrumBuilder {
    pub fn with_size(fft_size: usize) -> Self {
        Self { fft_size }
    }
    pub fn compute(&self, samples: &[f32], sample_rate_hz: f32) -> PowerSpectrum {
        let len = samples.len();
        let n = self.fft_size.max(len.next_power_of_two()).max(2);
        let mean = if len == 0 {
            0.0
        } else {
            samples.iter().sum::<f32>() / len as f32
        };
        let window: Vec<f32> = (0..len)
            .map(|i| {
                if len < 2 {
                    1.0
                } else {
                    0.5 - 0.5 * (2.0 * PI * i as f32 / (len - 1) as f32).cos()
                }
            })
            .collect();
        let gain: f32 = window.iter().sum::<f32>().max(f32::EPSILON);
        let mut buffer: Vec<Complex32> = samples
            .iter()
            .zip(&window)
            .map(|(&v, &w)| Complex32::new((v - mean) * w, 0.0))
            .collect();
        buffer.resize(n, Complex32::ZERO);
        forward_plan(n).process(&mut buffer);
        let power = buffer
            .iter()
            .take(n / 2 + 1)
            .map(|c| c.norm_sqr() / (gain * gain))
            .collect();
        PowerSpectrum {
            sample_rate_hz,
            fft_size: n,
            signal_len: len,
            power,
        }
    }
}
