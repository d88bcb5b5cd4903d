use log::debug;

use crate::config::HeartRateConfig;
use crate::drivers::error::RppgError;
use crate::drivers::fft::SpectrumBuilder;
use crate::types::ConditionedSignal;

/// Main-lobe half width of the Hann window, in bins of the unpadded transform.
pub(crate) const MAIN_LOBE_BINS: f32 = 2.0;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HeartRateEstimate {
    pub bpm: f32,
    pub confidence: f32,
}

/// Spectral heart-rate estimator over the cardiac band.
///
/// Confidence compares the energy under the dominant peak's main lobe with the
/// whole band, rescaled so that a flat spectrum scores 0 and a pure tone scores 1.
#[derive(Clone, Debug)]
pub struct HeartRateEstimator {
    low_hz: f32,
    high_hz: f32,
    min_confidence: f32,
    min_band_energy: f32,
    fft_size: usize,
}

impl HeartRateEstimator {
    pub fn new(config: &HeartRateConfig, band_hz: (f32, f32)) -> Self {
        Self {
            low_hz: band_hz.0,
            high_hz: band_hz.1,
            min_confidence: config.min_confidence,
            min_band_energy: config.min_band_energy,
            fft_size: config.fft_size,
        }
    }

    pub fn estimate(&self, signal: &ConditionedSignal) -> Result<HeartRateEstimate, RppgError> {
        let no_pulse = |confidence: f32| RppgError::NoPulseDetected { confidence };
        if signal.len() < 2 {
            return Err(no_pulse(0.0));
        }
        let spectrum = SpectrumBuilder::with_size(self.fft_size)
            .compute(signal.samples(), signal.sample_rate_hz());
        let band = spectrum
            .band_bins(self.low_hz, self.high_hz)
            .ok_or_else(|| no_pulse(0.0))?;
        let in_band = spectrum.energy(band.clone());
        if !(in_band >= self.min_band_energy) {
            debug!("in-band energy {in_band:e} below threshold");
            return Err(no_pulse(0.0));
        }
        let (peak, _) = spectrum.peak_in(band.clone()).ok_or_else(|| no_pulse(0.0))?;
        let half_width = (MAIN_LOBE_BINS * spectrum.native_bin_span()).round() as usize;
        let lobe = spectrum.around(peak, half_width, &band);
        let ratio = spectrum.energy(lobe.clone()) / in_band;
        let band_len = band.clone().count() as f32;
        let flat_ratio = lobe.count() as f32 / band_len;
        let confidence = if flat_ratio >= 1.0 {
            0.0
        } else {
            ((ratio - flat_ratio) / (1.0 - flat_ratio)).clamp(0.0, 1.0)
        };
        let bpm = spectrum.refined_frequency(peak) * 60.0;
        debug!("spectral peak {bpm:.1} bpm, lobe ratio {ratio:.3}, confidence {confidence:.3}");
        if confidence < self.min_confidence {
            return Err(no_pulse(confidence));
        }
        Ok(HeartRateEstimate { bpm, confidence })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::f32::consts::PI;

    fn estimator() -> HeartRateEstimator {
        HeartRateEstimator::new(&HeartRateConfig::default(), (0.7, 4.0))
    }

    fn sinusoid(freq_hz: f32, fs: f32, n: usize) -> ConditionedSignal {
        let samples = (0..n)
            .map(|i| (2.0 * PI * freq_hz * i as f32 / fs).sin() * std::f32::consts::SQRT_2)
            .collect();
        ConditionedSignal::new(samples, fs)
    }

    #[test]
    fn pure_tone_gives_its_rate() {
        for &freq in &[0.9f32, 1.25, 2.0, 3.2] {
            let est = estimator().estimate(&sinusoid(freq, 30.0, 600)).unwrap();
            assert!((est.bpm - freq * 60.0).abs() <= 2.0, "{freq} Hz -> {} bpm", est.bpm);
            assert!(est.confidence > 0.8, "{freq} Hz confidence {}", est.confidence);
        }
    }

    #[test]
    fn lower_frame_rate_still_resolves() {
        let est = estimator().estimate(&sinusoid(1.25, 25.0, 500)).unwrap();
        assert!((est.bpm - 75.0).abs() <= 2.0);
    }

    #[test]
    fn white_noise_scores_near_zero_confidence() {
        let mut scores = Vec::new();
        for seed in 1..=8u64 {
            let mut rng = StdRng::seed_from_u64(seed);
            let samples = (0..600).map(|_| rng.gen_range(-1.0f32..1.0)).collect();
            let err = estimator()
                .estimate(&ConditionedSignal::new(samples, 30.0))
                .unwrap_err();
            match err {
                RppgError::NoPulseDetected { confidence } => {
                    assert!(confidence < 0.25, "seed {seed}: confidence {confidence}");
                    scores.push(confidence);
                }
                other => panic!("seed {seed}: unexpected {other:?}"),
            }
        }
        let mean = scores.iter().sum::<f32>() / scores.len() as f32;
        assert!(mean < 0.15, "mean noise confidence {mean}");
    }

    #[test]
    fn silence_is_rejected() {
        let err = estimator()
            .estimate(&ConditionedSignal::new(vec![0.0; 600], 30.0))
            .unwrap_err();
        assert_eq!(err, RppgError::NoPulseDetected { confidence: 0.0 });
    }
}
