use crate::config::{HeartRateConfig, QualityConfig};
use crate::drivers::fft::{PowerSpectrum, SpectrumBuilder};
use crate::dsp::heart_rate::MAIN_LOBE_BINS;
use crate::model::{QualityLevel, SignalQuality};
use crate::types::ConditionedSignal;

pub const MIN_SNR_DB: f32 = -50.0;
pub const MAX_SNR_DB: f32 = 60.0;

/// Peak amplitude over the spread of the rest of the cardiac band, in dB.
///
/// The spread is taken on the spectrum rather than the waveform: the mean power of
/// the band bins outside the peak's main lobe is the variance of the remaining
/// spectral content, so `10 log10(peak / mean_rest)` equals
/// `20 log10(amplitude / sqrt(variance))`. Harmonics count as noise.
#[derive(Clone, Debug)]
pub struct SignalQualityScorer {
    low_hz: f32,
    high_hz: f32,
    fft_size: usize,
    thresholds: QualityConfig,
}

impl SignalQualityScorer {
    pub fn new(config: &QualityConfig, rate: &HeartRateConfig, band_hz: (f32, f32)) -> Self {
        Self {
            low_hz: band_hz.0,
            high_hz: band_hz.1,
            fft_size: rate.fft_size,
            thresholds: config.clone(),
        }
    }

    pub fn score(&self, signal: &ConditionedSignal) -> SignalQuality {
        let snr = self.snr_db(signal);
        SignalQuality {
            snr,
            level: self.level(snr),
        }
    }

    pub fn level(&self, snr_db: f32) -> QualityLevel {
        let t = &self.thresholds;
        if snr_db >= t.excellent_db {
            QualityLevel::Excellent
        } else if snr_db >= t.good_db {
            QualityLevel::Good
        } else if snr_db >= t.fair_db {
            QualityLevel::Fair
        } else {
            QualityLevel::Poor
        }
    }

    fn snr_db(&self, signal: &ConditionedSignal) -> f32 {
        if signal.len() < 2 {
            return MIN_SNR_DB;
        }
        let spectrum =
            SpectrumBuilder::with_size(self.fft_size).compute(signal.samples(), signal.sample_rate_hz());
        self.spectrum_snr_db(&spectrum)
    }

    fn spectrum_snr_db(&self, spectrum: &PowerSpectrum) -> f32 {
        let Some(band) = spectrum.band_bins(self.low_hz, self.high_hz) else {
            return MIN_SNR_DB;
        };
        let Some((peak, peak_power)) = spectrum.peak_in(band.clone()) else {
            return MIN_SNR_DB;
        };
        if !(peak_power > 0.0) {
            return MIN_SNR_DB;
        }
        let half_width = (MAIN_LOBE_BINS * spectrum.native_bin_span()).round() as usize;
        let lobe = spectrum.around(peak, half_width, &band);
        let rest: Vec<f32> = band
            .filter(|b| !lobe.contains(b))
            .map(|b| spectrum.power[b])
            .collect();
        // nothing left to measure the spread against
        if rest.is_empty() {
            return MIN_SNR_DB;
        }
        let spread = rest.iter().sum::<f32>() / rest.len() as f32;
        let snr = if spread <= peak_power * 1e-9 {
            MAX_SNR_DB
        } else {
            10.0 * (peak_power / spread).log10()
        };
        snr.clamp(MIN_SNR_DB, MAX_SNR_DB)
    }
}
