use std::collections::HashMap;

use log::debug;

use crate::config::{HeartRateConfig, HrvConfig};
use crate::drivers::error::RppgError;
use crate::model::HrvData;
use crate::types::ConditionedSignal;

/// Histogram bin used for the HRV triangular index (1/128 s).
const TRIANGULAR_BIN_MS: f64 = 7.8125;

/// Everything the analyzer derived on the way to [`HrvData`].
#[derive(Clone, Debug, PartialEq)]
pub struct HrvReport {
    pub data: HrvData,
    /// Beat times in seconds from the start of the signal.
    pub beats_secs: Vec<f64>,
    /// Accepted inter-beat intervals in milliseconds.
    pub ibis_ms: Vec<f64>,
    pub mean_ibi_ms: f64,
    pub mean_hr_bpm: f64,
    pub triangular_index: f64,
}

#[derive(Clone, Debug)]
pub struct HrvAnalyzer {
    min_beats: usize,
    min_bpm: f32,
    max_bpm: f32,
}

impl HrvAnalyzer {
    pub fn new(config: &HrvConfig, rate: &HeartRateConfig) -> Self {
        Self {
            min_beats: config.min_beats,
            min_bpm: rate.min_bpm,
            max_bpm: rate.max_bpm,
        }
    }

    pub fn analyze(&self, signal: &ConditionedSignal) -> Result<HrvData, RppgError> {
        self.analyze_report(signal).map(|report| report.data)
    }

    pub fn analyze_report(&self, signal: &ConditionedSignal) -> Result<HrvReport, RppgError> {
        let fs = signal.sample_rate_hz() as f64;
        let min_distance = (fs * 60.0 / self.max_bpm as f64).floor().max(1.0) as usize;
        let beats = detect_beats(signal.samples(), min_distance);
        let insufficient = |detected: usize| RppgError::InsufficientBeats {
            detected,
            required: self.min_beats,
        };
        if beats.len() < self.min_beats {
            return Err(insufficient(beats.len()));
        }
        let beats_secs: Vec<f64> = beats.iter().map(|b| b / fs).collect();
        let min_ibi = 60_000.0 / self.max_bpm as f64;
        let max_ibi = 60_000.0 / self.min_bpm as f64;
        let raw_ibis: Vec<f64> = beats_secs.windows(2).map(|w| (w[1] - w[0]) * 1000.0).collect();
        let plausible = |ibi: &f64| (min_ibi..=max_ibi).contains(ibi);
        let ibis_ms: Vec<f64> = raw_ibis.iter().copied().filter(plausible).collect();
        // Differences only between intervals that were adjacent before filtering.
        let diffs: Vec<f64> = raw_ibis
            .windows(2)
            .filter(|w| plausible(&w[0]) && plausible(&w[1]))
            .map(|w| w[1] - w[0])
            .collect();
        if ibis_ms.len() + 1 < self.min_beats || diffs.is_empty() {
            debug!(
                "{} of {} intervals plausible",
                ibis_ms.len(),
                raw_ibis.len()
            );
            return Err(insufficient(beats.len()));
        }
        let data = metrics(&ibis_ms, &diffs);
        let mean_ibi_ms = mean(&ibis_ms);
        Ok(HrvReport {
            data,
            beats_secs,
            triangular_index: triangular_index(&ibis_ms),
            mean_hr_bpm: 60_000.0 / mean_ibi_ms,
            mean_ibi_ms,
            ibis_ms,
        })
    }
}

/// HRV indices of a clean, consecutive IBI series (milliseconds).
pub fn metrics_from_ibis(ibis_ms: &[f64]) -> HrvData {
    let diffs: Vec<f64> = ibis_ms.windows(2).map(|w| w[1] - w[0]).collect();
    metrics(ibis_ms, &diffs)
}

fn metrics(ibis: &[f64], diffs: &[f64]) -> HrvData {
    let rmssd = if diffs.is_empty() {
        0.0
    } else {
        (diffs.iter().map(|d| d * d).sum::<f64>() / diffs.len() as f64).sqrt()
    };
    let sdnn = if ibis.len() < 2 {
        0.0
    } else {
        let m = mean(ibis);
        (ibis.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (ibis.len() - 1) as f64).sqrt()
    };
    let pnn50 = if diffs.is_empty() {
        0.0
    } else {
        100.0 * diffs.iter().filter(|d| d.abs() > 50.0).count() as f64 / diffs.len() as f64
    };
    HrvData {
        rmssd,
        sdnn,
        pnn50,
        stress_index: stress_index(rmssd),
    }
}

/// Bounded, decreasing in RMSSD: 50 ms maps to 1, 5 ms and below saturate at 10.
pub fn stress_index(rmssd_ms: f64) -> f64 {
    if !(rmssd_ms > 0.0) {
        return 10.0;
    }
    (50.0 / rmssd_ms).clamp(0.0, 10.0)
}

fn triangular_index(ibis: &[f64]) -> f64 {
    let mut bins: HashMap<i64, usize> = HashMap::new();
    for ibi in ibis {
        *bins.entry((ibi / TRIANGULAR_BIN_MS).floor() as i64).or_default() += 1;
    }
    match bins.values().max() {
        Some(&peak) if peak > 0 => ibis.len() as f64 / peak as f64,
        _ => 0.0,
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Local maxima above the signal mean, taken tallest first and kept only if at least
/// `min_distance` samples from every beat already kept. Positions are sub-sample,
/// refined with a parabola, in ascending order.
pub fn detect_beats(samples: &[f32], min_distance: usize) -> Vec<f64> {
    let n = samples.len();
    if n < 3 {
        return Vec::new();
    }
    let threshold = samples.iter().map(|&v| v as f64).sum::<f64>() / n as f64;
    let mut candidates: Vec<usize> = (1..n - 1)
        .filter(|&i| {
            let v = samples[i];
            v as f64 > threshold && v > samples[i - 1] && v >= samples[i + 1]
        })
        .collect();
    candidates.sort_by(|&a, &b| samples[b].total_cmp(&samples[a]).then(a.cmp(&b)));
    let mut kept: Vec<usize> = Vec::with_capacity(candidates.len());
    for idx in candidates {
        if kept.iter().all(|&k| k.abs_diff(idx) >= min_distance) {
            kept.push(idx);
        }
    }
    kept.sort_unstable();
    kept.into_iter()
        .map(|i| {
            let (a, b, c) = (samples[i - 1] as f64, samples[i] as f64, samples[i + 1] as f64);
            let denom = a - 2.0 * b + c;
            let offset = if denom.abs() > 1e-12 {
                (0.5 * (a - c) / denom).clamp(-0.5, 0.5)
            } else {
                0.0
            };
            i as f64 + offset
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StressLevel;
    use approx::assert_relative_eq;

    const CRAFTED_IBIS: [f64; 5] = [800.0, 810.0, 790.0, 805.0, 795.0];

    fn analyzer() -> HrvAnalyzer {
        HrvAnalyzer::new(&HrvConfig::default(), &HeartRateConfig::default())
    }

    /// Gaussian bumps at the given sample positions.
    fn pulse_train(fs: f32, beats: &[usize], len: usize) -> ConditionedSignal {
        let sigma = 0.04 * fs;
        let samples = (0..len)
            .map(|i| {
                beats
                    .iter()
                    .map(|&b| {
                        let d = (i as f32 - b as f32) / sigma;
                        (-0.5 * d * d).exp()
                    })
                    .sum()
            })
            .collect();
        ConditionedSignal::new(samples, fs)
    }

    #[test]
    fn crafted_ibis_match_reference_values() {
        let hrv = metrics_from_ibis(&CRAFTED_IBIS);
        assert_relative_eq!(hrv.rmssd, 206.25f64.sqrt(), epsilon = 1e-9);
        assert_relative_eq!(hrv.sdnn, 62.5f64.sqrt(), epsilon = 1e-9);
        assert_relative_eq!(hrv.pnn50, 0.0);
        assert_relative_eq!(hrv.stress_index, 50.0 / 206.25f64.sqrt(), epsilon = 1e-9);
        assert_eq!(hrv.stress_level(), StressLevel::High);
    }

    #[test]
    fn beats_in_a_waveform_reproduce_crafted_ibis() {
        let fs = 200.0;
        let mut beats = vec![100usize];
        for ibi in CRAFTED_IBIS {
            let step = (ibi / 1000.0 * fs as f64).round() as usize;
            beats.push(beats[beats.len() - 1] + step);
        }
        let signal = pulse_train(fs, &beats, 1000);
        let report = analyzer().analyze_report(&signal).unwrap();
        assert_eq!(report.beats_secs.len(), 6);
        for (got, want) in report.ibis_ms.iter().zip(CRAFTED_IBIS) {
            assert_relative_eq!(*got, want, epsilon = 1e-6);
        }
        assert_relative_eq!(report.data.rmssd, 206.25f64.sqrt(), epsilon = 1e-6);
        assert_relative_eq!(report.data.sdnn, 62.5f64.sqrt(), epsilon = 1e-6);
        assert_relative_eq!(report.mean_ibi_ms, 800.0, epsilon = 1e-6);
        assert_relative_eq!(report.mean_hr_bpm, 75.0, epsilon = 1e-6);
        assert!(report.triangular_index >= 1.0);
    }

    #[test]
    fn three_beats_are_not_enough() {
        let signal = pulse_train(30.0, &[30, 60, 90], 150);
        let err = analyzer().analyze(&signal).unwrap_err();
        assert_eq!(
            err,
            RppgError::InsufficientBeats {
                detected: 3,
                required: 5
            }
        );
    }

    #[test]
    fn implausible_gaps_report_all_detected_beats() {
        // two of the four intervals are longer than the slowest plausible beat
        let signal = pulse_train(30.0, &[30, 60, 90, 200, 300], 360);
        let err = analyzer().analyze(&signal).unwrap_err();
        assert_eq!(
            err,
            RppgError::InsufficientBeats {
                detected: 5,
                required: 5
            }
        );
    }

    #[test]
    fn close_maxima_count_once() {
        let mut samples = vec![0.0f32; 200];
        for &(i, v) in &[(50, 1.0), (53, 0.9), (120, 1.0), (124, 0.8)] {
            samples[i] = v;
        }
        let beats = detect_beats(&samples, 8);
        assert_eq!(beats, vec![50.0, 120.0]);
    }

    #[test]
    fn pnn50_counts_large_jumps() {
        let hrv = metrics_from_ibis(&[800.0, 900.0, 820.0, 830.0]);
        assert_relative_eq!(hrv.pnn50, 200.0 / 3.0, epsilon = 1e-9);
    }

    #[test]
    fn stress_index_is_bounded() {
        assert_eq!(stress_index(0.0), 10.0);
        assert_eq!(stress_index(1.0), 10.0);
        assert_relative_eq!(stress_index(50.0), 1.0);
        assert!(stress_index(500.0) < stress_index(40.0));
    }
}
