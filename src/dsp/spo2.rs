use log::debug;

use crate::config::SpO2Config;
use crate::drivers::error::RppgError;
use crate::dsp::filter::SignalConditioner;
use crate::model::{SpO2Data, SpO2Status};
use crate::types::RgbTrace;

/// Share of the calibrated ratio domain, centred, where confidence is not tapered.
const DOMAIN_INTERIOR: f32 = 0.8;

/// Ratio-of-ratios SpO2 from camera color channels. Red stands in for the red LED;
/// a green/blue mix stands in for infrared.
#[derive(Clone, Debug)]
pub struct SpO2Estimator {
    config: SpO2Config,
    conditioner: SignalConditioner,
}

impl SpO2Estimator {
    pub fn new(config: &SpO2Config, conditioner: SignalConditioner) -> Self {
        Self {
            config: config.clone(),
            conditioner,
        }
    }

    pub fn estimate(&self, trace: &RgbTrace) -> Result<SpO2Data, RppgError> {
        let no_pulse = RppgError::NoPulseDetected { confidence: 0.0 };
        if trace.len() < SignalConditioner::MIN_SAMPLES {
            return Err(no_pulse);
        }
        let ir = surrogate_infrared(trace);
        let dc_red = mean(&trace.red);
        let dc_ir = mean(&ir);
        if dc_red < 1e-6 || dc_ir < 1e-6 {
            return Err(no_pulse);
        }
        let red_ac = self.conditioner.bandpass(&trace.red, trace.sample_rate_hz);
        let ir_ac = self.conditioner.bandpass(&ir, trace.sample_rate_hz);
        let (ac_red, ac_ir) = (std_dev(&red_ac), std_dev(&ir_ac));
        if ac_red < 1e-9 || ac_ir < 1e-9 {
            return Err(no_pulse);
        }
        let ratio = ((ac_red / dc_red) / (ac_ir / dc_ir)) as f32;
        let factor = self.domain_factor(ratio);
        if factor <= 0.0 {
            debug!("ratio of ratios {ratio:.3} outside calibrated domain");
            return Ok(SpO2Data {
                spo2: 0.0,
                confidence: 0.0,
                ratio_of_ratios: ratio,
            });
        }
        let correlation = pearson(&red_ac, &ir_ac).abs() as f32;
        let SpO2Config { a, b, c, .. } = self.config;
        let spo2 = (a * ratio * ratio + b * ratio + c).clamp(0.0, 100.0);
        Ok(SpO2Data {
            spo2,
            confidence: (correlation * factor).clamp(0.0, 1.0),
            ratio_of_ratios: ratio,
        })
    }

    /// Health status under the configured confidence floor.
    pub fn classify(&self, data: &SpO2Data) -> SpO2Status {
        data.health_status_at(self.config.min_confidence)
    }

    pub fn is_reference_only(&self, data: &SpO2Data) -> bool {
        data.is_reference_only_at(self.config.min_confidence)
    }

    /// 1 in the interior of the domain, falling linearly to 0 at its edges.
    fn domain_factor(&self, ratio: f32) -> f32 {
        let (lo, hi) = (self.config.ratio_min, self.config.ratio_max);
        if !(ratio > lo && ratio < hi) {
            return 0.0;
        }
        let taper = (hi - lo) * (1.0 - DOMAIN_INTERIOR) / 2.0;
        let edge_distance = (ratio - lo).min(hi - ratio);
        if taper <= 0.0 {
            1.0
        } else {
            (edge_distance / taper).min(1.0)
        }
    }
}

pub fn surrogate_infrared(trace: &RgbTrace) -> Vec<f32> {
    trace
        .green
        .iter()
        .zip(&trace.blue)
        .map(|(&g, &b)| 0.7 * g + 0.3 * b)
        .collect()
}

fn mean(values: &[f32]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().map(|&v| v as f64).sum::<f64>() / values.len() as f64
}

fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let m = values.iter().sum::<f64>() / n;
    (values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / n).sqrt()
}

fn pearson(x: &[f64], y: &[f64]) -> f64 {
    let n = x.len().min(y.len());
    if n < 2 {
        return 0.0;
    }
    let mx = x[..n].iter().sum::<f64>() / n as f64;
    let my = y[..n].iter().sum::<f64>() / n as f64;
    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for (a, b) in x[..n].iter().zip(&y[..n]) {
        sxy += (a - mx) * (b - my);
        sxx += (a - mx).powi(2);
        syy += (b - my).powi(2);
    }
    let denom = (sxx * syy).sqrt();
    if denom < f64::EPSILON {
        0.0
    } else {
        sxy / denom
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConditionerConfig;
    use approx::assert_relative_eq;
    use std::f32::consts::PI;

    fn estimator() -> SpO2Estimator {
        SpO2Estimator::new(
            &SpO2Config::default(),
            SignalConditioner::new(&ConditionerConfig::default()),
        )
    }

    /// Channels sharing one 72 bpm pulse, each with its own modulation depth.
    fn trace(depth: [f32; 3]) -> RgbTrace {
        let fs = 30.0;
        let base = [150.0f32, 110.0, 90.0];
        let mut trace = RgbTrace::with_capacity(600, fs);
        for i in 0..600 {
            let p = (2.0 * PI * 1.2 * i as f32 / fs).sin();
            trace.red.push(base[0] * (1.0 + depth[0] * p));
            trace.green.push(base[1] * (1.0 + depth[1] * p));
            trace.blue.push(base[2] * (1.0 + depth[2] * p));
        }
        trace
    }

    #[test]
    fn ratio_of_ratios_maps_through_calibration() {
        let data = estimator().estimate(&trace([0.004, 0.008, 0.006])).unwrap();
        let ir_depth = (0.7 * 110.0 * 0.008 + 0.3 * 90.0 * 0.006) / (0.7 * 110.0 + 0.3 * 90.0);
        let expected_r = 0.004 / ir_depth;
        assert_relative_eq!(data.ratio_of_ratios, expected_r, epsilon = 1e-3);
        let expected = -45.06 * expected_r * expected_r + 30.354 * expected_r + 94.845;
        assert_relative_eq!(data.spo2, expected, epsilon = 0.1);
        assert!(data.confidence > 0.9);
        assert_eq!(data.health_status(), SpO2Status::Normal);
    }

    #[test]
    fn outside_domain_reports_unknown() {
        let data = estimator().estimate(&trace([0.02, 0.008, 0.006])).unwrap();
        assert!(data.ratio_of_ratios > 1.15);
        assert_eq!(data.confidence, 0.0);
        assert_eq!(data.health_status(), SpO2Status::Unknown);
        assert!(data.is_reference_only());
    }

    #[test]
    fn configured_confidence_floor_decides_reference_only() {
        // ratio near the low edge of the domain, so confidence is tapered
        let data = estimator().estimate(&trace([0.0034, 0.008, 0.006])).unwrap();
        assert!(data.confidence > 0.5 && data.confidence < 0.9);
        assert!(!estimator().is_reference_only(&data));
        let strict = SpO2Estimator::new(
            &SpO2Config {
                min_confidence: 0.999,
                ..SpO2Config::default()
            },
            SignalConditioner::new(&ConditionerConfig::default()),
        );
        assert!(strict.is_reference_only(&data));
        assert_eq!(strict.classify(&data), SpO2Status::Unknown);
        assert_eq!(estimator().classify(&data), SpO2Status::Normal);
    }

    #[test]
    fn confidence_tapers_near_domain_edge() {
        let est = estimator();
        assert_eq!(est.domain_factor(0.7), 1.0);
        assert!(est.domain_factor(0.42) > 0.0 && est.domain_factor(0.42) < 0.5);
        assert_eq!(est.domain_factor(0.4), 0.0);
        assert_eq!(est.domain_factor(1.3), 0.0);
    }

    #[test]
    fn flat_channels_have_no_pulse() {
        let err = estimator().estimate(&trace([0.0, 0.0, 0.0])).unwrap_err();
        assert_eq!(err, RppgError::NoPulseDetected { confidence: 0.0 });
    }
}
