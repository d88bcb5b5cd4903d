use std::time::Instant;
use log::{debug, info, warn};
use crate::config::PipelineConfig;
use crate::drivers::buffer::WindowAssembler;
use crate::drivers::error::RppgError;
use crate::drivers::extractor::WaveformExtractor;
use crate::drivers::source::{CaptureSpec, FrameSource};
use crate::dsp::{
    HeartRateEstimator, HrvAnalyzer, HrvReport, SignalConditioner, SignalQualityScorer, SpO2Estimator,
};
use crate::model::{unix_millis, QualityLevel, RppgResult, SpO2Status};
use crate::types::{ConditionedSignal, FrameWindow, RawPulseSignal, RgbTrace, SessionId};
/// Everything produced while processing one window.
#[derive(Clone, Debug)]
pub struct Analysis {
    pub result: RppgResult,
    pub raw: RawPulseSignal,
    pub conditioned: ConditionedSignal,
    pub trace: RgbTrace,
    pub hrv_report: Option<HrvReport>,
    /// SpO2 status under the configured confidence floor.
    pub spo2_status: Option<SpO2Status>,
    pub spo2_reference_only: bool,
    /// Optional estimators that were skipped or failed.
    pub skipped: Vec<RppgError>,
}
/// Window → raw pulse → conditioned signal → estimators → result.
#[derive(Clone, Debug)]
pub struct VitalsPipeline {
    conditioner: SignalConditioner,
    heart_rate: HeartRateEstimator,
    hrv: Option<HrvAnalyzer>,
    spo2: Option<SpO2Estimator>,
    quality: SignalQualityScorer,
    bpm_range: (f32, f32),
    roi_fraction: f32,
}
impl VitalsPipeline {
    pub fn new(config: &PipelineConfig) -> Self {
        let conditioner = SignalConditioner::new(&config.conditioner);
        let band = conditioner.band();
        Self {
            heart_rate: HeartRateEstimator::new(&config.heart_rate, band),
            hrv: config
                .hrv
                .enabled
                .then(|| HrvAnalyzer::new(&config.hrv, &config.heart_rate)),
            spo2: config
                .spo2
                .enabled
                .then(|| SpO2Estimator::new(&config.spo2, conditioner.clone())),
            quality: SignalQualityScorer::new(&config.quality, &config.heart_rate, band),
            bpm_range: (config.heart_rate.min_bpm, config.heart_rate.max_bpm),
            roi_fraction: config.extractor.roi_fraction,
            conditioner,
        }
    }
    pub fn process(
        &self,
        extractor: &dyn WaveformExtractor,
        window: &FrameWindow,
        session_id: SessionId,
    ) -> Result<RppgResult, RppgError> {
        self.analyze(extractor, window, session_id).map(|a| a.result)
    }
    /// Extractor, conditioner and heart-rate failures abort; HRV and SpO2 failures
    /// only leave their field empty and are listed in `skipped`.
    pub fn analyze(
        &self,
        extractor: &dyn WaveformExtractor,
        window: &FrameWindow,
        session_id: SessionId,
    ) -> Result<Analysis, RppgError> {
        let started = Instant::now();
        let raw = extractor.infer(window)?;
        if raw.len() != window.len() {
            return Err(RppgError::ModelFailure(format!(
                "extractor returned {} samples for {} frames",
                raw.len(),
                window.len()
            )));
        }
        let conditioned = self.conditioner.condition(&raw)?;
        let quality = self.quality.score(&conditioned);
        debug!("signal quality {:?} ({:.1} dB)", quality.level, quality.snr);
        let estimate = self.heart_rate.estimate(&conditioned)?;
        let (min_bpm, max_bpm) = self.bpm_range;
        if !(min_bpm..=max_bpm).contains(&estimate.bpm) {
            return Err(RppgError::LowConfidence { bpm: estimate.bpm });
        }
        let trace = window.channel_means(self.roi_fraction);
        let mut skipped = Vec::new();
        let gate = (quality.level == QualityLevel::Poor).then_some(RppgError::LowQuality {
            level: quality.level,
            snr_db: quality.snr,
        });
        let mut hrv_report = None;
        if let Some(analyzer) = &self.hrv {
            match gate.clone().map_or_else(|| analyzer.analyze_report(&conditioned), Err) {
                Ok(report) => hrv_report = Some(report),
                Err(e) => {
                    warn!("HRV skipped: {e}");
                    skipped.push(e);
                }
            }
        }
        let (mut spo2, mut spo2_status, mut spo2_reference_only) = (None, None, false);
        if let Some(estimator) = &self.spo2 {
            match gate.clone().map_or_else(|| estimator.estimate(&trace), Err) {
                Ok(data) => {
                    spo2_status = Some(estimator.classify(&data));
                    spo2_reference_only = estimator.is_reference_only(&data);
                    spo2 = Some(data);
                }
                Err(e) => {
                    warn!("SpO2 skipped: {e}");
                    skipped.push(e);
                }
            }
        }
        let result = RppgResult {
            session_id,
            heart_rate: estimate.bpm,
            confidence: estimate.confidence,
            frame_count: window.len() as u32,
            processing_time_ms: started.elapsed().as_millis() as u64,
            hrv: hrv_report.as_ref().map(|r| r.data),
            spo2,
            quality,
            timestamp: unix_millis(),
        };
        info!(
            "session {}: {:.1} bpm (confidence {:.2}, quality {:?})",
            result.session_id, result.heart_rate, result.confidence, result.quality.level
        );
        Ok(Analysis {
            result,
            raw,
            conditioned,
            trace,
            hrv_report,
            spo2_status,
            spo2_reference_only,
            skipped,
        })
    }
}
/// Pulls frames from `source` until the window is full or the source ends.
pub fn collect_window(
    source: &mut dyn FrameSource,
    spec: &CaptureSpec,
) -> Result<FrameWindow, RppgError> {
    source.start(spec)?;
    let mut assembler = WindowAssembler::new(spec.expected_frames(), spec.target_fps);
    while !assembler.is_full() {
        let Some(frame) = source.next_frame()? else {
            break;
        };
        assembler.push(frame);
    }
    assembler.finish(0)
}
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnalysisMode;
    use crate::drivers::error::ErrorKind;
    use crate::drivers::extractor::PosExtractor;
    use crate::drivers::source::{ManualSource, SyntheticFaceSource, SyntheticPulse};
    use crate::types::Frame;
    use ndarray::Array3;
    use std::time::Duration;
    fn small_config() -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.capture.frame_width = 16;
        config.capture.frame_height = 16;
        config
    }
    fn synthetic_window(config: &PipelineConfig, bpm: f32) -> FrameWindow {
        let pulse = SyntheticPulse {
            bpm,
            ..SyntheticPulse::default()
        };
        let mut source = SyntheticFaceSource::new(pulse, 17);
        collect_window(&mut source, &CaptureSpec::from(&config.capture)).unwrap()
    }
    #[test]
    fn synthetic_window_yields_full_result() {
        let config = small_config();
        let window = synthetic_window(&config, 75.0);
        let extractor = PosExtractor::new(&config.extractor, (16, 16));
        let analysis = VitalsPipeline::new(&config)
            .analyze(&extractor, &window, SessionId::from("t"))
            .unwrap();
        let result = &analysis.result;
        assert!((73.0..=77.0).contains(&result.heart_rate), "{}", result.heart_rate);
        assert_eq!(result.frame_count, 600);
        assert!(matches!(result.quality.level, QualityLevel::Good | QualityLevel::Excellent));
        assert!(result.hrv.is_some(), "{:?}", analysis.skipped);
        let spo2 = result.spo2.unwrap();
        assert_eq!(spo2.health_status(), SpO2Status::Normal);
        assert_eq!(analysis.spo2_status, Some(SpO2Status::Normal));
        assert!(!analysis.spo2_reference_only);
        assert_eq!(analysis.conditioned.len(), 600);
        assert_eq!(analysis.trace.len(), 600);
    }
    #[test]
    fn spo2_confidence_floor_comes_from_config() {
        let mut config = small_config();
        config.capture.duration_secs = 10.0;
        config.spo2.min_confidence = 1.0;
        let window = synthetic_window(&config, 75.0);
        let extractor = PosExtractor::new(&config.extractor, (16, 16));
        let analysis = VitalsPipeline::new(&config)
            .analyze(&extractor, &window, SessionId::from("t"))
            .unwrap();
        let spo2 = analysis.result.spo2.unwrap();
        assert!(spo2.confidence < 1.0);
        assert!(analysis.spo2_reference_only);
        assert_eq!(analysis.spo2_status, Some(SpO2Status::Unknown));
    }
    #[test]
    fn poor_quality_skips_hrv_and_spo2() {
        let mut config = small_config();
        config.capture.duration_secs = 10.0;
        config.quality.excellent_db = 100.0;
        config.quality.good_db = 100.0;
        config.quality.fair_db = 100.0;
        let window = synthetic_window(&config, 75.0);
        let extractor = PosExtractor::new(&config.extractor, (16, 16));
        let analysis = VitalsPipeline::new(&config)
            .analyze(&extractor, &window, SessionId::from("t"))
            .unwrap();
        assert_eq!(analysis.result.quality.level, QualityLevel::Poor);
        assert!((analysis.result.heart_rate - 75.0).abs() < 3.0);
        assert!(analysis.result.hrv.is_none());
        assert!(analysis.result.spo2.is_none());
        assert!(analysis.hrv_report.is_none());
        assert_eq!(analysis.spo2_status, None);
        assert_eq!(analysis.skipped.len(), 2);
        assert!(analysis
            .skipped
            .iter()
            .all(|e| e.kind() == ErrorKind::LowQuality));
    }
    #[test]
    fn disabled_estimators_leave_fields_empty() {
        let mut config = small_config();
        config.capture.duration_secs = 10.0;
        config.set_analysis_mode(AnalysisMode::HeartRateOnly);
        let window = synthetic_window(&config, 90.0);
        let extractor = PosExtractor::new(&config.extractor, (16, 16));
        let analysis = VitalsPipeline::new(&config)
            .analyze(&extractor, &window, SessionId::from("t"))
            .unwrap();
        assert!(analysis.result.hrv.is_none());
        assert!(analysis.result.spo2.is_none());
        assert!(analysis.skipped.is_empty());
        assert!((analysis.result.heart_rate - 90.0).abs() < 3.0);
    }
    #[test]
    fn rate_outside_plausible_range_fails() {
        let mut config = small_config();
        config.capture.duration_secs = 10.0;
        config.heart_rate.max_bpm = 60.0;
        let window = synthetic_window(&config, 75.0);
        let extractor = PosExtractor::new(&config.extractor, (16, 16));
        let err = VitalsPipeline::new(&config)
            .process(&extractor, &window, SessionId::from("t"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LowConfidence);
    }
    #[test]
    fn static_video_has_no_pulse() {
        let config = small_config();
        let frames = (0..600).map(|i| {
            Frame::new(
                i,
                Duration::from_millis(i * 33),
                Array3::from_elem((16, 16, 3), 120u8),
            )
        });
        let mut source = ManualSource::new(frames);
        let window = collect_window(&mut source, &CaptureSpec::from(&config.capture)).unwrap();
        let extractor = PosExtractor::new(&config.extractor, (16, 16));
        let err = VitalsPipeline::new(&config)
            .process(&extractor, &window, SessionId::from("t"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoPulseDetected);
    }
    #[test]
    fn short_source_is_insufficient() {
        let config = small_config();
        let frames = (0..10).map(|i| {
            Frame::new(i, Duration::from_millis(i * 33), Array3::zeros((16, 16, 3)))
        });
        let mut source = ManualSource::new(frames);
        let err = collect_window(&mut source, &CaptureSpec::from(&config.capture)).unwrap_err();
        assert_eq!(
            err,
            RppgError::InsufficientFrames {
                expected: 600,
                received: 10,
                dropped: 0
            }
        );
    }
}
