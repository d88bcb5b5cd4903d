// src/config.rs
//! Pipeline settings, stored as JSON.
//!
//! Every section has serde defaults, so a partial file only overrides what it names.
//! `load` writes the defaults back when the file does not exist yet.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::drivers::error::ConfigError;

/// How the built-in extractor projects RGB means onto a pulse signal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectionMethod {
    Pos,
    Chrom,
    Green,
}

/// Which optional estimators run after heart rate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnalysisMode {
    HeartRateOnly,
    HrvOnly,
    Spo2Only,
    All,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub duration_secs: f32,
    pub target_fps: f32,
    pub frame_width: usize,
    pub frame_height: usize,
    pub queue_capacity: usize,
    pub max_dropped_frames: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            duration_secs: 20.0,
            target_fps: 30.0,
            frame_width: 128,
            frame_height: 128,
            queue_capacity: 60,
            max_dropped_frames: 30,
        }
    }
}

impl CaptureConfig {
    pub fn expected_frames(&self) -> usize {
        (self.duration_secs * self.target_fps).round().max(0.0) as usize
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f32(self.duration_secs.max(0.0))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConditionerConfig {
    pub low_hz: f32,
    pub high_hz: f32,
    pub filter_order: usize,
}

impl Default for ConditionerConfig {
    fn default() -> Self {
        Self {
            low_hz: 0.7,
            high_hz: 4.0,
            filter_order: 4,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartRateConfig {
    pub min_bpm: f32,
    pub max_bpm: f32,
    pub min_confidence: f32,
    pub min_band_energy: f32,
    pub fft_size: usize,
}

impl Default for HeartRateConfig {
    fn default() -> Self {
        Self {
            min_bpm: 30.0,
            max_bpm: 220.0,
            min_confidence: 0.3,
            min_band_energy: 1e-9,
            fft_size: 4096,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HrvConfig {
    pub enabled: bool,
    pub min_beats: usize,
}

impl Default for HrvConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_beats: 5,
        }
    }
}

/// `spo2 = a·R² + b·R + c` for ratio-of-ratios R inside `[ratio_min, ratio_max]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpO2Config {
    pub enabled: bool,
    pub a: f32,
    pub b: f32,
    pub c: f32,
    pub ratio_min: f32,
    pub ratio_max: f32,
    pub min_confidence: f32,
}

impl Default for SpO2Config {
    fn default() -> Self {
        Self {
            enabled: true,
            a: -45.06,
            b: 30.354,
            c: 94.845,
            ratio_min: 0.4,
            ratio_max: 1.15,
            min_confidence: 0.3,
        }
    }
}

/// SNR thresholds in dB.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    pub excellent_db: f32,
    pub good_db: f32,
    pub fair_db: f32,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            excellent_db: 20.0,
            good_db: 15.0,
            fair_db: 10.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    pub method: ProjectionMethod,
    pub roi_fraction: f32,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            method: ProjectionMethod::Pos,
            roi_fraction: 0.6,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub capture: CaptureConfig,
    pub conditioner: ConditionerConfig,
    pub heart_rate: HeartRateConfig,
    pub hrv: HrvConfig,
    pub spo2: SpO2Config,
    pub quality: QualityConfig,
    pub extractor: ExtractorConfig,
    pub processing_budget_secs: f32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            capture: CaptureConfig::default(),
            conditioner: ConditionerConfig::default(),
            heart_rate: HeartRateConfig::default(),
            hrv: HrvConfig::default(),
            spo2: SpO2Config::default(),
            quality: QualityConfig::default(),
            extractor: ExtractorConfig::default(),
            processing_budget_secs: 10.0,
        }
    }
}

impl PipelineConfig {
    /// Load config from `path`, writing the defaults there if it doesn't exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(contents) => {
                let config: Self = serde_json::from_str(&contents).map_err(ConfigError::Parse)?;
                config.validate()?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                config.save(path)?;
                Ok(config)
            }
            Err(e) => Err(ConfigError::Read(e)),
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(ConfigError::Write)?;
            }
        }
        let json = serde_json::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        fs::write(path, json).map_err(ConfigError::Write)
    }

    pub fn analysis_mode(&self) -> AnalysisMode {
        match (self.hrv.enabled, self.spo2.enabled) {
            (true, true) => AnalysisMode::All,
            (true, false) => AnalysisMode::HrvOnly,
            (false, true) => AnalysisMode::Spo2Only,
            (false, false) => AnalysisMode::HeartRateOnly,
        }
    }

    pub fn set_analysis_mode(&mut self, mode: AnalysisMode) {
        let (hrv, spo2) = match mode {
            AnalysisMode::HeartRateOnly => (false, false),
            AnalysisMode::HrvOnly => (true, false),
            AnalysisMode::Spo2Only => (false, true),
            AnalysisMode::All => (true, true),
        };
        self.hrv.enabled = hrv;
        self.spo2.enabled = spo2;
    }

    /// Wall-clock limit for one session, counted from the start of recording.
    pub fn session_timeout(&self) -> Duration {
        self.capture.duration() + Duration::from_secs_f32(self.processing_budget_secs.max(0.0))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));
        let c = &self.capture;
        if !(c.target_fps > 0.0) || !(c.duration_secs > 0.0) {
            return invalid(format!(
                "capture needs positive fps and duration (got {} fps, {} s)",
                c.target_fps, c.duration_secs
            ));
        }
        if c.frame_width == 0 || c.frame_height == 0 {
            return invalid("frame dimensions must be non-zero".into());
        }
        if c.queue_capacity == 0 {
            return invalid("queue_capacity must be at least 1".into());
        }
        let nyquist = c.target_fps / 2.0;
        let f = &self.conditioner;
        if !(f.low_hz > 0.0) || f.low_hz >= f.high_hz || f.high_hz >= nyquist {
            return invalid(format!(
                "band {}..{} Hz must be increasing and below Nyquist ({nyquist} Hz)",
                f.low_hz, f.high_hz
            ));
        }
        if f.filter_order < 2 || f.filter_order % 2 != 0 {
            return invalid(format!("filter_order must be even and >= 2 (got {})", f.filter_order));
        }
        let h = &self.heart_rate;
        if !(h.min_bpm > 0.0) || h.min_bpm >= h.max_bpm {
            return invalid(format!("bpm range {}..{} is inverted", h.min_bpm, h.max_bpm));
        }
        if !(0.0..=1.0).contains(&h.min_confidence) {
            return invalid("heart_rate.min_confidence must be within [0, 1]".into());
        }
        if h.fft_size < 64 || !h.fft_size.is_power_of_two() {
            return invalid(format!("fft_size must be a power of two >= 64 (got {})", h.fft_size));
        }
        if self.hrv.min_beats < 3 {
            return invalid("hrv.min_beats must be at least 3".into());
        }
        let s = &self.spo2;
        if !(s.ratio_min > 0.0) || s.ratio_min >= s.ratio_max {
            return invalid(format!("spo2 ratio domain {}..{} is inverted", s.ratio_min, s.ratio_max));
        }
        if !(0.0..=1.0).contains(&s.min_confidence) {
            return invalid("spo2.min_confidence must be within [0, 1]".into());
        }
        let q = &self.quality;
        if !(q.excellent_db >= q.good_db && q.good_db >= q.fair_db) {
            return invalid("quality thresholds must be descending".into());
        }
        if !(self.extractor.roi_fraction > 0.0 && self.extractor.roi_fraction <= 1.0) {
            return invalid("extractor.roi_fraction must be within (0, 1]".into());
        }
        if !(self.processing_budget_secs > 0.0) {
            return invalid("processing_budget_secs must be positive".into());
        }
        Ok(())
    }
}
