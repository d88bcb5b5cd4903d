// src/model.rs
use serde::{Deserialize, Serialize};

use crate::types::SessionId;

/// Below this SpO2 confidence the estimate is not classified.
pub const SPO2_MIN_CONFIDENCE: f32 = 0.3;

pub const SPO2_CAVEAT: &str = "Camera-based SpO2 is a reference value only and is less reliable than a calibrated pulse oximeter.";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QualityLevel {
    Excellent,
    Good,
    Fair,
    Poor,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SignalQuality {
    pub snr: f32,
    pub level: QualityLevel,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HrvHealthStatus {
    Excellent,
    Good,
    Fair,
    Poor,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StressLevel {
    Low,
    Moderate,
    High,
    VeryHigh,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SpO2Status {
    Normal,
    MildHypoxemia,
    ModerateHypoxemia,
    SevereHypoxemia,
    Unknown,
}

/// Time-domain HRV indices. RMSSD and SDNN are in milliseconds, pNN50 in percent.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HrvData {
    pub rmssd: f64,
    pub sdnn: f64,
    pub pnn50: f64,
    pub stress_index: f64,
}

impl HrvData {
    pub fn health_status(&self) -> HrvHealthStatus {
        hrv_health(self.rmssd, self.sdnn)
    }

    pub fn stress_level(&self) -> StressLevel {
        stress_level(self.stress_index)
    }
}

pub fn hrv_health(rmssd: f64, sdnn: f64) -> HrvHealthStatus {
    if rmssd >= 50.0 && sdnn >= 50.0 {
        HrvHealthStatus::Excellent
    } else if rmssd >= 30.0 && sdnn >= 30.0 {
        HrvHealthStatus::Good
    } else if rmssd >= 20.0 && sdnn >= 20.0 {
        HrvHealthStatus::Fair
    } else {
        HrvHealthStatus::Poor
    }
}

pub fn stress_level(stress_index: f64) -> StressLevel {
    if stress_index < 1.0 {
        StressLevel::Low
    } else if stress_index < 2.0 {
        StressLevel::Moderate
    } else if stress_index < 4.0 {
        StressLevel::High
    } else {
        StressLevel::VeryHigh
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpO2Data {
    #[serde(rename = "value")]
    pub spo2: f32,
    pub confidence: f32,
    pub ratio_of_ratios: f32,
}

impl SpO2Data {
    pub fn health_status(&self) -> SpO2Status {
        self.health_status_at(SPO2_MIN_CONFIDENCE)
    }

    pub fn health_status_at(&self, min_confidence: f32) -> SpO2Status {
        spo2_status(self.spo2, self.confidence, min_confidence)
    }

    /// True when the estimate is too uncertain to be read as anything but a hint.
    pub fn is_reference_only(&self) -> bool {
        self.is_reference_only_at(SPO2_MIN_CONFIDENCE)
    }

    pub fn is_reference_only_at(&self, min_confidence: f32) -> bool {
        self.confidence.is_nan() || self.confidence < min_confidence
    }

    pub fn caveat(&self) -> &'static str {
        SPO2_CAVEAT
    }
}

pub fn spo2_status(spo2: f32, confidence: f32, min_confidence: f32) -> SpO2Status {
    if confidence.is_nan() || confidence < min_confidence || !spo2.is_finite() {
        return SpO2Status::Unknown;
    }
    if spo2 >= 95.0 {
        SpO2Status::Normal
    } else if spo2 >= 90.0 {
        SpO2Status::MildHypoxemia
    } else if spo2 >= 85.0 {
        SpO2Status::ModerateHypoxemia
    } else {
        SpO2Status::SevereHypoxemia
    }
}

/// Outcome of one completed session, serialized as a flat camelCase record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RppgResult {
    pub session_id: SessionId,
    pub heart_rate: f32,
    pub confidence: f32,
    pub frame_count: u32,
    pub processing_time_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hrv: Option<HrvData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spo2: Option<SpO2Data>,
    pub quality: SignalQuality,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
}

impl RppgResult {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

pub fn unix_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
