use serde::{Deserialize, Serialize};
use thiserror::Error;
use crate::model::QualityLevel;
/// Fieldless tag for every failure the pipeline can report.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    InsufficientFrames,
    ModelFailure,
    NoPulseDetected,
    InsufficientBeats,
    LowQuality,
    LowConfidence,
    SessionBusy,
    InvalidTransition,
    Timeout,
    PersistenceFailure,
    NetworkFailure,
}
#[derive(Clone, Debug, Error, PartialEq)]
pub enum RppgError {
    #[error("insufficient frames: expected {expected}, received {received} ({dropped} dropped)")]
    InsufficientFrames {
        expected: usize,
        received: usize,
        dropped: usize,
    },
    #[error("waveform model failure: {0}")]
    ModelFailure(String),
    #[error("no pulse detected in the cardiac band (confidence {confidence:.2})")]
    NoPulseDetected { confidence: f32 },
    #[error("insufficient beats: detected {detected}, need at least {required}")]
    InsufficientBeats { detected: usize, required: usize },
    #[error("signal quality too low ({level:?}, snr {snr_db:.1} dB)")]
    LowQuality { level: QualityLevel, snr_db: f32 },
    #[error("heart rate {bpm:.1} bpm is outside the plausible range")]
    LowConfidence { bpm: f32 },
    #[error("a session is already active")]
    SessionBusy,
    #[error("cannot {action} while {state}")]
    InvalidTransition {
        state: &'static str,
        action: &'static str,
    },
    #[error("session timed out after {elapsed_ms} ms")]
    Timeout { elapsed_ms: u64 },
    #[error("failed to persist result: {0}")]
    PersistenceFailure(String),
    #[error("failed to upload result: {0}")]
    NetworkFailure(String),
}
impl RppgError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RppgError::InsufficientFrames { .. } => ErrorKind::InsufficientFrames,
            RppgError::ModelFailure(_) => ErrorKind::ModelFailure,
            RppgError::NoPulseDetected { .. } => ErrorKind::NoPulseDetected,
            RppgError::InsufficientBeats { .. } => ErrorKind::InsufficientBeats,
            RppgError::LowQuality { .. } => ErrorKind::LowQuality,
            RppgError::LowConfidence { .. } => ErrorKind::LowConfidence,
            RppgError::SessionBusy => ErrorKind::SessionBusy,
            RppgError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            RppgError::Timeout { .. } => ErrorKind::Timeout,
            RppgError::PersistenceFailure(_) => ErrorKind::PersistenceFailure,
            RppgError::NetworkFailure(_) => ErrorKind::NetworkFailure,
        }
    }
}
impl From<std::io::Error> for RppgError {
    fn from(value: std::io::Error) -> Self {
        RppgError::PersistenceFailure(value.to_string())
    }
}
impl From<serde_json::Error> for RppgError {
    fn from(value: serde_json::Error) -> Self {
        RppgError::PersistenceFailure(value.to_string())
    }
}
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[source] std::io::Error),
    #[error("failed to write config file: {0}")]
    Write(#[source] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[source] serde_json::Error),
    #[error("failed to serialize config: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("nothing to render: {0}")]
    Empty(&'static str),
    #[error("failed to render plot: {0}")]
    Plot(String),
}
impl<E: std::error::Error + Send + Sync + 'static> From<plotters::drawing::DrawingAreaErrorKind<E>>
    for RenderError
{
    fn from(value: plotters::drawing::DrawingAreaErrorKind<E>) -> Self {
        RenderError::Plot(format!("{value:?}"))
    }
}
impl From<image::ImageError> for RenderError {
    fn from(value: image::ImageError) -> Self {
        RenderError::Plot(value.to_string())
    }
}
#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn kind_tags_match_variants() {
        let err = RppgError::InsufficientFrames {
            expected: 600,
            received: 10,
            dropped: 0,
        };
        assert_eq!(err.kind(), ErrorKind::InsufficientFrames);
        assert!(err.to_string().contains("600"));
    }
    #[test]
    fn io_and_json_errors_become_persistence_failures() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only");
        assert_eq!(RppgError::from(io).kind(), ErrorKind::PersistenceFailure);
        let json = serde_json::from_str::<u32>("nope").unwrap_err();
        assert_eq!(RppgError::from(json).kind(), ErrorKind::PersistenceFailure);
    }
    #[test]
    fn config_error_keeps_source() {
        use std::error::Error;
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        assert!(ConfigError::Read(io).source().is_some());
    }
}
