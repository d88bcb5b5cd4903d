// src/dsp/mod.rs
pub mod filter;
pub mod heart_rate;
pub mod hrv;
pub mod quality;
pub mod spo2;

pub use filter::{FilterChain, FilterKind, SignalConditioner};
pub use heart_rate::{HeartRateEstimate, HeartRateEstimator};
pub use hrv::{HrvAnalyzer, HrvReport};
pub use quality::SignalQualityScorer;
pub use spo2::SpO2Estimator;
