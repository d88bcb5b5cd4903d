// src/lib.rs
//! Heart rate, HRV and SpO2 from facial video via remote photoplethysmography.
pub mod config;
pub mod drivers;
pub mod dsp;
pub mod engine;
pub mod model;
pub mod recorder;
pub mod session;
pub mod store;
pub mod types;

pub use config::PipelineConfig;
pub use drivers::error::{ErrorKind, RppgError};
pub use model::RppgResult;
pub use session::{Alignment, SessionController, SessionHandle};
pub use types::{SessionEvent, SessionId, SessionState};
