//! RadioAdapter — the vendor-facing port.
//!
//! Every vendor integration implements this trait; the manager and
//! orchestrator depend on nothing else. Implementations must be safe
//! for concurrent use (or serialize internally) and must be
//! cancel-safe: callers wrap every operation in a deadline and drop
//! the future on expiry.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ErrorKind;

/// Current operating state reported by a radio.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RadioState {
    pub power_dbm: f64,
    pub frequency_mhz: f64,
}

/// One supported tuning profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrequencyProfile {
    pub frequencies: Vec<f64>,
    pub bandwidth_mhz: f64,
    pub antenna_mask: u32,
}

/// Failures an adapter may report. The kinds are final: anything a
/// vendor SDK produces must be mapped onto one of these before it
/// crosses the port.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AdapterError {
    #[error("invalid range: {0}")]
    InvalidRange(String),

    #[error("busy: {0}")]
    Busy(String),

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("internal: {0}")]
    Internal(String),
}

impl AdapterError {
    /// The normalized kind this error maps to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            AdapterError::InvalidRange(_) => ErrorKind::InvalidRange,
            AdapterError::Busy(_) => ErrorKind::Busy,
            AdapterError::Unavailable(_) => ErrorKind::Unavailable,
            AdapterError::Internal(_) => ErrorKind::Internal,
        }
    }
}

/// The vendor port.
#[async_trait]
pub trait RadioAdapter: Send + Sync {
    /// Current power and frequency.
    async fn get_state(&self) -> Result<RadioState, AdapterError>;

    /// Set transmit power. `power_dbm` must be ≥ 0.
    async fn set_power(&self, power_dbm: f64) -> Result<(), AdapterError>;

    /// Tune to a frequency in MHz.
    async fn set_frequency(&self, frequency_mhz: f64) -> Result<(), AdapterError>;

    /// Measured output power, which may differ from the commanded one.
    async fn read_power_actual(&self) -> Result<f64, AdapterError>;

    /// The tuning profiles this radio supports.
    async fn supported_frequency_profiles(&self) -> Result<Vec<FrequencyProfile>, AdapterError>;
}
