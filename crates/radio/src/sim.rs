//! In-process radio adapter for development and tests.
//!
//! Behaves like a well-mannered vendor radio: remembers what it was
//! told, rejects negative power, and can be made to fail on demand.

use std::sync::Mutex;

use async_trait::async_trait;

use rcc_core::{AdapterError, FrequencyProfile, RadioAdapter, RadioState};

pub struct SimulatedAdapter {
    state: Mutex<RadioState>,
    profiles: Vec<FrequencyProfile>,
    failure: Mutex<Option<AdapterError>>,
}

impl SimulatedAdapter {
    pub fn new(frequency_mhz: f64) -> Self {
        Self {
            state: Mutex::new(RadioState {
                power_dbm: 0.0,
                frequency_mhz,
            }),
            profiles: vec![FrequencyProfile {
                frequencies: vec![frequency_mhz],
                bandwidth_mhz: 20.0,
                antenna_mask: 1,
            }],
            failure: Mutex::new(None),
        }
    }

    pub fn with_profiles(mut self, profiles: Vec<FrequencyProfile>) -> Self {
        self.profiles = profiles;
        self
    }

    /// Make every subsequent operation fail with `error` (or succeed
    /// again with `None`).
    pub fn set_failure(&self, error: Option<AdapterError>) {
        *self.failure.lock().unwrap_or_else(|e| e.into_inner()) = error;
    }

    fn check(&self) -> Result<(), AdapterError> {
        match &*self.failure.lock().unwrap_or_else(|e| e.into_inner()) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RadioAdapter for SimulatedAdapter {
    async fn get_state(&self) -> Result<RadioState, AdapterError> {
        self.check()?;
        Ok(*self.state.lock().unwrap_or_else(|e| e.into_inner()))
    }

    async fn set_power(&self, power_dbm: f64) -> Result<(), AdapterError> {
        self.check()?;
        if power_dbm < 0.0 {
            return Err(AdapterError::InvalidRange(format!(
                "power must be ≥ 0 dBm, got {power_dbm}"
            )));
        }
        self.state.lock().unwrap_or_else(|e| e.into_inner()).power_dbm = power_dbm;
        Ok(())
    }

    async fn set_frequency(&self, frequency_mhz: f64) -> Result<(), AdapterError> {
        self.check()?;
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .frequency_mhz = frequency_mhz;
        Ok(())
    }

    async fn read_power_actual(&self) -> Result<f64, AdapterError> {
        self.check()?;
        Ok(self.state.lock().unwrap_or_else(|e| e.into_inner()).power_dbm)
    }

    async fn supported_frequency_profiles(&self) -> Result<Vec<FrequencyProfile>, AdapterError> {
        self.check()?;
        Ok(self.profiles.clone())
    }
}
