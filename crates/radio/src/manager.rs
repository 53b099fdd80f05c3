//! Radio manager — inventory, adapter registry, active selection.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use thiserror::Error;
use tracing::info;

use rcc_config::ChannelPlan;
use rcc_core::{
    Capabilities, Channel, CommandError, ErrorKind, InventorySnapshot, InventorySource, Radio,
    RadioAdapter, RadioStatus,
};

/// Per-registration knobs. The adapter port has no power-range query,
/// so bounds arrive with the registration.
#[derive(Debug, Clone, Copy)]
pub struct RegistrationOptions {
    pub min_power_dbm: f64,
    pub max_power_dbm: f64,
}

impl Default for RegistrationOptions {
    fn default() -> Self {
        Self {
            min_power_dbm: 0.0,
            max_power_dbm: 39.0,
        }
    }
}

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("unknown radio '{0}'")]
    NotFound(String),

    #[error("channel index {index} is not in the plan for radio '{radio_id}'")]
    InvalidChannel { radio_id: String, index: u32 },

    #[error("registration of '{id}' failed: {reason}")]
    Registration {
        id: String,
        kind: ErrorKind,
        reason: String,
    },
}

impl From<ManagerError> for CommandError {
    fn from(err: ManagerError) -> Self {
        match &err {
            ManagerError::NotFound(_) => CommandError::new(ErrorKind::NotFound, err.to_string()),
            ManagerError::InvalidChannel { .. } => {
                CommandError::new(ErrorKind::InvalidRange, err.to_string())
            }
            ManagerError::Registration { kind, .. } => CommandError::new(*kind, err.to_string()),
        }
    }
}

#[derive(Default)]
struct Inner {
    radios: HashMap<String, Radio>,
    adapters: HashMap<String, Arc<dyn RadioAdapter>>,
    active: Option<String>,
}

/// Tracks the radio fleet. Mutations serialize on one writer lock;
/// reads take the read side and return values, never references.
pub struct RadioManager {
    plan: ChannelPlan,
    inner: RwLock<Inner>,
}

impl RadioManager {
    pub fn new(plan: ChannelPlan) -> Self {
        Self {
            plan,
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Register a radio, caching its capabilities. The adapter's state
    /// and profile queries run under `fetch_timeout`; any failure
    /// fails the registration.
    pub async fn register(
        &self,
        id: &str,
        model: &str,
        adapter: Arc<dyn RadioAdapter>,
        opts: RegistrationOptions,
        fetch_timeout: Duration,
    ) -> Result<(), ManagerError> {
        let fail = |kind: ErrorKind, reason: String| ManagerError::Registration {
            id: id.to_string(),
            kind,
            reason,
        };

        tokio::time::timeout(fetch_timeout, adapter.get_state())
            .await
            .map_err(|_| fail(ErrorKind::Unavailable, "state probe timed out".into()))?
            .map_err(|e| fail(e.kind(), e.to_string()))?;

        let profiles = tokio::time::timeout(fetch_timeout, adapter.supported_frequency_profiles())
            .await
            .map_err(|_| fail(ErrorKind::Unavailable, "profile query timed out".into()))?
            .map_err(|e| fail(e.kind(), e.to_string()))?;

        // Channel list: the plan for this model wins; otherwise indices
        // are synthesized from the first supported profile.
        let mut channels = self.plan.channels_for_model(model);
        if channels.is_empty() {
            channels = profiles
                .first()
                .map(|p| {
                    p.frequencies
                        .iter()
                        .enumerate()
                        .map(|(i, f)| Channel {
                            index: i as u32 + 1,
                            frequency_mhz: *f,
                        })
                        .collect()
                })
                .unwrap_or_default();
        }

        let radio = Radio {
            id: id.to_string(),
            model: model.to_string(),
            status: RadioStatus::Online,
            capabilities: Capabilities {
                min_power_dbm: opts.min_power_dbm,
                max_power_dbm: opts.max_power_dbm,
                channels,
            },
        };

        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.radios.insert(id.to_string(), radio);
        inner.adapters.insert(id.to_string(), adapter);
        info!(radio = id, model, "radio registered");
        Ok(())
    }

    /// Snapshot of all radios, ordered by id.
    pub fn list(&self) -> Vec<Radio> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let mut radios: Vec<Radio> = inner.radios.values().cloned().collect();
        radios.sort_by(|a, b| a.id.cmp(&b.id));
        radios
    }

    pub fn get(&self, id: &str) -> Result<Radio, ManagerError> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .radios
            .get(id)
            .cloned()
            .ok_or_else(|| ManagerError::NotFound(id.to_string()))
    }

    pub fn adapter(&self, id: &str) -> Result<Arc<dyn RadioAdapter>, ManagerError> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .adapters
            .get(id)
            .cloned()
            .ok_or_else(|| ManagerError::NotFound(id.to_string()))
    }

    /// Make `id` the active radio. Fails on unknown ids.
    pub fn set_active(&self, id: &str) -> Result<(), ManagerError> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if !inner.radios.contains_key(id) {
            return Err(ManagerError::NotFound(id.to_string()));
        }
        inner.active = Some(id.to_string());
        Ok(())
    }

    pub fn active(&self) -> Option<String> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .active
            .clone()
    }

    /// Resolve a channel index to a frequency: the radio's cached
    /// capabilities first, then the global plan for its model.
    pub fn resolve_frequency(&self, id: &str, index: u32) -> Result<f64, ManagerError> {
        let radio = self.get(id)?;
        radio
            .capabilities
            .frequency_for_index(index)
            .or_else(|| self.plan.resolve(&radio.model, index))
            .ok_or(ManagerError::InvalidChannel {
                radio_id: id.to_string(),
                index,
            })
    }

    pub fn status(&self, id: &str) -> Result<RadioStatus, ManagerError> {
        Ok(self.get(id)?.status)
    }

    /// Update a radio's status. Returns the previous status, or `None`
    /// for unknown ids.
    pub fn set_status(&self, id: &str, status: RadioStatus) -> Option<RadioStatus> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.radios.get_mut(id).map(|radio| {
            let previous = radio.status;
            radio.status = status;
            previous
        })
    }
}

impl InventorySource for RadioManager {
    fn snapshot(&self) -> InventorySnapshot {
        InventorySnapshot {
            radios: self.list(),
            active_radio_id: self.active(),
        }
    }
}
