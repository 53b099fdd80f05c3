//! The radio inventory model.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a managed radio, driven by the status monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RadioStatus {
    Online,
    Recovering,
    Offline,
}

/// One selectable channel: an operator-facing index and its frequency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    pub index: u32,
    pub frequency_mhz: f64,
}

/// What a radio can do, cached at registration time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    pub min_power_dbm: f64,
    pub max_power_dbm: f64,
    pub channels: Vec<Channel>,
}

impl Capabilities {
    /// Look up the frequency for a channel index, if this radio has it.
    pub fn frequency_for_index(&self, index: u32) -> Option<f64> {
        self.channels
            .iter()
            .find(|c| c.index == index)
            .map(|c| c.frequency_mhz)
    }

    /// Reverse lookup: the channel index for a frequency, if any.
    pub fn index_for_frequency(&self, frequency_mhz: f64) -> Option<u32> {
        self.channels
            .iter()
            .find(|c| (c.frequency_mhz - frequency_mhz).abs() < 1e-6)
            .map(|c| c.index)
    }
}

/// A managed radio as seen by operators.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Radio {
    pub id: String,
    pub model: String,
    pub status: RadioStatus,
    pub capabilities: Capabilities,
}

/// Point-in-time view of the whole inventory, used for the `ready`
/// event and the radio listing endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventorySnapshot {
    pub radios: Vec<Radio>,
    pub active_radio_id: Option<String>,
}

/// Anything that can produce an inventory snapshot. Implemented by the
/// radio manager; consumed by the telemetry hub so it can greet new
/// subscribers without depending on the manager crate.
pub trait InventorySource: Send + Sync {
    fn snapshot(&self) -> InventorySnapshot;
}
