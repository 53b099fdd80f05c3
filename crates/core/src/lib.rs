//! Core domain types and ports for the Radio Control Container.
//!
//! Everything the other crates agree on lives here: telemetry events,
//! the radio inventory model, authenticated claims, the normalized
//! error taxonomy, and the vendor-facing `RadioAdapter` port.

pub mod adapter;
pub mod claims;
pub mod error;
pub mod event;
pub mod radio;

pub use adapter::{AdapterError, FrequencyProfile, RadioAdapter, RadioState};
pub use claims::{Claims, Role, Scope};
pub use error::{CommandError, ErrorKind};
pub use event::{Event, EventType, GLOBAL_PARTITION};
pub use radio::{Capabilities, Channel, InventorySnapshot, InventorySource, Radio, RadioStatus};
