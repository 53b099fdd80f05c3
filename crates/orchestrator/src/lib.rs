//! Command orchestrator — the write path of the control plane.
//!
//! Every operation validates against the cached capabilities, runs the
//! adapter call under its configured deadline, normalizes the outcome,
//! publishes the resulting state change, and appends exactly one audit
//! record. No serialization is imposed across or within radios; the
//! adapter port is expected to be safe for concurrent use.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, warn};

use rcc_audit::{AuditRecord, AuditSink};
use rcc_config::CommandTimeouts;
use rcc_core::{
    AdapterError, CommandError, ErrorKind, Event, EventType, RadioState,
};
use rcc_hub::TelemetryHub;
use rcc_radio::RadioManager;

pub struct Orchestrator {
    manager: Arc<RadioManager>,
    hub: TelemetryHub,
    audit: Arc<dyn AuditSink>,
    timeouts: CommandTimeouts,
}

impl Orchestrator {
    pub fn new(
        manager: Arc<RadioManager>,
        hub: TelemetryHub,
        audit: Arc<dyn AuditSink>,
        timeouts: CommandTimeouts,
    ) -> Self {
        Self {
            manager,
            hub,
            audit,
            timeouts,
        }
    }

    /// Make `id` the active radio. Emits no domain event.
    pub async fn select_radio(&self, subject: &str, id: &str) -> Result<(), CommandError> {
        let result = self.manager.set_active(id).map_err(CommandError::from);
        self.record(subject, id, "selectRadio", serde_json::json!({ "id": id }), &result);
        result
    }

    /// Set transmit power, validated against cached capabilities.
    pub async fn set_power(
        &self,
        subject: &str,
        id: &str,
        power_dbm: f64,
    ) -> Result<(), CommandError> {
        let result = self.do_set_power(id, power_dbm).await;
        self.record(
            subject,
            id,
            "setPower",
            serde_json::json!({ "powerDbm": power_dbm }),
            &result,
        );
        result
    }

    async fn do_set_power(&self, id: &str, power_dbm: f64) -> Result<(), CommandError> {
        let radio = self.manager.get(id).map_err(CommandError::from)?;
        let caps = &radio.capabilities;
        if power_dbm < caps.min_power_dbm || power_dbm > caps.max_power_dbm {
            return Err(CommandError::invalid_range(format!(
                "power {power_dbm} dBm outside [{}, {}]",
                caps.min_power_dbm, caps.max_power_dbm
            )));
        }

        let adapter = self.manager.adapter(id).map_err(CommandError::from)?;
        self.invoke(self.timeouts.set_power, adapter.set_power(power_dbm))
            .await?;

        self.emit(Event::new(
            EventType::PowerChanged,
            id,
            serde_json::json!({ "radioId": id, "powerDbm": power_dbm }),
        ))
        .await;
        Ok(())
    }

    /// Tune to an explicit frequency, validated against the channel list.
    pub async fn set_frequency(
        &self,
        subject: &str,
        id: &str,
        frequency_mhz: f64,
    ) -> Result<(), CommandError> {
        let result = self.do_set_frequency(id, frequency_mhz).await;
        self.record(
            subject,
            id,
            "setChannel",
            serde_json::json!({ "frequencyMhz": frequency_mhz }),
            &result,
        );
        result
    }

    /// Tune by channel index, resolved through the plan.
    pub async fn set_channel_by_index(
        &self,
        subject: &str,
        id: &str,
        index: u32,
    ) -> Result<(), CommandError> {
        let result = match self.manager.resolve_frequency(id, index) {
            Ok(frequency) => self.do_set_frequency(id, frequency).await,
            Err(e) => Err(CommandError::from(e)),
        };
        self.record(
            subject,
            id,
            "setChannel",
            serde_json::json!({ "channelIndex": index }),
            &result,
        );
        result
    }

    async fn do_set_frequency(&self, id: &str, frequency_mhz: f64) -> Result<(), CommandError> {
        let radio = self.manager.get(id).map_err(CommandError::from)?;
        let caps = &radio.capabilities;
        if !caps.channels.is_empty() && caps.index_for_frequency(frequency_mhz).is_none() {
            return Err(CommandError::invalid_range(format!(
                "frequency {frequency_mhz} MHz is not in the channel plan for '{id}'"
            )));
        }

        let adapter = self.manager.adapter(id).map_err(CommandError::from)?;
        self.invoke(self.timeouts.set_channel, adapter.set_frequency(frequency_mhz))
            .await?;

        let mut data = serde_json::json!({ "radioId": id, "frequencyMhz": frequency_mhz });
        if let Some(index) = caps.index_for_frequency(frequency_mhz) {
            data["channelIndex"] = serde_json::json!(index);
        }
        self.emit(Event::new(EventType::ChannelChanged, id, data)).await;
        Ok(())
    }

    /// Current adapter-reported state for a radio.
    pub async fn get_state(&self, subject: &str, id: &str) -> Result<RadioState, CommandError> {
        let result = match self.manager.get(id) {
            Ok(_) => match self.manager.adapter(id) {
                Ok(adapter) => {
                    self.invoke(self.timeouts.get_state, adapter.get_state()).await
                }
                Err(e) => Err(CommandError::from(e)),
            },
            Err(e) => Err(CommandError::from(e)),
        };
        self.record(subject, id, "getState", serde_json::json!({}), &result);
        result
    }

    /// Run an adapter call under a deadline. Expiry is UNAVAILABLE;
    /// adapter errors keep their normalized kind.
    async fn invoke<T, F>(&self, limit: Duration, call: F) -> Result<T, CommandError>
    where
        F: Future<Output = Result<T, AdapterError>>,
    {
        match tokio::time::timeout(limit, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(CommandError::from(e)),
            Err(_) => Err(CommandError::unavailable(format!(
                "command deadline of {} exceeded",
                humantime::format_duration(limit)
            ))),
        }
    }

    /// Publish a state-change event. Publication failure never rolls
    /// back the adapter side effect; the command still succeeds.
    async fn emit(&self, event: Event) {
        if self.hub.publish(event).await == 0 {
            warn!("telemetry hub rejected event (stopped); command outcome unaffected");
        }
    }

    /// Append the one audit record every invocation produces.
    fn record<T>(
        &self,
        subject: &str,
        radio_id: &str,
        action: &str,
        params: serde_json::Value,
        result: &Result<T, CommandError>,
    ) {
        let code = result.as_ref().err().map(|e| e.kind);
        let record = AuditRecord::new(subject, radio_id, action, params, code);
        if let Err(e) = self.audit.append(&record) {
            error!(error = %e, action, "failed to append audit record");
        }
    }
}

/// Normalize a free-text vendor failure into a command error. Kept as
/// the single entry point for ports that do not yet return typed
/// errors.
pub fn normalize_raw_failure(message: &str) -> CommandError {
    CommandError::new(ErrorKind::from_raw_message(message), message.to_string())
}
