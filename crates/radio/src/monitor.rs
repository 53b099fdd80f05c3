//! Status monitor — probes radios and drives the online / recovering /
//! offline lifecycle.
//!
//! A healthy radio is probed every `probe_normal_interval`. On the
//! first failure it moves to `recovering` and the probe interval backs
//! off along the recovering profile; once that profile's ceiling is
//! reached without a success the radio is declared `offline` and the
//! offline profile takes over. Any successful probe returns the radio
//! to `online` and the normal cadence. Every transition is published
//! on the radio's telemetry partition.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use rcc_config::{ProbeProfile, TimingConfig};
use rcc_core::{Event, EventType, RadioAdapter, RadioStatus};
use rcc_hub::TelemetryHub;

use crate::manager::RadioManager;

pub struct StatusMonitor {
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl StatusMonitor {
    /// Start one probe task per currently registered radio.
    pub fn spawn(manager: Arc<RadioManager>, hub: TelemetryHub, timing: &TimingConfig) -> Self {
        let mut tasks = Vec::new();
        for radio in manager.list() {
            let Ok(adapter) = manager.adapter(&radio.id) else {
                continue;
            };
            tasks.push(tokio::spawn(probe_loop(
                manager.clone(),
                hub.clone(),
                radio.id,
                adapter,
                timing.probe_normal_interval,
                timing.probe_recovering,
                timing.probe_offline,
                timing.command_timeouts.get_state,
            )));
        }
        Self {
            tasks: Mutex::new(tasks),
        }
    }

    pub fn stop(&self) {
        for task in self.tasks.lock().unwrap_or_else(|e| e.into_inner()).drain(..) {
            task.abort();
        }
    }
}

impl Drop for StatusMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[allow(clippy::too_many_arguments)]
async fn probe_loop(
    manager: Arc<RadioManager>,
    hub: TelemetryHub,
    id: String,
    adapter: Arc<dyn RadioAdapter>,
    normal: Duration,
    recovering: ProbeProfile,
    offline: ProbeProfile,
    probe_timeout: Duration,
) {
    let mut interval = normal;
    loop {
        tokio::time::sleep(interval).await;

        let probe = match tokio::time::timeout(probe_timeout, adapter.get_state()).await {
            Ok(Ok(state)) => Ok(state),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err("probe timed out".to_string()),
        };

        let Ok(status) = manager.status(&id) else {
            return; // radio no longer known
        };

        match probe {
            Ok(_) => {
                if status != RadioStatus::Online {
                    transition(&manager, &hub, &id, RadioStatus::Online).await;
                }
                interval = normal;
            }
            Err(reason) => match status {
                RadioStatus::Online => {
                    warn!(radio = %id, %reason, "probe failed, radio recovering");
                    transition(&manager, &hub, &id, RadioStatus::Recovering).await;
                    interval = recovering.initial;
                }
                RadioStatus::Recovering => {
                    if interval >= recovering.max {
                        warn!(radio = %id, %reason, "recovery window exhausted, radio offline");
                        transition(&manager, &hub, &id, RadioStatus::Offline).await;
                        hub.publish(Event::new(
                            EventType::Fault,
                            id.as_str(),
                            serde_json::json!({ "reason": reason }),
                        ))
                        .await;
                        interval = offline.initial;
                    } else {
                        interval = scale(interval, recovering.backoff).min(recovering.max);
                    }
                }
                RadioStatus::Offline => {
                    interval = scale(interval, offline.backoff).min(offline.max);
                }
            },
        }
    }
}

async fn transition(manager: &RadioManager, hub: &TelemetryHub, id: &str, status: RadioStatus) {
    if manager.set_status(id, status).is_none() {
        return;
    }
    info!(radio = %id, status = ?status, "radio status changed");
    hub.publish(Event::new(
        EventType::State,
        id,
        serde_json::json!({ "status": status }),
    ))
    .await;
}

fn scale(interval: Duration, factor: f64) -> Duration {
    Duration::from_secs_f64(interval.as_secs_f64() * factor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::RegistrationOptions;
    use crate::sim::SimulatedAdapter;
    use rcc_config::ChannelPlan;
    use rcc_core::AdapterError;
    use rcc_hub::SubscribeOptions;

    fn timing() -> TimingConfig {
        let mut timing = TimingConfig::default();
        timing.probe_normal_interval = Duration::from_secs(1);
        timing.probe_recovering = ProbeProfile {
            initial: Duration::from_secs(1),
            backoff: 2.0,
            max: Duration::from_secs(4),
        };
        timing.probe_offline = ProbeProfile {
            initial: Duration::from_secs(2),
            backoff: 2.0,
            max: Duration::from_secs(8),
        };
        timing
    }

    #[tokio::test(start_paused = true)]
    async fn failing_radio_walks_recovering_then_offline_then_heals() {
        let timing = timing();
        let manager = Arc::new(RadioManager::new(ChannelPlan::default()));
        let adapter = Arc::new(SimulatedAdapter::new(2412.0));
        manager
            .register(
                "r1",
                "wave-x",
                adapter.clone(),
                RegistrationOptions::default(),
                Duration::from_secs(1),
            )
            .await
            .unwrap();

        let hub = TelemetryHub::new(&timing, manager.clone());
        let mut sub = hub
            .subscribe(SubscribeOptions {
                resume_from: None,
                radio: Some("r1".into()),
            })
            .unwrap();
        assert_eq!(sub.recv().await.unwrap().event_type, rcc_core::EventType::Ready);

        let monitor = StatusMonitor::spawn(manager.clone(), hub.clone(), &timing);
        adapter.set_failure(Some(AdapterError::Unavailable("link lost".into())));

        let recovering = sub.recv().await.unwrap();
        assert_eq!(recovering.event_type, EventType::State);
        assert_eq!(recovering.data["status"], "recovering");
        assert_eq!(manager.status("r1").unwrap(), RadioStatus::Recovering);

        let offline = sub.recv().await.unwrap();
        assert_eq!(offline.event_type, EventType::State);
        assert_eq!(offline.data["status"], "offline");

        let fault = sub.recv().await.unwrap();
        assert_eq!(fault.event_type, EventType::Fault);
        assert_eq!(fault.data["reason"], "unavailable: link lost");
        assert_eq!(manager.status("r1").unwrap(), RadioStatus::Offline);

        adapter.set_failure(None);
        let online = sub.recv().await.unwrap();
        assert_eq!(online.event_type, EventType::State);
        assert_eq!(online.data["status"], "online");
        assert_eq!(manager.status("r1").unwrap(), RadioStatus::Online);

        monitor.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn healthy_radio_stays_quiet() {
        let timing = timing();
        let manager = Arc::new(RadioManager::new(ChannelPlan::default()));
        let adapter = Arc::new(SimulatedAdapter::new(2412.0));
        manager
            .register(
                "r1",
                "wave-x",
                adapter,
                RegistrationOptions::default(),
                Duration::from_secs(1),
            )
            .await
            .unwrap();

        let hub = TelemetryHub::new(&timing, manager.clone());
        let mut sub = hub.subscribe(SubscribeOptions::default()).unwrap();
        sub.recv().await.unwrap(); // ready

        let _monitor = StatusMonitor::spawn(manager.clone(), hub.clone(), &timing);
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert!(sub.try_recv().is_none());
        assert_eq!(manager.status("r1").unwrap(), RadioStatus::Online);
    }
}
