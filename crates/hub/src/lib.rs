//! Telemetry hub — sequencing, buffering, fan-out, replay, heartbeat.
//!
//! Subscribers are message-addressed: the hub holds only bounded
//! outbox senders, never writers. A slow consumer costs nothing but
//! its own dropped events; publishers are never blocked past a short
//! grace window.

pub mod buffer;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock, Weak};
use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use rcc_config::TimingConfig;
use rcc_core::{Event, EventType, GLOBAL_PARTITION, InventorySource};

pub use buffer::EventBuffer;

/// How long a full outbox may hold up fan-out before the event is
/// dropped for that subscriber.
const OFFER_TIMEOUT: Duration = Duration::from_millis(100);

/// Live-event headroom on top of the replay length when sizing a new
/// subscriber's outbox.
const OUTBOX_HEADROOM: usize = 64;

/// Upper bound on waiting for delivery tasks to wind down in `stop`.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("telemetry hub is stopped")]
    Stopped,
}

/// Options for a new subscription.
#[derive(Debug, Default, Clone)]
pub struct SubscribeOptions {
    /// Replay buffered events with ids greater than this. Requires
    /// `radio` to name the partition; ignored otherwise.
    pub resume_from: Option<i64>,

    /// Restrict live delivery to this radio's partition (global
    /// events are always delivered).
    pub radio: Option<String>,
}

/// A live subscription handed to the delivery loop. Dropping it
/// deregisters the subscriber; the hub closes the outbox exactly once.
pub struct Subscription {
    id: u64,
    rx: mpsc::Receiver<Event>,
    hub: Weak<HubInner>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next event, or `None` once the hub has shut the outbox.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.hub.upgrade() {
            inner.deregister(self.id);
        }
    }
}

struct SubscriberHandle {
    tx: mpsc::Sender<Event>,
    radio: Option<String>,
}

impl SubscriberHandle {
    fn wants(&self, event: &Event) -> bool {
        match &self.radio {
            None => true,
            Some(radio) => event.radio_id.is_empty() || event.radio_id == *radio,
        }
    }
}

#[derive(Default)]
struct HubState {
    counters: HashMap<String, Arc<AtomicI64>>,
    buffers: HashMap<String, Arc<EventBuffer>>,
    subscribers: HashMap<u64, SubscriberHandle>,
}

struct HubInner {
    state: RwLock<HubState>,
    next_subscriber_id: AtomicU64,
    /// Subscriptions handed out and not yet dropped; `stop` waits on this.
    live_subscriptions: AtomicUsize,
    stopped: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    heartbeat: StdMutex<Option<JoinHandle<()>>>,
    inventory: Arc<dyn InventorySource>,
    heartbeat_interval: Duration,
    heartbeat_jitter: Duration,
    buffer_capacity: usize,
    buffer_retention: Duration,
}

/// The telemetry hub. Cheap to clone; all clones share one registry.
#[derive(Clone)]
pub struct TelemetryHub {
    inner: Arc<HubInner>,
}

impl TelemetryHub {
    pub fn new(timing: &TimingConfig, inventory: Arc<dyn InventorySource>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(HubInner {
                state: RwLock::new(HubState::default()),
                next_subscriber_id: AtomicU64::new(0),
                live_subscriptions: AtomicUsize::new(0),
                stopped: AtomicBool::new(false),
                shutdown_tx,
                heartbeat: StdMutex::new(None),
                inventory,
                heartbeat_interval: timing.heartbeat_interval,
                heartbeat_jitter: timing.heartbeat_jitter,
                buffer_capacity: timing.event_buffer_size,
                buffer_retention: timing.event_buffer_retention,
            }),
        }
    }

    /// Sequence, buffer, and fan out an event. Returns the assigned id,
    /// or 0 when the hub is stopped (publish is then a no-op).
    pub async fn publish(&self, event: Event) -> i64 {
        self.inner.publish(event).await
    }

    /// Register a subscriber. The returned subscription's outbox
    /// already holds the initial `ready` snapshot and, when a resume id
    /// and radio filter were given, the buffered replay — enqueued
    /// before live registration so replay always precedes live events.
    pub fn subscribe(&self, opts: SubscribeOptions) -> Result<Subscription, HubError> {
        let inner = &self.inner;
        if inner.stopped.load(Ordering::SeqCst) {
            return Err(HubError::Stopped);
        }

        let replay: Vec<Event> = match (&opts.radio, opts.resume_from) {
            (Some(radio), Some(resume)) if resume >= 0 => {
                let buffer = inner
                    .state
                    .read()
                    .unwrap_or_else(|e| e.into_inner())
                    .buffers
                    .get(radio)
                    .cloned();
                buffer.map(|b| b.events_after(resume)).unwrap_or_default()
            }
            (None, Some(resume)) => {
                warn!(resume, "resume id without a radio filter, ignoring");
                Vec::new()
            }
            _ => Vec::new(),
        };

        let mut ready = Event::new(
            EventType::Ready,
            GLOBAL_PARTITION,
            serde_json::to_value(inner.inventory.snapshot()).unwrap_or_else(|e| {
                warn!(error = %e, "failed to serialize inventory snapshot");
                serde_json::json!({})
            }),
        );
        ready.id = inner.next_id(GLOBAL_PARTITION);

        let (tx, rx) = mpsc::channel(replay.len() + OUTBOX_HEADROOM + 1);
        let _ = tx.try_send(ready);
        for event in replay {
            let _ = tx.try_send(event);
        }

        let id = inner.next_subscriber_id.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut state = inner.state.write().unwrap_or_else(|e| e.into_inner());
            if inner.stopped.load(Ordering::SeqCst) {
                return Err(HubError::Stopped);
            }
            state.subscribers.insert(
                id,
                SubscriberHandle {
                    tx,
                    radio: opts.radio,
                },
            );
        }
        inner.live_subscriptions.fetch_add(1, Ordering::SeqCst);
        inner.start_heartbeat();

        debug!(subscriber = id, "telemetry subscriber registered");
        Ok(Subscription {
            id,
            rx,
            hub: Arc::downgrade(inner),
        })
    }

    /// Shut the hub down. Idempotent: closes the shutdown signal,
    /// stops the heartbeat, drops every subscriber outbox, and waits
    /// up to a bounded grace for delivery tasks to finish.
    pub async fn stop(&self) {
        let inner = &self.inner;
        if inner.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = inner.shutdown_tx.send(true);
        inner.abort_heartbeat();

        let handles: Vec<SubscriberHandle> = {
            let mut state = inner.state.write().unwrap_or_else(|e| e.into_inner());
            state.subscribers.drain().map(|(_, h)| h).collect()
        };
        drop(handles);

        let deadline = tokio::time::Instant::now() + SHUTDOWN_GRACE;
        while inner.live_subscriptions.load(Ordering::SeqCst) > 0
            && tokio::time::Instant::now() < deadline
        {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        debug!("telemetry hub stopped");
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner
            .state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .subscribers
            .len()
    }

    #[cfg(test)]
    fn heartbeat_active(&self) -> bool {
        self.inner
            .heartbeat
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }
}

impl HubInner {
    async fn publish(self: &Arc<Self>, mut event: Event) -> i64 {
        if self.stopped.load(Ordering::SeqCst) {
            return 0;
        }

        if event.id == 0 {
            event.id = self.next_id(event.partition());
        }

        if !event.radio_id.is_empty() {
            self.buffer(&event.radio_id).push(event.clone());
        }

        // Snapshot the senders, then deliver outside the hub lock.
        let targets: Vec<(u64, mpsc::Sender<Event>)> = {
            let state = self.state.read().unwrap_or_else(|e| e.into_inner());
            state
                .subscribers
                .iter()
                .filter(|(_, handle)| handle.wants(&event))
                .map(|(id, handle)| (*id, handle.tx.clone()))
                .collect()
        };

        for (subscriber, tx) in targets {
            match tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(TrySendError::Closed(_)) => {}
                Err(TrySendError::Full(ev)) => {
                    // Bounded, timed offer: drop for this subscriber only.
                    match tokio::time::timeout(OFFER_TIMEOUT, tx.send(ev)).await {
                        Ok(Ok(())) => {}
                        Ok(Err(_)) => {}
                        Err(_) => warn!(
                            subscriber,
                            event_id = event.id,
                            "outbox full, dropping event for slow subscriber"
                        ),
                    }
                }
            }
        }

        event.id
    }

    /// Next id for a partition. The counter is created under the write
    /// lock once; afterwards increments are lock-free.
    fn next_id(&self, partition: &str) -> i64 {
        let existing = self
            .state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .counters
            .get(partition)
            .cloned();
        let counter = match existing {
            Some(counter) => counter,
            None => {
                let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
                state
                    .counters
                    .entry(partition.to_string())
                    .or_insert_with(|| Arc::new(AtomicI64::new(0)))
                    .clone()
            }
        };
        counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn buffer(&self, partition: &str) -> Arc<EventBuffer> {
        let existing = self
            .state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .buffers
            .get(partition)
            .cloned();
        match existing {
            Some(buffer) => buffer,
            None => {
                let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
                state
                    .buffers
                    .entry(partition.to_string())
                    .or_insert_with(|| {
                        Arc::new(EventBuffer::new(self.buffer_capacity, self.buffer_retention))
                    })
                    .clone()
            }
        }
    }

    fn deregister(self: &Arc<Self>, id: u64) {
        {
            let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
            state.subscribers.remove(&id);
        }
        self.live_subscriptions.fetch_sub(1, Ordering::SeqCst);
        self.stop_heartbeat_if_idle();
        debug!(subscriber = id, "telemetry subscriber deregistered");
    }

    /// Start the heartbeat driver if it is not running. Checked under
    /// the heartbeat lock so a racing deregister cannot kill a fresh
    /// subscriber's driver.
    fn start_heartbeat(self: &Arc<Self>) {
        let mut guard = self.heartbeat.lock().unwrap_or_else(|e| e.into_inner());
        if guard.is_some() || self.stopped.load(Ordering::SeqCst) {
            return;
        }

        let inner = Arc::clone(self);
        let mut shutdown = self.shutdown_tx.subscribe();
        let interval = self.heartbeat_interval;
        let jitter_max = self.heartbeat_jitter.as_millis() as u64;

        *guard = Some(tokio::spawn(async move {
            loop {
                let jitter = if jitter_max == 0 {
                    0
                } else {
                    rand::rng().random_range(0..=jitter_max)
                };
                let sleep = interval + Duration::from_millis(jitter);
                tokio::select! {
                    _ = tokio::time::sleep(sleep) => {
                        let event = Event::new(
                            EventType::Heartbeat,
                            GLOBAL_PARTITION,
                            serde_json::json!({}),
                        );
                        inner.publish(event).await;
                    }
                    _ = shutdown.changed() => break,
                }
            }
        }));
    }

    fn stop_heartbeat_if_idle(&self) {
        let mut guard = self.heartbeat.lock().unwrap_or_else(|e| e.into_inner());
        let idle = self
            .state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .subscribers
            .is_empty();
        if idle && let Some(handle) = guard.take() {
            handle.abort();
        }
    }

    fn abort_heartbeat(&self) {
        let mut guard = self.heartbeat.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = guard.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcc_core::{InventorySnapshot, Radio};

    struct StaticInventory(Vec<Radio>);

    impl InventorySource for StaticInventory {
        fn snapshot(&self) -> InventorySnapshot {
            InventorySnapshot {
                radios: self.0.clone(),
                active_radio_id: None,
            }
        }
    }

    fn hub_with(timing: &TimingConfig) -> TelemetryHub {
        TelemetryHub::new(timing, Arc::new(StaticInventory(Vec::new())))
    }

    fn hub() -> TelemetryHub {
        hub_with(&TimingConfig::default())
    }

    fn state_event(radio: &str, n: i64) -> Event {
        Event::new(EventType::State, radio, serde_json::json!({ "n": n }))
    }

    #[tokio::test]
    async fn ids_are_contiguous_per_partition_starting_at_one() {
        let hub = hub();
        for n in 0..3 {
            assert_eq!(hub.publish(state_event("r1", n)).await, n + 1);
        }
        // Another partition has its own sequence.
        assert_eq!(hub.publish(state_event("r2", 0)).await, 1);
        assert_eq!(hub.publish(state_event("r1", 3)).await, 4);
    }

    #[tokio::test]
    async fn eviction_keeps_most_recent_events() {
        let mut timing = TimingConfig::default();
        timing.event_buffer_size = 3;
        let hub = hub_with(&timing);
        for n in 0..5 {
            hub.publish(state_event("r1", n)).await;
        }

        // Resume from 2: only the retained 3, 4, 5 come back.
        let mut sub = hub
            .subscribe(SubscribeOptions {
                resume_from: Some(2),
                radio: Some("r1".into()),
            })
            .unwrap();
        assert_eq!(sub.recv().await.unwrap().event_type, EventType::Ready);
        let ids: Vec<i64> = [
            sub.recv().await.unwrap().id,
            sub.recv().await.unwrap().id,
            sub.recv().await.unwrap().id,
        ]
        .into();
        assert_eq!(ids, vec![3, 4, 5]);

        // Resume from 0 yields the same retained window.
        let mut sub = hub
            .subscribe(SubscribeOptions {
                resume_from: Some(0),
                radio: Some("r1".into()),
            })
            .unwrap();
        sub.recv().await.unwrap(); // ready
        assert_eq!(sub.recv().await.unwrap().id, 3);
    }

    #[tokio::test]
    async fn replay_precedes_live_delivery() {
        let hub = hub();
        for n in 0..10 {
            hub.publish(state_event("r1", n)).await;
        }

        let mut sub = hub
            .subscribe(SubscribeOptions {
                resume_from: Some(5),
                radio: Some("r1".into()),
            })
            .unwrap();
        let live_id = hub.publish(state_event("r1", 10)).await;
        assert_eq!(live_id, 11);

        assert_eq!(sub.recv().await.unwrap().event_type, EventType::Ready);
        for expected in 6..=11 {
            assert_eq!(sub.recv().await.unwrap().id, expected);
        }
    }

    #[tokio::test]
    async fn ready_event_carries_inventory() {
        let hub = hub();
        let mut sub = hub.subscribe(SubscribeOptions::default()).unwrap();
        let ready = sub.recv().await.unwrap();
        assert_eq!(ready.event_type, EventType::Ready);
        assert!(ready.id > 0);
        assert!(ready.data.get("radios").is_some());
    }

    #[tokio::test]
    async fn partition_filter_keeps_global_events() {
        let hub = hub();
        let mut sub = hub
            .subscribe(SubscribeOptions {
                resume_from: None,
                radio: Some("r1".into()),
            })
            .unwrap();
        sub.recv().await.unwrap(); // ready

        hub.publish(state_event("r2", 0)).await;
        hub.publish(state_event("r1", 0)).await;
        hub.publish(Event::new(
            EventType::Heartbeat,
            GLOBAL_PARTITION,
            serde_json::json!({}),
        ))
        .await;

        let first = sub.recv().await.unwrap();
        assert_eq!(first.radio_id, "r1");
        let second = sub.recv().await.unwrap();
        assert_eq!(second.event_type, EventType::Heartbeat);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_subscriber_drops_alone() {
        let hub = hub();
        let mut slow = hub.subscribe(SubscribeOptions::default()).unwrap();
        let mut fast = hub.subscribe(SubscribeOptions::default()).unwrap();

        // Fill both outboxes (capacity = 1 ready + 64 headroom).
        for n in 0..70 {
            hub.publish(state_event("r1", n)).await;
        }

        // Drain fast completely, then publish once more: fast gets it,
        // slow (still full) drops it after the offer grace.
        while fast.try_recv().is_some() {}
        let id = hub.publish(state_event("r1", 70)).await;

        assert_eq!(fast.recv().await.unwrap().id, id);

        let mut seen_in_slow = Vec::new();
        while let Some(ev) = slow.try_recv() {
            seen_in_slow.push(ev.id);
        }
        assert!(!seen_in_slow.contains(&id));
        assert_eq!(seen_in_slow.len(), 65); // ready + the 64 events that fit

        // Space opened up; a later publish reaches the slow consumer.
        let next = hub.publish(state_event("r1", 71)).await;
        assert_eq!(slow.recv().await.unwrap().id, next);
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_follows_subscriber_count() {
        let mut timing = TimingConfig::default();
        timing.heartbeat_interval = Duration::from_millis(100);
        timing.heartbeat_jitter = Duration::ZERO;
        timing.heartbeat_timeout = Duration::from_millis(100);
        let hub = hub_with(&timing);

        assert!(!hub.heartbeat_active());
        let mut sub = hub.subscribe(SubscribeOptions::default()).unwrap();
        assert!(hub.heartbeat_active());

        sub.recv().await.unwrap(); // ready
        let beat = sub.recv().await.unwrap();
        assert_eq!(beat.event_type, EventType::Heartbeat);
        assert!(beat.radio_id.is_empty());

        drop(sub);
        assert!(!hub.heartbeat_active());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent_and_silences_publish() {
        let hub = hub();
        let mut sub = hub.subscribe(SubscribeOptions::default()).unwrap();
        hub.publish(state_event("r1", 0)).await;

        let stopper = hub.clone();
        let handle = tokio::spawn(async move {
            stopper.stop().await;
            stopper.stop().await; // second call returns immediately
        });

        // Outbox drains, then closes.
        assert_eq!(sub.recv().await.unwrap().event_type, EventType::Ready);
        assert_eq!(sub.recv().await.unwrap().id, 1);
        assert!(sub.recv().await.is_none());
        drop(sub);
        handle.await.unwrap();

        assert_eq!(hub.publish(state_event("r1", 1)).await, 0);
        assert!(hub.subscribe(SubscribeOptions::default()).is_err());
        assert_eq!(hub.subscriber_count(), 0);
    }
}
