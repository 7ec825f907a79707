//! The live-share controller.
//!
//! [`LiveShareController`] owns the process-wide position watch and every
//! write a sender makes to a recipient's shared-location document. It is an
//! explicit value rather than global state, so tests and embedders can run
//! several independent controllers side by side.
//!
//! # Watch lifecycle
//!
//! ```text
//!            start_live_location_updates
//!   Idle ─────────────────────────────────▶ Watching { key, expires_at }
//!    ▲                                          │
//!    │   task exited and unsubscribed           │ stop / replace / expiry /
//!    └──────────────────── Terminating ◀────────┘ cancellation / failures
//! ```
//!
//! Start and stop calls are serialized: a new watch is only subscribed after
//! the previous one has been cancelled and its task has unsubscribed, so at
//! most one subscription to the position source exists at any time.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use safetrail_types::{Coordinates, ShareKey, ShareKind, SharedLocationRecord, Timestamp, UserKey};

use crate::error::{Error, PositionSourceFailure, Result};
use crate::events::{EventDispatcher, EventReceiver, ShareEvent};
use crate::notify::{NoopNotifier, Notification, notification_sender_name};
use crate::traits::{
    Clock, DocumentStore, NotificationDispatcher, PositionSource, SetOptions, SubscriptionId,
    SystemClock,
};
use crate::watch::{WatchOptions, WatchTask};

/// Default lifetime of a one-time share.
pub const DEFAULT_ONE_TIME_TTL: Duration = Duration::from_secs(5 * 60);

/// Configuration for the controller.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerConfig {
    /// Options passed to the position source for live watches.
    pub watch: WatchOptions,
    /// How long a one-time share stays visible.
    pub one_time_ttl: Duration,
    /// Upper bound for live share durations, if any.
    pub max_live_duration: Option<Duration>,
    /// Event channel capacity.
    pub event_capacity: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            watch: WatchOptions::default(),
            one_time_ttl: DEFAULT_ONE_TIME_TTL,
            max_live_duration: None,
            event_capacity: 100,
        }
    }
}

impl ControllerConfig {
    /// Validate the configuration and return an error if invalid.
    pub fn validate(&self) -> Result<()> {
        self.watch.validate()?;
        if self.one_time_ttl.is_zero() {
            return Err(Error::invalid_config("one_time_ttl must be > 0"));
        }
        if self.max_live_duration.is_some_and(|max| max.is_zero()) {
            return Err(Error::invalid_config("max_live_duration must be > 0"));
        }
        if self.event_capacity == 0 {
            return Err(Error::invalid_config("event_capacity must be > 0"));
        }
        Ok(())
    }
}

/// Observable state of the controller's watch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum WatchState {
    /// No watch is running.
    Idle,
    /// A watch is subscribed and refreshing `key`.
    Watching {
        key: ShareKey,
        expires_at: Timestamp,
        subscription: SubscriptionId,
    },
    /// The watch has been told to stop and is unsubscribing.
    Terminating { key: ShareKey },
}

impl WatchState {
    /// Whether a watch is running or shutting down.
    pub fn is_active(&self) -> bool {
        !matches!(self, Self::Idle)
    }
}

/// What a share operation wrote.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShareReceipt {
    pub key: ShareKey,
    pub record: SharedLocationRecord,
    /// Whether the recipient notification was dispatched. Failures here
    /// never fail the share.
    pub notified: bool,
}

struct ActiveWatch {
    key: ShareKey,
    expires_at: Timestamp,
    subscription: SubscriptionId,
    cancel: CancellationToken,
    /// Taken by `teardown` while it waits for the task.
    handle: Option<JoinHandle<Result<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Shares a sender's location with recipients and keeps live shares fresh.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use std::time::Duration;
/// use safetrail_core::{LiveShareController, MemoryDocumentStore, MockPositionSource, WatchState};
/// use safetrail_types::{Coordinates, UserKey};
///
/// #[tokio::main]
/// async fn main() -> safetrail_core::Result<()> {
///     let store = Arc::new(MemoryDocumentStore::new());
///     let positions = Arc::new(MockPositionSource::new());
///     let controller = LiveShareController::new(store, positions);
///
///     let sender = UserKey::new("alice")?;
///     let recipient = UserKey::new("bob")?;
///     let here = Coordinates::new(37.7749, -122.4194)?;
///
///     controller
///         .share_live_location(&sender, &recipient, here, Duration::from_secs(3600))
///         .await?;
///     assert!(matches!(controller.state(), WatchState::Watching { .. }));
///
///     controller.stop_sharing_location(&sender, &recipient).await?;
///     assert_eq!(controller.state(), WatchState::Idle);
///     Ok(())
/// }
/// ```
pub struct LiveShareController {
    store: Arc<dyn DocumentStore>,
    positions: Arc<dyn PositionSource>,
    notifier: Arc<dyn NotificationDispatcher>,
    clock: Arc<dyn Clock>,
    config: ControllerConfig,
    events: EventDispatcher,
    /// Serializes watch start/stop so teardown always completes before a new subscribe.
    lifecycle: tokio::sync::Mutex<()>,
    active: Mutex<Option<ActiveWatch>>,
}

impl std::fmt::Debug for LiveShareController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveShareController")
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}

impl LiveShareController {
    /// Create a controller with the default configuration, no notifications
    /// and the system clock.
    pub fn new(store: Arc<dyn DocumentStore>, positions: Arc<dyn PositionSource>) -> Self {
        Self::from_parts(
            store,
            positions,
            Arc::new(NoopNotifier),
            Arc::new(SystemClock),
            ControllerConfig::default(),
        )
    }

    /// Start building a controller.
    pub fn builder(
        store: Arc<dyn DocumentStore>,
        positions: Arc<dyn PositionSource>,
    ) -> LiveShareControllerBuilder {
        LiveShareControllerBuilder {
            store,
            positions,
            notifier: None,
            clock: None,
            config: ControllerConfig::default(),
        }
    }

    fn from_parts(
        store: Arc<dyn DocumentStore>,
        positions: Arc<dyn PositionSource>,
        notifier: Arc<dyn NotificationDispatcher>,
        clock: Arc<dyn Clock>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            store,
            positions,
            notifier,
            clock,
            events: EventDispatcher::new(config.event_capacity),
            config,
            lifecycle: tokio::sync::Mutex::new(()),
            active: Mutex::new(None),
        }
    }

    /// Get the controller configuration.
    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Get the event dispatcher.
    pub fn events(&self) -> &EventDispatcher {
        &self.events
    }

    /// Subscribe to share events.
    pub fn subscribe_events(&self) -> EventReceiver {
        self.events.subscribe()
    }

    /// The document store this controller writes to.
    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// The clock this controller reads.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Current watch state.
    pub fn state(&self) -> WatchState {
        let active = lock(&self.active);
        match active.as_ref() {
            None => WatchState::Idle,
            Some(watch) if watch.handle.as_ref().is_some_and(|h| h.is_finished()) => {
                WatchState::Idle
            }
            Some(watch) if watch.cancel.is_cancelled() => WatchState::Terminating {
                key: watch.key.clone(),
            },
            Some(watch) => WatchState::Watching {
                key: watch.key.clone(),
                expires_at: watch.expires_at,
                subscription: watch.subscription,
            },
        }
    }

    /// Write a live share record for `sender -> recipient` and notify the recipient.
    ///
    /// Replaces any existing record for the pair. The record expires
    /// `duration` from now; the watch is not started (see
    /// [`start_live_location_updates`](Self::start_live_location_updates) or
    /// [`share_live_location`](Self::share_live_location)).
    pub async fn start_live_location_share(
        &self,
        sender: &UserKey,
        recipient: &UserKey,
        coords: Coordinates,
        duration: Duration,
    ) -> Result<ShareReceipt> {
        self.check_live_duration(duration)?;
        coords.validate()?;

        let key = ShareKey::new(sender.clone(), recipient.clone());
        let record = SharedLocationRecord::live(coords, self.clock.now(), duration);
        self.store
            .set(&key.path(), record.to_fields()?, SetOptions::overwrite())
            .await?;
        info!("Live share {} started, expires at {}", key, record.expires_at);

        self.events.send(ShareEvent::Shared {
            key: key.clone(),
            kind: ShareKind::Live,
            expires_at: record.expires_at,
        });
        let notified = self.notify_share(&key, ShareKind::Live, Some(duration)).await;

        Ok(ShareReceipt {
            key,
            record,
            notified,
        })
    }

    /// Start refreshing the live record for `key` from position samples.
    ///
    /// Any running watch is stopped first, and its task has unsubscribed by
    /// the time the new subscription is made. Returns
    /// [`Error::AlreadyExpired`] if `expires_at` has passed. If the position
    /// source refuses the subscription the error is returned and the
    /// controller is left idle.
    pub async fn start_live_location_updates(
        &self,
        key: ShareKey,
        expires_at: Timestamp,
    ) -> Result<SubscriptionId> {
        let _lifecycle = self.lifecycle.lock().await;
        if let Err(e) = self.teardown().await {
            debug!("Previous watch ended with error: {}", e);
        }

        if self.clock.now() >= expires_at {
            return Err(Error::AlreadyExpired { key, expires_at });
        }

        let (tx, rx) = mpsc::channel(self.config.watch.channel_capacity);
        let subscription = match self.positions.subscribe(self.config.watch.clone(), tx).await {
            Ok(id) => id,
            Err(e) => {
                warn!("Failed to subscribe to position updates for {}: {}", key, e);
                return Err(e);
            }
        };

        self.events.send(ShareEvent::WatchStarted {
            key: key.clone(),
            subscription,
            expires_at,
        });
        info!("Watching {} ({}) until {}", key, subscription, expires_at);

        let cancel = CancellationToken::new();
        let task = WatchTask {
            key: key.clone(),
            expires_at,
            subscription,
            options: self.config.watch.clone(),
            store: Arc::clone(&self.store),
            positions: Arc::clone(&self.positions),
            clock: Arc::clone(&self.clock),
            events: self.events.clone(),
            cancel: cancel.clone(),
            samples: rx,
        };
        let handle = tokio::spawn(task.run());

        *lock(&self.active) = Some(ActiveWatch {
            key,
            expires_at,
            subscription,
            cancel,
            handle: Some(handle),
        });
        Ok(subscription)
    }

    /// Stop the running watch, if any, and wait until it has unsubscribed.
    ///
    /// Does not touch the shared record. Calling this with no watch running
    /// succeeds. Returns the unsubscribe error if the position source
    /// reported one.
    pub async fn stop_live_location_updates(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        self.teardown().await
    }

    /// Stop sharing with `recipient` and delete the record.
    ///
    /// If the running watch belongs to this share it is stopped first, so a
    /// refresh in flight cannot write the record back after the delete.
    pub async fn stop_sharing_location(&self, sender: &UserKey, recipient: &UserKey) -> Result<()> {
        let key = ShareKey::new(sender.clone(), recipient.clone());
        let _lifecycle = self.lifecycle.lock().await;

        let watching = lock(&self.active)
            .as_ref()
            .is_some_and(|watch| watch.key == key);
        if watching && let Err(e) = self.teardown().await {
            warn!("Watch for {} stopped with error: {}", key, e);
        }

        self.store.delete(&key.path()).await?;
        info!("Stopped sharing {}", key);
        self.events.send(ShareEvent::SharingStopped { key });
        Ok(())
    }

    /// Write a live share and start watching it.
    ///
    /// If the watch cannot be started the freshly written record is removed
    /// again and the error is returned.
    pub async fn share_live_location(
        &self,
        sender: &UserKey,
        recipient: &UserKey,
        coords: Coordinates,
        duration: Duration,
    ) -> Result<ShareReceipt> {
        let receipt = self
            .start_live_location_share(sender, recipient, coords, duration)
            .await?;

        if let Err(e) = self
            .start_live_location_updates(receipt.key.clone(), receipt.record.expires_at)
            .await
        {
            if let Err(cleanup) = self.store.delete(&receipt.key.path()).await {
                warn!("Failed to remove unwatched share {}: {}", receipt.key, cleanup);
            }
            return Err(e);
        }
        Ok(receipt)
    }

    /// Share the current position once.
    ///
    /// The record expires after the configured one-time TTL and is never
    /// refreshed. Replaces any existing record for the pair, which also
    /// cancels a live watch for it on the watch's next sample.
    pub async fn send_one_time_location(
        &self,
        sender: &UserKey,
        recipient: &UserKey,
        coords: Coordinates,
    ) -> Result<ShareReceipt> {
        coords.validate()?;

        let key = ShareKey::new(sender.clone(), recipient.clone());
        let now = self.clock.now();
        let created_at = self.store.server_timestamp().unwrap_or(now);
        let record = SharedLocationRecord::one_time(
            coords,
            created_at,
            now.saturating_add(self.config.one_time_ttl),
        );
        self.store
            .set(&key.path(), record.to_fields()?, SetOptions::overwrite())
            .await?;
        info!("One-time location shared {}", key);

        self.events.send(ShareEvent::Shared {
            key: key.clone(),
            kind: ShareKind::OneTime,
            expires_at: record.expires_at,
        });
        let notified = self.notify_share(&key, ShareKind::OneTime, None).await;

        Ok(ShareReceipt {
            key,
            record,
            notified,
        })
    }

    fn check_live_duration(&self, duration: Duration) -> Result<()> {
        if duration.is_zero() {
            return Err(Error::InvalidDuration(duration));
        }
        if let Some(max) = self.config.max_live_duration
            && duration > max
        {
            return Err(Error::DurationTooLong {
                requested: duration,
                max,
            });
        }
        Ok(())
    }

    async fn notify_share(&self, key: &ShareKey, kind: ShareKind, duration: Option<Duration>) -> bool {
        let name = notification_sender_name(self.store.as_ref(), &key.sender).await;
        let notification = Notification::location_shared(&name, kind, duration);
        match self.notifier.notify(&key.recipient, notification).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to notify {} about share from {}: {}", key.recipient, key.sender, e);
                false
            }
        }
    }

    /// Cancel the active watch and wait for its task. Caller holds `lifecycle`.
    async fn teardown(&self) -> Result<()> {
        // The entry stays in place until the task is gone, so `state()`
        // reports `Terminating` while the unsubscribe is in flight.
        let (key, subscription, handle, already_finished) = {
            let mut active = lock(&self.active);
            let Some(watch) = active.as_mut() else {
                return Ok(());
            };
            let handle = watch.handle.take();
            let already_finished = handle.as_ref().is_some_and(|h| h.is_finished());
            watch.cancel.cancel();
            (watch.key.clone(), watch.subscription, handle, already_finished)
        };

        let result = match handle {
            None => Ok(()),
            // A task that already exited on its own has reported its own errors.
            Some(handle) if already_finished => {
                if let Err(e) = handle.await {
                    warn!("Watch task for {} ended abnormally: {}", key, e);
                }
                Ok(())
            }
            Some(handle) => match handle.await {
                Ok(result) => result,
                Err(e) => {
                    warn!("Watch task for {} ended abnormally: {}", key, e);
                    match self.positions.unsubscribe(subscription).await {
                        Err(Error::PositionSource(
                            PositionSourceFailure::UnknownSubscription(_),
                        )) => Ok(()),
                        other => other,
                    }
                }
            },
        };

        *lock(&self.active) = None;
        result
    }
}

impl Drop for LiveShareController {
    fn drop(&mut self) {
        // The task unsubscribes on its own once cancelled.
        let active = self
            .active
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(watch) = active.as_ref() {
            watch.cancel.cancel();
        }
    }
}

/// Builder for [`LiveShareController`].
pub struct LiveShareControllerBuilder {
    store: Arc<dyn DocumentStore>,
    positions: Arc<dyn PositionSource>,
    notifier: Option<Arc<dyn NotificationDispatcher>>,
    clock: Option<Arc<dyn Clock>>,
    config: ControllerConfig,
}

impl LiveShareControllerBuilder {
    /// Set the notification dispatcher. Default: notifications are dropped.
    #[must_use]
    pub fn notifier(mut self, notifier: Arc<dyn NotificationDispatcher>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Set the clock. Default: the system clock.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Set the configuration.
    #[must_use]
    pub fn config(mut self, config: ControllerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the watch options.
    #[must_use]
    pub fn watch_options(mut self, options: WatchOptions) -> Self {
        self.config.watch = options;
        self
    }

    /// Validate the configuration and build the controller.
    pub fn build(self) -> Result<LiveShareController> {
        self.config.validate()?;
        Ok(LiveShareController::from_parts(
            self.store,
            self.positions,
            self.notifier.unwrap_or_else(|| Arc::new(NoopNotifier)),
            self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            self.config,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{ManualClock, MemoryDocumentStore, MockPositionSource, RecordingNotifier};
    use serde_json::json;
    use safetrail_types::DocumentPath;

    struct Harness {
        store: Arc<MemoryDocumentStore>,
        positions: Arc<MockPositionSource>,
        notifier: Arc<RecordingNotifier>,
        clock: Arc<ManualClock>,
        controller: LiveShareController,
    }

    fn harness(config: ControllerConfig) -> Harness {
        let clock = Arc::new(ManualClock::new(Timestamp::from_millis(1_000_000)));
        let store = Arc::new(MemoryDocumentStore::new());
        let positions = Arc::new(MockPositionSource::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let controller = LiveShareController::builder(store.clone(), positions.clone())
            .notifier(notifier.clone())
            .clock(clock.clone())
            .config(config)
            .build()
            .unwrap();
        Harness {
            store,
            positions,
            notifier,
            clock,
            controller,
        }
    }

    fn user(key: &str) -> UserKey {
        UserKey::new(key).unwrap()
    }

    fn here() -> Coordinates {
        Coordinates::new(1.0, 2.0).unwrap()
    }

    #[test]
    fn test_config_validate() {
        assert!(ControllerConfig::default().validate().is_ok());

        let config = ControllerConfig {
            one_time_ttl: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ControllerConfig {
            max_live_duration: Some(Duration::ZERO),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ControllerConfig {
            watch: WatchOptions::builder().channel_capacity(0).build(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_builder_rejects_invalid_config() {
        let result = LiveShareController::builder(
            Arc::new(MemoryDocumentStore::new()),
            Arc::new(MockPositionSource::new()),
        )
        .config(ControllerConfig {
            event_capacity: 0,
            ..Default::default()
        })
        .build();
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_start_live_share_writes_record_and_notifies() {
        let h = harness(ControllerConfig::default());
        h.store
            .put(&DocumentPath::user(&user("s1")), json!({"name": "Sam"}))
            .await;

        let receipt = h
            .controller
            .start_live_location_share(&user("s1"), &user("r1"), here(), Duration::from_secs(2 * 3600))
            .await
            .unwrap();

        assert!(receipt.notified);
        assert_eq!(receipt.record.started_at, Timestamp::from_millis(1_000_000));
        assert_eq!(receipt.record.expires_at, Timestamp::from_millis(8_200_000));
        assert_eq!(h.store.record(&receipt.key).await, Some(receipt.record.clone()));
        assert_eq!(h.controller.state(), WatchState::Idle);

        let sent = h.notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, user("r1"));
        assert_eq!(sent[0].1.body, "Sam shared their live location with you for 2 hours");
    }

    #[tokio::test]
    async fn test_start_live_share_rejects_bad_input() {
        let h = harness(ControllerConfig {
            max_live_duration: Some(Duration::from_secs(8 * 3600)),
            ..Default::default()
        });

        let err = h
            .controller
            .start_live_location_share(&user("s1"), &user("r1"), here(), Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidDuration(_)));

        let err = h
            .controller
            .start_live_location_share(&user("s1"), &user("r1"), here(), Duration::from_secs(9 * 3600))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DurationTooLong { .. }));

        let bad = Coordinates {
            latitude: 0.0,
            longitude: 200.0,
        };
        let err = h
            .controller
            .start_live_location_share(&user("s1"), &user("r1"), bad, Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidData(_)));
        assert_eq!(h.store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_start_live_share_write_failure_is_returned() {
        let h = harness(ControllerConfig::default());
        h.store.set_fail_writes(true);

        let err = h
            .controller
            .start_live_location_share(&user("s1"), &user("r1"), here(), Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(err.is_store());
        assert!(h.notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn test_notification_failure_does_not_fail_share() {
        let h = harness(ControllerConfig::default());
        h.notifier.set_should_fail(true);

        let receipt = h
            .controller
            .send_one_time_location(&user("s1"), &user("r1"), here())
            .await
            .unwrap();
        assert!(!receipt.notified);
        assert!(h.store.record(&receipt.key).await.is_some());
    }

    #[tokio::test]
    async fn test_one_time_share_uses_server_time_and_ttl() {
        let clock = Arc::new(ManualClock::new(Timestamp::from_millis(1_000_000)));
        let server = Arc::new(ManualClock::new(Timestamp::from_millis(999_000)));
        let store = Arc::new(MemoryDocumentStore::new().with_server_clock(server));
        let controller = LiveShareController::builder(store.clone(), Arc::new(MockPositionSource::new()))
            .clock(clock)
            .build()
            .unwrap();

        let receipt = controller
            .send_one_time_location(&user("s1"), &user("r1"), here())
            .await
            .unwrap();
        assert_eq!(receipt.record.kind, ShareKind::OneTime);
        assert_eq!(receipt.record.started_at, Timestamp::from_millis(999_000));
        assert_eq!(receipt.record.expires_at, Timestamp::from_millis(1_300_000));
        assert_eq!(controller.state(), WatchState::Idle);
    }

    #[tokio::test]
    async fn test_one_time_share_notification_uses_fallback_name() {
        let h = harness(ControllerConfig::default());
        h.controller
            .send_one_time_location(&user("s1"), &user("r1"), here())
            .await
            .unwrap();
        let sent = h.notifier.sent();
        assert_eq!(sent[0].1.title, "Location Shared");
        assert_eq!(sent[0].1.body, "Someone shared their current location with you");
    }

    #[tokio::test]
    async fn test_start_updates_past_deadline_is_rejected() {
        let h = harness(ControllerConfig::default());
        let key = ShareKey::new(user("s1"), user("r1"));

        let err = h
            .controller
            .start_live_location_updates(key, Timestamp::from_millis(1_000_000))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyExpired { .. }));
        assert_eq!(h.positions.subscribe_count(), 0);
        assert_eq!(h.controller.state(), WatchState::Idle);
    }

    #[tokio::test]
    async fn test_subscribe_failure_leaves_controller_idle() {
        let h = harness(ControllerConfig::default());
        h.positions.set_deny_permission(true);

        let err = h
            .controller
            .share_live_location(&user("s1"), &user("r1"), here(), Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PositionSource(_)));
        assert_eq!(h.controller.state(), WatchState::Idle);
        assert!(h.store.is_empty().await);
        assert_eq!(h.positions.active_subscriptions(), 0);
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let h = harness(ControllerConfig::default());
        let receipt = h
            .controller
            .share_live_location(&user("s1"), &user("r1"), here(), Duration::from_secs(3600))
            .await
            .unwrap();

        match h.controller.state() {
            WatchState::Watching { key, expires_at, .. } => {
                assert_eq!(key, receipt.key);
                assert_eq!(expires_at, Timestamp::from_millis(4_600_000));
            }
            other => panic!("unexpected state {:?}", other),
        }
        assert!(h.controller.state().is_active());

        h.controller.stop_live_location_updates().await.unwrap();
        assert_eq!(h.controller.state(), WatchState::Idle);
        assert_eq!(h.positions.active_subscriptions(), 0);
        // Stopping updates keeps the record.
        assert!(h.store.record(&receipt.key).await.is_some());

        h.controller.stop_live_location_updates().await.unwrap();
        assert_eq!(h.positions.unsubscribe_count(), 1);
    }

    #[tokio::test]
    async fn test_stop_sharing_other_key_keeps_watch() {
        let h = harness(ControllerConfig::default());
        h.controller
            .share_live_location(&user("s1"), &user("r1"), here(), Duration::from_secs(3600))
            .await
            .unwrap();
        h.controller
            .send_one_time_location(&user("s1"), &user("r2"), here())
            .await
            .unwrap();

        h.controller
            .stop_sharing_location(&user("s1"), &user("r2"))
            .await
            .unwrap();
        assert!(matches!(h.controller.state(), WatchState::Watching { .. }));
        assert_eq!(h.store.len().await, 1);
    }

    #[tokio::test]
    async fn test_stop_sharing_propagates_delete_failure() {
        let h = harness(ControllerConfig::default());
        h.store.set_fail_deletes(true);
        let err = h
            .controller
            .stop_sharing_location(&user("s1"), &user("r1"))
            .await
            .unwrap_err();
        assert!(err.is_store());
    }

    #[tokio::test]
    async fn test_stop_reports_unsubscribe_failure() {
        let h = harness(ControllerConfig::default());
        h.controller
            .share_live_location(&user("s1"), &user("r1"), here(), Duration::from_secs(3600))
            .await
            .unwrap();
        h.positions.set_fail_unsubscribe(true);

        let err = h.controller.stop_live_location_updates().await.unwrap_err();
        assert!(matches!(err, Error::PositionSource(_)));
        assert_eq!(h.controller.state(), WatchState::Idle);
    }

    /// Forgets each subscription as soon as it is made, like a relay that
    /// prunes a subscriber before the watch unsubscribes.
    #[derive(Default)]
    struct ForgetfulSource {
        sinks: Mutex<Vec<crate::traits::PositionSink>>,
    }

    #[async_trait::async_trait]
    impl PositionSource for ForgetfulSource {
        async fn subscribe(
            &self,
            _options: WatchOptions,
            sink: crate::traits::PositionSink,
        ) -> Result<SubscriptionId> {
            let mut sinks = lock(&self.sinks);
            sinks.push(sink);
            Ok(SubscriptionId::new(sinks.len() as u64))
        }

        async fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
            Err(Error::PositionSource(PositionSourceFailure::UnknownSubscription(id)))
        }
    }

    #[tokio::test]
    async fn test_stop_tolerates_subscription_already_gone() {
        let controller = LiveShareController::builder(
            Arc::new(MemoryDocumentStore::new()),
            Arc::new(ForgetfulSource::default()),
        )
        .build()
        .unwrap();

        controller
            .share_live_location(&user("s1"), &user("r1"), here(), Duration::from_secs(3600))
            .await
            .unwrap();
        assert!(controller.state().is_active());

        controller.stop_live_location_updates().await.unwrap();
        assert_eq!(controller.state(), WatchState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_is_terminating_until_unsubscribed() {
        let h = harness(ControllerConfig::default());
        let receipt = h
            .controller
            .share_live_location(&user("s1"), &user("r1"), here(), Duration::from_secs(3600))
            .await
            .unwrap();
        h.positions.set_unsubscribe_latency(Duration::from_millis(500));

        let observe = async {
            tokio::time::sleep(Duration::from_millis(150)).await;
            (h.controller.state(), h.positions.active_subscriptions())
        };
        let (stopped, (mid_state, mid_subscriptions)) =
            tokio::join!(h.controller.stop_live_location_updates(), observe);

        stopped.unwrap();
        assert_eq!(mid_state, WatchState::Terminating { key: receipt.key });
        assert!(mid_state.is_active());
        assert_eq!(mid_subscriptions, 1);
        assert_eq!(h.controller.state(), WatchState::Idle);
        assert_eq!(h.positions.active_subscriptions(), 0);
    }

    #[tokio::test]
    async fn test_drop_cancels_watch() {
        let h = harness(ControllerConfig::default());
        let mut events = h.controller.subscribe_events();
        h.controller
            .share_live_location(&user("s1"), &user("r1"), here(), Duration::from_secs(3600))
            .await
            .unwrap();
        let positions = h.positions.clone();
        drop(h.controller);

        let stopped = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match events.recv().await {
                    Ok(ShareEvent::WatchStopped { .. }) => return true,
                    Ok(_) => {}
                    Err(_) => return false,
                }
            }
        })
        .await;
        assert_eq!(stopped, Ok(true));
        assert_eq!(positions.active_subscriptions(), 0);
        // Clock unchanged by teardown.
        assert_eq!(h.clock.now(), Timestamp::from_millis(1_000_000));
    }
}
