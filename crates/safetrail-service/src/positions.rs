//! Position source fed by clients over HTTP.
//!
//! Devices post their fixes to `POST /api/positions`; each fix is relayed to
//! every subscription whose sampling hints it satisfies. A subscriber gets
//! its first sample unconditionally. After that a sample is delivered only
//! when both `min_interval` has elapsed and the device moved at least
//! `min_distance_meters` since the last delivered sample.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use safetrail_core::{
    Error, PositionSample, PositionSink, PositionSource, PositionSourceFailure, Result,
    SubscriptionId, WatchOptions,
};

struct Subscriber {
    options: WatchOptions,
    sink: PositionSink,
    last_delivered: Option<PositionSample>,
}

impl Subscriber {
    fn wants(&self, sample: &PositionSample) -> bool {
        let Some(last) = &self.last_delivered else {
            return true;
        };
        let elapsed = sample.captured_at.saturating_duration_since(last.captured_at);
        let moved = last.coords.distance_to(&sample.coords);
        elapsed >= self.options.min_interval && moved >= self.options.min_distance_meters
    }
}

/// Outcome of relaying one pushed sample.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct PushSummary {
    /// Subscriptions that received the sample.
    pub delivered: usize,
    /// Subscriptions that skipped it because of their sampling hints.
    pub filtered: usize,
    /// Subscriptions whose channel was full; the sample was dropped for them.
    pub dropped: usize,
}

/// A [`PositionSource`] whose samples are pushed in by the service.
#[derive(Default)]
pub struct PushedPositionSource {
    subscribers: Mutex<HashMap<SubscriptionId, Subscriber>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for PushedPositionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushedPositionSource")
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl PushedPositionSource {
    /// Create a source with no subscriptions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Relay a sample to every interested subscription.
    ///
    /// Never blocks on a slow consumer: a full channel drops the sample for
    /// that subscriber. Subscribers whose channel has closed are removed.
    pub async fn push(&self, sample: PositionSample) -> PushSummary {
        let mut summary = PushSummary::default();
        let mut subscribers = self.subscribers.lock().await;

        subscribers.retain(|id, subscriber| {
            if !subscriber.wants(&sample) {
                summary.filtered += 1;
                return true;
            }
            match subscriber.sink.try_send(sample) {
                Ok(()) => {
                    subscriber.last_delivered = Some(sample);
                    summary.delivered += 1;
                    true
                }
                Err(TrySendError::Full(_)) => {
                    warn!("Position channel for {} is full, dropping sample", id);
                    summary.dropped += 1;
                    true
                }
                Err(TrySendError::Closed(_)) => {
                    debug!("Position channel for {} closed, removing subscription", id);
                    false
                }
            }
        });

        summary
    }

    /// Number of registered subscriptions.
    pub async fn subscription_count(&self) -> usize {
        self.subscribers.lock().await.len()
    }
}

#[async_trait]
impl PositionSource for PushedPositionSource {
    async fn subscribe(&self, options: WatchOptions, sink: PositionSink) -> Result<SubscriptionId> {
        if sink.is_closed() {
            return Err(Error::PositionSource(PositionSourceFailure::Unavailable(
                "sink is already closed".to_string(),
            )));
        }
        let id = SubscriptionId::new(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.subscribers.lock().await.insert(
            id,
            Subscriber {
                options,
                sink,
                last_delivered: None,
            },
        );
        debug!("Registered position subscription {}", id);
        Ok(id)
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        match self.subscribers.lock().await.remove(&id) {
            Some(_) => {
                debug!("Removed position subscription {}", id);
                Ok(())
            }
            None => Err(Error::PositionSource(
                PositionSourceFailure::UnknownSubscription(id),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;

    use super::*;
    use safetrail_core::{LiveShareController, MemoryDocumentStore, UserKey, WatchState};
    use safetrail_types::{Coordinates, Timestamp};
    use tokio::sync::mpsc;

    fn sample(lat: f64, lon: f64, at_ms: i64) -> PositionSample {
        PositionSample::new(
            Coordinates::new(lat, lon).unwrap(),
            Timestamp::from_millis(at_ms),
        )
    }

    fn options(interval_secs: u64, meters: f64) -> WatchOptions {
        WatchOptions::builder()
            .min_interval(Duration::from_secs(interval_secs))
            .min_distance_meters(meters)
            .build()
    }

    #[tokio::test]
    async fn test_subscribe_and_unsubscribe() {
        let source = PushedPositionSource::new();
        let (tx, _rx) = mpsc::channel(4);
        let first = source.subscribe(options(5, 10.0), tx.clone()).await.unwrap();
        let second = source.subscribe(options(5, 10.0), tx).await.unwrap();
        assert_ne!(first, second);
        assert_eq!(source.subscription_count().await, 2);

        source.unsubscribe(first).await.unwrap();
        assert_eq!(source.subscription_count().await, 1);

        let err = source.unsubscribe(first).await.unwrap_err();
        assert!(matches!(
            err,
            Error::PositionSource(PositionSourceFailure::UnknownSubscription(id)) if id == first
        ));
    }

    #[tokio::test]
    async fn test_subscribe_rejects_closed_sink() {
        let source = PushedPositionSource::new();
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        assert!(source.subscribe(options(5, 10.0), tx).await.is_err());
    }

    #[tokio::test]
    async fn test_first_sample_always_delivered() {
        let source = PushedPositionSource::new();
        let (tx, mut rx) = mpsc::channel(4);
        source.subscribe(options(3600, 1_000_000.0), tx).await.unwrap();

        let summary = source.push(sample(10.0, 20.0, 0)).await;
        assert_eq!(summary.delivered, 1);
        assert_eq!(rx.recv().await.unwrap().coords.latitude, 10.0);
    }

    #[tokio::test]
    async fn test_interval_and_distance_both_required() {
        let source = PushedPositionSource::new();
        let (tx, mut rx) = mpsc::channel(8);
        source.subscribe(options(5, 10.0), tx).await.unwrap();

        source.push(sample(0.0, 0.0, 0)).await;
        // Far enough but too soon
        let summary = source.push(sample(0.001, 0.0, 1_000)).await;
        assert_eq!(summary.filtered, 1);
        // Late enough but barely moved
        let summary = source.push(sample(0.0, 0.00001, 10_000)).await;
        assert_eq!(summary.filtered, 1);
        // Both satisfied (0.001 degrees of latitude is ~111 m)
        let summary = source.push(sample(0.001, 0.0, 10_000)).await;
        assert_eq!(summary.delivered, 1);

        assert_eq!(rx.recv().await.unwrap().captured_at.as_millis(), 0);
        assert_eq!(rx.recv().await.unwrap().captured_at.as_millis(), 10_000);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_full_channel_drops_sample() {
        let source = PushedPositionSource::new();
        let (tx, _rx) = mpsc::channel(1);
        source.subscribe(options(1, 0.0), tx).await.unwrap();

        assert_eq!(source.push(sample(0.0, 0.0, 0)).await.delivered, 1);
        let summary = source.push(sample(1.0, 0.0, 5_000)).await;
        assert_eq!(summary.dropped, 1);
        assert_eq!(source.subscription_count().await, 1);
    }

    #[tokio::test]
    async fn test_closed_channel_removes_subscription() {
        let source = PushedPositionSource::new();
        let (tx, rx) = mpsc::channel(1);
        source.subscribe(options(1, 0.0), tx).await.unwrap();
        drop(rx);

        let summary = source.push(sample(0.0, 0.0, 0)).await;
        assert_eq!(summary, PushSummary::default());
        assert_eq!(source.subscription_count().await, 0);
    }

    fn controller(source: &Arc<PushedPositionSource>) -> LiveShareController {
        LiveShareController::new(
            Arc::new(MemoryDocumentStore::new()),
            Arc::clone(source) as Arc<dyn PositionSource>,
        )
    }

    fn user(key: &str) -> UserKey {
        UserKey::new(key).unwrap()
    }

    #[tokio::test]
    async fn test_stop_after_subscription_pruned() {
        let source = Arc::new(PushedPositionSource::new());
        let controller = controller(&source);
        controller
            .share_live_location(
                &user("s1"),
                &user("r1"),
                Coordinates::new(1.0, 2.0).unwrap(),
                Duration::from_secs(3600),
            )
            .await
            .unwrap();

        let WatchState::Watching { subscription, .. } = controller.state() else {
            panic!("watch did not start");
        };
        source.unsubscribe(subscription).await.unwrap();

        controller.stop_live_location_updates().await.unwrap();
        assert_eq!(controller.state(), WatchState::Idle);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_stop_while_positions_stream_in() {
        let source = Arc::new(PushedPositionSource::new());
        let controller = controller(&source);
        let done = Arc::new(AtomicBool::new(false));

        let pushers: Vec<_> = (0..3u8)
            .map(|lane| {
                let source = Arc::clone(&source);
                let done = Arc::clone(&done);
                tokio::spawn(async move {
                    let mut at_ms = 0;
                    while !done.load(Ordering::SeqCst) {
                        source.push(sample(10.0, f64::from(lane), at_ms)).await;
                        at_ms += 1_000;
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();

        for _ in 0..200 {
            controller
                .share_live_location(
                    &user("s1"),
                    &user("r1"),
                    Coordinates::new(1.0, 2.0).unwrap(),
                    Duration::from_secs(3600),
                )
                .await
                .unwrap();
            controller.stop_live_location_updates().await.unwrap();
        }

        done.store(true, Ordering::SeqCst);
        for pusher in pushers {
            pusher.await.unwrap();
        }
        assert_eq!(controller.state(), WatchState::Idle);
        assert_eq!(source.subscription_count().await, 0);
    }
}
