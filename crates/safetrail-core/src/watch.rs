//! The live-share watch: position samples in, record refreshes out.
//!
//! A watch owns one position subscription and a single consumer task. Each
//! sample runs the refresh protocol ([`refresh_shared_location`]) to
//! completion before the next one is taken, so read-modify-write cycles on
//! the shared record never interleave. The task tears itself down when the
//! share expires, when the record is removed underneath it, or when the
//! controller cancels it; in every case it unsubscribes before exiting.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use safetrail_types::{Coordinates, ShareKey, SharedLocationRecord, Timestamp};

use crate::error::{Error, PositionSourceFailure, Result};
use crate::events::{CancelCause, EventDispatcher, ShareEvent, StopReason};
use crate::traits::{
    Clock, DocumentStore, PositionSample, PositionSource, SetOptions, SubscriptionId,
};

/// Upper bound for the deadline retry delay when `min_interval` cannot be added to now.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(3600);

/// Options for a live-share watch.
///
/// Use the builder pattern for convenient configuration:
///
/// ```ignore
/// let options = WatchOptions::builder()
///     .min_interval(Duration::from_secs(10))
///     .min_distance_meters(25.0)
///     .max_consecutive_failures(5)
///     .build();
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct WatchOptions {
    /// Minimum time between samples. A hint to the position source.
    /// Default: 5 seconds.
    pub min_interval: Duration,
    /// Minimum displacement between samples. A hint to the position source.
    /// Default: 10 meters.
    pub min_distance_meters: f64,
    /// Buffer size of the sample channel.
    /// Default: 16 samples.
    pub channel_capacity: usize,
    /// Maximum consecutive refresh failures before the watch tears down.
    ///
    /// When `None` (default), failures are logged and the watch keeps
    /// running until the share expires or is stopped.
    pub max_consecutive_failures: Option<u32>,
    /// Tear down at the share's deadline even if no sample arrives.
    ///
    /// Without this, expiry is only noticed when the next sample is
    /// processed. Default: `true`.
    pub enforce_deadline: bool,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(5),
            min_distance_meters: 10.0,
            channel_capacity: 16,
            max_consecutive_failures: None,
            enforce_deadline: true,
        }
    }
}

impl WatchOptions {
    /// Create a new builder for WatchOptions.
    pub fn builder() -> WatchOptionsBuilder {
        WatchOptionsBuilder::default()
    }

    /// Validate the options and return an error if invalid.
    ///
    /// Checks that:
    /// - `min_interval` is > 0
    /// - `channel_capacity` is > 0
    /// - `min_distance_meters` is finite and not negative
    /// - `max_consecutive_failures`, if set, is > 0
    pub fn validate(&self) -> Result<()> {
        if self.min_interval.is_zero() {
            return Err(Error::invalid_config("min_interval must be > 0"));
        }
        if self.channel_capacity == 0 {
            return Err(Error::invalid_config("channel_capacity must be > 0"));
        }
        if !self.min_distance_meters.is_finite() || self.min_distance_meters < 0.0 {
            return Err(Error::invalid_config(
                "min_distance_meters must be a finite value >= 0",
            ));
        }
        if self.max_consecutive_failures == Some(0) {
            return Err(Error::invalid_config("max_consecutive_failures must be > 0"));
        }
        Ok(())
    }
}

/// Builder for WatchOptions.
#[derive(Debug, Clone, Default)]
pub struct WatchOptionsBuilder {
    options: WatchOptions,
}

impl WatchOptionsBuilder {
    /// Set the minimum sampling interval.
    #[must_use]
    pub fn min_interval(mut self, interval: Duration) -> Self {
        self.options.min_interval = interval;
        self
    }

    /// Set the minimum sampling displacement.
    #[must_use]
    pub fn min_distance_meters(mut self, meters: f64) -> Self {
        self.options.min_distance_meters = meters;
        self
    }

    /// Set the sample channel capacity.
    #[must_use]
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.options.channel_capacity = capacity;
        self
    }

    /// Set the maximum consecutive failures before tearing down.
    #[must_use]
    pub fn max_consecutive_failures(mut self, max: u32) -> Self {
        self.options.max_consecutive_failures = Some(max);
        self
    }

    /// Set whether the watch stops at the deadline without a sample.
    #[must_use]
    pub fn enforce_deadline(mut self, enforce: bool) -> Self {
        self.options.enforce_deadline = enforce;
        self
    }

    /// Build the WatchOptions.
    #[must_use]
    pub fn build(self) -> WatchOptions {
        self.options
    }
}

/// What one run of the refresh protocol did.
#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    /// The record was rewritten with the new position.
    Refreshed(SharedLocationRecord),
    /// The record had expired and was deleted.
    Expired,
    /// The record is gone or no longer live. Nothing was written.
    Cancelled(CancelCause),
}

/// Apply one position sample to the live record for `key`.
///
/// - absent, undecodable or non-live record: [`RefreshOutcome::Cancelled`],
///   nothing is written or deleted
/// - live and expired: the record is deleted, [`RefreshOutcome::Expired`]
/// - otherwise the record is rewritten in full with the new coordinates and
///   `updatedAt`, keeping its kind, start and expiry
pub async fn refresh_shared_location(
    store: &dyn DocumentStore,
    clock: &dyn Clock,
    key: &ShareKey,
    coords: Coordinates,
) -> Result<RefreshOutcome> {
    coords.validate()?;
    let path = key.path();

    let Some(fields) = store.get(&path).await? else {
        return Ok(RefreshOutcome::Cancelled(CancelCause::Missing));
    };
    let record = match SharedLocationRecord::from_fields(&fields) {
        Ok(record) => record,
        Err(e) => {
            warn!("Ignoring undecodable share record at {}: {}", path, e);
            return Ok(RefreshOutcome::Cancelled(CancelCause::Unrecognized));
        }
    };
    if !record.is_live() {
        return Ok(RefreshOutcome::Cancelled(CancelCause::NotLive));
    }

    let now = clock.now();
    if record.is_expired_at(now) {
        store.delete(&path).await?;
        return Ok(RefreshOutcome::Expired);
    }

    let refreshed = record.refreshed(coords, now);
    store
        .set(&path, refreshed.to_fields()?, SetOptions::overwrite())
        .await?;
    Ok(RefreshOutcome::Refreshed(refreshed))
}

/// Delete the record at the deadline if it still belongs to this share.
///
/// Returns the cause instead when the record was already removed or replaced
/// by a non-live share. A live record with a later expiry came from a newer
/// share and is left alone.
async fn expire_at_deadline(
    store: &dyn DocumentStore,
    key: &ShareKey,
    deadline: Timestamp,
) -> Result<Option<CancelCause>> {
    let path = key.path();
    let Some(fields) = store.get(&path).await? else {
        return Ok(Some(CancelCause::Missing));
    };
    match SharedLocationRecord::from_fields(&fields) {
        Ok(record) if record.is_live() => {
            if record.expires_at <= deadline {
                store.delete(&path).await?;
            }
            Ok(None)
        }
        Ok(_) => Ok(Some(CancelCause::NotLive)),
        Err(_) => Ok(Some(CancelCause::Unrecognized)),
    }
}

/// Everything the consumer task needs; consumed by [`WatchTask::run`].
pub(crate) struct WatchTask {
    pub(crate) key: ShareKey,
    pub(crate) expires_at: Timestamp,
    pub(crate) subscription: SubscriptionId,
    pub(crate) options: WatchOptions,
    pub(crate) store: Arc<dyn DocumentStore>,
    pub(crate) positions: Arc<dyn PositionSource>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) events: EventDispatcher,
    pub(crate) cancel: CancellationToken,
    pub(crate) samples: mpsc::Receiver<PositionSample>,
}

impl WatchTask {
    /// Run until the watch ends, then unsubscribe.
    ///
    /// The returned result is that of the final unsubscribe.
    pub(crate) async fn run(mut self) -> Result<()> {
        let reason = self.consume().await;

        // Marks the watch as terminating for observers of the token.
        self.cancel.cancel();
        self.samples.close();

        let unsubscribed = match self.positions.unsubscribe(self.subscription).await {
            // The source already dropped it, e.g. after seeing the closed channel.
            Err(Error::PositionSource(PositionSourceFailure::UnknownSubscription(_))) => {
                debug!("Subscription {} for {} was already gone", self.subscription, self.key);
                Ok(())
            }
            Err(e) => {
                warn!("Failed to unsubscribe {} for {}: {}", self.subscription, self.key, e);
                Err(e)
            }
            Ok(()) => Ok(()),
        };

        info!("Watch for {} stopped ({:?})", self.key, reason);
        self.events.send(ShareEvent::WatchStopped {
            key: self.key.clone(),
            subscription: self.subscription,
            reason,
        });
        unsubscribed
    }

    async fn consume(&mut self) -> StopReason {
        let max_failures = self.options.max_consecutive_failures;
        let mut consecutive_failures: u32 = 0;

        let remaining = self.expires_at.saturating_duration_since(self.clock.now());
        let deadline = tokio::time::sleep(remaining);
        tokio::pin!(deadline);

        loop {
            let failure = tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    debug!("Watch for {} cancelled, stopping gracefully", self.key);
                    return StopReason::Stopped;
                }
                _ = &mut deadline, if self.options.enforce_deadline => {
                    match expire_at_deadline(self.store.as_ref(), &self.key, self.expires_at).await {
                        Ok(None) => {
                            info!("Live share {} reached its deadline", self.key);
                            self.events.send(ShareEvent::Expired { key: self.key.clone() });
                            return StopReason::Expired;
                        }
                        Ok(Some(cause)) => return self.externally_cancelled(cause),
                        Err(e) => {
                            // Retry once the source would have produced another sample.
                            let now = tokio::time::Instant::now();
                            let retry_at = now
                                .checked_add(self.options.min_interval)
                                .unwrap_or(now + MAX_RETRY_DELAY);
                            deadline.as_mut().reset(retry_at);
                            e
                        }
                    }
                }
                sample = self.samples.recv() => {
                    let Some(sample) = sample else {
                        debug!("Position source closed the channel for {}", self.key);
                        return StopReason::SourceClosed;
                    };
                    debug!("Sample for {} at {}", self.key, sample.coords);
                    match refresh_shared_location(
                        self.store.as_ref(),
                        self.clock.as_ref(),
                        &self.key,
                        sample.coords,
                    )
                    .await
                    {
                        Ok(RefreshOutcome::Refreshed(record)) => {
                            consecutive_failures = 0;
                            if let Some(updated_at) = record.updated_at {
                                self.events.send(ShareEvent::Refreshed {
                                    key: self.key.clone(),
                                    updated_at,
                                });
                            }
                            continue;
                        }
                        Ok(RefreshOutcome::Expired) => {
                            info!("Live share {} expired, record deleted", self.key);
                            self.events.send(ShareEvent::Expired { key: self.key.clone() });
                            return StopReason::Expired;
                        }
                        Ok(RefreshOutcome::Cancelled(cause)) => {
                            return self.externally_cancelled(cause);
                        }
                        Err(e) => e,
                    }
                }
            };

            consecutive_failures += 1;
            warn!(
                "Refresh of {} failed (failure {}/{}): {}",
                self.key,
                consecutive_failures,
                max_failures.map_or("∞".to_string(), |n| n.to_string()),
                failure
            );
            self.events.send(ShareEvent::RefreshFailed {
                key: self.key.clone(),
                error: failure.to_string(),
                consecutive_failures,
            });

            if let Some(max) = max_failures
                && consecutive_failures >= max
            {
                warn!(
                    "Max consecutive failures ({}) reached, stopping watch for {}",
                    max, self.key
                );
                return StopReason::TooManyFailures;
            }
        }
    }

    fn externally_cancelled(&self, cause: CancelCause) -> StopReason {
        info!("Share {} was cancelled externally ({:?})", self.key, cause);
        self.events.send(ShareEvent::ExternallyCancelled {
            key: self.key.clone(),
            cause,
        });
        StopReason::Cancelled
    }
}
