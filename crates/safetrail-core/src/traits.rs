//! Trait abstractions for the services location sharing depends on.
//!
//! The controller never talks to a concrete database, GPS, or notification
//! API. It is handed implementations of these traits, which lets the same
//! code run against the SQLite store in production and the in-memory
//! mocks in [`crate::mock`] under test.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use safetrail_types::{Coordinates, DocumentPath, Fields, Timestamp, UserKey};

use crate::error::Result;
use crate::notify::Notification;
use crate::watch::WatchOptions;

/// Options for [`DocumentStore::set`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetOptions {
    /// Merge the given fields into an existing document instead of replacing it.
    pub merge: bool,
}

impl SetOptions {
    /// Replace the whole document.
    pub fn overwrite() -> Self {
        Self { merge: false }
    }

    /// Shallow-merge into the existing document.
    pub fn merge() -> Self {
        Self { merge: true }
    }
}

/// A key/value document database addressed by hierarchical paths.
///
/// Implementations must be strongly consistent per key: a `get` issued after
/// a completed `set` or `delete` on the same path observes it.
///
/// # Example
///
/// ```ignore
/// use safetrail_core::{DocumentStore, SetOptions};
///
/// async fn touch<S: DocumentStore + ?Sized>(store: &S, path: &DocumentPath) -> Result<()> {
///     let mut fields = store.get(path).await?.unwrap_or_default();
///     fields.insert("seen".into(), true.into());
///     store.set(path, fields, SetOptions::overwrite()).await
/// }
/// ```
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Read a document. Returns `None` if it does not exist.
    async fn get(&self, path: &DocumentPath) -> Result<Option<Fields>>;

    /// Write a document, replacing or merging per `options`.
    async fn set(&self, path: &DocumentPath, fields: Fields, options: SetOptions) -> Result<()>;

    /// Delete a document. Deleting a missing document succeeds.
    async fn delete(&self, path: &DocumentPath) -> Result<()>;

    /// List the documents directly inside a collection as `(id, fields)` pairs.
    async fn list(&self, collection: &DocumentPath) -> Result<Vec<(String, Fields)>>;

    /// Server-assigned time for creation timestamps, if the store has one.
    ///
    /// The default implementation returns `None`, in which case callers fall
    /// back to their own clock.
    fn server_timestamp(&self) -> Option<Timestamp> {
        None
    }
}

/// Handle identifying one position subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Create a subscription id.
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// The raw id.
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// One position fix delivered by a [`PositionSource`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionSample {
    /// Where the device was.
    pub coords: Coordinates,
    /// When the fix was taken.
    pub captured_at: Timestamp,
}

impl PositionSample {
    /// Create a sample.
    pub fn new(coords: Coordinates, captured_at: Timestamp) -> Self {
        Self {
            coords,
            captured_at,
        }
    }
}

/// Channel end a [`PositionSource`] delivers samples into.
///
/// The source should drop samples (or wait) when the channel is full rather
/// than buffer without bound; the watch processes one sample at a time.
pub type PositionSink = mpsc::Sender<PositionSample>;

/// Asynchronous position sampling.
///
/// `WatchOptions::min_interval` and `WatchOptions::min_distance_meters` are
/// hints; consumers must tolerate any sampling rate.
#[async_trait]
pub trait PositionSource: Send + Sync {
    /// Start delivering samples into `sink`.
    async fn subscribe(&self, options: WatchOptions, sink: PositionSink) -> Result<SubscriptionId>;

    /// Stop a subscription. Resolves once no further samples will be delivered.
    async fn unsubscribe(&self, id: SubscriptionId) -> Result<()>;
}

/// Fire-and-forget local notifications.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    /// Notify `recipient`. Callers treat failures as best-effort.
    async fn notify(&self, recipient: &UserKey, notification: Notification) -> Result<()>;
}

/// Source of wall-clock time.
pub trait Clock: Send + Sync {
    /// The current time.
    fn now(&self) -> Timestamp;
}

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_options() {
        assert!(!SetOptions::default().merge);
        assert!(!SetOptions::overwrite().merge);
        assert!(SetOptions::merge().merge);
    }

    #[test]
    fn test_subscription_id_display() {
        let id = SubscriptionId::new(3);
        assert_eq!(id.to_string(), "sub-3");
        assert_eq!(id.as_u64(), 3);
    }

    #[test]
    fn test_system_clock_is_recent() {
        // 2020-01-01T00:00:00Z
        assert!(SystemClock.now().as_millis() > 1_577_836_800_000);
    }
}
