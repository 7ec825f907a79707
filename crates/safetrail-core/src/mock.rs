//! In-memory collaborators for testing.
//!
//! This module provides mock implementations of every trait the controller
//! depends on, so sharing flows can be exercised without a database, a GPS
//! receiver or a notification service.
//!
//! # Features
//!
//! - **Failure injection**: Make reads, writes, deletes, subscribes or
//!   unsubscribes fail on demand
//! - **Latency simulation**: Add artificial delays to store operations and
//!   unsubscribes
//! - **Inspection**: Operation counters, recorded notifications and the
//!   number of live position subscriptions

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use safetrail_types::{
    Coordinates, DocumentPath, Fields, ShareKey, SharedLocationRecord, Timestamp, UserKey,
};

use crate::error::{Error, PositionSourceFailure, Result, StoreOperation};
use crate::notify::Notification;
use crate::traits::{
    Clock, DocumentStore, NotificationDispatcher, PositionSample, PositionSink, PositionSource,
    SetOptions, SubscriptionId,
};
use crate::watch::WatchOptions;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// An in-memory [`DocumentStore`].
///
/// # Example
///
/// ```
/// use safetrail_core::{DocumentStore, MemoryDocumentStore};
/// use safetrail_types::{DocumentPath, UserKey};
///
/// #[tokio::main]
/// async fn main() {
///     let store = MemoryDocumentStore::new();
///     let path = DocumentPath::user(&UserKey::new("alice").unwrap());
///     store.put(&path, serde_json::json!({"name": "Alice"})).await;
///
///     let fields = store.get(&path).await.unwrap().unwrap();
///     assert_eq!(fields["name"], "Alice");
/// }
/// ```
#[derive(Default)]
pub struct MemoryDocumentStore {
    documents: RwLock<BTreeMap<String, Fields>>,
    server_clock: Option<Arc<dyn Clock>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    fail_deletes: AtomicBool,
    read_count: AtomicU32,
    write_count: AtomicU32,
    delete_count: AtomicU32,
    /// Simulated latency in milliseconds (0 = no delay).
    latency_ms: AtomicU64,
}

impl std::fmt::Debug for MemoryDocumentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryDocumentStore")
            .field("has_server_clock", &self.server_clock.is_some())
            .field("read_count", &self.read_count())
            .field("write_count", &self.write_count())
            .field("delete_count", &self.delete_count())
            .finish()
    }
}

impl MemoryDocumentStore {
    /// Create an empty store without server time.
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `clock` as the store's server time.
    #[must_use]
    pub fn with_server_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.server_clock = Some(clock);
        self
    }

    /// Insert a document directly, bypassing counters and failure injection.
    ///
    /// Non-object values are stored as an empty document.
    pub async fn put(&self, path: &DocumentPath, value: Value) {
        let fields = match value {
            Value::Object(map) => map,
            _ => Fields::new(),
        };
        self.documents.write().await.insert(path.to_string(), fields);
    }

    /// Insert a share record directly.
    pub async fn put_record(&self, key: &ShareKey, record: &SharedLocationRecord) {
        if let Ok(fields) = record.to_fields() {
            self.documents.write().await.insert(key.path().to_string(), fields);
        }
    }

    /// Read a document directly.
    pub async fn document(&self, path: &DocumentPath) -> Option<Fields> {
        self.documents.read().await.get(&path.to_string()).cloned()
    }

    /// Read and decode a share record directly.
    pub async fn record(&self, key: &ShareKey) -> Option<SharedLocationRecord> {
        let fields = self.document(&key.path()).await?;
        SharedLocationRecord::from_fields(&fields).ok()
    }

    /// Remove a document directly, as another device would.
    pub async fn remove(&self, path: &DocumentPath) {
        self.documents.write().await.remove(&path.to_string());
    }

    /// Number of stored documents.
    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    /// Whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }

    /// Make `get` and `list` fail.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::Relaxed);
    }

    /// Make `set` fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    /// Make `delete` fail.
    pub fn set_fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::Relaxed);
    }

    /// Set simulated latency for every operation.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms.store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    /// Number of `get` and `list` calls.
    pub fn read_count(&self) -> u32 {
        self.read_count.load(Ordering::Relaxed)
    }

    /// Number of `set` calls.
    pub fn write_count(&self) -> u32 {
        self.write_count.load(Ordering::Relaxed)
    }

    /// Number of `delete` calls.
    pub fn delete_count(&self) -> u32 {
        self.delete_count.load(Ordering::Relaxed)
    }

    async fn simulate_latency(&self) {
        let latency = self.latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, path: &DocumentPath) -> Result<Option<Fields>> {
        self.read_count.fetch_add(1, Ordering::Relaxed);
        self.simulate_latency().await;
        if self.fail_reads.load(Ordering::Relaxed) {
            return Err(Error::store(StoreOperation::Get, path, "mock read failure"));
        }
        Ok(self.documents.read().await.get(&path.to_string()).cloned())
    }

    async fn set(&self, path: &DocumentPath, fields: Fields, options: SetOptions) -> Result<()> {
        self.write_count.fetch_add(1, Ordering::Relaxed);
        self.simulate_latency().await;
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(Error::store(StoreOperation::Set, path, "mock write failure"));
        }
        let mut documents = self.documents.write().await;
        let key = path.to_string();
        match documents.get_mut(&key) {
            Some(existing) if options.merge => existing.extend(fields),
            _ => {
                documents.insert(key, fields);
            }
        }
        Ok(())
    }

    async fn delete(&self, path: &DocumentPath) -> Result<()> {
        self.delete_count.fetch_add(1, Ordering::Relaxed);
        self.simulate_latency().await;
        if self.fail_deletes.load(Ordering::Relaxed) {
            return Err(Error::store(StoreOperation::Delete, path, "mock delete failure"));
        }
        self.documents.write().await.remove(&path.to_string());
        Ok(())
    }

    async fn list(&self, collection: &DocumentPath) -> Result<Vec<(String, Fields)>> {
        self.read_count.fetch_add(1, Ordering::Relaxed);
        self.simulate_latency().await;
        if self.fail_reads.load(Ordering::Relaxed) {
            return Err(Error::store(StoreOperation::List, collection, "mock read failure"));
        }
        let prefix = format!("{}/", collection);
        Ok(self
            .documents
            .read()
            .await
            .range(prefix.clone()..)
            .take_while(|(path, _)| path.starts_with(&prefix))
            .filter(|(path, _)| !path[prefix.len()..].contains('/'))
            .map(|(path, fields)| (path[prefix.len()..].to_string(), fields.clone()))
            .collect())
    }

    fn server_timestamp(&self) -> Option<Timestamp> {
        self.server_clock.as_ref().map(|clock| clock.now())
    }
}

/// A [`PositionSource`] driven by the test.
///
/// Samples are delivered with [`emit`](Self::emit) to every registered
/// subscription.
#[derive(Debug, Default)]
pub struct MockPositionSource {
    sinks: Mutex<HashMap<SubscriptionId, PositionSink>>,
    last_options: Mutex<Option<WatchOptions>>,
    next_id: AtomicU64,
    subscribe_count: AtomicU32,
    unsubscribe_count: AtomicU32,
    max_concurrent: AtomicUsize,
    deny_permission: AtomicBool,
    fail_unsubscribe: AtomicBool,
    /// Simulated unsubscribe latency in milliseconds (0 = no delay).
    unsubscribe_latency_ms: AtomicU64,
}

impl MockPositionSource {
    /// Create a source with no subscriptions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `coords`, stamped with the current system time, to every subscription.
    ///
    /// Returns the number of subscriptions that accepted the sample.
    pub async fn emit(&self, coords: Coordinates) -> usize {
        self.emit_sample(PositionSample::new(coords, Timestamp::now())).await
    }

    /// Deliver a sample to every subscription.
    pub async fn emit_sample(&self, sample: PositionSample) -> usize {
        let sinks: Vec<PositionSink> = lock(&self.sinks).values().cloned().collect();
        let mut delivered = 0;
        for sink in sinks {
            if sink.send(sample).await.is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Drop every sink without unsubscribing, as a crashed source would.
    pub fn close_all(&self) {
        lock(&self.sinks).clear();
    }

    /// Number of registered subscriptions.
    pub fn active_subscriptions(&self) -> usize {
        lock(&self.sinks).len()
    }

    /// Highest number of simultaneously registered subscriptions seen.
    pub fn max_concurrent_subscriptions(&self) -> usize {
        self.max_concurrent.load(Ordering::SeqCst)
    }

    /// Number of successful `subscribe` calls.
    pub fn subscribe_count(&self) -> u32 {
        self.subscribe_count.load(Ordering::SeqCst)
    }

    /// Number of `unsubscribe` calls.
    pub fn unsubscribe_count(&self) -> u32 {
        self.unsubscribe_count.load(Ordering::SeqCst)
    }

    /// Options passed to the most recent `subscribe`.
    pub fn last_options(&self) -> Option<WatchOptions> {
        lock(&self.last_options).clone()
    }

    /// Make `subscribe` fail with a permission error.
    pub fn set_deny_permission(&self, deny: bool) {
        self.deny_permission.store(deny, Ordering::SeqCst);
    }

    /// Make `unsubscribe` report an error. The subscription is still removed.
    pub fn set_fail_unsubscribe(&self, fail: bool) {
        self.fail_unsubscribe.store(fail, Ordering::SeqCst);
    }

    /// Set simulated unsubscribe latency.
    pub fn set_unsubscribe_latency(&self, latency: Duration) {
        self.unsubscribe_latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }
}

#[async_trait]
impl PositionSource for MockPositionSource {
    async fn subscribe(&self, options: WatchOptions, sink: PositionSink) -> Result<SubscriptionId> {
        if self.deny_permission.load(Ordering::SeqCst) {
            return Err(Error::PositionSource(PositionSourceFailure::PermissionDenied));
        }
        let id = SubscriptionId::new(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let active = {
            let mut sinks = lock(&self.sinks);
            sinks.insert(id, sink);
            sinks.len()
        };
        self.max_concurrent.fetch_max(active, Ordering::SeqCst);
        self.subscribe_count.fetch_add(1, Ordering::SeqCst);
        *lock(&self.last_options) = Some(options);
        Ok(id)
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        self.unsubscribe_count.fetch_add(1, Ordering::SeqCst);
        let latency = self.unsubscribe_latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        let removed = lock(&self.sinks).remove(&id).is_some();
        if self.fail_unsubscribe.load(Ordering::SeqCst) {
            return Err(Error::PositionSource(PositionSourceFailure::Unavailable(
                "mock unsubscribe failure".to_string(),
            )));
        }
        if !removed {
            return Err(Error::PositionSource(
                PositionSourceFailure::UnknownSubscription(id),
            ));
        }
        Ok(())
    }
}

/// A [`NotificationDispatcher`] that records what it is asked to send.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(UserKey, Notification)>>,
    should_fail: AtomicBool,
}

impl RecordingNotifier {
    /// Create a notifier with nothing recorded.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every notification sent so far, in order.
    pub fn sent(&self) -> Vec<(UserKey, Notification)> {
        lock(&self.sent).clone()
    }

    /// Make `notify` fail. Failed notifications are not recorded.
    pub fn set_should_fail(&self, fail: bool) {
        self.should_fail.store(fail, Ordering::Relaxed);
    }
}

#[async_trait]
impl NotificationDispatcher for RecordingNotifier {
    async fn notify(&self, recipient: &UserKey, notification: Notification) -> Result<()> {
        if self.should_fail.load(Ordering::Relaxed) {
            return Err(Error::Notification("mock notification failure".to_string()));
        }
        lock(&self.sent).push((recipient.clone(), notification));
        Ok(())
    }
}

/// A [`Clock`] that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    /// Create a clock reading `start`.
    pub fn new(start: Timestamp) -> Self {
        Self {
            millis: AtomicI64::new(start.as_millis()),
        }
    }

    /// Jump to `now`.
    pub fn set(&self, now: Timestamp) {
        self.millis.store(now.as_millis(), Ordering::SeqCst);
    }

    /// Move forward by `by`.
    pub fn advance(&self, by: Duration) {
        let millis = i64::try_from(by.as_millis()).unwrap_or(i64::MAX);
        self.millis.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_millis(self.millis.load(Ordering::SeqCst))
    }
}
