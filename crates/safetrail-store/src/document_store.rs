//! Async [`DocumentStore`] adapter over the SQLite [`Store`].

use std::path::Path;

use async_trait::async_trait;
use tokio::sync::{Mutex, MutexGuard};

use safetrail_core::{DocumentStore, SetOptions, StoreOperation};
use safetrail_types::{DocumentPath, Fields, Timestamp};

use crate::error::Result;
use crate::store::Store;

/// Shares one SQLite connection between async tasks.
///
/// The connection lives behind a `tokio::sync::Mutex`, so every document
/// operation is serialized. This gives the per-key consistency the
/// controller relies on.
#[derive(Debug)]
pub struct SqliteDocumentStore {
    store: Mutex<Store>,
}

impl SqliteDocumentStore {
    /// Wrap an open store.
    pub fn new(store: Store) -> Self {
        Self {
            store: Mutex::new(store),
        }
    }

    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Store::open(path).map(Self::new)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        Store::open_in_memory().map(Self::new)
    }

    /// Lock the underlying store for direct queries.
    pub async fn lock(&self) -> MutexGuard<'_, Store> {
        self.store.lock().await
    }
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn get(&self, path: &DocumentPath) -> safetrail_core::Result<Option<Fields>> {
        self.store
            .lock()
            .await
            .get_document(path)
            .map_err(|e| e.into_core(StoreOperation::Get, path))
    }

    async fn set(
        &self,
        path: &DocumentPath,
        fields: Fields,
        options: SetOptions,
    ) -> safetrail_core::Result<()> {
        self.store
            .lock()
            .await
            .set_document(path, fields, options.merge)
            .map_err(|e| e.into_core(StoreOperation::Set, path))
    }

    async fn delete(&self, path: &DocumentPath) -> safetrail_core::Result<()> {
        self.store
            .lock()
            .await
            .delete_document(path)
            .map(|_| ())
            .map_err(|e| e.into_core(StoreOperation::Delete, path))
    }

    async fn list(&self, collection: &DocumentPath) -> safetrail_core::Result<Vec<(String, Fields)>> {
        let documents = self
            .store
            .lock()
            .await
            .list_collection(collection)
            .map_err(|e| e.into_core(StoreOperation::List, collection))?;
        Ok(documents.into_iter().map(|doc| (doc.id, doc.fields)).collect())
    }

    fn server_timestamp(&self) -> Option<Timestamp> {
        Some(Timestamp::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use safetrail_core::{
        Coordinates, LiveShareController, ManualClock, MockPositionSource, ShareKind, UserKey,
        active_shares,
    };

    fn user(key: &str) -> UserKey {
        UserKey::new(key).unwrap()
    }

    #[tokio::test]
    async fn test_document_store_contract() {
        let store = SqliteDocumentStore::open_in_memory().unwrap();
        let path = DocumentPath::user(&user("alice"));

        assert_eq!(store.get(&path).await.unwrap(), None);
        store.delete(&path).await.unwrap();

        let mut fields = Fields::new();
        fields.insert("name".into(), "Alice".into());
        store.set(&path, fields, SetOptions::overwrite()).await.unwrap();
        assert_eq!(store.get(&path).await.unwrap().unwrap()["name"], "Alice");

        let listed = store.list(&DocumentPath::parse("users").unwrap()).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].0, "alice");
        assert!(store.server_timestamp().is_some());
    }

    #[tokio::test]
    async fn test_errors_carry_operation_context() {
        let store = SqliteDocumentStore::open_in_memory().unwrap();
        let collection = DocumentPath::shared_locations(&user("r1"));
        let err = store
            .set(&collection, Fields::new(), SetOptions::overwrite())
            .await
            .unwrap_err();
        assert!(err.is_store());
        assert!(err.to_string().contains("set failed for 'users/r1/sharedLocations'"));
    }

    #[tokio::test]
    async fn test_controller_over_sqlite() {
        let store = Arc::new(SqliteDocumentStore::open_in_memory().unwrap());
        let clock = Arc::new(ManualClock::new(Timestamp::now()));
        let controller = LiveShareController::builder(store.clone(), Arc::new(MockPositionSource::new()))
            .clock(clock.clone())
            .build()
            .unwrap();

        controller
            .send_one_time_location(&user("s1"), &user("r1"), Coordinates::new(1.0, 2.0).unwrap())
            .await
            .unwrap();
        controller
            .start_live_location_share(
                &user("s2"),
                &user("r1"),
                Coordinates::new(3.0, 4.0).unwrap(),
                Duration::from_secs(3600),
            )
            .await
            .unwrap();

        let shares = active_shares(store.as_ref(), clock.as_ref(), &user("r1")).await.unwrap();
        let kinds: Vec<ShareKind> = shares.iter().map(|s| s.record.kind).collect();
        assert_eq!(kinds, vec![ShareKind::OneTime, ShareKind::Live]);
        assert_eq!(store.lock().await.count_documents(None).unwrap(), 2);
    }
}
