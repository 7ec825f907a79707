//! Application state shared across handlers.

use std::sync::Arc;

use time::OffsetDateTime;

use safetrail_core::{LiveShareController, NotificationDispatcher};
use safetrail_store::SqliteDocumentStore;

use crate::config::Config;
use crate::notifier::LogNotifier;
use crate::positions::PushedPositionSource;

/// Shared application state.
pub struct AppState {
    /// The sharing controller. Owns the single live watch.
    pub controller: LiveShareController,
    /// The document store the controller writes to.
    pub store: Arc<SqliteDocumentStore>,
    /// Position relay fed by `POST /api/positions`.
    pub positions: Arc<PushedPositionSource>,
    /// Configuration the service was started with.
    pub config: Config,
    /// When the service started.
    pub started_at: OffsetDateTime,
}

impl AppState {
    /// Create application state with the notifier selected by `config`.
    pub fn new(store: SqliteDocumentStore, config: Config) -> safetrail_core::Result<Arc<Self>> {
        Self::with_notifier(store, config.clone(), notifier_for(&config))
    }

    /// Create application state with an explicit notifier.
    pub fn with_notifier(
        store: SqliteDocumentStore,
        config: Config,
        notifier: Arc<dyn NotificationDispatcher>,
    ) -> safetrail_core::Result<Arc<Self>> {
        let store = Arc::new(store);
        let positions = Arc::new(PushedPositionSource::new());
        let controller = LiveShareController::builder(store.clone(), positions.clone())
            .notifier(notifier)
            .config(config.sharing.controller_config())
            .build()?;

        Ok(Arc::new(Self {
            controller,
            store,
            positions,
            config,
            started_at: OffsetDateTime::now_utc(),
        }))
    }
}

#[cfg(feature = "notifications")]
fn notifier_for(config: &Config) -> Arc<dyn NotificationDispatcher> {
    if config.notifications.desktop {
        Arc::new(crate::notifier::DesktopNotifier)
    } else {
        Arc::new(LogNotifier)
    }
}

#[cfg(not(feature = "notifications"))]
fn notifier_for(config: &Config) -> Arc<dyn NotificationDispatcher> {
    if config.notifications.desktop {
        tracing::warn!("Desktop notifications requested but the `notifications` feature is disabled");
    }
    Arc::new(LogNotifier)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_state_from_default_config() {
        let store = SqliteDocumentStore::open_in_memory().unwrap();
        let state = AppState::new(store, Config::default()).unwrap();
        assert!(!state.controller.state().is_active());
        assert_eq!(
            state.controller.config().one_time_ttl.as_secs(),
            state.config.sharing.one_time_ttl_secs
        );
    }

    #[tokio::test]
    async fn test_state_rejects_invalid_sharing_config() {
        let store = SqliteDocumentStore::open_in_memory().unwrap();
        let mut config = Config::default();
        config.sharing.one_time_ttl_secs = 0;
        assert!(AppState::new(store, config).is_err());
    }
}
