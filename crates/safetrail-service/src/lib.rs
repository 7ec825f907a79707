//! HTTP REST API for SafeTrail location sharing.
//!
//! This crate provides a service that:
//! - Writes one-time and live location shares to the local database
//! - Keeps the live share fresh from positions posted by the sender's device
//! - Lists the unexpired shares a recipient can see
//! - Notifies recipients through the log or the desktop
//!
//! # REST API Endpoints
//!
//! - `GET /api/health` - Service health and watch state
//! - `POST /api/shares/once` - Share the current position once
//! - `POST /api/shares/live` - Start a live share and watch it
//! - `DELETE /api/shares/{recipient}/{sender}` - Stop sharing and delete the record
//! - `GET /api/watch` - Current watch state
//! - `POST /api/watch/stop` - Stop the live watch, keeping the record
//! - `POST /api/positions` - Feed a position fix to the watch
//! - `GET /api/users/{recipient}/shares` - Unexpired shares for a recipient
//!
//! # Configuration
//!
//! The service reads configuration from `~/.config/safetrail/server.toml`:
//!
//! ```toml
//! [server]
//! bind = "127.0.0.1:8080"
//!
//! [storage]
//! path = "~/.local/share/safetrail/data.db"
//!
//! [sharing]
//! min_interval_secs = 5
//! min_distance_meters = 10.0
//! one_time_ttl_secs = 300
//! max_live_duration_secs = 86400
//!
//! [notifications]
//! desktop = false
//! ```

pub mod api;
pub mod config;
pub mod notifier;
pub mod positions;
pub mod state;

pub use config::{
    Config, ConfigError, NotificationConfig, ServerConfig, SharingConfig, StorageConfig,
    ValidationError,
};
#[cfg(feature = "notifications")]
pub use notifier::DesktopNotifier;
pub use notifier::LogNotifier;
pub use positions::{PushSummary, PushedPositionSource};
pub use state::AppState;
