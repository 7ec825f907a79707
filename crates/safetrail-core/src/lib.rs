//! Location sharing controller for SafeTrail.
//!
//! This crate implements the sender side of location sharing between a user
//! and their trusted contacts, plus the read path a recipient uses to see
//! what is shared with them.
//!
//! # Features
//!
//! - **One-time shares**: Write the current position once, visible for five minutes
//! - **Live shares**: Keep a position fresh from device samples until a deadline
//! - **Single watch**: At most one position subscription per controller, torn
//!   down on expiry, cancellation, replacement or stop
//! - **Notifications**: Best-effort recipient notifications with the sender's name
//! - **Events**: Broadcast lifecycle and refresh events
//! - **Mocks**: In-memory store, position source, notifier and clock for tests
//!
//! # Collaborators
//!
//! | Trait | Responsibility |
//! |-------|----------------|
//! | [`DocumentStore`] | Hierarchical key/value documents (`users/{recipient}/sharedLocations/{sender}`) |
//! | [`PositionSource`] | Delivers position samples into a channel |
//! | [`NotificationDispatcher`] | Shows a local notification to the recipient |
//! | [`Clock`] | Wall-clock time |
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use safetrail_core::{LiveShareController, MemoryDocumentStore, MockPositionSource};
//! use safetrail_types::{Coordinates, UserKey};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let controller = LiveShareController::new(
//!         Arc::new(MemoryDocumentStore::new()),
//!         Arc::new(MockPositionSource::new()),
//!     );
//!
//!     let me = UserKey::new("alice")?;
//!     let friend = UserKey::new("bob")?;
//!     let here = Coordinates::new(51.5074, -0.1278)?;
//!
//!     // Share once
//!     controller.send_one_time_location(&me, &friend, here).await?;
//!
//!     // Share live for an hour; the watch keeps the record fresh
//!     controller
//!         .share_live_location(&me, &friend, here, Duration::from_secs(3600))
//!         .await?;
//!
//!     // Stop and remove the share
//!     controller.stop_sharing_location(&me, &friend).await?;
//!     Ok(())
//! }
//! ```

pub mod controller;
pub mod error;
pub mod events;
pub mod mock;
pub mod notify;
pub mod traits;
pub mod viewer;
pub mod watch;

// Core exports
pub use controller::{
    ControllerConfig, DEFAULT_ONE_TIME_TTL, LiveShareController, LiveShareControllerBuilder,
    ShareReceipt, WatchState,
};
pub use error::{Error, PositionSourceFailure, Result, StoreOperation};
pub use events::{CancelCause, EventDispatcher, EventReceiver, EventSender, ShareEvent, StopReason};
pub use mock::{ManualClock, MemoryDocumentStore, MockPositionSource, RecordingNotifier};
pub use notify::{
    FALLBACK_SENDER_NAME, NoopNotifier, Notification, NotificationData, SenderName,
    lookup_sender_name,
};
pub use traits::{
    Clock, DocumentStore, NotificationDispatcher, PositionSample, PositionSink, PositionSource,
    SetOptions, SubscriptionId, SystemClock,
};
pub use viewer::{ActiveShare, UNKNOWN_SENDER_NAME, UNNAMED_SENDER_NAME, active_shares};
pub use watch::{RefreshOutcome, WatchOptions, WatchOptionsBuilder, refresh_shared_location};

// Re-export from safetrail-types
pub use safetrail_types::{
    Coordinates, DocumentPath, Fields, ShareKey, ShareKind, SharedLocationRecord, Timestamp,
    UserKey,
};
