//! Share event system for lifecycle and refresh notifications.
//!
//! The controller and its watch task publish [`ShareEvent`]s on a
//! broadcast channel so that UIs, the companion service and tests can
//! observe shares being created, refreshed, expired and torn down.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use safetrail_types::{ShareKey, ShareKind, Timestamp};

use crate::traits::SubscriptionId;

/// Events emitted while sharing locations.
///
/// All events are serializable for logging, persistence, and IPC.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new event types
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum ShareEvent {
    /// A one-time or live record was written.
    Shared {
        key: ShareKey,
        kind: ShareKind,
        expires_at: Timestamp,
    },
    /// A watch subscribed to the position source.
    WatchStarted {
        key: ShareKey,
        subscription: SubscriptionId,
        expires_at: Timestamp,
    },
    /// The live record was rewritten with a new position.
    Refreshed { key: ShareKey, updated_at: Timestamp },
    /// The live record reached its deadline and was deleted.
    Expired { key: ShareKey },
    /// The record disappeared or stopped being live underneath the watch.
    ExternallyCancelled { key: ShareKey, cause: CancelCause },
    /// A refresh failed; the watch keeps running unless the limit is hit.
    RefreshFailed {
        key: ShareKey,
        error: String,
        consecutive_failures: u32,
    },
    /// The watch task exited and unsubscribed.
    WatchStopped {
        key: ShareKey,
        subscription: SubscriptionId,
        reason: StopReason,
    },
    /// The sender stopped sharing and the record was deleted.
    SharingStopped { key: ShareKey },
}

impl ShareEvent {
    /// The share this event concerns.
    pub fn key(&self) -> &ShareKey {
        match self {
            Self::Shared { key, .. }
            | Self::WatchStarted { key, .. }
            | Self::Refreshed { key, .. }
            | Self::Expired { key }
            | Self::ExternallyCancelled { key, .. }
            | Self::RefreshFailed { key, .. }
            | Self::WatchStopped { key, .. }
            | Self::SharingStopped { key } => key,
        }
    }
}

/// Why a watch saw its record as cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum CancelCause {
    /// The document no longer exists.
    Missing,
    /// The document exists but is not a live share.
    NotLive,
    /// The document could not be decoded as a share record.
    Unrecognized,
}

/// Why a watch task exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum StopReason {
    /// Stopped or replaced by the controller.
    Stopped,
    /// The share reached its deadline.
    Expired,
    /// The record was removed or replaced by a non-live share.
    Cancelled,
    /// The position source closed the sample channel.
    SourceClosed,
    /// `max_consecutive_failures` refreshes failed in a row.
    TooManyFailures,
}

/// Sender for share events.
pub type EventSender = broadcast::Sender<ShareEvent>;

/// Receiver for share events.
pub type EventReceiver = broadcast::Receiver<ShareEvent>;

/// Event dispatcher for sending events to multiple receivers.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    sender: EventSender,
}

impl EventDispatcher {
    /// Create a new event dispatcher.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Send an event.
    pub fn send(&self, event: ShareEvent) {
        // Ignore error if no receivers
        let _ = self.sender.send(event);
    }

    /// Get the number of active receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(100)
    }
}
