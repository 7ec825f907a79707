//! Error types for safetrail-core.
//!
//! Every share and watch operation returns an explicit [`Result`]; nothing
//! is swallowed and reported as success. Best-effort side channels (the
//! sender-name lookup and the share notification) are the exception: their
//! failures are logged and reflected in the operation's receipt instead.
//!
//! # Error Classification
//!
//! | Error Type | Raised by | Caller action |
//! |------------|-----------|---------------|
//! | [`Error::Store`] | Any document read, write, delete or list | Report; the share may not be persisted |
//! | [`Error::PositionSource`] | Subscribing to or unsubscribing from position updates | Check location permission, retry later |
//! | [`Error::InvalidData`] | Invalid coordinates, keys, or undecodable records | Fix input, do not retry |
//! | [`Error::InvalidDuration`] | Zero-length or over-limit live share | Fix input |
//! | [`Error::AlreadyExpired`] | Starting a watch past its deadline | Start a new share |
//! | [`Error::Notification`] | Notification dispatchers | Never fails a share |
//! | [`Error::InvalidConfig`] | Controller and watch option validation | Fix configuration |

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use safetrail_types::{DocumentPath, ParseError, ShareKey, Timestamp};

use crate::traits::SubscriptionId;

/// Errors that can occur while sharing locations.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A document store operation failed.
    #[error("Document store {operation} failed for '{path}': {reason}")]
    Store {
        /// The operation that failed.
        operation: StoreOperation,
        /// The document or collection path.
        path: String,
        /// Backend-specific failure description.
        reason: String,
    },

    /// The position source refused or failed an operation.
    #[error("Position source error: {0}")]
    PositionSource(PositionSourceFailure),

    /// A notification could not be dispatched.
    #[error("Notification dispatch failed: {0}")]
    Notification(String),

    /// Invalid input or stored data.
    #[error("Invalid data: {0}")]
    InvalidData(#[from] ParseError),

    /// A live share duration of zero.
    #[error("Invalid share duration {0:?}: must be greater than zero")]
    InvalidDuration(Duration),

    /// A live share duration above the configured maximum.
    #[error("Share duration {requested:?} exceeds the maximum of {max:?}")]
    DurationTooLong {
        /// The requested duration.
        requested: Duration,
        /// The configured maximum.
        max: Duration,
    },

    /// The share's deadline has already passed.
    #[error("Share {key} already expired at {expires_at}")]
    AlreadyExpired {
        /// The share that expired.
        key: ShareKey,
        /// Its deadline.
        expires_at: Timestamp,
    },

    /// Operation was cancelled.
    #[error("Operation cancelled")]
    Cancelled,

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Document store operation kinds, used in error context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOperation {
    Get,
    Set,
    Delete,
    List,
}

impl fmt::Display for StoreOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get => write!(f, "get"),
            Self::Set => write!(f, "set"),
            Self::Delete => write!(f, "delete"),
            Self::List => write!(f, "list"),
        }
    }
}

/// Structured reasons for position source failures.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new reasons
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum PositionSourceFailure {
    /// Location permission was denied or revoked.
    PermissionDenied,
    /// The source cannot deliver positions right now.
    Unavailable(String),
    /// The subscription is not (or no longer) registered.
    UnknownSubscription(SubscriptionId),
}

impl fmt::Display for PositionSourceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PermissionDenied => write!(f, "location permission denied"),
            Self::Unavailable(msg) => write!(f, "position unavailable: {}", msg),
            Self::UnknownSubscription(id) => write!(f, "unknown subscription {}", id),
        }
    }
}

impl Error {
    /// Create a store error with path context.
    pub fn store(operation: StoreOperation, path: &DocumentPath, reason: impl fmt::Display) -> Self {
        Self::Store {
            operation,
            path: path.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Create a configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Whether the error came from the document store.
    pub fn is_store(&self) -> bool {
        matches!(self, Self::Store { .. })
    }
}

/// Result type alias using safetrail-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;
