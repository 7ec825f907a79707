//! The shared-location record and its document encoding.

use core::fmt;
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::ParseResult;
#[cfg(feature = "serde")]
use crate::error::ParseError;
use crate::path::DocumentPath;
use crate::types::{Coordinates, ShareKind, Timestamp, UserKey};

/// Field map of a stored document (a JSON object).
#[cfg(feature = "serde")]
pub type Fields = serde_json::Map<String, serde_json::Value>;

/// Identifies one share: at most one record exists per (sender, recipient).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ShareKey {
    /// The user sharing their location.
    pub sender: UserKey,
    /// The user the location is shared with; owns the record's namespace.
    pub recipient: UserKey,
}

impl ShareKey {
    /// Create a share key.
    #[must_use]
    pub fn new(sender: UserKey, recipient: UserKey) -> Self {
        Self { sender, recipient }
    }

    /// `users/{recipient}/sharedLocations/{sender}`
    #[must_use]
    pub fn path(&self) -> DocumentPath {
        DocumentPath::shared_location(&self.recipient, &self.sender)
    }
}

impl fmt::Display for ShareKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.sender, self.recipient)
    }
}

/// A location shared by a sender with a recipient.
///
/// Stored at `users/{recipient}/sharedLocations/{sender}` with the field
/// names `type`, `coords`, `startedAt`, `updatedAt` and `expiresAt`.
/// One-time records written by older clients name the creation time
/// `timestamp`; both spellings decode into `started_at`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(rename_all = "camelCase")
)]
pub struct SharedLocationRecord {
    /// One-time or live.
    #[cfg_attr(feature = "serde", serde(rename = "type"))]
    pub kind: ShareKind,
    /// Last known position of the sender.
    pub coords: Coordinates,
    /// When the share was created.
    #[cfg_attr(feature = "serde", serde(alias = "timestamp"))]
    pub started_at: Timestamp,
    /// When the position was last refreshed (live shares only).
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "Option::is_none")
    )]
    pub updated_at: Option<Timestamp>,
    /// Deadline after which the record is stale. Never extended.
    pub expires_at: Timestamp,
}

impl SharedLocationRecord {
    /// A new live record expiring `duration` after `started_at`.
    #[must_use]
    pub fn live(coords: Coordinates, started_at: Timestamp, duration: Duration) -> Self {
        Self {
            kind: ShareKind::Live,
            coords,
            started_at,
            updated_at: None,
            expires_at: started_at.saturating_add(duration),
        }
    }

    /// A new one-time record.
    #[must_use]
    pub fn one_time(coords: Coordinates, created_at: Timestamp, expires_at: Timestamp) -> Self {
        Self {
            kind: ShareKind::OneTime,
            coords,
            started_at: created_at,
            updated_at: None,
            expires_at,
        }
    }

    /// Whether this is a live share.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.kind == ShareKind::Live
    }

    /// A record is stale once `now` reaches `expires_at`.
    #[must_use]
    pub fn is_expired_at(&self, now: Timestamp) -> bool {
        now >= self.expires_at
    }

    /// Time left until expiry, zero once expired.
    #[must_use]
    pub fn time_remaining(&self, now: Timestamp) -> Duration {
        self.expires_at.saturating_duration_since(now)
    }

    /// Copy with a new position and `updated_at`; kind, start and expiry unchanged.
    #[must_use]
    pub fn refreshed(&self, coords: Coordinates, now: Timestamp) -> Self {
        Self {
            coords,
            updated_at: Some(now),
            ..self.clone()
        }
    }

    /// Validate the record's coordinates.
    pub fn validate(&self) -> ParseResult<()> {
        self.coords.validate()
    }

    /// Encode into a document field map containing exactly the known fields.
    #[cfg(feature = "serde")]
    pub fn to_fields(&self) -> ParseResult<Fields> {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => Ok(map),
            Ok(other) => Err(ParseError::InvalidRecord(format!(
                "expected an object, got {}",
                other
            ))),
            Err(e) => Err(ParseError::InvalidRecord(e.to_string())),
        }
    }

    /// Decode from a document field map. Unknown fields are ignored.
    #[cfg(feature = "serde")]
    pub fn from_fields(fields: &Fields) -> ParseResult<Self> {
        let record: Self = serde_json::from_value(serde_json::Value::Object(fields.clone()))
            .map_err(|e| ParseError::InvalidRecord(e.to_string()))?;
        record.validate().map_err(|e| ParseError::InvalidRecord(e.to_string()))?;
        Ok(record)
    }
}
