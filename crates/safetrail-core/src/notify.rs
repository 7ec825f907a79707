//! Share notifications and sender display names.
//!
//! When a location is shared, the recipient is told who shared it and for
//! how long. The sender's display name comes from the `name` field of their
//! `users/{sender}` document; lookups are best-effort and fall back to a
//! generic name.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use safetrail_types::{DocumentPath, ShareKind, UserKey};

use crate::error::Result;
use crate::traits::{DocumentStore, NotificationDispatcher};

/// Name used in notifications when the sender has no usable display name.
pub const FALLBACK_SENDER_NAME: &str = "Someone";

/// Value of [`NotificationData::kind`] for share notifications.
pub const LOCATION_SHARE_KIND: &str = "location_share";

const MILLIS_PER_HOUR: u128 = 3_600_000;

/// A local notification about a shared location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub data: NotificationData,
}

/// Structured metadata attached to a [`Notification`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationData {
    /// Always [`LOCATION_SHARE_KIND`].
    #[serde(rename = "type")]
    pub kind: String,
    pub sender_name: String,
    pub location_type: ShareKind,
    /// Rounded share duration in hours, live shares only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_hours: Option<u64>,
}

impl Notification {
    /// Build the notification for a new share.
    ///
    /// `duration` is only used for live shares.
    pub fn location_shared(sender_name: &str, kind: ShareKind, duration: Option<Duration>) -> Self {
        let (title, body, duration_hours) = match kind {
            ShareKind::Live => {
                let hours = duration.map(rounded_hours).unwrap_or(0);
                let plural = if hours > 1 { "s" } else { "" };
                (
                    "Live Location Shared",
                    format!(
                        "{} shared their live location with you for {} hour{}",
                        sender_name, hours, plural
                    ),
                    Some(hours),
                )
            }
            ShareKind::OneTime => (
                "Location Shared",
                format!("{} shared their current location with you", sender_name),
                None,
            ),
        };

        Self {
            title: title.to_string(),
            body,
            data: NotificationData {
                kind: LOCATION_SHARE_KIND.to_string(),
                sender_name: sender_name.to_string(),
                location_type: kind,
                duration_hours,
            },
        }
    }
}

/// Whole hours, rounding halves up.
fn rounded_hours(duration: Duration) -> u64 {
    let hours = (duration.as_millis() + MILLIS_PER_HOUR / 2) / MILLIS_PER_HOUR;
    u64::try_from(hours).unwrap_or(u64::MAX)
}

/// Result of looking up a user's display name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SenderName {
    /// The user document has a non-empty `name`.
    Named(String),
    /// The user document exists but has no usable `name`.
    Unnamed,
    /// No user document.
    Missing,
}

impl SenderName {
    /// The name, or `fallback` if there is none.
    pub fn or<'a>(&'a self, fallback: &'a str) -> &'a str {
        match self {
            Self::Named(name) => name,
            Self::Unnamed | Self::Missing => fallback,
        }
    }
}

/// Read the `name` field of `users/{user}`.
pub async fn lookup_sender_name(store: &dyn DocumentStore, user: &UserKey) -> Result<SenderName> {
    let Some(fields) = store.get(&DocumentPath::user(user)).await? else {
        return Ok(SenderName::Missing);
    };
    Ok(match fields.get("name").and_then(|v| v.as_str()).map(str::trim) {
        Some(name) if !name.is_empty() => SenderName::Named(name.to_string()),
        _ => SenderName::Unnamed,
    })
}

/// Resolve the sender's notification name; never fails.
pub(crate) async fn notification_sender_name(store: &dyn DocumentStore, sender: &UserKey) -> String {
    match lookup_sender_name(store, sender).await {
        Ok(name) => name.or(FALLBACK_SENDER_NAME).to_string(),
        Err(e) => {
            warn!("Sender name lookup for {} failed: {}", sender, e);
            FALLBACK_SENDER_NAME.to_string()
        }
    }
}

/// Dispatcher that discards every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

#[async_trait]
impl NotificationDispatcher for NoopNotifier {
    async fn notify(&self, recipient: &UserKey, notification: Notification) -> Result<()> {
        debug!("Dropping notification for {}: {}", recipient, notification.title);
        Ok(())
    }
}
