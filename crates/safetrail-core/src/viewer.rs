//! Recipient-side view of the locations shared with them.
//!
//! Readers hold to the same expiry rule as the watch: a live record whose
//! deadline has passed is dead and gets deleted on sight. Expired one-time
//! records are only hidden; they belong to no watch and are simply stale.

use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, warn};

use safetrail_types::{DocumentPath, ShareKind, SharedLocationRecord, Timestamp, UserKey};

use crate::error::Result;
use crate::notify::{SenderName, lookup_sender_name};
use crate::traits::{Clock, DocumentStore};

/// Name shown for a sender without a user document.
pub const UNKNOWN_SENDER_NAME: &str = "Unknown";

/// Name shown for a sender whose user document has no name.
pub const UNNAMED_SENDER_NAME: &str = "Unnamed";

/// A location currently shared with the viewer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveShare {
    pub sender: UserKey,
    pub sender_name: String,
    pub record: SharedLocationRecord,
}

impl ActiveShare {
    /// Short status line, e.g. `Live - 42 mins left`.
    pub fn describe(&self, now: Timestamp) -> String {
        let kind = match self.record.kind {
            ShareKind::Live => "Live",
            ShareKind::OneTime => "One-time",
        };
        if self.record.is_expired_at(now) {
            return format!("{} - expired", kind);
        }
        let minutes = self.record.time_remaining(now).as_secs() / 60;
        let unit = if minutes == 1 { "min" } else { "mins" };
        format!("{} - {} {} left", kind, minutes, unit)
    }

    /// Time left until the share expires.
    pub fn time_remaining(&self, now: Timestamp) -> Duration {
        self.record.time_remaining(now)
    }
}

/// List the unexpired shares `recipient` can see, sorted by sender.
///
/// Undecodable documents are skipped. Expired live records are deleted;
/// a failed delete is logged and the record is still hidden.
pub async fn active_shares(
    store: &dyn DocumentStore,
    clock: &dyn Clock,
    recipient: &UserKey,
) -> Result<Vec<ActiveShare>> {
    let collection = DocumentPath::shared_locations(recipient);
    let documents = store.list(&collection).await?;
    let now = clock.now();

    let mut visible = Vec::with_capacity(documents.len());
    for (id, fields) in documents {
        let sender = match UserKey::new(id.as_str()) {
            Ok(sender) => sender,
            Err(e) => {
                warn!("Skipping share {}/{}: {}", collection, id, e);
                continue;
            }
        };
        let record = match SharedLocationRecord::from_fields(&fields) {
            Ok(record) => record,
            Err(e) => {
                warn!("Skipping undecodable share {}/{}: {}", collection, id, e);
                continue;
            }
        };

        if record.is_expired_at(now) {
            if record.is_live() {
                let path = DocumentPath::shared_location(recipient, &sender);
                match store.delete(&path).await {
                    Ok(()) => debug!("Deleted expired live share {}", path),
                    Err(e) => warn!("Failed to delete expired live share {}: {}", path, e),
                }
            }
            continue;
        }
        visible.push((sender, record));
    }

    let names = join_all(visible.iter().map(|(sender, _)| async move {
        match lookup_sender_name(store, sender).await {
            Ok(name) => name,
            Err(e) => {
                warn!("Sender name lookup for {} failed: {}", sender, e);
                SenderName::Missing
            }
        }
    }))
    .await;

    let mut shares: Vec<ActiveShare> = visible
        .into_iter()
        .zip(names)
        .map(|((sender, record), name)| ActiveShare {
            sender_name: match name {
                SenderName::Named(name) => name,
                SenderName::Unnamed => UNNAMED_SENDER_NAME.to_string(),
                SenderName::Missing => UNKNOWN_SENDER_NAME.to_string(),
            },
            sender,
            record,
        })
        .collect();
    shares.sort_by(|a, b| a.sender.as_str().cmp(b.sender.as_str()));
    Ok(shares)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{ManualClock, MemoryDocumentStore};
    use safetrail_types::{Coordinates, ShareKey};
    use serde_json::json;

    fn user(key: &str) -> UserKey {
        UserKey::new(key).unwrap()
    }

    fn live(start: i64, secs: u64) -> SharedLocationRecord {
        SharedLocationRecord::live(
            Coordinates::new(1.0, 2.0).unwrap(),
            Timestamp::from_millis(start),
            Duration::from_secs(secs),
        )
    }

    #[test]
    fn test_describe() {
        let share = ActiveShare {
            sender: user("s1"),
            sender_name: "Sam".into(),
            record: live(0, 3600),
        };
        assert_eq!(share.describe(Timestamp::from_millis(0)), "Live - 60 mins left");
        assert_eq!(share.describe(Timestamp::from_millis(3_530_000)), "Live - 1 min left");
        assert_eq!(share.describe(Timestamp::from_millis(3_590_000)), "Live - 0 mins left");
        assert_eq!(share.describe(Timestamp::from_millis(3_600_000)), "Live - expired");

        let share = ActiveShare {
            record: SharedLocationRecord::one_time(
                Coordinates::new(1.0, 2.0).unwrap(),
                Timestamp::from_millis(0),
                Timestamp::from_millis(300_000),
            ),
            ..share
        };
        assert_eq!(share.describe(Timestamp::from_millis(0)), "One-time - 5 mins left");
        assert_eq!(share.describe(Timestamp::from_millis(400_000)), "One-time - expired");
    }

    #[tokio::test]
    async fn test_active_shares_filters_and_names() {
        let store = MemoryDocumentStore::new();
        let clock = ManualClock::new(Timestamp::from_millis(1_000_000));
        let r1 = user("r1");

        // live, active, named
        store.put_record(&ShareKey::new(user("amy"), r1.clone()), &live(900_000, 3600)).await;
        store.put(&DocumentPath::user(&user("amy")), json!({"name": "Amy"})).await;
        // live, expired: deleted
        store.put_record(&ShareKey::new(user("bob"), r1.clone()), &live(0, 60)).await;
        // one-time, expired: hidden but kept
        let stale = SharedLocationRecord::one_time(
            Coordinates::new(1.0, 2.0).unwrap(),
            Timestamp::from_millis(0),
            Timestamp::from_millis(300_000),
        );
        store.put_record(&ShareKey::new(user("cat"), r1.clone()), &stale).await;
        // garbage: skipped
        store
            .put(&DocumentPath::shared_location(&r1, &user("dan")), json!({"type": "live"}))
            .await;
        // user doc without a name
        store.put_record(&ShareKey::new(user("eve"), r1.clone()), &live(1_000_000, 60)).await;
        store.put(&DocumentPath::user(&user("eve")), json!({"email": "e@x"})).await;
        // no user doc
        store.put_record(&ShareKey::new(user("fay"), r1.clone()), &live(1_000_000, 60)).await;

        let shares = active_shares(&store, &clock, &r1).await.unwrap();
        let summary: Vec<(&str, &str)> = shares
            .iter()
            .map(|s| (s.sender.as_str(), s.sender_name.as_str()))
            .collect();
        assert_eq!(
            summary,
            vec![("amy", "Amy"), ("eve", "Unnamed"), ("fay", "Unknown")]
        );

        assert!(store.document(&ShareKey::new(user("bob"), r1.clone()).path()).await.is_none());
        assert!(store.document(&ShareKey::new(user("cat"), r1.clone()).path()).await.is_some());
        assert!(store.document(&ShareKey::new(user("dan"), r1.clone()).path()).await.is_some());
    }

    #[tokio::test]
    async fn test_active_shares_list_failure() {
        let store = MemoryDocumentStore::new();
        store.set_fail_reads(true);
        let clock = ManualClock::new(Timestamp::from_millis(0));
        assert!(active_shares(&store, &clock, &user("r1")).await.is_err());
    }

    #[tokio::test]
    async fn test_active_shares_hides_expired_when_delete_fails() {
        let store = MemoryDocumentStore::new();
        let clock = ManualClock::new(Timestamp::from_millis(1_000_000));
        let r1 = user("r1");
        store.put_record(&ShareKey::new(user("bob"), r1.clone()), &live(0, 60)).await;
        store.set_fail_deletes(true);

        let shares = active_shares(&store, &clock, &r1).await.unwrap();
        assert!(shares.is_empty());
        assert_eq!(store.len().await, 1);
    }
}
