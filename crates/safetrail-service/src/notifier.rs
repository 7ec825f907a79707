//! Notification dispatchers for the service.

use async_trait::async_trait;
use tracing::info;

use safetrail_core::{Notification, NotificationDispatcher, Result, UserKey};

/// Writes notifications to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl NotificationDispatcher for LogNotifier {
    async fn notify(&self, recipient: &UserKey, notification: Notification) -> Result<()> {
        info!(
            recipient = %recipient,
            kind = %notification.data.location_type,
            "{}: {}",
            notification.title,
            notification.body
        );
        Ok(())
    }
}

/// Shows notifications on the local desktop.
///
/// The service runs on the recipient's machine in this mode, so the
/// recipient key is only logged.
#[cfg(feature = "notifications")]
#[derive(Debug, Clone, Copy, Default)]
pub struct DesktopNotifier;

#[cfg(feature = "notifications")]
#[async_trait]
impl NotificationDispatcher for DesktopNotifier {
    async fn notify(&self, recipient: &UserKey, notification: Notification) -> Result<()> {
        use safetrail_core::Error;

        let title = notification.title.clone();
        let shown = tokio::task::spawn_blocking(move || {
            notify_rust::Notification::new()
                .summary(&notification.title)
                .body(&notification.body)
                .appname("SafeTrail")
                .show()
                .map(|_| ())
                .map_err(|e| e.to_string())
        })
        .await
        .map_err(|e| Error::Notification(e.to_string()))?;

        shown.map_err(Error::Notification)?;
        tracing::debug!("Desktop notification for {} shown: {}", recipient, title);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use safetrail_core::ShareKind;

    #[tokio::test]
    async fn test_log_notifier_never_fails() {
        let notification = Notification::location_shared("Sam", ShareKind::OneTime, None);
        let recipient = UserKey::new("r1").unwrap();
        assert!(LogNotifier.notify(&recipient, notification).await.is_ok());
    }
}
