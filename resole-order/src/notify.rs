use resole_core::{Notification, NotificationDispatcher};

/// Send a notification, logging instead of failing when the dispatcher errors.
pub(crate) async fn dispatch_quietly(
    notifier: &dyn NotificationDispatcher,
    notification: Notification,
) {
    let kind = notification.kind();
    if let Err(e) = notifier.dispatch(notification).await {
        tracing::warn!(kind, error = %e, "Notification dispatch failed");
    }
}
