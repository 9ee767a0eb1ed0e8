use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::info;

use resole_core::{GatewayError, Notification, NotificationDispatcher};

/// Writes notifications to the log. Stands in for the mail service.
#[derive(Debug, Default, Clone)]
pub struct TracingNotifier;

#[async_trait]
impl NotificationDispatcher for TracingNotifier {
    async fn dispatch(&self, notification: Notification) -> Result<(), GatewayError> {
        let payload = serde_json::to_string(&notification)
            .map_err(|e| GatewayError::Decode(e.to_string()))?;
        info!(kind = notification.kind(), %payload, "Notification dispatched");
        Ok(())
    }
}

/// Keeps every notification for later inspection.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sent(&self) -> Vec<Notification> {
        self.sent.lock().await.clone()
    }

    pub async fn kinds(&self) -> Vec<&'static str> {
        self.sent.lock().await.iter().map(Notification::kind).collect()
    }
}

#[async_trait]
impl NotificationDispatcher for RecordingNotifier {
    async fn dispatch(&self, notification: Notification) -> Result<(), GatewayError> {
        self.sent.lock().await.push(notification);
        Ok(())
    }
}
