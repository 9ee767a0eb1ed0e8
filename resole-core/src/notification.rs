use async_trait::async_trait;

use crate::GatewayError;
use resole_shared::models::events::{
    OrderPaidEvent, OrderPlacedEvent, PartnerAssignedEvent, PaymentVerificationPendingEvent,
};

#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    OrderPlaced(OrderPlacedEvent),
    PartnerAssigned(PartnerAssignedEvent),
    PaymentConfirmed(OrderPaidEvent),
    PaymentVerificationPending(PaymentVerificationPendingEvent),
}

impl Notification {
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::OrderPlaced(_) => "order_placed",
            Notification::PartnerAssigned(_) => "partner_assigned",
            Notification::PaymentConfirmed(_) => "payment_confirmed",
            Notification::PaymentVerificationPending(_) => "payment_verification_pending",
        }
    }
}

/// Outbound email/SMS. Callers log failures and carry on.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn dispatch(&self, notification: Notification) -> Result<(), GatewayError>;
}
