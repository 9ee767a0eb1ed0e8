use uuid::Uuid;

use super::order::SettlementSource;

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct OrderPlacedEvent {
    pub order_id: Uuid,
    pub reference_number: String,
    pub requester_id: Option<Uuid>,
    pub total_amount: i64,
    pub currency: String,
    pub timestamp: i64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct PartnerAssignedEvent {
    pub order_id: Uuid,
    pub reference_number: String,
    pub partner_id: Uuid,
    pub distance_km: Option<f64>,
    pub timestamp: i64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct OrderPaidEvent {
    pub order_id: Uuid,
    pub reference_number: String,
    pub total_amount: i64,
    pub commission: i64,
    pub source: SettlementSource,
    pub timestamp: i64,
}

/// The client gave up polling; the requester will be told by email once the
/// processor confirms.
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct PaymentVerificationPendingEvent {
    pub order_id: Uuid,
    pub reference_number: String,
    pub session_id: String,
    pub attempts: u32,
    pub timestamp: i64,
}
