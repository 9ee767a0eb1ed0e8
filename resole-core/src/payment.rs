use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::GatewayError;

/// Everything the processor needs to open a hosted checkout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRequest {
    pub order_id: Uuid,
    pub reference_number: String,
    pub amount: i64,
    pub currency: String,
    /// Platform share kept by the processor on a split payment.
    pub application_fee: i64,
    /// Connected account receiving the remainder. `None` collects the full
    /// amount on the platform account.
    pub destination: Option<String>,
    pub description: String,
    pub success_url: String,
    pub cancel_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub url: String,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    Open,
    Complete { paid: bool },
    Expired,
}

/// A partner asking for a connected account to receive split payouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutAccountRequest {
    pub partner_id: Uuid,
    pub email: String,
}

#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    async fn create_session(&self, request: &SessionRequest) -> Result<CheckoutSession, GatewayError>;

    /// Opens a connected account and returns its processor id, used as the
    /// `destination` of later sessions.
    async fn create_payout_account(
        &self,
        request: &PayoutAccountRequest,
    ) -> Result<String, GatewayError>;

    /// Authoritative state of a session as the processor sees it.
    async fn session_status(&self, session_id: &str) -> Result<SessionState, GatewayError>;

    fn name(&self) -> &'static str;
}
