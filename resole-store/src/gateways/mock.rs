//! In-process gateways for demo mode and tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use resole_core::{
    CheckoutSession, GatewayError, GeocodingGateway, PaymentProcessor, PayoutAccountRequest,
    SessionRequest, SessionState,
};
use resole_shared::GeoPoint;

fn normalize(address: &str) -> String {
    address.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// Geocoder backed by a fixed address table.
#[derive(Default)]
pub struct StaticGeocoder {
    places: HashMap<String, GeoPoint>,
    failing: AtomicBool,
    calls: AtomicU32,
}

impl StaticGeocoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, address: &str, point: GeoPoint) -> Self {
        self.places.insert(normalize(address), point);
        self
    }

    /// While set, every lookup fails with a transient timeout.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GeocodingGateway for StaticGeocoder {
    async fn geocode(&self, address: &str) -> Result<Option<GeoPoint>, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(GatewayError::Timeout);
        }
        Ok(self.places.get(&normalize(address)).copied())
    }
}

#[derive(Debug, Clone)]
struct MockSession {
    request: SessionRequest,
    state: SessionState,
}

/// Processor whose sessions are completed or expired by calling code.
#[derive(Default)]
pub struct MockPaymentProcessor {
    sessions: Mutex<HashMap<String, MockSession>>,
    payout_accounts: Mutex<HashMap<String, Uuid>>,
    unavailable: AtomicBool,
}

impl MockPaymentProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, every call fails with a transport error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Mark the session paid. Returns false for unknown sessions.
    pub async fn complete(&self, session_id: &str) -> bool {
        self.set_state(session_id, SessionState::Complete { paid: true }).await
    }

    pub async fn expire(&self, session_id: &str) -> bool {
        self.set_state(session_id, SessionState::Expired).await
    }

    pub async fn request_for(&self, session_id: &str) -> Option<SessionRequest> {
        self.sessions
            .lock()
            .await
            .get(session_id)
            .map(|s| s.request.clone())
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Partner that owns a connected account opened through this processor.
    pub async fn payout_account_owner(&self, account_id: &str) -> Option<Uuid> {
        self.payout_accounts.lock().await.get(account_id).copied()
    }

    async fn set_state(&self, session_id: &str, state: SessionState) -> bool {
        match self.sessions.lock().await.get_mut(session_id) {
            Some(session) => {
                session.state = state;
                true
            }
            None => false,
        }
    }

    fn check_available(&self) -> Result<(), GatewayError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(GatewayError::Transport("mock processor unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl PaymentProcessor for MockPaymentProcessor {
    async fn create_session(&self, request: &SessionRequest) -> Result<CheckoutSession, GatewayError> {
        self.check_available()?;

        let id = format!("cs_mock_{}", Uuid::new_v4().simple());
        self.sessions.lock().await.insert(
            id.clone(),
            MockSession { request: request.clone(), state: SessionState::Open },
        );

        Ok(CheckoutSession {
            url: format!("https://checkout.mock.local/pay/{}", id),
            id,
            expires_at: Some(Utc::now() + Duration::minutes(30)),
        })
    }

    async fn create_payout_account(
        &self,
        request: &PayoutAccountRequest,
    ) -> Result<String, GatewayError> {
        self.check_available()?;

        let id = format!("acct_mock_{}", Uuid::new_v4().simple());
        self.payout_accounts.lock().await.insert(id.clone(), request.partner_id);
        Ok(id)
    }

    async fn session_status(&self, session_id: &str) -> Result<SessionState, GatewayError> {
        self.check_available()?;
        self.sessions
            .lock()
            .await
            .get(session_id)
            .map(|s| s.state)
            .ok_or_else(|| GatewayError::NotFound(session_id.to_string()))
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_geocoder_normalizes_addresses() {
        let geocoder = StaticGeocoder::new().with("Main  St 1,  Zurich", GeoPoint::new(2.0, 3.0));
        assert_eq!(
            geocoder.geocode("main st 1, zurich").await.unwrap(),
            Some(GeoPoint::new(2.0, 3.0))
        );
        assert_eq!(geocoder.geocode("elsewhere").await.unwrap(), None);

        geocoder.set_failing(true);
        assert!(geocoder.geocode("main st 1, zurich").await.is_err());
        assert_eq!(geocoder.calls(), 3);
    }

    #[tokio::test]
    async fn test_mock_processor_lifecycle() {
        let processor = MockPaymentProcessor::new();
        let request = SessionRequest {
            order_id: Uuid::new_v4(),
            reference_number: "REF-00000001".into(),
            amount: 4500,
            currency: "CHF".into(),
            application_fee: 600,
            destination: None,
            description: "test".into(),
            success_url: "ok".into(),
            cancel_url: "cancel".into(),
        };

        let session = processor.create_session(&request).await.unwrap();
        assert_eq!(processor.session_status(&session.id).await.unwrap(), SessionState::Open);

        assert!(processor.complete(&session.id).await);
        assert_eq!(
            processor.session_status(&session.id).await.unwrap(),
            SessionState::Complete { paid: true }
        );
        assert!(!processor.expire("cs_unknown").await);
        assert!(matches!(
            processor.session_status("cs_unknown").await,
            Err(GatewayError::NotFound(_))
        ));
    }
}
