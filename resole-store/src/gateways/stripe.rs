use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use super::{reject, transport_error};
use resole_core::{
    CheckoutSession, GatewayError, PaymentProcessor, PayoutAccountRequest, SessionRequest,
    SessionState,
};

/// Hosted checkout sessions with destination charges for the partner split.
pub struct StripeProcessor {
    client: Client,
    api_base: String,
    secret_key: String,
    connect_country: String,
}

#[derive(Debug, Deserialize)]
struct AccountObject {
    id: String,
}

#[derive(Debug, Deserialize)]
struct SessionObject {
    id: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    expires_at: Option<i64>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    payment_status: Option<String>,
}

impl StripeProcessor {
    pub fn new(api_base: &str, secret_key: &str, timeout: Duration) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(transport_error)?;

        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            secret_key: secret_key.to_string(),
            connect_country: "CH".to_string(),
        })
    }

    /// Country of the Express accounts opened for partners.
    pub fn with_connect_country(mut self, country: &str) -> Self {
        self.connect_country = country.to_ascii_uppercase();
        self
    }

    fn account_form(&self, request: &PayoutAccountRequest) -> Vec<(String, String)> {
        vec![
            ("type".to_string(), "express".to_string()),
            ("country".to_string(), self.connect_country.clone()),
            ("email".to_string(), request.email.clone()),
            ("business_type".to_string(), "individual".to_string()),
            ("capabilities[card_payments][requested]".to_string(), "true".to_string()),
            ("capabilities[transfers][requested]".to_string(), "true".to_string()),
            ("metadata[partner_id]".to_string(), request.partner_id.to_string()),
        ]
    }

    fn form(request: &SessionRequest) -> Vec<(String, String)> {
        let mut form = vec![
            ("mode".to_string(), "payment".to_string()),
            ("success_url".to_string(), request.success_url.clone()),
            ("cancel_url".to_string(), request.cancel_url.clone()),
            ("client_reference_id".to_string(), request.reference_number.clone()),
            ("line_items[0][quantity]".to_string(), "1".to_string()),
            (
                "line_items[0][price_data][currency]".to_string(),
                request.currency.to_ascii_lowercase(),
            ),
            (
                "line_items[0][price_data][unit_amount]".to_string(),
                request.amount.to_string(),
            ),
            (
                "line_items[0][price_data][product_data][name]".to_string(),
                request.description.clone(),
            ),
            ("metadata[order_id]".to_string(), request.order_id.to_string()),
            ("metadata[reference_number]".to_string(), request.reference_number.clone()),
        ];

        if let Some(destination) = &request.destination {
            form.push((
                "payment_intent_data[application_fee_amount]".to_string(),
                request.application_fee.to_string(),
            ));
            form.push((
                "payment_intent_data[transfer_data][destination]".to_string(),
                destination.clone(),
            ));
        }
        form
    }

    fn state_of(session: &SessionObject) -> SessionState {
        match session.status.as_deref() {
            Some("complete") => SessionState::Complete {
                paid: session.payment_status.as_deref() == Some("paid"),
            },
            Some("expired") => SessionState::Expired,
            _ => SessionState::Open,
        }
    }
}

#[async_trait]
impl PaymentProcessor for StripeProcessor {
    async fn create_session(&self, request: &SessionRequest) -> Result<CheckoutSession, GatewayError> {
        let response = self
            .client
            .post(format!("{}/v1/checkout/sessions", self.api_base))
            .bearer_auth(&self.secret_key)
            .form(&Self::form(request))
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(reject(response).await);
        }

        let session: SessionObject = response.json().await.map_err(transport_error)?;
        let url = session
            .url
            .ok_or_else(|| GatewayError::Decode("session has no redirect url".to_string()))?;

        Ok(CheckoutSession {
            id: session.id,
            url,
            expires_at: session.expires_at.and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0)),
        })
    }

    async fn create_payout_account(
        &self,
        request: &PayoutAccountRequest,
    ) -> Result<String, GatewayError> {
        let response = self
            .client
            .post(format!("{}/v1/accounts", self.api_base))
            .bearer_auth(&self.secret_key)
            .form(&self.account_form(request))
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(reject(response).await);
        }

        let account: AccountObject = response.json().await.map_err(transport_error)?;
        Ok(account.id)
    }

    async fn session_status(&self, session_id: &str) -> Result<SessionState, GatewayError> {
        let response = self
            .client
            .get(format!("{}/v1/checkout/sessions/{}", self.api_base, session_id))
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(transport_error)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(GatewayError::NotFound(session_id.to_string()));
        }
        if !response.status().is_success() {
            return Err(reject(response).await);
        }

        let session: SessionObject = response.json().await.map_err(transport_error)?;
        Ok(Self::state_of(&session))
    }

    fn name(&self) -> &'static str {
        "stripe"
    }
}
