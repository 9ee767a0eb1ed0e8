use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use resole_order::{PaymentSessionHandle, PollDecision, PollStatus, SettlementError};
use resole_shared::{Order, PaymentStatus, SettlementSource};

use crate::error::AppError;
use crate::middleware::MaybeActor;
use crate::orders::{ensure_payer, visible_order};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateCheckoutSessionRequest {
    pub order_id: Uuid,
    /// Proof of ownership for guest orders.
    pub reference_number: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CheckoutStatusQuery {
    /// 1-based count of polls made by the client, including this one.
    #[serde(default = "first_attempt")]
    pub attempt: u32,
}

fn first_attempt() -> u32 {
    1
}

#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutState {
    Paid,
    Pending,
    /// Stop polling; confirmation will arrive by email.
    VerifyByEmail,
}

#[derive(Debug, Serialize)]
pub struct CheckoutStatusResponse {
    pub state: CheckoutState,
    pub order_id: Uuid,
    pub reference_number: String,
    pub payment_status: PaymentStatus,
    pub attempt: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commission: Option<i64>,
}

impl CheckoutStatusResponse {
    fn new(state: CheckoutState, order: &Order, attempt: u32) -> Self {
        Self {
            state,
            order_id: order.id,
            reference_number: order.reference_number.clone(),
            payment_status: order.payment_status,
            attempt,
            retry_after_ms: None,
            commission: None,
        }
    }
}

/// Processor push. Only the session id is used; its state is re-read from
/// the processor.
#[derive(Debug, Deserialize)]
pub struct WebhookEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: WebhookData,
}

#[derive(Debug, Deserialize)]
pub struct WebhookData {
    #[serde(alias = "id")]
    pub session_id: String,
}

/// POST /payments/create-checkout-session
pub async fn create_checkout_session(
    State(state): State<AppState>,
    MaybeActor(actor): MaybeActor,
    Json(req): Json<CreateCheckoutSessionRequest>,
) -> Result<Json<PaymentSessionHandle>, AppError> {
    let order = match actor {
        Some(actor) => {
            let order = visible_order(&state, &actor, req.order_id).await?;
            ensure_payer(&actor, &order)?;
            order
        }
        None => {
            let reference = req
                .reference_number
                .as_deref()
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .ok_or_else(|| AppError::AuthenticationError("Sign in or provide the order reference number".into()))?;
            state
                .orders
                .get(req.order_id)
                .await?
                .filter(|o| o.reference_number.eq_ignore_ascii_case(reference))
                .ok_or_else(|| AppError::NotFoundError(format!("Order {} not found", req.order_id)))?
        }
    };

    Ok(Json(state.settlement.create_session(order.id).await?))
}

/// GET /payments/checkout-status/{session_id}?attempt=N
/// One step of the client-driven poll.
pub async fn checkout_status(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<CheckoutStatusQuery>,
) -> Result<Json<CheckoutStatusResponse>, AppError> {
    let attempt = query.attempt.max(1);

    match state
        .settlement
        .reconcile_session(&session_id, SettlementSource::ClientPoll)
        .await
    {
        Ok(PollStatus::Confirmed(confirmation)) => {
            let mut response = CheckoutStatusResponse::new(CheckoutState::Paid, &confirmation.order, attempt);
            response.commission = Some(confirmation.commission);
            return Ok(Json(response));
        }
        Ok(PollStatus::AlreadyConfirmed(order)) => {
            let mut response = CheckoutStatusResponse::new(CheckoutState::Paid, &order, attempt);
            response.commission = Some(order.commission);
            return Ok(Json(response));
        }
        Ok(PollStatus::Pending) => {}
        Err(SettlementError::Processor(e)) => {
            warn!(session_id = %session_id, attempt, error = %e, "Processor status check failed, reporting pending");
        }
        Err(e) => return Err(e.into()),
    }

    let order = state
        .orders
        .find_by_session(&session_id)
        .await?
        .ok_or_else(|| AppError::NotFoundError(format!("Session {} not found", session_id)))?;

    let response = match state.poll_schedule.decide(attempt) {
        PollDecision::Retry { after } => {
            let mut response = CheckoutStatusResponse::new(CheckoutState::Pending, &order, attempt);
            response.retry_after_ms = Some(after.as_millis() as u64);
            response
        }
        PollDecision::GiveUp => {
            state.settlement.notify_verification_pending(&session_id, attempt).await?;
            CheckoutStatusResponse::new(CheckoutState::VerifyByEmail, &order, attempt)
        }
    };
    Ok(Json(response))
}

/// POST /payments/webhook
/// Acknowledges events it cannot act on so the processor stops retrying;
/// processor outages return 502 so the event is redelivered.
pub async fn webhook(
    State(state): State<AppState>,
    Json(event): Json<WebhookEvent>,
) -> Result<StatusCode, AppError> {
    let session_id = event.data.session_id;
    info!(event_type = %event.event_type, session_id = %session_id, "Payment webhook received");

    match state
        .settlement
        .reconcile_session(&session_id, SettlementSource::ProcessorCallback)
        .await
    {
        Ok(PollStatus::Confirmed(c)) => {
            info!(order_id = %c.order.id, "Payment confirmed by processor callback");
        }
        Ok(PollStatus::AlreadyConfirmed(_)) | Ok(PollStatus::Pending) => {}
        Err(SettlementError::OrderNotFound(_)) => {
            warn!(session_id = %session_id, "Webhook for unknown session ignored");
        }
        Err(SettlementError::SessionExpired) => {
            info!(session_id = %session_id, "Webhook reported an expired session");
        }
        Err(e) => return Err(e.into()),
    }

    Ok(StatusCode::OK)
}
