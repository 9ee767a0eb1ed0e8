use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use resole_catalog::CartLine;
use resole_core::OrderFilter;
use resole_order::state_machine::is_related;
use resole_order::{
    CheckoutIdentity, CheckoutReceipt, CheckoutRequest, Confirmation, ConfirmTarget, DeliveryInfo,
    GuestDetails, PaymentSessionHandle, TransitionOutcome,
};
use resole_shared::{Actor, Masked, Order, OrderStatus, SettlementSource};

use crate::error::AppError;
use crate::middleware::AuthActor;
use crate::state::AppState;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub service_id: Uuid,
    #[serde(flatten)]
    pub delivery: DeliveryInfo,
}

#[derive(Debug, Deserialize)]
pub struct BulkOrderRequest {
    pub items: Vec<CartLine>,
    #[serde(flatten)]
    pub delivery: DeliveryInfo,
}

#[derive(Debug, Deserialize)]
pub struct GuestOrderRequest {
    pub items: Vec<CartLine>,
    #[serde(flatten)]
    pub delivery: DeliveryInfo,
    pub guest_name: String,
    pub guest_email: Masked<String>,
    pub guest_phone: Masked<String>,
    #[serde(default)]
    pub create_account: bool,
    #[serde(default)]
    pub password: Option<Masked<String>>,
}

#[derive(Debug, Deserialize)]
pub struct ListOrdersQuery {
    pub status: Option<OrderStatus>,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct AcceptOrderRequest {
    pub partner_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct TransitionResponse {
    pub order: Order,
    pub changed: bool,
}

impl From<TransitionOutcome> for TransitionResponse {
    fn from(outcome: TransitionOutcome) -> Self {
        let changed = matches!(outcome, TransitionOutcome::Applied(_));
        Self { order: outcome.into_order(), changed }
    }
}

fn client_id(actor: &Actor) -> Result<Uuid, AppError> {
    match actor {
        Actor::Client { id } => Ok(*id),
        _ => Err(AppError::AuthorizationError("Only clients can place orders".into())),
    }
}

/// Load an order the caller may see. Orders outside the caller's view are
/// reported as missing.
pub(crate) async fn visible_order(state: &AppState, actor: &Actor, order_id: Uuid) -> Result<Order, AppError> {
    state
        .orders
        .get(order_id)
        .await?
        .filter(|order| is_related(actor, order))
        .ok_or_else(|| AppError::NotFoundError(format!("Order {} not found", order_id)))
}

/// Requester or admin, the parties allowed to pay for an order.
pub(crate) fn ensure_payer(actor: &Actor, order: &Order) -> Result<(), AppError> {
    match actor {
        Actor::Admin { .. } => Ok(()),
        Actor::Client { id } if order.requested_by(*id) => Ok(()),
        _ => Err(AppError::AuthorizationError("Only the requester can pay for this order".into())),
    }
}

// ============================================================================
// Checkout Handlers
// ============================================================================

/// POST /orders
pub async fn create_order(
    State(state): State<AppState>,
    AuthActor(actor): AuthActor,
    Json(req): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<CheckoutReceipt>), AppError> {
    let receipt = state
        .checkout
        .checkout(CheckoutRequest {
            lines: vec![CartLine::single(req.service_id)],
            delivery: req.delivery,
            identity: CheckoutIdentity::Account(client_id(&actor)?),
        })
        .await?;

    Ok((StatusCode::CREATED, Json(receipt)))
}

/// POST /orders/bulk
pub async fn create_bulk_order(
    State(state): State<AppState>,
    AuthActor(actor): AuthActor,
    Json(req): Json<BulkOrderRequest>,
) -> Result<(StatusCode, Json<CheckoutReceipt>), AppError> {
    let receipt = state
        .checkout
        .checkout(CheckoutRequest {
            lines: req.items,
            delivery: req.delivery,
            identity: CheckoutIdentity::Account(client_id(&actor)?),
        })
        .await?;

    Ok((StatusCode::CREATED, Json(receipt)))
}

/// POST /orders/guest
pub async fn create_guest_order(
    State(state): State<AppState>,
    Json(req): Json<GuestOrderRequest>,
) -> Result<(StatusCode, Json<CheckoutReceipt>), AppError> {
    let identity = CheckoutIdentity::Guest(GuestDetails {
        name: req.guest_name,
        email: req.guest_email,
        phone: req.guest_phone,
        create_account: req.create_account,
        password: req.password,
    });

    let receipt = state
        .checkout
        .checkout(CheckoutRequest { lines: req.items, delivery: req.delivery, identity })
        .await?;

    Ok((StatusCode::CREATED, Json(receipt)))
}

// ============================================================================
// Query Handlers
// ============================================================================

/// GET /orders
/// Clients see their own orders, partners the ones assigned to them.
pub async fn list_orders(
    State(state): State<AppState>,
    AuthActor(actor): AuthActor,
    Query(query): Query<ListOrdersQuery>,
) -> Result<Json<Vec<Order>>, AppError> {
    let mut filter = OrderFilter {
        status: query.status,
        limit: query.limit,
        ..OrderFilter::default()
    };
    match actor {
        Actor::Client { id } => filter.requester_id = Some(id),
        Actor::Partner { id } => filter.cobbler_id = Some(id),
        Actor::Admin { .. } | Actor::System => {}
    }

    Ok(Json(state.orders.list(&filter).await?))
}

/// GET /orders/{id}
pub async fn get_order(
    State(state): State<AppState>,
    AuthActor(actor): AuthActor,
    Path(order_id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(visible_order(&state, &actor, order_id).await?))
}

// ============================================================================
// Lifecycle Handlers
// ============================================================================

/// POST /orders/{id}/accept
/// Optional body `{ "partner_id": ... }` forces a specific partner.
pub async fn accept_order(
    State(state): State<AppState>,
    AuthActor(actor): AuthActor,
    Path(order_id): Path<Uuid>,
    body: Bytes,
) -> Result<Json<TransitionResponse>, AppError> {
    let partner_id = if body.is_empty() {
        None
    } else {
        serde_json::from_slice::<AcceptOrderRequest>(&body)
            .map_err(|e| AppError::ValidationError(format!("Invalid request body: {}", e)))?
            .partner_id
    };

    let outcome = state.state_machine.accept(order_id, partner_id, actor).await?;
    Ok(Json(outcome.into()))
}

/// PATCH /orders/{id}/status?status=X
pub async fn update_status(
    State(state): State<AppState>,
    AuthActor(actor): AuthActor,
    Path(order_id): Path<Uuid>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<TransitionResponse>, AppError> {
    let target: OrderStatus = query
        .status
        .parse()
        .map_err(|e: resole_shared::ParseEnumError| AppError::ValidationError(e.to_string()))?;

    let outcome = state.state_machine.transition(order_id, target, actor).await?;
    Ok(Json(outcome.into()))
}

// ============================================================================
// Payment Handlers
// ============================================================================

/// POST /orders/{id}/payment
pub async fn create_payment(
    State(state): State<AppState>,
    AuthActor(actor): AuthActor,
    Path(order_id): Path<Uuid>,
) -> Result<Json<PaymentSessionHandle>, AppError> {
    let order = visible_order(&state, &actor, order_id).await?;
    ensure_payer(&actor, &order)?;

    Ok(Json(state.settlement.create_session(order.id).await?))
}

/// POST /orders/{id}/confirm
/// Direct confirmation, used when no hosted checkout is involved.
pub async fn confirm_payment(
    State(state): State<AppState>,
    AuthActor(actor): AuthActor,
    Path(order_id): Path<Uuid>,
) -> Result<Json<Confirmation>, AppError> {
    let order = visible_order(&state, &actor, order_id).await?;
    ensure_payer(&actor, &order)?;

    let confirmation = state
        .settlement
        .confirm(ConfirmTarget::Order(order.id), SettlementSource::Direct)
        .await?;
    Ok(Json(confirmation))
}
