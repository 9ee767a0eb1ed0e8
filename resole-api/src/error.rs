use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use resole_core::credentials::CredentialError;
use resole_core::StoreError;
use resole_order::{AssignmentError, CheckoutError, SettlementError, TransitionError};

#[derive(Debug)]
pub enum AppError {
    AuthenticationError(String),
    AuthorizationError(String),
    ValidationError(String),
    NotFoundError(String),
    ConflictError(String),
    /// The order stays valid and is picked up again by the assignment sweep.
    UnassignedError(String),
    GoneError(String),
    UpstreamError(String),
    InternalServerError(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::AuthenticationError(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::AuthorizationError(msg) => (StatusCode::FORBIDDEN, msg),
            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFoundError(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::ConflictError(msg) => (StatusCode::CONFLICT, msg),
            AppError::UnassignedError(msg) => {
                let body = Json(json!({
                    "error": msg,
                    "retryable": true,
                    "hint": "The order remains pending and will be assigned once a partner is available",
                }));
                return (StatusCode::CONFLICT, body).into_response();
            }
            AppError::GoneError(msg) => (StatusCode::GONE, msg),
            AppError::UpstreamError(msg) => {
                tracing::warn!("Upstream failure: {}", msg);
                (StatusCode::BAD_GATEWAY, msg)
            }
            AppError::InternalServerError(msg) => {
                tracing::error!("Internal Server Error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error".to_string())
            }
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(msg) => AppError::NotFoundError(msg),
            StoreError::Conflict(msg) => AppError::ConflictError(msg),
            StoreError::Invalid(msg) => AppError::ValidationError(msg),
            StoreError::Backend(msg) => AppError::InternalServerError(msg),
        }
    }
}

impl From<CredentialError> for AppError {
    fn from(err: CredentialError) -> Self {
        AppError::InternalServerError(err.to_string())
    }
}

impl From<CheckoutError> for AppError {
    fn from(err: CheckoutError) -> Self {
        match err {
            CheckoutError::Validation(msg) => AppError::ValidationError(msg),
            CheckoutError::Store(e) => e.into(),
            e @ (CheckoutError::ReferenceExhausted | CheckoutError::Credential(_)) => {
                AppError::InternalServerError(e.to_string())
            }
        }
    }
}

impl From<AssignmentError> for AppError {
    fn from(err: AssignmentError) -> Self {
        match err {
            e @ AssignmentError::OrderNotFound(_) => AppError::NotFoundError(e.to_string()),
            e @ AssignmentError::GeocodeFailure(_) => AppError::UpstreamError(e.to_string()),
            e @ AssignmentError::NoPartnerAvailable => AppError::UnassignedError(e.to_string()),
            e @ AssignmentError::NotAssignable(_) => AppError::ConflictError(e.to_string()),
            e @ AssignmentError::PartnerIneligible(_) => AppError::ValidationError(e.to_string()),
            AssignmentError::Store(e) => e.into(),
        }
    }
}

impl From<TransitionError> for AppError {
    fn from(err: TransitionError) -> Self {
        match err {
            e @ TransitionError::OrderNotFound(_) => AppError::NotFoundError(e.to_string()),
            e @ TransitionError::Unauthorized { .. } => AppError::AuthorizationError(e.to_string()),
            e @ (TransitionError::InvalidTransition { .. }
            | TransitionError::PaymentRequired
            | TransitionError::Conflict(_)) => AppError::ConflictError(e.to_string()),
            TransitionError::Assignment(e) => e.into(),
            TransitionError::Store(e) => e.into(),
        }
    }
}

impl From<SettlementError> for AppError {
    fn from(err: SettlementError) -> Self {
        match err {
            e @ (SettlementError::OrderNotFound(_) | SettlementError::PartnerNotFound(_)) => {
                AppError::NotFoundError(e.to_string())
            }
            e @ (SettlementError::AlreadyConfirmed { .. } | SettlementError::NotPayable(_)) => {
                AppError::ConflictError(e.to_string())
            }
            e @ SettlementError::SessionExpired => AppError::GoneError(e.to_string()),
            e @ (SettlementError::PaymentSession(_) | SettlementError::Processor(_)) => {
                AppError::UpstreamError(e.to_string())
            }
            e @ SettlementError::Pricing(_) => AppError::InternalServerError(e.to_string()),
            SettlementError::Store(e) => e.into(),
        }
    }
}
