use axum::{extract::State, Json};
use serde_json::{json, Value};

use resole_order::SweepReport;
use resole_shared::PlatformSettings;

use crate::error::AppError;
use crate::middleware::{require_admin, AuthActor};
use crate::state::AppState;

/// GET /settings
pub async fn get_settings(
    State(state): State<AppState>,
    AuthActor(_): AuthActor,
) -> Result<Json<PlatformSettings>, AppError> {
    Ok(Json(state.settings.current().await?))
}

/// PUT /settings
/// Orders already placed keep the pricing they were created with.
pub async fn update_settings(
    State(state): State<AppState>,
    AuthActor(actor): AuthActor,
    Json(next): Json<PlatformSettings>,
) -> Result<Json<PlatformSettings>, AppError> {
    require_admin(&actor)?;

    let stored = state.settings.replace(next).await?;
    tracing::info!(
        version = stored.version,
        commission_rate_bps = stored.commission_rate_bps,
        admin = %actor,
        "Platform settings updated"
    );
    Ok(Json(stored))
}

/// POST /admin/assignments/sweep
pub async fn run_sweep(
    State(state): State<AppState>,
    AuthActor(actor): AuthActor,
) -> Result<Json<SweepReport>, AppError> {
    require_admin(&actor)?;
    Ok(Json(state.assignment.sweep().await?))
}

/// GET /health
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
