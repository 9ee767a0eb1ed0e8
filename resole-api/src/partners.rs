use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use resole_order::PayoutAccount;
use resole_shared::{Account, Actor, PartnerStatus};

use crate::error::AppError;
use crate::middleware::{require_admin, AuthActor};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct UpdateAddressRequest {
    pub address: String,
}

/// PUT /cobbler/address
/// Geocodes the partner's workshop address. Stored coordinates are left
/// untouched when the address cannot be resolved.
pub async fn update_address(
    State(state): State<AppState>,
    AuthActor(actor): AuthActor,
    Json(req): Json<UpdateAddressRequest>,
) -> Result<Json<Account>, AppError> {
    let Actor::Partner { id } = actor else {
        return Err(AppError::AuthorizationError("Only partners have a workshop address".into()));
    };

    let address = req.address.trim();
    if address.is_empty() {
        return Err(AppError::ValidationError("Address is required".into()));
    }

    let point = state.assignment.resolve_address(address).await?;
    let partner = state.partners.update_location(id, address, point).await?;
    info!(partner_id = %id, lat = point.lat, lon = point.lon, "Partner location refreshed");

    Ok(Json(partner))
}

/// POST /cobbler/payout-account
/// Connects the partner to the processor so their orders are paid out by
/// split payment. Returns the existing account when already connected.
pub async fn connect_payout_account(
    State(state): State<AppState>,
    AuthActor(actor): AuthActor,
) -> Result<Json<PayoutAccount>, AppError> {
    let Actor::Partner { id } = actor else {
        return Err(AppError::AuthorizationError("Only partners receive payouts".into()));
    };

    Ok(Json(state.settlement.connect_payout_account(id).await?))
}

/// POST /admin/partners/{id}/approve
/// A partner whose address cannot be geocoded is still approved but stays
/// out of matching until the address is refreshed.
pub async fn approve_partner(
    State(state): State<AppState>,
    AuthActor(actor): AuthActor,
    Path(partner_id): Path<Uuid>,
) -> Result<Json<Account>, AppError> {
    require_admin(&actor)?;

    let partner = state
        .partners
        .get_partner(partner_id)
        .await?
        .ok_or_else(|| AppError::NotFoundError(format!("Partner {} not found", partner_id)))?;

    if partner.location.is_none() {
        match partner.address.as_deref().filter(|a| !a.trim().is_empty()) {
            Some(address) => match state.assignment.resolve_address(address).await {
                Ok(point) => {
                    state.partners.update_location(partner_id, address, point).await?;
                }
                Err(e) => warn!(partner_id = %partner_id, error = %e, "Approving partner without coordinates"),
            },
            None => warn!(partner_id = %partner_id, "Approving partner without an address"),
        }
    }

    let approved = state.partners.set_status(partner_id, PartnerStatus::Approved).await?;
    info!(partner_id = %partner_id, admin = %actor, "Partner approved");
    Ok(Json(approved))
}

/// POST /admin/partners/{id}/reject
pub async fn reject_partner(
    State(state): State<AppState>,
    AuthActor(actor): AuthActor,
    Path(partner_id): Path<Uuid>,
) -> Result<Json<Account>, AppError> {
    require_admin(&actor)?;

    let rejected = state.partners.set_status(partner_id, PartnerStatus::Rejected).await?;
    info!(partner_id = %partner_id, admin = %actor, "Partner rejected");
    Ok(Json(rejected))
}
