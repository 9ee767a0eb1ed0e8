use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::assignment::{Assignment, AssignmentEngine};
use crate::notify::dispatch_quietly;
use crate::reference;
use resole_catalog::{CartLine, PricingEngine, PricingError, Quote};
use resole_core::credentials::{hash_password, CredentialError};
use resole_core::{
    AccountRepository, Notification, NotificationDispatcher, OrderRepository, ServiceCatalog,
    SettingsRepository, StoreError,
};
use resole_shared::models::events::OrderPlacedEvent;
use resole_shared::{Account, DeliveryOption, Masked, Order, Requester, Role};

const MAX_REFERENCE_ATTEMPTS: usize = 5;

#[derive(Debug, thiserror::Error)]
pub enum CheckoutError {
    #[error("{0}")]
    Validation(String),

    #[error("Could not mint a unique reference number")]
    ReferenceExhausted,

    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<PricingError> for CheckoutError {
    fn from(e: PricingError) -> Self {
        CheckoutError::Validation(e.to_string())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryInfo {
    #[serde(default)]
    pub delivery_option: DeliveryOption,
    pub delivery_address: String,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GuestDetails {
    pub name: String,
    pub email: Masked<String>,
    pub phone: Masked<String>,
    #[serde(default)]
    pub create_account: bool,
    #[serde(default)]
    pub password: Option<Masked<String>>,
}

#[derive(Debug, Clone)]
pub enum CheckoutIdentity {
    Account(Uuid),
    Guest(GuestDetails),
}

#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub lines: Vec<CartLine>,
    pub delivery: DeliveryInfo,
    pub identity: CheckoutIdentity,
}

/// Assignment result reported back to the requester. A failed assignment
/// does not fail checkout.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "assignment", rename_all = "snake_case")]
pub enum AssignmentStatus {
    Assigned { partner_id: Uuid },
    Unassigned { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckoutReceipt {
    pub order: Order,
    pub assignment: AssignmentStatus,
    pub created_account_id: Option<Uuid>,
    pub delivery_hours: u32,
}

/// Turns a cart into a persisted, priced order and attempts assignment.
pub struct CheckoutOrchestrator {
    catalog: Arc<dyn ServiceCatalog>,
    orders: Arc<dyn OrderRepository>,
    accounts: Arc<dyn AccountRepository>,
    settings: Arc<dyn SettingsRepository>,
    assignment: Arc<AssignmentEngine>,
    notifier: Arc<dyn NotificationDispatcher>,
}

impl CheckoutOrchestrator {
    pub fn new(
        catalog: Arc<dyn ServiceCatalog>,
        orders: Arc<dyn OrderRepository>,
        accounts: Arc<dyn AccountRepository>,
        settings: Arc<dyn SettingsRepository>,
        assignment: Arc<AssignmentEngine>,
        notifier: Arc<dyn NotificationDispatcher>,
    ) -> Self {
        Self { catalog, orders, accounts, settings, assignment, notifier }
    }

    #[tracing::instrument(
        name = "checkout",
        skip(self, request),
        fields(lines = request.lines.len())
    )]
    pub async fn checkout(
        &self,
        request: CheckoutRequest,
    ) -> Result<CheckoutReceipt, CheckoutError> {
        validate(&request)?;

        if let CheckoutIdentity::Account(account_id) = &request.identity {
            if self.accounts.get(*account_id).await?.is_none() {
                return Err(CheckoutError::Validation(format!("Unknown account {}", account_id)));
            }
        }

        let mut priced_lines = Vec::with_capacity(request.lines.len());
        for line in &request.lines {
            let offering = self.catalog.offering(line.service_id).await?.ok_or_else(|| {
                CheckoutError::Validation(format!("Unknown service {}", line.service_id))
            })?;
            priced_lines.push((offering, line.quantity));
        }

        // Pricing is fixed against this snapshot for the life of the order.
        let engine = PricingEngine::new(self.settings.current().await?);
        let quote = engine.quote(&priced_lines, request.delivery.delivery_option)?;

        let address = request.delivery.delivery_address.trim().to_string();
        let (requester, created_account_id) =
            self.resolve_requester(&request.identity, &address).await?;

        let notes = request.delivery.notes.clone();
        let order = match self.insert_order(requester, &quote, &address, notes).await {
            Ok(order) => order,
            Err(e) => {
                if let Some(account_id) = created_account_id {
                    self.discard_account(account_id).await;
                }
                return Err(e);
            }
        };

        info!(
            order_id = %order.id,
            reference = %order.reference_number,
            total_amount = order.total_amount,
            settings_version = order.pricing.settings_version,
            "Order placed"
        );
        dispatch_quietly(
            self.notifier.as_ref(),
            Notification::OrderPlaced(OrderPlacedEvent {
                order_id: order.id,
                reference_number: order.reference_number.clone(),
                requester_id: order.requester.account_id(),
                total_amount: order.total_amount,
                currency: order.currency.clone(),
                timestamp: Utc::now().timestamp(),
            }),
        )
        .await;

        let assignment = match self.assignment.assign(order.id).await {
            Ok(Assignment::Assigned { partner_id, .. })
            | Ok(Assignment::AlreadyAssigned { partner_id }) => {
                AssignmentStatus::Assigned { partner_id }
            }
            Err(e) => {
                warn!(order_id = %order.id, error = %e, "Order left unassigned");
                AssignmentStatus::Unassigned { reason: e.to_string() }
            }
        };

        let order = self.orders.get(order.id).await?.unwrap_or(order);

        Ok(CheckoutReceipt {
            order,
            assignment,
            created_account_id,
            delivery_hours: quote.delivery_hours,
        })
    }

    /// Persist the order under a freshly minted reference number.
    async fn insert_order(
        &self,
        requester: Requester,
        quote: &Quote,
        address: &str,
        notes: Option<String>,
    ) -> Result<Order, CheckoutError> {
        for _ in 0..MAX_REFERENCE_ATTEMPTS {
            let candidate = reference::mint();
            if self.orders.find_by_reference(&candidate).await?.is_some() {
                warn!(reference = %candidate, "Reference number collision");
                continue;
            }

            let draft = Order::new(
                candidate,
                requester.clone(),
                quote.items.clone(),
                quote.delivery_option,
                address.to_string(),
                quote.amounts,
                quote.pricing.clone(),
            )
            .with_notes(notes.clone());

            match self.orders.insert(&draft).await {
                Ok(()) => return Ok(draft),
                Err(StoreError::Conflict(msg)) => {
                    warn!(conflict = %msg, "Order insert collided, minting a new reference");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(CheckoutError::ReferenceExhausted)
    }

    /// Remove an account created by a checkout whose order was never stored,
    /// so the guest can retry with the same email.
    async fn discard_account(&self, account_id: Uuid) {
        match self.accounts.delete(account_id).await {
            Ok(()) => info!(account_id = %account_id, "Discarded account from failed checkout"),
            Err(e) => warn!(
                account_id = %account_id,
                error = %e,
                "Failed to discard account from failed checkout"
            ),
        }
    }

    /// Creates the guest's account first when requested, so the order only
    /// ever references an existing account.
    async fn resolve_requester(
        &self,
        identity: &CheckoutIdentity,
        address: &str,
    ) -> Result<(Requester, Option<Uuid>), CheckoutError> {
        let guest = match identity {
            CheckoutIdentity::Account(account_id) => {
                return Ok((Requester::Account { account_id: *account_id }, None));
            }
            CheckoutIdentity::Guest(guest) => guest,
        };

        if !guest.create_account {
            return Ok((
                Requester::Guest {
                    name: guest.name.trim().to_string(),
                    email: guest.email.clone(),
                    phone: guest.phone.clone(),
                },
                None,
            ));
        }

        let email = guest.email.expose().trim().to_ascii_lowercase();
        if self.accounts.find_by_email(&email).await?.is_some() {
            return Err(already_registered());
        }

        let password = guest.password.as_ref().map(|p| p.expose().as_str()).unwrap_or_default();
        let mut account = Account::new(Role::Client, email, guest.name.trim().to_string());
        account.phone = Some(guest.phone.expose().clone());
        account.address = Some(address.to_string());
        account.password_hash = Some(hash_password(password)?);

        match self.accounts.create(&account).await {
            Ok(()) => {}
            Err(StoreError::Conflict(_)) => return Err(already_registered()),
            Err(e) => return Err(e.into()),
        }
        info!(account_id = %account.id, "Account created during guest checkout");

        Ok((Requester::Account { account_id: account.id }, Some(account.id)))
    }
}

fn already_registered() -> CheckoutError {
    CheckoutError::Validation(
        "An account with this email already exists; please sign in to place the order".to_string(),
    )
}

fn validate(request: &CheckoutRequest) -> Result<(), CheckoutError> {
    if request.lines.is_empty() {
        return Err(CheckoutError::Validation("Cart is empty".to_string()));
    }
    if let Some(line) = request.lines.iter().find(|l| l.quantity == 0) {
        return Err(CheckoutError::Validation(format!(
            "Quantity for service {} must be at least 1",
            line.service_id
        )));
    }
    if request.delivery.delivery_address.trim().is_empty() {
        return Err(CheckoutError::Validation("Delivery address is required".to_string()));
    }

    if let CheckoutIdentity::Guest(guest) = &request.identity {
        if guest.name.trim().is_empty() {
            return Err(CheckoutError::Validation("Guest name is required".to_string()));
        }
        let email = guest.email.expose().trim();
        if email.is_empty() || !email.contains('@') {
            return Err(CheckoutError::Validation("A valid guest email is required".to_string()));
        }
        if guest.phone.expose().trim().is_empty() {
            return Err(CheckoutError::Validation("Guest phone is required".to_string()));
        }
        let has_password = guest
            .password
            .as_ref()
            .map(|p| !p.expose().is_empty())
            .unwrap_or(false);
        if guest.create_account && !has_password {
            return Err(CheckoutError::Validation(
                "A password is required to create an account".to_string(),
            ));
        }
    }

    Ok(())
}
