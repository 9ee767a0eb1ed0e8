use async_trait::async_trait;
use uuid::Uuid;

use resole_shared::{
    Account, GeoPoint, Order, OrderStatus, PartnerStatus, PaymentStatus, PlatformSettings,
    Settlement, StatusChange,
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Invalid data: {0}")]
    Invalid(String),
    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Result of a conditional write. `Stale` carries the order as currently
/// persisted when the write's precondition no longer held.
#[derive(Debug, Clone)]
pub enum WriteOutcome {
    Applied(Order),
    Stale(Order),
}

impl WriteOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, WriteOutcome::Applied(_))
    }

    pub fn order(&self) -> &Order {
        match self {
            WriteOutcome::Applied(order) | WriteOutcome::Stale(order) => order,
        }
    }

    pub fn into_order(self) -> Order {
        match self {
            WriteOutcome::Applied(order) | WriteOutcome::Stale(order) => order,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct OrderFilter {
    pub requester_id: Option<Uuid>,
    pub cobbler_id: Option<Uuid>,
    pub status: Option<OrderStatus>,
    pub limit: Option<usize>,
}

impl OrderFilter {
    pub fn matches(&self, order: &Order) -> bool {
        if let Some(requester) = self.requester_id {
            if !order.requested_by(requester) {
                return false;
            }
        }
        if let Some(partner) = self.cobbler_id {
            if !order.assigned_to(partner) {
                return false;
            }
        }
        if let Some(status) = self.status {
            if order.status != status {
                return false;
            }
        }
        true
    }
}

/// Order persistence. Shared state is only changed through conditioned
/// writes, each applied atomically by the backend.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Fails with `Conflict` if the id or reference number already exists.
    async fn insert(&self, order: &Order) -> Result<(), StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<Order>, StoreError>;

    async fn find_by_reference(&self, reference_number: &str) -> Result<Option<Order>, StoreError>;

    /// Resolves any session ever attached to the order, not only the
    /// current one.
    async fn find_by_session(&self, session_id: &str) -> Result<Option<Order>, StoreError>;

    /// Pending orders without a partner, oldest first.
    async fn list_unassigned(&self) -> Result<Vec<Order>, StoreError>;

    /// Newest first.
    async fn list(&self, filter: &OrderFilter) -> Result<Vec<Order>, StoreError>;

    /// Applies only while `status = pending` and no partner is set.
    async fn assign_partner(
        &self,
        id: Uuid,
        partner_id: Uuid,
        change: StatusChange,
    ) -> Result<WriteOutcome, StoreError>;

    /// Applies only while the status still equals `expected`.
    async fn transition_status(
        &self,
        id: Uuid,
        expected: OrderStatus,
        change: StatusChange,
    ) -> Result<WriteOutcome, StoreError>;

    /// Applies unless the order is paid or cancelled; resets payment to
    /// pending. Earlier sessions stay resolvable through `find_by_session`.
    async fn attach_payment_session(
        &self,
        id: Uuid,
        session_id: &str,
    ) -> Result<WriteOutcome, StoreError>;

    /// Applies only while `payment_status = pending` and the order is not
    /// cancelled.
    async fn settle_payment(
        &self,
        id: Uuid,
        settlement: Settlement,
    ) -> Result<WriteOutcome, StoreError>;

    async fn set_payment_status(
        &self,
        id: Uuid,
        expected: PaymentStatus,
        next: PaymentStatus,
    ) -> Result<WriteOutcome, StoreError>;

    /// Caches the geocoded delivery point and clears any unresolvable mark.
    async fn set_delivery_location(&self, id: Uuid, point: GeoPoint) -> Result<(), StoreError>;

    /// Records that the delivery address has no geocoder match.
    async fn mark_address_unresolvable(&self, id: Uuid) -> Result<(), StoreError>;
}

#[async_trait]
pub trait AccountRepository: Send + Sync {
    /// Fails with `Conflict` on a duplicate email (case-insensitive).
    async fn create(&self, account: &Account) -> Result<(), StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<Account>, StoreError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, StoreError>;

    async fn delete(&self, id: Uuid) -> Result<(), StoreError>;
}

#[async_trait]
pub trait PartnerDirectory: Send + Sync {
    /// Approved partners with valid coordinates.
    async fn eligible_partners(&self) -> Result<Vec<Account>, StoreError>;

    async fn get_partner(&self, id: Uuid) -> Result<Option<Account>, StoreError>;

    async fn update_location(
        &self,
        partner_id: Uuid,
        address: &str,
        point: GeoPoint,
    ) -> Result<Account, StoreError>;

    async fn set_status(
        &self,
        partner_id: Uuid,
        status: PartnerStatus,
    ) -> Result<Account, StoreError>;

    async fn set_payout_account(
        &self,
        partner_id: Uuid,
        payout_account: &str,
    ) -> Result<Account, StoreError>;
}

#[async_trait]
pub trait SettingsRepository: Send + Sync {
    async fn current(&self) -> Result<PlatformSettings, StoreError>;

    /// Validates and stores `next` with the version bumped past the current one.
    async fn replace(&self, next: PlatformSettings) -> Result<PlatformSettings, StoreError>;
}
