//! In-memory backends. Each conditional write runs under the map's write
//! lock, which gives the same single-winner guarantee as the SQL
//! `UPDATE ... WHERE` used by the PostgreSQL repositories.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use resole_catalog::ServiceOffering;
use resole_core::{
    AccountRepository, OrderFilter, OrderRepository, PartnerDirectory, ServiceCatalog,
    SettingsRepository, StoreError, WriteOutcome,
};
use resole_shared::{
    Account, GeoPoint, Order, OrderStatus, PartnerProfile, PartnerStatus, PaymentStatus,
    PlatformSettings, Role, Settlement, StatusChange,
};

#[derive(Default)]
struct OrderTables {
    orders: HashMap<Uuid, Order>,
    /// Every session ever attached, current or superseded.
    sessions: HashMap<String, Uuid>,
}

#[derive(Default)]
pub struct InMemoryOrderRepository {
    tables: RwLock<OrderTables>,
    unavailable: AtomicBool,
}

impl InMemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, every write fails with a backend error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Backend("order store unavailable".to_string()))
        } else {
            Ok(())
        }
    }

    /// Apply `update` if `precondition` holds, under the write lock.
    async fn conditional<P, U>(
        &self,
        id: Uuid,
        precondition: P,
        update: U,
    ) -> Result<WriteOutcome, StoreError>
    where
        P: FnOnce(&Order) -> bool,
        U: FnOnce(&mut Order),
    {
        self.check_available()?;
        let mut tables = self.tables.write().await;
        let order = tables
            .orders
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("order {}", id)))?;

        if !precondition(order) {
            return Ok(WriteOutcome::Stale(order.clone()));
        }
        update(order);
        order.updated_at = Utc::now();
        Ok(WriteOutcome::Applied(order.clone()))
    }

    async fn update_order<U>(&self, id: Uuid, update: U) -> Result<(), StoreError>
    where
        U: FnOnce(&mut Order),
    {
        self.check_available()?;
        let mut tables = self.tables.write().await;
        let order = tables
            .orders
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("order {}", id)))?;
        update(order);
        Ok(())
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn insert(&self, order: &Order) -> Result<(), StoreError> {
        self.check_available()?;
        let mut tables = self.tables.write().await;
        if tables.orders.contains_key(&order.id) {
            return Err(StoreError::Conflict(format!("order {} exists", order.id)));
        }
        if tables.orders.values().any(|o| o.reference_number == order.reference_number) {
            return Err(StoreError::Conflict(format!(
                "reference {} exists",
                order.reference_number
            )));
        }
        tables.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Order>, StoreError> {
        Ok(self.tables.read().await.orders.get(&id).cloned())
    }

    async fn find_by_reference(&self, reference_number: &str) -> Result<Option<Order>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .orders
            .values()
            .find(|o| o.reference_number == reference_number)
            .cloned())
    }

    async fn find_by_session(&self, session_id: &str) -> Result<Option<Order>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .sessions
            .get(session_id)
            .and_then(|id| tables.orders.get(id))
            .cloned())
    }

    async fn list_unassigned(&self) -> Result<Vec<Order>, StoreError> {
        let tables = self.tables.read().await;
        let mut pending: Vec<Order> =
            tables.orders.values().filter(|o| o.is_unassigned()).cloned().collect();
        pending.sort_by_key(|o| o.created_at);
        Ok(pending)
    }

    async fn list(&self, filter: &OrderFilter) -> Result<Vec<Order>, StoreError> {
        let tables = self.tables.read().await;
        let mut matched: Vec<Order> =
            tables.orders.values().filter(|o| filter.matches(o)).cloned().collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = filter.limit {
            matched.truncate(limit);
        }
        Ok(matched)
    }

    async fn assign_partner(
        &self,
        id: Uuid,
        partner_id: Uuid,
        change: StatusChange,
    ) -> Result<WriteOutcome, StoreError> {
        self.conditional(id, |o| o.is_unassigned(), |o| {
            o.cobbler_id = Some(partner_id);
            o.apply_status(change);
        })
        .await
    }

    async fn transition_status(
        &self,
        id: Uuid,
        expected: OrderStatus,
        change: StatusChange,
    ) -> Result<WriteOutcome, StoreError> {
        self.conditional(id, |o| o.status == expected, |o| o.apply_status(change))
            .await
    }

    async fn attach_payment_session(
        &self,
        id: Uuid,
        session_id: &str,
    ) -> Result<WriteOutcome, StoreError> {
        self.check_available()?;
        let mut tables = self.tables.write().await;
        let order = tables
            .orders
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("order {}", id)))?;

        if order.payment_status == PaymentStatus::Paid || order.status == OrderStatus::Cancelled {
            return Ok(WriteOutcome::Stale(order.clone()));
        }
        order.payment_session_id = Some(session_id.to_string());
        order.payment_status = PaymentStatus::Pending;
        order.updated_at = Utc::now();
        let updated = order.clone();

        tables.sessions.insert(session_id.to_string(), id);
        Ok(WriteOutcome::Applied(updated))
    }

    async fn settle_payment(
        &self,
        id: Uuid,
        settlement: Settlement,
    ) -> Result<WriteOutcome, StoreError> {
        self.conditional(
            id,
            |o| o.payment_status == PaymentStatus::Pending && o.status != OrderStatus::Cancelled,
            |o| {
                o.payment_status = PaymentStatus::Paid;
                o.commission = settlement.commission;
                o.settlement = Some(settlement);
            },
        )
        .await
    }

    async fn set_payment_status(
        &self,
        id: Uuid,
        expected: PaymentStatus,
        next: PaymentStatus,
    ) -> Result<WriteOutcome, StoreError> {
        self.conditional(id, |o| o.payment_status == expected, |o| o.payment_status = next)
            .await
    }

    async fn set_delivery_location(&self, id: Uuid, point: GeoPoint) -> Result<(), StoreError> {
        self.update_order(id, |o| {
            o.delivery_location = Some(point);
            o.address_unresolvable_at = None;
        })
        .await
    }

    async fn mark_address_unresolvable(&self, id: Uuid) -> Result<(), StoreError> {
        self.update_order(id, |o| o.address_unresolvable_at = Some(Utc::now()))
            .await
    }
}

/// Accounts keyed by id; partners are accounts with a partner profile.
#[derive(Default)]
pub struct InMemoryAccountRepository {
    accounts: RwLock<HashMap<Uuid, Account>>,
}

impl InMemoryAccountRepository {
    pub fn new() -> Self {
        Self::default()
    }

    async fn update_partner<F>(&self, partner_id: Uuid, update: F) -> Result<Account, StoreError>
    where
        F: FnOnce(&mut Account),
    {
        let mut accounts = self.accounts.write().await;
        let account = accounts
            .get_mut(&partner_id)
            .filter(|a| a.role == Role::Partner)
            .ok_or_else(|| StoreError::NotFound(format!("partner {}", partner_id)))?;
        if account.partner.is_none() {
            account.partner = Some(PartnerProfile {
                status: PartnerStatus::Pending,
                payout_account: None,
            });
        }
        update(account);
        Ok(account.clone())
    }
}

#[async_trait]
impl AccountRepository for InMemoryAccountRepository {
    async fn create(&self, account: &Account) -> Result<(), StoreError> {
        let mut accounts = self.accounts.write().await;
        if accounts.contains_key(&account.id) {
            return Err(StoreError::Conflict(format!("account {} exists", account.id)));
        }
        if accounts.values().any(|a| a.email.eq_ignore_ascii_case(&account.email)) {
            return Err(StoreError::Conflict("email already registered".to_string()));
        }
        accounts.insert(account.id, account.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Account>, StoreError> {
        Ok(self.accounts.read().await.get(&id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
        let accounts = self.accounts.read().await;
        Ok(accounts.values().find(|a| a.email.eq_ignore_ascii_case(email.trim())).cloned())
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        self.accounts
            .write()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(format!("account {}", id)))
    }
}

#[async_trait]
impl PartnerDirectory for InMemoryAccountRepository {
    async fn eligible_partners(&self) -> Result<Vec<Account>, StoreError> {
        let accounts = self.accounts.read().await;
        Ok(accounts.values().filter(|a| a.is_matchable()).cloned().collect())
    }

    async fn get_partner(&self, id: Uuid) -> Result<Option<Account>, StoreError> {
        let accounts = self.accounts.read().await;
        Ok(accounts.get(&id).filter(|a| a.role == Role::Partner).cloned())
    }

    async fn update_location(
        &self,
        partner_id: Uuid,
        address: &str,
        point: GeoPoint,
    ) -> Result<Account, StoreError> {
        if !point.is_valid() {
            return Err(StoreError::Invalid(format!("coordinates out of range: {:?}", point)));
        }
        self.update_partner(partner_id, |a| {
            a.address = Some(address.to_string());
            a.location = Some(point);
        })
        .await
    }

    async fn set_status(&self, partner_id: Uuid, status: PartnerStatus) -> Result<Account, StoreError> {
        self.update_partner(partner_id, |a| {
            if let Some(profile) = a.partner.as_mut() {
                profile.status = status;
            }
        })
        .await
    }

    async fn set_payout_account(
        &self,
        partner_id: Uuid,
        payout_account: &str,
    ) -> Result<Account, StoreError> {
        self.update_partner(partner_id, |a| {
            if let Some(profile) = a.partner.as_mut() {
                profile.payout_account = Some(payout_account.to_string());
            }
        })
        .await
    }
}

pub struct InMemorySettingsRepository {
    settings: RwLock<PlatformSettings>,
}

impl InMemorySettingsRepository {
    pub fn new(initial: PlatformSettings) -> Self {
        Self { settings: RwLock::new(initial) }
    }
}

impl Default for InMemorySettingsRepository {
    fn default() -> Self {
        Self::new(PlatformSettings::default())
    }
}

#[async_trait]
impl SettingsRepository for InMemorySettingsRepository {
    async fn current(&self) -> Result<PlatformSettings, StoreError> {
        Ok(self.settings.read().await.clone())
    }

    async fn replace(&self, mut next: PlatformSettings) -> Result<PlatformSettings, StoreError> {
        next.validate().map_err(StoreError::Invalid)?;
        let mut current = self.settings.write().await;
        next.version = current.version + 1;
        next.updated_at = Utc::now();
        *current = next.clone();
        Ok(next)
    }
}

#[derive(Default)]
pub struct InMemoryServiceCatalog {
    offerings: RwLock<HashMap<Uuid, ServiceOffering>>,
}

impl InMemoryServiceCatalog {
    pub fn new(seed: Vec<ServiceOffering>) -> Self {
        Self {
            offerings: RwLock::new(seed.into_iter().map(|o| (o.id, o)).collect()),
        }
    }

    pub async fn upsert(&self, offering: ServiceOffering) {
        self.offerings.write().await.insert(offering.id, offering);
    }
}

#[async_trait]
impl ServiceCatalog for InMemoryServiceCatalog {
    async fn offering(&self, id: Uuid) -> Result<Option<ServiceOffering>, StoreError> {
        Ok(self.offerings.read().await.get(&id).cloned())
    }

    async fn offerings(&self) -> Result<Vec<ServiceOffering>, StoreError> {
        let mut all: Vec<ServiceOffering> = self.offerings.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use resole_shared::{
        Actor, DeliveryOption, OrderAmounts, OrderItem, Requester, SettlementSource,
    };
    use std::sync::Arc;

    fn order(reference: &str) -> Order {
        Order::new(
            reference.to_string(),
            Requester::Account { account_id: Uuid::new_v4() },
            vec![OrderItem {
                offering_id: Uuid::new_v4(),
                name: "Resole".into(),
                unit_price: 4000,
                quantity: 1,
            }],
            DeliveryOption::Standard,
            "Main St 1".into(),
            OrderAmounts { service_subtotal: 4000, delivery_price: 500, commission: 600, total_amount: 4500 },
            PlatformSettings::default().snapshot(),
        )
    }

    fn settlement() -> Settlement {
        Settlement {
            commission: 600,
            partner_payout: 3900,
            payout_account: None,
            source: SettlementSource::Direct,
            settled_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_insert_rejects_duplicate_reference() {
        let repo = InMemoryOrderRepository::new();
        repo.insert(&order("REF-00000001")).await.unwrap();
        let err = repo.insert(&order("REF-00000001")).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_concurrent_assignment_has_single_winner() {
        let repo = Arc::new(InMemoryOrderRepository::new());
        let o = order("REF-00000002");
        let id = o.id;
        repo.insert(&o).await.unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let repo = repo.clone();
                let partner = Uuid::new_v4();
                tokio::spawn(async move {
                    let change = StatusChange::new(OrderStatus::Pending, OrderStatus::Accepted, Actor::System);
                    repo.assign_partner(id, partner, change).await.unwrap()
                })
            })
            .collect();

        let mut applied = 0;
        for h in handles {
            if h.await.unwrap().is_applied() {
                applied += 1;
            }
        }
        assert_eq!(applied, 1);

        let stored = repo.get(id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Accepted);
        assert!(stored.cobbler_id.is_some());
        assert_eq!(stored.history.len(), 1);
    }

    #[tokio::test]
    async fn test_settle_payment_only_once() {
        let repo = InMemoryOrderRepository::new();
        let o = order("REF-00000003");
        repo.insert(&o).await.unwrap();

        assert!(repo.settle_payment(o.id, settlement()).await.unwrap().is_applied());
        let second = repo.settle_payment(o.id, settlement()).await.unwrap();
        assert!(!second.is_applied());
        assert_eq!(second.order().payment_status, PaymentStatus::Paid);
    }

    #[tokio::test]
    async fn test_attach_session_resets_expired_and_refuses_paid() {
        let repo = InMemoryOrderRepository::new();
        let o = order("REF-00000004");
        repo.insert(&o).await.unwrap();

        repo.set_payment_status(o.id, PaymentStatus::Pending, PaymentStatus::Expired).await.unwrap();
        let out = repo.attach_payment_session(o.id, "cs_2").await.unwrap();
        assert!(out.is_applied());
        assert_eq!(out.order().payment_status, PaymentStatus::Pending);
        assert_eq!(repo.find_by_session("cs_2").await.unwrap().unwrap().id, o.id);

        repo.settle_payment(o.id, settlement()).await.unwrap();
        assert!(!repo.attach_payment_session(o.id, "cs_3").await.unwrap().is_applied());
    }

    #[tokio::test]
    async fn test_superseded_session_still_resolves() {
        let repo = InMemoryOrderRepository::new();
        let o = order("REF-00000005");
        repo.insert(&o).await.unwrap();

        repo.attach_payment_session(o.id, "cs_first").await.unwrap();
        repo.attach_payment_session(o.id, "cs_second").await.unwrap();

        let first = repo.find_by_session("cs_first").await.unwrap().unwrap();
        assert_eq!(first.id, o.id);
        assert_eq!(first.payment_session_id.as_deref(), Some("cs_second"));
        assert!(repo.find_by_session("cs_unknown").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cancelled_order_cannot_be_settled() {
        let repo = InMemoryOrderRepository::new();
        let o = order("REF-00000006");
        repo.insert(&o).await.unwrap();

        let change = StatusChange::new(OrderStatus::Pending, OrderStatus::Cancelled, Actor::System);
        repo.transition_status(o.id, OrderStatus::Pending, change).await.unwrap();

        let out = repo.settle_payment(o.id, settlement()).await.unwrap();
        assert!(!out.is_applied());
        assert_eq!(out.order().payment_status, PaymentStatus::Pending);
        assert!(out.order().settlement.is_none());
    }

    #[tokio::test]
    async fn test_location_clears_unresolvable_mark() {
        let repo = InMemoryOrderRepository::new();
        let o = order("REF-00000007");
        repo.insert(&o).await.unwrap();

        repo.mark_address_unresolvable(o.id).await.unwrap();
        assert!(repo.get(o.id).await.unwrap().unwrap().has_unresolvable_address());

        repo.set_delivery_location(o.id, GeoPoint::new(2.0, 3.0)).await.unwrap();
        let stored = repo.get(o.id).await.unwrap().unwrap();
        assert!(stored.address_unresolvable_at.is_none());
        assert!(!stored.has_unresolvable_address());
    }

    #[tokio::test]
    async fn test_unavailable_store_rejects_writes() {
        let repo = InMemoryOrderRepository::new();
        repo.set_unavailable(true);
        let err = repo.insert(&order("REF-00000008")).await.unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));
    }

    #[tokio::test]
    async fn test_missing_order_is_not_found() {
        let repo = InMemoryOrderRepository::new();
        let change = StatusChange::new(OrderStatus::Pending, OrderStatus::Cancelled, Actor::System);
        let err = repo
            .transition_status(Uuid::new_v4(), OrderStatus::Pending, change)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_email_uniqueness_is_case_insensitive() {
        let repo = InMemoryAccountRepository::new();
        repo.create(&Account::new(Role::Client, "Ana@Example.com".into(), "Ana".into()))
            .await
            .unwrap();
        let dup = Account::new(Role::Client, "ana@example.com".into(), "Ana 2".into());
        assert!(matches!(repo.create(&dup).await, Err(StoreError::Conflict(_))));
        assert!(repo.find_by_email("ANA@example.com").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_deleted_account_frees_email() {
        let repo = InMemoryAccountRepository::new();
        let account = Account::new(Role::Client, "ana@example.com".into(), "Ana".into());
        repo.create(&account).await.unwrap();

        repo.delete(account.id).await.unwrap();
        assert!(repo.find_by_email("ana@example.com").await.unwrap().is_none());
        assert!(matches!(repo.delete(account.id).await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_partner_becomes_eligible_after_approval_and_location() {
        let repo = InMemoryAccountRepository::new();
        let partner = Account::new(Role::Partner, "p@example.com".into(), "Atelier".into());
        repo.create(&partner).await.unwrap();
        assert!(repo.eligible_partners().await.unwrap().is_empty());

        repo.update_location(partner.id, "Main St 1", GeoPoint::new(2.0, 3.0)).await.unwrap();
        assert!(repo.eligible_partners().await.unwrap().is_empty());

        repo.set_status(partner.id, PartnerStatus::Approved).await.unwrap();
        assert_eq!(repo.eligible_partners().await.unwrap().len(), 1);

        let err = repo
            .update_location(partner.id, "Nowhere", GeoPoint::new(91.0, 0.0))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Invalid(_)));
    }

    #[tokio::test]
    async fn test_settings_replace_bumps_version_and_validates() {
        let repo = InMemorySettingsRepository::default();
        let mut next = repo.current().await.unwrap();
        next.commission_rate_bps = 2000;
        let stored = repo.replace(next).await.unwrap();
        assert_eq!(stored.version, 2);

        let mut bad = stored.clone();
        bad.commission_rate_bps = 20_000;
        assert!(matches!(repo.replace(bad).await, Err(StoreError::Invalid(_))));
        assert_eq!(repo.current().await.unwrap().commission_rate_bps, 2000);
    }
}
