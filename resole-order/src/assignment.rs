use std::sync::Arc;

use chrono::Utc;
use futures_util::future::join_all;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::geo::haversine_km;
use crate::notify::dispatch_quietly;
use crate::retry::RetryPolicy;
use resole_core::{
    GatewayError, GeocodingGateway, Notification, NotificationDispatcher, OrderRepository,
    PartnerDirectory, StoreError, WriteOutcome,
};
use resole_shared::models::events::PartnerAssignedEvent;
use resole_shared::{Account, Actor, GeoPoint, Order, OrderStatus, PartnerStatus, StatusChange};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Assignment {
    Assigned { partner_id: Uuid, distance_km: Option<f64> },
    AlreadyAssigned { partner_id: Uuid },
}

impl Assignment {
    pub fn partner_id(&self) -> Uuid {
        match self {
            Assignment::Assigned { partner_id, .. }
            | Assignment::AlreadyAssigned { partner_id } => *partner_id,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AssignmentError {
    #[error("Order not found: {0}")]
    OrderNotFound(Uuid),

    #[error("Delivery address could not be geocoded: {0}")]
    GeocodeFailure(String),

    #[error("No approved partner with valid coordinates is available")]
    NoPartnerAvailable,

    #[error("Order is {0} and can no longer be assigned")]
    NotAssignable(OrderStatus),

    #[error("Partner {0} is not approved")]
    PartnerIneligible(Uuid),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AssignmentError {
    /// Failures that leave the order assignable for a later attempt.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AssignmentError::GeocodeFailure(_) | AssignmentError::NoPartnerAvailable
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub assigned: usize,
    pub no_partner: usize,
    pub geocode_failed: usize,
    /// Left out of the sweep because an earlier lookup found no match.
    pub unresolvable: usize,
    pub skipped: usize,
}

enum Resolution {
    Point(GeoPoint),
    /// The geocoder answered but the address has no usable match.
    Unresolvable(String),
}

/// Pick the eligible partner closest to `point`. Ties go to the earlier
/// registration, then the lower id.
pub fn select_nearest(point: GeoPoint, partners: &[Account]) -> Option<(&Account, f64)> {
    partners
        .iter()
        .filter(|p| p.is_matchable())
        .filter_map(|p| p.location.map(|loc| (p, haversine_km(point, loc))))
        .min_by(|(a, da), (b, db)| {
            da.total_cmp(db)
                .then_with(|| a.created_at.cmp(&b.created_at))
                .then_with(|| a.id.cmp(&b.id))
        })
}

/// Matches pending orders to the nearest approved partner.
pub struct AssignmentEngine {
    orders: Arc<dyn OrderRepository>,
    partners: Arc<dyn PartnerDirectory>,
    geocoder: Arc<dyn GeocodingGateway>,
    notifier: Arc<dyn NotificationDispatcher>,
    retry: RetryPolicy,
}

impl AssignmentEngine {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        partners: Arc<dyn PartnerDirectory>,
        geocoder: Arc<dyn GeocodingGateway>,
        notifier: Arc<dyn NotificationDispatcher>,
    ) -> Self {
        Self {
            orders,
            partners,
            geocoder,
            notifier,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Geocode an address with the bounded retry policy.
    pub async fn resolve_address(&self, address: &str) -> Result<GeoPoint, AssignmentError> {
        match self.lookup(address).await? {
            Resolution::Point(point) => Ok(point),
            Resolution::Unresolvable(reason) => Err(AssignmentError::GeocodeFailure(reason)),
        }
    }

    /// Gateway errors come back as `Err`; a definitive miss is `Unresolvable`.
    async fn lookup(&self, address: &str) -> Result<Resolution, AssignmentError> {
        let address = address.trim();
        if address.is_empty() {
            return Ok(Resolution::Unresolvable("address is empty".to_string()));
        }

        let resolved = self
            .retry
            .run(|| self.geocoder.geocode(address))
            .await
            .map_err(|e: GatewayError| AssignmentError::GeocodeFailure(e.to_string()))?;

        Ok(match resolved {
            Some(point) if point.is_valid() => Resolution::Point(point),
            Some(_) => {
                Resolution::Unresolvable("geocoder returned out-of-range coordinates".to_string())
            }
            None => Resolution::Unresolvable(format!("no match for address '{}'", address)),
        })
    }

    #[tracing::instrument(name = "assignment::assign", skip(self))]
    pub async fn assign(&self, order_id: Uuid) -> Result<Assignment, AssignmentError> {
        let order = self.load(order_id).await?;
        if let Some(done) = Self::check_assignable(&order)? {
            return Ok(done);
        }

        let point = match order.delivery_location {
            Some(point) => point,
            None => match self.lookup(&order.delivery_address).await? {
                Resolution::Point(point) => {
                    if let Err(e) = self.orders.set_delivery_location(order.id, point).await {
                        warn!(
                            order_id = %order.id,
                            error = %e,
                            "Failed to cache delivery location"
                        );
                    }
                    point
                }
                Resolution::Unresolvable(reason) => {
                    if let Err(e) = self.orders.mark_address_unresolvable(order.id).await {
                        warn!(
                            order_id = %order.id,
                            error = %e,
                            "Failed to mark address unresolvable"
                        );
                    }
                    return Err(AssignmentError::GeocodeFailure(reason));
                }
            },
        };

        let partners = self.partners.eligible_partners().await?;
        let (partner, distance) =
            select_nearest(point, &partners).ok_or(AssignmentError::NoPartnerAvailable)?;

        let change = StatusChange::new(OrderStatus::Pending, OrderStatus::Accepted, Actor::System)
            .with_note(format!("nearest partner at {:.2} km", distance));

        self.commit(&order, partner.id, Some(distance), change).await
    }

    /// Assign to a specific partner, bypassing the distance search.
    #[tracing::instrument(name = "assignment::assign_to", skip(self))]
    pub async fn assign_to(
        &self,
        order_id: Uuid,
        partner_id: Uuid,
        actor: Actor,
    ) -> Result<Assignment, AssignmentError> {
        let order = self.load(order_id).await?;
        if let Some(done) = Self::check_assignable(&order)? {
            return Ok(done);
        }

        let partner = self
            .partners
            .get_partner(partner_id)
            .await?
            .filter(|p| p.partner_status() == Some(PartnerStatus::Approved))
            .ok_or(AssignmentError::PartnerIneligible(partner_id))?;

        let distance = match (order.delivery_location, partner.location) {
            (Some(a), Some(b)) => Some(haversine_km(a, b)),
            _ => None,
        };
        let change = StatusChange::new(OrderStatus::Pending, OrderStatus::Accepted, actor)
            .with_note("manual assignment");

        self.commit(&order, partner.id, distance, change).await
    }

    /// Re-attempt every unassigned order. Orders are processed concurrently
    /// and each one is guarded by the conditional write. Orders whose address
    /// already failed to resolve are left to a manual assignment.
    pub async fn sweep(&self) -> Result<SweepReport, AssignmentError> {
        let pending = self.orders.list_unassigned().await?;
        if pending.is_empty() {
            return Ok(SweepReport::default());
        }

        let (unresolvable, retry): (Vec<&Order>, Vec<&Order>) =
            pending.iter().partition(|o| o.has_unresolvable_address());
        let results = join_all(retry.iter().map(|o| self.assign(o.id))).await;

        let mut report = SweepReport { unresolvable: unresolvable.len(), ..Default::default() };
        for result in results {
            match result {
                Ok(Assignment::Assigned { .. }) => report.assigned += 1,
                Ok(Assignment::AlreadyAssigned { .. }) => report.skipped += 1,
                Err(AssignmentError::NoPartnerAvailable) => report.no_partner += 1,
                Err(AssignmentError::GeocodeFailure(_)) => report.geocode_failed += 1,
                Err(e) => {
                    warn!(error = %e, "Sweep skipped order");
                    report.skipped += 1;
                }
            }
        }

        info!(
            assigned = report.assigned,
            no_partner = report.no_partner,
            geocode_failed = report.geocode_failed,
            unresolvable = report.unresolvable,
            skipped = report.skipped,
            "Assignment sweep finished"
        );
        Ok(report)
    }

    async fn load(&self, order_id: Uuid) -> Result<Order, AssignmentError> {
        self.orders
            .get(order_id)
            .await?
            .ok_or(AssignmentError::OrderNotFound(order_id))
    }

    fn check_assignable(order: &Order) -> Result<Option<Assignment>, AssignmentError> {
        if let Some(partner_id) = order.cobbler_id {
            return Ok(Some(Assignment::AlreadyAssigned { partner_id }));
        }
        if order.status != OrderStatus::Pending {
            return Err(AssignmentError::NotAssignable(order.status));
        }
        Ok(None)
    }

    async fn commit(
        &self,
        order: &Order,
        partner_id: Uuid,
        distance_km: Option<f64>,
        change: StatusChange,
    ) -> Result<Assignment, AssignmentError> {
        match self.orders.assign_partner(order.id, partner_id, change).await? {
            WriteOutcome::Applied(updated) => {
                info!(
                    order_id = %updated.id,
                    reference = %updated.reference_number,
                    partner_id = %partner_id,
                    distance_km = ?distance_km,
                    "Order assigned to partner"
                );
                dispatch_quietly(
                    self.notifier.as_ref(),
                    Notification::PartnerAssigned(PartnerAssignedEvent {
                        order_id: updated.id,
                        reference_number: updated.reference_number.clone(),
                        partner_id,
                        distance_km,
                        timestamp: Utc::now().timestamp(),
                    }),
                )
                .await;
                Ok(Assignment::Assigned { partner_id, distance_km })
            }
            WriteOutcome::Stale(current) => match current.cobbler_id {
                Some(existing) => Ok(Assignment::AlreadyAssigned { partner_id: existing }),
                None => Err(AssignmentError::NotAssignable(current.status)),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{Harness, DELIVERY_ADDRESS, UNKNOWN_ADDRESS};
    use chrono::Duration as ChronoDuration;
    use resole_shared::Role;

    fn partner_at(point: GeoPoint, registered_minutes_ago: i64) -> Account {
        let email = format!("{}@example.com", Uuid::new_v4());
        let mut p = Account::new(Role::Partner, email, "P".into());
        p.location = Some(point);
        p.partner = Some(resole_shared::PartnerProfile {
            status: PartnerStatus::Approved,
            payout_account: None,
        });
        p.created_at = Utc::now() - ChronoDuration::minutes(registered_minutes_ago);
        p
    }

    #[test]
    fn test_select_nearest_picks_minimum_distance() {
        let origin = GeoPoint::new(47.37, 8.54);
        let near = partner_at(GeoPoint::new(47.38, 8.55), 1);
        let far = partner_at(GeoPoint::new(46.20, 6.14), 100);
        let partners = vec![far, near.clone()];

        let (chosen, distance) = select_nearest(origin, &partners).unwrap();
        assert_eq!(chosen.id, near.id);
        assert!(distance < 2.0);
    }

    #[test]
    fn test_select_nearest_ties_break_by_registration_then_id() {
        let point = GeoPoint::new(10.0, 10.0);
        let newer = partner_at(point, 5);
        let older = partner_at(point, 50);
        let partners = vec![newer.clone(), older.clone()];
        assert_eq!(select_nearest(point, &partners).unwrap().0.id, older.id);

        let mut a = partner_at(point, 10);
        let mut b = partner_at(point, 10);
        b.created_at = a.created_at;
        if a.id > b.id {
            std::mem::swap(&mut a, &mut b);
        }
        let partners = vec![b, a.clone()];
        assert_eq!(select_nearest(point, &partners).unwrap().0.id, a.id);
    }

    #[test]
    fn test_select_nearest_ignores_ineligible() {
        let point = GeoPoint::new(0.0, 0.0);
        let mut pending = partner_at(GeoPoint::new(0.0, 0.001), 1);
        pending.partner = Some(resole_shared::PartnerProfile {
            status: PartnerStatus::Pending,
            payout_account: None,
        });
        let broken = partner_at(GeoPoint::new(f64::NAN, 0.0), 1);

        assert!(select_nearest(point, &[pending.clone(), broken.clone()]).is_none());

        let approved = partner_at(GeoPoint::new(5.0, 5.0), 1);
        let partners = vec![pending, broken, approved.clone()];
        assert_eq!(select_nearest(point, &partners).unwrap().0.id, approved.id);
    }

    #[tokio::test]
    async fn test_assign_sets_partner_and_accepts() {
        let h = Harness::new();
        let partner = h
            .partner("p@example.com", Some(GeoPoint::new(2.0, 3.0)), PartnerStatus::Approved)
            .await;
        let order = h.pending_order(Uuid::new_v4(), DELIVERY_ADDRESS).await;

        let result = h.assignment.assign(order.id).await.unwrap();
        assert!(matches!(
            result,
            Assignment::Assigned { partner_id, .. } if partner_id == partner.id
        ));

        let stored = h.reload(order.id).await;
        assert_eq!(stored.status, OrderStatus::Accepted);
        assert_eq!(stored.cobbler_id, Some(partner.id));
        assert!(stored.delivery_location.is_some());
        assert_eq!(stored.history.last().map(|c| c.actor), Some(Actor::System));
        assert_eq!(h.notifier.kinds().await, vec!["partner_assigned"]);
    }

    #[tokio::test]
    async fn test_second_assign_reports_already_assigned() {
        let h = Harness::new();
        let partner = h
            .partner("p@example.com", Some(GeoPoint::new(2.0, 3.0)), PartnerStatus::Approved)
            .await;
        let order = h.pending_order(Uuid::new_v4(), DELIVERY_ADDRESS).await;

        h.assignment.assign(order.id).await.unwrap();
        let again = h.assignment.assign(order.id).await.unwrap();
        assert_eq!(again, Assignment::AlreadyAssigned { partner_id: partner.id });
    }

    #[tokio::test]
    async fn test_no_partner_leaves_order_pending() {
        let h = Harness::new();
        h.partner("far@example.com", None, PartnerStatus::Approved).await;
        h.partner("new@example.com", Some(GeoPoint::new(2.0, 3.0)), PartnerStatus::Pending).await;
        let order = h.pending_order(Uuid::new_v4(), DELIVERY_ADDRESS).await;

        let err = h.assignment.assign(order.id).await.unwrap_err();
        assert!(matches!(err, AssignmentError::NoPartnerAvailable));
        assert!(err.is_recoverable());

        let stored = h.reload(order.id).await;
        assert!(stored.is_unassigned());
        // Geocode result is cached for the retry.
        assert!(stored.delivery_location.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_geocode_failure_is_distinct_and_retried() {
        let h = Harness::new();
        h.partner("p@example.com", Some(GeoPoint::new(2.0, 3.0)), PartnerStatus::Approved).await;
        let order = h.pending_order(Uuid::new_v4(), DELIVERY_ADDRESS).await;

        h.geocoder.set_failing(true);
        let err = h.assignment.assign(order.id).await.unwrap_err();
        assert!(matches!(err, AssignmentError::GeocodeFailure(_)));
        assert_eq!(h.geocoder.calls(), 2);
        assert!(h.reload(order.id).await.is_unassigned());

        h.geocoder.set_failing(false);
        assert!(matches!(
            h.assignment.assign(order.id).await.unwrap(),
            Assignment::Assigned { .. }
        ));
    }

    #[tokio::test]
    async fn test_unresolvable_address_not_retried() {
        let h = Harness::new();
        h.partner("p@example.com", Some(GeoPoint::new(2.0, 3.0)), PartnerStatus::Approved).await;
        let order = h.pending_order(Uuid::new_v4(), UNKNOWN_ADDRESS).await;

        let err = h.assignment.assign(order.id).await.unwrap_err();
        assert!(matches!(err, AssignmentError::GeocodeFailure(_)));
        assert_eq!(h.geocoder.calls(), 1);
        assert!(h.reload(order.id).await.has_unresolvable_address());
    }

    #[tokio::test(start_paused = true)]
    async fn test_gateway_outage_does_not_mark_address() {
        let h = Harness::new();
        let order = h.pending_order(Uuid::new_v4(), DELIVERY_ADDRESS).await;

        h.geocoder.set_failing(true);
        h.assignment.assign(order.id).await.unwrap_err();
        assert!(!h.reload(order.id).await.has_unresolvable_address());

        h.geocoder.set_failing(false);
        let report = h.assignment.sweep().await.unwrap();
        assert_eq!(report.unresolvable, 0);
        assert_eq!(report.no_partner, 1);
    }

    #[tokio::test]
    async fn test_sweep_skips_unresolvable_address() {
        let h = Harness::new();
        h.partner("p@example.com", Some(GeoPoint::new(2.0, 3.0)), PartnerStatus::Approved).await;
        let order = h.pending_order(Uuid::new_v4(), UNKNOWN_ADDRESS).await;

        let first = h.assignment.sweep().await.unwrap();
        assert_eq!(first.geocode_failed, 1);
        assert_eq!(h.geocoder.calls(), 1);

        for _ in 0..3 {
            let report = h.assignment.sweep().await.unwrap();
            assert_eq!(report.unresolvable, 1);
            assert_eq!(report.geocode_failed, 0);
        }
        assert_eq!(h.geocoder.calls(), 1);

        // A direct assignment still looks the address up again.
        h.assignment.assign(order.id).await.unwrap_err();
        assert_eq!(h.geocoder.calls(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_assign_single_winner() {
        let h = Harness::new();
        h.partner("a@example.com", Some(GeoPoint::new(2.0, 3.0)), PartnerStatus::Approved).await;
        let order = h.pending_order(Uuid::new_v4(), DELIVERY_ADDRESS).await;

        let results = join_all((0..6).map(|_| h.assignment.assign(order.id))).await;
        let assigned = results
            .iter()
            .filter(|r| matches!(r, Ok(Assignment::Assigned { .. })))
            .count();
        assert_eq!(assigned, 1);
        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(h.reload(order.id).await.history.len(), 1);
    }

    #[tokio::test]
    async fn test_assign_to_requires_approved_partner() {
        let h = Harness::new();
        let pending = h
            .partner("p@example.com", Some(GeoPoint::new(2.0, 3.0)), PartnerStatus::Pending)
            .await;
        let order = h.pending_order(Uuid::new_v4(), DELIVERY_ADDRESS).await;
        let admin = Actor::Admin { id: Uuid::new_v4() };

        let err = h.assignment.assign_to(order.id, pending.id, admin).await.unwrap_err();
        assert!(matches!(err, AssignmentError::PartnerIneligible(_)));

        let approved = h.partner("ok@example.com", None, PartnerStatus::Approved).await;
        let result = h.assignment.assign_to(order.id, approved.id, admin).await.unwrap();
        assert_eq!(result.partner_id(), approved.id);
        assert_eq!(h.reload(order.id).await.history[0].actor, admin);
    }

    #[tokio::test]
    async fn test_cancelled_order_is_not_assignable() {
        let h = Harness::new();
        h.partner("p@example.com", Some(GeoPoint::new(2.0, 3.0)), PartnerStatus::Approved).await;
        let order = h.pending_order(Uuid::new_v4(), DELIVERY_ADDRESS).await;
        h.orders
            .transition_status(
                order.id,
                OrderStatus::Pending,
                StatusChange::new(OrderStatus::Pending, OrderStatus::Cancelled, Actor::System),
            )
            .await
            .unwrap();

        let err = h.assignment.assign(order.id).await.unwrap_err();
        assert!(matches!(err, AssignmentError::NotAssignable(OrderStatus::Cancelled)));
    }

    #[tokio::test]
    async fn test_sweep_reports_each_outcome() {
        let h = Harness::new();
        let a = h.pending_order(Uuid::new_v4(), DELIVERY_ADDRESS).await;
        let b = h.pending_order(Uuid::new_v4(), UNKNOWN_ADDRESS).await;

        let first = h.assignment.sweep().await.unwrap();
        assert_eq!(
            first,
            SweepReport {
                assigned: 0,
                no_partner: 1,
                geocode_failed: 1,
                unresolvable: 0,
                skipped: 0,
            }
        );

        h.partner("p@example.com", Some(GeoPoint::new(2.0, 3.0)), PartnerStatus::Approved).await;
        let second = h.assignment.sweep().await.unwrap();
        assert_eq!(second.assigned, 1);
        assert_eq!(second.geocode_failed, 0);
        assert_eq!(second.unresolvable, 1);

        assert!(!h.reload(a.id).await.is_unassigned());
        assert!(h.reload(b.id).await.is_unassigned());
        assert_eq!(h.assignment.sweep().await.unwrap().assigned, 0);
    }
}
