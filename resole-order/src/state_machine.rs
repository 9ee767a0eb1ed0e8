use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::assignment::{Assignment, AssignmentEngine, AssignmentError};
use resole_core::{OrderRepository, StoreError, WriteOutcome};
use resole_shared::{Actor, Order, OrderStatus, PaymentStatus, StatusChange};

/// Concurrent writers can race a transition; re-evaluate this many times
/// against the fresh state before giving up.
const MAX_WRITE_ATTEMPTS: usize = 3;

#[derive(Debug, thiserror::Error)]
pub enum TransitionError {
    #[error("Order not found: {0}")]
    OrderNotFound(Uuid),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error("{actor} may not move order to {to}")]
    Unauthorized { actor: Actor, to: OrderStatus },

    #[error("Order must be paid before work starts")]
    PaymentRequired,

    #[error("Order {0} kept changing concurrently; retry")]
    Conflict(Uuid),

    #[error(transparent)]
    Assignment(#[from] AssignmentError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone)]
pub enum TransitionOutcome {
    Applied(Order),
    /// The order was already in the requested status.
    Unchanged(Order),
}

impl TransitionOutcome {
    pub fn order(&self) -> &Order {
        match self {
            TransitionOutcome::Applied(o) | TransitionOutcome::Unchanged(o) => o,
        }
    }

    pub fn into_order(self) -> Order {
        match self {
            TransitionOutcome::Applied(o) | TransitionOutcome::Unchanged(o) => o,
        }
    }
}

/// Edges of the lifecycle graph.
pub fn is_allowed(from: OrderStatus, to: OrderStatus) -> bool {
    use OrderStatus::*;
    matches!(
        (from, to),
        (Pending, Accepted)
            | (Accepted, InProgress)
            | (InProgress, Shipped)
            | (Shipped, Delivered)
            | (Pending | Accepted | InProgress, Cancelled)
    )
}

/// Capability check: may `actor` move `order` into `to`?
pub fn authorize(actor: &Actor, order: &Order, to: OrderStatus) -> Result<(), TransitionError> {
    let allowed = match (actor, to) {
        (Actor::Admin { .. }, _) => true,
        (Actor::System, OrderStatus::Accepted) => true,
        (
            Actor::Partner { id },
            OrderStatus::InProgress | OrderStatus::Shipped | OrderStatus::Delivered,
        ) => order.assigned_to(*id),
        (Actor::Client { id }, OrderStatus::Cancelled) => {
            order.requested_by(*id) && order.status == OrderStatus::Pending
        }
        _ => false,
    };

    if allowed {
        Ok(())
    } else {
        Err(TransitionError::Unauthorized { actor: *actor, to })
    }
}

/// Whether the actor has any standing on this order.
pub fn is_related(actor: &Actor, order: &Order) -> bool {
    match actor {
        Actor::System | Actor::Admin { .. } => true,
        Actor::Partner { id } => order.assigned_to(*id),
        Actor::Client { id } => order.requested_by(*id),
    }
}

pub struct OrderStateMachine {
    orders: Arc<dyn OrderRepository>,
    assignment: Arc<AssignmentEngine>,
}

impl OrderStateMachine {
    pub fn new(orders: Arc<dyn OrderRepository>, assignment: Arc<AssignmentEngine>) -> Self {
        Self { orders, assignment }
    }

    #[tracing::instrument(name = "state_machine::transition", skip(self))]
    pub async fn transition(
        &self,
        order_id: Uuid,
        target: OrderStatus,
        actor: Actor,
    ) -> Result<TransitionOutcome, TransitionError> {
        if target == OrderStatus::Accepted {
            return self.accept(order_id, None, actor).await;
        }

        for _ in 0..MAX_WRITE_ATTEMPTS {
            let order = self.load(order_id).await?;

            if order.status == target {
                return if is_related(&actor, &order) {
                    Ok(TransitionOutcome::Unchanged(order))
                } else {
                    Err(TransitionError::Unauthorized { actor, to: target })
                };
            }

            if !is_allowed(order.status, target) {
                return Err(TransitionError::InvalidTransition { from: order.status, to: target });
            }
            authorize(&actor, &order, target)?;

            if target == OrderStatus::InProgress && order.payment_status != PaymentStatus::Paid {
                return Err(TransitionError::PaymentRequired);
            }

            let change = StatusChange::new(order.status, target, actor);
            match self.orders.transition_status(order_id, order.status, change).await? {
                WriteOutcome::Applied(updated) => {
                    info!(
                        order_id = %order_id,
                        from = %order.status,
                        to = %target,
                        actor = %actor,
                        "Order status changed"
                    );
                    return Ok(TransitionOutcome::Applied(updated));
                }
                WriteOutcome::Stale(_) => continue,
            }
        }

        Err(TransitionError::Conflict(order_id))
    }

    /// `pending -> accepted`. Never a bare status flip: the order is
    /// assigned to `partner_id` when given, otherwise to the nearest partner.
    #[tracing::instrument(name = "state_machine::accept", skip(self))]
    pub async fn accept(
        &self,
        order_id: Uuid,
        partner_id: Option<Uuid>,
        actor: Actor,
    ) -> Result<TransitionOutcome, TransitionError> {
        let order = self.load(order_id).await?;

        let already_accepted = order.status == OrderStatus::Accepted
            && partner_id.map_or(true, |p| order.assigned_to(p));
        if already_accepted {
            return if is_related(&actor, &order) {
                Ok(TransitionOutcome::Unchanged(order))
            } else {
                Err(TransitionError::Unauthorized { actor, to: OrderStatus::Accepted })
            };
        }
        if !is_allowed(order.status, OrderStatus::Accepted) {
            return Err(TransitionError::InvalidTransition {
                from: order.status,
                to: OrderStatus::Accepted,
            });
        }
        authorize(&actor, &order, OrderStatus::Accepted)?;

        let assignment = match partner_id {
            Some(partner_id) => self.assignment.assign_to(order_id, partner_id, actor).await?,
            None => self.assignment.assign(order_id).await?,
        };

        let updated = self.load(order_id).await?;
        match assignment {
            Assignment::Assigned { .. } => Ok(TransitionOutcome::Applied(updated)),
            Assignment::AlreadyAssigned { .. } => Ok(TransitionOutcome::Unchanged(updated)),
        }
    }

    async fn load(&self, order_id: Uuid) -> Result<Order, TransitionError> {
        self.orders
            .get(order_id)
            .await?
            .ok_or(TransitionError::OrderNotFound(order_id))
    }
}
