use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::notify::dispatch_quietly;
use crate::polling::{PollDecision, PollSchedule};
use resole_catalog::{commission_for, PricingError};
use resole_core::{
    GatewayError, Notification, NotificationDispatcher, OrderRepository, PartnerDirectory,
    PaymentProcessor, PayoutAccountRequest, SessionRequest, SessionState, StoreError,
    WriteOutcome,
};
use resole_shared::models::events::{OrderPaidEvent, PaymentVerificationPendingEvent};
use resole_shared::{Order, OrderStatus, PaymentStatus, Settlement, SettlementSource};

#[derive(Debug, thiserror::Error)]
pub enum SettlementError {
    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("Partner not found: {0}")]
    PartnerNotFound(Uuid),

    #[error("Payment for order {reference} was already confirmed")]
    AlreadyConfirmed { order_id: Uuid, reference: String },

    #[error("Payment session expired; start a new checkout session")]
    SessionExpired,

    #[error("Order is {0} and cannot be paid")]
    NotPayable(String),

    #[error("Payment session could not be created: {0}")]
    PaymentSession(GatewayError),

    #[error("Payment processor unavailable: {0}")]
    Processor(GatewayError),

    #[error("Settlement arithmetic failed: {0}")]
    Pricing(#[from] PricingError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Where the hosted checkout should send the payer afterwards.
#[derive(Debug, Clone)]
pub struct CheckoutUrls {
    pub success_url: String,
    pub cancel_url: String,
}

impl CheckoutUrls {
    fn render(template: &str, order: &Order) -> String {
        template
            .replace("{order_id}", &order.id.to_string())
            .replace("{reference}", &order.reference_number)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentSessionHandle {
    pub order_id: Uuid,
    pub session_id: String,
    pub url: String,
    pub amount: i64,
    pub currency: String,
}

/// A partner's connected account for split payouts.
#[derive(Debug, Clone, Serialize)]
pub struct PayoutAccount {
    pub partner_id: Uuid,
    pub payout_account: String,
    /// False when the partner already had an account.
    pub created: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Confirmation {
    pub order: Order,
    pub commission: i64,
}

#[derive(Debug, Clone)]
pub enum ConfirmTarget {
    Session(String),
    Order(Uuid),
}

/// One poll step against the processor.
#[derive(Debug, Clone)]
pub enum PollStatus {
    Confirmed(Confirmation),
    AlreadyConfirmed(Order),
    Pending,
}

#[derive(Debug, Clone)]
pub enum PollOutcome {
    Confirmed(Confirmation),
    AlreadyConfirmed(Order),
    /// Polling budget exhausted; the requester is told to expect an email.
    VerifyByEmail { attempts: u32 },
}

/// Owns payment sessions and the single idempotent transition to `paid`.
pub struct PaymentSettlement {
    orders: Arc<dyn OrderRepository>,
    partners: Arc<dyn PartnerDirectory>,
    processor: Arc<dyn PaymentProcessor>,
    notifier: Arc<dyn NotificationDispatcher>,
    urls: CheckoutUrls,
}

impl PaymentSettlement {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        partners: Arc<dyn PartnerDirectory>,
        processor: Arc<dyn PaymentProcessor>,
        notifier: Arc<dyn NotificationDispatcher>,
        urls: CheckoutUrls,
    ) -> Self {
        Self { orders, partners, processor, notifier, urls }
    }

    #[tracing::instrument(name = "settlement::create_session", skip(self))]
    pub async fn create_session(
        &self,
        order_id: Uuid,
    ) -> Result<PaymentSessionHandle, SettlementError> {
        let order = self.load(&ConfirmTarget::Order(order_id)).await?;
        ensure_payable(&order)?;

        let commission = commission_for(order.service_subtotal, order.pricing.commission_rate_bps)?;
        let destination = self.payout_account(&order).await;

        let request = SessionRequest {
            order_id: order.id,
            reference_number: order.reference_number.clone(),
            amount: order.total_amount,
            currency: order.currency.clone(),
            application_fee: commission,
            destination,
            description: format!("Repair order {}", order.reference_number),
            success_url: CheckoutUrls::render(&self.urls.success_url, &order),
            cancel_url: CheckoutUrls::render(&self.urls.cancel_url, &order),
        };

        // Processor failures leave the order untouched.
        let session = self.processor.create_session(&request).await.map_err(|e| {
            warn!(
                order_id = %order.id,
                processor = self.processor.name(),
                error = %e,
                "Payment session creation failed"
            );
            SettlementError::PaymentSession(e)
        })?;

        match self.orders.attach_payment_session(order.id, &session.id).await? {
            WriteOutcome::Applied(_) => {}
            WriteOutcome::Stale(current) => {
                ensure_payable(&current)?;
                return Err(SettlementError::NotPayable(current.status.to_string()));
            }
        }

        info!(
            order_id = %order.id,
            session_id = %session.id,
            amount = order.total_amount,
            application_fee = commission,
            split = request.destination.is_some(),
            "Payment session opened"
        );

        Ok(PaymentSessionHandle {
            order_id: order.id,
            session_id: session.id,
            url: session.url,
            amount: order.total_amount,
            currency: order.currency,
        })
    }

    /// Open a connected account for the partner unless one exists. Sessions
    /// for orders assigned to the partner then carry it as the destination.
    #[tracing::instrument(name = "settlement::connect_payout_account", skip(self))]
    pub async fn connect_payout_account(
        &self,
        partner_id: Uuid,
    ) -> Result<PayoutAccount, SettlementError> {
        let partner = self
            .partners
            .get_partner(partner_id)
            .await?
            .ok_or(SettlementError::PartnerNotFound(partner_id))?;

        if let Some(existing) = partner.payout_account() {
            return Ok(PayoutAccount {
                partner_id,
                payout_account: existing.to_string(),
                created: false,
            });
        }

        let request = PayoutAccountRequest { partner_id, email: partner.email.clone() };
        let account_id = self.processor.create_payout_account(&request).await.map_err(|e| {
            warn!(
                partner_id = %partner_id,
                processor = self.processor.name(),
                error = %e,
                "Payout account creation failed"
            );
            SettlementError::Processor(e)
        })?;

        self.partners.set_payout_account(partner_id, &account_id).await?;
        info!(partner_id = %partner_id, payout_account = %account_id, "Payout account connected");

        Ok(PayoutAccount { partner_id, payout_account: account_id, created: true })
    }

    /// Mark the order paid and record the commission split. Exactly one
    /// caller wins; every other caller sees `AlreadyConfirmed`.
    #[tracing::instrument(name = "settlement::confirm", skip(self))]
    pub async fn confirm(
        &self,
        target: ConfirmTarget,
        source: SettlementSource,
    ) -> Result<Confirmation, SettlementError> {
        let order = self.load(&target).await?;
        check_confirmable(&order)?;

        let commission = commission_for(order.service_subtotal, order.pricing.commission_rate_bps)?;
        let settlement = Settlement {
            commission,
            partner_payout: order.total_amount - commission,
            payout_account: self.payout_account(&order).await,
            source,
            settled_at: Utc::now(),
        };

        match self.orders.settle_payment(order.id, settlement).await? {
            WriteOutcome::Applied(updated) => {
                info!(
                    order_id = %updated.id,
                    reference = %updated.reference_number,
                    commission,
                    source = ?source,
                    "Payment confirmed"
                );
                dispatch_quietly(
                    self.notifier.as_ref(),
                    Notification::PaymentConfirmed(OrderPaidEvent {
                        order_id: updated.id,
                        reference_number: updated.reference_number.clone(),
                        total_amount: updated.total_amount,
                        commission,
                        source,
                        timestamp: Utc::now().timestamp(),
                    }),
                )
                .await;
                Ok(Confirmation { order: updated, commission })
            }
            WriteOutcome::Stale(current) => {
                check_confirmable(&current)?;
                Err(SettlementError::NotPayable(current.payment_status.to_string()))
            }
        }
    }

    /// Ask the processor for the session's state and converge on `confirm`.
    /// Used by both the client poll and the processor webhook.
    #[tracing::instrument(name = "settlement::reconcile", skip(self))]
    pub async fn reconcile_session(
        &self,
        session_id: &str,
        source: SettlementSource,
    ) -> Result<PollStatus, SettlementError> {
        let order = self.load(&ConfirmTarget::Session(session_id.to_string())).await?;
        if order.payment_status == PaymentStatus::Paid {
            return Ok(PollStatus::AlreadyConfirmed(order));
        }

        let state = self
            .processor
            .session_status(session_id)
            .await
            .map_err(SettlementError::Processor)?;

        match state {
            SessionState::Complete { paid: true } => {
                match self.confirm(ConfirmTarget::Session(session_id.to_string()), source).await {
                    Ok(confirmation) => Ok(PollStatus::Confirmed(confirmation)),
                    Err(SettlementError::AlreadyConfirmed { .. }) => {
                        let current = self.load(&ConfirmTarget::Order(order.id)).await?;
                        Ok(PollStatus::AlreadyConfirmed(current))
                    }
                    Err(e) => Err(e),
                }
            }
            SessionState::Expired => {
                self.expire(&order, session_id).await?;
                Err(SettlementError::SessionExpired)
            }
            SessionState::Open | SessionState::Complete { paid: false } => Ok(PollStatus::Pending),
        }
    }

    /// Bounded client-side polling. Transient processor errors count as a
    /// pending attempt.
    pub async fn await_confirmation(
        &self,
        session_id: &str,
        schedule: PollSchedule,
    ) -> Result<PollOutcome, SettlementError> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.reconcile_session(session_id, SettlementSource::ClientPoll).await {
                Ok(PollStatus::Confirmed(c)) => return Ok(PollOutcome::Confirmed(c)),
                Ok(PollStatus::AlreadyConfirmed(o)) => return Ok(PollOutcome::AlreadyConfirmed(o)),
                Ok(PollStatus::Pending) => {}
                Err(SettlementError::Processor(e)) => {
                    warn!(session_id, attempts, error = %e, "Payment status poll failed");
                }
                Err(e) => return Err(e),
            }

            match schedule.decide(attempts) {
                PollDecision::Retry { after } => tokio::time::sleep(after).await,
                PollDecision::GiveUp => {
                    self.notify_verification_pending(session_id, attempts).await?;
                    return Ok(PollOutcome::VerifyByEmail { attempts });
                }
            }
        }
    }

    /// Tell the requester the payment will be verified out of band.
    pub async fn notify_verification_pending(
        &self,
        session_id: &str,
        attempts: u32,
    ) -> Result<(), SettlementError> {
        let order = self.load(&ConfirmTarget::Session(session_id.to_string())).await?;
        info!(order_id = %order.id, attempts, "Payment not yet confirmed, deferring to email");
        dispatch_quietly(
            self.notifier.as_ref(),
            Notification::PaymentVerificationPending(PaymentVerificationPendingEvent {
                order_id: order.id,
                reference_number: order.reference_number,
                session_id: session_id.to_string(),
                attempts,
                timestamp: Utc::now().timestamp(),
            }),
        )
        .await;
        Ok(())
    }

    /// Only the order's current session can expire its payment.
    async fn expire(&self, order: &Order, session_id: &str) -> Result<(), SettlementError> {
        if order.payment_session_id.as_deref() != Some(session_id) {
            return Ok(());
        }
        if let WriteOutcome::Applied(_) = self
            .orders
            .set_payment_status(order.id, PaymentStatus::Pending, PaymentStatus::Expired)
            .await?
        {
            info!(order_id = %order.id, session_id, "Payment session expired");
        }
        Ok(())
    }

    async fn payout_account(&self, order: &Order) -> Option<String> {
        let partner_id = order.cobbler_id?;
        match self.partners.get_partner(partner_id).await {
            Ok(partner) => partner.and_then(|p| p.payout_account().map(str::to_string)),
            Err(e) => {
                warn!(
                    order_id = %order.id,
                    error = %e,
                    "Partner lookup failed; collecting without split"
                );
                None
            }
        }
    }

    async fn load(&self, target: &ConfirmTarget) -> Result<Order, SettlementError> {
        let found = match target {
            ConfirmTarget::Order(id) => self.orders.get(*id).await?,
            ConfirmTarget::Session(session_id) => self.orders.find_by_session(session_id).await?,
        };
        found.ok_or_else(|| {
            SettlementError::OrderNotFound(match target {
                ConfirmTarget::Order(id) => id.to_string(),
                ConfirmTarget::Session(session_id) => format!("session {}", session_id),
            })
        })
    }
}

fn ensure_payable(order: &Order) -> Result<(), SettlementError> {
    if order.payment_status == PaymentStatus::Paid {
        return Err(SettlementError::AlreadyConfirmed {
            order_id: order.id,
            reference: order.reference_number.clone(),
        });
    }
    if order.status == OrderStatus::Cancelled {
        return Err(SettlementError::NotPayable(order.status.to_string()));
    }
    Ok(())
}

fn check_confirmable(order: &Order) -> Result<(), SettlementError> {
    match order.payment_status {
        PaymentStatus::Paid => Err(SettlementError::AlreadyConfirmed {
            order_id: order.id,
            reference: order.reference_number.clone(),
        }),
        PaymentStatus::Expired => Err(SettlementError::SessionExpired),
        PaymentStatus::Failed => Err(SettlementError::NotPayable(order.payment_status.to_string())),
        PaymentStatus::Pending if order.status == OrderStatus::Cancelled => {
            Err(SettlementError::NotPayable(order.status.to_string()))
        }
        PaymentStatus::Pending => Ok(()),
    }
}
