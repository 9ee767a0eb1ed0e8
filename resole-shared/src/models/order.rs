use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::actor::Actor;
use super::geo::GeoPoint;
use super::settings::PricingSnapshot;
use super::ParseEnumError;
use crate::pii::Masked;

/// Order status in the fulfillment lifecycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Accepted,
    InProgress,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Accepted => "accepted",
            OrderStatus::InProgress => "in_progress",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(OrderStatus::Pending),
            "accepted" => Ok(OrderStatus::Accepted),
            "in_progress" => Ok(OrderStatus::InProgress),
            "shipped" => Ok(OrderStatus::Shipped),
            "delivered" => Ok(OrderStatus::Delivered),
            "cancelled" => Ok(OrderStatus::Cancelled),
            _ => Err(ParseEnumError { kind: "order status", value: s.to_string() }),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    Expired,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "paid" => Ok(PaymentStatus::Paid),
            "failed" => Ok(PaymentStatus::Failed),
            "expired" => Ok(PaymentStatus::Expired),
            _ => Err(ParseEnumError { kind: "payment status", value: s.to_string() }),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryOption {
    #[default]
    Standard,
    Express,
}

impl DeliveryOption {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryOption::Standard => "standard",
            DeliveryOption::Express => "express",
        }
    }
}

impl FromStr for DeliveryOption {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "standard" => Ok(DeliveryOption::Standard),
            "express" => Ok(DeliveryOption::Express),
            _ => Err(ParseEnumError { kind: "delivery option", value: s.to_string() }),
        }
    }
}

/// Who placed the order. Guests are never linked to a placeholder account:
/// if an account is created during checkout the order references it by id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Requester {
    Account { account_id: Uuid },
    Guest {
        name: String,
        email: Masked<String>,
        phone: Masked<String>,
    },
}

impl Requester {
    pub fn account_id(&self) -> Option<Uuid> {
        match self {
            Requester::Account { account_id } => Some(*account_id),
            Requester::Guest { .. } => None,
        }
    }

    pub fn contact_email(&self) -> Option<&str> {
        match self {
            Requester::Account { .. } => None,
            Requester::Guest { email, .. } => Some(email.expose().as_str()),
        }
    }
}

/// A line captured at checkout. `unit_price` is a copy, not a live reference.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrderItem {
    pub offering_id: Uuid,
    pub name: String,
    pub unit_price: i64,
    pub quantity: u32,
}

impl OrderItem {
    pub fn line_total(&self) -> Option<i64> {
        self.unit_price.checked_mul(i64::from(self.quantity))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrderAmounts {
    pub service_subtotal: i64,
    pub delivery_price: i64,
    pub commission: i64,
    pub total_amount: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SettlementSource {
    ProcessorCallback,
    ClientPoll,
    Direct,
}

/// Commission split recorded when the payment is confirmed. Written once.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Settlement {
    pub commission: i64,
    pub partner_payout: i64,
    pub payout_account: Option<String>,
    pub source: SettlementSource,
    pub settled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusChange {
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub actor: Actor,
    pub at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl StatusChange {
    pub fn new(from: OrderStatus, to: OrderStatus, actor: Actor) -> Self {
        Self { from, to, actor, at: Utc::now(), note: None }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub reference_number: String,
    pub requester: Requester,
    pub cobbler_id: Option<Uuid>,
    pub items: Vec<OrderItem>,
    pub delivery_option: DeliveryOption,
    pub delivery_address: String,
    pub delivery_location: Option<GeoPoint>,
    /// Set when the geocoder had no match for `delivery_address`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address_unresolvable_at: Option<DateTime<Utc>>,
    pub delivery_price: i64,
    pub service_subtotal: i64,
    pub commission: i64,
    pub total_amount: i64,
    pub currency: String,
    pub pricing: PricingSnapshot,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub payment_session_id: Option<String>,
    pub settlement: Option<Settlement>,
    pub notes: Option<String>,
    pub history: Vec<StatusChange>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn new(
        reference_number: String,
        requester: Requester,
        items: Vec<OrderItem>,
        delivery_option: DeliveryOption,
        delivery_address: String,
        amounts: OrderAmounts,
        pricing: PricingSnapshot,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            reference_number,
            requester,
            cobbler_id: None,
            items,
            delivery_option,
            delivery_address,
            delivery_location: None,
            address_unresolvable_at: None,
            delivery_price: amounts.delivery_price,
            service_subtotal: amounts.service_subtotal,
            commission: amounts.commission,
            total_amount: amounts.total_amount,
            currency: pricing.currency.clone(),
            pricing,
            status: OrderStatus::Pending,
            payment_status: PaymentStatus::Pending,
            payment_session_id: None,
            settlement: None,
            notes: None,
            history: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_notes(mut self, notes: Option<String>) -> Self {
        self.notes = notes.filter(|n| !n.trim().is_empty());
        self
    }

    pub fn amounts(&self) -> OrderAmounts {
        OrderAmounts {
            service_subtotal: self.service_subtotal,
            delivery_price: self.delivery_price,
            commission: self.commission,
            total_amount: self.total_amount,
        }
    }

    /// Apply a status change and record it in the audit trail.
    pub fn apply_status(&mut self, change: StatusChange) {
        self.status = change.to;
        self.updated_at = change.at;
        self.history.push(change);
    }

    /// No cached location and the last lookup found no match.
    pub fn has_unresolvable_address(&self) -> bool {
        self.delivery_location.is_none() && self.address_unresolvable_at.is_some()
    }

    pub fn is_unassigned(&self) -> bool {
        self.status == OrderStatus::Pending && self.cobbler_id.is_none()
    }

    pub fn requested_by(&self, account_id: Uuid) -> bool {
        self.requester.account_id() == Some(account_id)
    }

    pub fn assigned_to(&self, partner_id: Uuid) -> bool {
        self.cobbler_id == Some(partner_id)
    }
}
