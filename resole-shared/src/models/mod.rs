pub mod account;
pub mod actor;
pub mod events;
pub mod geo;
pub mod order;
pub mod settings;

pub use account::{Account, PartnerProfile, PartnerStatus, Role};
pub use actor::Actor;
pub use geo::GeoPoint;
pub use order::{
    DeliveryOption, Order, OrderAmounts, OrderItem, OrderStatus, PaymentStatus, Requester,
    Settlement, SettlementSource, StatusChange,
};
pub use settings::{DeliveryTier, PlatformSettings, PricingSnapshot};

use std::fmt;

/// Returned when a wire string does not name a known enum variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for ParseEnumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {}: {}", self.kind, self.value)
    }
}

impl std::error::Error for ParseEnumError {}
