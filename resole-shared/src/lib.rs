pub mod models;
pub mod pii;

pub use models::{
    Account, Actor, DeliveryOption, DeliveryTier, GeoPoint, Order, OrderAmounts, OrderItem,
    OrderStatus, PartnerProfile, PartnerStatus, PaymentStatus, PlatformSettings, PricingSnapshot,
    Requester, Role, Settlement, SettlementSource, StatusChange,
};
pub use models::ParseEnumError;
pub use pii::Masked;
