pub mod product;
pub mod pricing;

pub use product::{CartLine, GenderTag, ServiceOffering};
pub use pricing::{commission_for, PricingEngine, PricingError, Quote};
