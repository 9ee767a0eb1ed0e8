use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::product::ServiceOffering;
use resole_shared::{DeliveryOption, OrderAmounts, OrderItem, PlatformSettings, PricingSnapshot};

const BPS_DENOMINATOR: i64 = 10_000;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PricingError {
    #[error("Cart is empty")]
    EmptyCart,

    #[error("Quantity for service {0} must be at least 1")]
    InvalidQuantity(Uuid),

    #[error("Service {0} is not currently offered")]
    Inactive(Uuid),

    #[error("Service {0} has a negative price")]
    NegativePrice(Uuid),

    #[error("Order amount exceeds the supported range")]
    Overflow,
}

/// Commission on a subtotal, rounded half-up in integer arithmetic.
pub fn commission_for(subtotal: i64, rate_bps: u32) -> Result<i64, PricingError> {
    let scaled = subtotal
        .checked_mul(i64::from(rate_bps))
        .and_then(|v| v.checked_add(BPS_DENOMINATOR / 2))
        .ok_or(PricingError::Overflow)?;
    Ok(scaled / BPS_DENOMINATOR)
}

/// Priced cart, ready to be persisted as an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub items: Vec<OrderItem>,
    pub amounts: OrderAmounts,
    pub pricing: PricingSnapshot,
    pub delivery_option: DeliveryOption,
    pub delivery_hours: u32,
}

/// Prices carts against one settings snapshot. Build a new engine per
/// checkout so a concurrent settings write cannot change a quote midway.
pub struct PricingEngine {
    settings: PlatformSettings,
}

impl PricingEngine {
    pub fn new(settings: PlatformSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &PlatformSettings {
        &self.settings
    }

    pub fn delivery_price(&self, option: DeliveryOption) -> i64 {
        self.settings.tier(option).price
    }

    pub fn commission(&self, subtotal: i64) -> Result<i64, PricingError> {
        commission_for(subtotal, self.settings.commission_rate_bps)
    }

    pub fn quote(
        &self,
        lines: &[(ServiceOffering, u32)],
        option: DeliveryOption,
    ) -> Result<Quote, PricingError> {
        if lines.is_empty() {
            return Err(PricingError::EmptyCart);
        }

        let mut items = Vec::with_capacity(lines.len());
        let mut subtotal: i64 = 0;

        for (offering, quantity) in lines {
            if *quantity == 0 {
                return Err(PricingError::InvalidQuantity(offering.id));
            }
            if !offering.is_active {
                return Err(PricingError::Inactive(offering.id));
            }
            if offering.price < 0 {
                return Err(PricingError::NegativePrice(offering.id));
            }

            let item = OrderItem {
                offering_id: offering.id,
                name: offering.name.clone(),
                unit_price: offering.price,
                quantity: *quantity,
            };
            let line_total = item.line_total().ok_or(PricingError::Overflow)?;
            subtotal = subtotal.checked_add(line_total).ok_or(PricingError::Overflow)?;
            items.push(item);
        }

        let delivery_price = self.delivery_price(option);
        let total_amount = subtotal
            .checked_add(delivery_price)
            .ok_or(PricingError::Overflow)?;

        Ok(Quote {
            items,
            amounts: OrderAmounts {
                service_subtotal: subtotal,
                delivery_price,
                commission: self.commission(subtotal)?,
                total_amount,
            },
            pricing: self.settings.snapshot(),
            delivery_option: option,
            delivery_hours: self.settings.tier(option).duration_hours,
        })
    }
}
