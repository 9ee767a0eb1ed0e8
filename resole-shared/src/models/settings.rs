use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::order::DeliveryOption;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeliveryTier {
    /// Minor units
    pub price: i64,
    pub duration_hours: u32,
}

/// Admin-editable platform configuration. Readers always take a snapshot;
/// `version` increases with every write.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlatformSettings {
    #[serde(default = "initial_version")]
    pub version: u64,
    pub commission_rate_bps: u32,
    pub standard: DeliveryTier,
    pub express: DeliveryTier,
    pub currency: String,
    pub vat_rate_bps: u32,
    #[serde(default)]
    pub support_email: Option<String>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn initial_version() -> u64 {
    1
}

impl Default for PlatformSettings {
    fn default() -> Self {
        Self {
            version: initial_version(),
            commission_rate_bps: 1500,
            standard: DeliveryTier { price: 500, duration_hours: 240 },
            express: DeliveryTier { price: 1500, duration_hours: 72 },
            currency: "CHF".to_string(),
            vat_rate_bps: 770,
            support_email: None,
            updated_at: Utc::now(),
        }
    }
}

impl PlatformSettings {
    pub fn tier(&self, option: DeliveryOption) -> &DeliveryTier {
        match option {
            DeliveryOption::Standard => &self.standard,
            DeliveryOption::Express => &self.express,
        }
    }

    pub fn snapshot(&self) -> PricingSnapshot {
        PricingSnapshot {
            settings_version: self.version,
            commission_rate_bps: self.commission_rate_bps,
            vat_rate_bps: self.vat_rate_bps,
            currency: self.currency.clone(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.commission_rate_bps > 10_000 {
            return Err(format!("commission rate {} bps exceeds 100%", self.commission_rate_bps));
        }
        if self.vat_rate_bps > 10_000 {
            return Err(format!("VAT rate {} bps exceeds 100%", self.vat_rate_bps));
        }
        if self.standard.price < 0 || self.express.price < 0 {
            return Err("delivery prices must not be negative".to_string());
        }
        if self.currency.len() != 3 || !self.currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(format!("invalid currency code: {}", self.currency));
        }
        Ok(())
    }
}

/// The slice of settings an order is priced and settled with.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PricingSnapshot {
    pub settings_version: u64,
    pub commission_rate_bps: u32,
    pub vat_rate_bps: u32,
    pub currency: String,
}
