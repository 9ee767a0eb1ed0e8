use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GenderTag {
    Women,
    Men,
    Unisex,
}

/// A repair service a partner can perform. Prices are minor units.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceOffering {
    pub id: Uuid,
    pub name: String,
    pub price: i64,
    pub estimated_duration_hours: u32,
    pub category: String,
    #[serde(default = "default_gender")]
    pub gender: GenderTag,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_gender() -> GenderTag {
    GenderTag::Unisex
}

fn default_active() -> bool {
    true
}

/// One cart entry as submitted by the requester.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CartLine {
    pub service_id: Uuid,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
}

fn default_quantity() -> u32 {
    1
}

impl CartLine {
    pub fn single(service_id: Uuid) -> Self {
        Self { service_id, quantity: 1 }
    }
}
