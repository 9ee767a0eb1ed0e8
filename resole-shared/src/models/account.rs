use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::geo::GeoPoint;
use super::ParseEnumError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Client,
    Partner,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::Partner => "partner",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // "cobbler" is the legacy name partners were registered under.
        match s.to_ascii_lowercase().as_str() {
            "client" => Ok(Role::Client),
            "partner" | "cobbler" => Ok(Role::Partner),
            "admin" => Ok(Role::Admin),
            _ => Err(ParseEnumError { kind: "role", value: s.to_string() }),
        }
    }
}

/// Partner onboarding status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PartnerStatus {
    Pending,
    Approved,
    Rejected,
}

impl PartnerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PartnerStatus::Pending => "pending",
            PartnerStatus::Approved => "approved",
            PartnerStatus::Rejected => "rejected",
        }
    }
}

impl FromStr for PartnerStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PartnerStatus::Pending),
            "approved" => Ok(PartnerStatus::Approved),
            "rejected" => Ok(PartnerStatus::Rejected),
            _ => Err(ParseEnumError { kind: "partner status", value: s.to_string() }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PartnerProfile {
    pub status: PartnerStatus,
    /// Processor-side connected account that receives the partner share.
    pub payout_account: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub role: Role,
    pub email: String,
    pub name: String,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub location: Option<GeoPoint>,
    pub partner: Option<PartnerProfile>,
    #[serde(skip_serializing, default)]
    pub password_hash: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Account {
    pub fn new(role: Role, email: String, name: String) -> Self {
        let partner = match role {
            Role::Partner => Some(PartnerProfile {
                status: PartnerStatus::Pending,
                payout_account: None,
            }),
            _ => None,
        };

        Self {
            id: Uuid::new_v4(),
            role,
            email,
            name,
            phone: None,
            address: None,
            location: None,
            partner,
            password_hash: None,
            created_at: Utc::now(),
        }
    }

    pub fn partner_status(&self) -> Option<PartnerStatus> {
        self.partner.as_ref().map(|p| p.status)
    }

    /// Approved partner with usable coordinates
    pub fn is_matchable(&self) -> bool {
        self.role == Role::Partner
            && self.partner_status() == Some(PartnerStatus::Approved)
            && self.location.map(|p| p.is_valid()).unwrap_or(false)
    }

    pub fn payout_account(&self) -> Option<&str> {
        self.partner.as_ref().and_then(|p| p.payout_account.as_deref())
    }
}
