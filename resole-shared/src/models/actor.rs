use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Who is asking for a state change. Derived from the bearer token at the API
/// edge, or `System` for engine-driven writes (assignment, settlement).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Actor {
    System,
    Admin { id: Uuid },
    Partner { id: Uuid },
    Client { id: Uuid },
}

impl Actor {
    pub fn is_admin(&self) -> bool {
        matches!(self, Actor::Admin { .. })
    }

    pub fn account_id(&self) -> Option<Uuid> {
        match self {
            Actor::System => None,
            Actor::Admin { id } | Actor::Partner { id } | Actor::Client { id } => Some(*id),
        }
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Actor::System => write!(f, "system"),
            Actor::Admin { id } => write!(f, "admin:{}", id),
            Actor::Partner { id } => write!(f, "partner:{}", id),
            Actor::Client { id } => write!(f, "client:{}", id),
        }
    }
}
