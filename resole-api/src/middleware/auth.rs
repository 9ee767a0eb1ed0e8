use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use resole_shared::{Actor, Role};

use crate::error::AppError;
use crate::state::AppState;

// ============================================================================
// JWT Claims
// ============================================================================

/// Bearer token claims. `role` is one of `CLIENT`, `PARTNER`, `ADMIN`.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    pub role: String,
    pub exp: usize,
}

impl Claims {
    pub fn actor(&self) -> Result<Actor, AppError> {
        let id = Uuid::parse_str(&self.sub)
            .map_err(|_| AppError::AuthenticationError("Token subject is not an account id".into()))?;
        let role: Role = self
            .role
            .parse()
            .map_err(|_| AppError::AuthenticationError(format!("Unknown role '{}'", self.role)))?;

        Ok(match role {
            Role::Admin => Actor::Admin { id },
            Role::Partner => Actor::Partner { id },
            Role::Client => Actor::Client { id },
        })
    }
}

/// Tokens are normally issued by the account service; this is used by
/// tests and local tooling.
pub fn mint_token(
    secret: &str,
    account_id: Uuid,
    email: &str,
    role: Role,
    ttl_seconds: u64,
) -> Result<String, jsonwebtoken::errors::Error> {
    let claims = Claims {
        sub: account_id.to_string(),
        email: email.to_string(),
        role: role.as_str().to_ascii_uppercase(),
        exp: (Utc::now() + Duration::seconds(ttl_seconds as i64)).timestamp() as usize,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes()))
}

fn decode_actor(parts: &Parts, secret: &str) -> Result<Option<Actor>, AppError> {
    let Some(header) = parts.headers.get(AUTHORIZATION) else {
        return Ok(None);
    };

    let token = header
        .to_str()
        .ok()
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or_else(|| AppError::AuthenticationError("Expected a Bearer token".into()))?;

    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| AppError::AuthenticationError(format!("Invalid token: {}", e)))?;

    token_data.claims.actor().map(Some)
}

// ============================================================================
// Extractors
// ============================================================================

/// The authenticated caller. Rejects with 401 when no valid token is sent.
#[derive(Debug, Clone, Copy)]
pub struct AuthActor(pub Actor);

impl FromRequestParts<AppState> for AuthActor {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        decode_actor(parts, &state.auth.secret)?
            .map(AuthActor)
            .ok_or_else(|| AppError::AuthenticationError("Missing Authorization header".into()))
    }
}

/// Caller on endpoints that guests may also use. A malformed or expired
/// token is still rejected.
#[derive(Debug, Clone, Copy)]
pub struct MaybeActor(pub Option<Actor>);

impl FromRequestParts<AppState> for MaybeActor {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        decode_actor(parts, &state.auth.secret).map(MaybeActor)
    }
}

pub fn require_admin(actor: &Actor) -> Result<(), AppError> {
    if actor.is_admin() {
        Ok(())
    } else {
        Err(AppError::AuthorizationError("Admin role required".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_round_trips_to_actor() {
        let id = Uuid::new_v4();
        let token = mint_token("secret", id, "p@example.com", Role::Partner, 60).unwrap();

        let data = decode::<Claims>(
            &token,
            &DecodingKey::from_secret(b"secret"),
            &Validation::default(),
        )
        .unwrap();
        assert_eq!(data.claims.role, "PARTNER");
        assert_eq!(data.claims.actor().unwrap(), Actor::Partner { id });
    }

    #[test]
    fn test_claims_with_bad_subject_rejected() {
        let claims = Claims {
            sub: "guest-123".into(),
            email: String::new(),
            role: "CLIENT".into(),
            exp: 0,
        };
        assert!(matches!(claims.actor(), Err(AppError::AuthenticationError(_))));
    }
}
