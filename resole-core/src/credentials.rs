use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use tracing::{debug, error};

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("Password cannot be empty")]
    Empty,
    #[error("Password hashing failed: {0}")]
    Hashing(String),
    #[error("Stored password hash is malformed: {0}")]
    MalformedHash(String),
}

pub fn hash_password(password: &str) -> Result<String, CredentialError> {
    if password.is_empty() {
        return Err(CredentialError::Empty);
    }

    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| {
            error!(error = %e, "Argon2 password hashing failed");
            CredentialError::Hashing(e.to_string())
        })
}

pub fn verify_password(stored_hash: &str, provided: &str) -> Result<bool, CredentialError> {
    if provided.is_empty() {
        return Ok(false);
    }

    let parsed = PasswordHash::new(stored_hash)
        .map_err(|e| CredentialError::MalformedHash(e.to_string()))?;

    match Argon2::default().verify_password(provided.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => {
            debug!("Password mismatch");
            Ok(false)
        }
        Err(e) => Err(CredentialError::Hashing(e.to_string())),
    }
}
