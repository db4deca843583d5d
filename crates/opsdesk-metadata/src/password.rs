//! Password hashing utilities using Argon2id.

use argon2::{
    password_hash::{PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString},
    Argon2,
};
use rand::rngs::OsRng;

use opsdesk_core::{CoreError, CoreResult, PasswordHasher};

/// Hash a password using Argon2id with secure defaults.
///
/// # Errors
///
/// Returns an error if hashing fails.
pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let password_hash = argon2.hash_password(password.as_bytes(), &salt)?;
    Ok(password_hash.to_string())
}

/// Verify a password against a PHC hash string.
///
/// # Errors
///
/// Returns an error if the stored hash cannot be parsed.
pub fn verify_password(password: &str, hash: &str) -> Result<bool, argon2::password_hash::Error> {
    let parsed_hash = PasswordHash::new(hash)?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

/// [`PasswordHasher`] backed by Argon2id.
#[derive(Debug, Clone, Copy, Default)]
pub struct Argon2Hasher;

impl PasswordHasher for Argon2Hasher {
    fn hash(&self, password: &str) -> CoreResult<String> {
        hash_password(password).map_err(|e| {
            tracing::error!(error = %e, "password hashing failed");
            CoreError::internal("password hashing failed")
        })
    }

    fn verify(&self, password: &str, hash: &str) -> CoreResult<bool> {
        verify_password(password, hash).map_err(|e| {
            tracing::error!(error = %e, "stored password hash is unreadable");
            CoreError::internal("stored credential is unreadable")
        })
    }
}
