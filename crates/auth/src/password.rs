//! Password hashing via bcrypt.

use thiserror::Error;

/// bcrypt cost factor.
const BCRYPT_COST: u32 = 10;

pub const MIN_PASSWORD_LENGTH: usize = 8;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PasswordError {
    #[error("password must be at least {MIN_PASSWORD_LENGTH} characters")]
    TooShort,

    #[error("password hashing failed: {0}")]
    Hash(String),
}

/// Authentication failure. Deliberately carries no reason: unknown user, wrong
/// password and unusable account all look the same to the caller.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LoginError {
    #[error("bad credentials")]
    BadCredentials,
}

pub fn validate_password(password: &str) -> Result<(), PasswordError> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(PasswordError::TooShort);
    }
    Ok(())
}

/// Hash a password with bcrypt (cost 10).
pub fn hash_password(password: &str) -> Result<String, PasswordError> {
    bcrypt::hash(password, BCRYPT_COST).map_err(|e| PasswordError::Hash(e.to_string()))
}

/// Verify a password against a bcrypt hash. A malformed hash never matches.
pub fn verify_password(password: &str, hash: &str) -> bool {
    bcrypt::verify(password, hash).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_verify() {
        let hash = hash_password("correct horse").unwrap();
        assert!(hash.starts_with("$2"));
        assert!(verify_password("correct horse", &hash));
        assert!(!verify_password("wrong horse", &hash));
    }

    #[test]
    fn garbage_hash_never_verifies() {
        assert!(!verify_password("anything", "not-a-bcrypt-hash"));
    }

    #[test]
    fn short_passwords_are_rejected() {
        assert_eq!(validate_password("short"), Err(PasswordError::TooShort));
        assert!(validate_password("long enough").is_ok());
    }
}
