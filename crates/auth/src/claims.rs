use std::collections::BTreeMap;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Decoded content of a credential token (transport-agnostic).
///
/// Every claim is optional: a claim absent from the payload stays `None`
/// rather than taking a default. An empty `permissions` map is the absent
/// claim. Timestamps are kept at whole-second precision, the resolution of the
/// wire format.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenData {
    /// Token identifier (`jti`).
    pub id: Option<String>,

    /// Subject: the username (`sub`).
    pub subject: Option<String>,

    pub issuer: Option<String>,

    pub issued_at: Option<DateTime<Utc>>,

    pub not_before: Option<DateTime<Utc>>,

    pub expiration: Option<DateTime<Utc>>,

    pub audience: Option<String>,

    /// Granted actions per resource, both lower-cased.
    pub permissions: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("token has expired")]
    Expired,

    #[error("token not yet valid")]
    NotYetValid,

    #[error("invalid token: {0}")]
    Invalid(String),

    #[error("failed to encode token: {0}")]
    Encode(String),
}

impl TokenData {
    /// Truncate every timestamp to whole seconds.
    pub fn truncated(mut self) -> Self {
        self.issued_at = self.issued_at.map(|t| t.trunc_subsecs(0));
        self.not_before = self.not_before.map(|t| t.trunc_subsecs(0));
        self.expiration = self.expiration.map(|t| t.trunc_subsecs(0));
        self
    }

    /// True iff an expiration is set and it lies strictly before `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiration.is_some_and(|exp| exp < now)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Deterministically check the validity window against `now`.
    ///
    /// Note: this checks the *claims* only. Signature verification happens in
    /// [`crate::TokenCodec::decode`].
    pub fn validate_window(&self, now: DateTime<Utc>) -> Result<(), CredentialError> {
        if self.is_expired_at(now) {
            return Err(CredentialError::Expired);
        }
        if self.not_before.is_some_and(|nbf| now < nbf) {
            return Err(CredentialError::NotYetValid);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    #[test]
    fn no_expiration_never_expires() {
        let token = TokenData::default();
        assert!(!token.is_expired());
        assert!(token.validate_window(Utc::now()).is_ok());
    }

    #[test]
    fn past_expiration_is_expired() {
        let now = Utc::now();
        let token = TokenData {
            expiration: Some(now - Duration::seconds(1)),
            ..Default::default()
        };
        assert!(token.is_expired_at(now));
        assert_eq!(token.validate_window(now), Err(CredentialError::Expired));
    }

    #[test]
    fn expiration_equal_to_now_is_not_expired() {
        let now = Utc::now();
        let token = TokenData {
            expiration: Some(now),
            ..Default::default()
        };
        assert!(!token.is_expired_at(now));
    }

    #[test]
    fn future_not_before_is_rejected() {
        let now = Utc::now();
        let token = TokenData {
            not_before: Some(now + Duration::minutes(5)),
            ..Default::default()
        };
        assert_eq!(token.validate_window(now), Err(CredentialError::NotYetValid));
    }

    #[test]
    fn truncated_drops_subsecond_precision() {
        let t = DateTime::parse_from_rfc3339("2024-05-01T10:00:00.987Z")
            .unwrap()
            .with_timezone(&Utc);
        let token = TokenData {
            issued_at: Some(t),
            ..Default::default()
        }
        .truncated();
        assert_eq!(token.issued_at.unwrap().timestamp_subsec_nanos(), 0);
    }
}
