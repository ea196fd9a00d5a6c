use serde::{Deserialize, Serialize};

use crate::{PermissionSet, TokenData, user::normalize_username};

/// The authenticated identity making a request, with its granted permissions.
///
/// Construction is decoupled from storage and transport: the HTTP layer builds
/// it from a decoded token, services may build it from a fresh catalog query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    username: String,
    pub permissions: PermissionSet,
}

impl Principal {
    pub fn new(username: &str, permissions: PermissionSet) -> Self {
        Self {
            username: normalize_username(username),
            permissions,
        }
    }

    /// Principal described by a verified token. `None` when the token has no subject.
    pub fn from_token(token: &TokenData) -> Option<Self> {
        let subject = token.subject.as_deref()?;
        Some(Self::new(
            subject,
            PermissionSet::from_claim(&token.permissions),
        ))
    }

    pub fn username(&self) -> &str {
        &self.username
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    #[test]
    fn from_token_requires_subject() {
        assert!(Principal::from_token(&TokenData::default()).is_none());

        let token = TokenData {
            subject: Some("Alice".into()),
            permissions: BTreeMap::from([("data".to_string(), vec!["read".to_string()])]),
            ..Default::default()
        };
        let principal = Principal::from_token(&token).unwrap();
        assert_eq!(principal.username(), "alice");
        assert!(principal.permissions.contains("DATA", "READ"));
    }
}
