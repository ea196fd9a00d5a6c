//! Signed credential tokens (JWT, HS256).
//!
//! The codec only deals with signatures and claim mapping. Expiry is not
//! enforced by [`TokenCodec::decode`]; callers decide with
//! [`TokenData::validate_window`] or [`TokenData::is_expired`].

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{CredentialError, PermissionSet, TokenData};

/// Claim set as it appears in the JWT payload.
#[derive(Debug, Serialize, Deserialize)]
struct WireClaims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    jti: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    iat: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    nbf: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    exp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    aud: Option<Audience>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    permissions: BTreeMap<String, Vec<String>>,
}

impl From<&TokenData> for WireClaims {
    fn from(data: &TokenData) -> Self {
        Self {
            jti: data.id.clone(),
            sub: data.subject.clone(),
            iss: data.issuer.clone(),
            iat: data.issued_at.map(|t| t.timestamp()),
            nbf: data.not_before.map(|t| t.timestamp()),
            exp: data.expiration.map(|t| t.timestamp()),
            aud: data.audience.clone().map(Audience::One),
            permissions: data.permissions.clone(),
        }
    }
}

/// `aud` in either form RFC 7519 allows. Written as a single string.
#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum Audience {
    One(String),
    Many(Vec<String>),
}

impl Audience {
    /// At most one audience is supported; an empty array means none.
    fn into_single(self) -> Result<Option<String>, CredentialError> {
        match self {
            Audience::One(aud) => Ok(Some(aud)),
            Audience::Many(auds) => {
                let mut auds = auds.into_iter();
                match (auds.next(), auds.next()) {
                    (first, None) => Ok(first),
                    _ => Err(CredentialError::Invalid(
                        "multiple audiences are not supported".into(),
                    )),
                }
            }
        }
    }
}

fn from_seconds(claim: &str, secs: Option<i64>) -> Result<Option<DateTime<Utc>>, CredentialError> {
    secs.map(|s| {
        DateTime::from_timestamp(s, 0)
            .ok_or_else(|| CredentialError::Invalid(format!("claim '{claim}' out of range")))
    })
    .transpose()
}

impl TryFrom<WireClaims> for TokenData {
    type Error = CredentialError;

    fn try_from(claims: WireClaims) -> Result<Self, Self::Error> {
        Ok(Self {
            id: claims.jti,
            subject: claims.sub,
            issuer: claims.iss,
            issued_at: from_seconds("iat", claims.iat)?,
            not_before: from_seconds("nbf", claims.nbf)?,
            expiration: from_seconds("exp", claims.exp)?,
            audience: claims.aud.map(Audience::into_single).transpose()?.flatten(),
            permissions: claims.permissions,
        })
    }
}

/// Symmetric-key codec for [`TokenData`].
#[derive(Clone)]
pub struct TokenCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCodec")
            .field("algorithm", &Algorithm::HS256)
            .finish_non_exhaustive()
    }
}

impl TokenCodec {
    pub fn new(secret: &[u8]) -> Self {
        // Claims are all optional; time and audience checks belong to the caller.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.required_spec_claims = HashSet::new();
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;

        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
        }
    }

    /// Sign `data` into compact form. Sub-second precision is dropped.
    pub fn encode(&self, data: &TokenData) -> Result<String, CredentialError> {
        jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &WireClaims::from(data),
            &self.encoding,
        )
        .map_err(|e| CredentialError::Encode(e.to_string()))
    }

    /// Verify the signature and map the payload. Never yields a default token.
    pub fn decode(&self, token: &str) -> Result<TokenData, CredentialError> {
        let decoded = jsonwebtoken::decode::<WireClaims>(token, &self.decoding, &self.validation)
            .map_err(|e| CredentialError::Invalid(e.to_string()))?;
        TokenData::try_from(decoded.claims)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Issuer
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct IssuerSettings {
    pub issuer: String,
    pub audience: Option<String>,
    pub validity: Duration,
}

/// A freshly minted credential.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub data: TokenData,
}

/// Mints and verifies login credentials.
#[derive(Debug, Clone)]
pub struct TokenIssuer {
    codec: TokenCodec,
    settings: IssuerSettings,
}

impl TokenIssuer {
    pub fn new(codec: TokenCodec, settings: IssuerSettings) -> Self {
        Self { codec, settings }
    }

    pub fn settings(&self) -> &IssuerSettings {
        &self.settings
    }

    pub fn issue(
        &self,
        username: &str,
        permissions: &PermissionSet,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken, CredentialError> {
        let data = TokenData {
            id: Some(Uuid::new_v4().to_string()),
            subject: Some(username.to_string()),
            issuer: Some(self.settings.issuer.clone()),
            issued_at: Some(now),
            not_before: Some(now),
            expiration: Some(now + self.settings.validity),
            audience: self.settings.audience.clone(),
            permissions: permissions.to_claim(),
        }
        .truncated();

        let token = self.codec.encode(&data)?;
        Ok(IssuedToken { token, data })
    }

    /// Decode `token` and check its validity window and audience at `now`.
    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<TokenData, CredentialError> {
        let data = self.codec.decode(token)?;
        data.validate_window(now)?;

        if let Some(expected) = &self.settings.audience {
            if data.audience.as_ref() != Some(expected) {
                return Err(CredentialError::Invalid("audience mismatch".into()));
            }
        }
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::ResourcePermission;

    fn codec() -> TokenCodec {
        TokenCodec::new(b"test-secret")
    }

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    #[test]
    fn absent_claims_stay_absent() {
        let token = codec().encode(&TokenData::default()).unwrap();
        let decoded = codec().decode(&token).unwrap();
        assert_eq!(decoded, TokenData::default());
    }

    #[test]
    fn empty_permissions_are_omitted_from_payload() {
        use raw::payload_json;

        let data = TokenData {
            subject: Some("alice".into()),
            ..Default::default()
        };
        let payload = payload_json(&codec().encode(&data).unwrap());
        assert!(payload.get("permissions").is_none());
        assert_eq!(payload["sub"], "alice");
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = codec().encode(&TokenData::default()).unwrap();
        let other = TokenCodec::new(b"another-secret");
        assert!(matches!(other.decode(&token), Err(CredentialError::Invalid(_))));
    }

    #[test]
    fn malformed_token_is_rejected() {
        assert!(matches!(codec().decode("not.a.jwt"), Err(CredentialError::Invalid(_))));
        assert!(matches!(codec().decode(""), Err(CredentialError::Invalid(_))));
    }

    #[test]
    fn expired_token_still_decodes() {
        let data = TokenData {
            expiration: Some(at(1_000)),
            ..Default::default()
        };
        let decoded = codec().decode(&codec().encode(&data).unwrap()).unwrap();
        assert!(decoded.is_expired());
    }

    #[test]
    fn issuer_embeds_permissions_and_window() {
        let issuer = TokenIssuer::new(
            codec(),
            IssuerSettings {
                issuer: "warden".into(),
                audience: Some("web".into()),
                validity: Duration::seconds(60),
            },
        );
        let perms: PermissionSet = [
            "DATA:READ".parse::<ResourcePermission>().unwrap(),
            "DATA:UPDATE".parse().unwrap(),
        ]
        .iter()
        .collect();

        let now = at(1_700_000_000);
        let issued = issuer.issue("alice", &perms, now).unwrap();
        assert_eq!(issued.data.expiration, Some(at(1_700_000_060)));
        assert_eq!(issued.data.permissions["data"], vec!["read", "update"]);

        let verified = issuer.verify(&issued.token, now).unwrap();
        assert_eq!(verified, issued.data);

        let later = at(1_700_000_061);
        assert_eq!(issuer.verify(&issued.token, later), Err(CredentialError::Expired));
    }

    #[test]
    fn issuer_rejects_foreign_audience() {
        let settings = |aud: &str| IssuerSettings {
            issuer: "warden".into(),
            audience: Some(aud.into()),
            validity: Duration::seconds(60),
        };
        let web = TokenIssuer::new(codec(), settings("web"));
        let cli = TokenIssuer::new(codec(), settings("cli"));

        let now = Utc::now();
        let issued = web.issue("alice", &PermissionSet::new(), now).unwrap();
        assert!(matches!(cli.verify(&issued.token, now), Err(CredentialError::Invalid(_))));
    }

    fn name() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9_]{0,11}"
    }

    fn timestamp() -> impl Strategy<Value = Option<DateTime<Utc>>> {
        proptest::option::of((0i64..4_102_444_800).prop_map(at))
    }

    fn token_data() -> impl Strategy<Value = TokenData> {
        (
            proptest::option::of(name()),
            proptest::option::of(name()),
            proptest::option::of(name()),
            timestamp(),
            timestamp(),
            timestamp(),
            proptest::option::of(name()),
            proptest::collection::btree_map(name(), proptest::collection::vec(name(), 1..4), 0..4),
        )
            .prop_map(|(id, subject, issuer, iat, nbf, exp, audience, permissions)| TokenData {
                id,
                subject,
                issuer,
                issued_at: iat,
                not_before: nbf,
                expiration: exp,
                audience,
                permissions,
            })
    }

    proptest! {
        #[test]
        fn decode_reverses_encode(data in token_data()) {
            let codec = codec();
            let decoded = codec.decode(&codec.encode(&data).unwrap()).unwrap();
            prop_assert_eq!(decoded, data);
        }
    }

    #[test]
    fn audience_may_be_a_one_element_array() {
        let token = raw::sign(&serde_json::json!({ "sub": "alice", "aud": ["web"] }));
        assert_eq!(codec().decode(&token).unwrap().audience.as_deref(), Some("web"));

        let token = raw::sign(&serde_json::json!({ "aud": [] }));
        assert_eq!(codec().decode(&token).unwrap().audience, None);

        let token = raw::sign(&serde_json::json!({ "aud": ["web", "cli"] }));
        assert!(matches!(codec().decode(&token), Err(CredentialError::Invalid(_))));
    }

    mod raw {
        use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};

        /// Sign an arbitrary payload with the test secret.
        pub fn sign(payload: &serde_json::Value) -> String {
            jsonwebtoken::encode(
                &Header::default(),
                payload,
                &EncodingKey::from_secret(b"test-secret"),
            )
            .unwrap()
        }

        /// Payload of a token signed with the test secret, as raw JSON.
        pub fn payload_json(token: &str) -> serde_json::Value {
            let mut validation = Validation::default();
            validation.required_spec_claims.clear();
            validation.validate_exp = false;
            jsonwebtoken::decode::<serde_json::Value>(
                token,
                &DecodingKey::from_secret(b"test-secret"),
                &validation,
            )
            .unwrap()
            .claims
        }
    }
}
