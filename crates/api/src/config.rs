//! API server configuration.

use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use warden_auth::{DEFAULT_MAX_LOGIN_ATTEMPTS, LockoutPolicy};
use warden_infra::AdminAccount;

const DEV_SECRET: &str = "dev-secret";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: '{value}'")]
    Invalid { key: &'static str, value: String },

    #[error("ADMIN_USERNAME, ADMIN_EMAIL and ADMIN_PASSWORD must be set together")]
    PartialAdmin,
}

/// Where guarded routes read granted permissions from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthzSource {
    /// Permissions embedded in the bearer token at login.
    #[default]
    Token,
    /// A fresh catalog lookup on every request.
    Catalog,
}

impl FromStr for AuthzSource {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "token" => Ok(AuthzSource::Token),
            "catalog" => Ok(AuthzSource::Catalog),
            _ => Err(()),
        }
    }
}

/// Configuration for the API server.
#[derive(Clone, Debug)]
pub struct WardenConfig {
    pub bind_addr: SocketAddr,
    /// `None` runs on in-memory stores.
    pub database_url: Option<String>,
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub jwt_audience: Option<String>,
    pub jwt_validity: chrono::Duration,
    pub lockout: LockoutPolicy,
    pub activation_token_validity: chrono::Duration,
    pub reset_token_validity: chrono::Duration,
    pub token_purge_interval: Duration,
    pub authz_source: AuthzSource,
    pub admin: Option<AdminAccount>,
}

impl Default for WardenConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            database_url: None,
            jwt_secret: DEV_SECRET.to_string(),
            jwt_issuer: "warden".to_string(),
            jwt_audience: None,
            jwt_validity: chrono::Duration::seconds(3600),
            lockout: LockoutPolicy::default(),
            activation_token_validity: chrono::Duration::seconds(86_400),
            reset_token_validity: chrono::Duration::seconds(3600),
            token_purge_interval: Duration::from_secs(3600),
            authz_source: AuthzSource::Token,
            admin: None,
        }
    }
}

impl WardenConfig {
    /// Reads configuration from environment variables.
    ///
    /// | Variable                          | Default          |
    /// |-----------------------------------|------------------|
    /// | `BIND_ADDR`                       | `0.0.0.0:8080`   |
    /// | `DATABASE_URL`                    | in-memory stores |
    /// | `JWT_SECRET`                      | `dev-secret`     |
    /// | `JWT_ISSUER`                      | `warden`         |
    /// | `JWT_AUDIENCE`                    | unset            |
    /// | `JWT_VALIDITY_SECS`               | `3600`           |
    /// | `LOGIN_MAX_ATTEMPTS`              | `5`              |
    /// | `ACTIVATION_TOKEN_VALIDITY_SECS`  | `86400`          |
    /// | `RESET_TOKEN_VALIDITY_SECS`       | `3600`           |
    /// | `TOKEN_PURGE_INTERVAL_SECS`       | `3600`           |
    /// | `AUTHZ_SOURCE`                    | `token`          |
    /// | `ADMIN_USERNAME` / `ADMIN_EMAIL` / `ADMIN_PASSWORD` | unset |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("BIND_ADDR") {
            config.bind_addr = parse("BIND_ADDR", &v)?;
        }
        config.database_url = get("DATABASE_URL");

        match get("JWT_SECRET") {
            Some(secret) => config.jwt_secret = secret,
            None => warn!("JWT_SECRET not set; using insecure dev default"),
        }
        if let Some(v) = get("JWT_ISSUER") {
            config.jwt_issuer = v;
        }
        config.jwt_audience = get("JWT_AUDIENCE");

        if let Some(v) = get("JWT_VALIDITY_SECS") {
            config.jwt_validity = seconds("JWT_VALIDITY_SECS", &v)?;
        }
        if let Some(v) = get("LOGIN_MAX_ATTEMPTS") {
            let max: NonZeroU32 = parse("LOGIN_MAX_ATTEMPTS", &v)?;
            config.lockout = LockoutPolicy::new(max);
        }
        if let Some(v) = get("ACTIVATION_TOKEN_VALIDITY_SECS") {
            config.activation_token_validity = seconds("ACTIVATION_TOKEN_VALIDITY_SECS", &v)?;
        }
        if let Some(v) = get("RESET_TOKEN_VALIDITY_SECS") {
            config.reset_token_validity = seconds("RESET_TOKEN_VALIDITY_SECS", &v)?;
        }
        if let Some(v) = get("TOKEN_PURGE_INTERVAL_SECS") {
            let secs: u64 = parse("TOKEN_PURGE_INTERVAL_SECS", &v)?;
            if secs == 0 {
                return Err(invalid("TOKEN_PURGE_INTERVAL_SECS", &v));
            }
            config.token_purge_interval = Duration::from_secs(secs);
        }
        if let Some(v) = get("AUTHZ_SOURCE") {
            config.authz_source = v.parse().map_err(|()| invalid("AUTHZ_SOURCE", &v))?;
        }

        config.admin = match (
            get("ADMIN_USERNAME"),
            get("ADMIN_EMAIL"),
            get("ADMIN_PASSWORD"),
        ) {
            (Some(username), Some(email), Some(password)) => Some(AdminAccount {
                username,
                email,
                password,
            }),
            (None, None, None) => None,
            _ => return Err(ConfigError::PartialAdmin),
        };

        Ok(config)
    }

    pub fn max_login_attempts(&self) -> u32 {
        self.lockout.max_attempts.get()
    }
}

fn invalid(key: &'static str, value: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
    }
}

fn parse<T: FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| invalid(key, value))
}

/// Upper bound for token lifetimes; keeps `now + validity` in range.
const MAX_VALIDITY_SECS: i64 = 10 * 366 * 24 * 60 * 60;

/// Positive number of seconds, at most [`MAX_VALIDITY_SECS`].
fn seconds(key: &'static str, value: &str) -> Result<chrono::Duration, ConfigError> {
    let secs: i64 = parse(key, value)?;
    if !(1..=MAX_VALIDITY_SECS).contains(&secs) {
        return Err(invalid(key, value));
    }
    chrono::Duration::try_seconds(secs).ok_or_else(|| invalid(key, value))
}
