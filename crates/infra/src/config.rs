//! Environment configuration for the identity layer.
//!
//! Parsing goes through [`IdentityConfig::from_lookup`] so tests can feed a
//! map instead of touching the process environment.

use std::net::SocketAddr;
use std::time::Duration as StdDuration;

use chrono::Duration;
use thiserror::Error;
use uuid::Uuid;

use scribe_auth::{Algorithm, DEFAULT_TIME_COST, MAX_TOKEN_TTL_SECS};

const DEV_ACCESS_SECRET: &str = "dev-insecure-access-secret";
const DEV_REFRESH_SECRET: &str = "dev-insecure-refresh-secret";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("{0} is required")]
    Missing(&'static str),
}

impl ConfigError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid { key, reason: reason.into() }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct AccessTokenConfig {
    pub secret: String,
    pub algorithm: Algorithm,
    pub ttl: Duration,
}

#[derive(Clone, PartialEq, Eq)]
pub struct RefreshTokenConfig {
    pub secret: String,
    pub ttl: Duration,
}

impl core::fmt::Debug for AccessTokenConfig {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AccessTokenConfig")
            .field("secret", &"<redacted>")
            .field("algorithm", &self.algorithm)
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl core::fmt::Debug for RefreshTokenConfig {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RefreshTokenConfig")
            .field("secret", &"<redacted>")
            .field("ttl", &self.ttl)
            .finish()
    }
}

/// Which verifier a resource service uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifierMode {
    /// Verify signatures locally and read the user from the replica.
    Local,
    /// Call the issuing service's profile endpoint on every request.
    Remote { auth_service_url: String, timeout: StdDuration },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventLogConfig {
    pub redis_url: Option<String>,
    pub consumer_group: String,
    pub consumer_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapAdmin {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityConfig {
    pub access: AccessTokenConfig,
    pub refresh: RefreshTokenConfig,
    pub password_hash_cost: u32,
    pub verifier: VerifierMode,
    pub event_log: EventLogConfig,
    pub database_url: Option<String>,
    pub bind_addr: SocketAddr,
    pub bootstrap_admin: Option<BootstrapAdmin>,
}

impl IdentityConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let access = AccessTokenConfig {
            secret: secret_or_dev_default(get("ACCESS_TOKEN_SECRET"), "ACCESS_TOKEN_SECRET", DEV_ACCESS_SECRET),
            algorithm: match get("ACCESS_TOKEN_ALGORITHM").as_deref() {
                None | Some("HS256") => Algorithm::HS256,
                Some("HS384") => Algorithm::HS384,
                Some("HS512") => Algorithm::HS512,
                Some(other) => {
                    return Err(ConfigError::invalid(
                        "ACCESS_TOKEN_ALGORITHM",
                        format!("unsupported algorithm {other}"),
                    ));
                }
            },
            ttl: seconds(get("ACCESS_TOKEN_TTL_SECS"), "ACCESS_TOKEN_TTL_SECS", 15 * 60)?,
        };

        let refresh = RefreshTokenConfig {
            secret: secret_or_dev_default(get("REFRESH_TOKEN_SECRET"), "REFRESH_TOKEN_SECRET", DEV_REFRESH_SECRET),
            ttl: seconds(get("REFRESH_TOKEN_TTL_SECS"), "REFRESH_TOKEN_TTL_SECS", 7 * 24 * 60 * 60)?,
        };

        let password_hash_cost = match get("PASSWORD_HASH_COST") {
            Some(raw) => match raw.parse::<u32>() {
                Ok(cost) if cost > 0 => cost,
                _ => return Err(ConfigError::invalid("PASSWORD_HASH_COST", "expected a positive integer")),
            },
            None => DEFAULT_TIME_COST,
        };

        let verifier = match get("VERIFIER_MODE").as_deref() {
            None | Some("local") => VerifierMode::Local,
            Some("remote") => {
                let auth_service_url = get("AUTH_SERVICE_URL").ok_or(ConfigError::Missing("AUTH_SERVICE_URL"))?;
                let timeout_ms = match get("INTROSPECTION_TIMEOUT_MS") {
                    Some(raw) => raw
                        .parse::<u64>()
                        .ok()
                        .filter(|ms| *ms > 0)
                        .ok_or_else(|| ConfigError::invalid("INTROSPECTION_TIMEOUT_MS", "expected positive milliseconds"))?,
                    None => 5_000,
                };
                VerifierMode::Remote {
                    auth_service_url: auth_service_url.trim_end_matches('/').to_string(),
                    timeout: StdDuration::from_millis(timeout_ms),
                }
            }
            Some(other) => {
                return Err(ConfigError::invalid("VERIFIER_MODE", format!("expected local or remote, got {other}")));
            }
        };

        let event_log = EventLogConfig {
            redis_url: get("REDIS_URL"),
            consumer_group: get("REPLICA_CONSUMER_GROUP").unwrap_or_else(|| "identity.replica".to_string()),
            consumer_name: get("REPLICA_CONSUMER_NAME").unwrap_or_else(|| format!("replica-{}", Uuid::new_v4())),
        };

        let bind_addr = get("BIND_ADDR")
            .unwrap_or_else(|| "0.0.0.0:8080".to_string())
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::invalid("BIND_ADDR", e.to_string()))?;

        let bootstrap_admin = match (get("BOOTSTRAP_ADMIN_EMAIL"), get("BOOTSTRAP_ADMIN_PASSWORD")) {
            (Some(email), Some(password)) => Some(BootstrapAdmin { email, password }),
            (None, None) => None,
            (Some(_), None) => return Err(ConfigError::Missing("BOOTSTRAP_ADMIN_PASSWORD")),
            (None, Some(_)) => return Err(ConfigError::Missing("BOOTSTRAP_ADMIN_EMAIL")),
        };

        Ok(Self {
            access,
            refresh,
            password_hash_cost,
            verifier,
            event_log,
            database_url: get("DATABASE_URL"),
            bind_addr,
            bootstrap_admin,
        })
    }
}

fn secret_or_dev_default(value: Option<String>, key: &str, fallback: &str) -> String {
    value.unwrap_or_else(|| {
        tracing::warn!(key, "secret not set; using insecure dev default");
        fallback.to_string()
    })
}

fn seconds(value: Option<String>, key: &'static str, default: i64) -> Result<Duration, ConfigError> {
    let secs = match value {
        Some(raw) => raw
            .parse::<i64>()
            .ok()
            .filter(|s| *s > 0 && *s <= MAX_TOKEN_TTL_SECS)
            .ok_or_else(|| ConfigError::invalid(key, format!("expected 1..={MAX_TOKEN_TTL_SECS} seconds")))?,
        None => default,
    };
    Ok(Duration::seconds(secs))
}
