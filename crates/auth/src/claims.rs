use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use scribe_core::UserId;

/// Allowed clock skew for `iat` in the future.
const MAX_CLOCK_SKEW_SECS: i64 = 30;

/// Access credential claims.
///
/// Standard JWT claim names; timestamps are seconds since the Unix epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Subject: the user id.
    pub sub: UserId,

    pub email: String,

    /// Issued-at.
    pub iat: i64,

    /// Expiration.
    pub exp: i64,

    /// Unique token id; two credentials minted in the same second still differ.
    pub jti: Uuid,
}

impl AccessClaims {
    /// `None` when `issued_at + ttl` falls outside the representable range.
    pub fn new(sub: UserId, email: impl Into<String>, issued_at: DateTime<Utc>, ttl: chrono::Duration) -> Option<Self> {
        let expires_at = issued_at.checked_add_signed(ttl)?;
        Some(Self {
            sub,
            email: email.into(),
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
            jti: Uuid::new_v4(),
        })
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenValidationError {
    #[error("token has expired")]
    Expired,

    #[error("token not yet valid (iat is in the future)")]
    NotYetValid,

    #[error("invalid token time window (exp <= iat)")]
    InvalidTimeWindow,
}

/// Deterministically validate decoded claims against `now`.
///
/// Signature verification happens in [`TokenCodec`](crate::TokenCodec); this
/// only checks the time window.
pub fn validate_claims(claims: &AccessClaims, now: DateTime<Utc>) -> Result<(), TokenValidationError> {
    let now = now.timestamp();
    if claims.exp <= claims.iat {
        return Err(TokenValidationError::InvalidTimeWindow);
    }
    if claims.iat > now + MAX_CLOCK_SKEW_SECS {
        return Err(TokenValidationError::NotYetValid);
    }
    if now >= claims.exp {
        return Err(TokenValidationError::Expired);
    }
    Ok(())
}
