//! Access credential signing and refresh credential generation.

use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use sha2::Sha256;

use scribe_core::UserId;

use crate::{AccessClaims, AuthError};

type HmacSha256 = Hmac<Sha256>;

/// Upper bound for access and refresh credential lifetimes.
pub const MAX_TOKEN_TTL_SECS: i64 = 366 * 24 * 60 * 60;

/// Length of a refresh credential in random bytes (hex-encoded on the wire).
const REFRESH_TOKEN_BYTES: usize = 32;

/// Signs and verifies access credentials (JWT, HMAC family).
#[derive(Clone)]
pub struct TokenCodec {
    algorithm: Algorithm,
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl TokenCodec {
    /// Only symmetric HMAC algorithms are accepted (`HS256`, `HS384`, `HS512`).
    pub fn new(secret: &[u8], algorithm: Algorithm, ttl: Duration) -> Result<Self, AuthError> {
        if !matches!(algorithm, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512) {
            return Err(AuthError::Crypto(format!(
                "unsupported access token algorithm {algorithm:?}"
            )));
        }
        if secret.is_empty() {
            return Err(AuthError::Crypto("access token secret is empty".to_string()));
        }
        if ttl <= Duration::zero() || ttl > Duration::seconds(MAX_TOKEN_TTL_SECS) {
            return Err(AuthError::Crypto(format!(
                "access token ttl must be between 1 and {MAX_TOKEN_TTL_SECS} seconds"
            )));
        }

        Ok(Self {
            algorithm,
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            ttl,
        })
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Mint an access credential for `sub` issued at `now`.
    pub fn issue(&self, sub: UserId, email: &str, now: DateTime<Utc>) -> Result<String, AuthError> {
        let claims = AccessClaims::new(sub, email, now, self.ttl)
            .ok_or_else(|| AuthError::Crypto("access token expiry out of range".to_string()))?;
        jsonwebtoken::encode(&Header::new(self.algorithm), &claims, &self.encoding)
            .map_err(|e| AuthError::Crypto(e.to_string()))
    }

    /// Check signature, algorithm and `exp`; any failure is `TokenExpiredOrInvalid`.
    pub fn decode(&self, token: &str) -> Result<AccessClaims, AuthError> {
        let mut validation = Validation::new(self.algorithm);
        validation.leeway = 0;
        validation.validate_exp = true;
        validation.set_required_spec_claims(&["exp", "iat", "sub"]);

        jsonwebtoken::decode::<AccessClaims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!(error = %e, "access token rejected");
                AuthError::TokenExpiredOrInvalid
            })
    }
}

impl core::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TokenCodec")
            .field("algorithm", &self.algorithm)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

/// Generate a fresh opaque refresh credential.
pub fn generate_refresh_token() -> String {
    let mut bytes = [0u8; REFRESH_TOKEN_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Keyed digest of refresh credentials.
///
/// Only the digest is persisted; lookups by exact token match compare digests.
#[derive(Clone)]
pub struct RefreshTokenDigester {
    mac: HmacSha256,
}

impl RefreshTokenDigester {
    pub fn new(secret: &[u8]) -> Result<Self, AuthError> {
        if secret.is_empty() {
            return Err(AuthError::Crypto("refresh token secret is empty".to_string()));
        }
        let mac = HmacSha256::new_from_slice(secret).map_err(|e| AuthError::Crypto(e.to_string()))?;
        Ok(Self { mac })
    }

    pub fn digest(&self, token: &str) -> String {
        let mac = self.mac.clone().chain_update(token.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

impl core::fmt::Debug for RefreshTokenDigester {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("RefreshTokenDigester")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec(secret: &[u8]) -> TokenCodec {
        TokenCodec::new(secret, Algorithm::HS256, Duration::minutes(15)).unwrap()
    }

    #[test]
    fn issued_token_decodes_to_same_subject() {
        let codec = codec(b"secret");
        let id = UserId::new();
        let token = codec.issue(id, "user@example.com", Utc::now()).unwrap();

        let claims = codec.decode(&token).unwrap();
        assert_eq!(claims.sub, id);
        assert_eq!(claims.email, "user@example.com");
    }

    #[test]
    fn two_tokens_in_same_second_differ() {
        let codec = codec(b"secret");
        let id = UserId::new();
        let now = Utc::now();
        assert_ne!(
            codec.issue(id, "a@example.com", now).unwrap(),
            codec.issue(id, "a@example.com", now).unwrap()
        );
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = codec(b"secret-a").issue(UserId::new(), "a@example.com", Utc::now()).unwrap();
        assert_eq!(codec(b"secret-b").decode(&token), Err(AuthError::TokenExpiredOrInvalid));
    }

    #[test]
    fn expired_token_is_rejected() {
        let codec = codec(b"secret");
        let issued = Utc::now() - Duration::hours(1);
        let token = codec.issue(UserId::new(), "a@example.com", issued).unwrap();
        assert_eq!(codec.decode(&token), Err(AuthError::TokenExpiredOrInvalid));
    }

    #[test]
    fn garbage_is_rejected() {
        assert_eq!(codec(b"secret").decode("not.a.jwt"), Err(AuthError::TokenExpiredOrInvalid));
    }

    #[test]
    fn ttl_beyond_the_cap_is_refused() {
        let too_long = Duration::seconds(MAX_TOKEN_TTL_SECS + 1);
        assert!(TokenCodec::new(b"secret", Algorithm::HS256, too_long).is_err());
        assert!(TokenCodec::new(b"secret", Algorithm::HS256, Duration::seconds(MAX_TOKEN_TTL_SECS)).is_ok());
    }

    #[test]
    fn issue_near_the_end_of_time_errors_instead_of_panicking() {
        let codec = TokenCodec::new(b"secret", Algorithm::HS256, Duration::seconds(MAX_TOKEN_TTL_SECS)).unwrap();
        let late = DateTime::<Utc>::MAX_UTC - Duration::days(1);
        assert!(matches!(codec.issue(UserId::new(), "a@example.com", late), Err(AuthError::Crypto(_))));
    }

    #[test]
    fn asymmetric_algorithms_are_refused() {
        assert!(TokenCodec::new(b"secret", Algorithm::RS256, Duration::minutes(1)).is_err());
    }

    #[test]
    fn refresh_tokens_are_random_hex() {
        let a = generate_refresh_token();
        let b = generate_refresh_token();
        assert_eq!(a.len(), REFRESH_TOKEN_BYTES * 2);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn digest_is_keyed_and_deterministic() {
        let a = RefreshTokenDigester::new(b"k1").unwrap();
        let b = RefreshTokenDigester::new(b"k2").unwrap();
        assert_eq!(a.digest("tok"), a.digest("tok"));
        assert_ne!(a.digest("tok"), b.digest("tok"));
        assert_ne!(a.digest("tok"), "tok");
    }
}
