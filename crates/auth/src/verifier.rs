//! Access credential verification.
//!
//! One [`Verifier`] seam, two variants: [`LocalVerifier`] (signature check +
//! system-of-record lookup, used by the service owning user data) and the
//! remote introspector in `scribe-infra` (delegates to the owning service).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use crate::{AuthError, Identity, TokenCodec, UserDirectory, validate_claims};

#[async_trait]
pub trait Verifier: Send + Sync {
    /// Verify an access credential and produce the caller's identity.
    async fn verify(&self, access_token: &str) -> Result<Identity, AuthError>;
}

#[async_trait]
impl<V> Verifier for Arc<V>
where
    V: Verifier + ?Sized,
{
    async fn verify(&self, access_token: &str) -> Result<Identity, AuthError> {
        (**self).verify(access_token).await
    }
}

/// Verifies credentials locally against the user system of record.
///
/// A valid signature is not enough: the subject must still exist and be
/// active (handles deletion/deactivation between issuance and use).
#[derive(Debug, Clone)]
pub struct LocalVerifier<D> {
    codec: TokenCodec,
    directory: D,
}

impl<D> LocalVerifier<D>
where
    D: UserDirectory,
{
    pub fn new(codec: TokenCodec, directory: D) -> Self {
        Self { codec, directory }
    }
}

#[async_trait]
impl<D> Verifier for LocalVerifier<D>
where
    D: UserDirectory,
{
    async fn verify(&self, access_token: &str) -> Result<Identity, AuthError> {
        let claims = self.codec.decode(access_token)?;
        validate_claims(&claims, Utc::now()).map_err(|e| {
            tracing::debug!(error = %e, "access token claims rejected");
            AuthError::TokenExpiredOrInvalid
        })?;

        match self.directory.find_by_id(claims.sub).await? {
            Some(user) if user.is_active => Ok(Identity::from(&user)),
            Some(_) => {
                tracing::info!(user_id = %claims.sub, "token subject is deactivated");
                Err(AuthError::UserNotFoundOrInactive)
            }
            None => {
                tracing::info!(user_id = %claims.sub, "token subject no longer exists");
                Err(AuthError::UserNotFoundOrInactive)
            }
        }
    }
}
