//! Credential issuance: login, refresh, logout.

use chrono::{Duration, Utc};

use scribe_core::{RefreshTokenId, SessionId, UserId};

use crate::{
    AuthError, CredentialStore, Identity, MAX_TOKEN_TTL_SECS, PasswordHasher, PublicUser, RefreshTokenDigester,
    RefreshTokenRecord, SessionRecord, TokenCodec, UserDirectory, generate_refresh_token, normalize_email,
};

/// Where a login came from (recorded on the session row).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoginContext {
    pub device_info: Option<String>,
    pub ip_address: Option<String>,
}

/// Credentials handed to the client at login.
#[derive(Clone, PartialEq, Eq)]
pub struct IssuedCredentials {
    pub access_token: String,
    pub refresh_token: String,
    pub user: PublicUser,
}

impl core::fmt::Debug for IssuedCredentials {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("IssuedCredentials")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("user", &self.user)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogoutOutcome {
    pub refresh_tokens_revoked: usize,
    pub sessions_invalidated: u64,
}

/// Mints access credentials and manages refresh credentials and sessions.
///
/// Refresh credentials are not rotated: one row per login, revoked at logout,
/// otherwise left to expire.
pub struct CredentialIssuer<S> {
    store: S,
    codec: TokenCodec,
    digester: RefreshTokenDigester,
    hasher: PasswordHasher,
    refresh_ttl: Duration,
    /// Verified against when the email is unknown, so both failure paths cost the same.
    dummy_hash: String,
}

impl<S> CredentialIssuer<S>
where
    S: UserDirectory + CredentialStore,
{
    pub fn new(
        store: S,
        codec: TokenCodec,
        digester: RefreshTokenDigester,
        hasher: PasswordHasher,
        refresh_ttl: Duration,
    ) -> Result<Self, AuthError> {
        if refresh_ttl <= Duration::zero() || refresh_ttl > Duration::seconds(MAX_TOKEN_TTL_SECS) {
            return Err(AuthError::Crypto(format!(
                "refresh token ttl must be between 1 and {MAX_TOKEN_TTL_SECS} seconds"
            )));
        }
        let dummy_hash = hasher.hash("scribe-login-timing-guard")?;
        Ok(Self {
            store,
            codec,
            digester,
            hasher,
            refresh_ttl,
            dummy_hash,
        })
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    /// Authenticate with email + password.
    ///
    /// Unknown email, inactive user and wrong password all fail with the same
    /// `InvalidCredentials`. Session and refresh rows are written sequentially;
    /// a failure after the refresh row only loses audit data.
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        context: LoginContext,
    ) -> Result<IssuedCredentials, AuthError> {
        let email = normalize_email(email);
        let user = self.store.find_by_email(&email).await?;

        let user = match user {
            Some(user) => {
                let password_ok = self.hasher.verify_async(password, &user.password_hash).await;
                if !password_ok || !user.is_active {
                    tracing::info!(user_id = %user.id, "login rejected");
                    return Err(AuthError::InvalidCredentials);
                }
                user
            }
            None => {
                let _ = self.hasher.verify_async(password, &self.dummy_hash).await;
                tracing::info!("login rejected for unknown email");
                return Err(AuthError::InvalidCredentials);
            }
        };

        let now = Utc::now();
        let access_token = self.codec.issue(user.id, &user.email, now)?;
        let refresh_token = generate_refresh_token();
        let refresh_id = RefreshTokenId::new();
        let expires_at = now
            .checked_add_signed(self.refresh_ttl)
            .ok_or_else(|| AuthError::Crypto("refresh token expiry out of range".to_string()))?;

        self.store
            .insert_refresh_token(RefreshTokenRecord {
                id: refresh_id,
                user_id: user.id,
                token_digest: self.digester.digest(&refresh_token),
                expires_at,
                revoked_at: None,
                created_at: now,
            })
            .await?;

        let session = SessionRecord {
            id: SessionId::new(),
            user_id: user.id,
            refresh_token_id: Some(refresh_id),
            device_info: context.device_info,
            ip_address: context.ip_address,
            expires_at,
            is_valid: true,
            created_at: now,
        };
        if let Err(e) = self.store.insert_session(session).await {
            tracing::warn!(user_id = %user.id, error = %e, "session row not written");
        }

        tracing::info!(user_id = %user.id, "login succeeded");
        Ok(IssuedCredentials {
            access_token,
            refresh_token,
            user: PublicUser::from(&Identity::from(&user)),
        })
    }

    /// Exchange a refresh credential for a new access credential.
    ///
    /// The refresh credential itself is left as is.
    pub async fn refresh(&self, refresh_token: &str) -> Result<String, AuthError> {
        let now = Utc::now();
        let digest = self.digester.digest(refresh_token);

        let record = self
            .store
            .find_active_refresh_token(&digest, now)
            .await?
            .filter(|r| r.is_usable(now))
            .ok_or(AuthError::InvalidRefreshToken)?;

        // The subject must still be able to log in.
        let user = self
            .store
            .find_by_id(record.user_id)
            .await?
            .filter(|u| u.is_active)
            .ok_or(AuthError::InvalidRefreshToken)?;

        tracing::debug!(user_id = %user.id, "access token refreshed");
        self.codec.issue(user.id, &user.email, now)
    }

    /// Revoke the caller's refresh credential and invalidate its sessions.
    ///
    /// Idempotent: a second logout revokes nothing and still succeeds.
    pub async fn logout(&self, user_id: UserId, refresh_token: &str) -> Result<LogoutOutcome, AuthError> {
        let now = Utc::now();
        let digest = self.digester.digest(refresh_token);

        let revoked = self.store.revoke_refresh_tokens(user_id, &digest, now).await?;
        let sessions_invalidated = if revoked.is_empty() {
            0
        } else {
            self.store.invalidate_sessions(user_id, &revoked).await?
        };

        tracing::info!(
            user_id = %user_id,
            refresh_tokens_revoked = revoked.len(),
            sessions_invalidated,
            "logout"
        );
        Ok(LogoutOutcome {
            refresh_tokens_revoked: revoked.len(),
            sessions_invalidated,
        })
    }
}
