use thiserror::Error;

/// Persistence adapter failure (database, cache, broker).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),

    #[error("store conflict: {0}")]
    Conflict(String),
}

impl StoreError {
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }
}

/// Identity and authorization failures.
///
/// Verification and permission failures map directly to 401/403 at the HTTP
/// boundary and are never retried server-side.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Unknown email, inactive account or wrong password (deliberately indistinguishable).
    #[error("invalid credentials")]
    InvalidCredentials,

    /// Refresh credential missing, expired or revoked.
    #[error("invalid refresh token")]
    InvalidRefreshToken,

    /// Structural, signature or expiry failure of an access credential.
    #[error("token expired or invalid")]
    TokenExpiredOrInvalid,

    /// Valid signature, but the subject is gone or deactivated.
    #[error("user not found or inactive")]
    UserNotFoundOrInactive,

    /// No identity present (permission stage ran before authentication).
    #[error("unauthenticated")]
    Unauthenticated,

    #[error("forbidden: missing permission '{0}'")]
    InsufficientPermission(String),

    /// The issuing service could not be reached or answered unexpectedly.
    #[error("auth service unavailable: {0}")]
    AuthServiceUnavailable(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// Key material or hashing parameters were rejected.
    #[error("credential crypto error: {0}")]
    Crypto(String),
}
