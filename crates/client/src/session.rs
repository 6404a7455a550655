//! Credential storage and the forced-logout hook.

use std::sync::{PoisonError, RwLock};

/// Holds the session's credentials. Implementations must be cheap to call;
/// the coordinator reads and writes them outside any await point.
pub trait TokenStore: Send + Sync {
    fn access_token(&self) -> Option<String>;
    fn refresh_token(&self) -> Option<String>;
    fn set_tokens(&self, access_token: String, refresh_token: String);
    fn set_access_token(&self, access_token: String);
    fn clear(&self);
}

#[derive(Debug, Default)]
struct Tokens {
    access: Option<String>,
    refresh: Option<String>,
}

#[derive(Debug, Default)]
pub struct InMemoryTokenStore {
    inner: RwLock<Tokens>,
}

impl InMemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tokens(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            inner: RwLock::new(Tokens {
                access: Some(access_token.into()),
                refresh: Some(refresh_token.into()),
            }),
        }
    }
}

impl TokenStore for InMemoryTokenStore {
    fn access_token(&self) -> Option<String> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).access.clone()
    }

    fn refresh_token(&self) -> Option<String> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).refresh.clone()
    }

    fn set_tokens(&self, access_token: String, refresh_token: String) {
        let mut tokens = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        tokens.access = Some(access_token);
        tokens.refresh = Some(refresh_token);
    }

    fn set_access_token(&self, access_token: String) {
        self.inner.write().unwrap_or_else(PoisonError::into_inner).access = Some(access_token);
    }

    fn clear(&self) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = Tokens::default();
    }
}

/// Side effect run when the session is lost (refresh failed).
pub trait LoginNavigator: Send + Sync {
    fn redirect_to_login(&self);
}

/// Navigator for headless clients: logs and does nothing else.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNavigator;

impl LoginNavigator for NoopNavigator {
    fn redirect_to_login(&self) {
        tracing::info!("session ended; login required");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clear_drops_both_tokens() {
        let store = InMemoryTokenStore::with_tokens("a", "r");
        store.set_access_token("a2".to_string());
        assert_eq!(store.access_token().as_deref(), Some("a2"));
        assert_eq!(store.refresh_token().as_deref(), Some("r"));

        store.clear();
        assert_eq!(store.access_token(), None);
        assert_eq!(store.refresh_token(), None);
    }
}
