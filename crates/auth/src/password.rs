//! Argon2id password hashing (PHC strings).

use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString, rand_core::OsRng},
};

use crate::AuthError;

/// Default Argon2 time cost (iterations).
pub const DEFAULT_TIME_COST: u32 = 2;

#[derive(Clone)]
pub struct PasswordHasher {
    argon: Argon2<'static>,
}

impl PasswordHasher {
    /// `time_cost` is the Argon2 iteration count (the configurable work factor).
    pub fn new(time_cost: u32) -> Result<Self, AuthError> {
        let params = Params::new(Params::DEFAULT_M_COST, time_cost, Params::DEFAULT_P_COST, None)
            .map_err(|e| AuthError::Crypto(e.to_string()))?;
        Ok(Self {
            argon: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        })
    }

    pub fn hash(&self, password: &str) -> Result<String, AuthError> {
        let salt = SaltString::generate(&mut OsRng);
        self.argon
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| AuthError::Crypto(e.to_string()))
    }

    /// [`hash`](Self::hash) on the blocking pool, off the async workers.
    pub async fn hash_async(&self, password: &str) -> Result<String, AuthError> {
        let hasher = self.clone();
        let password = password.to_string();
        tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| AuthError::Crypto(format!("hashing task failed: {e}")))?
    }

    /// [`verify`](Self::verify) on the blocking pool. A failed task never verifies.
    pub async fn verify_async(&self, password: &str, phc: &str) -> bool {
        let hasher = self.clone();
        let password = password.to_string();
        let phc = phc.to_string();
        match tokio::task::spawn_blocking(move || hasher.verify(&password, &phc)).await {
            Ok(ok) => ok,
            Err(e) => {
                tracing::error!(error = %e, "password verification task failed");
                false
            }
        }
    }

    /// `false` on mismatch and on a malformed stored hash alike.
    pub fn verify(&self, password: &str, phc: &str) -> bool {
        match PasswordHash::new(phc) {
            Ok(parsed) => self.argon.verify_password(password.as_bytes(), &parsed).is_ok(),
            Err(e) => {
                tracing::warn!(error = %e, "stored password hash is malformed");
                false
            }
        }
    }
}

impl core::fmt::Debug for PasswordHasher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("PasswordHasher")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_verify() {
        let hasher = PasswordHasher::new(1).unwrap();
        let phc = hasher.hash("correct horse").unwrap();

        assert!(phc.starts_with("$argon2id$"));
        assert!(hasher.verify("correct horse", &phc));
        assert!(!hasher.verify("wrong horse", &phc));
    }

    #[test]
    fn malformed_hash_never_verifies() {
        let hasher = PasswordHasher::new(1).unwrap();
        assert!(!hasher.verify("anything", "plaintext-not-a-phc"));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn async_verify_leaves_the_runtime_free() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicUsize, Ordering};

        let hasher = PasswordHasher::new(3).unwrap();
        let phc = hasher.hash("correct horse").unwrap();

        let ticks = Arc::new(AtomicUsize::new(0));
        let ticker = {
            let ticks = ticks.clone();
            tokio::spawn(async move {
                loop {
                    ticks.fetch_add(1, Ordering::SeqCst);
                    tokio::task::yield_now().await;
                }
            })
        };

        // On a single-threaded runtime the ticker only runs while this task is parked.
        assert!(hasher.verify_async("correct horse", &phc).await);
        assert!(ticks.load(Ordering::SeqCst) > 0);

        let again = hasher.hash_async("other").await.unwrap();
        assert!(hasher.verify_async("other", &again).await);
        assert!(!hasher.verify_async("wrong", &again).await);
        ticker.abort();
    }

    #[test]
    fn zero_time_cost_is_rejected() {
        assert!(PasswordHasher::new(0).is_err());
    }
}
