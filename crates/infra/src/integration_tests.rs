//! Integration tests for the identity pipeline.
//!
//! Tests: users write path → EventBus → ReplicaWorker → store → issuer/verifier
//!
//! Verifies:
//! - Verified identities carry exactly the subject's current roles
//! - Deleted or deactivated subjects fail verification despite a valid signature
//! - Logout revokes the refresh credential and invalidates its session

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::Duration as ChronoDuration;
    use serde_json::Value as JsonValue;

    use scribe_auth::{
        Algorithm, AuthError, CredentialIssuer, LocalVerifier, LoginContext, PasswordHasher, Permission,
        PermissionEvaluator, RefreshTokenDigester, Role, TokenCodec, UserPatch, UserReplica, Verifier,
    };
    use scribe_core::UserId;
    use scribe_events::{EventBus, EventEnvelope, InMemoryEventBus};

    use crate::replication::{LifecyclePublisher, ReplicaSynchronizer};
    use crate::store::{InMemoryIdentityStore, RoleAdmin};
    use crate::workers::ReplicaWorker;

    type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;

    struct Harness {
        store: Arc<InMemoryIdentityStore>,
        publisher: LifecyclePublisher,
        issuer: CredentialIssuer<Arc<InMemoryIdentityStore>>,
        verifier: LocalVerifier<Arc<InMemoryIdentityStore>>,
        sync: Arc<ReplicaSynchronizer<Arc<InMemoryIdentityStore>>>,
        hasher: PasswordHasher,
        _worker: crate::workers::WorkerHandle,
    }

    fn codec() -> TokenCodec {
        TokenCodec::new(b"integration-secret", Algorithm::HS256, ChronoDuration::minutes(15)).unwrap()
    }

    fn setup() -> Harness {
        let store = Arc::new(InMemoryIdentityStore::new());
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let sync = Arc::new(ReplicaSynchronizer::new(store.clone()));
        let worker = ReplicaWorker::spawn("replica-it", bus.subscribe(), sync.clone());
        let hasher = PasswordHasher::new(1).unwrap();

        let issuer = CredentialIssuer::new(
            store.clone(),
            codec(),
            RefreshTokenDigester::new(b"refresh-secret").unwrap(),
            hasher.clone(),
            ChronoDuration::days(7),
        )
        .unwrap();

        Harness {
            verifier: LocalVerifier::new(codec(), store.clone()),
            publisher: LifecyclePublisher::new(bus),
            store,
            issuer,
            sync,
            hasher,
            _worker: worker,
        }
    }

    impl Harness {
        fn replica(&self, email: &str, password: &str) -> UserReplica {
            UserReplica {
                id: UserId::new(),
                email: email.to_string(),
                username: email.split('@').next().unwrap_or_default().to_string(),
                password_hash: self.hasher.hash(password).unwrap(),
                first_name: None,
                last_name: None,
                is_active: true,
                is_verified: true,
            }
        }

        /// Publish `user.created` and wait until the replica holds the row.
        async fn replicate(&self, row: UserReplica) -> UserId {
            let id = row.id;
            assert!(self.publisher.user_created(row));
            self.settle(|s| s.sync.stats().applied + s.sync.stats().already_applied >= 1).await;
            id
        }

        async fn settle<F: Fn(&Harness) -> bool>(&self, cond: F) {
            for _ in 0..400 {
                if cond(self) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            panic!("replica did not settle");
        }
    }

    #[tokio::test]
    async fn verified_identity_roles_match_current_memberships() {
        let h = setup();
        let id = h.replicate(h.replica("user@example.com", "correct horse")).await;
        h.store.grant_role(id, &Role::new("editor")).await.unwrap();
        h.store.grant_role(id, &Role::new("viewer")).await.unwrap();

        let creds = h.issuer.login("User@Example.com", "correct horse", LoginContext::default()).await.unwrap();
        let mut roles = creds.user.roles.clone();
        roles.sort();
        assert_eq!(roles, vec!["editor".to_string(), "viewer".to_string()]);

        let identity = h.verifier.verify(&creds.access_token).await.unwrap();
        assert_eq!(identity.id, id);
        assert!(identity.has_role("editor") && identity.has_role("viewer"));

        h.store.revoke_role(id, &Role::new("viewer")).await.unwrap();
        let identity = h.verifier.verify(&creds.access_token).await.unwrap();
        assert_eq!(identity.roles, vec![Role::new("editor")]);
    }

    #[tokio::test]
    async fn deactivated_then_deleted_subject_fails_verification() {
        let h = setup();
        let id = h.replicate(h.replica("user@example.com", "pw")).await;
        let creds = h.issuer.login("user@example.com", "pw", LoginContext::default()).await.unwrap();

        assert!(h.publisher.user_updated(
            id,
            UserPatch {
                is_active: Some(false),
                ..Default::default()
            }
        ));
        h.settle(|s| s.sync.stats().applied >= 2).await;
        assert_eq!(h.verifier.verify(&creds.access_token).await, Err(AuthError::UserNotFoundOrInactive));

        assert!(h.publisher.user_deleted(id));
        h.settle(|s| s.sync.stats().removed >= 1).await;
        assert_eq!(h.verifier.verify(&creds.access_token).await, Err(AuthError::UserNotFoundOrInactive));
    }

    #[tokio::test]
    async fn mixed_case_replicated_email_can_log_in() {
        let h = setup();
        let id = h.replicate(h.replica("User@Example.com", "pw")).await;

        for submitted in ["User@Example.com", "user@example.com", " USER@EXAMPLE.COM "] {
            let creds = h.issuer.login(submitted, "pw", LoginContext::default()).await.unwrap();
            assert_eq!(creds.user.id, id);
        }

        // A later rename to another casing still resolves.
        assert!(h.publisher.user_updated(
            id,
            UserPatch {
                email: Some("Renamed@Example.COM".to_string()),
                ..Default::default()
            }
        ));
        h.settle(|s| s.sync.stats().applied >= 2).await;
        let creds = h.issuer.login("renamed@example.com", "pw", LoginContext::default()).await.unwrap();
        assert_eq!(creds.user.id, id);
    }

    #[tokio::test]
    async fn replayed_create_leaves_one_row() {
        let h = setup();
        let row = h.replica("user@example.com", "pw");
        h.publisher.user_created(row.clone());
        h.publisher.user_created(row);
        h.settle(|s| s.sync.stats().already_applied == 1).await;

        assert_eq!(h.store.user_count(), 1);
        assert_eq!(h.sync.stats().applied, 1);
    }

    #[tokio::test]
    async fn refresh_then_logout_revokes_refresh_and_session() {
        let h = setup();
        let id = h.replicate(h.replica("user@example.com", "pw")).await;
        let ctx = LoginContext {
            device_info: Some("integration-test".to_string()),
            ip_address: Some("10.0.0.1".to_string()),
        };
        let creds = h.issuer.login("user@example.com", "pw", ctx).await.unwrap();
        assert_ne!(creds.access_token, creds.refresh_token);

        let fresh = h.issuer.refresh(&creds.refresh_token).await.unwrap();
        assert_ne!(fresh, creds.access_token);
        assert!(h.verifier.verify(&fresh).await.is_ok());

        let outcome = h.issuer.logout(id, &creds.refresh_token).await.unwrap();
        assert_eq!(outcome.refresh_tokens_revoked, 1);
        assert_eq!(outcome.sessions_invalidated, 1);
        assert!(h.store.sessions_of(id).iter().all(|s| !s.is_valid));
        assert!(h.store.refresh_tokens_of(id).iter().all(|r| r.revoked_at.is_some()));

        assert_eq!(h.issuer.refresh(&creds.refresh_token).await, Err(AuthError::InvalidRefreshToken));
        // Second logout is not an error.
        assert_eq!(h.issuer.logout(id, &creds.refresh_token).await.unwrap().refresh_tokens_revoked, 0);
    }

    #[tokio::test]
    async fn unknown_email_and_wrong_password_are_indistinguishable() {
        let h = setup();
        h.replicate(h.replica("user@example.com", "pw")).await;

        let unknown = h.issuer.login("nobody@example.com", "pw", LoginContext::default()).await;
        let wrong = h.issuer.login("user@example.com", "nope", LoginContext::default()).await;
        assert_eq!(unknown, Err(AuthError::InvalidCredentials));
        assert_eq!(wrong, Err(AuthError::InvalidCredentials));
    }

    #[tokio::test]
    async fn permissions_follow_store_grants() {
        let h = setup();
        let id = h.replicate(h.replica("user@example.com", "pw")).await;
        h.store
            .define_role(&Role::new("editor"), &[Permission::new("articles.write")])
            .await
            .unwrap();
        let evaluator = PermissionEvaluator::new(h.store.clone());

        let creds = h.issuer.login("user@example.com", "pw", LoginContext::default()).await.unwrap();
        let identity = h.verifier.verify(&creds.access_token).await.unwrap();
        let write = Permission::new("articles.write");
        assert_eq!(
            evaluator.check_permission(Some(&identity), &write).await,
            Err(AuthError::InsufficientPermission("articles.write".to_string()))
        );

        h.store.grant_role(id, &Role::new("editor")).await.unwrap();
        let identity = h.verifier.verify(&creds.access_token).await.unwrap();
        assert!(evaluator.check_permission(Some(&identity), &write).await.is_ok());
    }
}
