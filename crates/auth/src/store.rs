//! Persistence seams consumed by the identity layer.
//!
//! Implementations live in `scribe-infra` (in-memory and Postgres). All
//! methods are reads or single-row writes; no method spans a transaction
//! across tables.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use scribe_core::{RefreshTokenId, UserId};

use crate::{
    Permission, PermissionSet, RefreshTokenRecord, Role, SessionRecord, StoreError, UserPatch,
    UserRecord, UserReplica,
};

/// Read access to the user system of record (or its local replica).
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Lookup by normalized (trimmed, lowercased) email.
    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, StoreError>;

    async fn find_by_id(&self, id: UserId) -> Result<Option<UserRecord>, StoreError>;
}

/// Role → permission membership.
#[async_trait]
pub trait RolePermissionSource: Send + Sync {
    /// Union of the permissions held by every role in `roles`.
    ///
    /// Unknown roles contribute nothing; an empty slice yields an empty set.
    async fn permissions_for_roles(&self, roles: &[Role]) -> Result<PermissionSet, StoreError>;
}

/// Refresh credential and session persistence.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn insert_refresh_token(&self, record: RefreshTokenRecord) -> Result<(), StoreError>;

    /// Exact digest match on a row that is unrevoked and unexpired at `now`.
    async fn find_active_refresh_token(
        &self,
        token_digest: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<RefreshTokenRecord>, StoreError>;

    /// Set `revoked_at` on the user's unrevoked rows matching the digest.
    ///
    /// Returns the ids that were revoked by this call (empty when already revoked).
    async fn revoke_refresh_tokens(
        &self,
        user_id: UserId,
        token_digest: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<RefreshTokenId>, StoreError>;

    async fn insert_session(&self, session: SessionRecord) -> Result<(), StoreError>;

    /// Flip sessions bound to the given refresh credentials to invalid.
    async fn invalidate_sessions(
        &self,
        user_id: UserId,
        refresh_token_ids: &[RefreshTokenId],
    ) -> Result<u64, StoreError>;
}

/// Local replica of user rows owned by another service.
///
/// Every method is idempotent on its own: replaying a call leaves the same state.
#[async_trait]
pub trait ReplicaStore: Send + Sync {
    /// Insert unless a row with the same id exists. Returns `true` if inserted.
    async fn insert_if_absent(&self, row: UserReplica) -> Result<bool, StoreError>;

    /// Apply a partial update. Returns `false` (and creates nothing) if the row is absent.
    async fn apply_patch(&self, id: UserId, patch: &UserPatch) -> Result<bool, StoreError>;

    /// Remove the row. Returns `false` if it was already absent.
    async fn remove(&self, id: UserId) -> Result<bool, StoreError>;

    async fn get(&self, id: UserId) -> Result<Option<UserReplica>, StoreError>;
}

macro_rules! forward_arc {
    ($tr:ident { $( async fn $m:ident(&self $(, $a:ident : $t:ty)* ) -> $r:ty; )* }) => {
        #[async_trait]
        impl<S> $tr for Arc<S>
        where
            S: $tr + ?Sized,
        {
            $(
                async fn $m(&self $(, $a: $t)*) -> $r {
                    (**self).$m($($a),*).await
                }
            )*
        }
    };
}

forward_arc!(UserDirectory {
    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, StoreError>;
    async fn find_by_id(&self, id: UserId) -> Result<Option<UserRecord>, StoreError>;
});

forward_arc!(RolePermissionSource {
    async fn permissions_for_roles(&self, roles: &[Role]) -> Result<PermissionSet, StoreError>;
});

forward_arc!(CredentialStore {
    async fn insert_refresh_token(&self, record: RefreshTokenRecord) -> Result<(), StoreError>;
    async fn find_active_refresh_token(&self, token_digest: &str, now: DateTime<Utc>) -> Result<Option<RefreshTokenRecord>, StoreError>;
    async fn revoke_refresh_tokens(&self, user_id: UserId, token_digest: &str, now: DateTime<Utc>) -> Result<Vec<RefreshTokenId>, StoreError>;
    async fn insert_session(&self, session: SessionRecord) -> Result<(), StoreError>;
    async fn invalidate_sessions(&self, user_id: UserId, refresh_token_ids: &[RefreshTokenId]) -> Result<u64, StoreError>;
});

forward_arc!(ReplicaStore {
    async fn insert_if_absent(&self, row: UserReplica) -> Result<bool, StoreError>;
    async fn apply_patch(&self, id: UserId, patch: &UserPatch) -> Result<bool, StoreError>;
    async fn remove(&self, id: UserId) -> Result<bool, StoreError>;
    async fn get(&self, id: UserId) -> Result<Option<UserReplica>, StoreError>;
});

/// Fixed role → permission mapping.
///
/// Used by services that hold no role tables of their own (the remote path)
/// and by tests.
#[derive(Debug, Clone, Default)]
pub struct StaticRolePermissions {
    grants: HashMap<Role, Vec<Permission>>,
}

impl StaticRolePermissions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(mut self, role: impl Into<Role>, permissions: impl IntoIterator<Item = Permission>) -> Self {
        self.grants.entry(role.into()).or_default().extend(permissions);
        self
    }

    pub fn permissions_of(&self, role: &Role) -> &[Permission] {
        self.grants.get(role).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[async_trait]
impl RolePermissionSource for StaticRolePermissions {
    async fn permissions_for_roles(&self, roles: &[Role]) -> Result<PermissionSet, StoreError> {
        Ok(roles
            .iter()
            .flat_map(|role| self.permissions_of(role).iter().cloned())
            .collect())
    }
}
