//! In-memory identity store for tests/dev.

use std::collections::{BTreeSet, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use scribe_auth::{
    CredentialStore, Permission, PermissionSet, RefreshTokenRecord, ReplicaStore, Role,
    RolePermissionSource, SessionRecord, StoreError, UserDirectory, UserPatch, UserRecord,
    UserReplica, normalize_email,
};
use scribe_core::{RefreshTokenId, SessionId, UserId};

use super::RoleAdmin;

#[derive(Debug, Default)]
struct Tables {
    users: HashMap<UserId, UserReplica>,
    user_roles: HashMap<UserId, BTreeSet<Role>>,
    role_permissions: HashMap<Role, BTreeSet<Permission>>,
    refresh_tokens: HashMap<RefreshTokenId, RefreshTokenRecord>,
    sessions: HashMap<SessionId, SessionRecord>,
}

impl Tables {
    fn record(&self, row: &UserReplica) -> UserRecord {
        let roles = self
            .user_roles
            .get(&row.id)
            .map(|r| r.iter().cloned().collect())
            .unwrap_or_default();
        UserRecord::from_replica(row.clone(), roles)
    }
}

/// In-memory identity store.
///
/// Mirrors the Postgres schema constraints that matter to callers: unique
/// user ids, unique emails, unique refresh digests, cascading role
/// memberships on user removal.
#[derive(Debug, Default)]
pub struct InMemoryIdentityStore {
    inner: RwLock<Tables>,
}

impl InMemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, StoreError> {
        self.inner.read().map_err(|_| StoreError::backend("identity store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, StoreError> {
        self.inner.write().map_err(|_| StoreError::backend("identity store lock poisoned"))
    }

    /// Refresh credential rows of a user (inspection helper).
    pub fn refresh_tokens_of(&self, user_id: UserId) -> Vec<RefreshTokenRecord> {
        self.read()
            .map(|t| {
                t.refresh_tokens
                    .values()
                    .filter(|r| r.user_id == user_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Session rows of a user (inspection helper).
    pub fn sessions_of(&self, user_id: UserId) -> Vec<SessionRecord> {
        self.read()
            .map(|t| t.sessions.values().filter(|s| s.user_id == user_id).cloned().collect())
            .unwrap_or_default()
    }

    pub fn user_count(&self) -> usize {
        self.read().map(|t| t.users.len()).unwrap_or(0)
    }
}

#[async_trait]
impl UserDirectory for InMemoryIdentityStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, StoreError> {
        let email = normalize_email(email);
        let tables = self.read()?;
        Ok(tables
            .users
            .values()
            .find(|u| normalize_email(&u.email) == email)
            .map(|row| tables.record(row)))
    }

    async fn find_by_id(&self, id: UserId) -> Result<Option<UserRecord>, StoreError> {
        let tables = self.read()?;
        Ok(tables.users.get(&id).map(|row| tables.record(row)))
    }
}

#[async_trait]
impl RolePermissionSource for InMemoryIdentityStore {
    async fn permissions_for_roles(&self, roles: &[Role]) -> Result<PermissionSet, StoreError> {
        let tables = self.read()?;
        Ok(roles
            .iter()
            .filter_map(|role| tables.role_permissions.get(role))
            .flat_map(|perms| perms.iter().cloned())
            .collect())
    }
}

#[async_trait]
impl CredentialStore for InMemoryIdentityStore {
    async fn insert_refresh_token(&self, record: RefreshTokenRecord) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        if tables.refresh_tokens.values().any(|r| r.token_digest == record.token_digest) {
            return Err(StoreError::Conflict("refresh token digest already exists".to_string()));
        }
        tables.refresh_tokens.insert(record.id, record);
        Ok(())
    }

    async fn find_active_refresh_token(
        &self,
        token_digest: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<RefreshTokenRecord>, StoreError> {
        let tables = self.read()?;
        Ok(tables
            .refresh_tokens
            .values()
            .find(|r| r.token_digest == token_digest && r.is_usable(now))
            .cloned())
    }

    async fn revoke_refresh_tokens(
        &self,
        user_id: UserId,
        token_digest: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<RefreshTokenId>, StoreError> {
        let mut tables = self.write()?;
        let mut revoked = Vec::new();
        for record in tables.refresh_tokens.values_mut() {
            if record.user_id == user_id && record.token_digest == token_digest && record.revoked_at.is_none() {
                record.revoked_at = Some(now);
                revoked.push(record.id);
            }
        }
        Ok(revoked)
    }

    async fn insert_session(&self, session: SessionRecord) -> Result<(), StoreError> {
        self.write()?.sessions.insert(session.id, session);
        Ok(())
    }

    async fn invalidate_sessions(
        &self,
        user_id: UserId,
        refresh_token_ids: &[RefreshTokenId],
    ) -> Result<u64, StoreError> {
        let mut tables = self.write()?;
        let mut flipped = 0;
        for session in tables.sessions.values_mut() {
            let bound = session
                .refresh_token_id
                .is_some_and(|id| refresh_token_ids.contains(&id));
            if session.user_id == user_id && bound && session.is_valid {
                session.is_valid = false;
                flipped += 1;
            }
        }
        Ok(flipped)
    }
}

#[async_trait]
impl ReplicaStore for InMemoryIdentityStore {
    async fn insert_if_absent(&self, row: UserReplica) -> Result<bool, StoreError> {
        let mut tables = self.write()?;
        if tables.users.contains_key(&row.id) {
            return Ok(false);
        }
        let email = normalize_email(&row.email);
        if tables.users.values().any(|u| normalize_email(&u.email) == email) {
            return Err(StoreError::Conflict(format!("email already taken: {}", row.email)));
        }
        tables.users.insert(row.id, row);
        Ok(true)
    }

    async fn apply_patch(&self, id: UserId, patch: &UserPatch) -> Result<bool, StoreError> {
        let mut tables = self.write()?;
        if let Some(email) = &patch.email {
            let wanted = normalize_email(email);
            if tables.users.values().any(|u| u.id != id && normalize_email(&u.email) == wanted) {
                return Err(StoreError::Conflict(format!("email already taken: {email}")));
            }
        }
        match tables.users.get_mut(&id) {
            Some(row) => {
                patch.apply_to(row);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn remove(&self, id: UserId) -> Result<bool, StoreError> {
        let mut tables = self.write()?;
        tables.user_roles.remove(&id);
        Ok(tables.users.remove(&id).is_some())
    }

    async fn get(&self, id: UserId) -> Result<Option<UserReplica>, StoreError> {
        Ok(self.read()?.users.get(&id).cloned())
    }
}

#[async_trait]
impl RoleAdmin for InMemoryIdentityStore {
    async fn define_role(&self, role: &Role, permissions: &[Permission]) -> Result<(), StoreError> {
        self.write()?
            .role_permissions
            .entry(role.clone())
            .or_default()
            .extend(permissions.iter().cloned());
        Ok(())
    }

    async fn grant_role(&self, user_id: UserId, role: &Role) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        if !tables.users.contains_key(&user_id) {
            return Err(StoreError::Conflict(format!("no such user: {user_id}")));
        }
        tables.role_permissions.entry(role.clone()).or_default();
        tables.user_roles.entry(user_id).or_default().insert(role.clone());
        Ok(())
    }

    async fn revoke_role(&self, user_id: UserId, role: &Role) -> Result<(), StoreError> {
        if let Some(roles) = self.write()?.user_roles.get_mut(&user_id) {
            roles.remove(role);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(email: &str) -> UserReplica {
        UserReplica {
            id: UserId::new(),
            email: email.to_string(),
            username: email.split('@').next().unwrap_or_default().to_string(),
            password_hash: "$argon2id$fake".to_string(),
            first_name: None,
            last_name: None,
            is_active: true,
            is_verified: true,
        }
    }

    #[tokio::test]
    async fn directory_reads_replica_rows_with_roles() {
        let store = InMemoryIdentityStore::new();
        let user = row("a@example.com");
        store.insert_if_absent(user.clone()).await.unwrap();
        store.grant_role(user.id, &Role::new("editor")).await.unwrap();

        let found = store.find_by_email("a@example.com").await.unwrap().unwrap();
        assert_eq!(found.id, user.id);
        assert_eq!(found.roles, vec![Role::new("editor")]);
    }

    #[tokio::test]
    async fn duplicate_email_with_new_id_conflicts() {
        let store = InMemoryIdentityStore::new();
        store.insert_if_absent(row("a@example.com")).await.unwrap();
        let err = store.insert_if_absent(row("a@example.com")).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn email_lookup_and_uniqueness_ignore_case() {
        let store = InMemoryIdentityStore::new();
        let user = row("Mixed@Example.com");
        store.insert_if_absent(user.clone()).await.unwrap();

        let found = store.find_by_email("mixed@example.com").await.unwrap().unwrap();
        assert_eq!(found.id, user.id);
        assert_eq!(found.email, "Mixed@Example.com");

        let err = store.insert_if_absent(row("MIXED@example.com")).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn removing_user_drops_role_memberships() {
        let store = InMemoryIdentityStore::new();
        let user = row("a@example.com");
        store.insert_if_absent(user.clone()).await.unwrap();
        store.grant_role(user.id, &Role::new("admin")).await.unwrap();

        assert!(store.remove(user.id).await.unwrap());
        store.insert_if_absent(user.clone()).await.unwrap();
        let back = store.find_by_id(user.id).await.unwrap().unwrap();
        assert!(back.roles.is_empty());
    }

    #[tokio::test]
    async fn granting_role_to_missing_user_fails() {
        let store = InMemoryIdentityStore::new();
        assert!(store.grant_role(UserId::new(), &Role::new("admin")).await.is_err());
    }
}
