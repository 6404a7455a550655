//! Postgres-backed identity store.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (foreign key violation) | `23503` | `Conflict` |
//! | Database (other) | Any other | `Backend` |
//! | PoolClosed / Io / other | N/A | `Backend` |
//!
//! Schema lives in `migrations/0001_identity.sql` and is applied by
//! [`PostgresIdentityStore::migrate`].

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use scribe_auth::{
    CredentialStore, Permission, PermissionSet, RefreshTokenRecord, ReplicaStore, Role,
    RolePermissionSource, SessionRecord, StoreError, UserDirectory, UserPatch, UserRecord,
    UserReplica,
};
use scribe_core::{RefreshTokenId, UserId};

use super::RoleAdmin;

const SCHEMA: &str = include_str!("../../migrations/0001_identity.sql");

const USER_COLUMNS: &str =
    "id, email, username, password_hash, first_name, last_name, is_active, is_verified";

/// Postgres-backed identity store.
///
/// Uses the SQLx connection pool (Send + Sync); multi-statement writes run in
/// a transaction.
#[derive(Debug, Clone)]
pub struct PostgresIdentityStore {
    pool: Arc<PgPool>,
}

impl PostgresIdentityStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }

    /// Connect to `database_url` with a default pool.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Apply the identity schema (idempotent).
    #[instrument(skip(self))]
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    async fn roles_of(&self, user_id: Uuid) -> Result<Vec<Role>, StoreError> {
        let rows = sqlx::query("SELECT role_name FROM user_roles WHERE user_id = $1 ORDER BY role_name")
            .bind(user_id)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("roles_of", e))?;
        rows.iter()
            .map(|row| {
                row.try_get::<String, _>("role_name")
                    .map(Role::new)
                    .map_err(|e| map_sqlx_error("roles_of", e))
            })
            .collect()
    }

    async fn with_roles(&self, row: Option<PgRow>) -> Result<Option<UserRecord>, StoreError> {
        let Some(row) = row else {
            return Ok(None);
        };
        let replica = replica_from_row(&row)?;
        let roles = self.roles_of(*replica.id.as_uuid()).await?;
        Ok(Some(UserRecord::from_replica(replica, roles)))
    }
}

fn replica_from_row(row: &PgRow) -> Result<UserReplica, StoreError> {
    let decode = |e| map_sqlx_error("decode_user", e);
    Ok(UserReplica {
        id: UserId::from_uuid(row.try_get("id").map_err(decode)?),
        email: row.try_get("email").map_err(decode)?,
        username: row.try_get("username").map_err(decode)?,
        password_hash: row.try_get("password_hash").map_err(decode)?,
        first_name: row.try_get("first_name").map_err(decode)?,
        last_name: row.try_get("last_name").map_err(decode)?,
        is_active: row.try_get("is_active").map_err(decode)?,
        is_verified: row.try_get("is_verified").map_err(decode)?,
    })
}

fn refresh_from_row(row: &PgRow) -> Result<RefreshTokenRecord, StoreError> {
    let decode = |e| map_sqlx_error("decode_refresh_token", e);
    Ok(RefreshTokenRecord {
        id: RefreshTokenId::from_uuid(row.try_get("id").map_err(decode)?),
        user_id: UserId::from_uuid(row.try_get("user_id").map_err(decode)?),
        token_digest: row.try_get("token_digest").map_err(decode)?,
        expires_at: row.try_get("expires_at").map_err(decode)?,
        revoked_at: row.try_get("revoked_at").map_err(decode)?,
        created_at: row.try_get("created_at").map_err(decode)?,
    })
}

#[async_trait]
impl UserDirectory for PostgresIdentityStore {
    #[instrument(skip(self))]
    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, StoreError> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE lower(email) = lower($1)"))
            .bind(email)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_by_email", e))?;
        self.with_roles(row).await
    }

    #[instrument(skip(self), fields(user_id = %id))]
    async fn find_by_id(&self, id: UserId) -> Result<Option<UserRecord>, StoreError> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(*id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_by_id", e))?;
        self.with_roles(row).await
    }
}

#[async_trait]
impl RolePermissionSource for PostgresIdentityStore {
    async fn permissions_for_roles(&self, roles: &[Role]) -> Result<PermissionSet, StoreError> {
        if roles.is_empty() {
            return Ok(PermissionSet::empty());
        }
        let names: Vec<String> = roles.iter().map(|r| r.as_str().to_string()).collect();
        let rows = sqlx::query(
            "SELECT DISTINCT permission_name FROM role_permissions WHERE role_name = ANY($1)",
        )
        .bind(&names)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("permissions_for_roles", e))?;

        rows.iter()
            .map(|row| {
                row.try_get::<String, _>("permission_name")
                    .map(Permission::new)
                    .map_err(|e| map_sqlx_error("permissions_for_roles", e))
            })
            .collect()
    }
}

#[async_trait]
impl CredentialStore for PostgresIdentityStore {
    #[instrument(skip(self, record), fields(user_id = %record.user_id))]
    async fn insert_refresh_token(&self, record: RefreshTokenRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (id, user_id, token_digest, expires_at, revoked_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(*record.id.as_uuid())
        .bind(*record.user_id.as_uuid())
        .bind(&record.token_digest)
        .bind(record.expires_at)
        .bind(record.revoked_at)
        .bind(record.created_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_refresh_token", e))?;
        Ok(())
    }

    #[instrument(skip(self, token_digest))]
    async fn find_active_refresh_token(
        &self,
        token_digest: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<RefreshTokenRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, token_digest, expires_at, revoked_at, created_at
            FROM refresh_tokens
            WHERE token_digest = $1 AND revoked_at IS NULL AND expires_at > $2
            "#,
        )
        .bind(token_digest)
        .bind(now)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_active_refresh_token", e))?;
        row.as_ref().map(refresh_from_row).transpose()
    }

    #[instrument(skip(self, token_digest), fields(user_id = %user_id))]
    async fn revoke_refresh_tokens(
        &self,
        user_id: UserId,
        token_digest: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<RefreshTokenId>, StoreError> {
        let rows = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET revoked_at = $3
            WHERE user_id = $1 AND token_digest = $2 AND revoked_at IS NULL
            RETURNING id
            "#,
        )
        .bind(*user_id.as_uuid())
        .bind(token_digest)
        .bind(now)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("revoke_refresh_tokens", e))?;

        rows.iter()
            .map(|row| {
                row.try_get::<Uuid, _>("id")
                    .map(RefreshTokenId::from_uuid)
                    .map_err(|e| map_sqlx_error("revoke_refresh_tokens", e))
            })
            .collect()
    }

    #[instrument(skip(self, session), fields(user_id = %session.user_id))]
    async fn insert_session(&self, session: SessionRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO sessions (id, user_id, refresh_token_id, device_info, ip_address, expires_at, is_valid, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(*session.id.as_uuid())
        .bind(*session.user_id.as_uuid())
        .bind(session.refresh_token_id.map(|id| *id.as_uuid()))
        .bind(&session.device_info)
        .bind(&session.ip_address)
        .bind(session.expires_at)
        .bind(session.is_valid)
        .bind(session.created_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_session", e))?;
        Ok(())
    }

    #[instrument(skip(self, refresh_token_ids), fields(user_id = %user_id))]
    async fn invalidate_sessions(
        &self,
        user_id: UserId,
        refresh_token_ids: &[RefreshTokenId],
    ) -> Result<u64, StoreError> {
        if refresh_token_ids.is_empty() {
            return Ok(0);
        }
        let ids: Vec<Uuid> = refresh_token_ids.iter().map(|id| *id.as_uuid()).collect();
        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET is_valid = FALSE
            WHERE user_id = $1 AND refresh_token_id = ANY($2) AND is_valid
            "#,
        )
        .bind(*user_id.as_uuid())
        .bind(&ids)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("invalidate_sessions", e))?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl ReplicaStore for PostgresIdentityStore {
    #[instrument(skip(self, row), fields(user_id = %row.id))]
    async fn insert_if_absent(&self, row: UserReplica) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO users (id, email, username, password_hash, first_name, last_name, is_active, is_verified)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(*row.id.as_uuid())
        .bind(&row.email)
        .bind(&row.username)
        .bind(&row.password_hash)
        .bind(&row.first_name)
        .bind(&row.last_name)
        .bind(row.is_active)
        .bind(row.is_verified)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_if_absent", e))?;
        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self, patch), fields(user_id = %id))]
    async fn apply_patch(&self, id: UserId, patch: &UserPatch) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE users SET
                email         = COALESCE($2, email),
                username      = COALESCE($3, username),
                password_hash = COALESCE($4, password_hash),
                first_name    = COALESCE($5, first_name),
                last_name     = COALESCE($6, last_name),
                is_active     = COALESCE($7, is_active),
                is_verified   = COALESCE($8, is_verified),
                updated_at    = NOW()
            WHERE id = $1
            "#,
        )
        .bind(*id.as_uuid())
        .bind(&patch.email)
        .bind(&patch.username)
        .bind(&patch.password_hash)
        .bind(&patch.first_name)
        .bind(&patch.last_name)
        .bind(patch.is_active)
        .bind(patch.is_verified)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("apply_patch", e))?;
        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self), fields(user_id = %id))]
    async fn remove(&self, id: UserId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(*id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("remove_user", e))?;
        Ok(result.rows_affected() == 1)
    }

    async fn get(&self, id: UserId) -> Result<Option<UserReplica>, StoreError> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(*id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_user", e))?;
        row.as_ref().map(replica_from_row).transpose()
    }
}

#[async_trait]
impl RoleAdmin for PostgresIdentityStore {
    #[instrument(skip(self, permissions), fields(role = %role))]
    async fn define_role(&self, role: &Role, permissions: &[Permission]) -> Result<(), StoreError> {
        let map = |e| map_sqlx_error("define_role", e);
        let mut tx = self.pool.begin().await.map_err(map)?;

        sqlx::query("INSERT INTO roles (name) VALUES ($1) ON CONFLICT DO NOTHING")
            .bind(role.as_str())
            .execute(&mut *tx)
            .await
            .map_err(map)?;

        for permission in permissions {
            sqlx::query("INSERT INTO permissions (name) VALUES ($1) ON CONFLICT DO NOTHING")
                .bind(permission.as_str())
                .execute(&mut *tx)
                .await
                .map_err(map)?;
            sqlx::query(
                "INSERT INTO role_permissions (role_name, permission_name) VALUES ($1, $2) ON CONFLICT DO NOTHING",
            )
            .bind(role.as_str())
            .bind(permission.as_str())
            .execute(&mut *tx)
            .await
            .map_err(map)?;
        }

        tx.commit().await.map_err(map)?;
        Ok(())
    }

    #[instrument(skip(self), fields(user_id = %user_id, role = %role))]
    async fn grant_role(&self, user_id: UserId, role: &Role) -> Result<(), StoreError> {
        let map = |e| map_sqlx_error("grant_role", e);
        let mut tx = self.pool.begin().await.map_err(map)?;

        sqlx::query("INSERT INTO roles (name) VALUES ($1) ON CONFLICT DO NOTHING")
            .bind(role.as_str())
            .execute(&mut *tx)
            .await
            .map_err(map)?;
        sqlx::query("INSERT INTO user_roles (user_id, role_name) VALUES ($1, $2) ON CONFLICT DO NOTHING")
            .bind(*user_id.as_uuid())
            .bind(role.as_str())
            .execute(&mut *tx)
            .await
            .map_err(map)?;

        tx.commit().await.map_err(map)?;
        Ok(())
    }

    async fn revoke_role(&self, user_id: UserId, role: &Role) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM user_roles WHERE user_id = $1 AND role_name = $2")
            .bind(*user_id.as_uuid())
            .bind(role.as_str())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("revoke_role", e))?;
        Ok(())
    }
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") | Some("23503") => StoreError::Conflict(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => StoreError::backend(format!("connection pool closed in {operation}")),
        other => StoreError::backend(format!("{operation}: {other}")),
    }
}
