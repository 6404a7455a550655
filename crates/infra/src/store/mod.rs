//! Identity persistence: users (replica rows + role memberships), role grants,
//! refresh credentials and sessions.
//!
//! One store backs every seam of `scribe-auth::store`, so the local verifier
//! reads exactly the rows the replica synchronizer writes.

use async_trait::async_trait;

use scribe_auth::{
    CredentialStore, Permission, ReplicaStore, Role, RolePermissionSource, StoreError, UserDirectory,
};
use scribe_core::UserId;

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryIdentityStore;
pub use postgres::PostgresIdentityStore;

/// Role administration (seeding and bootstrap; not on the request path).
#[async_trait]
pub trait RoleAdmin: Send + Sync {
    /// Create the role if needed and add the permissions to it (idempotent).
    async fn define_role(&self, role: &Role, permissions: &[Permission]) -> Result<(), StoreError>;

    /// Grant a role to an existing user (idempotent).
    async fn grant_role(&self, user_id: UserId, role: &Role) -> Result<(), StoreError>;

    async fn revoke_role(&self, user_id: UserId, role: &Role) -> Result<(), StoreError>;
}

/// Everything a single identity store provides, as one object-safe bound.
pub trait IdentityBackend:
    UserDirectory + RolePermissionSource + CredentialStore + ReplicaStore + RoleAdmin
{
}

impl<T> IdentityBackend for T where
    T: UserDirectory + RolePermissionSource + CredentialStore + ReplicaStore + RoleAdmin
{
}
