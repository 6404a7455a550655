use std::collections::BTreeSet;

use crate::{AuthError, Identity, Permission, PermissionSet, Role, RolePermissionSource};

/// Authorize against an already-resolved permission set.
///
/// - No IO
/// - No panics
/// - Pure set membership (no wildcard, no role hierarchy)
pub fn authorize(permissions: &PermissionSet, required: &Permission) -> Result<(), AuthError> {
    if permissions.contains(required) {
        Ok(())
    } else {
        Err(AuthError::InsufficientPermission(required.as_str().to_string()))
    }
}

/// Resolves role → permission closures and answers permission checks.
///
/// Must run after verification: without an identity every check fails with
/// `Unauthenticated`. A user with zero roles resolves to the empty set, so
/// absence of roles never grants anything.
#[derive(Debug, Clone)]
pub struct PermissionEvaluator<S> {
    source: S,
}

impl<S> PermissionEvaluator<S>
where
    S: RolePermissionSource,
{
    pub fn new(source: S) -> Self {
        Self { source }
    }

    /// Compute the permission set for an identity (once per request).
    pub async fn resolve(&self, identity: Option<&Identity>) -> Result<PermissionSet, AuthError> {
        let identity = identity.ok_or(AuthError::Unauthenticated)?;

        // Duplicate grants of the same role collapse before hitting the source.
        let roles: Vec<Role> = identity.roles.iter().cloned().collect::<BTreeSet<_>>().into_iter().collect();
        if roles.is_empty() {
            return Ok(PermissionSet::empty());
        }

        Ok(self.source.permissions_for_roles(&roles).await?)
    }

    pub async fn check_permission(
        &self,
        identity: Option<&Identity>,
        required: &Permission,
    ) -> Result<(), AuthError> {
        let permissions = self.resolve(identity).await?;
        let decision = authorize(&permissions, required);
        if decision.is_err() {
            if let Some(identity) = identity {
                tracing::info!(
                    user_id = %identity.id,
                    permission = %required,
                    "permission denied"
                );
            }
        }
        decision
    }
}
