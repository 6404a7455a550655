use scribe_auth::{Identity, PermissionSet};

/// Principal context for a request (verified identity).
///
/// Inserted by the authentication stage; present on every protected route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrincipalContext {
    identity: Identity,
}

impl PrincipalContext {
    pub fn new(identity: Identity) -> Self {
        Self { identity }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }
}

/// Permission set resolved for the current request.
///
/// Computed once by the first permission stage and reused by any later one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionContext {
    permissions: PermissionSet,
}

impl PermissionContext {
    pub fn new(permissions: PermissionSet) -> Self {
        Self { permissions }
    }

    pub fn permissions(&self) -> &PermissionSet {
        &self.permissions
    }
}
