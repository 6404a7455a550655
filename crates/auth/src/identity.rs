use serde::{Deserialize, Serialize};

use scribe_core::UserId;

use crate::{Role, UserRecord};

/// A verified identity attached to the request context.
///
/// Produced by a [`Verifier`](crate::Verifier); never persisted by it.
/// Permissions are resolved lazily by the
/// [`PermissionEvaluator`](crate::PermissionEvaluator).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: UserId,
    pub email: String,
    pub username: String,
    pub roles: Vec<Role>,
}

impl Identity {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r.as_str() == role)
    }
}

impl From<&UserRecord> for Identity {
    fn from(user: &UserRecord) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            username: user.username.clone(),
            roles: user.roles.clone(),
        }
    }
}

/// Public projection of a user returned at login and by the profile endpoint.
///
/// This is also the introspection wire shape: `{id, email, username, roles}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicUser {
    pub id: UserId,
    pub email: String,
    pub username: String,
    pub roles: Vec<String>,
}

impl From<&Identity> for PublicUser {
    fn from(identity: &Identity) -> Self {
        Self {
            id: identity.id,
            email: identity.email.clone(),
            username: identity.username.clone(),
            roles: identity.roles.iter().map(|r| r.as_str().to_string()).collect(),
        }
    }
}

impl From<PublicUser> for Identity {
    fn from(user: PublicUser) -> Self {
        Self {
            id: user.id,
            email: user.email,
            username: user.username,
            roles: user.roles.into_iter().map(Role::new).collect(),
        }
    }
}
