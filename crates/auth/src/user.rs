//! User records and the user lifecycle events replicated across services.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use scribe_core::UserId;
use scribe_events::{Event, Topic};

use crate::Role;

/// Canonical form used to look up an email. Stored rows keep the case the
/// owning service sent; lookups and uniqueness compare this form.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

// ─────────────────────────────────────────────────────────────────────────────
// System of record
// ─────────────────────────────────────────────────────────────────────────────

/// A user as seen by the identity layer, with role memberships resolved.
#[derive(Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: UserId,
    pub email: String,
    pub username: String,
    pub password_hash: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub is_active: bool,
    pub is_verified: bool,
    pub roles: Vec<Role>,
}

impl UserRecord {
    /// Build a record from a replicated row plus its role memberships.
    pub fn from_replica(replica: UserReplica, roles: Vec<Role>) -> Self {
        Self {
            id: replica.id,
            email: replica.email,
            username: replica.username,
            password_hash: replica.password_hash,
            first_name: replica.first_name,
            last_name: replica.last_name,
            is_active: replica.is_active,
            is_verified: replica.is_verified,
            roles,
        }
    }
}

impl core::fmt::Debug for UserRecord {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("UserRecord")
            .field("id", &self.id)
            .field("email", &self.email)
            .field("username", &self.username)
            .field("password_hash", &"<redacted>")
            .field("is_active", &self.is_active)
            .field("is_verified", &self.is_verified)
            .field("roles", &self.roles)
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Replica rows
// ─────────────────────────────────────────────────────────────────────────────

/// Full user row as carried by `user.created` and held by replicas.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserReplica {
    pub id: UserId,
    pub email: String,
    pub username: String,
    pub password_hash: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub is_verified: bool,
}

fn default_true() -> bool {
    true
}

impl core::fmt::Debug for UserReplica {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("UserReplica")
            .field("id", &self.id)
            .field("email", &self.email)
            .field("username", &self.username)
            .field("password_hash", &"<redacted>")
            .field("is_active", &self.is_active)
            .field("is_verified", &self.is_verified)
            .finish()
    }
}

/// Partial update carried by `user.updated`; absent fields are left untouched.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_verified: Option<bool>,
}

impl UserPatch {
    pub fn is_empty(&self) -> bool {
        *self == UserPatch::default()
    }

    /// Apply the present fields onto a replica row.
    pub fn apply_to(&self, row: &mut UserReplica) {
        if let Some(v) = &self.email {
            row.email = v.clone();
        }
        if let Some(v) = &self.username {
            row.username = v.clone();
        }
        if let Some(v) = &self.password_hash {
            row.password_hash = v.clone();
        }
        if let Some(v) = &self.first_name {
            row.first_name = Some(v.clone());
        }
        if let Some(v) = &self.last_name {
            row.last_name = Some(v.clone());
        }
        if let Some(v) = self.is_active {
            row.is_active = v;
        }
        if let Some(v) = self.is_verified {
            row.is_verified = v;
        }
    }
}

impl core::fmt::Debug for UserPatch {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("UserPatch")
            .field("email", &self.email)
            .field("username", &self.username)
            .field("password_hash", &self.password_hash.as_ref().map(|_| "<redacted>"))
            .field("first_name", &self.first_name)
            .field("last_name", &self.last_name)
            .field("is_active", &self.is_active)
            .field("is_verified", &self.is_verified)
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Lifecycle events
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserUpdated {
    pub id: UserId,
    #[serde(flatten)]
    pub patch: UserPatch,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserDeleted {
    pub id: UserId,
}

/// Lifecycle events published by the users service.
///
/// The wire body is the bare `{id, ...fields}` object; the topic selects the
/// variant, see [`UserLifecycleEvent::decode`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum UserLifecycleEvent {
    Created(UserReplica),
    Updated(UserUpdated),
    Deleted(UserDeleted),
}

impl UserLifecycleEvent {
    pub fn user_id(&self) -> UserId {
        match self {
            UserLifecycleEvent::Created(e) => e.id,
            UserLifecycleEvent::Updated(e) => e.id,
            UserLifecycleEvent::Deleted(e) => e.id,
        }
    }

    /// Decode a JSON body published on `topic`.
    pub fn decode(topic: Topic, payload: &JsonValue) -> Result<Self, serde_json::Error> {
        Ok(match topic {
            Topic::UserCreated => UserLifecycleEvent::Created(serde_json::from_value(payload.clone())?),
            Topic::UserUpdated => UserLifecycleEvent::Updated(serde_json::from_value(payload.clone())?),
            Topic::UserDeleted => UserLifecycleEvent::Deleted(serde_json::from_value(payload.clone())?),
        })
    }
}

impl Event for UserLifecycleEvent {
    fn topic(&self) -> Topic {
        match self {
            UserLifecycleEvent::Created(_) => Topic::UserCreated,
            UserLifecycleEvent::Updated(_) => Topic::UserUpdated,
            UserLifecycleEvent::Deleted(_) => Topic::UserDeleted,
        }
    }

    fn key(&self) -> String {
        self.user_id().to_string()
    }
}

/// Refresh credential row (persisted server-side; only the digest of the token).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshTokenRecord {
    pub id: scribe_core::RefreshTokenId,
    pub user_id: UserId,
    pub token_digest: String,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl RefreshTokenRecord {
    /// Usable only while unrevoked and unexpired.
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && self.expires_at > now
    }
}

/// Login session (informational/audit; never consulted by verifiers).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub id: scribe_core::SessionId,
    pub user_id: UserId,
    pub refresh_token_id: Option<scribe_core::RefreshTokenId>,
    pub device_info: Option<String>,
    pub ip_address: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub is_valid: bool,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn replica() -> UserReplica {
        UserReplica {
            id: UserId::new(),
            email: "user@example.com".to_string(),
            username: "user".to_string(),
            password_hash: "$argon2id$fake".to_string(),
            first_name: Some("Ada".to_string()),
            last_name: None,
            is_active: true,
            is_verified: false,
        }
    }

    #[test]
    fn created_body_is_flat_and_decodes_by_topic() {
        let row = replica();
        let event = UserLifecycleEvent::Created(row.clone());
        let body = serde_json::to_value(&event).unwrap();

        assert_eq!(body["id"], serde_json::json!(row.id));
        assert_eq!(body["email"], "user@example.com");
        assert_eq!(body["passwordHash"], "$argon2id$fake");

        let decoded = UserLifecycleEvent::decode(Topic::UserCreated, &body).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn updated_body_carries_only_present_fields() {
        let id = UserId::new();
        let event = UserLifecycleEvent::Updated(UserUpdated {
            id,
            patch: UserPatch {
                is_active: Some(false),
                ..Default::default()
            },
        });
        let body = serde_json::to_value(&event).unwrap();
        assert_eq!(body, serde_json::json!({ "id": id, "isActive": false }));

        let decoded = UserLifecycleEvent::decode(Topic::UserUpdated, &body).unwrap();
        assert_eq!(decoded.user_id(), id);
        assert_eq!(decoded.topic(), Topic::UserUpdated);
    }

    #[test]
    fn patch_leaves_absent_fields_untouched() {
        let mut row = replica();
        let patch = UserPatch {
            username: Some("renamed".to_string()),
            ..Default::default()
        };
        patch.apply_to(&mut row);

        assert_eq!(row.username, "renamed");
        assert_eq!(row.email, "user@example.com");
        assert_eq!(row.first_name.as_deref(), Some("Ada"));
    }

    #[test]
    fn debug_output_redacts_password_hash() {
        let rendered = format!("{:?}", replica());
        assert!(!rendered.contains("$argon2id$fake"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn missing_created_fields_are_an_error() {
        let body = serde_json::json!({ "id": UserId::new() });
        assert!(UserLifecycleEvent::decode(Topic::UserCreated, &body).is_err());
    }
}
