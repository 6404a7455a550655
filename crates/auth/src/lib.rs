//! `scribe-auth`: identity and authorization boundary.
//!
//! Credential issuance, verification and permission evaluation. This crate is
//! decoupled from HTTP and storage: persistence comes in through the traits in
//! [`store`], transports live in `scribe-infra` and `scribe-api`.

pub mod authorize;
pub mod claims;
pub mod error;
pub mod identity;
pub mod issuer;
pub mod password;
pub mod permissions;
pub mod roles;
pub mod store;
pub mod token;
pub mod user;
pub mod verifier;

pub use authorize::{PermissionEvaluator, authorize};
pub use claims::{AccessClaims, TokenValidationError, validate_claims};
pub use error::{AuthError, StoreError};
pub use identity::{Identity, PublicUser};
pub use issuer::{CredentialIssuer, IssuedCredentials, LoginContext, LogoutOutcome};
pub use password::{DEFAULT_TIME_COST, PasswordHasher};
pub use permissions::{Permission, PermissionSet};
pub use roles::Role;
pub use store::{CredentialStore, ReplicaStore, RolePermissionSource, StaticRolePermissions, UserDirectory};
pub use token::{MAX_TOKEN_TTL_SECS, RefreshTokenDigester, TokenCodec, generate_refresh_token};
pub use user::{
    RefreshTokenRecord, SessionRecord, UserDeleted, UserLifecycleEvent, UserPatch, UserRecord,
    UserReplica, UserUpdated, normalize_email,
};
pub use verifier::{LocalVerifier, Verifier};

pub use jsonwebtoken::Algorithm;
