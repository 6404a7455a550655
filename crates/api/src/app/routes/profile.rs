use axum::{Json, extract::Extension};

use scribe_auth::PublicUser;

use crate::context::PrincipalContext;

/// GET /profile (authenticated).
///
/// Also the introspection endpoint dependent services call; the verifier has
/// already confirmed the subject exists and is active (404 otherwise).
pub async fn profile(Extension(principal): Extension<PrincipalContext>) -> Json<PublicUser> {
    Json(PublicUser::from(principal.identity()))
}
