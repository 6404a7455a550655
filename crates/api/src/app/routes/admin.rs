use axum::{Json, extract::Extension};

use crate::app::dto::PermissionsResponse;
use crate::context::{PermissionContext, PrincipalContext};

/// GET /admin/permissions - the caller's resolved permission set.
pub async fn my_permissions(
    Extension(principal): Extension<PrincipalContext>,
    Extension(permissions): Extension<PermissionContext>,
) -> Json<PermissionsResponse> {
    let identity = principal.identity();
    Json(PermissionsResponse {
        user_id: identity.id,
        roles: identity.roles.iter().map(|r| r.as_str().to_string()).collect(),
        permissions: permissions.permissions().iter().cloned().collect(),
    })
}
