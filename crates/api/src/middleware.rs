//! Two composable middleware stages:
//!
//! 1. [`authenticate`]: bearer extraction + [`Verifier`]; inserts [`PrincipalContext`]
//! 2. [`require_permission`]: resolves the caller's permission set once per
//!    request and checks one permission; must run after stage 1
//!
//! Routes can take stage 1 alone (authentication only) or both.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};

use scribe_auth::{AuthError, Permission, PermissionEvaluator, Verifier, authorize};
use scribe_infra::IdentityBackend;

use crate::app::errors::{auth_error_to_response, introspection_error_response};
use crate::context::{PermissionContext, PrincipalContext};

#[derive(Clone)]
pub struct AuthState {
    verifier: Arc<dyn Verifier>,
    introspection: bool,
}

impl AuthState {
    pub fn new(verifier: Arc<dyn Verifier>) -> Self {
        Self {
            verifier,
            introspection: false,
        }
    }

    /// Stage guarding the introspection endpoint; a missing or inactive
    /// subject answers 404 instead of 401.
    pub fn for_introspection(verifier: Arc<dyn Verifier>) -> Self {
        Self {
            verifier,
            introspection: true,
        }
    }

    fn reject(&self, err: AuthError) -> Response {
        if self.introspection {
            introspection_error_response(err)
        } else {
            auth_error_to_response(err)
        }
    }
}

pub async fn authenticate(State(state): State<AuthState>, mut req: Request, next: Next) -> Response {
    let token = match extract_bearer(req.headers()) {
        Ok(token) => token.to_string(),
        Err(err) => return state.reject(err),
    };

    match state.verifier.verify(&token).await {
        Ok(identity) => {
            req.extensions_mut().insert(PrincipalContext::new(identity));
            next.run(req).await
        }
        Err(err) => state.reject(err),
    }
}

/// State for one [`require_permission`] stage.
#[derive(Clone)]
pub struct PermissionGuard {
    evaluator: Arc<PermissionEvaluator<Arc<dyn IdentityBackend>>>,
    required: Permission,
}

impl PermissionGuard {
    pub fn new(
        evaluator: Arc<PermissionEvaluator<Arc<dyn IdentityBackend>>>,
        required: impl Into<Permission>,
    ) -> Self {
        Self {
            evaluator,
            required: required.into(),
        }
    }
}

pub async fn require_permission(State(guard): State<PermissionGuard>, mut req: Request, next: Next) -> Response {
    let identity = req.extensions().get::<PrincipalContext>().map(|p| p.identity().clone());
    let Some(identity) = identity else {
        return auth_error_to_response(AuthError::Unauthenticated);
    };

    let permissions = match req.extensions().get::<PermissionContext>() {
        Some(cached) => cached.permissions().clone(),
        None => match guard.evaluator.resolve(Some(&identity)).await {
            Ok(resolved) => resolved,
            Err(err) => return auth_error_to_response(err),
        },
    };

    if let Err(err) = authorize(&permissions, &guard.required) {
        tracing::info!(user_id = %identity.id, permission = %guard.required, "permission denied");
        return auth_error_to_response(err);
    }

    req.extensions_mut().insert(PermissionContext::new(permissions));
    next.run(req).await
}

fn extract_bearer(headers: &HeaderMap) -> Result<&str, AuthError> {
    let header = headers
        .get(axum::http::header::AUTHORIZATION)
        .ok_or(AuthError::Unauthenticated)?;

    let header = header.to_str().map_err(|_| AuthError::Unauthenticated)?;

    let header = header.strip_prefix("Bearer ").ok_or(AuthError::Unauthenticated)?;

    let token = header.trim();
    if token.is_empty() {
        return Err(AuthError::Unauthenticated);
    }

    Ok(token)
}
