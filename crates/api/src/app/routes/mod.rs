use std::sync::Arc;

use axum::{
    Extension, Router,
    routing::{get, post},
};
use tower::ServiceBuilder;

use crate::app::services::AppServices;
use crate::middleware::{self, AuthState, PermissionGuard};

pub mod admin;
pub mod auth;
pub mod profile;
pub mod system;

/// Unauthenticated endpoints.
pub fn public_router() -> Router {
    Router::new()
        .route("/health", get(system::health))
        .route("/login", post(auth::login))
        .route("/refresh-token", post(auth::refresh_token))
}

/// Endpoints behind the authentication stage (and, for `/admin`, the permission stage).
pub fn protected_router(services: &Arc<AppServices>) -> Router {
    let auth_state = AuthState::new(services.verifier.clone());

    let introspection = Router::new().route("/profile", get(profile::profile)).route_layer(
        axum::middleware::from_fn_with_state(
            AuthState::for_introspection(services.verifier.clone()),
            middleware::authenticate,
        ),
    );

    let admin = Router::new()
        .route("/admin/permissions", get(admin::my_permissions))
        .route_layer(axum::middleware::from_fn_with_state(
            PermissionGuard::new(services.evaluator.clone(), "users.read"),
            middleware::require_permission,
        ));

    Router::new()
        .route("/logout", post(auth::logout))
        .merge(admin)
        .route_layer(
            ServiceBuilder::new()
                .layer(axum::middleware::from_fn_with_state(auth_state, middleware::authenticate)),
        )
        .merge(introspection)
}

/// Full router with services attached.
pub fn router(services: Arc<AppServices>) -> Router {
    public_router()
        .merge(protected_router(&services))
        .layer(Extension(services))
}
