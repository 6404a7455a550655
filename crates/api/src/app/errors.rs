use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use scribe_auth::AuthError;

/// Map identity failures to HTTP.
///
/// | AuthError | Status |
/// |-----------|--------|
/// | InvalidCredentials, InvalidRefreshToken, TokenExpiredOrInvalid, Unauthenticated | 401 |
/// | UserNotFoundOrInactive | 401 (404 on `/profile`, see [`introspection_error_response`]) |
/// | InsufficientPermission | 403 |
/// | AuthServiceUnavailable | 503 |
/// | Store, Crypto | 500 |
pub fn auth_error_to_response(err: AuthError) -> Response {
    match err {
        AuthError::InvalidCredentials => {
            json_error(StatusCode::UNAUTHORIZED, "invalid_credentials", "invalid email or password")
        }
        AuthError::InvalidRefreshToken => json_error(
            StatusCode::UNAUTHORIZED,
            "invalid_refresh_token",
            "refresh token is missing, expired or revoked",
        ),
        AuthError::TokenExpiredOrInvalid => {
            json_error(StatusCode::UNAUTHORIZED, "invalid_token", "token expired or invalid")
        }
        AuthError::Unauthenticated => json_error(StatusCode::UNAUTHORIZED, "unauthenticated", "authentication required"),
        AuthError::UserNotFoundOrInactive => {
            json_error(StatusCode::UNAUTHORIZED, "user_not_found", "user not found or inactive")
        }
        AuthError::InsufficientPermission(permission) => json_error(
            StatusCode::FORBIDDEN,
            "forbidden",
            format!("missing permission '{permission}'"),
        ),
        AuthError::AuthServiceUnavailable(reason) => {
            tracing::warn!(reason = %reason, "auth service unavailable");
            json_error(StatusCode::SERVICE_UNAVAILABLE, "auth_service_unavailable", "auth service unavailable")
        }
        AuthError::Store(e) => {
            tracing::error!(error = %e, "identity store failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", "internal error")
        }
        AuthError::Crypto(e) => {
            tracing::error!(error = %e, "credential crypto failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", "internal error")
        }
    }
}

/// Mapping for the introspection endpoint: a missing or inactive subject is
/// 404 so remote verifiers can tell it apart from a bad token.
pub fn introspection_error_response(err: AuthError) -> Response {
    match err {
        AuthError::UserNotFoundOrInactive => {
            json_error(StatusCode::NOT_FOUND, "user_not_found", "user not found or inactive")
        }
        other => auth_error_to_response(other),
    }
}

/// Handler error wrapper so routes can use `?` on `AuthError`.
#[derive(Debug)]
pub struct ApiError(pub AuthError);

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        auth_error_to_response(self.0)
    }
}

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_the_failure_kind() {
        let status = |e| auth_error_to_response(e).status();
        assert_eq!(status(AuthError::TokenExpiredOrInvalid), StatusCode::UNAUTHORIZED);
        assert_eq!(status(AuthError::InvalidRefreshToken), StatusCode::UNAUTHORIZED);
        assert_eq!(status(AuthError::UserNotFoundOrInactive), StatusCode::UNAUTHORIZED);
        assert_eq!(status(AuthError::InsufficientPermission("x".into())), StatusCode::FORBIDDEN);
        assert_eq!(
            status(AuthError::AuthServiceUnavailable("down".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status(AuthError::Store(scribe_auth::StoreError::backend("db"))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn only_introspection_reports_missing_users_as_not_found() {
        let status = |e| introspection_error_response(e).status();
        assert_eq!(status(AuthError::UserNotFoundOrInactive), StatusCode::NOT_FOUND);
        assert_eq!(status(AuthError::TokenExpiredOrInvalid), StatusCode::UNAUTHORIZED);
        assert_eq!(
            status(AuthError::AuthServiceUnavailable("down".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
