//! Credential endpoints: login, refresh, logout.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json,
    extract::{ConnectInfo, Extension},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};

use scribe_auth::LoginContext;

use crate::app::dto::{LoginRequest, LoginResponse, LogoutRequest, MessageResponse, RefreshRequest, RefreshResponse};
use crate::app::errors::{ApiError, json_error};
use crate::app::services::AppServices;
use crate::context::PrincipalContext;

/// POST /login
pub async fn login(
    Extension(services): Extension<Arc<AppServices>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(body): Json<LoginRequest>,
) -> Response {
    if body.email.trim().is_empty() || body.password.is_empty() {
        return json_error(StatusCode::BAD_REQUEST, "validation_error", "email and password are required");
    }

    let context = login_context(&headers, peer.map(|ConnectInfo(addr)| addr));
    match services.issuer.login(&body.email, &body.password, context).await {
        Ok(issued) => Json(LoginResponse {
            access_token: issued.access_token,
            refresh_token: issued.refresh_token,
            user: issued.user,
        })
        .into_response(),
        Err(err) => ApiError(err).into_response(),
    }
}

/// POST /refresh-token
pub async fn refresh_token(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<RefreshRequest>,
) -> Result<Json<RefreshResponse>, ApiError> {
    let access_token = services.issuer.refresh(&body.refresh_token).await?;
    Ok(Json(RefreshResponse { access_token }))
}

/// POST /logout (authenticated). Succeeds however many times it is called.
pub async fn logout(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<LogoutRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    services.issuer.logout(principal.identity().id, &body.refresh_token).await?;
    Ok(Json(MessageResponse {
        message: "Logged out successfully".to_string(),
    }))
}

/// `User-Agent` is the device; the first `X-Forwarded-For` hop, else the peer, is the address.
fn login_context(headers: &HeaderMap, peer: Option<SocketAddr>) -> LoginContext {
    let device_info = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string);

    LoginContext {
        device_info,
        ip_address: forwarded.or_else(|| peer.map(|addr| addr.ip().to_string())),
    }
}
