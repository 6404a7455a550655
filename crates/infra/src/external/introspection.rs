//! Remote introspection: verify a credential by asking the issuing service.
//!
//! `GET {base}/profile` with the caller's bearer credential. Fails closed: an
//! unreachable or misbehaving issuer never yields an identity.
//!
//! | Upstream | Result |
//! |----------|--------|
//! | 2xx + `{id, email, username, roles}` | `Identity` |
//! | 401 | `TokenExpiredOrInvalid` |
//! | 404 | `UserNotFoundOrInactive` |
//! | other status, bad body, timeout, transport error | `AuthServiceUnavailable` |
//!
//! Results are not cached; every request re-introspects.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use scribe_auth::{AuthError, Identity, PublicUser, Verifier};

#[derive(Debug, Error)]
pub enum IntrospectionError {
    #[error("invalid auth service url: {0}")]
    InvalidUrl(String),

    #[error("http client error: {0}")]
    Client(String),
}

#[derive(Debug, Clone)]
pub struct RemoteIntrospector {
    client: reqwest::Client,
    profile_url: reqwest::Url,
}

impl RemoteIntrospector {
    /// `auth_service_url` is the issuing service's base URL.
    pub fn new(auth_service_url: &str, timeout: Duration) -> Result<Self, IntrospectionError> {
        let base = auth_service_url.trim_end_matches('/');
        let profile_url = reqwest::Url::parse(&format!("{base}/profile"))
            .map_err(|e| IntrospectionError::InvalidUrl(e.to_string()))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| IntrospectionError::Client(e.to_string()))?;

        Ok(Self { client, profile_url })
    }

    pub fn profile_url(&self) -> &str {
        self.profile_url.as_str()
    }
}

#[async_trait]
impl Verifier for RemoteIntrospector {
    #[instrument(skip(self, access_token), fields(url = %self.profile_url))]
    async fn verify(&self, access_token: &str) -> Result<Identity, AuthError> {
        let resp = self
            .client
            .get(self.profile_url.clone())
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "introspection request failed");
                AuthError::AuthServiceUnavailable(e.to_string())
            })?;

        match resp.status() {
            status if status.is_success() => {
                let user: PublicUser = resp.json().await.map_err(|e| {
                    warn!(error = %e, "introspection body unreadable");
                    AuthError::AuthServiceUnavailable(format!("bad profile body: {e}"))
                })?;
                debug!(user_id = %user.id, "introspection succeeded");
                Ok(Identity::from(user))
            }
            StatusCode::UNAUTHORIZED => Err(AuthError::TokenExpiredOrInvalid),
            StatusCode::NOT_FOUND => Err(AuthError::UserNotFoundOrInactive),
            status => {
                warn!(status = %status, "unexpected introspection status");
                Err(AuthError::AuthServiceUnavailable(format!("upstream status {status}")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::Router;
    use axum::http::{HeaderMap, StatusCode as AxumStatus};
    use axum::response::{IntoResponse, Response};
    use axum::routing::get;
    use scribe_core::UserId;

    async fn profile(headers: HeaderMap) -> Response {
        let token = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .unwrap_or_default()
            .to_string();

        match token.as_str() {
            "good" => axum::Json(serde_json::json!({
                "id": UserId::new(),
                "email": "user@example.com",
                "username": "user",
                "roles": ["editor", "viewer"],
            }))
            .into_response(),
            "stale" => AxumStatus::UNAUTHORIZED.into_response(),
            "gone" => AxumStatus::NOT_FOUND.into_response(),
            "garbled" => (AxumStatus::OK, "not json").into_response(),
            "slow" => {
                tokio::time::sleep(Duration::from_millis(500)).await;
                AxumStatus::OK.into_response()
            }
            _ => AxumStatus::INTERNAL_SERVER_ERROR.into_response(),
        }
    }

    async fn issuer() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new().route("/profile", get(profile));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/")
    }

    #[tokio::test]
    async fn success_maps_profile_into_identity() {
        let base = issuer().await;
        let introspector = RemoteIntrospector::new(&base, Duration::from_secs(2)).unwrap();
        assert!(introspector.profile_url().ends_with("/profile"));

        let identity = introspector.verify("good").await.unwrap();
        assert_eq!(identity.email, "user@example.com");
        assert!(identity.has_role("editor"));
        assert!(identity.has_role("viewer"));
    }

    #[tokio::test]
    async fn upstream_statuses_map_to_auth_errors() {
        let base = issuer().await;
        let introspector = RemoteIntrospector::new(&base, Duration::from_secs(2)).unwrap();

        assert_eq!(introspector.verify("stale").await, Err(AuthError::TokenExpiredOrInvalid));
        assert_eq!(introspector.verify("gone").await, Err(AuthError::UserNotFoundOrInactive));
        assert!(matches!(
            introspector.verify("explode").await,
            Err(AuthError::AuthServiceUnavailable(_))
        ));
        assert!(matches!(
            introspector.verify("garbled").await,
            Err(AuthError::AuthServiceUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn timeout_fails_closed() {
        let base = issuer().await;
        let introspector = RemoteIntrospector::new(&base, Duration::from_millis(50)).unwrap();
        assert!(matches!(
            introspector.verify("slow").await,
            Err(AuthError::AuthServiceUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn unreachable_issuer_fails_closed() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let introspector = RemoteIntrospector::new(&format!("http://{addr}"), Duration::from_secs(1)).unwrap();
        assert!(matches!(
            introspector.verify("good").await,
            Err(AuthError::AuthServiceUnavailable(_))
        ));
    }
}
