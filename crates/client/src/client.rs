//! Bearer-attaching HTTP client.

use std::sync::Arc;

use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;

use crate::coordinator::RefreshCoordinator;
use crate::error::ClientError;
use crate::refresher::HttpTokenRefresher;
use crate::session::{LoginNavigator, TokenStore};

/// The user block returned by `POST /login`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SessionUser {
    pub id: String,
    pub email: String,
    pub username: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginReply {
    access_token: String,
    refresh_token: String,
    user: SessionUser,
}

pub struct AuthenticatedClient {
    http: reqwest::Client,
    base_url: String,
    tokens: Arc<dyn TokenStore>,
    coordinator: RefreshCoordinator,
}

impl AuthenticatedClient {
    /// Client that refreshes against the same API it talks to.
    pub fn new(base_url: &str, tokens: Arc<dyn TokenStore>, navigator: Arc<dyn LoginNavigator>) -> Self {
        let http = reqwest::Client::new();
        let refresher = Arc::new(HttpTokenRefresher::new(http.clone(), base_url));
        let coordinator = RefreshCoordinator::new(tokens.clone(), refresher, navigator);
        Self::with_coordinator(http, base_url, tokens, coordinator)
    }

    pub fn with_coordinator(
        http: reqwest::Client,
        base_url: &str,
        tokens: Arc<dyn TokenStore>,
        coordinator: RefreshCoordinator,
    ) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            tokens,
            coordinator,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    /// Log in and store both tokens for the session.
    pub async fn login(&self, email: &str, password: &str) -> Result<SessionUser, ClientError> {
        let resp = self
            .http
            .post(self.url("/login"))
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await?;

        if resp.status() == StatusCode::UNAUTHORIZED {
            return Err(ClientError::Unauthorized);
        }
        let resp = ensure_success(resp).await?;

        let reply: LoginReply = resp.json().await?;
        self.tokens.set_tokens(reply.access_token, reply.refresh_token);
        Ok(reply.user)
    }

    /// Revoke the refresh token server-side, then forget the session locally
    /// whatever the server said.
    pub async fn logout(&self) -> Result<(), ClientError> {
        let result = match self.tokens.refresh_token() {
            Some(refresh_token) => self
                .send(|http| {
                    http.post(self.url("/logout"))
                        .json(&json!({ "refreshToken": refresh_token }))
                })
                .await
                .map(|_| ()),
            None => Ok(()),
        };
        self.tokens.clear();
        result
    }

    /// Send a request built by `build` with the current access token.
    ///
    /// On 401 the session is refreshed (coordinated with every other in-flight
    /// request) and the request is retried once. A second 401, or a failed
    /// refresh, is [`ClientError::Unauthorized`]. Other statuses are returned as is.
    pub async fn send<F>(&self, build: F) -> Result<Response, ClientError>
    where
        F: Fn(&reqwest::Client) -> RequestBuilder,
    {
        let resp = self.attempt(&build, self.tokens.access_token()).await?;
        if resp.status() != StatusCode::UNAUTHORIZED {
            return Ok(resp);
        }

        let Some(token) = self.coordinator.refresh().await else {
            return Err(ClientError::Unauthorized);
        };

        let resp = self.attempt(&build, Some(token)).await?;
        if resp.status() == StatusCode::UNAUTHORIZED {
            tracing::warn!(url = %resp.url(), "still unauthorized after refresh");
            return Err(ClientError::Unauthorized);
        }
        Ok(resp)
    }

    async fn attempt<F>(&self, build: &F, token: Option<String>) -> Result<Response, ClientError>
    where
        F: Fn(&reqwest::Client) -> RequestBuilder,
    {
        let mut req = build(&self.http);
        if let Some(token) = token {
            req = req.bearer_auth(token);
        }
        Ok(req.send().await?)
    }
}

async fn ensure_success(resp: Response) -> Result<Response, ClientError> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    Err(ClientError::Rejected { status, body })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::InMemoryTokenStore;
    use axum::{
        Json, Router,
        http::HeaderMap,
        routing::{get, post},
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Calls {
        refresh: AtomicUsize,
        navigations: AtomicUsize,
    }

    struct CountingNavigator(Arc<Calls>);

    impl LoginNavigator for CountingNavigator {
        fn redirect_to_login(&self) {
            self.0.navigations.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn bearer(headers: &HeaderMap) -> Option<String> {
        headers
            .get("authorization")?
            .to_str()
            .ok()?
            .strip_prefix("Bearer ")
            .map(str::to_string)
    }

    /// `/profile` accepts only "fresh"; `/locked` never accepts anything.
    async fn spawn_api(calls: Arc<Calls>, refresh_ok: bool) -> String {
        let app = Router::new()
            .route(
                "/profile",
                get(|headers: HeaderMap| async move {
                    if bearer(&headers).as_deref() == Some("fresh") {
                        (axum::http::StatusCode::OK, Json(json!({ "email": "u@example.com" })))
                    } else {
                        (axum::http::StatusCode::UNAUTHORIZED, Json(json!({ "error": "invalid_token" })))
                    }
                }),
            )
            .route(
                "/locked",
                get(|| async { (axum::http::StatusCode::UNAUTHORIZED, Json(json!({ "error": "invalid_token" }))) }),
            )
            .route(
                "/refresh-token",
                post(move |Json(body): Json<serde_json::Value>| {
                    let calls = calls.clone();
                    async move {
                        calls.refresh.fetch_add(1, Ordering::SeqCst);
                        if refresh_ok && body["refreshToken"] == "refresh" {
                            (axum::http::StatusCode::OK, Json(json!({ "accessToken": "fresh" })))
                        } else {
                            (
                                axum::http::StatusCode::UNAUTHORIZED,
                                Json(json!({ "error": "invalid_refresh_token" })),
                            )
                        }
                    }
                }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn client(base: &str, calls: &Arc<Calls>) -> (AuthenticatedClient, Arc<InMemoryTokenStore>) {
        let store = Arc::new(InMemoryTokenStore::with_tokens("stale", "refresh"));
        let navigator = Arc::new(CountingNavigator(calls.clone()));
        (AuthenticatedClient::new(base, store.clone(), navigator), store)
    }

    #[tokio::test]
    async fn expired_token_is_refreshed_and_request_retried() {
        let calls = Arc::new(Calls::default());
        let base = spawn_api(calls.clone(), true).await;
        let (client, store) = client(&base, &calls);

        let resp = client.send(|http| http.get(client.url("/profile"))).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(calls.refresh.load(Ordering::SeqCst), 1);
        assert_eq!(store.access_token().as_deref(), Some("fresh"));

        // The stored token is now good; no further refresh.
        let resp = client.send(|http| http.get(client.url("/profile"))).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(calls.refresh.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn second_unauthorized_is_final() {
        let calls = Arc::new(Calls::default());
        let base = spawn_api(calls.clone(), true).await;
        let (client, _store) = client(&base, &calls);

        let err = client.send(|http| http.get(client.url("/locked"))).await.unwrap_err();
        assert!(matches!(err, ClientError::Unauthorized));
        assert_eq!(calls.refresh.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_refresh_ends_the_session() {
        let calls = Arc::new(Calls::default());
        let base = spawn_api(calls.clone(), false).await;
        let (client, store) = client(&base, &calls);

        let err = client.send(|http| http.get(client.url("/profile"))).await.unwrap_err();
        assert!(matches!(err, ClientError::Unauthorized));
        assert_eq!(calls.navigations.load(Ordering::SeqCst), 1);
        assert_eq!(store.refresh_token(), None);
    }
}
