//! Client session for services fronted by the identity API.
//!
//! - [`session`]: where credentials live and what happens on forced logout
//! - [`refresher`]: the network call that trades a refresh token for an access token
//! - [`coordinator`]: single-flight refresh shared by every request of a session
//! - [`client`]: bearer-attaching HTTP client with one retry after refresh

pub mod client;
pub mod coordinator;
pub mod error;
pub mod refresher;
pub mod session;

pub use client::{AuthenticatedClient, SessionUser};
pub use coordinator::{DEFAULT_REFRESH_TIMEOUT, RefreshCoordinator};
pub use error::ClientError;
pub use refresher::{HttpTokenRefresher, TokenRefresher};
pub use session::{InMemoryTokenStore, LoginNavigator, NoopNavigator, TokenStore};
