//! Single-flight credential refresh.
//!
//! Every caller that hits an expired access token asks the coordinator for a
//! new one. The first caller while [`State::Idle`] starts exactly one network
//! refresh; everyone arriving while it is in flight queues behind it and
//! receives the same result, in arrival order.
//!
//! The refresh runs on its own task, so a caller that gives up (dropped
//! future) never strands the rest of the queue. The call is bounded by a
//! timeout; a timeout is a failed refresh.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::session::{LoginNavigator, TokenStore};
use crate::refresher::TokenRefresher;

pub const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(10);

type Waiter = oneshot::Sender<Option<String>>;

enum State {
    Idle,
    Refreshing { waiters: VecDeque<Waiter> },
}

struct Inner {
    state: Mutex<State>,
    tokens: Arc<dyn TokenStore>,
    refresher: Arc<dyn TokenRefresher>,
    navigator: Arc<dyn LoginNavigator>,
    timeout: Duration,
}

/// One per client session. Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

impl RefreshCoordinator {
    pub fn new(
        tokens: Arc<dyn TokenStore>,
        refresher: Arc<dyn TokenRefresher>,
        navigator: Arc<dyn LoginNavigator>,
    ) -> Self {
        Self::with_timeout(tokens, refresher, navigator, DEFAULT_REFRESH_TIMEOUT)
    }

    pub fn with_timeout(
        tokens: Arc<dyn TokenStore>,
        refresher: Arc<dyn TokenRefresher>,
        navigator: Arc<dyn LoginNavigator>,
        timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::Idle),
                tokens,
                refresher,
                navigator,
                timeout,
            }),
        }
    }

    pub fn is_refreshing(&self) -> bool {
        matches!(*self.inner.lock_state(), State::Refreshing { .. })
    }

    /// New access token, or `None` if the session could not be refreshed
    /// (credentials are cleared and the login hook has fired by then).
    pub async fn refresh(&self) -> Option<String> {
        let (tx, rx) = oneshot::channel();

        let leader = {
            let mut state = self.inner.lock_state();
            match &mut *state {
                State::Refreshing { waiters } => {
                    waiters.push_back(tx);
                    debug!(queued = waiters.len(), "refresh in flight; waiting");
                    false
                }
                State::Idle => {
                    *state = State::Refreshing {
                        waiters: VecDeque::from([tx]),
                    };
                    true
                }
            }
        };

        if leader {
            let inner = self.inner.clone();
            tokio::spawn(async move { inner.run().await });
        }

        rx.await.ok().flatten()
    }
}

impl Inner {
    fn lock_state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn run(&self) {
        let outcome = match self.call_refresher().await {
            Ok(token) => {
                self.tokens.set_access_token(token.clone());
                debug!("access token refreshed");
                Some(token)
            }
            Err(reason) => {
                warn!(reason = %reason, "token refresh failed; clearing session");
                self.tokens.clear();
                self.navigator.redirect_to_login();
                None
            }
        };

        let waiters = match std::mem::replace(&mut *self.lock_state(), State::Idle) {
            State::Refreshing { waiters } => waiters,
            State::Idle => VecDeque::new(),
        };

        for waiter in waiters {
            // receiver gone means that caller stopped waiting
            let _ = waiter.send(outcome.clone());
        }
    }

    async fn call_refresher(&self) -> Result<String, String> {
        let Some(refresh_token) = self.tokens.refresh_token() else {
            return Err("no refresh token stored".to_string());
        };

        match tokio::time::timeout(self.timeout, self.refresher.refresh(&refresh_token)).await {
            Ok(Ok(token)) => Ok(token),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("refresh timed out after {:?}", self.timeout)),
        }
    }
}
