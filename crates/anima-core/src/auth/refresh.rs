//! Single-flight access token refresh.
//!
//! At most one refresh request is outstanding at a time. Callers that arrive
//! while one is running await the same shared future and see the identical
//! token or error. A second concurrent request would otherwise present a
//! refresh token the first one has just rotated away.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use futures::future::{BoxFuture, FutureExt, Shared};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::session::{SessionState, SessionStatus, SignOutReason};
use super::store::{TokenStore, DEFAULT_EXPIRES_IN_SECS};
use super::AuthError;

/// Path of the refresh endpoint, relative to the API base.
pub const REFRESH_PATH: &str = "/v1/auth/refresh";

/// Refresh calls get the same bound as ordinary requests.
const DEFAULT_REFRESH_TIMEOUT_SECS: u64 = 20;

type SharedRefresh = Shared<BoxFuture<'static, Result<String, AuthError>>>;

#[derive(Debug, Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: Option<String>,
    expires_in: Option<i64>,
    refresh_token: Option<String>,
}

struct InFlight {
    id: u64,
    started_at: Instant,
    future: SharedRefresh,
}

struct Inner {
    http: Client,
    refresh_url: String,
    timeout: Duration,
    store: TokenStore,
    status: SessionStatus,
    next_id: AtomicU64,
    in_flight: Mutex<Option<InFlight>>,
}

/// Hands out valid access tokens, refreshing them when needed.
/// Clone is cheap; clones share the in-flight slot.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

impl RefreshCoordinator {
    pub fn new(http: Client, api_base: &str, store: TokenStore, status: SessionStatus) -> Self {
        Self::with_timeout(
            http,
            api_base,
            Duration::from_secs(DEFAULT_REFRESH_TIMEOUT_SECS),
            store,
            status,
        )
    }

    pub fn with_timeout(
        http: Client,
        api_base: &str,
        timeout: Duration,
        store: TokenStore,
        status: SessionStatus,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                http,
                refresh_url: format!("{}{}", api_base.trim_end_matches('/'), REFRESH_PATH),
                timeout,
                store,
                status,
                next_id: AtomicU64::new(1),
                in_flight: Mutex::new(None),
            }),
        }
    }

    pub fn store(&self) -> &TokenStore {
        &self.inner.store
    }

    /// Whether a refresh request is currently outstanding.
    pub fn is_refreshing(&self) -> bool {
        self.inner.slot().is_some()
    }

    /// The stored access token, refreshed first if it is expired or about to be.
    pub async fn get_valid_access_token(&self) -> Result<String, AuthError> {
        let store = &self.inner.store;
        let token = store.access_token().ok_or(AuthError::NoToken)?;

        if store.is_token_expired() {
            info!("Access token expired or expiring soon, refreshing");
            return self.refresh_access_token().await;
        }

        Ok(token)
    }

    /// Refresh the access token, joining the outstanding refresh if there is one.
    pub async fn refresh_access_token(&self) -> Result<String, AuthError> {
        let future = {
            let mut slot = self.inner.slot();
            match slot.as_ref() {
                Some(in_flight) => {
                    debug!(
                        refresh_id = in_flight.id,
                        in_flight_ms = in_flight.started_at.elapsed().as_millis() as u64,
                        "Joining in-flight token refresh"
                    );
                    in_flight.future.clone()
                }
                None => {
                    let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
                    let inner = Arc::clone(&self.inner);
                    let future = async move {
                        let started_at = Instant::now();
                        // Frees the slot even if the refresh panics
                        let release = SlotRelease {
                            inner: Arc::clone(&inner),
                            id,
                        };
                        let result = inner.perform_refresh().await;
                        // Free the slot before any waiter sees the result
                        drop(release);
                        debug!(
                            refresh_id = id,
                            elapsed_ms = started_at.elapsed().as_millis() as u64,
                            ok = result.is_ok(),
                            "Token refresh settled"
                        );
                        result
                    }
                    .boxed()
                    .shared();

                    info!(refresh_id = id, "Starting token refresh");
                    *slot = Some(InFlight {
                        id,
                        started_at: Instant::now(),
                        future: future.clone(),
                    });
                    future
                }
            }
        };

        future.await
    }
}

struct SlotRelease {
    inner: Arc<Inner>,
    id: u64,
}

impl Drop for SlotRelease {
    fn drop(&mut self) {
        self.inner.finish(self.id);
    }
}

impl Inner {
    fn slot(&self) -> MutexGuard<'_, Option<InFlight>> {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn finish(&self, id: u64) {
        let mut slot = self.slot();
        if slot.as_ref().map(|f| f.id) == Some(id) {
            *slot = None;
        }
    }

    async fn perform_refresh(&self) -> Result<String, AuthError> {
        let refresh_token = self
            .store
            .refresh_token()
            .ok_or(AuthError::NoRefreshToken)?;

        let response = self
            .http
            .post(&self.refresh_url)
            .timeout(self.timeout)
            .json(&RefreshRequest {
                refresh_token: &refresh_token,
            })
            .send()
            .await
            .map_err(|e| AuthError::RefreshFailed {
                status: None,
                message: e.to_string(),
            })?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            warn!("Refresh token rejected, clearing session");
            self.store.clear_all(false);
            self.status.publish(SessionState::Anonymous {
                reason: Some(SignOutReason::SessionExpired),
            });
            return Err(AuthError::RefreshTokenExpired);
        }
        if !status.is_success() {
            warn!(status = status.as_u16(), "Token refresh failed");
            return Err(AuthError::RefreshFailed {
                status: Some(status.as_u16()),
                message: format!("Token refresh failed: {}", status),
            });
        }

        let body: RefreshResponse = response.json().await.map_err(|e| AuthError::RefreshFailed {
            status: Some(status.as_u16()),
            message: format!("Invalid refresh response: {}", e),
        })?;

        let access_token = body
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AuthError::RefreshFailed {
                status: Some(status.as_u16()),
                message: "Refresh response did not include an access token".to_string(),
            })?;

        self.store.set_access_token(
            &access_token,
            body.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS),
        );
        if let Some(rotated) = body.refresh_token.filter(|t| !t.is_empty()) {
            self.store.set_refresh_token(&rotated);
        }
        self.status.publish(SessionState::Authenticated);

        info!("Token refreshed successfully");
        Ok(access_token)
    }
}
