use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::refresh::RefreshCoordinator;
use super::store::TokenStore;

/// Why a session ended. Front ends use this to pick the notice they show on
/// the sign-in screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignOutReason {
    LoggedOut,
    SessionExpired,
    NotAuthenticated,
    EmailChanged,
}

impl SignOutReason {
    /// Notice shown on the sign-in screen.
    pub fn notice(&self) -> &'static str {
        match self {
            SignOutReason::LoggedOut => "Sesión cerrada.",
            SignOutReason::SessionExpired => {
                "Sesión expirada. Por favor, inicia sesión nuevamente."
            }
            SignOutReason::NotAuthenticated => "No estás autenticado. Por favor, inicia sesión.",
            SignOutReason::EmailChanged => {
                "Tu correo fue actualizado. Por favor, inicia sesión nuevamente."
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Anonymous { reason: Option<SignOutReason> },
    Checking,
    Authenticated,
}

impl SessionState {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionState::Authenticated)
    }
}

/// Observable session state. Clones publish to and read from the same channel.
#[derive(Clone)]
pub struct SessionStatus {
    tx: Arc<watch::Sender<SessionState>>,
}

impl SessionStatus {
    pub fn new(initial: SessionState) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    pub fn current(&self) -> SessionState {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.tx.subscribe()
    }

    pub(crate) fn publish(&self, state: SessionState) {
        let previous = self.tx.send_replace(state);
        if previous != state {
            debug!(from = ?previous, to = ?state, "Session state changed");
        }
    }
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self::new(SessionState::Anonymous { reason: None })
    }
}

/// The session context: token store, refresh coordinator and observable
/// state, built once at startup and shared by cloning.
#[derive(Clone)]
pub struct SessionManager {
    store: TokenStore,
    refresher: RefreshCoordinator,
    status: SessionStatus,
}

impl SessionManager {
    /// Build a session around `store`, starting `Authenticated` if the stored
    /// token is still usable.
    pub fn new(store: TokenStore, http: reqwest::Client, api_base: &str) -> Self {
        let status = SessionStatus::new(Self::initial_state(&store));
        let refresher = RefreshCoordinator::new(http, api_base, store.clone(), status.clone());
        Self {
            store,
            refresher,
            status,
        }
    }

    /// Like `new`, with an explicit bound on refresh requests.
    pub fn with_refresh_timeout(
        store: TokenStore,
        http: reqwest::Client,
        api_base: &str,
        timeout: Duration,
    ) -> Self {
        let status = SessionStatus::new(Self::initial_state(&store));
        let refresher =
            RefreshCoordinator::with_timeout(http, api_base, timeout, store.clone(), status.clone());
        Self {
            store,
            refresher,
            status,
        }
    }

    fn initial_state(store: &TokenStore) -> SessionState {
        if store.is_authenticated() {
            SessionState::Authenticated
        } else {
            SessionState::Anonymous { reason: None }
        }
    }

    pub fn store(&self) -> &TokenStore {
        &self.store
    }

    pub fn refresher(&self) -> &RefreshCoordinator {
        &self.refresher
    }

    pub fn status(&self) -> &SessionStatus {
        &self.status
    }

    pub fn state(&self) -> SessionState {
        self.status.current()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.status.subscribe()
    }

    /// Guard check run on every protected entry: always passes through
    /// `Checking`, then settles on `Authenticated` or `Anonymous`.
    pub async fn check(&self) -> bool {
        self.status.publish(SessionState::Checking);

        if !self.store.is_authenticated() {
            debug!("No usable access token, not authenticated");
            self.status.publish(SessionState::Anonymous { reason: None });
            return false;
        }

        match self.refresher.get_valid_access_token().await {
            Ok(_) => {
                self.status.publish(SessionState::Authenticated);
                true
            }
            Err(e) => {
                warn!(error = %e, "Token validation failed");
                // A terminal refresh failure has already published its reason
                if self.status.current() == SessionState::Checking {
                    self.status.publish(SessionState::Anonymous { reason: None });
                }
                false
            }
        }
    }

    pub(crate) fn mark_authenticated(&self) {
        self.status.publish(SessionState::Authenticated);
    }

    /// Local logout. Safe to call when already logged out.
    pub fn logout(&self, preserve_third_party: bool) {
        self.store.clear_all(preserve_third_party);
        self.store.clear_session_id();
        self.status.publish(SessionState::Anonymous {
            reason: Some(SignOutReason::LoggedOut),
        });
        info!(preserve_third_party, "Logged out");
    }

    /// End the session for `reason`, keeping the Spotify token.
    pub fn invalidate(&self, reason: SignOutReason) {
        self.store.clear_all(true);
        self.store.clear_session_id();
        self.status.publish(SessionState::Anonymous {
            reason: Some(reason),
        });
        info!(?reason, "Session invalidated");
    }

    /// End the session after an unrecoverable token failure. Everything goes,
    /// including the Spotify token.
    pub(crate) fn expire(&self) {
        self.store.clear_all(false);
        self.status.publish(SessionState::Anonymous {
            reason: Some(SignOutReason::SessionExpired),
        });
        warn!("Session expired");
    }

    pub(crate) fn require_sign_in(&self) {
        self.status.publish(SessionState::Anonymous {
            reason: Some(SignOutReason::NotAuthenticated),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn manager() -> (SessionManager, Arc<MemoryStore>) {
        let memory = Arc::new(MemoryStore::new());
        let store = TokenStore::new(memory.clone());
        store.set_access_token("tok", 3600);
        store.set_refresh_token("refresh");
        store.set_third_party_token("spotify");
        store.set_session_id("7");
        let manager = SessionManager::new(store, reqwest::Client::new(), "http://127.0.0.1:9");
        (manager, memory)
    }

    #[test]
    fn test_initial_state_from_store() {
        let (manager, _) = manager();
        assert_eq!(manager.state(), SessionState::Authenticated);

        let empty = SessionManager::new(
            TokenStore::new(Arc::new(MemoryStore::new())),
            reqwest::Client::new(),
            "http://127.0.0.1:9",
        );
        assert_eq!(empty.state(), SessionState::Anonymous { reason: None });
    }

    #[test]
    fn test_logout_is_idempotent() {
        let (manager, memory) = manager();

        manager.logout(true);
        let once = memory.snapshot();
        manager.logout(true);
        let twice = memory.snapshot();

        assert_eq!(once, twice);
        assert_eq!(manager.store().third_party_token().as_deref(), Some("spotify"));
        assert_eq!(manager.store().session_id(), None);
        assert_eq!(
            manager.state(),
            SessionState::Anonymous {
                reason: Some(SignOutReason::LoggedOut)
            }
        );
    }

    #[test]
    fn test_logout_can_drop_spotify() {
        let (manager, _) = manager();
        manager.logout(false);
        assert_eq!(manager.store().third_party_token(), None);
    }

    #[test]
    fn test_invalidate_keeps_spotify() {
        let (manager, _) = manager();
        manager.invalidate(SignOutReason::EmailChanged);
        assert_eq!(manager.store().access_token(), None);
        assert_eq!(manager.store().third_party_token().as_deref(), Some("spotify"));
        assert_eq!(
            manager.state(),
            SessionState::Anonymous {
                reason: Some(SignOutReason::EmailChanged)
            }
        );
    }

    #[tokio::test]
    async fn test_check_passes_through_checking() {
        let (manager, _) = manager();
        let rx = manager.subscribe();

        assert!(manager.check().await);
        assert_eq!(manager.state(), SessionState::Authenticated);
        assert!(rx.has_changed().unwrap_or(false));
    }

    #[tokio::test]
    async fn test_check_without_token_is_anonymous() {
        let (manager, _) = manager();
        manager.store().clear_all(true);
        assert!(!manager.check().await);
        assert_eq!(manager.state(), SessionState::Anonymous { reason: None });
    }
}
