use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, error, warn};

use super::expiry::{default_buffer, is_expired};
use crate::clock::{Clock, SystemClock};
use crate::storage::KeyValueStore;

// Storage keys are shared with the web client, so they must not change.
pub const ACCESS_TOKEN_KEY: &str = "access_token";
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";
pub const SPOTIFY_TOKEN_KEY: &str = "spotify_jwt";
pub const TOKEN_EXPIRY_KEY: &str = "token_expiry";
pub const SESSION_ID_KEY: &str = "session_id";
pub const USER_NAME_KEY: &str = "user_name";

/// Lifetime assumed when the server does not send `expires_in`.
pub const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

/// Point-in-time copy of the stored credentials.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialSet {
    pub access_token: Option<String>,
    pub access_token_expiry: Option<DateTime<Utc>>,
    pub refresh_token: Option<String>,
    pub third_party_token: Option<String>,
}

/// The only writer of session credentials.
///
/// Storage failures never escape: writes are logged and dropped, reads come
/// back as `None`. A session on broken storage degrades to "not persisted"
/// rather than failing the caller.
#[derive(Clone)]
pub struct TokenStore {
    storage: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    refresh_buffer: Duration,
}

impl TokenStore {
    pub fn new(storage: Arc<dyn KeyValueStore>) -> Self {
        Self::with_clock(storage, Arc::new(SystemClock))
    }

    pub fn with_clock(storage: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            storage,
            clock,
            refresh_buffer: default_buffer(),
        }
    }

    pub fn with_refresh_buffer(mut self, buffer: Duration) -> Self {
        self.refresh_buffer = buffer;
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    pub fn refresh_buffer(&self) -> Duration {
        self.refresh_buffer
    }

    // ===== Storage access =====

    fn read(&self, key: &str) -> Option<String> {
        match self.storage.get(key) {
            // An empty string is as good as nothing
            Ok(value) => value.filter(|v| !v.is_empty()),
            Err(e) => {
                error!(key, error = %e, "Failed to read from storage");
                None
            }
        }
    }

    fn write(&self, key: &str, value: &str) {
        if let Err(e) = self.storage.set(key, value) {
            error!(key, error = %e, "Failed to write to storage");
        }
    }

    fn delete(&self, key: &str) {
        if let Err(e) = self.storage.remove(key) {
            error!(key, error = %e, "Failed to remove from storage");
        }
    }

    // ===== Access token =====

    /// Store the access token along with its absolute expiry (now + `expires_in_secs`).
    /// A negative or unrepresentable lifetime falls back to `DEFAULT_EXPIRES_IN_SECS`.
    pub fn set_access_token(&self, token: &str, expires_in_secs: i64) {
        let expiry = self.expiry_after(expires_in_secs);
        self.write(ACCESS_TOKEN_KEY, token);
        self.write(TOKEN_EXPIRY_KEY, &expiry.timestamp_millis().to_string());
        debug!(expires_in_secs, "Access token stored");
    }

    fn expiry_after(&self, expires_in_secs: i64) -> DateTime<Utc> {
        let now = self.now();
        let expiry = Some(expires_in_secs)
            .filter(|secs| *secs >= 0)
            .and_then(Duration::try_seconds)
            .and_then(|lifetime| now.checked_add_signed(lifetime));
        match expiry {
            Some(expiry) => expiry,
            None => {
                warn!(expires_in_secs, "Token lifetime out of range, using default");
                now + Duration::seconds(DEFAULT_EXPIRES_IN_SECS)
            }
        }
    }

    pub fn access_token(&self) -> Option<String> {
        self.read(ACCESS_TOKEN_KEY)
    }

    pub fn access_token_expiry(&self) -> Option<DateTime<Utc>> {
        let raw = self.read(TOKEN_EXPIRY_KEY)?;
        match raw.trim().parse::<i64>() {
            Ok(millis) => DateTime::from_timestamp_millis(millis),
            Err(e) => {
                warn!(value = %raw, error = %e, "Unparsable token expiry");
                None
            }
        }
    }

    /// Expired, or close enough to expiry that it should be refreshed first.
    pub fn is_token_expired(&self) -> bool {
        is_expired(self.access_token_expiry(), self.refresh_buffer, self.now())
    }

    pub fn is_authenticated(&self) -> bool {
        self.access_token().is_some() && !self.is_token_expired()
    }

    // ===== Refresh token =====

    pub fn set_refresh_token(&self, token: &str) {
        self.write(REFRESH_TOKEN_KEY, token);
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.read(REFRESH_TOKEN_KEY)
    }

    // ===== Spotify token =====

    pub fn set_third_party_token(&self, token: &str) {
        self.write(SPOTIFY_TOKEN_KEY, token);
    }

    pub fn third_party_token(&self) -> Option<String> {
        self.read(SPOTIFY_TOKEN_KEY)
    }

    pub fn clear_third_party_token(&self) {
        self.delete(SPOTIFY_TOKEN_KEY);
    }

    // ===== Session metadata =====

    pub fn set_session_id(&self, session_id: &str) {
        self.write(SESSION_ID_KEY, session_id);
    }

    pub fn session_id(&self) -> Option<String> {
        self.read(SESSION_ID_KEY)
    }

    pub fn clear_session_id(&self) {
        self.delete(SESSION_ID_KEY);
    }

    pub fn set_user_name(&self, user_name: &str) {
        self.write(USER_NAME_KEY, user_name);
    }

    pub fn user_name(&self) -> Option<String> {
        self.read(USER_NAME_KEY)
    }

    // ===== Teardown =====

    /// Remove the access token, refresh token and expiry. The Spotify token
    /// goes too unless `preserve_third_party` is set.
    pub fn clear_all(&self, preserve_third_party: bool) {
        self.delete(ACCESS_TOKEN_KEY);
        self.delete(REFRESH_TOKEN_KEY);
        self.delete(TOKEN_EXPIRY_KEY);
        if !preserve_third_party {
            self.delete(SPOTIFY_TOKEN_KEY);
        }
        debug!(preserve_third_party, "Authentication tokens cleared");
    }

    pub fn credentials(&self) -> CredentialSet {
        CredentialSet {
            access_token: self.access_token(),
            access_token_expiry: self.access_token_expiry(),
            refresh_token: self.refresh_token(),
            third_party_token: self.third_party_token(),
        }
    }
}
