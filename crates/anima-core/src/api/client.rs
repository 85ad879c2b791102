//! API client for the anima backend.
//!
//! `ApiClient` owns the HTTP connection pool and the session context. Every
//! protected call goes through `authenticated_fetch`, which gets a valid token
//! from the refresh coordinator and retries once after a session 401.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use anyhow::Context;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderName, AUTHORIZATION};
use reqwest::{Client, StatusCode, Url};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::request::ApiRequest;
use super::response::ApiResponse;
use super::types::{
    ChangePasswordRequest, CurrentUser, LoginRequest, LoginResponse, ProfileUpdate,
    ProfileUpdated, SpotifyExchange, SpotifyStatus,
};
use super::ApiError;
use crate::analysis::{AnalysisRecord, SaveGuard, SaveOutcome};
use crate::auth::store::DEFAULT_EXPIRES_IN_SECS;
use crate::auth::{AuthError, SessionManager, SignOutReason, TokenStore};
use crate::config::Config;
use crate::storage;

// ============================================================================
// Constants
// ============================================================================

const LOGIN_PATH: &str = "/v1/auth/login";
const REGISTER_PATH: &str = "/v1/auth/register";
const LOGOUT_PATH: &str = "/v1/auth/logout";
const CURRENT_USER_PATH: &str = "/v1/auth/me";
const PROFILE_PATH: &str = "/v1/user/profile";
const CHANGE_PASSWORD_PATH: &str = "/v1/user/change-password";
const ANALYZE_PATH: &str = "/v1/analysis/analyze";
const ANALYZE_BASE64_PATH: &str = "/v1/analysis/analyze-base64";
const SPOTIFY_EXCHANGE_PATH: &str = "/v1/auth/spotify/exchange";
const SPOTIFY_STATUS_PATH: &str = "/v1/auth/spotify/status";
const SAVE_ANALYSIS_PATH: &str = "/v1/analytics/save-analysis";

/// The analyzer buckets results by the user's local day.
const TIMEZONE_HEADER: HeaderName = HeaderName::from_static("x-client-timezone");
const SPOTIFY_TOKEN_HEADER: HeaderName = HeaderName::from_static("x-spotify-token");

/// Retries allowed after a session 401.
const DEFAULT_AUTH_RETRIES: u32 = 1;

/// How long `current_user` answers from memory.
const USER_CACHE_TTL_SECS: i64 = 5;

struct CachedUser {
    user: CurrentUser,
    fetched_at: DateTime<Utc>,
}

/// Client for the anima backend.
/// Clone is cheap; clones share the connection pool, session and user cache.
#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    session: SessionManager,
    api_base: String,
    login_base: String,
    request_timeout: Duration,
    login_timeout: Duration,
    user_cache: Arc<Mutex<Option<CachedUser>>>,
}

impl ApiClient {
    /// Create a client around an existing token store.
    pub fn new(config: &Config, store: TokenStore) -> Result<Self, ApiError> {
        let http = Client::builder().build().map_err(ApiError::from_transport)?;
        let store = store.with_refresh_buffer(config.refresh_buffer());
        let session = SessionManager::with_refresh_timeout(
            store,
            http.clone(),
            config.api_base(),
            config.request_timeout(),
        );

        Ok(Self {
            http,
            session,
            api_base: config.api_base().to_string(),
            login_base: config.login_base().to_string(),
            request_timeout: config.request_timeout(),
            login_timeout: config.login_timeout(),
            user_cache: Arc::new(Mutex::new(None)),
        })
    }

    /// Create a client with the storage backing named in `config`.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let cache_dir = config.cache_dir()?;
        let store = TokenStore::new(storage::open(config.storage, &cache_dir));
        Self::new(config, store).context("Failed to create HTTP client")
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub fn store(&self) -> &TokenStore {
        self.session.store()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    // ========================================================================
    // Request plumbing
    // ========================================================================

    /// Plain time-bounded request, no credentials attached.
    pub async fn fetch(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        self.send(request, None).await
    }

    /// Request with a valid access token, refreshing and retrying once if the
    /// server rejects the session.
    pub async fn authenticated_fetch(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        self.fetch_with_auth(request, true, DEFAULT_AUTH_RETRIES).await
    }

    /// `authenticated_fetch` with explicit control. A 401 that names something
    /// other than the session (a wrong current password, say) is returned to
    /// the caller untouched, as is any 401 once `retries` are used up.
    pub async fn fetch_with_auth(
        &self,
        request: &ApiRequest,
        requires_auth: bool,
        retries: u32,
    ) -> Result<ApiResponse, ApiError> {
        if !requires_auth {
            return self.fetch(request).await;
        }

        let refresher = self.session.refresher();
        let mut token = match refresher.get_valid_access_token().await {
            Ok(token) => token,
            Err(AuthError::NoToken) => {
                debug!(url = %request.url, "No access token for protected request");
                self.session.require_sign_in();
                return Err(ApiError::NotAuthenticated);
            }
            Err(e) => return Err(self.refresh_failed(e)),
        };

        let mut retries_remaining = retries;
        loop {
            let response = self.send(request, Some(&token)).await?;
            if response.status() != StatusCode::UNAUTHORIZED || retries_remaining == 0 {
                return Ok(response);
            }
            if response.is_business_rejection() {
                debug!(url = %request.url, "401 is not about the session, returning as-is");
                return Ok(response);
            }

            info!(url = %request.url, retries_remaining, "Session rejected, refreshing token");
            token = refresher
                .refresh_access_token()
                .await
                .map_err(|e| self.refresh_failed(e))?;
            retries_remaining -= 1;
        }
    }

    fn refresh_failed(&self, error: AuthError) -> ApiError {
        if error.is_terminal() {
            warn!(error = %error, "Token refresh failed terminally");
            self.session.expire();
            ApiError::SessionExpired
        } else {
            warn!(error = %error, "Token refresh failed, keeping credentials");
            ApiError::Auth(error)
        }
    }

    async fn send(&self, request: &ApiRequest, bearer: Option<&str>) -> Result<ApiResponse, ApiError> {
        let started = Instant::now();
        let response = request
            .build(&self.http, bearer, self.request_timeout)?
            .send()
            .await
            .map_err(|e| {
                let error = ApiError::from_transport(e);
                warn!(method = %request.method, url = %request.url, error = %error, "Request failed");
                error
            })?;

        let response = ApiResponse::read(response).await?;
        debug!(
            method = %request.method,
            url = %request.url,
            status = response.status().as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Request finished"
        );
        Ok(response)
    }

    /// Non-success responses become errors. A session 401 that survived the
    /// retry means the session is gone.
    fn check(response: ApiResponse) -> Result<ApiResponse, ApiError> {
        if response.status() == StatusCode::UNAUTHORIZED && !response.is_business_rejection() {
            warn!(body = %ApiError::truncate_body(&response.text()), "Session rejected after refresh");
            return Err(ApiError::SessionExpired);
        }
        response.error_for_status()
    }

    fn body(response: &ApiResponse) -> Result<Value, ApiError> {
        if response.is_empty() {
            return Ok(Value::Null);
        }
        response.json()
    }

    fn to_json<T: Serialize>(value: &T) -> Result<Value, ApiError> {
        serde_json::to_value(value).map_err(|e| ApiError::InvalidRequest(e.to_string()))
    }

    // ========================================================================
    // Authentication
    // ========================================================================

    /// Sign in and persist the returned credentials.
    pub async fn login(&self, credentials: &LoginRequest) -> Result<LoginResponse, ApiError> {
        let request = ApiRequest::post(format!("{}{}", self.login_base, LOGIN_PATH))
            .json(Self::to_json(credentials)?)
            .timeout(self.login_timeout);

        let started = Instant::now();
        let result = self.fetch(&request).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        let response = match result {
            Ok(response) => {
                info!(status = response.status().as_u16(), elapsed_ms, "Login request finished");
                response.error_for_status()?
            }
            Err(e) => {
                warn!(error = %e, elapsed_ms, "Login request failed");
                return Err(e);
            }
        };

        let data: LoginResponse = response.json()?;
        let access_token = data
            .access_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                ApiError::InvalidResponse("Login response did not include an access token".to_string())
            })?;

        let store = self.store();
        store.set_access_token(access_token, data.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS));
        if let Some(refresh_token) = data.refresh_token.as_deref().filter(|t| !t.is_empty()) {
            store.set_refresh_token(refresh_token);
        }
        if let Some(session_id) = data.session_id() {
            store.set_session_id(&session_id);
        }
        if let Some(user_name) = data.user_name.as_deref().filter(|n| !n.is_empty()) {
            store.set_user_name(user_name);
        }

        self.clear_current_user_cache();
        self.session.mark_authenticated();
        Ok(data)
    }

    /// Create an account. Does not sign in.
    pub async fn register(&self, form: &Value) -> Result<Value, ApiError> {
        let request = ApiRequest::post(self.url(REGISTER_PATH)).json(form.clone());
        let response = self.fetch(&request).await?.error_for_status()?;
        info!("Account registered");
        Self::body(&response)
    }

    /// End the session on the server (best effort) and locally. Local
    /// teardown always happens and keeps the Spotify token.
    pub async fn logout(&self) {
        if let Some(session_id) = self.store().session_id() {
            let id = session_id
                .parse::<i64>()
                .map(Value::from)
                .unwrap_or_else(|_| Value::String(session_id.clone()));
            let request = ApiRequest::post(self.url(LOGOUT_PATH)).json(json!({ "session_id": id }));

            match self.authenticated_fetch(&request).await {
                Ok(response) if response.is_success() => debug!("Server session closed"),
                Ok(response) => {
                    warn!(status = response.status().as_u16(), "Server logout rejected")
                }
                Err(e) => warn!(error = %e, "Server logout failed"),
            }
        }

        self.clear_current_user_cache();
        self.session.logout(true);
    }

    // ========================================================================
    // User
    // ========================================================================

    fn user_cache(&self) -> MutexGuard<'_, Option<CachedUser>> {
        self.user_cache.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn cached_user(&self) -> Option<CurrentUser> {
        let now = self.store().now();
        self.user_cache()
            .as_ref()
            .filter(|c| now - c.fetched_at < chrono::Duration::seconds(USER_CACHE_TTL_SECS))
            .map(|c| c.user.clone())
    }

    /// The signed-in user. Repeated calls within 5 seconds share one request.
    pub async fn current_user(&self) -> Result<CurrentUser, ApiError> {
        if let Some(user) = self.cached_user() {
            debug!("Using cached current user");
            return Ok(user);
        }

        let request = ApiRequest::get(self.url(CURRENT_USER_PATH));
        let response = Self::check(self.authenticated_fetch(&request).await?)?;
        let user: CurrentUser = response.json()?;

        *self.user_cache() = Some(CachedUser {
            user: user.clone(),
            fetched_at: self.store().now(),
        });
        Ok(user)
    }

    pub fn clear_current_user_cache(&self) {
        *self.user_cache() = None;
    }

    /// Update name and/or email. Changing the email ends the session.
    pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<ProfileUpdated, ApiError> {
        let previous_email = match self.cached_user() {
            Some(user) => user.email,
            None => match self.current_user().await {
                Ok(user) => user.email,
                Err(e) => {
                    debug!(error = %e, "Could not load current email before update");
                    None
                }
            },
        };

        let request = ApiRequest::patch(self.url(PROFILE_PATH)).json(Self::to_json(update)?);
        let response = Self::check(self.authenticated_fetch(&request).await?)?;
        self.clear_current_user_cache();
        let body = Self::body(&response)?;

        let email_changed = match (previous_email.as_deref(), update.email.as_deref()) {
            (Some(previous), Some(new)) => previous.trim() != new.trim(),
            _ => false,
        };
        if email_changed {
            info!("Email changed, signing out");
            self.session.invalidate(SignOutReason::EmailChanged);
        }

        Ok(ProfileUpdated {
            body,
            email_changed,
        })
    }

    /// Change the password. A wrong current password comes back as
    /// `ApiError::Server { status: 401, .. }` with the server's message.
    pub async fn change_password(&self, change: &ChangePasswordRequest) -> Result<Value, ApiError> {
        if change.new_password == change.current_password {
            return Err(ApiError::SamePassword);
        }

        let request = ApiRequest::post(self.url(CHANGE_PASSWORD_PATH)).json(Self::to_json(change)?);
        let response = Self::check(self.authenticated_fetch(&request).await?)?;
        info!("Password changed");
        Self::body(&response)
    }

    // ========================================================================
    // Analysis
    // ========================================================================

    /// Upload an image file for emotion analysis.
    pub async fn analyze_emotion_file(
        &self,
        data: Vec<u8>,
        file_name: &str,
        timezone: &str,
    ) -> Result<Value, ApiError> {
        let request = ApiRequest::post(self.url(ANALYZE_PATH))
            .header(TIMEZONE_HEADER, timezone)?
            .file(
                "image",
                data,
                Some(file_name.to_string()),
                image_mime(file_name).map(str::to_string),
            );

        let response = Self::check(self.authenticated_fetch(&request).await?)?;
        response.json()
    }

    /// Analyze a base64 (data URL) image, e.g. a camera capture. The Spotify
    /// token is forwarded so recommendations can come from the user's account.
    pub async fn analyze_emotion_base64(&self, image: &str, timezone: &str) -> Result<Value, ApiError> {
        let mut request = ApiRequest::post(self.url(ANALYZE_BASE64_PATH))
            .header(TIMEZONE_HEADER, timezone)?
            .json(json!({ "image": image, "timezone": timezone }));
        if let Some(spotify) = self.store().third_party_token() {
            request = request.header(SPOTIFY_TOKEN_HEADER, &format!("Bearer {}", spotify))?;
        }

        let response = Self::check(self.authenticated_fetch(&request).await?)?;
        response.json()
    }

    pub async fn save_analysis(&self, record: &AnalysisRecord) -> Result<Value, ApiError> {
        let request = ApiRequest::post(self.url(SAVE_ANALYSIS_PATH)).json(Self::to_json(record)?);
        let response = Self::check(self.authenticated_fetch(&request).await?)?;
        Self::body(&response)
    }

    /// `save_analysis`, unless `guard` says this result is already being or
    /// has just been saved.
    pub async fn save_analysis_once(
        &self,
        guard: &SaveGuard,
        record: &AnalysisRecord,
    ) -> Result<SaveOutcome<Value>, ApiError> {
        guard
            .save(record, move |record| async move { self.save_analysis(&record).await })
            .await
    }

    // ========================================================================
    // Spotify
    // ========================================================================

    /// Trade the OAuth `state` from the callback for a Spotify JWT and store it.
    pub async fn spotify_exchange(&self, state: &str) -> Result<String, ApiError> {
        let url = Url::parse_with_params(&self.url(SPOTIFY_EXCHANGE_PATH), &[("state", state)])
            .map_err(|e| ApiError::InvalidRequest(format!("Invalid exchange URL: {}", e)))?;

        let response = self
            .fetch(&ApiRequest::get(url.as_str()))
            .await?
            .error_for_status()?;
        let exchange: SpotifyExchange = response.json()?;
        let jwt = exchange
            .spotify_jwt
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                ApiError::InvalidResponse("Exchange response did not include spotify_jwt".to_string())
            })?;

        self.store().set_third_party_token(&jwt);
        info!("Spotify connected");
        Ok(jwt)
    }

    /// Whether the stored Spotify token is still accepted. A rejected token is
    /// removed.
    pub async fn spotify_status(&self) -> Result<bool, ApiError> {
        let Some(jwt) = self.store().third_party_token() else {
            return Ok(false);
        };

        let request = ApiRequest::get(self.url(SPOTIFY_STATUS_PATH))
            .header(AUTHORIZATION, &format!("Bearer {}", jwt))?;
        let response = self.fetch(&request).await?;
        if !response.is_success() {
            warn!(status = response.status().as_u16(), "Spotify token rejected, removing it");
            self.store().clear_third_party_token();
            return Ok(false);
        }

        let status: SpotifyStatus = response.json()?;
        Ok(status.connected)
    }
}

fn image_mime(file_name: &str) -> Option<&'static str> {
    let extension = file_name.rsplit_once('.')?.1.to_ascii_lowercase();
    match extension.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        "bmp" => Some("image/bmp"),
        _ => None,
    }
}
