//! In-process mock of the anima backend.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anima_core::{ApiClient, Clock, Config, KeyValueStore, ManualClock, MemoryStore, StorageBackend, TokenStore};
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshMode {
    Issue,
    Reject,
    Unavailable,
}

pub struct BackendState {
    pub refresh_calls: AtomicUsize,
    pub me_calls: AtomicUsize,
    pub always_unauthorized_calls: AtomicUsize,
    pub save_calls: AtomicUsize,
    pub refresh_mode: Mutex<RefreshMode>,
    /// `expires_in` sent by login and refresh.
    pub expires_in: Mutex<Value>,
    /// Bearer token protected routes accept.
    pub accepted_token: Mutex<String>,
    pub email: Mutex<String>,
    pub logout_status: Mutex<StatusCode>,
    pub logout_body: Mutex<Option<Value>>,
    pub last_headers: Mutex<Option<HeaderMap>>,
    pub last_body: Mutex<Option<Bytes>>,
}

impl Default for BackendState {
    fn default() -> Self {
        Self {
            refresh_calls: AtomicUsize::new(0),
            me_calls: AtomicUsize::new(0),
            always_unauthorized_calls: AtomicUsize::new(0),
            save_calls: AtomicUsize::new(0),
            refresh_mode: Mutex::new(RefreshMode::Issue),
            expires_in: Mutex::new(json!(3600)),
            accepted_token: Mutex::new("access-0".to_string()),
            email: Mutex::new("ana@example.com".to_string()),
            logout_status: Mutex::new(StatusCode::OK),
            logout_body: Mutex::new(None),
            last_headers: Mutex::new(None),
            last_body: Mutex::new(None),
        }
    }
}

impl BackendState {
    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn me_calls(&self) -> usize {
        self.me_calls.load(Ordering::SeqCst)
    }

    pub fn set_refresh_mode(&self, mode: RefreshMode) {
        *self.refresh_mode.lock().unwrap() = mode;
    }

    pub fn set_expires_in(&self, expires_in: Value) {
        *self.expires_in.lock().unwrap() = expires_in;
    }

    fn expires_in(&self) -> Value {
        self.expires_in.lock().unwrap().clone()
    }

    pub fn accept(&self, token: &str) {
        *self.accepted_token.lock().unwrap() = token.to_string();
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        let expected = format!("Bearer {}", self.accepted_token.lock().unwrap());
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            == Some(expected.as_str())
    }
}

type Shared = Arc<BackendState>;

fn session_rejected() -> Response {
    (StatusCode::UNAUTHORIZED, Json(json!({"detail": "Token expired"}))).into_response()
}

async fn refresh(State(state): State<Shared>, Json(body): Json<Value>) -> Response {
    let n = state.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
    // Long enough for concurrent callers to pile up on one refresh
    tokio::time::sleep(Duration::from_millis(50)).await;

    if body.get("refresh_token").and_then(Value::as_str).is_none() {
        return (StatusCode::UNPROCESSABLE_ENTITY, Json(json!({"detail": "refresh_token required"})))
            .into_response();
    }

    let mode = *state.refresh_mode.lock().unwrap();
    match mode {
        RefreshMode::Issue => {
            let token = format!("access-{}", n);
            state.accept(&token);
            Json(json!({
                "access_token": token,
                "expires_in": state.expires_in(),
                "refresh_token": format!("refresh-{}", n),
            }))
            .into_response()
        }
        RefreshMode::Reject => {
            (StatusCode::UNAUTHORIZED, Json(json!({"detail": "Refresh token expired"}))).into_response()
        }
        RefreshMode::Unavailable => {
            (StatusCode::SERVICE_UNAVAILABLE, "upstream unavailable").into_response()
        }
    }
}

async fn login(State(state): State<Shared>, Json(body): Json<Value>) -> Response {
    if body.get("password").and_then(Value::as_str) != Some("secret") {
        return (StatusCode::UNAUTHORIZED, Json(json!({"detail": "Credenciales inválidas"})))
            .into_response();
    }
    state.accept("access-login");
    Json(json!({
        "access_token": "access-login",
        "expires_in": state.expires_in(),
        "refresh_token": "refresh-login",
        "session_id": 42,
        "user_name": "Ana",
    }))
    .into_response()
}

async fn register(Json(body): Json<Value>) -> Response {
    if body.get("email").and_then(Value::as_str) == Some("taken@example.com") {
        return (StatusCode::BAD_REQUEST, Json(json!({"detail": "Email ya registrado"}))).into_response();
    }
    (StatusCode::CREATED, Json(json!({"id": 7}))).into_response()
}

async fn logout(State(state): State<Shared>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    if !state.authorized(&headers) {
        return session_rejected();
    }
    *state.logout_body.lock().unwrap() = Some(body);
    let status = *state.logout_status.lock().unwrap();
    (status, Json(json!({}))).into_response()
}

async fn me(State(state): State<Shared>, headers: HeaderMap) -> Response {
    state.me_calls.fetch_add(1, Ordering::SeqCst);
    if !state.authorized(&headers) {
        return session_rejected();
    }
    let email = state.email.lock().unwrap().clone();
    Json(json!({"id": 1, "email": email, "nombre": "Ana"})).into_response()
}

async fn profile(State(state): State<Shared>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    if !state.authorized(&headers) {
        return session_rejected();
    }
    if let Some(email) = body.get("email").and_then(Value::as_str) {
        *state.email.lock().unwrap() = email.to_string();
    }
    Json(json!({"message": "Perfil actualizado"})).into_response()
}

async fn change_password(State(state): State<Shared>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    if !state.authorized(&headers) {
        return session_rejected();
    }
    if body.get("current_password").and_then(Value::as_str) != Some("old-pass") {
        return (StatusCode::UNAUTHORIZED, Json(json!({"detail": "Contraseña actual incorrecta"})))
            .into_response();
    }
    Json(json!({"message": "Contraseña actualizada"})).into_response()
}

async fn always_unauthorized(State(state): State<Shared>) -> Response {
    state.always_unauthorized_calls.fetch_add(1, Ordering::SeqCst);
    (StatusCode::UNAUTHORIZED, Json(json!({"detail": "Invalid session"}))).into_response()
}

async fn slow() -> Response {
    tokio::time::sleep(Duration::from_secs(2)).await;
    Json(json!({})).into_response()
}

async fn analyze(State(state): State<Shared>, headers: HeaderMap, body: Bytes) -> Response {
    if !state.authorized(&headers) {
        return session_rejected();
    }
    *state.last_headers.lock().unwrap() = Some(headers);
    *state.last_body.lock().unwrap() = Some(body);
    Json(json!({
        "emotion": "happy",
        "confidence": 0.91,
        "emotions_detected": {"happy": 91.0, "neutral": 9.0},
        "recommendations": [],
    }))
    .into_response()
}

async fn save_analysis(State(state): State<Shared>, headers: HeaderMap) -> Response {
    if !state.authorized(&headers) {
        return session_rejected();
    }
    let n = state.save_calls.fetch_add(1, Ordering::SeqCst) + 1;
    tokio::time::sleep(Duration::from_millis(30)).await;
    Json(json!({"analysis_id": n})).into_response()
}

async fn spotify_exchange(Query(params): Query<HashMap<String, String>>) -> Response {
    match params.get("state").map(String::as_str) {
        Some("state with spaces&more") => Json(json!({"spotify_jwt": "spotify-good"})).into_response(),
        _ => (StatusCode::BAD_REQUEST, Json(json!({"detail": "Invalid state"}))).into_response(),
    }
}

async fn spotify_status(headers: HeaderMap) -> Response {
    let bearer = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok());
    if bearer == Some("Bearer spotify-good") {
        Json(json!({"connected": true})).into_response()
    } else {
        (StatusCode::UNAUTHORIZED, Json(json!({"detail": "Invalid Spotify token"}))).into_response()
    }
}

pub struct Backend {
    pub addr: SocketAddr,
    pub state: Shared,
}

impl Backend {
    pub async fn spawn() -> Self {
        let state: Shared = Arc::new(BackendState::default());
        let app = Router::new()
            .route("/v1/auth/refresh", post(refresh))
            .route("/v1/auth/login", post(login))
            .route("/v1/auth/register", post(register))
            .route("/v1/auth/logout", post(logout))
            .route("/v1/auth/me", get(me))
            .route("/v1/auth/spotify/exchange", get(spotify_exchange))
            .route("/v1/auth/spotify/status", get(spotify_status))
            .route("/v1/user/profile", patch(profile))
            .route("/v1/user/change-password", post(change_password))
            .route("/v1/analysis/analyze", post(analyze))
            .route("/v1/analysis/analyze-base64", post(analyze))
            .route("/v1/analytics/save-analysis", post(save_analysis))
            .route("/v1/always-401", get(always_unauthorized))
            .route("/slow", get(slow))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind mock backend");
        let addr = listener.local_addr().expect("Failed to read local addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("Mock backend failed");
        });

        Self { addr, state }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn config(&self) -> Config {
        Config {
            base_url: self.url(),
            storage: StorageBackend::Memory,
            ..Config::default()
        }
    }

    /// Client over in-memory storage with a hand-driven clock.
    pub fn client(&self) -> TestClient {
        let memory = Arc::new(MemoryStore::new());
        let clock = ManualClock::new(chrono::Utc::now());
        let store = TokenStore::with_clock(memory.clone(), Arc::new(clock.clone()));
        let client = ApiClient::new(&self.config(), store).expect("Failed to create client");
        TestClient {
            client,
            memory,
            clock,
        }
    }

    /// Client that already holds the credentials the backend accepts.
    pub fn signed_in_client(&self) -> TestClient {
        let test = self.client();
        let store = test.client.store();
        store.set_access_token("access-0", 3600);
        store.set_refresh_token("refresh-0");
        store.set_third_party_token("spotify-good");
        store.set_session_id("42");
        test
    }
}

pub struct TestClient {
    pub client: ApiClient,
    pub memory: Arc<MemoryStore>,
    pub clock: ManualClock,
}

impl TestClient {
    /// Push the stored token past its expiry.
    pub fn expire_access_token(&self) {
        self.clock.advance(chrono::Duration::seconds(3600));
    }

    pub fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.clock.now()
    }

    pub fn stored(&self, key: &str) -> Option<String> {
        self.memory.get(key).unwrap()
    }
}
