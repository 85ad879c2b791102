//! Request and response bodies for the backend endpoints.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoginResponse {
    pub access_token: Option<String>,
    pub expires_in: Option<i64>,
    pub refresh_token: Option<String>,
    /// Numeric on current deployments, a string on older ones.
    #[serde(default)]
    pub session_id: Option<Value>,
    pub user_name: Option<String>,
}

impl LoginResponse {
    /// The session id as stored: numbers and strings alike become text.
    pub fn session_id(&self) -> Option<String> {
        match self.session_id.as_ref()? {
            Value::Null => None,
            Value::String(s) if s.is_empty() => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CurrentUser {
    pub id: Option<Value>,
    pub email: Option<String>,
    pub nombre: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nombre: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Result of a profile update.
#[derive(Debug, Clone)]
pub struct ProfileUpdated {
    pub body: Value,
    /// The email changed, so the session was ended and the user has to sign
    /// in again with the new address.
    pub email_changed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpotifyExchange {
    pub spotify_jwt: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
pub struct SpotifyStatus {
    #[serde(default)]
    pub connected: bool,
}
