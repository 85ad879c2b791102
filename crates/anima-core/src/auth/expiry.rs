//! Token expiry policy and unverified JWT inspection.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tracing::debug;

/// Buffer time before expiry to trigger refresh (5 minutes)
pub const REFRESH_BUFFER_MINUTES: i64 = 5;

pub fn default_buffer() -> Duration {
    Duration::minutes(REFRESH_BUFFER_MINUTES)
}

/// A token counts as expired once `now` is inside the buffer window before
/// its expiry. A missing expiry is treated as expired.
pub fn is_expired(expiry: Option<DateTime<Utc>>, buffer: Duration, now: DateTime<Utc>) -> bool {
    match expiry {
        Some(expiry) => now >= expiry - buffer,
        None => true,
    }
}

/// Claims read from a JWT payload. Informational only: the signature is not
/// checked, so nothing here may be used for an access decision.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TokenClaims {
    pub sub: Option<serde_json::Value>,
    pub exp: Option<i64>,
    pub iat: Option<i64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

pub fn decode_token(token: &str) -> Option<TokenClaims> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        debug!(segments = parts.len(), "Invalid token format");
        return None;
    }

    let payload = parts[1].trim_end_matches('=');
    let bytes = match URL_SAFE_NO_PAD.decode(payload) {
        Ok(bytes) => bytes,
        Err(e) => {
            debug!(error = %e, "Token payload is not base64url");
            return None;
        }
    };

    serde_json::from_slice(&bytes)
        .map_err(|e| debug!(error = %e, "Token payload is not a JSON object"))
        .ok()
}

/// Expiry from the `exp` claim, if the token carries one.
pub fn token_expiry(token: &str) -> Option<DateTime<Utc>> {
    decode_token(token)?
        .exp
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
}
