use std::borrow::Cow;

use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::ApiError;

/// Words that mark a 401 body as being about the session rather than the
/// request. Matching localized text is fragile; a dedicated error code from
/// the backend would be better if it ever grows one.
const SESSION_KEYWORDS: [&str; 4] = ["sesión", "session", "token", "expir"];

/// A fully buffered response, so the body can be inspected and still handed
/// back to the caller untouched. The body is kept as raw bytes and only
/// decoded on demand.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Vec<u8>,
}

impl ApiResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
    }

    pub(crate) async fn read(response: reqwest::Response) -> Result<Self, ApiError> {
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(ApiError::from_transport)?;
        Ok(Self::new(status, headers, body.to_vec()))
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn bytes(&self) -> &[u8] {
        &self.body
    }

    /// The body as text, with invalid UTF-8 replaced.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    pub fn is_empty(&self) -> bool {
        self.body.iter().all(u8::is_ascii_whitespace)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        serde_json::from_slice(&self.body).map_err(|e| {
            ApiError::InvalidResponse(format!(
                "{}: {}",
                e,
                ApiError::truncate_body(&self.text())
            ))
        })
    }

    /// The first non-empty `detail` or `message` field of a JSON body.
    pub fn detail(&self) -> Option<String> {
        let value: Value = serde_json::from_slice(&self.body).ok()?;
        ["detail", "message"].iter().find_map(|field| match value.get(field)? {
            Value::Null => None,
            Value::String(s) if s.is_empty() => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        })
    }

    /// A 401 whose body explains itself in terms unrelated to the session,
    /// e.g. a wrong current password. These are shown to the user as-is.
    pub fn is_business_rejection(&self) -> bool {
        self.status == StatusCode::UNAUTHORIZED
            && self.detail().is_some_and(|detail| !is_session_message(&detail))
    }

    /// Turn a non-success response into `ApiError::Server`.
    pub fn error_for_status(self) -> Result<Self, ApiError> {
        if self.is_success() {
            return Ok(self);
        }
        let detail = self
            .detail()
            .unwrap_or_else(|| format!("Error {}", self.status.as_u16()));
        Err(ApiError::Server {
            status: self.status.as_u16(),
            detail: ApiError::truncate_body(&detail),
        })
    }
}

pub(crate) fn is_session_message(detail: &str) -> bool {
    let lower = detail.to_lowercase();
    SESSION_KEYWORDS.iter().any(|keyword| lower.contains(keyword))
}
