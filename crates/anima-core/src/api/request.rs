//! Re-sendable request descriptions.
//!
//! A request may be sent twice (once more after a token refresh), so bodies
//! are kept as owned data and turned into a `reqwest` request per attempt.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, RequestBuilder};

use super::ApiError;

#[derive(Debug, Clone)]
pub struct MultipartField {
    pub name: String,
    pub data: Vec<u8>,
    pub file_name: Option<String>,
    pub mime: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Json(serde_json::Value),
    Multipart(Vec<MultipartField>),
}

#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: RequestBody,
    /// Overrides the client's default timeout.
    pub timeout: Option<Duration>,
}

impl ApiRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: RequestBody::Empty,
            timeout: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn patch(url: impl Into<String>) -> Self {
        Self::new(Method::PATCH, url)
    }

    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.body = RequestBody::Json(body);
        self
    }

    pub fn file(
        mut self,
        name: &str,
        data: Vec<u8>,
        file_name: Option<String>,
        mime: Option<String>,
    ) -> Self {
        let field = MultipartField {
            name: name.to_string(),
            data,
            file_name,
            mime,
        };
        match &mut self.body {
            RequestBody::Multipart(fields) => fields.push(field),
            _ => self.body = RequestBody::Multipart(vec![field]),
        }
        self
    }

    pub fn header(mut self, name: HeaderName, value: &str) -> Result<Self, ApiError> {
        let value = HeaderValue::from_str(value)
            .map_err(|e| ApiError::InvalidRequest(format!("Invalid {} header: {}", name, e)))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub(crate) fn build(
        &self,
        http: &Client,
        bearer: Option<&str>,
        default_timeout: Duration,
    ) -> Result<RequestBuilder, ApiError> {
        let mut builder = http
            .request(self.method.clone(), &self.url)
            .headers(self.headers.clone())
            .timeout(self.timeout.unwrap_or(default_timeout));

        if let Some(token) = bearer {
            builder = builder.bearer_auth(token);
        }

        builder = match &self.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(value),
            RequestBody::Multipart(fields) => {
                let mut form = Form::new();
                for field in fields {
                    let mut part = Part::bytes(field.data.clone());
                    if let Some(ref file_name) = field.file_name {
                        part = part.file_name(file_name.clone());
                    }
                    if let Some(ref mime) = field.mime {
                        part = part.mime_str(mime).map_err(|e| {
                            ApiError::InvalidRequest(format!("Invalid MIME type {}: {}", mime, e))
                        })?;
                    }
                    form = form.part(field.name.clone(), part);
                }
                builder.multipart(form)
            }
        };

        Ok(builder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::AUTHORIZATION;

    #[test]
    fn test_build_attaches_bearer_and_timeout() {
        let request = ApiRequest::get("http://localhost/v1/auth/me")
            .timeout(Duration::from_secs(3))
            .build(&Client::new(), Some("tok"), Duration::from_secs(20))
            .and_then(|b| b.build().map_err(ApiError::from_transport))
            .expect("Failed to build request");

        assert_eq!(
            request.headers().get(AUTHORIZATION).and_then(|v| v.to_str().ok()),
            Some("Bearer tok")
        );
        assert_eq!(request.timeout(), Some(&Duration::from_secs(3)));
    }

    #[test]
    fn test_build_without_bearer_uses_default_timeout() {
        let request = ApiRequest::post("http://localhost/v1/auth/login")
            .json(serde_json::json!({"email": "a@b.c"}))
            .build(&Client::new(), None, Duration::from_secs(20))
            .and_then(|b| b.build().map_err(ApiError::from_transport))
            .expect("Failed to build request");

        assert!(request.headers().get(AUTHORIZATION).is_none());
        assert_eq!(request.timeout(), Some(&Duration::from_secs(20)));
    }

    #[test]
    fn test_file_fields_accumulate() {
        let request = ApiRequest::post("http://localhost/v1/analysis/analyze")
            .file("image", vec![1, 2, 3], Some("face.jpg".into()), Some("image/jpeg".into()))
            .file("extra", vec![4], None, None);
        match request.body {
            RequestBody::Multipart(fields) => {
                assert_eq!(fields.len(), 2);
                assert_eq!(fields[0].file_name.as_deref(), Some("face.jpg"));
            }
            other => panic!("expected multipart body, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_header_value() {
        let result = ApiRequest::get("http://localhost").header(
            HeaderName::from_static("x-client-timezone"),
            "bad\nvalue",
        );
        assert!(matches!(result, Err(ApiError::InvalidRequest(_))));
    }
}
