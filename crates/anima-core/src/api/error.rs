use thiserror::Error;

use crate::auth::AuthError;

const TIMEOUT_MESSAGE: &str = "La solicitud tardó demasiado tiempo. Por favor intenta de nuevo.";
const CONNECT_MESSAGE: &str = "No se puede conectar con el servidor. Verifica tu conexión a internet.";
const NETWORK_MESSAGE: &str = "Error de red. Por favor verifica tu conexión.";
const SESSION_EXPIRED_MESSAGE: &str = "Sesión expirada. Por favor, inicia sesión nuevamente.";
const NOT_AUTHENTICATED_MESSAGE: &str = "No estás autenticado. Por favor, inicia sesión.";
const SAME_PASSWORD_MESSAGE: &str = "La nueva contraseña no puede ser igual a la actual";
const GENERIC_MESSAGE: &str = "Ha ocurrido un error inesperado. Por favor intenta de nuevo.";

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Session expired - sign in again")]
    SessionExpired,

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("Request timed out")]
    Timeout,

    #[error("Cannot connect to server: {0}")]
    Connect(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Server returned {status}: {detail}")]
    Server { status: u16, detail: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("New password must differ from the current one")]
    SamePassword,
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    pub(crate) fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    /// Classify a transport failure. Timeouts and refused connections get
    /// their own variants so the user sees the right message.
    pub fn from_transport(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            ApiError::Timeout
        } else if error.is_connect() {
            ApiError::Connect(error.to_string())
        } else if error.is_builder() {
            ApiError::InvalidRequest(error.to_string())
        } else {
            ApiError::Network(error.to_string())
        }
    }

    /// Whether recovering requires signing in again.
    pub fn is_terminal(&self) -> bool {
        match self {
            ApiError::NotAuthenticated | ApiError::SessionExpired => true,
            ApiError::Auth(e) => e.is_terminal(),
            _ => false,
        }
    }

    /// Message suitable for showing to the user.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Timeout => TIMEOUT_MESSAGE.to_string(),
            ApiError::Connect(_) => CONNECT_MESSAGE.to_string(),
            ApiError::Network(_) => NETWORK_MESSAGE.to_string(),
            ApiError::SessionExpired => SESSION_EXPIRED_MESSAGE.to_string(),
            ApiError::NotAuthenticated => NOT_AUTHENTICATED_MESSAGE.to_string(),
            ApiError::Auth(e) if e.is_terminal() => SESSION_EXPIRED_MESSAGE.to_string(),
            ApiError::Server { detail, .. } if !detail.is_empty() => detail.clone(),
            ApiError::SamePassword => SAME_PASSWORD_MESSAGE.to_string(),
            _ => GENERIC_MESSAGE.to_string(),
        }
    }
}
