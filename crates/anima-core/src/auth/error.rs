use thiserror::Error;

/// Failures of the token lifecycle.
///
/// `Clone` because a single refresh result is handed to every caller that
/// joined it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("No access token stored")]
    NoToken,

    #[error("No refresh token available")]
    NoRefreshToken,

    #[error("Refresh token expired or revoked")]
    RefreshTokenExpired,

    #[error("Token refresh failed: {message}")]
    RefreshFailed { status: Option<u16>, message: String },
}

impl AuthError {
    /// Whether the user has to sign in again. `RefreshFailed` is transient.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, AuthError::RefreshFailed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_classification() {
        assert!(AuthError::NoToken.is_terminal());
        assert!(AuthError::NoRefreshToken.is_terminal());
        assert!(AuthError::RefreshTokenExpired.is_terminal());
        assert!(!AuthError::RefreshFailed {
            status: Some(503),
            message: "Service Unavailable".to_string(),
        }
        .is_terminal());
    }
}
