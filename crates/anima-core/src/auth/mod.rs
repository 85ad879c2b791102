//! Authentication module for managing tokens and the session lifecycle.
//!
//! This module provides:
//! - `TokenStore`: persisted access/refresh/Spotify tokens and expiry
//! - `expiry`: the pure "is this token still usable" policy and JWT decoding
//! - `RefreshCoordinator`: single-flight access token refresh
//! - `SessionManager`: observable session state, guard checks and teardown
//!
//! Access tokens are refreshed 5 minutes before they expire.

pub mod error;
pub mod expiry;
pub mod refresh;
pub mod session;
pub mod store;

pub use error::AuthError;
pub use refresh::RefreshCoordinator;
pub use session::{SessionManager, SessionState, SessionStatus, SignOutReason};
pub use store::{CredentialSet, TokenStore};
