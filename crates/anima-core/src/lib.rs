//! Core library for anima - token store, session lifecycle and the
//! authenticated API client for the anima emotion/music backend.
//!
//! The pieces are layered leaves-first:
//! - `storage`: key-value backings (memory, JSON file, OS keychain)
//! - `auth`: token store, expiry policy, single-flight refresh, session state
//! - `api`: time-bounded and authenticated fetch plus backend operations
//! - `analysis`: duplicate-save suppression for analysis results
//! - `config`: on-disk configuration with environment overrides

pub mod analysis;
pub mod api;
pub mod auth;
pub mod clock;
pub mod config;
pub mod storage;

pub use analysis::{AnalysisRecord, SaveGuard, SaveOutcome};
pub use api::{ApiClient, ApiError, ApiRequest, ApiResponse};
pub use auth::{
    AuthError, RefreshCoordinator, SessionManager, SessionState, SignOutReason, TokenStore,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, StorageBackend};
pub use storage::{FileStore, KeyValueStore, KeyringStore, MemoryStore, StorageError};
