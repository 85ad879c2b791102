//! HTTP access to the anima backend.
//!
//! `ApiClient::fetch` is a plain time-bounded request. `authenticated_fetch`
//! attaches a valid access token and, on a 401 that is about the session,
//! refreshes once and retries.

pub mod client;
pub mod error;
pub mod request;
pub mod response;
pub mod types;

pub use client::ApiClient;
pub use error::ApiError;
pub use request::{ApiRequest, MultipartField, RequestBody};
pub use response::ApiResponse;
pub use types::{
    ChangePasswordRequest, CurrentUser, LoginRequest, LoginResponse, ProfileUpdate,
    ProfileUpdated, SpotifyExchange, SpotifyStatus,
};
