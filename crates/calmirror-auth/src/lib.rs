//! Google OAuth2 sign-in and token storage for calmirror.

pub mod google;
pub mod storage;

pub use google::{GoogleOAuth2Provider, GoogleTokenResponse};
pub use storage::{TokenSet, TokenStorage};

/// Storage key for the Google token set.
pub const GOOGLE_SERVICE: &str = "google";
