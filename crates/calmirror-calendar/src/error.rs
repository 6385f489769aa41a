//! Calendar-specific error types.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CalendarError {
    #[error("Authentication required")]
    AuthRequired,

    #[error("Token expired")]
    TokenExpired,

    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Sync token is no longer valid")]
    SyncTokenInvalid,

    #[error("Conflict: event was modified")]
    Conflict,

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Property store error: {0}")]
    StoreError(String),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),
}

impl CalendarError {
    /// User-friendly error message for the command line.
    pub fn user_message(&self) -> String {
        match self {
            Self::AuthRequired => {
                "Access denied. Check that the calendar is shared with you and run `calmirror auth`."
                    .to_string()
            }
            Self::TokenExpired => "Your session has expired. Run `calmirror auth` again.".to_string(),
            Self::RateLimited(secs) => format!("Too many requests. Please wait {} seconds.", secs),
            Self::NotFound(_) => "Calendar or event not found".to_string(),
            Self::SyncTokenInvalid => {
                "The stored sync position expired. It will be re-established on the next run."
                    .to_string()
            }
            Self::Conflict => "An event was modified elsewhere. Run the sync again.".to_string(),
            Self::ApiError(msg) => format!("Calendar error: {}", msg),
            Self::StoreError(_) => "Local sync state could not be read or written".to_string(),
            Self::NetworkError(_) => "Network error. Check your connection.".to_string(),
        }
    }

    /// Whether this error should trigger a token refresh.
    pub fn should_refresh_token(&self) -> bool {
        matches!(self, Self::TokenExpired)
    }

    /// Whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited(_) | Self::NetworkError(_) | Self::Conflict)
    }
}

impl From<rusqlite::Error> for CalendarError {
    fn from(e: rusqlite::Error) -> Self {
        Self::StoreError(e.to_string())
    }
}
