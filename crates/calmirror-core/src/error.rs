//! Shared error types for calmirror.
//!
//! Each error carries a `user_message()` suitable for printing on the
//! command line, while `Display` keeps the full context for logs.

use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Configuration parse error: {0}")]
    ParseError(String),

    #[error("Missing required setting: {0}")]
    MissingSetting(String),

    #[error("No sync job for source calendar: {0}")]
    UnknownJob(String),
}

impl ConfigError {
    pub fn user_message(&self) -> &'static str {
        match self {
            ConfigError::NotFound(_) => "Configuration not found. Using defaults.",
            ConfigError::Invalid(_) => "Invalid configuration. Check your settings.",
            ConfigError::ParseError(_) => "Configuration file is malformed. Check your settings.",
            ConfigError::MissingSetting(_) => "A required setting is missing. Check your settings.",
            ConfigError::UnknownJob(_) => {
                "No job is configured for that calendar. Run `calmirror config` to list jobs."
            }
        }
    }
}

/// Authentication errors (OAuth, tokens, credentials).
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Token expired")]
    TokenExpired,

    #[error("Token not found for service: {0}")]
    TokenNotFound(String),

    #[error("OAuth flow failed: {0}")]
    OAuthFailed(String),

    #[error("OAuth state mismatch")]
    StateMismatch,

    #[error("Google OAuth client is not configured")]
    NotConfigured,

    #[error("Token storage error: {0}")]
    StorageError(String),
}

impl AuthError {
    pub fn user_message(&self) -> &'static str {
        match self {
            AuthError::TokenExpired => "Your session has expired. Run `calmirror auth` again.",
            AuthError::TokenNotFound(_) => "Not signed in. Run `calmirror auth` first.",
            AuthError::OAuthFailed(_) => "Sign-in failed. Please try again.",
            AuthError::StateMismatch => "Sign-in response did not match the request. Please try again.",
            AuthError::NotConfigured => {
                "Set google.client_id and google.client_secret in the config file."
            }
            AuthError::StorageError(_) => "Failed to save credentials. Please try again.",
        }
    }
}
