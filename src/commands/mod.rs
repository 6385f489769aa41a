pub mod auth;
pub mod calendars;
pub mod config;
pub mod sync;

use anyhow::{Context, Result};

use calmirror_auth::{GoogleOAuth2Provider, TokenStorage};
use calmirror_calendar::{CalendarClient, CalendarError, RetryConfig};
use calmirror_core::{AuthError, Config, ConfigError, JobConfig};

/// Message for the terminal: the user-facing text of the first known error
/// in the chain, else the full chain.
pub fn user_message(err: &anyhow::Error) -> String {
    for cause in err.chain() {
        if let Some(e) = cause.downcast_ref::<CalendarError>() {
            return e.user_message();
        }
        if let Some(e) = cause.downcast_ref::<AuthError>() {
            return e.user_message().to_string();
        }
        if let Some(e) = cause.downcast_ref::<ConfigError>() {
            return format!("{} ({})", e.user_message(), e);
        }
    }
    format!("{:#}", err)
}

/// A valid access token, refreshed if close to expiry.
pub async fn access_token(config: &Config) -> Result<String> {
    let provider = GoogleOAuth2Provider::new(&config.google)?;
    let storage = TokenStorage::new(&config.config_dir);
    provider
        .access_token(&storage)
        .await
        .context("Failed to obtain Google access token")
}

pub fn client(config: &Config, access_token: &str) -> CalendarClient {
    CalendarClient::new(access_token).with_retry(RetryConfig::from(&config.retry))
}

/// All jobs, or the one whose source is `source`.
pub fn selected_jobs<'a>(config: &'a Config, source: Option<&str>) -> Result<Vec<&'a JobConfig>> {
    match source {
        Some(source) => Ok(vec![config.job(source)?]),
        None if config.jobs.is_empty() => Err(ConfigError::MissingSetting(
            "no [[jobs]] configured".to_string(),
        )
        .into()),
        None => Ok(config.jobs.iter().collect()),
    }
}
