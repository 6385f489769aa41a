pub mod config;
pub mod error;

pub use config::{
    Config, GoogleConfig, JobConfig, MirrorMode, RetrySettings, SelfAttendee, StoreConfig,
    TargetConfig, ValidationResult,
};
pub use error::{AuthError, ConfigError};

use anyhow::Result;

/// Initialize tracing/logging. `RUST_LOG` overrides the default `info` filter.
///
/// Logs go to stderr; stdout carries command output.
pub fn init() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    tracing::debug!("calmirror core initialized");
    Ok(())
}
