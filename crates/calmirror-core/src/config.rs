use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

const APP_DIR: &str = "calmirror";
const CONFIG_FILE: &str = "config.toml";
const DEFAULT_STORE_FILE: &str = "calmirror.db";

const ENV_CLIENT_ID: &str = "CALMIRROR_GOOGLE_CLIENT_ID";
const ENV_CLIENT_SECRET: &str = "CALMIRROR_GOOGLE_CLIENT_SECRET";

/// Configuration validation errors
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Result of config validation
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationResult {
    /// Returns true if there are no errors (warnings are OK)
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Get a one-line summary of all errors
    pub fn error_summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding config, tokens and the default property store
    #[serde(skip, default = "default_config_dir")]
    pub config_dir: PathBuf,

    /// Google OAuth client settings
    #[serde(default)]
    pub google: GoogleConfig,

    /// Property store settings
    #[serde(default)]
    pub store: StoreConfig,

    /// HTTP retry settings
    #[serde(default)]
    pub retry: RetrySettings,

    /// One job per source calendar
    #[serde(default)]
    pub jobs: Vec<JobConfig>,
}

/// Google OAuth client configuration.
/// Create credentials at: https://console.cloud.google.com/apis/credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleConfig {
    pub client_id: String,
    pub client_secret: String,
    /// Local port for the OAuth redirect
    #[serde(default = "default_redirect_port")]
    pub redirect_port: u16,
}

fn default_redirect_port() -> u16 {
    8080
}

impl GoogleConfig {
    /// Check if credentials are configured (not placeholders)
    pub fn is_configured(&self) -> bool {
        !self.client_id.is_empty()
            && !self.client_secret.is_empty()
            && !self.client_id.starts_with("YOUR_")
            && !self.client_secret.starts_with("YOUR_")
    }
}

impl Default for GoogleConfig {
    fn default() -> Self {
        Self {
            client_id: "YOUR_GOOGLE_CLIENT_ID".to_string(),
            client_secret: "YOUR_GOOGLE_CLIENT_SECRET".to_string(),
            redirect_port: default_redirect_port(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite file for sync tokens. Defaults to `<config_dir>/calmirror.db`.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    100
}

fn default_max_delay_ms() -> u64 {
    5000
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

/// What a mirrored copy keeps from its source event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MirrorMode {
    /// Private "busy" block: no title, description, location or guests
    #[default]
    Busy,
    /// Title, description and location, without guests
    Copy,
    /// Everything, guests included (no invitations are sent)
    Full,
}

impl std::fmt::Display for MirrorMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MirrorMode::Busy => write!(f, "busy"),
            MirrorMode::Copy => write!(f, "copy"),
            MirrorMode::Full => write!(f, "full"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetConfig {
    pub calendar_id: String,
    #[serde(default)]
    pub mode: MirrorMode,
}

/// User added as attendee (and organizer when missing) to source events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelfAttendee {
    pub email: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// Source calendar id ("primary" or an address)
    pub source: String,

    #[serde(default)]
    pub attendee: Option<SelfAttendee>,

    /// Calendar receiving full backups of every change
    #[serde(default)]
    pub backup_calendar: Option<String>,

    /// Summary used for `busy` mirrors
    #[serde(default = "default_busy_summary")]
    pub busy_summary: String,

    #[serde(default)]
    pub targets: Vec<TargetConfig>,
}

fn default_busy_summary() -> String {
    "Busy".to_string()
}

impl JobConfig {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            attendee: None,
            backup_calendar: None,
            busy_summary: default_busy_summary(),
            targets: Vec::new(),
        }
    }

    /// True when the job would write nothing.
    pub fn is_noop(&self) -> bool {
        self.attendee.is_none() && self.backup_calendar.is_none() && self.targets.is_empty()
    }
}

fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_dir: default_config_dir(),
            google: GoogleConfig::default(),
            store: StoreConfig::default(),
            retry: RetrySettings::default(),
            jobs: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from the default location, creating it if missing
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from an explicit file, creating it if missing
    pub fn load_from(path: &Path) -> Result<Self> {
        let config_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(default_config_dir);

        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("Failed to read config file")?;
            toml::from_str::<Config>(&contents)
                .map_err(|e| ConfigError::ParseError(e.to_string()))
                .context("Failed to parse config file")?
        } else {
            let config = Config {
                config_dir: config_dir.clone(),
                ..Config::default()
            };
            config.save_to(path)?;
            tracing::info!("Wrote default configuration to {}", path.display());
            config
        };

        config.config_dir = config_dir;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration and validate it
    ///
    /// Returns an error if validation fails; warnings are logged.
    pub fn load_validated() -> Result<(Self, ValidationResult)> {
        let config = Self::load()?;
        let validation = config.validate();

        if !validation.is_valid() {
            return Err(ConfigError::Invalid(validation.error_summary()).into());
        }

        for warning in &validation.warnings {
            tracing::warn!("Config warning: {}", warning);
        }

        Ok((config, validation))
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(id) = std::env::var(ENV_CLIENT_ID) {
            self.google.client_id = id;
        }
        if let Ok(secret) = std::env::var(ENV_CLIENT_SECRET) {
            self.google.client_secret = secret;
        }
    }

    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        if !self.google.is_configured() {
            result.add_warning(
                "google",
                "Google OAuth not configured - `calmirror auth` will not work",
            );
        }
        if self.google.redirect_port == 0 {
            result.add_error("google.redirect_port", "Port cannot be 0");
        }

        if self.retry.max_delay_ms < self.retry.initial_delay_ms {
            result.add_warning(
                "retry.max_delay_ms",
                "Maximum delay is below the initial delay; every retry waits max_delay_ms",
            );
        }

        if self.jobs.is_empty() {
            result.add_warning("jobs", "No sync jobs configured");
        }

        let mut sources = HashSet::new();
        for (i, job) in self.jobs.iter().enumerate() {
            let field = format!("jobs[{}]", i);
            self.validate_job(job, &field, &mut result);

            if !sources.insert(job.source.as_str()) {
                result.add_error(
                    format!("{}.source", field),
                    format!("Calendar {} is the source of more than one job", job.source),
                );
            }
        }

        result
    }

    fn validate_job(&self, job: &JobConfig, field: &str, result: &mut ValidationResult) {
        if job.source.trim().is_empty() {
            result.add_error(format!("{}.source", field), "Source calendar id is empty");
            return;
        }

        if job.is_noop() {
            result.add_warning(field, "Job has no attendee, backup or targets");
        }

        if let Some(attendee) = &job.attendee {
            if !attendee.email.contains('@') {
                result.add_error(
                    format!("{}.attendee.email", field),
                    format!("Not an email address: {}", attendee.email),
                );
            }
        }

        if job.backup_calendar.as_deref() == Some(job.source.as_str()) {
            result.add_error(
                format!("{}.backup_calendar", field),
                "Backup calendar must differ from the source",
            );
        }

        let mut seen = HashSet::new();
        for (t, target) in job.targets.iter().enumerate() {
            let target_field = format!("{}.targets[{}]", field, t);
            if target.calendar_id.trim().is_empty() {
                result.add_error(target_field, "Target calendar id is empty");
                continue;
            }
            if target.calendar_id == job.source {
                result.add_error(target_field, "Target calendar must differ from the source");
                continue;
            }
            if job.backup_calendar.as_deref() == Some(target.calendar_id.as_str()) {
                result.add_error(
                    target_field.clone(),
                    "Target calendar is also the backup calendar",
                );
            }
            if !seen.insert(target.calendar_id.as_str()) {
                result.add_error(
                    target_field,
                    format!("Duplicate target {}", target.calendar_id),
                );
            }
        }
    }

    /// Find the job whose source is `source`
    pub fn job(&self, source: &str) -> Result<&JobConfig, ConfigError> {
        self.jobs
            .iter()
            .find(|j| j.source == source)
            .ok_or_else(|| ConfigError::UnknownJob(source.to_string()))
    }

    /// Path of the property store database
    pub fn store_path(&self) -> PathBuf {
        self.store
            .path
            .clone()
            .unwrap_or_else(|| self.config_dir.join(DEFAULT_STORE_FILE))
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, contents).context("Failed to write config file")?;

        Ok(())
    }

    /// Get the path to the configuration file
    pub fn config_path() -> PathBuf {
        default_config_dir().join(CONFIG_FILE)
    }
}
