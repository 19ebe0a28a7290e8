//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The login password is read from RESUME_PASSWORD or a password file,
//! never stored in the TOML.

use common::Secret;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub api: ApiConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub poll: PollConfig,
}

/// Remote API settings
#[derive(Debug, Deserialize)]
pub struct ApiConfig {
    pub base_url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

/// Where the credential pair is persisted
#[derive(Debug, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,
}

/// Analysis watcher cadence
#[derive(Debug, Deserialize)]
pub struct PollConfig {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_timeout() -> u64 {
    30
}

fn default_store_path() -> PathBuf {
    PathBuf::from("session.json")
}

fn default_interval_ms() -> u64 {
    orchestrator::DEFAULT_POLL_INTERVAL.as_millis() as u64
}

fn default_max_attempts() -> u32 {
    orchestrator::DEFAULT_MAX_ATTEMPTS
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            store_path: default_store_path(),
        }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl PollConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// API_BASE_URL replaces `api.base_url` before validation.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if let Ok(url) = std::env::var("API_BASE_URL") {
            config.api.base_url = url;
        }

        if !config.api.base_url.starts_with("http://")
            && !config.api.base_url.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "base_url must start with http:// or https://, got: {}",
                config.api.base_url
            )));
        }

        if config.api.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        if config.poll.interval_ms == 0 {
            return Err(common::Error::Config(
                "interval_ms must be greater than 0".into(),
            ));
        }

        if config.poll.max_attempts == 0 {
            return Err(common::Error::Config(
                "max_attempts must be greater than 0".into(),
            ));
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("resume-cli.toml")
    }
}

/// Resolve the login password.
///
/// Resolution order:
/// 1. RESUME_PASSWORD env var
/// 2. `password_file` contents, trimmed
pub fn resolve_password(password_file: Option<&Path>) -> common::Result<Secret<String>> {
    if let Ok(password) = std::env::var("RESUME_PASSWORD") {
        return Ok(Secret::new(password));
    }
    let Some(path) = password_file else {
        return Err(common::Error::Config(
            "no password given: set RESUME_PASSWORD or pass --password-file".into(),
        ));
    };
    let password = std::fs::read_to_string(path).map_err(|e| {
        common::Error::Config(format!(
            "failed to read password file {}: {e}",
            path.display()
        ))
    })?;
    let password = password.trim().to_owned();
    if password.is_empty() {
        return Err(common::Error::Config(format!(
            "password file {} is empty",
            path.display()
        )));
    }
    Ok(Secret::new(password))
}
