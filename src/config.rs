//! Runtime configuration
//!
//! Everything comes from environment variables, read through a lookup
//! function so tests can supply their own values. Logging can additionally
//! be tuned with a YAML file named by `LOGGING_CONFIG`.

use crate::checker::DEFAULT_CHECKS_PER_DAY;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DISCORD_TOKEN_VAR: &str = "DISCORD_API_TOKEN";
pub const STEAM_TOKEN_VAR: &str = "STEAM_API_TOKEN";
pub const DATABASE_VAR: &str = "DATABASE";
pub const LOGGING_CONFIG_VAR: &str = "LOGGING_CONFIG";
pub const CHECKS_PER_DAY_VAR: &str = "CHECKS_PER_DAY";
pub const LOOKUP_TIMEOUT_VAR: &str = "LOOKUP_TIMEOUT_SECS";
pub const LOOKUP_WORKERS_VAR: &str = "LOOKUP_WORKERS";

/// Database location when `DATABASE` is unset
pub const DEFAULT_DATABASE: &str = "/data/steam_ban_checker.db";
/// File name used when `DATABASE` names a directory
pub const DATABASE_FILE_NAME: &str = "steam_ban_checker.db";
pub const DEFAULT_LOOKUP_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_LOOKUP_WORKERS: usize = 8;

const MAX_CHECKS_PER_DAY: u32 = 86_400;

/// Errors raised while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("Invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },

    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse logging config: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Settings for the whole bot
#[derive(Clone)]
pub struct BotConfig {
    pub discord_token: String,
    pub steam_token: String,
    pub database: PathBuf,
    pub logging_config: Option<PathBuf>,
    pub checks_per_day: u32,
    pub lookup_timeout: Duration,
    pub lookup_workers: usize,
}

// Tokens stay out of logs
impl std::fmt::Debug for BotConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BotConfig")
            .field("discord_token", &"<redacted>")
            .field("steam_token", &"<redacted>")
            .field("database", &self.database)
            .field("logging_config", &self.logging_config)
            .field("checks_per_day", &self.checks_per_day)
            .field("lookup_timeout", &self.lookup_timeout)
            .field("lookup_workers", &self.lookup_workers)
            .finish()
    }
}

impl BotConfig {
    /// Load from the process environment
    ///
    /// # Errors
    ///
    /// Returns an error if a token is missing or a value does not parse.
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using `lookup` to read each variable
    ///
    /// # Errors
    ///
    /// Returns an error if a token is missing or a value does not parse.
    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let discord_token =
            read(DISCORD_TOKEN_VAR).ok_or(ConfigError::Missing(DISCORD_TOKEN_VAR))?;
        let steam_token = read(STEAM_TOKEN_VAR).ok_or(ConfigError::Missing(STEAM_TOKEN_VAR))?;

        let database = resolve_database_path(
            read(DATABASE_VAR).map_or_else(|| PathBuf::from(DEFAULT_DATABASE), PathBuf::from),
        );

        let checks_per_day = parse_or(
            read(CHECKS_PER_DAY_VAR),
            CHECKS_PER_DAY_VAR,
            DEFAULT_CHECKS_PER_DAY,
        )?;
        if !(1..=MAX_CHECKS_PER_DAY).contains(&checks_per_day) {
            return Err(ConfigError::Invalid {
                key: CHECKS_PER_DAY_VAR,
                message: format!("must be between 1 and {MAX_CHECKS_PER_DAY}"),
            });
        }

        let timeout_secs = parse_or(
            read(LOOKUP_TIMEOUT_VAR),
            LOOKUP_TIMEOUT_VAR,
            DEFAULT_LOOKUP_TIMEOUT_SECS,
        )?;
        if timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                key: LOOKUP_TIMEOUT_VAR,
                message: "must be positive".to_string(),
            });
        }

        let lookup_workers = parse_or(
            read(LOOKUP_WORKERS_VAR),
            LOOKUP_WORKERS_VAR,
            DEFAULT_LOOKUP_WORKERS,
        )?;
        if lookup_workers == 0 {
            return Err(ConfigError::Invalid {
                key: LOOKUP_WORKERS_VAR,
                message: "must be positive".to_string(),
            });
        }

        Ok(Self {
            discord_token,
            steam_token,
            database,
            logging_config: read(LOGGING_CONFIG_VAR).map(PathBuf::from),
            checks_per_day,
            lookup_timeout: Duration::from_secs(timeout_secs),
            lookup_workers,
        })
    }
}

/// A directory gets the default database file name appended
#[must_use]
pub fn resolve_database_path(path: PathBuf) -> PathBuf {
    if path.is_dir() {
        path.join(DATABASE_FILE_NAME)
    } else {
        path
    }
}

fn parse_or<T>(value: Option<String>, key: &'static str, default: T) -> ConfigResult<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            message: format!("{raw:?}: {e}"),
        }),
    }
}

/// Logging settings read from YAML
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter directives; `RUST_LOG` takes precedence when set
    pub filter: Option<String>,
    /// Directory for the rolling JSON log files
    pub directory: PathBuf,
    pub file_prefix: String,
    /// Colour console output
    pub ansi: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: None,
            directory: PathBuf::from("logs"),
            file_prefix: "steam_ban_checker".to_string(),
            ansi: true,
        }
    }
}

impl LogConfig {
    /// Load from a YAML file, or defaults when no file is given
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid YAML.
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    /// Parse YAML; missing fields take their defaults
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid YAML for this shape.
    pub fn from_yaml(content: &str) -> ConfigResult<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }
}
