//! Configuration management for OpsDesk.
//!
//! Supports multiple configuration sources with precedence:
//! 1. Environment variables (highest priority)
//! 2. TOML configuration file
//! 3. Default values (lowest priority)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use opsdesk_core::PageLimits;

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Metadata database
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Mutation deadlines and bootstrap
    #[serde(default)]
    pub security: SecurityConfig,

    /// List page sizes
    #[serde(default)]
    pub pagination: PaginationConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite URL (default: "sqlite://opsdesk.db")
    #[serde(default = "default_db_url")]
    pub url: String,

    /// Max connections in pool (default: 8)
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Connection timeout in seconds (default: 5)
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_seconds: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error (default: "info")
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty (default: "pretty")
    #[serde(default = "default_log_format")]
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Deadline for a mutation when the caller supplies none (default: 30)
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout_seconds: u64,

    /// Existing account that receives the administrator role on seeding
    #[serde(default)]
    pub bootstrap_admin_email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginationConfig {
    #[serde(default = "default_page_size")]
    pub default_page_size: u32,

    #[serde(default = "default_max_page_size")]
    pub max_page_size: u32,
}

fn default_db_url() -> String {
    "sqlite://opsdesk.db".to_string()
}

fn default_max_connections() -> u32 {
    8
}

fn default_connection_timeout() -> u64 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_operation_timeout() -> u64 {
    30
}

fn default_page_size() -> u32 {
    20
}

fn default_max_page_size() -> u32 {
    100
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_db_url(),
            max_connections: default_max_connections(),
            connection_timeout_seconds: default_connection_timeout(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            operation_timeout_seconds: default_operation_timeout(),
            bootstrap_admin_email: None,
        }
    }
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file doesn't exist or has invalid TOML syntax.
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let contents = std::fs::read_to_string(&path).map_err(|e| ConfigError::IoError {
            path: path.clone(),
            source: e,
        })?;

        toml::from_str(&contents).map_err(|e| ConfigError::TomlError { path, source: e })
    }

    /// Load configuration with environment variable overrides, then validate.
    ///
    /// Reads `config.toml` from the working directory if present, otherwise
    /// starts from defaults.
    ///
    /// Supported environment variables:
    /// - `OPSDESK_DB_URL` - SQLite URL
    /// - `OPSDESK_DB_MAX_CONNECTIONS` - Pool size
    /// - `OPSDESK_LOG_LEVEL` - Log level
    /// - `OPSDESK_LOG_FORMAT` - Log format
    /// - `OPSDESK_OPERATION_TIMEOUT_SECONDS` - Default mutation deadline
    /// - `OPSDESK_BOOTSTRAP_ADMIN_EMAIL` - Account to promote on seeding
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = if std::path::Path::new("config.toml").exists() {
            Self::from_file("config.toml")?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("OPSDESK_DB_URL") {
            self.database.url = url;
        }

        if let Ok(max) = std::env::var("OPSDESK_DB_MAX_CONNECTIONS") {
            if let Ok(max) = max.parse() {
                self.database.max_connections = max;
            }
        }

        if let Ok(level) = std::env::var("OPSDESK_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Ok(format) = std::env::var("OPSDESK_LOG_FORMAT") {
            self.logging.format = format;
        }

        if let Ok(timeout) = std::env::var("OPSDESK_OPERATION_TIMEOUT_SECONDS") {
            if let Ok(timeout) = timeout.parse() {
                self.security.operation_timeout_seconds = timeout;
            }
        }

        if let Ok(email) = std::env::var("OPSDESK_BOOTSTRAP_ADMIN_EMAIL") {
            self.security.bootstrap_admin_email = Some(email).filter(|e| !e.trim().is_empty());
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.url.is_empty() {
            return Err(ConfigError::ValidationError(
                "database.url cannot be empty".to_string(),
            ));
        }

        if self.database.max_connections == 0 || self.database.max_connections > 1000 {
            return Err(ConfigError::ValidationError(
                "database.max_connections must be between 1 and 1000".to_string(),
            ));
        }

        if self.database.connection_timeout_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "database.connection_timeout_seconds must be > 0".to_string(),
            ));
        }

        if self.security.operation_timeout_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "security.operation_timeout_seconds must be > 0".to_string(),
            ));
        }

        if self.pagination.default_page_size == 0
            || self.pagination.default_page_size > self.pagination.max_page_size
        {
            return Err(ConfigError::ValidationError(
                "pagination.default_page_size must be between 1 and pagination.max_page_size"
                    .to_string(),
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "logging.level must be one of: {}",
                valid_levels.join(", ")
            )));
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "logging.format must be one of: {}",
                valid_formats.join(", ")
            )));
        }

        Ok(())
    }

    #[must_use]
    pub fn page_limits(&self) -> PageLimits {
        PageLimits {
            default_page_size: self.pagination.default_page_size,
            max_page_size: self.pagination.max_page_size,
        }
    }

    #[must_use]
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.security.operation_timeout_seconds)
    }

    #[must_use]
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.database.connection_timeout_seconds)
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// I/O error reading configuration file
    #[error("Failed to read config file {path:?}: {source}")]
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },

    /// TOML parsing error
    #[error("Failed to parse TOML in {path:?}: {source}")]
    TomlError {
        path: PathBuf,
        source: toml::de::Error,
    },

    /// Validation error
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
