//! Server configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use safetrail_core::{ControllerConfig, WatchOptions};

/// Server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server settings.
    pub server: ServerConfig,
    /// Storage settings.
    pub storage: StorageConfig,
    /// Location sharing settings.
    pub sharing: SharingConfig,
    /// Notification settings.
    pub notifications: NotificationConfig,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Save configuration to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Write {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Validate the configuration and return all problems found.
    ///
    /// # Example
    ///
    /// ```
    /// use safetrail_service::Config;
    ///
    /// let config = Config::default();
    /// config.validate().expect("Default config should be valid");
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        errors.extend(self.server.validate());
        errors.extend(self.storage.validate());
        errors.extend(self.sharing.validate());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Load and validate configuration from a file.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "127.0.0.1:8080").
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
        }
    }
}

impl ServerConfig {
    /// Validate server configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.bind.is_empty() {
            errors.push(ValidationError::new(
                "server.bind",
                "bind address cannot be empty",
            ));
            return errors;
        }

        let Some((_, port)) = self.bind.rsplit_once(':') else {
            errors.push(ValidationError::new(
                "server.bind",
                format!(
                    "invalid bind address '{}': expected format 'host:port'",
                    self.bind
                ),
            ));
            return errors;
        };

        match port.parse::<u16>() {
            Ok(0) => errors.push(ValidationError::new("server.bind", "port cannot be 0")),
            Err(_) => errors.push(ValidationError::new(
                "server.bind",
                format!("invalid port '{}': must be a number 1-65535", port),
            )),
            Ok(_) => {}
        }

        errors
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database file path.
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: safetrail_store::default_db_path(),
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if self.path.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.path",
                "database path cannot be empty",
            ));
        }
        errors
    }
}

/// Minimum interval between position samples, in seconds.
pub const MIN_SAMPLE_INTERVAL_SECS: u64 = 1;
/// Maximum interval between position samples, in seconds (1 hour).
pub const MAX_SAMPLE_INTERVAL_SECS: u64 = 3600;

/// Location sharing settings, mapped onto [`ControllerConfig`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SharingConfig {
    /// Minimum seconds between delivered position samples.
    pub min_interval_secs: u64,
    /// Minimum movement in meters between delivered samples.
    pub min_distance_meters: f64,
    /// How long a one-time share stays visible, in seconds.
    pub one_time_ttl_secs: u64,
    /// Longest allowed live share, in seconds. Unlimited when absent.
    pub max_live_duration_secs: Option<u64>,
    /// Stop a watch after this many refresh failures in a row.
    pub max_consecutive_failures: Option<u32>,
}

impl Default for SharingConfig {
    fn default() -> Self {
        let controller = ControllerConfig::default();
        Self {
            min_interval_secs: controller.watch.min_interval.as_secs(),
            min_distance_meters: controller.watch.min_distance_meters,
            one_time_ttl_secs: controller.one_time_ttl.as_secs(),
            max_live_duration_secs: controller.max_live_duration.map(|max| max.as_secs()),
            max_consecutive_failures: controller.watch.max_consecutive_failures,
        }
    }
}

impl SharingConfig {
    /// Validate sharing configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.min_interval_secs < MIN_SAMPLE_INTERVAL_SECS {
            errors.push(ValidationError::new(
                "sharing.min_interval_secs",
                format!(
                    "interval {} is too short (minimum {} second)",
                    self.min_interval_secs, MIN_SAMPLE_INTERVAL_SECS
                ),
            ));
        } else if self.min_interval_secs > MAX_SAMPLE_INTERVAL_SECS {
            errors.push(ValidationError::new(
                "sharing.min_interval_secs",
                format!(
                    "interval {} is too long (maximum {} seconds / 1 hour)",
                    self.min_interval_secs, MAX_SAMPLE_INTERVAL_SECS
                ),
            ));
        }

        if !self.min_distance_meters.is_finite() || self.min_distance_meters < 0.0 {
            errors.push(ValidationError::new(
                "sharing.min_distance_meters",
                format!(
                    "distance {} must be a non-negative number",
                    self.min_distance_meters
                ),
            ));
        }

        if self.one_time_ttl_secs == 0 {
            errors.push(ValidationError::new(
                "sharing.one_time_ttl_secs",
                "one-time share lifetime must be greater than 0",
            ));
        }

        if self.max_live_duration_secs == Some(0) {
            errors.push(ValidationError::new(
                "sharing.max_live_duration_secs",
                "maximum live duration must be greater than 0 (omit for no limit)",
            ));
        }

        if self.max_consecutive_failures == Some(0) {
            errors.push(ValidationError::new(
                "sharing.max_consecutive_failures",
                "failure limit must be greater than 0 (omit for no limit)",
            ));
        }

        errors
    }

    /// Build the controller configuration these settings describe.
    pub fn controller_config(&self) -> ControllerConfig {
        let watch = WatchOptions {
            min_interval: Duration::from_secs(self.min_interval_secs),
            min_distance_meters: self.min_distance_meters,
            max_consecutive_failures: self.max_consecutive_failures,
            ..WatchOptions::default()
        };

        ControllerConfig {
            watch,
            one_time_ttl: Duration::from_secs(self.one_time_ttl_secs),
            max_live_duration: self.max_live_duration_secs.map(Duration::from_secs),
            ..ControllerConfig::default()
        }
    }
}

/// Notification settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Show desktop notifications (requires the `notifications` feature).
    pub desktop: bool,
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// The field path (e.g., `server.bind` or `sharing.one_time_ttl_secs`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("safetrail")
        .join("server.toml")
}
