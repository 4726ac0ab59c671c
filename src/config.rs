//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::de::Error;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::error::{GatewayError, Result};
use crate::identity::is_imei;

/// Largest accepted per-read buffer
pub const MAX_READ_BUFFER_SIZE: usize = 65_536;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub places: PlacesConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listener configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,

    /// Seconds without data before a session is closed, 0 disables
    #[serde(default)]
    pub idle_timeout_secs: u64,

    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

/// Device identity configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct IdentityConfig {
    /// Accepted device identities, empty accepts any
    #[serde(default)]
    pub allowed_devices: Vec<String>,

    #[serde(default)]
    pub require_imei_format: bool,
}

/// Record storage configuration
#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_storage_enabled")]
    pub enabled: bool,

    #[serde(default = "default_log_dir")]
    pub log_dir: String,

    #[serde(default = "default_max_records_per_file")]
    pub max_records_per_file: usize,

    #[serde(default = "default_max_files_to_keep")]
    pub max_files_to_keep: usize,
}

/// Named places stored records are matched against
#[derive(Debug, Deserialize, Clone, Default)]
pub struct PlacesConfig {
    #[serde(default)]
    pub entries: Vec<PlaceConfig>,
}

/// One circular area around a point
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct PlaceConfig {
    pub internal_id: String,
    pub longitude: f64,
    pub latitude: f64,

    /// Radius in metres
    pub radius: f64,
}

/// Diagnostic logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for daily-rolling log files, empty logs to stdout only
    #[serde(default)]
    pub directory: String,
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    4554
}
fn default_read_buffer_size() -> usize {
    2048
}
fn default_shutdown_grace_secs() -> u64 {
    10
}

fn default_storage_enabled() -> bool {
    true
}
fn default_log_dir() -> String {
    "./records".to_string()
}
fn default_max_records_per_file() -> usize {
    10000
}
fn default_max_files_to_keep() -> usize {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            read_buffer_size: default_read_buffer_size(),
            idle_timeout_secs: 0,
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            enabled: default_storage_enabled(),
            log_dir: default_log_dir(),
            max_records_per_file: default_max_records_per_file(),
            max_files_to_keep: default_max_files_to_keep(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: String::new(),
        }
    }
}

impl ServerConfig {
    /// Listen address built from `host` and `port`
    ///
    /// # Errors
    ///
    /// Returns error if `host` is not an IP address
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        let ip = self.host.parse().map_err(|_| {
            config_error(format!("host '{}' is not a valid IP address", self.host))
        })?;
        Ok(SocketAddr::new(ip, self.port))
    }

    /// Idle-read limit, `None` when disabled
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// * `Result<Config>` - Loaded and validated configuration
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use avl_gateway::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Load configuration from `path`, or use the defaults if it does not exist
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        // Validate server configuration
        if self.server.host.is_empty() {
            return Err(config_error("server host cannot be empty"));
        }
        self.server.listen_addr()?;

        if self.server.port == 0 {
            return Err(config_error("server port must be between 1 and 65535"));
        }

        if self.server.read_buffer_size == 0
            || self.server.read_buffer_size > MAX_READ_BUFFER_SIZE
        {
            return Err(config_error(format!(
                "read_buffer_size must be between 1 and {}",
                MAX_READ_BUFFER_SIZE
            )));
        }

        // Validate identity configuration
        if self.identity.require_imei_format {
            if let Some(bad) = self.identity.allowed_devices.iter().find(|id| !is_imei(id)) {
                return Err(config_error(format!(
                    "allowed device '{}' is not a 15-digit IMEI",
                    bad
                )));
            }
        }

        // Validate storage configuration
        if self.storage.enabled && self.storage.log_dir.is_empty() {
            return Err(config_error("storage log_dir cannot be empty when enabled"));
        }

        if self.storage.max_records_per_file == 0 {
            return Err(config_error("max_records_per_file must be greater than 0"));
        }

        if self.storage.max_files_to_keep == 0 {
            return Err(config_error("max_files_to_keep must be greater than 0"));
        }

        // Validate places
        let mut seen = HashSet::new();
        for place in &self.places.entries {
            if place.internal_id.is_empty() {
                return Err(config_error("place internal_id cannot be empty"));
            }
            if !seen.insert(place.internal_id.as_str()) {
                return Err(config_error(format!(
                    "place '{}' is defined more than once",
                    place.internal_id
                )));
            }
            if !(-180.0..=180.0).contains(&place.longitude)
                || !(-90.0..=90.0).contains(&place.latitude)
            {
                return Err(config_error(format!(
                    "place '{}' has coordinates out of range",
                    place.internal_id
                )));
            }
            if !place.radius.is_finite() || place.radius < 0.0 {
                return Err(config_error(format!(
                    "place '{}' radius must be a non-negative number of metres",
                    place.internal_id
                )));
            }
        }

        // Validate log level
        if tracing_subscriber::EnvFilter::try_new(&self.logging.level).is_err() {
            return Err(config_error(format!(
                "logging level '{}' is not a valid filter directive",
                self.logging.level
            )));
        }

        Ok(())
    }
}

fn config_error(message: impl std::fmt::Display) -> GatewayError {
    GatewayError::Config(toml::de::Error::custom(message))
}
