//! Configuration management
//!
//! Configuration for the session store and the demo server. It can be loaded from:
//! - a YAML file (`config.yml` by default)
//! - Environment variables (override file settings)
//!
//! Missing optional values are filled with sensible defaults.

use serde::{Deserialize, Serialize};

use crate::cookie::{CookieOptions, SameSite};

/// Default table holding session rows
pub const DEFAULT_TABLE_NAME: &str = "sessions";

/// Default session lifetime (30 days)
pub const DEFAULT_MAX_AGE: i64 = 60 * 60 * 24 * 30;

/// Longest accepted session lifetime in seconds (100 years)
pub const MAX_SESSION_AGE: i64 = 60 * 60 * 24 * 365 * 100;

/// Default cookie path
pub const DEFAULT_PATH: &str = "/";

/// Default cap on encoded codec payloads
pub const DEFAULT_MAX_LENGTH: usize = 4096;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Session store configuration
    #[serde(default)]
    pub session: SessionConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database driver (sqlite or mysql)
    #[serde(default)]
    pub driver: DatabaseDriver,
    /// Database connection URL
    #[serde(default = "default_database_url")]
    pub url: String,
    /// Pool size; each driver picks its own default when unset
    #[serde(default)]
    pub max_connections: Option<u32>,
    /// Seconds to wait for a free connection before a query fails
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            driver: DatabaseDriver::default(),
            url: default_database_url(),
            max_connections: None,
            acquire_timeout_secs: default_acquire_timeout(),
        }
    }
}

fn default_database_url() -> String {
    "data/sessions.db".to_string()
}

fn default_acquire_timeout() -> u64 {
    30
}

/// Database driver type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseDriver {
    /// SQLite (default)
    #[default]
    Sqlite,
    /// MySQL
    Mysql,
}

/// A signing key and an optional encryption key.
///
/// Keys are taken as the raw bytes of the configured strings. The hash key
/// should be 32 or 64 bytes; the block key, when present, 16 or 32 bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPairConfig {
    pub hash_key: String,
    #[serde(default)]
    pub block_key: Option<String>,
}

/// Session store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Table holding session rows
    #[serde(default = "default_table_name")]
    pub table_name: String,
    /// Leave table creation to externally managed migrations
    #[serde(default)]
    pub skip_create_table: bool,
    /// Cookie path
    #[serde(default = "default_path")]
    pub path: String,
    /// Cookie domain
    #[serde(default)]
    pub domain: Option<String>,
    /// Session lifetime in seconds
    #[serde(default = "default_max_age")]
    pub max_age: i64,
    /// Send the cookie over HTTPS only
    #[serde(default)]
    pub secure: bool,
    /// Hide the cookie from scripts
    #[serde(default)]
    pub http_only: bool,
    /// SameSite attribute (omitted when unset)
    #[serde(default)]
    pub same_site: Option<SameSite>,
    /// Maximum encoded payload length; 0 disables the check
    #[serde(default = "default_max_length")]
    pub max_length: usize,
    /// Seconds between cleanup passes; 0 disables periodic cleanup
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
    /// Codec keys, newest first. Older pairs are kept for decoding only.
    #[serde(default)]
    pub keys: Vec<KeyPairConfig>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            table_name: default_table_name(),
            skip_create_table: false,
            path: default_path(),
            domain: None,
            max_age: default_max_age(),
            secure: false,
            http_only: false,
            same_site: None,
            max_length: default_max_length(),
            cleanup_interval_secs: default_cleanup_interval(),
            keys: Vec::new(),
        }
    }
}

fn default_table_name() -> String {
    DEFAULT_TABLE_NAME.to_string()
}

fn default_path() -> String {
    DEFAULT_PATH.to_string()
}

fn default_max_age() -> i64 {
    DEFAULT_MAX_AGE
}

fn default_max_length() -> usize {
    DEFAULT_MAX_LENGTH
}

fn default_cleanup_interval() -> u64 {
    3600
}

impl SessionConfig {
    /// Cookie defaults derived from this configuration
    pub fn cookie_options(&self) -> CookieOptions {
        CookieOptions {
            path: self.path.clone(),
            domain: self.domain.clone(),
            max_age: self.max_age,
            secure: self.secure,
            http_only: self.http_only,
            same_site: self.same_site,
        }
    }

    /// Key pairs as raw bytes, in the order expected by `codecs_from_pairs`
    pub fn key_pairs(&self) -> Vec<(Vec<u8>, Option<Vec<u8>>)> {
        self.keys
            .iter()
            .map(|pair| {
                (
                    pair.hash_key.as_bytes().to_vec(),
                    pair.block_key.as_ref().map(|k| k.as_bytes().to_vec()),
                )
            })
            .collect()
    }

    /// Check the settings the store cannot recover from at runtime
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_valid_table_name(&self.table_name) {
            return Err(ConfigError::ValidationError(format!(
                "table name '{}' must be non-empty and contain only ASCII letters, digits or '_'",
                self.table_name
            )));
        }
        if self.max_age > MAX_SESSION_AGE {
            return Err(ConfigError::ValidationError(format!(
                "max_age must be at most {} seconds, got {}",
                MAX_SESSION_AGE, self.max_age
            )));
        }
        if self.keys.is_empty() {
            return Err(ConfigError::ValidationError(
                "at least one session key pair is required".to_string(),
            ));
        }
        for pair in &self.keys {
            if pair.hash_key.is_empty() {
                return Err(ConfigError::ValidationError(
                    "hash_key cannot be empty".to_string(),
                ));
            }
            if let Some(block_key) = &pair.block_key {
                if !matches!(block_key.len(), 16 | 32) {
                    return Err(ConfigError::ValidationError(format!(
                        "block_key must be 16 or 32 bytes, got {}",
                        block_key.len()
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Table names are interpolated into SQL, so only plain identifiers pass.
pub fn is_valid_table_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 64
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit())
}

/// Error type for configuration parsing
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    FileRead {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{path}': {message}")]
    ParseError { path: String, message: String },
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

impl Config {
    /// Load configuration from file
    ///
    /// If the file doesn't exist or is empty, returns default configuration.
    /// If the file exists but is invalid YAML, returns an error with details.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.display().to_string(),
            source: e,
        })?;

        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Config =
            serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseError {
                path: path.display().to_string(),
                message: format_yaml_error(&e),
            })?;

        Ok(config)
    }

    /// Load configuration from file with environment variable overrides
    ///
    /// Environment variables follow the pattern:
    /// - DBSESSION_SERVER_HOST
    /// - DBSESSION_SERVER_PORT
    /// - DBSESSION_DATABASE_DRIVER
    /// - DBSESSION_DATABASE_URL
    /// - DBSESSION_SESSION_TABLE_NAME
    /// - DBSESSION_SESSION_MAX_AGE
    /// - DBSESSION_SESSION_SECURE
    /// - DBSESSION_SESSION_HASH_KEY
    /// - DBSESSION_SESSION_BLOCK_KEY
    ///
    /// A hash key from the environment becomes the primary key pair; pairs
    /// from the file stay behind it for decoding older cookies.
    pub fn load_with_env(path: &std::path::Path) -> anyhow::Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("DBSESSION_SERVER_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("DBSESSION_SERVER_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                self.server.port = port;
            }
        }

        if let Ok(driver) = std::env::var("DBSESSION_DATABASE_DRIVER") {
            match driver.to_lowercase().as_str() {
                "sqlite" => self.database.driver = DatabaseDriver::Sqlite,
                "mysql" => self.database.driver = DatabaseDriver::Mysql,
                _ => {} // Ignore invalid values
            }
        }
        if let Ok(url) = std::env::var("DBSESSION_DATABASE_URL") {
            self.database.url = url;
        }

        if let Ok(table_name) = std::env::var("DBSESSION_SESSION_TABLE_NAME") {
            self.session.table_name = table_name;
        }
        if let Ok(max_age) = std::env::var("DBSESSION_SESSION_MAX_AGE") {
            if let Ok(max_age) = max_age.parse::<i64>() {
                self.session.max_age = max_age;
            }
        }
        if let Ok(secure) = std::env::var("DBSESSION_SESSION_SECURE") {
            if let Ok(secure) = secure.parse::<bool>() {
                self.session.secure = secure;
            }
        }
        if let Ok(hash_key) = std::env::var("DBSESSION_SESSION_HASH_KEY") {
            let block_key = std::env::var("DBSESSION_SESSION_BLOCK_KEY").ok();
            self.session.keys.insert(
                0,
                KeyPairConfig {
                    hash_key,
                    block_key,
                },
            );
        }
    }
}

/// Format YAML parsing error with location and context
fn format_yaml_error(e: &serde_yaml::Error) -> String {
    if let Some(location) = e.location() {
        format!(
            "at line {}, column {}: {}",
            location.line(),
            location.column(),
            e
        )
    } else {
        e.to_string()
    }
}

// Config tests that touch environment variables share this lock.
#[cfg(test)]
static CONFIG_ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());
