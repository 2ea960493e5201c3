//! Configuration management for airlock.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::codec::SecretKey;
use crate::error::{Error, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "airlock";

/// Default database file name.
const DATABASE_FILE_NAME: &str = "telemetry.db";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `AIRLOCK_`)
/// 2. TOML config file at `~/.config/airlock/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Transport configuration.
    pub transport: TransportConfig,
    /// Query API configuration.
    pub api: ApiConfig,
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Admission configuration.
    pub admission: AdmissionConfig,
    /// Shared key configuration.
    pub crypto: CryptoConfig,
}

/// Inbound transport configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// UDP address the receiver binds for encrypted telemetry.
    pub bind: String,
}

/// Query API configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Serve the HTTP query API alongside the receiver.
    pub enabled: bool,
    /// TCP address the query API binds.
    pub bind: String,
}

/// Storage-related configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the database file.
    /// Defaults to `~/.local/share/airlock/telemetry.db`
    pub database_path: Option<PathBuf>,
}

/// Admission-related configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
    /// Maximum tolerated difference between sender timestamp and receiver
    /// clock, in seconds.
    pub max_skew_secs: u64,
    /// Number of recently accepted message ids remembered for replay
    /// detection.
    pub seen_window: usize,
}

/// Shared key configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// URL-safe base64 encoding of the 32-byte shared key.
    /// Usually supplied via `AIRLOCK_CRYPTO_KEY`.
    pub key: Option<String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:9998".to_string(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: "127.0.0.1:5000".to_string(),
        }
    }
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_skew_secs: 60,
            seen_window: 2000,
        }
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// Configuration is loaded in this order (later sources override earlier):
    /// 1. Default values
    /// 2. TOML config file (if exists)
    /// 3. Environment variables (prefixed with `AIRLOCK_`)
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file))
            .merge(Env::prefixed("AIRLOCK_").split("_"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        if self.transport.bind.parse::<SocketAddr>().is_err() {
            return Err(Error::ConfigValidation {
                message: format!("transport.bind is not a socket address: {}", self.transport.bind),
            });
        }

        if self.api.bind.parse::<SocketAddr>().is_err() {
            return Err(Error::ConfigValidation {
                message: format!("api.bind is not a socket address: {}", self.api.bind),
            });
        }

        if self.admission.max_skew_secs == 0 {
            return Err(Error::ConfigValidation {
                message: "admission.max_skew_secs must be greater than 0".to_string(),
            });
        }

        if self.admission.seen_window == 0 {
            return Err(Error::ConfigValidation {
                message: "admission.seen_window must be greater than 0".to_string(),
            });
        }

        // Key format is checked here so a typo fails at startup, not on the
        // first packet.
        if let Some(key) = &self.crypto.key {
            SecretKey::from_base64(key).map_err(|e| Error::ConfigValidation {
                message: format!("crypto.key: {e}"),
            })?;
        }

        Ok(())
    }

    /// Get the database path, resolving defaults if not set.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(DATABASE_FILE_NAME))
    }

    /// Decode the configured shared key.
    ///
    /// # Errors
    ///
    /// Returns a validation error if no key is configured, or a key error if
    /// it cannot be decoded.
    pub fn secret_key(&self) -> Result<SecretKey> {
        let encoded = self.crypto.key.as_deref().ok_or(Error::ConfigValidation {
            message: "crypto.key is not set (export AIRLOCK_CRYPTO_KEY or add it to config.toml)"
                .to_string(),
        })?;
        SecretKey::from_base64(encoded)
    }

    /// Get the maximum clock skew as a Duration.
    #[must_use]
    pub fn max_skew(&self) -> Duration {
        Duration::from_secs(self.admission.max_skew_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.transport.bind, "127.0.0.1:9998");
        assert!(config.api.enabled);
        assert_eq!(config.api.bind, "127.0.0.1:5000");
        assert_eq!(config.admission.max_skew_secs, 60);
        assert_eq!(config.admission.seen_window, 2000);
        assert!(config.crypto.key.is_none());
    }

    #[test]
    fn test_validate_valid_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_bad_transport_bind() {
        let mut config = Config::default();
        config.transport.bind = "not-an-address".to_string();

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("transport.bind"));
    }

    #[test]
    fn test_validate_bad_api_bind() {
        let mut config = Config::default();
        config.api.bind = "localhost".to_string();

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("api.bind"));
    }

    #[test]
    fn test_validate_zero_skew() {
        let mut config = Config::default();
        config.admission.max_skew_secs = 0;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("max_skew_secs"));
    }

    #[test]
    fn test_validate_zero_seen_window() {
        let mut config = Config::default();
        config.admission.seen_window = 0;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("seen_window"));
    }

    #[test]
    fn test_validate_bad_key() {
        let mut config = Config::default();
        config.crypto.key = Some("too short".to_string());

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("crypto.key"));
    }

    #[test]
    fn test_validate_good_key() {
        let mut config = Config::default();
        config.crypto.key = Some(SecretKey::generate().to_base64());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_secret_key_missing() {
        let config = Config::default();
        let err = config.secret_key().unwrap_err().to_string();
        assert!(err.contains("crypto.key"));
    }

    #[test]
    fn test_secret_key_round_trip() {
        let key = SecretKey::generate();
        let mut config = Config::default();
        config.crypto.key = Some(key.to_base64());

        let decoded = config.secret_key().unwrap();
        assert_eq!(decoded.as_bytes(), key.as_bytes());
    }

    #[test]
    fn test_database_path_default() {
        let config = Config::default();
        let path = config.database_path();

        assert!(path.to_string_lossy().contains("telemetry.db"));
    }

    #[test]
    fn test_database_path_custom() {
        let mut config = Config::default();
        config.storage.database_path = Some(PathBuf::from("/custom/path/db.sqlite"));

        assert_eq!(
            config.database_path(),
            PathBuf::from("/custom/path/db.sqlite")
        );
    }

    #[test]
    fn test_max_skew() {
        let config = Config::default();
        assert_eq!(config.max_skew(), Duration::from_secs(60));
    }

    #[test]
    fn test_default_config_path() {
        let path = Config::default_config_path();
        assert!(path.to_string_lossy().contains("airlock"));
        assert!(path.to_string_lossy().contains("config.toml"));
    }

    #[test]
    fn test_load_nonexistent_config() {
        // Loading from a nonexistent path should work (uses defaults)
        let result = Config::load_from(Some(PathBuf::from("/nonexistent/config.toml")));
        assert!(result.is_ok());
    }

    #[test]
    fn test_load_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[transport]
bind = "0.0.0.0:7000"

[admission]
max_skew_secs = 120
"#,
        )
        .unwrap();

        let config = Config::load_from(Some(path)).unwrap();
        assert_eq!(config.transport.bind, "0.0.0.0:7000");
        assert_eq!(config.admission.max_skew_secs, 120);
        // Untouched sections keep their defaults.
        assert_eq!(config.admission.seen_window, 2000);
    }

    #[test]
    fn test_config_serialize() {
        let config = Config::default();
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("max_skew_secs"));
        assert!(json.contains("seen_window"));
    }

    #[test]
    fn test_config_clone_eq() {
        let config = Config::default();
        let cloned = config.clone();
        assert_eq!(config, cloned);
    }
}
