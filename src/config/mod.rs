//! Configuration management for crowdcount
//!
//! This module provides a layered configuration system that loads settings from:
//! 1. Default values (embedded in structs)
//! 2. TOML configuration file
//! 3. Environment variables (highest priority)
//!
//! # Usage
//!
//! ```no_run
//! use crowdcount::config::Config;
//!
//! let config = Config::load().expect("Failed to load configuration");
//! println!("Queue: {}", config.broker.queue_name);
//! ```
//!
//! # Environment Variables
//!
//! Configuration can be overridden using environment variables with the pattern:
//! `CROWDCOUNT__<section>__<key>`
//!
//! Examples:
//! - `CROWDCOUNT__SERVER__BIND_ADDR=0.0.0.0:9000`
//! - `CROWDCOUNT__BROKER__PREFETCH=2`
//! - `CROWDCOUNT__FETCH__MAX_IMAGE_BYTES=10MB`
//!
//! # Configuration File
//!
//! By default, the configuration is loaded from `config/crowdcount.toml`.
//! This can be overridden using the `CROWDCOUNT_CONFIG` environment variable.

mod models;
mod sources;
mod validation;

pub use crate::humanize::ByteSize;
pub use models::{
    BrokerConfig, Config, DetectorConfig, FetchConfig, ServerConfig, StorageConfig,
    StorageProvider, WorkerConfig,
};
pub use validation::ValidationError;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Configuration validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

impl Config {
    /// Load configuration from all sources (file + environment)
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file is malformed or a value
    /// fails validation.
    pub fn load() -> Result<Self, ConfigError> {
        let config = sources::load()?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: std::path::PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load_from_sources(path)?;
        validation::validate(&config)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_minimal_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        fs::write(&config_path, "[broker]\nqueue_name = \"people\"\n").unwrap();

        let config = Config::load_from_path(config_path).unwrap();
        assert_eq!(config.broker.queue_name, "people");
        assert_eq!(config.broker.prefetch, 1);
    }

    #[test]
    fn test_validation_rejects_zero_prefetch() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        fs::write(&config_path, "[broker]\nprefetch = 0\n").unwrap();

        let result = Config::load_from_path(config_path);
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::ValidationError(ValidationError::ZeroPrefetch)
        ));
    }

    #[test]
    fn test_malformed_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        fs::write(&config_path, "[broker\nprefetch = ").unwrap();

        assert!(matches!(
            Config::load_from_path(config_path),
            Err(ConfigError::LoadError(_))
        ));
    }
}
