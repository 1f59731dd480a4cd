//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use mri_core::classification::{Normalization, TensorLayout};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: String,
    pub log_level: Level,
    pub cors_origin: String,
    pub db_connect_attempts: u32,
    pub db_retry_delay: Duration,
    pub db_connect_timeout: Duration,
    pub db_max_connections: u32,
    pub model_path: PathBuf,
    pub model_input_size: u32,
    pub model_normalization: Normalization,
    /// Forces the input layout when the model's shape is ambiguous.
    pub model_layout: Option<TensorLayout>,
    /// Sessions untouched for this long are discarded.
    pub session_idle_timeout: Duration,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from any variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // --- Server and Logging ---
        let bind_address = parse_or(&lookup, "BIND_ADDRESS", "0.0.0.0:3000")?;

        let log_level_str = lookup("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let cors_origin =
            lookup("CORS_ORIGIN").unwrap_or_else(|| "http://localhost:3000".to_string());

        // --- Database ---
        let database_url = lookup("DATABASE_URL")
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingVar("DATABASE_URL".to_string()))?;

        let db_connect_attempts: u32 = parse_or(&lookup, "DB_CONNECT_ATTEMPTS", "3")?;
        if db_connect_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "DB_CONNECT_ATTEMPTS".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        let db_retry_delay = Duration::from_millis(parse_or(&lookup, "DB_RETRY_DELAY_MS", "2000")?);
        let db_connect_timeout =
            Duration::from_secs(parse_or(&lookup, "DB_CONNECT_TIMEOUT_SECS", "5")?);
        let db_max_connections = parse_or(&lookup, "DB_MAX_CONNECTIONS", "5")?;

        // --- Model ---
        let model_path = lookup("MODEL_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./models/alzheimer_mri_classifier.onnx"));
        let model_input_size = parse_or(&lookup, "MODEL_INPUT_SIZE", "224")?;

        let normalization_str =
            lookup("MODEL_NORMALIZATION").unwrap_or_else(|| "imagenet".to_string());
        let model_normalization = Normalization::from_name(&normalization_str).ok_or_else(|| {
            ConfigError::InvalidValue(
                "MODEL_NORMALIZATION".to_string(),
                format!(
                    "'{}' is not one of imagenet, unit, symmetric",
                    normalization_str
                ),
            )
        })?;

        let model_layout = match lookup("MODEL_LAYOUT").filter(|v| !v.trim().is_empty()) {
            Some(raw) => Some(TensorLayout::from_name(&raw).ok_or_else(|| {
                ConfigError::InvalidValue(
                    "MODEL_LAYOUT".to_string(),
                    format!("'{}' is not one of nchw, nhwc", raw),
                )
            })?),
            None => None,
        };

        // --- Sessions ---
        let idle_secs: u64 = parse_or(&lookup, "SESSION_IDLE_TIMEOUT_SECS", "1800")?;
        if idle_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "SESSION_IDLE_TIMEOUT_SECS".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        let session_idle_timeout = Duration::from_secs(idle_secs);

        Ok(Self {
            bind_address,
            database_url,
            log_level,
            cors_origin,
            db_connect_attempts,
            db_retry_delay,
            db_connect_timeout,
            db_max_connections,
            model_path,
            model_input_size,
            model_normalization,
            model_layout,
            session_idle_timeout,
        })
    }
}

fn parse_or<F, T>(lookup: &F, name: &str, default: &str) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = lookup(name).unwrap_or_else(|| default.to_string());
    raw.trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| map.get(name).cloned())
    }

    #[test]
    fn database_url_is_required() {
        assert!(matches!(load(&[]), Err(ConfigError::MissingVar(v)) if v == "DATABASE_URL"));
        assert!(matches!(
            load(&[("DATABASE_URL", "  ")]),
            Err(ConfigError::MissingVar(_))
        ));
    }

    #[test]
    fn defaults_apply() {
        let config = load(&[("DATABASE_URL", "postgres://localhost/mri")]).unwrap();
        assert_eq!(config.db_connect_attempts, 3);
        assert_eq!(config.db_retry_delay, Duration::from_secs(2));
        assert_eq!(config.model_input_size, 224);
        assert_eq!(config.model_normalization, Normalization::IMAGENET);
        assert_eq!(config.log_level, Level::INFO);
        assert_eq!(config.bind_address.port(), 3000);
        assert_eq!(config.model_layout, None);
        assert_eq!(config.session_idle_timeout, Duration::from_secs(1800));
    }

    #[test]
    fn model_layout_and_session_timeout_are_parsed() {
        let config = load(&[
            ("DATABASE_URL", "postgres://localhost/mri"),
            ("MODEL_LAYOUT", "NHWC"),
            ("SESSION_IDLE_TIMEOUT_SECS", "60"),
        ])
        .unwrap();
        assert_eq!(config.model_layout, Some(TensorLayout::Nhwc));
        assert_eq!(config.session_idle_timeout, Duration::from_secs(60));

        let err = load(&[
            ("DATABASE_URL", "postgres://localhost/mri"),
            ("MODEL_LAYOUT", "chw"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(v, _) if v == "MODEL_LAYOUT"));

        let err = load(&[
            ("DATABASE_URL", "postgres://localhost/mri"),
            ("SESSION_IDLE_TIMEOUT_SECS", "0"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(v, _) if v == "SESSION_IDLE_TIMEOUT_SECS"));
    }

    #[test]
    fn invalid_values_name_the_variable() {
        let err = load(&[
            ("DATABASE_URL", "postgres://localhost/mri"),
            ("DB_CONNECT_ATTEMPTS", "three"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(v, _) if v == "DB_CONNECT_ATTEMPTS"));

        let err = load(&[
            ("DATABASE_URL", "postgres://localhost/mri"),
            ("MODEL_NORMALIZATION", "zscore"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(v, _) if v == "MODEL_NORMALIZATION"));
    }
}
