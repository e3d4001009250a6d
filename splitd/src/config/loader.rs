//! Configuration loading and saving
//!
//! This module handles loading configuration from files and environment
//! variables, and writing it back when the control plane persists a change.

use std::path::Path;

use tracing::{debug, info};

use super::types::Config;
use crate::error::ConfigError;

/// Load configuration from a JSON file
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read, parsed or validated.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();

    debug!("Loading configuration from {:?}", path);

    if !path.exists() {
        return Err(ConfigError::FileNotFound {
            path: path.display().to_string(),
        });
    }

    let contents = std::fs::read_to_string(path)?;

    let config: Config = serde_json::from_str(&contents).map_err(|e| {
        ConfigError::ParseError(format!("Failed to parse JSON: {e} at {path:?}"))
    })?;

    config.validate()?;

    info!(
        "Configuration loaded: enabled={}, {} uplinks, {} rules",
        config.enabled,
        config.uplinks.len(),
        config.rules.len()
    );

    Ok(config)
}

/// Load configuration from a JSON string
///
/// # Errors
///
/// Returns `ConfigError` if parsing or validation fails.
pub fn load_config_str(json: &str) -> Result<Config, ConfigError> {
    let config: Config =
        serde_json::from_str(json).map_err(|e| ConfigError::ParseError(e.to_string()))?;

    config.validate()?;

    Ok(config)
}

/// Load configuration with environment variable overrides
///
/// Environment variables:
/// - `SPLITD_LOG_LEVEL`: Override log level
/// - `SPLITD_QUEUE_NUM`: Override the NFQUEUE number
/// - `SPLITD_ENABLED`: Override the master switch (`true`/`false`)
///
/// # Errors
///
/// Returns `ConfigError` if loading or parsing fails.
pub fn load_config_with_env(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let mut config = load_config(path)?;
    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
    Ok(config)
}

/// Apply overrides from `lookup`, then re-validate
fn apply_env_overrides(
    config: &mut Config,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<(), ConfigError> {
    if let Some(level) = lookup("SPLITD_LOG_LEVEL") {
        config.log.level = level;
        debug!("Log level overridden to {}", config.log.level);
    }

    if let Some(num) = lookup("SPLITD_QUEUE_NUM") {
        config.queue.number = num.parse().map_err(|_| ConfigError::EnvError {
            name: "SPLITD_QUEUE_NUM".into(),
            reason: format!("Invalid queue number: {num}"),
        })?;
        debug!("Queue number overridden to {}", config.queue.number);
    }

    if let Some(enabled) = lookup("SPLITD_ENABLED") {
        config.enabled = enabled.parse().map_err(|_| ConfigError::EnvError {
            name: "SPLITD_ENABLED".into(),
            reason: format!("Expected true or false, got: {enabled}"),
        })?;
        debug!("Enabled overridden to {}", config.enabled);
    }

    // Re-validate after overrides
    config.validate()
}

/// Write `config` to `path` as pretty-printed JSON
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be written.
pub fn save_config(path: impl AsRef<Path>, config: &Config) -> Result<(), ConfigError> {
    let json = serde_json::to_string_pretty(config)
        .map_err(|e| ConfigError::ParseError(format!("Failed to serialize config: {e}")))?;

    std::fs::write(path.as_ref(), json)?;
    debug!("Configuration saved to {:?}", path.as_ref());
    Ok(())
}

/// Create a default configuration file at the given path
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be written.
pub fn create_default_config(path: impl AsRef<Path>) -> Result<(), ConfigError> {
    save_config(path, &Config::default_config())
}
