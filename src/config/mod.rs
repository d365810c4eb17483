//! Configuration for the bridge.
//!
//! The host cannot pass structured settings across the C boundary, so the
//! bridge reads an optional TOML file named by `CONTRACT_BRIDGE_CONFIG`.
//! Environment variables in the file are expanded using `${VAR_NAME}` syntax.
//!
//! # Example
//!
//! ```toml
//! [engine]
//! spec_path = "/etc/nginx/appspec.yml"
//! on_init_failure = "fail_closed"
//! reinit = "first_write_wins"
//!
//! [logging]
//! level = "info"
//! format = "json"
//!
//! [log_shipping]
//! endpoint = "https://collector.example.com/logs/bulk"
//! ```

mod engine;
mod observability;

use std::path::Path;

pub use engine::*;
use once_cell::sync::Lazy;
pub use observability::*;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Environment variable naming the configuration file.
pub const CONFIG_ENV_VAR: &str = "CONTRACT_BRIDGE_CONFIG";

/// Root configuration.
///
/// Every section is optional; an empty file (or no file at all) yields a
/// working bridge that expects the host to supply the spec via
/// `contract_bridge_create_engine`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BridgeConfig {
    /// Validation engine construction and failure policy.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Local diagnostic logging.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Remote log shipping.
    #[serde(default)]
    pub log_shipping: LogShippingConfig,
}

impl BridgeConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(e, path.as_ref().to_path_buf()))?;

        Self::from_str(&contents)
    }

    /// Parse configuration from a TOML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(contents: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(contents)?;
        let config: BridgeConfig = toml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from the file named by [`CONFIG_ENV_VAR`], or defaults when unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var_os(CONFIG_ENV_VAR) {
            Some(path) if !path.is_empty() => Self::from_file(path),
            _ => Ok(Self::default()),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.log_shipping.validate().map_err(ConfigError::Validation)?;
        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {1}: {0}")]
    Io(std::io::Error, std::path::PathBuf),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),

    #[error("Configuration validation error: {0}")]
    Validation(String),
}

static ENV_VAR_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([^}]+)\}").expect("env var pattern is a valid regex"));

/// Expand `${VAR}` references, leaving anything after a `#` untouched.
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut result = String::with_capacity(input.len());

    for line in input.lines() {
        let comment_pos = line.find('#');
        let mut last_end = 0;

        for cap in ENV_VAR_PATTERN.captures_iter(line) {
            let Some(whole) = cap.get(0) else {
                continue;
            };
            if let Some(pos) = comment_pos
                && whole.start() >= pos
            {
                continue;
            }

            result.push_str(&line[last_end..whole.start()]);
            let var_name = &cap[1];
            let value = std::env::var(var_name)
                .map_err(|_| ConfigError::EnvVarNotFound(var_name.to_string()))?;
            result.push_str(&value);
            last_end = whole.end();
        }

        result.push_str(&line[last_end..]);
        result.push('\n');
    }

    if !input.ends_with('\n') && result.ends_with('\n') {
        result.pop();
    }

    Ok(result)
}
