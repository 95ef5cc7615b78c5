//! Runtime configuration: defaults, optionally overridden by a YAML file,
//! then by environment variables.

use serde::{Deserialize, Serialize};
use std::{
    env, fs, io,
    path::{Path, PathBuf},
};
use thiserror::Error;

pub const ENV_DATA_DIR: &str = "TEXTSETS_DATA_DIR";
pub const ENV_EXPORT_DIR: &str = "TEXTSETS_EXPORT_DIR";
pub const ENV_MAX_CONCURRENCY: &str = "TEXTSETS_MAX_CONCURRENCY";
pub const ENV_LOG_LEVEL: &str = "LOG_LEVEL";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("parsing config: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("{var}={value:?} is not valid: {reason}")]
    InvalidEnv {
        var: &'static str,
        value: String,
        reason: String,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding one `<key>.csv` per dataset.
    pub data_dir: PathBuf,
    /// Directory for Parquet snapshots.
    pub export_dir: PathBuf,
    /// Default tracing filter when `RUST_LOG` is unset.
    pub log_level: String,
    /// Categories processed at once within a batch.
    pub max_concurrency: usize,
    /// Pass existing dataset headers to the producer.
    pub use_header_hint: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("datasets"),
            export_dir: PathBuf::from("exports"),
            log_level: "info".to_string(),
            max_concurrency: 4,
            use_header_hint: true,
        }
    }
}

impl Config {
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Defaults, then `path` (if any), then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                Self::from_yaml(&text)?
            }
            None => Self::default(),
        };
        config.apply_env(|var| env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from `lookup` (normally `std::env::var`).
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(ENV_DATA_DIR) {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup(ENV_EXPORT_DIR) {
            self.export_dir = PathBuf::from(dir);
        }
        if let Some(level) = lookup(ENV_LOG_LEVEL) {
            self.log_level = level;
        }
        if let Some(raw) = lookup(ENV_MAX_CONCURRENCY) {
            self.max_concurrency = raw.trim().parse().map_err(|e: std::num::ParseIntError| {
                ConfigError::InvalidEnv {
                    var: ENV_MAX_CONCURRENCY,
                    value: raw.clone(),
                    reason: e.to_string(),
                }
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrency must be greater than 0".into(),
            ));
        }
        if self.data_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("data_dir must not be empty".into()));
        }
        if self.export_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("export_dir must not be empty".into()));
        }
        Ok(())
    }
}
