//! Configuration file and environment overrides.
//!
//! Resolution order is CLI flags > environment > config file > defaults. The
//! binaries apply the CLI layer themselves; this module covers the rest.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::Config;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Contents of `config.toml`. Every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    pub base_url: Option<String>,
    pub api_token: Option<String>,
    pub sub_batch_timeout_secs: Option<u64>,
}

impl ConfigFile {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load the file at [`default_path`] if it exists.
    pub fn load_default() -> Result<Option<Self>, ConfigError> {
        match default_path() {
            Some(path) if path.exists() => Self::load(&path).map(Some),
            _ => Ok(None),
        }
    }

    /// Overlay the keys present in the file onto `config`.
    pub fn apply(&self, config: &mut Config) {
        if let Some(url) = &self.base_url {
            config.base_url = url.clone();
        }
        if let Some(token) = &self.api_token {
            config.api_token = Some(token.clone());
        }
        if let Some(secs) = self.sub_batch_timeout_secs {
            config.sub_batch_timeout_secs = Some(secs);
        }
    }
}

/// `<config dir>/sutta-studio/config.toml`.
pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("sutta-studio").join("config.toml"))
}

/// Overlay `SUTTA_API_URL`, `SUTTA_API_TOKEN` and `SUTTA_SUB_BATCH_TIMEOUT`.
pub fn apply_env(config: &mut Config) {
    apply_vars(config, |key| std::env::var(key).ok());
}

fn apply_vars(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(url) = var("SUTTA_API_URL").filter(|v| !v.is_empty()) {
        config.base_url = url;
    }
    if let Some(token) = var("SUTTA_API_TOKEN").filter(|v| !v.is_empty()) {
        config.api_token = Some(token);
    }
    if let Some(secs) = var("SUTTA_SUB_BATCH_TIMEOUT").and_then(|v| v.trim().parse().ok()) {
        config.sub_batch_timeout_secs = Some(secs);
    }
}

impl Config {
    /// Defaults, then the config file (if any), then the environment.
    pub fn from_env_and_file() -> Result<Self, ConfigError> {
        let mut config = Config::default();
        if let Some(file) = ConfigFile::load_default()? {
            file.apply(&mut config);
        }
        apply_env(&mut config);
        Ok(config)
    }

    pub fn sub_batch_timeout(&self) -> Option<Duration> {
        self.sub_batch_timeout_secs
            .filter(|&secs| secs > 0)
            .map(Duration::from_secs)
    }
}
