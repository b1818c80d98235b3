//! Layered configuration for the quiz sidecar.
//!
//! Sources, highest priority first:
//! 1. Environment variables (`QUIZD_*`)
//! 2. `quizd.toml` in the current directory
//! 3. Built-in defaults

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

use crate::upload::UploadMode;

pub const CONFIG_FILE: &str = "quizd.toml";

/// Original upload limit of the question bank endpoint.
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 2 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Figment(#[from] figment::Error),

    #[error("Invalid configuration value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QuizConfig {
    /// Workspace opened at startup, if any. `workspace.select` can still switch later.
    #[serde(default)]
    pub workspace: Option<PathBuf>,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
    #[serde(default = "default_mode")]
    pub default_mode: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_max_upload_bytes() -> usize {
    DEFAULT_MAX_UPLOAD_BYTES
}

fn default_mode() -> String {
    "append".to_string()
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for QuizConfig {
    fn default() -> Self {
        Self {
            workspace: None,
            max_upload_bytes: default_max_upload_bytes(),
            default_mode: default_mode(),
            log_level: default_log_level(),
        }
    }
}

impl QuizConfig {
    /// Load `.env` (if present), then extract and validate the layered config.
    pub fn load() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        let config: Self = Self::figment().extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn figment() -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        let local = PathBuf::from(CONFIG_FILE);
        if local.exists() {
            figment = figment.merge(Toml::file(local));
        }
        figment.merge(Env::prefixed("QUIZD_"))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_upload_bytes == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_upload_bytes".into(),
                reason: "must be greater than zero".into(),
            });
        }
        if UploadMode::parse(&self.default_mode).is_err() {
            return Err(ConfigError::InvalidValue {
                field: "default_mode".into(),
                reason: "must be either 'append' or 'replace'".into(),
            });
        }
        Ok(())
    }

    pub fn default_upload_mode(&self) -> UploadMode {
        UploadMode::parse(&self.default_mode).unwrap_or(UploadMode::Append)
    }
}
