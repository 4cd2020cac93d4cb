//! Runtime settings consumed by core.
//!
//! # Responsibility
//! - Decode the settings document handed over by the host (JSON text).
//! - Validate values core depends on before any registry is built.
//!
//! # Invariants
//! - Missing keys fall back to defaults; authorized mode is off by default.
//! - Reading the settings file is the host's job; core only sees its text.

use crate::logging::{default_log_level, normalize_level};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

/// Top-level settings document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Enables authorized (OAuth) sessions; without it core stays anonymous.
    pub oauth: bool,
    pub log: LogSettings,
}

/// Logging section of the settings document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// One of `trace|debug|info|warn|error`.
    pub level: String,
    /// Absolute directory for rolling log files; `None` disables file logging.
    pub dir: Option<PathBuf>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_log_level().to_string(),
            dir: None,
        }
    }
}

impl Settings {
    /// Decodes and validates a JSON settings document.
    pub fn from_json_str(raw: &str) -> Result<Self, SettingsError> {
        let settings: Settings =
            serde_json::from_str(raw).map_err(|err| SettingsError::Parse(err.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        normalize_level(&self.log.level)
            .map_err(|_| SettingsError::InvalidLogLevel(self.log.level.clone()))?;
        if let Some(dir) = &self.log.dir {
            if !dir.is_absolute() {
                return Err(SettingsError::RelativeLogDir(dir.clone()));
            }
        }
        Ok(())
    }

    /// Whether authorized sessions may be attached to entities.
    pub fn authorized_mode(&self) -> bool {
        self.oauth
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingsError {
    Parse(String),
    InvalidLogLevel(String),
    RelativeLogDir(PathBuf),
}

impl Display for SettingsError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse(message) => write!(f, "settings are not valid JSON: {message}"),
            Self::InvalidLogLevel(value) => write!(f, "unsupported log level `{value}`"),
            Self::RelativeLogDir(dir) => {
                write!(f, "log dir must be an absolute path, got `{}`", dir.display())
            }
        }
    }
}

impl Error for SettingsError {}
