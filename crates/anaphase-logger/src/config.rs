//! Logger configuration.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Service name used when `SERVICE_NAME` is not set.
pub const DEFAULT_SERVICE_NAME: &str = "anaphase-app";

/// Runtime mode, derived from `NODE_ENV`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Anything other than `production`.
    #[default]
    Development,
    /// `NODE_ENV=production`.
    Production,
}

impl Mode {
    /// Derive the mode from a `NODE_ENV` value.
    pub fn from_node_env(value: Option<&str>) -> Self {
        match value {
            Some("production") => Self::Production,
            _ => Self::Development,
        }
    }

    /// Console format for this mode.
    pub fn console_format(self) -> LogFormat {
        match self {
            Self::Development => LogFormat::Human,
            Self::Production => LogFormat::Json,
        }
    }

    /// Returns `true` outside production.
    pub fn is_development(self) -> bool {
        self == Self::Development
    }
}

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON format (for production/log aggregation).
    #[default]
    Json,
    /// Human-readable format (for development).
    Human,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json => write!(f, "json"),
            Self::Human => write!(f, "human"),
        }
    }
}

/// Configuration for [`make_logger`](crate::make_logger).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggerConfig {
    /// Service name attached to request spans.
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Runtime mode.
    #[serde(default)]
    pub mode: Mode,

    /// Default filter directive when `RUST_LOG` is unset.
    #[serde(default = "default_level")]
    pub level: String,

    /// Directory holding `error.log` and `combined.log`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,

    /// Whether to write the log files at all.
    #[serde(default = "default_true")]
    pub file_output: bool,
}

fn default_service_name() -> String {
    DEFAULT_SERVICE_NAME.to_string()
}

fn default_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            mode: Mode::default(),
            level: default_level(),
            log_dir: None,
            file_output: true,
        }
    }
}

impl LoggerConfig {
    /// Create a configuration for the given service.
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Default::default()
        }
    }

    /// Build a configuration from the process environment
    /// (`SERVICE_NAME`, `NODE_ENV`, `ANAPHASE_LOG_DIR`).
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    /// Apply environment overrides using the given lookup.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(name) = lookup("SERVICE_NAME").filter(|name| !name.is_empty()) {
            self.service_name = name;
        }
        if let Some(node_env) = lookup("NODE_ENV") {
            self.mode = Mode::from_node_env(Some(&node_env));
        }
        if let Some(dir) = lookup("ANAPHASE_LOG_DIR").filter(|dir| !dir.is_empty()) {
            self.log_dir = Some(PathBuf::from(dir));
        }
    }

    /// Set the runtime mode.
    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the default filter directive.
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    /// Set the log file directory.
    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    /// Enable or disable file output.
    pub fn with_file_output(mut self, enabled: bool) -> Self {
        self.file_output = enabled;
        self
    }

    /// Path of the errors-only log file.
    pub fn error_log_path(&self) -> PathBuf {
        self.log_dir().join("error.log")
    }

    /// Path of the combined log file.
    pub fn combined_log_path(&self) -> PathBuf {
        self.log_dir().join("combined.log")
    }

    fn log_dir(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(|| PathBuf::from("."))
    }
}
