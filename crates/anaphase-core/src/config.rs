//! Application configuration.
//!
//! Loaded from `anaphase.toml` (or `anaphase.json`) when present, then
//! overridden by environment variables.

use std::path::{Path, PathBuf};

use anaphase_logger::LoggerConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::request_client::{DEFAULT_GRAPHQL_PATH, DEFAULT_PORT};

/// Config file names searched by [`AnaphaseConfig::discover`], in order.
pub const CONFIG_FILES: [&str; 2] = ["anaphase.toml", "anaphase.json"];

/// Application configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnaphaseConfig {
    /// Listener settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggerConfig,

    /// Error reporting settings.
    #[serde(default)]
    pub reporting: ReportingConfig,

    /// GraphQL client settings.
    #[serde(default)]
    pub client: ClientSettings,
}

impl AnaphaseConfig {
    /// Load config from a file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        if path.extension().is_some_and(|ext| ext == "json") {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display()))
        } else {
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse TOML config: {}", path.display()))
        }
    }

    /// Load the first config file found in `dir`, or the defaults.
    pub fn discover(dir: impl AsRef<Path>) -> Result<Self> {
        match find_config(dir.as_ref()) {
            Some(path) => {
                tracing::debug!(path = %path.display(), "loading config");
                Self::load(path)
            }
            None => Ok(Self::default()),
        }
    }

    /// Discover config in the working directory and apply the process environment.
    pub fn from_env() -> Result<Self> {
        let dir = std::env::current_dir().context("Failed to read working directory")?;
        let mut config = Self::discover(dir)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply `PORT`, `SENTRY_DSN` and the logging variables using the given lookup.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("PORT").filter(|port| !port.is_empty()) {
            self.server.port = port
                .parse()
                .with_context(|| format!("Invalid PORT: {port}"))?;
        }
        if let Some(dsn) = lookup("SENTRY_DSN").filter(|dsn| !dsn.is_empty()) {
            self.reporting.dsn = Some(dsn);
        }
        self.logging.apply_env(&lookup);
        Ok(())
    }
}

fn find_config(dir: &Path) -> Option<PathBuf> {
    CONFIG_FILES
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.is_file())
}

/// Listener settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Port to listen on (default: 3000).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Trust one proxy hop for the client address (default: true).
    #[serde(default = "default_true")]
    pub trust_proxy: bool,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            trust_proxy: true,
        }
    }
}

/// Error reporting settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportingConfig {
    /// Sentry-style DSN.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dsn: Option<String>,
}

/// GraphQL client settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSettings {
    /// Path of the GraphQL endpoint (default: `/api/v1/graphql`).
    #[serde(default = "default_graphql_path")]
    pub graphql_path: String,
}

fn default_graphql_path() -> String {
    DEFAULT_GRAPHQL_PATH.to_string()
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            graphql_path: default_graphql_path(),
        }
    }
}
