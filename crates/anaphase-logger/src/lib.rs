//! Structured logging setup for Anaphase services.
//!
//! This crate provides:
//! - `LoggerConfig` - Service name, mode, level and file output settings
//! - `make_logger` - Installs the global `tracing` subscriber
//! - `LogFormat` / `Mode` - Console output selection (human in development, JSON in production)
//!
//! Every logger writes JSON lines to `error.log` (errors only) and
//! `combined.log` (everything at or above the configured level), and
//! mirrors the stream to the console.
//!
//! # Example
//!
//! ```rust,ignore
//! use anaphase_logger::{make_logger, LoggerConfig};
//!
//! let logger = make_logger(&LoggerConfig::from_env())?;
//! tracing::info!(service = logger.service(), "logger ready");
//! ```

mod config;
mod logger;

pub use config::*;
pub use logger::*;
