//! Subscriber construction and installation.

use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;

use std::fmt::Write as _;

use tracing::{Event, Span, Subscriber};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

use crate::config::{LogFormat, LoggerConfig};

/// Errors raised while setting up logging.
#[derive(Debug, thiserror::Error)]
pub enum LoggerError {
    /// A log file could not be opened.
    #[error("failed to open log file {path}: {source}")]
    OpenFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// A global subscriber is already installed.
    #[error("logger already initialized: {0}")]
    AlreadyInitialized(String),
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// Handle to the installed logger.
#[derive(Debug, Clone)]
pub struct Logger {
    service: String,
    console: LogFormat,
}

impl Logger {
    /// Service name attached to request spans.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Console output format in use.
    pub fn console_format(&self) -> LogFormat {
        self.console
    }

    /// Span carrying the service name, for instrumenting long-lived tasks.
    pub fn service_span(&self) -> Span {
        tracing::info_span!("service", service = %self.service)
    }
}

/// Event formatter that stamps the service name on every line, inside a
/// span or not.
struct WithService<E> {
    inner: E,
    stamp: Stamp,
}

enum Stamp {
    /// `[service] ` ahead of a human-readable line.
    Prefix(String),
    /// `"service":"..."` as the first key of a JSON line.
    JsonField(String),
}

impl<E> WithService<E> {
    fn human(inner: E, service: &str) -> Self {
        Self {
            inner,
            stamp: Stamp::Prefix(format!("[{service}] ")),
        }
    }

    fn json(inner: E, service: &str) -> Self {
        Self {
            inner,
            stamp: Stamp::JsonField(format!("\"service\":{}", serde_json::Value::from(service))),
        }
    }
}

impl<S, N, E> FormatEvent<S, N> for WithService<E>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
    E: FormatEvent<S, N>,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        match &self.stamp {
            Stamp::Prefix(prefix) => {
                writer.write_str(prefix)?;
                self.inner.format_event(ctx, writer, event)
            }
            Stamp::JsonField(field) => {
                let mut line = String::new();
                self.inner.format_event(ctx, Writer::new(&mut line), event)?;
                match line.strip_prefix('{') {
                    Some(rest) if rest.starts_with('}') => write!(writer, "{{{field}{rest}"),
                    Some(rest) => write!(writer, "{{{field},{rest}"),
                    None => writer.write_str(&line),
                }
            }
        }
    }
}

/// Build the subscriber described by `config` without installing it.
///
/// Useful with `tracing::subscriber::with_default` in tests.
pub fn build_subscriber(
    config: &LoggerConfig,
) -> Result<impl tracing::Subscriber + Send + Sync, LoggerError> {
    let service = config.service_name.as_str();
    let mut layers: Vec<BoxedLayer> = Vec::new();

    let console = match config.mode.console_format() {
        LogFormat::Json => fmt::layer()
            .json()
            .flatten_event(true)
            .map_event_format(|format| WithService::json(format, service))
            .with_filter(env_filter(&config.level))
            .boxed(),
        LogFormat::Human => fmt::layer()
            .with_target(false)
            .map_event_format(|format| WithService::human(format, service))
            .with_filter(env_filter(&config.level))
            .boxed(),
    };
    layers.push(console);

    if config.file_output {
        let errors = open_append(&config.error_log_path())?;
        layers.push(
            fmt::layer()
                .json()
                .flatten_event(true)
                .with_ansi(false)
                .with_writer(Mutex::new(errors))
                .map_event_format(|format| WithService::json(format, service))
                .with_filter(LevelFilter::ERROR)
                .boxed(),
        );

        let combined = open_append(&config.combined_log_path())?;
        layers.push(
            fmt::layer()
                .json()
                .flatten_event(true)
                .with_ansi(false)
                .with_writer(Mutex::new(combined))
                .map_event_format(|format| WithService::json(format, service))
                .with_filter(env_filter(&config.level))
                .boxed(),
        );
    }

    Ok(tracing_subscriber::registry().with(layers))
}

/// Install the global logger for a service.
pub fn make_logger(config: &LoggerConfig) -> Result<Logger, LoggerError> {
    build_subscriber(config)?
        .try_init()
        .map_err(|e| LoggerError::AlreadyInitialized(e.to_string()))?;

    Ok(Logger {
        service: config.service_name.clone(),
        console: config.mode.console_format(),
    })
}

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

fn open_append(path: &Path) -> Result<File, LoggerError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| LoggerError::OpenFile {
            path: path.display().to_string(),
            source,
        })
}
