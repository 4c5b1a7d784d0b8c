//! Error types for the application bootstrap.

use anaphase_client::{ClientError, NetworkError};
use thiserror::Error;

/// Errors raised while bootstrapping or rendering an application.
#[derive(Error, Debug)]
pub enum AnaphaseError {
    /// The error-reporting DSN could not be parsed.
    #[error("Invalid DSN {dsn}: {reason}")]
    InvalidDsn { dsn: String, reason: String },

    /// The per-request client could not be built.
    #[error("Client error: {0}")]
    Client(#[from] ClientError),

    /// A GraphQL request failed at the transport level.
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    /// Initial props could not be resolved.
    #[error("Initial props error: {0}")]
    InitialProps(String),

    /// Rendering failed outside an error boundary.
    #[error("Render error: {0}")]
    Render(#[from] RenderError),
}

/// Failure raised by a page while rendering. Caught by [`ErrorBoundary`](crate::ErrorBoundary).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct RenderError {
    /// What went wrong.
    pub message: String,
    /// Component that failed, if known.
    pub component: Option<String>,
}

impl RenderError {
    /// Create a render error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            component: None,
        }
    }

    /// Name the failing component.
    pub fn in_component(mut self, component: impl Into<String>) -> Self {
        self.component = Some(component.into());
        self
    }
}
