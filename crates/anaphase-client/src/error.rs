//! Error types for the GraphQL client.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// GraphQL error location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphqlErrorLocation {
    /// Line number in the query (1-based).
    pub line: u32,
    /// Column number in the query (1-based).
    pub column: u32,
}

impl fmt::Display for GraphqlErrorLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// GraphQL path segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GraphqlPathSegment {
    /// Field name.
    Key(String),
    /// Array index.
    Index(i64),
}

impl fmt::Display for GraphqlPathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(key) => write!(f, "{key}"),
            Self::Index(index) => write!(f, "{index}"),
        }
    }
}

/// A GraphQL-level error carried inside an otherwise valid response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphqlError {
    /// Human-readable error message.
    pub message: String,
    /// Location(s) within the query.
    #[serde(default)]
    pub locations: Vec<GraphqlErrorLocation>,
    /// Path within the response where the error occurred.
    #[serde(default)]
    pub path: Vec<GraphqlPathSegment>,
    /// Extensions metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<serde_json::Value>,
}

impl GraphqlError {
    /// Create an error with only a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            locations: Vec::new(),
            path: Vec::new(),
            extensions: None,
        }
    }

    /// Locations joined as `line:column` pairs.
    pub fn locations_display(&self) -> String {
        join(&self.locations, ",")
    }

    /// Path joined with dots.
    pub fn path_display(&self) -> String {
        join(&self.path, ".")
    }
}

impl fmt::Display for GraphqlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for GraphqlError {}

fn join<T: fmt::Display>(items: &[T], sep: &str) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(sep)
}

/// Transport-level failure. Reported once and surfaced to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetworkError {
    /// The request could not be sent or the connection failed.
    #[error("request failed: {message}")]
    Request {
        /// Error message.
        message: String,
        /// Whether the error was a timeout.
        is_timeout: bool,
        /// Whether the error was a connection failure.
        is_connect: bool,
    },

    /// Non-success HTTP status.
    #[error("response not successful: received status code {status}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body (truncated if needed).
        body: String,
    },

    /// The response body was not a GraphQL response.
    #[error("malformed response: {message}")]
    Parse {
        /// Parser message.
        message: String,
        /// Response body (truncated if needed).
        body: String,
    },

    /// The streaming connection could not be established in time.
    #[error("connection timed out")]
    Timeout,

    /// Streaming protocol violation or connection error.
    #[error("websocket error: {0}")]
    Protocol(String),

    /// The transport closed before producing a result.
    #[error("connection closed")]
    Closed,
}

impl From<reqwest::Error> for NetworkError {
    fn from(err: reqwest::Error) -> Self {
        Self::Request {
            message: err.to_string(),
            is_timeout: err.is_timeout(),
            is_connect: err.is_connect(),
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for NetworkError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Protocol(err.to_string())
    }
}

/// Errors raised while parsing an operation document.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The document is not valid GraphQL.
    #[error("syntax error: {0}")]
    Syntax(String),

    /// The requested operation name is not defined in the document.
    #[error("unknown operation: {0}")]
    UnknownOperation(String),

    /// A fragment spreads itself, directly or through other fragments.
    #[error("fragment {0} spreads itself")]
    FragmentCycle(String),
}

/// Errors raised while building a client.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// Endpoint is not an absolute URL or has no streaming equivalent.
    #[error("invalid endpoint {endpoint}: {reason}")]
    InvalidEndpoint {
        /// Endpoint as configured.
        endpoint: String,
        /// Reason.
        reason: String,
    },

    /// The HTTP client could not be constructed.
    #[error("http client error: {0}")]
    Http(String),
}
