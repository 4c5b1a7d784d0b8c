//! Transport selection.
//!
//! Every operation is handled by exactly one transport. Subscriptions go to
//! the streaming transport only when the environment can hold a persistent
//! connection; everything else, including subscriptions issued while
//! rendering on the server, goes over the unary transport.

use std::sync::Arc;

use futures::stream::BoxStream;

use crate::error::NetworkError;
use crate::operation::{GraphqlResponse, Operation, OperationKind};

/// Results produced by a transport. Unary transports yield one item.
pub type ResultStream = BoxStream<'static, Result<GraphqlResponse, NetworkError>>;

/// Which transport handles an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// Request/response over HTTP.
    Unary,
    /// Persistent WebSocket connection.
    Streaming,
}

/// Where the client runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Environment {
    /// Rendering a request on the server. One client per request.
    #[default]
    Server,
    /// Interactive environment holding long-lived connections.
    Browser,
}

impl Environment {
    /// Detect the environment of the running process.
    ///
    /// Native processes render on the server; `wasm32` targets run in the browser.
    pub fn detect() -> Self {
        if cfg!(target_arch = "wasm32") {
            Self::Browser
        } else {
            Self::Server
        }
    }

    /// Whether persistent connections can be held open.
    pub fn supports_persistent_connections(self) -> bool {
        matches!(self, Self::Browser)
    }

    /// Server-side rendering mode.
    pub fn is_ssr(self) -> bool {
        matches!(self, Self::Server)
    }
}

/// Pick the transport for an operation kind.
pub fn select_transport(kind: OperationKind, persistent_connections: bool) -> TransportKind {
    match kind {
        OperationKind::Subscription if persistent_connections => TransportKind::Streaming,
        _ => TransportKind::Unary,
    }
}

/// Terminal pipeline stage performing I/O.
pub trait Transport: Send + Sync {
    /// Kind of this transport.
    fn kind(&self) -> TransportKind;

    /// Send an operation. Headers are taken from the operation context.
    fn request(&self, operation: Operation) -> ResultStream;
}

/// Routes operations between a unary and an optional streaming transport.
#[derive(Clone)]
pub struct TransportSplit {
    environment: Environment,
    unary: Arc<dyn Transport>,
    streaming: Option<Arc<dyn Transport>>,
}

impl TransportSplit {
    /// Create a split. The streaming transport is only used in a browser environment.
    pub fn new(
        environment: Environment,
        unary: Arc<dyn Transport>,
        streaming: Option<Arc<dyn Transport>>,
    ) -> Self {
        Self {
            environment,
            unary,
            streaming,
        }
    }

    /// Environment the split was built for.
    pub fn environment(&self) -> Environment {
        self.environment
    }

    /// Transport that will handle `operation`.
    pub fn select(&self, operation: &Operation) -> TransportKind {
        let persistent =
            self.environment.supports_persistent_connections() && self.streaming.is_some();
        select_transport(operation.kind(), persistent)
    }

    /// Forward an operation to the selected transport.
    pub fn route(&self, operation: Operation) -> ResultStream {
        match (self.select(&operation), &self.streaming) {
            (TransportKind::Streaming, Some(streaming)) => streaming.request(operation),
            _ => self.unary.request(operation),
        }
    }
}

impl std::fmt::Debug for TransportSplit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportSplit")
            .field("environment", &self.environment)
            .field("streaming", &self.streaming.is_some())
            .finish()
    }
}
