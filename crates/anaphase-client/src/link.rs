//! Request pipeline: header injection, error observation, transport dispatch.
//!
//! The stage order is fixed by [`Pipeline::execute`].

use std::sync::Arc;

use futures::StreamExt;

use crate::error::{GraphqlError, NetworkError};
use crate::operation::{GraphqlResponse, Headers, Operation};
use crate::transport::{ResultStream, TransportSplit};

/// Callback invoked once per GraphQL error.
pub type GraphqlErrorHook = Arc<dyn Fn(&GraphqlError) + Send + Sync>;

/// Callback invoked once per transport failure.
pub type NetworkErrorHook = Arc<dyn Fn(&NetworkError) + Send + Sync>;

/// Merge contextual headers with the fixed set.
///
/// Names compare case-insensitively and the fixed set wins on collision.
pub fn merge_headers(contextual: &Headers, fixed: &Headers) -> Headers {
    let mut merged: Headers = contextual
        .iter()
        .filter(|(name, _)| !fixed.keys().any(|key| key.eq_ignore_ascii_case(name)))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();
    merged.extend(fixed.iter().map(|(name, value)| (name.clone(), value.clone())));
    merged
}

/// Injects the static header set into every operation.
#[derive(Debug, Clone, Default)]
pub struct HeaderLink {
    headers: Headers,
}

impl HeaderLink {
    /// Create a header stage.
    pub fn new(headers: Headers) -> Self {
        Self { headers }
    }

    /// Static headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Write the merged header set into the operation context.
    pub fn apply(&self, mut operation: Operation) -> Operation {
        let merged = merge_headers(&operation.context().headers, &self.headers);
        operation.context_mut().headers = merged;
        operation
    }
}

/// Observes results without altering them.
#[derive(Clone, Default)]
pub struct ErrorLink {
    on_graphql_error: Option<GraphqlErrorHook>,
    on_network_error: Option<NetworkErrorHook>,
}

impl ErrorLink {
    /// Create an observer with no hooks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the GraphQL error hook.
    pub fn with_graphql_hook(mut self, hook: GraphqlErrorHook) -> Self {
        self.on_graphql_error = Some(hook);
        self
    }

    /// Set the network error hook.
    pub fn with_network_hook(mut self, hook: NetworkErrorHook) -> Self {
        self.on_network_error = Some(hook);
        self
    }

    fn inspect(&self, item: &Result<GraphqlResponse, NetworkError>) {
        match item {
            Ok(response) => {
                if let Some(hook) = &self.on_graphql_error {
                    response.errors.iter().for_each(|error| hook(error));
                }
            }
            Err(error) => {
                if let Some(hook) = &self.on_network_error {
                    hook(error);
                }
            }
        }
    }

    /// Wrap a result stream, calling the hooks for each item as it passes.
    pub fn observe(&self, results: ResultStream) -> ResultStream {
        let observer = self.clone();
        results.inspect(move |item| observer.inspect(item)).boxed()
    }
}

impl std::fmt::Debug for ErrorLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorLink")
            .field("on_graphql_error", &self.on_graphql_error.is_some())
            .field("on_network_error", &self.on_network_error.is_some())
            .finish()
    }
}

/// The assembled request pipeline.
#[derive(Debug, Clone)]
pub struct Pipeline {
    headers: HeaderLink,
    errors: ErrorLink,
    transports: TransportSplit,
}

impl Pipeline {
    /// Assemble the stages.
    pub fn new(headers: HeaderLink, errors: ErrorLink, transports: TransportSplit) -> Self {
        Self {
            headers,
            errors,
            transports,
        }
    }

    /// Transport split at the end of the pipeline.
    pub fn transports(&self) -> &TransportSplit {
        &self.transports
    }

    /// Run an operation through every stage.
    pub fn execute(&self, operation: Operation) -> ResultStream {
        let operation = self.headers.apply(operation);
        tracing::debug!(
            kind = %operation.kind(),
            operation_name = operation.operation_name().unwrap_or_default(),
            transport = ?self.transports.select(&operation),
            "dispatching operation"
        );
        self.errors.observe(self.transports.route(operation))
    }

    /// Run an operation and wait for its first result.
    pub async fn dispatch(&self, operation: Operation) -> Result<GraphqlResponse, NetworkError> {
        self.execute(operation)
            .next()
            .await
            .unwrap_or(Err(NetworkError::Closed))
    }
}
