//! Per-request GraphQL client construction.

use std::sync::Arc;

use anaphase_client::{
    CacheSnapshot, Client, ClientConfig, ClientError, Environment, GraphqlError, Headers,
    NetworkError,
};

use crate::reporter::{ErrorReporter, Extras};

/// Path of the GraphQL endpoint served by the application.
pub const DEFAULT_GRAPHQL_PATH: &str = "/api/v1/graphql";

/// Port used when `PORT` is unset.
pub const DEFAULT_PORT: u16 = 3000;

/// Where the client being built will run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderTarget {
    /// Rendering on the server, talking to the local listener.
    Server {
        /// Local port.
        port: u16,
    },
    /// Running in the browser.
    Browser {
        /// Page origin, e.g. `https://shop.example`.
        origin: String,
    },
}

impl RenderTarget {
    /// Server target using `PORT` from the environment.
    pub fn server_from_env() -> Self {
        Self::server_with(|key| std::env::var(key).ok())
    }

    /// Server target using `PORT` from the given lookup.
    pub fn server_with<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let port = lookup("PORT")
            .and_then(|port| port.parse().ok())
            .unwrap_or(DEFAULT_PORT);
        Self::Server { port }
    }

    /// Client environment for this target.
    pub fn environment(&self) -> Environment {
        match self {
            Self::Server { .. } => Environment::Server,
            Self::Browser { .. } => Environment::Browser,
        }
    }

    /// GraphQL endpoint for this target.
    pub fn graphql_endpoint(&self, path: &str) -> String {
        match self {
            Self::Server { port } => format!("http://localhost:{port}{path}"),
            Self::Browser { origin } => format!("{}{path}", origin.trim_end_matches('/')),
        }
    }
}

/// Builds clients whose errors go to the reporter and the log.
#[derive(Clone)]
pub struct RequestClient {
    target: RenderTarget,
    graphql_path: String,
    reporter: Arc<dyn ErrorReporter>,
}

impl RequestClient {
    /// Create a builder for a target.
    pub fn new(target: RenderTarget, reporter: Arc<dyn ErrorReporter>) -> Self {
        Self {
            target,
            graphql_path: DEFAULT_GRAPHQL_PATH.to_string(),
            reporter,
        }
    }

    /// Override the GraphQL path.
    pub fn with_graphql_path(mut self, path: impl Into<String>) -> Self {
        self.graphql_path = path.into();
        self
    }

    /// Endpoint the clients will use.
    pub fn endpoint(&self) -> String {
        self.target.graphql_endpoint(&self.graphql_path)
    }

    /// Client configuration with the reporting hooks installed.
    pub fn config(&self, headers: Headers, initial_state: Option<CacheSnapshot>) -> ClientConfig {
        let graphql_reporter = self.reporter.clone();
        let network_reporter = self.reporter.clone();

        let mut config = ClientConfig::new(self.endpoint())
            .with_environment(self.target.environment())
            .with_headers(headers)
            .on_graphql_error(move |error| report_graphql_error(graphql_reporter.as_ref(), error))
            .on_network_error(move |error| report_network_error(network_reporter.as_ref(), error));
        if let Some(snapshot) = initial_state {
            config = config.with_initial_state(snapshot);
        }
        config
    }

    /// Build a client for one request.
    pub fn build(
        &self,
        headers: Headers,
        initial_state: Option<CacheSnapshot>,
    ) -> Result<Client, ClientError> {
        Client::build(self.config(headers, initial_state))
    }
}

impl std::fmt::Debug for RequestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestClient")
            .field("target", &self.target)
            .field("graphql_path", &self.graphql_path)
            .finish()
    }
}

/// Build a client for one request with the default GraphQL path.
pub fn client_for_request(
    target: &RenderTarget,
    headers: Headers,
    initial_state: Option<CacheSnapshot>,
    reporter: Arc<dyn ErrorReporter>,
) -> Result<Client, ClientError> {
    RequestClient::new(target.clone(), reporter).build(headers, initial_state)
}

fn report_graphql_error(reporter: &dyn ErrorReporter, error: &GraphqlError) {
    let mut extras = Extras::new();
    extras.insert("kind".to_string(), "graphql".to_string());
    extras.insert("path".to_string(), error.path_display());
    reporter.capture(error, &extras);
    tracing::error!(
        "[GraphQL error]: Message: {}, Location: {}, Path: {}",
        error.message,
        error.locations_display(),
        error.path_display()
    );
}

fn report_network_error(reporter: &dyn ErrorReporter, error: &NetworkError) {
    let mut extras = Extras::new();
    extras.insert("kind".to_string(), "network".to_string());
    reporter.capture(error, &extras);
    tracing::error!("[Network error]: {error}");
}
