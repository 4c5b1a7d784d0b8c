//! Server options.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use anaphase_core::{AnaphaseConfig, DEFAULT_PORT};
use anaphase_logger::DEFAULT_SERVICE_NAME;
use async_graphql::Executor;
use axum::Router;

use crate::context::{ContextFactory, NoContext};
use crate::pages::{NotFound, PageHandler};

/// Path the GraphQL endpoint is mounted at unless overridden.
pub const DEFAULT_GRAPHQL_PATH: &str = "/graphql";

/// Customizes the router around the GraphQL endpoint.
pub type RouterHook = Box<dyn FnOnce(Router) -> Router + Send>;

/// Options for [`start`](crate::start) and [`bind`](crate::bind).
pub struct ServerOptions<E> {
    pub(crate) host: IpAddr,
    pub(crate) port: u16,
    pub(crate) trust_proxy: bool,
    pub(crate) graphql_path: String,
    pub(crate) service_name: String,
    pub(crate) executor: E,
    pub(crate) context: Arc<dyn ContextFactory>,
    pub(crate) pages: Arc<dyn PageHandler>,
    pub(crate) before_graphql: Vec<RouterHook>,
    pub(crate) after_graphql: Vec<RouterHook>,
}

impl<E: Executor> ServerOptions<E> {
    /// Options serving `executor` on all interfaces at the default port.
    pub fn new(executor: E) -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            trust_proxy: true,
            graphql_path: DEFAULT_GRAPHQL_PATH.to_string(),
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            executor,
            context: Arc::new(NoContext),
            pages: Arc::new(NotFound),
            before_graphql: Vec::new(),
            after_graphql: Vec::new(),
        }
    }

    /// Options taking port, proxy trust and service name from configuration.
    pub fn from_config(config: &AnaphaseConfig, executor: E) -> Self {
        Self::new(executor)
            .with_port(config.server.port)
            .with_trust_proxy(config.server.trust_proxy)
            .with_service_name(config.logging.service_name.clone())
    }

    /// Set the interface to listen on.
    pub fn with_host(mut self, host: IpAddr) -> Self {
        self.host = host;
        self
    }

    /// Set the port. `0` picks a free port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Trust one reverse-proxy hop when resolving the client address.
    pub fn with_trust_proxy(mut self, trust: bool) -> Self {
        self.trust_proxy = trust;
        self
    }

    /// Mount the GraphQL endpoint at another path.
    pub fn with_graphql_path(mut self, path: impl Into<String>) -> Self {
        self.graphql_path = path.into();
        self
    }

    /// Service name attached to request spans.
    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = name.into();
        self
    }

    /// Set the context factory.
    pub fn with_context<C: ContextFactory>(mut self, context: C) -> Self {
        self.context = Arc::new(context);
        self
    }

    /// Set the handler for every route not otherwise matched.
    pub fn with_pages<P: PageHandler>(mut self, pages: P) -> Self {
        self.pages = Arc::new(pages);
        self
    }

    /// Customize the router before the GraphQL endpoint is mounted.
    ///
    /// Layers added here wrap only the routes added here.
    pub fn before_graphql<F>(mut self, hook: F) -> Self
    where
        F: FnOnce(Router) -> Router + Send + 'static,
    {
        self.before_graphql.push(Box::new(hook));
        self
    }

    /// Customize the router after the GraphQL endpoint is mounted.
    ///
    /// Layers added here also wrap the GraphQL endpoint.
    pub fn after_graphql<F>(mut self, hook: F) -> Self
    where
        F: FnOnce(Router) -> Router + Send + 'static,
    {
        self.after_graphql.push(Box::new(hook));
        self
    }

    /// Address the server will bind.
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Path of the GraphQL endpoint.
    pub fn graphql_path(&self) -> &str {
        &self.graphql_path
    }
}

impl<E> std::fmt::Debug for ServerOptions<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerOptions")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("trust_proxy", &self.trust_proxy)
            .field("graphql_path", &self.graphql_path)
            .field("service_name", &self.service_name)
            .field("before_graphql", &self.before_graphql.len())
            .field("after_graphql", &self.after_graphql.len())
            .finish()
    }
}
