//! Router assembly, binding and serving.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use async_graphql::extensions::ApolloTracing;
use async_graphql::{Executor, ObjectType, Schema, SchemaBuilder, SubscriptionType};
use axum::extract::Request;
use axum::routing::get;
use axum::{middleware, Router};
use tokio::net::TcpListener;

use crate::error::ServerError;
use crate::graphql::{self, GraphqlState};
use crate::options::ServerOptions;
use crate::pages::{PageHandler, PageRequest};
use crate::panic::install_panic_hook;
use crate::proxy::{request_span, SpanState};

/// Schema builder with Apollo tracing enabled.
pub fn schema_builder<Q, M, S>(query: Q, mutation: M, subscription: S) -> SchemaBuilder<Q, M, S>
where
    Q: ObjectType + 'static,
    M: ObjectType + 'static,
    S: SubscriptionType + 'static,
{
    Schema::build(query, mutation, subscription).extension(ApolloTracing)
}

/// Assemble the application router.
///
/// Order: `before_graphql` hooks, the GraphQL endpoint, `after_graphql`
/// hooks, then the page fallback. The request span wraps everything.
pub fn build_router<E: Executor>(options: ServerOptions<E>) -> Router {
    let ServerOptions {
        trust_proxy,
        graphql_path,
        service_name,
        executor,
        context,
        pages,
        before_graphql,
        after_graphql,
        ..
    } = options;

    let mut router = Router::new();
    for hook in before_graphql {
        router = hook(router);
    }

    let state = GraphqlState {
        executor,
        context,
        path: Arc::from(graphql_path.as_str()),
    };
    router = router.route(
        &graphql_path,
        get(graphql::get::<E>)
            .post(graphql::post::<E>)
            .with_state(state),
    );

    for hook in after_graphql {
        router = hook(router);
    }

    router
        .fallback(move |request: Request| render_page(pages.clone(), request))
        .layer(middleware::from_fn_with_state(
            SpanState {
                service: Arc::from(service_name.as_str()),
                trust_proxy,
            },
            request_span,
        ))
}

async fn render_page(pages: Arc<dyn PageHandler>, request: Request) -> axum::response::Response {
    pages.handle(PageRequest::from_request(&request)).await
}

/// A bound listener, ready to serve.
#[derive(Debug)]
pub struct BoundServer {
    listener: TcpListener,
    router: Router,
    local_addr: SocketAddr,
}

impl BoundServer {
    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serve until the process ends.
    pub async fn serve(self) -> Result<(), ServerError> {
        self.serve_with_shutdown(std::future::pending()).await
    }

    /// Serve until `signal` resolves, then drain open connections.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let service = self
            .router
            .into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(self.listener, service)
            .with_graceful_shutdown(signal)
            .await
            .map_err(ServerError::Serve)
    }
}

/// Bind the listener without serving yet.
pub async fn bind<E: Executor>(options: ServerOptions<E>) -> Result<BoundServer, ServerError> {
    let addr = options.addr();
    let listener = TcpListener::bind(addr).await.map_err(|source| {
        tracing::error!(%addr, error = %source, "failed to bind");
        ServerError::Bind { addr, source }
    })?;
    let local_addr = listener.local_addr().map_err(|source| ServerError::Bind { addr, source })?;

    Ok(BoundServer {
        listener,
        router: build_router(options),
        local_addr,
    })
}

/// Install the panic hook, bind and serve.
///
/// Failing to bind is fatal for the process: the error is logged and
/// returned as [`ServerError::Bind`] before anything is served. Callers are
/// expected to propagate it out of `main` so the process exits non-zero.
///
/// ```rust,no_run
/// # use anaphase_server::{start, ServerError, ServerOptions};
/// # async fn run<E: async_graphql::Executor>(options: ServerOptions<E>) -> Result<(), ServerError> {
/// start(options).await?;
/// # Ok(())
/// # }
/// ```
pub async fn start<E: Executor>(options: ServerOptions<E>) -> Result<(), ServerError> {
    install_panic_hook();
    let graphql_path = options.graphql_path().to_string();
    let server = bind(options).await?;
    tracing::info!(
        graphql = %graphql_path,
        "> Ready on http://localhost:{}",
        server.local_addr().port()
    );
    server.serve().await
}
