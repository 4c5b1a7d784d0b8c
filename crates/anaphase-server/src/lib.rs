//! HTTP server bootstrap for Anaphase applications.
//!
//! [`start`] binds a listener and serves:
//! - the GraphQL endpoint (`/graphql` by default): POST executes, GET with a
//!   WebSocket upgrade runs subscriptions (`graphql-ws` or
//!   `graphql-transport-ws`), plain GET shows GraphiQL;
//! - any routes added by the `before_graphql` / `after_graphql` hooks;
//! - the page handler for everything else.
//!
//! Every request runs inside a `request` span carrying the service name and
//! the resolved client address.
//!
//! # Example
//!
//! ```rust,no_run
//! use anaphase_server::{schema_builder, start, ServerOptions};
//! use async_graphql::{EmptyMutation, EmptySubscription, Object};
//!
//! struct Query;
//!
//! #[Object]
//! impl Query {
//!     async fn hello(&self) -> &str {
//!         "world"
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), anaphase_server::ServerError> {
//!     let schema = schema_builder(Query, EmptyMutation, EmptySubscription).finish();
//!     start(ServerOptions::new(schema).with_port(3000)).await
//! }
//! ```

#![forbid(unsafe_code)]

mod context;
mod error;
mod graphql;
mod options;
mod pages;
mod panic;
mod proxy;
mod server;

pub use context::{ContextFactory, NoContext, RequestInfo};
pub use error::ServerError;
pub use graphql::playground;
pub use options::{RouterHook, ServerOptions, DEFAULT_GRAPHQL_PATH};
pub use pages::{NotFound, PageHandler, PageRequest};
pub use panic::install_panic_hook;
pub use proxy::{client_ip, ClientIp, RequestId, FORWARDED_FOR, REQUEST_ID};
pub use server::{bind, build_router, schema_builder, start, BoundServer};
