//! Anaphase GraphQL client.
//!
//! This crate provides:
//! - Parsed operations and GraphQL responses.
//! - A request pipeline: header injection, error observation, transport dispatch.
//! - Transport selection between HTTP and a shared WebSocket connection.
//! - A normalized cache with snapshot hydration.

#![forbid(unsafe_code)]
#![allow(clippy::module_name_repetitions)]

mod cache;
mod client;
mod error;
mod http;
mod link;
mod operation;
mod transport;
mod ws;

pub use cache::{identify, Cache, CacheSnapshot, Record, ROOT_MUTATION, ROOT_QUERY, ROOT_SUBSCRIPTION};
pub use client::{streaming_endpoint, Client, ClientConfig, FetchPolicy};
pub use error::{
    ClientError, GraphqlError, GraphqlErrorLocation, GraphqlPathSegment, NetworkError, ParseError,
};
pub use http::HttpTransport;
pub use link::{merge_headers, ErrorLink, GraphqlErrorHook, HeaderLink, NetworkErrorHook, Pipeline};
pub use operation::{
    GraphqlResponse, Headers, Operation, OperationContext, OperationKind, Variables,
};
pub use transport::{
    select_transport, Environment, ResultStream, Transport, TransportKind, TransportSplit,
};
pub use ws::{WsConfig, WsTransport, SUBPROTOCOL};
