//! Per-request GraphQL context.

use std::net::IpAddr;

use async_graphql::Data;
use async_trait::async_trait;
use http::{HeaderMap, Method, Uri};

/// What the server knows about an incoming request.
///
/// Inserted into every operation's context data, so resolvers can read it
/// with `ctx.data::<RequestInfo>()`.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    /// Id attached to the request span.
    pub request_id: String,
    /// HTTP method.
    pub method: Method,
    /// Request URI.
    pub uri: Uri,
    /// Request headers.
    pub headers: HeaderMap,
    /// Client address, after proxy resolution.
    pub client_ip: Option<IpAddr>,
    /// `connection_init` payload, for WebSocket connections.
    pub connection_params: Option<serde_json::Value>,
}

impl RequestInfo {
    /// Header value as a string, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }
}

/// Builds the context data for each GraphQL operation.
///
/// For HTTP this runs once per request; for WebSocket connections once per
/// connection, when the client sends `connection_init`.
#[async_trait]
pub trait ContextFactory: Send + Sync + 'static {
    /// Add context entries for the request. An error rejects the operation.
    async fn extend(&self, request: &RequestInfo, data: &mut Data) -> async_graphql::Result<()>;
}

/// Factory that adds nothing beyond [`RequestInfo`].
#[derive(Debug, Clone, Copy, Default)]
pub struct NoContext;

#[async_trait]
impl ContextFactory for NoContext {
    async fn extend(&self, _request: &RequestInfo, _data: &mut Data) -> async_graphql::Result<()> {
        Ok(())
    }
}

/// Context data for one operation: [`RequestInfo`] plus the factory's entries.
pub(crate) async fn build_data(
    factory: &dyn ContextFactory,
    request: &RequestInfo,
) -> async_graphql::Result<Data> {
    let mut data = Data::default();
    data.insert(request.clone());
    factory.extend(request, &mut data).await?;
    Ok(data)
}
