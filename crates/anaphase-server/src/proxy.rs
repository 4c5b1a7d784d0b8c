//! Client address resolution and the per-request span.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use http::HeaderMap;
use tracing::Instrument;
use uuid::Uuid;

/// Header carrying the client chain added by reverse proxies.
pub const FORWARDED_FOR: &str = "x-forwarded-for";

/// Header carrying a caller-supplied request id.
pub const REQUEST_ID: &str = "x-request-id";

/// Resolved client address, stored as a request extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientIp(pub Option<IpAddr>);

/// Request id, stored as a request extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

/// Client address for a request.
///
/// With `trust_proxy`, one proxy hop is trusted: the right-most
/// `X-Forwarded-For` entry wins. Otherwise, or when the header is missing or
/// unparseable, the socket peer is used.
pub fn client_ip(headers: &HeaderMap, peer: Option<IpAddr>, trust_proxy: bool) -> Option<IpAddr> {
    if !trust_proxy {
        return peer;
    }

    headers
        .get_all(FORWARDED_FOR)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .last()
        .and_then(|entry| entry.parse().ok())
        .or(peer)
}

#[derive(Debug, Clone)]
pub(crate) struct SpanState {
    pub(crate) service: Arc<str>,
    pub(crate) trust_proxy: bool,
}

/// Resolves the client address and runs the rest of the stack inside a
/// `request` span carrying the service name.
pub(crate) async fn request_span(
    State(state): State<SpanState>,
    mut request: Request,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let ip = client_ip(request.headers(), peer, state.trust_proxy);
    let request_id = request
        .headers()
        .get(REQUEST_ID)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map_or_else(|| Uuid::new_v4().simple().to_string(), str::to_string);

    let span = tracing::info_span!(
        "request",
        service = %state.service,
        request_id = %request_id,
        method = %request.method(),
        path = %request.uri().path(),
        client_ip = ?ip
    );

    request.extensions_mut().insert(ClientIp(ip));
    request.extensions_mut().insert(RequestId(request_id));

    let response = next.run(request).instrument(span.clone()).await;
    span.in_scope(|| tracing::debug!(status = response.status().as_u16(), "request completed"));
    response
}
