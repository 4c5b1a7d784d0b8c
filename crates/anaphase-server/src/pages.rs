//! Page rendering fallback.

use std::future::Future;
use std::net::IpAddr;

use anaphase_core::PageContext;
use async_trait::async_trait;
use axum::extract::Request;
use axum::response::{IntoResponse, Response};
use http::{HeaderMap, Method, StatusCode, Uri};

use crate::proxy::{ClientIp, RequestId};

/// A request that matched no other route.
#[derive(Debug, Clone)]
pub struct PageRequest {
    /// Request id from the request span.
    pub request_id: String,
    /// HTTP method.
    pub method: Method,
    /// Request URI.
    pub uri: Uri,
    /// Request headers.
    pub headers: HeaderMap,
    /// Client address, after proxy resolution.
    pub client_ip: Option<IpAddr>,
}

impl PageRequest {
    pub(crate) fn from_request(request: &Request) -> Self {
        let extensions = request.extensions();
        Self {
            request_id: extensions
                .get::<RequestId>()
                .map(|id| id.0.clone())
                .unwrap_or_default(),
            method: request.method().clone(),
            uri: request.uri().clone(),
            headers: request.headers().clone(),
            client_ip: extensions.get::<ClientIp>().and_then(|ip| ip.0),
        }
    }

    /// Path, query parameters and headers for resolving page props.
    ///
    /// Repeated query keys keep the last value. Headers that are not valid
    /// UTF-8 are dropped.
    pub fn page_context(&self) -> PageContext {
        let mut ctx = PageContext::new(self.uri.path());
        if let Some(query) = self.uri.query() {
            for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
                ctx = ctx.with_query(key, value);
            }
        }
        for (name, value) in &self.headers {
            if let Ok(value) = value.to_str() {
                ctx = ctx.with_header(name.as_str(), value);
            }
        }
        ctx
    }
}

/// Renders every route not claimed by the GraphQL endpoint or the router hooks.
#[async_trait]
pub trait PageHandler: Send + Sync + 'static {
    /// Produce the response for a page request.
    async fn handle(&self, request: PageRequest) -> Response;
}

#[async_trait]
impl<F, Fut, R> PageHandler for F
where
    F: Fn(PageRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send,
    R: IntoResponse,
{
    async fn handle(&self, request: PageRequest) -> Response {
        (self)(request).await.into_response()
    }
}

/// Handler that answers every page with `404 Not Found`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotFound;

#[async_trait]
impl PageHandler for NotFound {
    async fn handle(&self, _request: PageRequest) -> Response {
        (StatusCode::NOT_FOUND, "Not Found").into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_context_from_request() {
        let request = Request::builder()
            .uri("/products?sort=price&tag=new%20in&tag=sale")
            .header("cookie", "session=abc")
            .body(axum::body::Body::empty())
            .unwrap();

        let ctx = PageRequest::from_request(&request).page_context();
        assert_eq!(ctx.path, "/products");
        assert_eq!(ctx.query["sort"], "price");
        assert_eq!(ctx.query["tag"], "sale");
        assert_eq!(ctx.headers["cookie"], "session=abc");
    }

    #[test]
    fn test_extensions_carried_over() {
        let mut request = Request::builder()
            .uri("/")
            .body(axum::body::Body::empty())
            .unwrap();
        request
            .extensions_mut()
            .insert(ClientIp(Some("192.0.2.4".parse().unwrap())));
        request
            .extensions_mut()
            .insert(RequestId("req-1".to_string()));

        let page = PageRequest::from_request(&request);
        assert_eq!(page.request_id, "req-1");
        assert_eq!(page.client_ip, Some("192.0.2.4".parse().unwrap()));
    }
}
