//! The GraphQL endpoint: POST execution, WebSocket subscriptions, GraphiQL.

use std::borrow::Cow;
use std::str::FromStr;
use std::sync::Arc;

use async_graphql::http::{
    GraphiQLSource, WebSocket, WebSocketProtocols, WsMessage, ALL_WEBSOCKET_PROTOCOLS,
};
use async_graphql::{Executor, PathSegment, Pos};
use axum::extract::ws::{CloseFrame, Message, WebSocket as Socket, WebSocketUpgrade};
use axum::extract::{Extension, RawQuery, State};
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use futures::{future, SinkExt, StreamExt};
use http::{header, HeaderMap, Method, StatusCode, Uri};
use tracing::Instrument;

use crate::context::{build_data, ContextFactory, RequestInfo};
use crate::proxy::{ClientIp, RequestId};

/// State shared by the GraphQL handlers.
pub(crate) struct GraphqlState<E> {
    pub(crate) executor: E,
    pub(crate) context: Arc<dyn ContextFactory>,
    pub(crate) path: Arc<str>,
}

impl<E: Clone> Clone for GraphqlState<E> {
    fn clone(&self) -> Self {
        Self {
            executor: self.executor.clone(),
            context: self.context.clone(),
            path: self.path.clone(),
        }
    }
}

/// Request facts extracted once per handler call.
struct Incoming {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    client_ip: Option<ClientIp>,
    request_id: Option<RequestId>,
}

impl Incoming {
    fn into_info(self) -> RequestInfo {
        RequestInfo {
            request_id: self.request_id.map(|id| id.0).unwrap_or_default(),
            method: self.method,
            uri: self.uri,
            headers: self.headers,
            client_ip: self.client_ip.and_then(|ip| ip.0),
            connection_params: None,
        }
    }
}

/// POST: execute one operation.
pub(crate) async fn post<E: Executor>(
    State(state): State<GraphqlState<E>>,
    client_ip: Option<Extension<ClientIp>>,
    request_id: Option<Extension<RequestId>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    Json(request): Json<async_graphql::Request>,
) -> Response {
    let info = Incoming {
        method,
        uri,
        headers,
        client_ip: client_ip.map(|Extension(ip)| ip),
        request_id: request_id.map(|Extension(id)| id),
    }
    .into_info();

    Json(execute(&state, &info, request).await).into_response()
}

/// GET: WebSocket upgrade, a query in the query string, or GraphiQL.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn get<E: Executor>(
    State(state): State<GraphqlState<E>>,
    client_ip: Option<Extension<ClientIp>>,
    request_id: Option<Extension<RequestId>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
    upgrade: Option<WebSocketUpgrade>,
) -> Response {
    let info = Incoming {
        method,
        uri,
        headers,
        client_ip: client_ip.map(|Extension(ip)| ip),
        request_id: request_id.map(|Extension(id)| id),
    }
    .into_info();

    if let Some(upgrade) = upgrade {
        return subscribe(state, info, upgrade);
    }

    match query.filter(|query| !query.is_empty()) {
        Some(query) => match async_graphql::http::parse_query_string(&query) {
            Ok(request) => Json(execute(&state, &info, request).await).into_response(),
            Err(err) => (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
        },
        None => Html(playground(&state.path)).into_response(),
    }
}

/// GraphiQL page pointed at the endpoint, with subscriptions on the same path.
pub fn playground(path: &str) -> String {
    GraphiQLSource::build()
        .endpoint(path)
        .subscription_endpoint(path)
        .finish()
}

async fn execute<E: Executor>(
    state: &GraphqlState<E>,
    info: &RequestInfo,
    mut request: async_graphql::Request,
) -> async_graphql::Response {
    match build_data(state.context.as_ref(), info).await {
        Ok(data) => request.data = data,
        Err(err) => {
            tracing::warn!(error = %err.message, "GraphQL context rejected request");
            return async_graphql::Response::from_errors(vec![err.into_server_error(Pos::default())]);
        }
    }

    let response = state.executor.execute(request).await;
    log_errors(&response);
    response
}

fn log_errors(response: &async_graphql::Response) {
    for error in &response.errors {
        let path = error
            .path
            .iter()
            .map(|segment| match segment {
                PathSegment::Field(name) => name.clone(),
                PathSegment::Index(index) => index.to_string(),
            })
            .collect::<Vec<_>>()
            .join(".");
        tracing::error!(message = %error.message, path = %path, "GraphQL resolver error");
    }
}

/// Subprotocol requested by the client that the server speaks, in the
/// client's order of preference.
pub(crate) fn negotiate_protocol(headers: &HeaderMap) -> Option<WebSocketProtocols> {
    headers
        .get(header::SEC_WEBSOCKET_PROTOCOL)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| {
            value
                .split(',')
                .find_map(|protocol| WebSocketProtocols::from_str(protocol.trim()).ok())
        })
}

fn subscribe<E: Executor>(
    state: GraphqlState<E>,
    info: RequestInfo,
    upgrade: WebSocketUpgrade,
) -> Response {
    let Some(protocol) = negotiate_protocol(&info.headers) else {
        return (
            StatusCode::BAD_REQUEST,
            "unsupported websocket subprotocol",
        )
            .into_response();
    };

    let span = tracing::Span::current();
    upgrade
        .protocols(ALL_WEBSOCKET_PROTOCOLS)
        .on_upgrade(move |socket| serve_socket(state, info, protocol, socket).instrument(span))
}

async fn serve_socket<E: Executor>(
    state: GraphqlState<E>,
    info: RequestInfo,
    protocol: WebSocketProtocols,
    socket: Socket,
) {
    tracing::debug!(protocol = protocol.sec_websocket_protocol(), "subscription connection opened");

    let (mut sink, stream) = socket.split();
    let input = stream
        .take_while(|message| future::ready(matches!(message, Ok(m) if !matches!(m, Message::Close(_)))))
        .filter_map(|message| {
            future::ready(match message {
                Ok(Message::Text(text)) => Some(text.into_bytes()),
                Ok(Message::Binary(bytes)) => Some(bytes),
                _ => None,
            })
        });

    let factory = state.context.clone();
    let connection = WebSocket::new(state.executor.clone(), input, protocol).on_connection_init(
        move |params| async move {
            let info = RequestInfo {
                connection_params: Some(params),
                ..info
            };
            build_data(factory.as_ref(), &info).await
        },
    );
    let mut connection = std::pin::pin!(connection);

    while let Some(message) = connection.next().await {
        let message = match message {
            WsMessage::Text(text) => Message::Text(text),
            WsMessage::Close(code, reason) => Message::Close(Some(CloseFrame {
                code,
                reason: Cow::Owned(reason),
            })),
        };
        if sink.send(message).await.is_err() {
            break;
        }
    }

    tracing::debug!("subscription connection closed");
}

#[cfg(test)]
mod tests {
    use http::HeaderValue;

    use super::*;

    fn with_protocol(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::SEC_WEBSOCKET_PROTOCOL,
            HeaderValue::from_str(value).unwrap(),
        );
        headers
    }

    #[test]
    fn test_negotiates_legacy_protocol() {
        assert_eq!(
            negotiate_protocol(&with_protocol("graphql-ws")),
            Some(WebSocketProtocols::SubscriptionsTransportWS)
        );
    }

    #[test]
    fn test_negotiates_first_supported() {
        assert_eq!(
            negotiate_protocol(&with_protocol("mqtt, graphql-transport-ws, graphql-ws")),
            Some(WebSocketProtocols::GraphQLWS)
        );
    }

    #[test]
    fn test_unsupported_protocol() {
        assert_eq!(negotiate_protocol(&with_protocol("mqtt")), None);
        assert_eq!(negotiate_protocol(&HeaderMap::new()), None);
    }

    #[test]
    fn test_playground_points_at_endpoint() {
        let html = playground("/graphql");
        assert!(html.contains("/graphql"));
    }
}
