//! Unary transport: one HTTP POST per operation.

use futures::stream::{self, StreamExt};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use url::Url;

use crate::error::NetworkError;
use crate::operation::{GraphqlResponse, Headers, Operation};
use crate::transport::{ResultStream, Transport, TransportKind};

const MAX_BODY_LEN: usize = 4096;

/// Posts operations as JSON to the GraphQL endpoint.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
    endpoint: Url,
}

impl HttpTransport {
    /// Create a transport with a default HTTP client.
    pub fn new(endpoint: Url) -> Self {
        Self::with_client(reqwest::Client::new(), endpoint)
    }

    /// Create a transport reusing an existing HTTP client.
    pub fn with_client(http: reqwest::Client, endpoint: Url) -> Self {
        Self { http, endpoint }
    }

    /// Endpoint requests are sent to.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    async fn send(
        http: reqwest::Client,
        endpoint: Url,
        operation: Operation,
    ) -> Result<GraphqlResponse, NetworkError> {
        let response = http
            .post(endpoint)
            .headers(header_map(&operation.context().headers))
            .header(CONTENT_TYPE, "application/json")
            .json(&operation.payload())
            .send()
            .await?;

        let status = response.status();
        let bytes = response.bytes().await?;

        if !status.is_success() {
            return Err(NetworkError::Status {
                status: status.as_u16(),
                body: truncate_body(&bytes),
            });
        }

        serde_json::from_slice(&bytes).map_err(|err| NetworkError::Parse {
            message: err.to_string(),
            body: truncate_body(&bytes),
        })
    }
}

impl Transport for HttpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Unary
    }

    fn request(&self, operation: Operation) -> ResultStream {
        let http = self.http.clone();
        let endpoint = self.endpoint.clone();
        stream::once(Self::send(http, endpoint, operation)).boxed()
    }
}

fn header_map(headers: &Headers) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                map.insert(name, value);
            }
            _ => tracing::warn!(header = %name, "skipping invalid request header"),
        }
    }
    map
}

fn truncate_body(bytes: &[u8]) -> String {
    let mut body = String::from_utf8_lossy(bytes).to_string();
    if body.len() > MAX_BODY_LEN {
        let mut cut = MAX_BODY_LEN;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
        body.push('…');
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_body_respects_char_boundary() {
        let body = "é".repeat(MAX_BODY_LEN);
        let truncated = truncate_body(body.as_bytes());

        assert!(truncated.ends_with('…'));
        assert!(truncated.len() <= MAX_BODY_LEN + '…'.len_utf8());
    }

    #[test]
    fn test_header_map_skips_invalid() {
        let mut headers = Headers::new();
        headers.insert("x-ok".to_string(), "yes".to_string());
        headers.insert("bad header".to_string(), "no".to_string());

        let map = header_map(&headers);
        assert_eq!(map.len(), 1);
        assert_eq!(map["x-ok"], "yes");
    }
}
