//! Client factory and the client API.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use url::Url;

use crate::cache::{Cache, CacheSnapshot, Record};
use crate::error::{ClientError, GraphqlError, NetworkError};
use crate::http::HttpTransport;
use crate::link::{ErrorLink, GraphqlErrorHook, HeaderLink, NetworkErrorHook, Pipeline};
use crate::operation::{GraphqlResponse, Headers, Operation};
use crate::transport::{Environment, ResultStream, Transport, TransportSplit};
use crate::ws::{WsConfig, WsTransport};

type SharedResponse = Shared<BoxFuture<'static, Result<GraphqlResponse, NetworkError>>>;

/// How a query consults the cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum FetchPolicy {
    /// Answer from the cache when every selected field is present.
    #[default]
    CacheFirst,
    /// Always fetch, then write the result to the cache.
    NetworkOnly,
    /// Never fetch. Missing data yields an empty response.
    CacheOnly,
    /// Always fetch and leave the cache untouched.
    NoCache,
}

/// Client settings.
#[derive(Clone)]
pub struct ClientConfig {
    /// Absolute URL of the GraphQL endpoint.
    pub graphql_endpoint: String,
    /// Headers attached to every operation. These win over per-request headers.
    pub headers: Headers,
    /// Snapshot restored into the cache at construction.
    pub initial_state: Option<CacheSnapshot>,
    /// Called once per GraphQL error.
    pub on_graphql_error: Option<GraphqlErrorHook>,
    /// Called once per transport failure.
    pub on_network_error: Option<NetworkErrorHook>,
    /// Runtime environment.
    pub environment: Environment,
    /// Streaming transport settings.
    pub ws: WsConfig,
}

impl ClientConfig {
    /// Create a config for an endpoint in the detected environment.
    pub fn new(graphql_endpoint: impl Into<String>) -> Self {
        Self {
            graphql_endpoint: graphql_endpoint.into(),
            headers: Headers::new(),
            initial_state: None,
            on_graphql_error: None,
            on_network_error: None,
            environment: Environment::detect(),
            ws: WsConfig::default(),
        }
    }

    /// Add a static header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Replace the static headers.
    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    /// Set the hydration snapshot.
    pub fn with_initial_state(mut self, snapshot: CacheSnapshot) -> Self {
        self.initial_state = Some(snapshot);
        self
    }

    /// Set the GraphQL error hook.
    pub fn on_graphql_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&GraphqlError) + Send + Sync + 'static,
    {
        self.on_graphql_error = Some(Arc::new(hook));
        self
    }

    /// Set the network error hook.
    pub fn on_network_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&NetworkError) + Send + Sync + 'static,
    {
        self.on_network_error = Some(Arc::new(hook));
        self
    }

    /// Set the environment.
    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    /// Set the streaming transport settings.
    pub fn with_ws_config(mut self, ws: WsConfig) -> Self {
        self.ws = ws;
        self
    }

    /// Bound each streaming connection attempt.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.ws.connect_timeout = timeout;
        self
    }

    /// Enable or disable streaming reconnects.
    pub fn with_reconnect(mut self, reconnect: bool) -> Self {
        self.ws.reconnect = reconnect;
        self
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("graphql_endpoint", &self.graphql_endpoint)
            .field("headers", &self.headers.keys().collect::<Vec<_>>())
            .field("initial_state", &self.initial_state.as_ref().map(CacheSnapshot::len))
            .field("environment", &self.environment)
            .field("ws", &self.ws)
            .finish()
    }
}

/// Derive the streaming endpoint: `http` becomes `ws`, `https` becomes `wss`.
pub fn streaming_endpoint(endpoint: &Url) -> Result<Url, ClientError> {
    let scheme = match endpoint.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(ClientError::InvalidEndpoint {
                endpoint: endpoint.to_string(),
                reason: format!("unsupported scheme {other}"),
            })
        }
    };
    let mut url = endpoint.clone();
    url.set_scheme(scheme)
        .map_err(|()| ClientError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            reason: format!("cannot switch scheme to {scheme}"),
        })?;
    Ok(url)
}

struct Inner {
    endpoint: Url,
    environment: Environment,
    pipeline: Pipeline,
    cache: RwLock<Cache>,
    in_flight: Mutex<HashMap<String, SharedResponse>>,
}

/// GraphQL client: request pipeline plus normalized cache.
///
/// Cheap to clone. On the server build one per request; in the browser keep
/// one for the lifetime of the process.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

impl Client {
    /// Build a client with HTTP and, in the browser, WebSocket transports.
    pub fn build(config: ClientConfig) -> Result<Self, ClientError> {
        let endpoint = parse_endpoint(&config.graphql_endpoint)?;
        let http = reqwest::Client::builder()
            .build()
            .map_err(|err| ClientError::Http(err.to_string()))?;
        let unary: Arc<dyn Transport> = Arc::new(HttpTransport::with_client(http, endpoint.clone()));

        let streaming: Option<Arc<dyn Transport>> =
            if config.environment.supports_persistent_connections() {
                let url = streaming_endpoint(&endpoint)?;
                Some(Arc::new(WsTransport::new(url, config.ws.clone())))
            } else {
                None
            };

        Ok(Self::assemble(config, endpoint, unary, streaming))
    }

    /// Build a client around caller-supplied transports.
    pub fn with_transports(
        config: ClientConfig,
        unary: Arc<dyn Transport>,
        streaming: Option<Arc<dyn Transport>>,
    ) -> Result<Self, ClientError> {
        let endpoint = parse_endpoint(&config.graphql_endpoint)?;
        Ok(Self::assemble(config, endpoint, unary, streaming))
    }

    fn assemble(
        config: ClientConfig,
        endpoint: Url,
        unary: Arc<dyn Transport>,
        streaming: Option<Arc<dyn Transport>>,
    ) -> Self {
        let mut cache = Cache::new();
        if let Some(snapshot) = config.initial_state {
            cache.restore(snapshot);
        }

        let mut errors = ErrorLink::new();
        if let Some(hook) = config.on_graphql_error {
            errors = errors.with_graphql_hook(hook);
        }
        if let Some(hook) = config.on_network_error {
            errors = errors.with_network_hook(hook);
        }

        let streaming = streaming.filter(|_| config.environment.supports_persistent_connections());
        let pipeline = Pipeline::new(
            HeaderLink::new(config.headers),
            errors,
            TransportSplit::new(config.environment, unary, streaming),
        );

        tracing::debug!(
            endpoint = %endpoint,
            environment = ?config.environment,
            records = cache.len(),
            "graphql client created"
        );

        Self {
            inner: Arc::new(Inner {
                endpoint,
                environment: config.environment,
                pipeline,
                cache: RwLock::new(cache),
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// GraphQL endpoint.
    pub fn endpoint(&self) -> &Url {
        &self.inner.endpoint
    }

    /// Environment the client was built for.
    pub fn environment(&self) -> Environment {
        self.inner.environment
    }

    /// Whether the client renders on the server.
    pub fn is_ssr_mode(&self) -> bool {
        self.inner.environment.is_ssr()
    }

    /// The request pipeline.
    pub fn pipeline(&self) -> &Pipeline {
        &self.inner.pipeline
    }

    /// Run a query.
    ///
    /// GraphQL errors come back inside the response; transport failures are `Err`.
    pub async fn query(
        &self,
        operation: Operation,
        policy: FetchPolicy,
    ) -> Result<GraphqlResponse, NetworkError> {
        let policy = self.effective_policy(policy);

        if matches!(policy, FetchPolicy::CacheFirst | FetchPolicy::CacheOnly) {
            if let Some(data) = self.read_query(&operation) {
                tracing::debug!(
                    operation_name = operation.operation_name().unwrap_or_default(),
                    "query served from cache"
                );
                return Ok(GraphqlResponse::from_data(data));
            }
        }
        if policy == FetchPolicy::CacheOnly {
            return Ok(GraphqlResponse::default());
        }

        let response = self.fetch(operation.clone()).await?;
        if policy != FetchPolicy::NoCache {
            self.store(&operation, &response);
        }
        Ok(response)
    }

    /// Run a mutation. Entities in the result are written to the cache.
    pub async fn mutate(&self, operation: Operation) -> Result<GraphqlResponse, NetworkError> {
        let response = self.inner.pipeline.dispatch(operation.clone()).await?;
        self.store(&operation, &response);
        Ok(response)
    }

    /// Start a subscription. Each event is written to the cache as it arrives.
    pub fn subscribe(&self, operation: Operation) -> ResultStream {
        let client = self.clone();
        let stored = operation.clone();
        self.inner
            .pipeline
            .execute(operation)
            .inspect(move |item| {
                if let Ok(response) = item {
                    client.store(&stored, response);
                }
            })
            .boxed()
    }

    /// Read a query from the cache without touching the network.
    pub fn read_query(&self, operation: &Operation) -> Option<Value> {
        self.inner.cache.read().read(operation)
    }

    /// Write data for a query directly into the cache.
    pub fn write_query(&self, operation: &Operation, data: &Value) {
        self.inner.cache.write().write(operation, data);
    }

    /// Read a normalized record, e.g. `Product:42`.
    pub fn read_entity(&self, key: &str) -> Option<Record> {
        self.inner.cache.read().record(key).cloned()
    }

    /// Snapshot the cache for hydrating the next client.
    pub fn extract(&self) -> CacheSnapshot {
        self.inner.cache.read().extract()
    }

    fn effective_policy(&self, policy: FetchPolicy) -> FetchPolicy {
        match policy {
            FetchPolicy::NetworkOnly if self.is_ssr_mode() => FetchPolicy::CacheFirst,
            other => other,
        }
    }

    fn store(&self, operation: &Operation, response: &GraphqlResponse) {
        if !response.is_ok() {
            return;
        }
        if let Some(data) = &response.data {
            self.inner.cache.write().write(operation, data);
        }
    }

    /// Dispatch through the pipeline, sharing identical in-flight requests.
    async fn fetch(&self, operation: Operation) -> Result<GraphqlResponse, NetworkError> {
        let key = dedup_key(&operation);
        let shared = {
            let mut in_flight = self.inner.in_flight.lock();
            in_flight
                .entry(key.clone())
                .or_insert_with(|| {
                    let pipeline = self.inner.pipeline.clone();
                    async move { pipeline.dispatch(operation).await }
                        .boxed()
                        .shared()
                })
                .clone()
        };

        let result = shared.clone().await;
        self.release(&key, &shared);
        result
    }

    /// Drop the in-flight entry for `key` if it still belongs to `shared`.
    fn release(&self, key: &str, shared: &SharedResponse) {
        let mut in_flight = self.inner.in_flight.lock();
        if in_flight
            .get(key)
            .is_some_and(|current| current.ptr_eq(shared))
        {
            in_flight.remove(key);
        }
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("endpoint", &self.inner.endpoint.as_str())
            .field("environment", &self.inner.environment)
            .field("records", &self.inner.cache.read().len())
            .finish()
    }
}

fn parse_endpoint(endpoint: &str) -> Result<Url, ClientError> {
    Url::parse(endpoint).map_err(|err| ClientError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        reason: err.to_string(),
    })
}

fn dedup_key(operation: &Operation) -> String {
    let headers: BTreeMap<_, _> = operation.context().headers.iter().collect();
    format!("{}|{:?}", operation.payload(), headers)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::stream;
    use serde_json::json;

    use super::*;
    use crate::transport::TransportKind;

    struct Fixed {
        response: GraphqlResponse,
        calls: AtomicUsize,
    }

    impl Transport for Fixed {
        fn kind(&self) -> TransportKind {
            TransportKind::Unary
        }

        fn request(&self, _operation: Operation) -> ResultStream {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let response = self.response.clone();
            Box::pin(stream::once(async move {
                tokio::task::yield_now().await;
                Ok(response)
            }))
        }
    }

    fn client_with(environment: Environment, data: Value) -> (Client, Arc<Fixed>) {
        let transport = Arc::new(Fixed {
            response: GraphqlResponse::from_data(data),
            calls: AtomicUsize::new(0),
        });
        let config =
            ClientConfig::new("http://localhost:3000/api/v1/graphql").with_environment(environment);
        let client = Client::with_transports(config, transport.clone(), None).unwrap();
        (client, transport)
    }

    fn viewer() -> Operation {
        Operation::parse("{ viewer { __typename id name } }").unwrap()
    }

    fn viewer_data() -> Value {
        json!({"viewer": {"__typename": "User", "id": "u1", "name": "Ada"}})
    }

    #[test]
    fn test_streaming_endpoint() {
        let http = Url::parse("http://localhost:3000/api/v1/graphql").unwrap();
        assert_eq!(
            streaming_endpoint(&http).unwrap().as_str(),
            "ws://localhost:3000/api/v1/graphql"
        );

        let https = Url::parse("https://shop.example/api/v1/graphql").unwrap();
        assert_eq!(
            streaming_endpoint(&https).unwrap().as_str(),
            "wss://shop.example/api/v1/graphql"
        );

        let ftp = Url::parse("ftp://example.com/graphql").unwrap();
        assert!(streaming_endpoint(&ftp).is_err());
    }

    #[test]
    fn test_relative_endpoint_rejected() {
        let err = Client::build(ClientConfig::new("/api/v1/graphql")).unwrap_err();
        assert!(matches!(err, ClientError::InvalidEndpoint { .. }));
    }

    #[test]
    fn test_ssr_mode_follows_environment() {
        let (server, _) = client_with(Environment::Server, json!({}));
        let (browser, _) = client_with(Environment::Browser, json!({}));

        assert!(server.is_ssr_mode());
        assert!(!browser.is_ssr_mode());
    }

    #[tokio::test]
    async fn test_cache_first_hits_network_once() {
        let (client, transport) = client_with(Environment::Browser, viewer_data());

        let first = client.query(viewer(), FetchPolicy::CacheFirst).await.unwrap();
        let second = client.query(viewer(), FetchPolicy::CacheFirst).await.unwrap();

        assert_eq!(first.data, Some(viewer_data()));
        assert_eq!(second.data, Some(viewer_data()));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_network_only_in_browser_refetches() {
        let (client, transport) = client_with(Environment::Browser, viewer_data());

        client.query(viewer(), FetchPolicy::NetworkOnly).await.unwrap();
        client.query(viewer(), FetchPolicy::NetworkOnly).await.unwrap();

        assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_network_only_in_ssr_uses_cache() {
        let (client, transport) = client_with(Environment::Server, viewer_data());

        client.query(viewer(), FetchPolicy::NetworkOnly).await.unwrap();
        client.query(viewer(), FetchPolicy::NetworkOnly).await.unwrap();

        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cache_only_never_fetches() {
        let (client, transport) = client_with(Environment::Browser, viewer_data());

        let response = client.query(viewer(), FetchPolicy::CacheOnly).await.unwrap();

        assert_eq!(response.data, None);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_no_cache_leaves_cache_empty() {
        let (client, _) = client_with(Environment::Browser, viewer_data());

        client.query(viewer(), FetchPolicy::NoCache).await.unwrap();

        assert!(client.extract().is_empty());
    }

    #[tokio::test]
    async fn test_mutation_updates_entities() {
        let (client, _) = client_with(
            Environment::Browser,
            json!({"rename": {"__typename": "User", "id": "u1", "name": "Grace"}}),
        );
        client.write_query(&viewer(), &viewer_data());

        let rename = Operation::parse("mutation { rename { __typename id name } }").unwrap();
        client.mutate(rename).await.unwrap();

        assert_eq!(client.read_entity("User:u1").unwrap()["name"], "Grace");
        assert_eq!(
            client.read_query(&viewer()).unwrap()["viewer"]["name"],
            "Grace"
        );
    }

    #[tokio::test]
    async fn test_initial_state_is_restored() {
        let (seed, _) = client_with(Environment::Server, viewer_data());
        seed.query(viewer(), FetchPolicy::CacheFirst).await.unwrap();
        let snapshot = seed.extract();

        let transport = Arc::new(Fixed {
            response: GraphqlResponse::default(),
            calls: AtomicUsize::new(0),
        });
        let config = ClientConfig::new("http://localhost:3000/api/v1/graphql")
            .with_environment(Environment::Browser)
            .with_initial_state(snapshot.clone());
        let client = Client::with_transports(config, transport.clone(), None).unwrap();

        let response = client.query(viewer(), FetchPolicy::CacheFirst).await.unwrap();

        assert_eq!(response.data, Some(viewer_data()));
        assert_eq!(client.extract(), snapshot);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_concurrent_identical_queries_share_request() {
        let (client, transport) = client_with(Environment::Browser, viewer_data());

        let (a, b) = tokio::join!(
            client.query(viewer(), FetchPolicy::NetworkOnly),
            client.query(viewer(), FetchPolicy::NetworkOnly)
        );

        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_late_awaiter_keeps_newer_request() {
        let (client, _) = client_with(Environment::Browser, viewer_data());
        let key = dedup_key(&viewer());
        let finished: SharedResponse = futures::future::ready(Ok(GraphqlResponse::default()))
            .boxed()
            .shared();
        let newer: SharedResponse = futures::future::pending().boxed().shared();
        client
            .inner
            .in_flight
            .lock()
            .insert(key.clone(), newer.clone());

        client.release(&key, &finished);
        assert!(client.inner.in_flight.lock().contains_key(&key));

        client.release(&key, &newer);
        assert!(client.inner.in_flight.lock().is_empty());
    }

    #[tokio::test]
    async fn test_in_flight_entry_cleared_after_fetch() {
        let (client, _) = client_with(Environment::Browser, viewer_data());
        client
            .query(viewer(), FetchPolicy::NetworkOnly)
            .await
            .unwrap();
        assert!(client.inner.in_flight.lock().is_empty());
    }
}
