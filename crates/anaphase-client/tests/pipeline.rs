use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use anaphase_client::{
    CacheSnapshot, Client, ClientConfig, Environment, FetchPolicy, NetworkError, Operation,
};

fn counter() -> Arc<AtomicUsize> {
    Arc::new(AtomicUsize::new(0))
}

fn config(server: &MockServer, graphql: &Arc<AtomicUsize>, network: &Arc<AtomicUsize>) -> ClientConfig {
    let graphql = graphql.clone();
    let network = network.clone();
    ClientConfig::new(format!("{}/api/v1/graphql", server.uri()))
        .with_environment(Environment::Server)
        .on_graphql_error(move |_| {
            graphql.fetch_add(1, Ordering::SeqCst);
        })
        .on_network_error(move |_| {
            network.fetch_add(1, Ordering::SeqCst);
        })
}

#[tokio::test]
async fn test_graphql_errors_reported_once_each() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/graphql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"viewer": null},
            "errors": [
                {"message": "unauthorized", "path": ["viewer"]},
                {"message": "rate limited"}
            ]
        })))
        .mount(&server)
        .await;

    let graphql = counter();
    let network = counter();
    let client = Client::build(config(&server, &graphql, &network)).unwrap();

    let response = client
        .query(Operation::parse("{ viewer { id } }").unwrap(), FetchPolicy::CacheFirst)
        .await
        .unwrap();

    assert_eq!(response.errors.len(), 2);
    assert_eq!(response.data, Some(json!({"viewer": null})));
    assert_eq!(graphql.load(Ordering::SeqCst), 2);
    assert_eq!(network.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_http_500_rejects_and_reports_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/graphql"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let graphql = counter();
    let network = counter();
    let client = Client::build(config(&server, &graphql, &network)).unwrap();

    let err = client
        .query(Operation::parse("{ viewer { id } }").unwrap(), FetchPolicy::CacheFirst)
        .await
        .unwrap_err();

    assert_eq!(
        err,
        NetworkError::Status {
            status: 500,
            body: "boom".to_string()
        }
    );
    assert_eq!(network.load(Ordering::SeqCst), 1);
    assert_eq!(graphql.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_connection_refused_rejects_and_reports_once() {
    let graphql = counter();
    let network = counter();
    let hook = network.clone();
    let config = ClientConfig::new("http://127.0.0.1:9/api/v1/graphql")
        .with_environment(Environment::Server)
        .on_network_error(move |_| {
            hook.fetch_add(1, Ordering::SeqCst);
        });
    let client = Client::build(config).unwrap();

    let err = client
        .mutate(Operation::parse("mutation { save }").unwrap())
        .await
        .unwrap_err();

    assert!(matches!(err, NetworkError::Request { .. }));
    assert_eq!(network.load(Ordering::SeqCst), 1);
    assert_eq!(graphql.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_malformed_body_is_network_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
        .mount(&server)
        .await;

    let graphql = counter();
    let network = counter();
    let client = Client::build(config(&server, &graphql, &network)).unwrap();

    let err = client
        .query(Operation::parse("{ a }").unwrap(), FetchPolicy::NetworkOnly)
        .await
        .unwrap_err();

    assert!(matches!(err, NetworkError::Parse { .. }));
    assert_eq!(network.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_server_subscription_goes_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/graphql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"priceChanged": 12}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let graphql = counter();
    let network = counter();
    let client = Client::build(config(&server, &graphql, &network)).unwrap();

    let mut events = client.subscribe(Operation::parse("subscription { priceChanged }").unwrap());
    let first = events.next().await.unwrap().unwrap();

    assert_eq!(first.data, Some(json!({"priceChanged": 12})));
    assert!(events.next().await.is_none());
}

#[tokio::test]
async fn test_ssr_repeated_query_fetched_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/graphql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"product": {"__typename": "Product", "id": "p1", "name": "Lamp"}}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let graphql = counter();
    let network = counter();
    let client = Client::build(config(&server, &graphql, &network)).unwrap();
    let query = || {
        Operation::parse("query P($id: ID!) { product(id: $id) { __typename id name } }")
            .unwrap()
            .with_variable("id", "p1")
    };

    let first = client.query(query(), FetchPolicy::NetworkOnly).await.unwrap();
    let second = client.query(query(), FetchPolicy::NetworkOnly).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(client.read_entity("Product:p1").unwrap()["name"], "Lamp");
}

#[tokio::test]
async fn test_static_header_wins_over_contextual() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header("authorization", "Bearer static"))
        .and(header("x-request-id", "r-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"a": 1}})))
        .expect(1)
        .mount(&server)
        .await;

    let graphql = counter();
    let network = counter();
    let client = Client::build(
        config(&server, &graphql, &network).with_header("Authorization", "Bearer static"),
    )
    .unwrap();

    let operation = Operation::parse("{ a }")
        .unwrap()
        .with_header("authorization", "Bearer contextual")
        .with_header("x-request-id", "r-1");
    let response = client.query(operation, FetchPolicy::NetworkOnly).await.unwrap();

    assert_eq!(response.data, Some(json!({"a": 1})));
}

#[tokio::test]
async fn test_hydrated_client_matches_snapshot() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"viewer": {"__typename": "User", "id": "u1", "name": "Ada"}}
        })))
        .mount(&server)
        .await;

    let graphql = counter();
    let network = counter();
    let server_client = Client::build(config(&server, &graphql, &network)).unwrap();
    server_client
        .query(
            Operation::parse("{ viewer { __typename id name } }").unwrap(),
            FetchPolicy::CacheFirst,
        )
        .await
        .unwrap();
    let snapshot = server_client.extract();

    let wire = serde_json::to_string(&snapshot).unwrap();
    let restored: CacheSnapshot = serde_json::from_str(&wire).unwrap();
    let hydrate = |state: CacheSnapshot| {
        Client::build(
            ClientConfig::new(format!("{}/api/v1/graphql", server.uri()))
                .with_environment(Environment::Browser)
                .with_initial_state(state),
        )
        .unwrap()
    };
    let browser = hydrate(restored.clone());
    let second = hydrate(restored);

    assert_eq!(browser.extract(), snapshot);
    assert_eq!(second.extract(), snapshot);
    assert_eq!(browser.read_entity("User:u1").unwrap()["name"], "Ada");
    assert_eq!(browser.read_entity("User:u1"), second.read_entity("User:u1"));
}
