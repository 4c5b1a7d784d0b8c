use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use anaphase_client::{Client, ClientConfig, Environment, Operation, WsConfig, SUBPROTOCOL};

/// Accept one connection, echoing the requested sub-protocol.
async fn accept(listener: &TcpListener) -> WebSocketStream<tokio::net::TcpStream> {
    let (stream, _) = listener.accept().await.unwrap();
    tokio_tungstenite::accept_hdr_async(stream, |request: &Request, mut response: Response| {
        let protocol = request
            .headers()
            .get("sec-websocket-protocol")
            .cloned()
            .unwrap_or_else(|| HeaderValue::from_static(SUBPROTOCOL));
        response
            .headers_mut()
            .insert("sec-websocket-protocol", protocol);
        Ok(response)
    })
    .await
    .unwrap()
}

async fn recv_json(socket: &mut WebSocketStream<tokio::net::TcpStream>) -> Value {
    loop {
        match socket.next().await.unwrap().unwrap() {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            _ => continue,
        }
    }
}

async fn send_json(socket: &mut WebSocketStream<tokio::net::TcpStream>, value: Value) {
    socket.send(Message::text(value.to_string())).await.unwrap();
}

async fn browser_client(listener: &TcpListener) -> Client {
    let addr = listener.local_addr().unwrap();
    let config = ClientConfig::new(format!("http://{addr}/api/v1/graphql"))
        .with_environment(Environment::Browser)
        .with_ws_config(
            WsConfig::default()
                .with_connect_timeout(Duration::from_secs(5))
                .with_backoff(Duration::from_millis(10), Duration::from_millis(50)),
        );
    Client::build(config).unwrap()
}

#[tokio::test]
async fn test_subscription_receives_events_until_complete() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let client = browser_client(&listener).await;

    let server = tokio::spawn(async move {
        let mut socket = accept(&listener).await;
        assert_eq!(recv_json(&mut socket).await["type"], "connection_init");
        send_json(&mut socket, json!({"type": "connection_ack"})).await;

        let start = recv_json(&mut socket).await;
        assert_eq!(start["type"], "start");
        assert!(start["payload"]["query"]
            .as_str()
            .unwrap()
            .contains("priceChanged"));
        let id = start["id"].clone();

        send_json(&mut socket, json!({"type": "ka"})).await;
        for price in [10, 11] {
            send_json(
                &mut socket,
                json!({"type": "data", "id": id, "payload": {"data": {"priceChanged": price}}}),
            )
            .await;
        }
        send_json(&mut socket, json!({"type": "complete", "id": id})).await;
        socket
    });

    let events: Vec<_> = client
        .subscribe(Operation::parse("subscription { priceChanged }").unwrap())
        .collect()
        .await;

    let prices: Vec<_> = events
        .into_iter()
        .map(|event| event.unwrap().data.unwrap()["priceChanged"].clone())
        .collect();
    assert_eq!(prices, vec![json!(10), json!(11)]);

    server.await.unwrap();
}

#[tokio::test]
async fn test_dropping_stream_sends_stop() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let client = browser_client(&listener).await;
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let mut socket = accept(&listener).await;
        recv_json(&mut socket).await;
        send_json(&mut socket, json!({"type": "connection_ack"})).await;

        let start = recv_json(&mut socket).await;
        let id = start["id"].clone();
        send_json(
            &mut socket,
            json!({"type": "data", "id": id, "payload": {"data": {"tick": 1}}}),
        )
        .await;

        loop {
            let message = recv_json(&mut socket).await;
            if seen_tx.send(message).is_err() {
                break;
            }
        }
    });

    let mut events = client.subscribe(Operation::parse("subscription { tick }").unwrap());
    let first = events.next().await.unwrap().unwrap();
    assert_eq!(first.data, Some(json!({"tick": 1})));
    drop(events);

    let stop = tokio::time::timeout(Duration::from_secs(5), seen_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stop["type"], "stop");
    assert_eq!(stop["id"], "1");
}

#[tokio::test]
async fn test_error_message_becomes_graphql_errors() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let client = browser_client(&listener).await;

    tokio::spawn(async move {
        let mut socket = accept(&listener).await;
        recv_json(&mut socket).await;
        send_json(&mut socket, json!({"type": "connection_ack"})).await;
        let start = recv_json(&mut socket).await;
        send_json(
            &mut socket,
            json!({"type": "error", "id": start["id"], "payload": [{"message": "forbidden"}]}),
        )
        .await;
        // Hold the socket open until the client hangs up.
        while socket.next().await.is_some() {}
    });

    let events: Vec<_> = client
        .subscribe(Operation::parse("subscription { secret }").unwrap())
        .collect()
        .await;

    assert_eq!(events.len(), 1);
    let response = events[0].as_ref().unwrap();
    assert_eq!(response.errors[0].message, "forbidden");
    assert!(response.data.is_none());
}

#[tokio::test]
async fn test_resubscribes_after_reconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let client = browser_client(&listener).await;

    tokio::spawn(async move {
        // First connection drops right after the subscription starts.
        let mut socket = accept(&listener).await;
        recv_json(&mut socket).await;
        send_json(&mut socket, json!({"type": "connection_ack"})).await;
        let first = recv_json(&mut socket).await;
        assert_eq!(first["type"], "start");
        drop(socket);

        let mut socket = accept(&listener).await;
        recv_json(&mut socket).await;
        send_json(&mut socket, json!({"type": "connection_ack"})).await;
        let again = recv_json(&mut socket).await;
        assert_eq!(again["type"], "start");
        assert_eq!(again["id"], first["id"]);
        send_json(
            &mut socket,
            json!({"type": "data", "id": again["id"], "payload": {"data": {"n": 2}}}),
        )
        .await;
        while socket.next().await.is_some() {}
    });

    let mut events = client.subscribe(Operation::parse("subscription { n }").unwrap());
    let event = tokio::time::timeout(Duration::from_secs(5), events.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    assert_eq!(event.data, Some(json!({"n": 2})));
}
