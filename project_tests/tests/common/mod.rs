//! Mock ESP WebSocket server and HTTP services shared by the integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use lib_esp::plugin::{DatasourceJsonData, DatasourceSettings};
use lib_esp::retrieve::ApiClientOptions;
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::protocol::Message;

pub type EspSocket = WebSocketStream<TcpStream>;

pub const PROJECT: &str = "p";

/// Accepts one WebSocket connection and hands it to `script`.
pub async fn spawn_esp<F, Fut>(script: F) -> SocketAddr
where
    F: FnOnce(EspSocket) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        script(ws).await;
    });

    addr
}

/// Spawns an axum app on an ephemeral port.
pub async fn spawn_http(app: axum::Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// An address nothing listens on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

pub fn settings(url: &str, json_data: DatasourceJsonData) -> DatasourceSettings {
    DatasourceSettings {
        uid: "esp-test".to_string(),
        url: url.to_string(),
        json_data,
    }
}

pub fn no_retry() -> ApiClientOptions {
    ApiClientOptions {
        max_retries: 0,
        ..ApiClientOptions::default()
    }
}

pub fn query_model(esp: SocketAddr) -> Value {
    json!({
        "refId": "A",
        "internalServerUrl": format!("ws://{}", esp),
        "externalServerUrl": format!("ws://{}", esp),
        "projectName": PROJECT,
        "cqName": "cq",
        "windowName": "w",
        "intervalMs": 100,
        "maxDataPoints": 10
    })
}

pub async fn handshake(ws: &mut EspSocket) {
    ws.send(Message::Text("status: 200\nok".to_string().into())).await.unwrap();
}

/// Waits for the next `event-stream` request and returns its body.
pub async fn next_subscription(ws: &mut EspSocket) -> Value {
    while let Some(msg) = ws.next().await {
        if let Message::Text(text) = msg.unwrap() {
            let value: Value = serde_json::from_str(text.as_str()).unwrap();
            return value["event-stream"].clone();
        }
    }
    panic!("socket closed before a subscription arrived");
}

pub async fn send_json(ws: &mut EspSocket, value: Value) {
    ws.send(Message::Text(value.to_string().into())).await.unwrap();
}

pub async fn send_cbor(ws: &mut EspSocket, value: Value) {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(&value, &mut buf).unwrap();
    ws.send(Message::Binary(buf.into())).await.unwrap();
}

pub async fn send_schema(ws: &mut EspSocket, id: &str) {
    send_json(
        ws,
        json!({"schema": {"@id": id, "@window": "p/cq/w", "fields": [
            {"@key": "true", "@name": "id", "@type": "int64"},
            {"@key": "false", "@name": "price", "@type": "double"}
        ]}}),
    )
    .await;
}

pub async fn send_events(ws: &mut EspSocket, id: &str, rows: &[(i64, f64)]) {
    let entries: Vec<Value> = rows
        .iter()
        .map(|(key, price)| json!({"@timestamp": 1_700_000_000_000_000i64, "@opcode": "insert", "id": key, "price": price}))
        .collect();
    send_cbor(ws, json!({"events": {"@id": id, "entries": entries}})).await;
}

/// Keeps the socket open until the peer goes away.
pub async fn drain(mut ws: EspSocket) {
    while let Some(Ok(_)) = ws.next().await {}
}

/// Handshake, one subscription, its schema and two events, then idle.
pub async fn serve_two_events(mut ws: EspSocket) {
    handshake(&mut ws).await;
    let subscription = next_subscription(&mut ws).await;
    let id = subscription["id"].as_str().unwrap().to_string();
    send_schema(&mut ws, &id).await;
    send_events(&mut ws, &id, &[(1, 10.5), (2, 20.25)]).await;
    drain(ws).await;
}
