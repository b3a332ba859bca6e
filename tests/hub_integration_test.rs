//! End-to-end hub tests over real transports.
//!
//! Each test boots a full hub on ephemeral paths and ports, then drives
//! it exactly the way real clients do: consumers speak NDJSON over the
//! Unix socket, extensions speak JSON text frames over WebSocket, and
//! asset bytes travel over loopback HTTP. These tests verify:
//! - Timed-out calls settle exactly once; late results are dropped
//! - Extension disconnect rejects every call it still owed
//! - Calls without an active extension fail fast, not at the timeout
//! - The upload -> resolve -> download asset path works end to end
//! - A hub with assets disabled still routes tool calls

// Rust guideline compliant 2026-08

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use canvas_hub::assets::asset_hash;
use canvas_hub::{Config, Hub};

const GUARD: Duration = Duration::from_secs(2);

type Ws = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

fn test_config(tmp: &TempDir) -> Config {
    Config {
        runtime_dir: tmp.path().join("run"),
        socket_override: None,
        asset_dir: tmp.path().join("assets"),
        log_dir: tmp.path().join("logs"),
        extension_ports: vec![0],
        tool_timeout: Duration::from_secs(5),
        // Tests that want auto-activation shrink this themselves.
        activation_grace: Duration::from_secs(60),
        max_upload_bytes: 1024 * 1024,
        asset_ttl: Duration::from_secs(3600),
        assets_enabled: true,
    }
}

/// A running hub plus everything a test needs to talk to it.
struct TestHub {
    socket_path: PathBuf,
    port: u16,
    asset_url: Option<String>,
    cancel: CancellationToken,
    run_handle: JoinHandle<anyhow::Result<()>>,
}

async fn boot(config: Config) -> TestHub {
    let socket_path = config.socket_path();
    let (hub, event_rx) = Hub::start(config).await.expect("hub start");
    let port = hub.extension_port();
    let asset_url = hub.asset_server_url().map(str::to_string);
    let cancel = CancellationToken::new();
    let run_handle = tokio::spawn(hub.run(event_rx, cancel.clone()));
    TestHub {
        socket_path,
        port,
        asset_url,
        cancel,
        run_handle,
    }
}

impl TestHub {
    async fn stop(self) {
        self.cancel.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(8), self.run_handle).await;
    }
}

/// One NDJSON consumer connection.
struct Consumer {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Consumer {
    async fn connect(socket_path: &Path) -> Self {
        let stream = UnixStream::connect(socket_path)
            .await
            .expect("consumer connect");
        let (read_half, writer) = stream.into_split();
        Self {
            reader: BufReader::new(read_half),
            writer,
        }
    }

    async fn send(&mut self, request: &Value) {
        let mut line = request.to_string();
        line.push('\n');
        self.writer
            .write_all(line.as_bytes())
            .await
            .expect("send request line");
    }

    async fn recv(&mut self) -> Value {
        let mut line = String::new();
        tokio::time::timeout(GUARD, self.reader.read_line(&mut line))
            .await
            .expect("Timed out waiting for a response line")
            .expect("read response line");
        serde_json::from_str(line.trim()).expect("invalid json from hub")
    }
}

async fn next_json(ws: &mut Ws) -> Value {
    loop {
        let msg = tokio::time::timeout(GUARD, ws.next())
            .await
            .expect("Timed out waiting for ws message")
            .expect("ws closed")
            .expect("ws error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).expect("invalid json from hub");
        }
    }
}

/// Connect an extension and read its `registered` greeting.
async fn extension_connect(port: u16) -> (Ws, String) {
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://127.0.0.1:{port}"))
        .await
        .expect("extension connect");
    let registered = next_json(&mut ws).await;
    assert_eq!(registered["type"], "registered");
    let id = registered["id"].as_str().expect("registered id").to_string();
    (ws, id)
}

/// Request activation and wait for the state broadcast confirming it.
async fn activate(ws: &mut Ws, id: &str) {
    ws.send(Message::Text(r#"{"type":"activate"}"#.to_string()))
        .await
        .expect("send activate");
    loop {
        let msg = next_json(ws).await;
        if msg["type"] == "state" && msg["activeId"] == id {
            return;
        }
    }
}

#[tokio::test]
async fn test_timed_out_call_settles_exactly_once() {
    let tmp = TempDir::new().unwrap();
    let mut config = test_config(&tmp);
    config.tool_timeout = Duration::from_millis(200);
    let hub = boot(config).await;

    let (mut ws, id) = extension_connect(hub.port).await;
    activate(&mut ws, &id).await;

    let mut consumer = Consumer::connect(&hub.socket_path).await;
    consumer
        .send(&json!({"id": "c1", "name": "export_node", "args": {}}))
        .await;

    let call = next_json(&mut ws).await;
    assert_eq!(call["type"], "toolCall");
    let wire_id = call["id"].as_str().unwrap().to_string();

    // The extension never answers, so the consumer gets the timeout.
    let response = consumer.recv().await;
    assert_eq!(response["id"], "c1");
    assert_eq!(response["error"]["code"], "EXTENSION_TIMEOUT");
    assert!(response["error"]["hint"].is_string());

    // A result arriving after the timeout must be dropped, never turned
    // into a second line for the same request.
    ws.send(Message::Text(
        json!({"type": "toolResult", "id": wire_id, "payload": {"late": true}}).to_string(),
    ))
    .await
    .unwrap();

    consumer.send(&json!({"id": "q1", "name": "hub_status"})).await;
    let status = consumer.recv().await;
    assert_eq!(status["id"], "q1", "late result produced an extra line");
    assert_eq!(status["payload"]["pendingCalls"], 0);

    hub.stop().await;
}

#[tokio::test]
async fn test_extension_disconnect_rejects_every_pending_call() {
    let tmp = TempDir::new().unwrap();
    let hub = boot(test_config(&tmp)).await;

    let (mut ws, id) = extension_connect(hub.port).await;
    activate(&mut ws, &id).await;

    let mut consumer = Consumer::connect(&hub.socket_path).await;
    consumer
        .send(&json!({"id": "c1", "name": "export_node", "args": {}}))
        .await;
    let first_call = next_json(&mut ws).await;
    assert_eq!(first_call["type"], "toolCall");
    consumer
        .send(&json!({"id": "c2", "name": "snapshot_scene", "args": {}}))
        .await;
    let second_call = next_json(&mut ws).await;
    assert_eq!(second_call["type"], "toolCall");

    // Both calls are owed when the extension vanishes; with a 5s tool
    // timeout, rejections inside the guard can only come from cleanup.
    drop(ws);

    let first = consumer.recv().await;
    let second = consumer.recv().await;
    let mut ids = [
        first["id"].as_str().unwrap().to_string(),
        second["id"].as_str().unwrap().to_string(),
    ];
    ids.sort();
    assert_eq!(ids, ["c1", "c2"]);
    for response in [&first, &second] {
        assert_eq!(response["error"]["code"], "EXTENSION_DISCONNECTED");
    }

    hub.stop().await;
}

#[tokio::test]
async fn test_call_without_active_extension_fails_fast() {
    let tmp = TempDir::new().unwrap();
    let mut config = test_config(&tmp);
    // The rejection must arrive well inside the guard, not at this bound.
    config.tool_timeout = Duration::from_secs(30);
    let hub = boot(config).await;

    let mut consumer = Consumer::connect(&hub.socket_path).await;
    consumer
        .send(&json!({"id": "c1", "name": "export_node", "args": {}}))
        .await;

    let response = consumer.recv().await;
    assert_eq!(response["id"], "c1");
    assert_eq!(response["error"]["code"], "NO_ACTIVE_EXTENSION");

    // Fail-fast leaves no pending entry behind.
    consumer.send(&json!({"id": "q1", "name": "hub_status"})).await;
    let status = consumer.recv().await;
    assert_eq!(status["payload"]["pendingCalls"], 0);

    hub.stop().await;
}

#[tokio::test]
async fn test_asset_upload_resolve_download_flow() {
    let tmp = TempDir::new().unwrap();
    let hub = boot(test_config(&tmp)).await;
    let base = hub.asset_url.clone().expect("asset server running");
    let client = reqwest::Client::new();

    let payload = b"rendered frame bytes".to_vec();
    let hash = asset_hash(&payload);
    let upload = client
        .post(format!("{base}/assets/{hash}?mime=image/png&width=32&height=16"))
        .body(payload.clone())
        .send()
        .await
        .unwrap();
    assert_eq!(upload.status(), 200);

    let mut consumer = Consumer::connect(&hub.socket_path).await;
    consumer
        .send(&json!({"id": "r1", "name": "resolve_assets", "args": {"hashes": [hash]}}))
        .await;
    let response = consumer.recv().await;
    assert_eq!(response["id"], "r1");
    assert_eq!(response["payload"]["missing"], json!([]));
    let resolved = &response["payload"]["resolved"][0];
    assert_eq!(resolved["hash"], hash);
    assert_eq!(resolved["mime"], "image/png");
    assert_eq!(resolved["width"], 32);
    let url = resolved["url"].as_str().unwrap();
    assert_eq!(url, format!("{base}/assets/{hash}"));

    let download = client.get(url).send().await.unwrap();
    assert_eq!(download.status(), 200);
    assert_eq!(download.bytes().await.unwrap().to_vec(), payload);

    hub.stop().await;
}

#[tokio::test]
async fn test_assets_disabled_hub_still_routes() {
    let tmp = TempDir::new().unwrap();
    let mut config = test_config(&tmp);
    config.assets_enabled = false;
    let hub = boot(config).await;
    assert!(hub.asset_url.is_none());

    let mut consumer = Consumer::connect(&hub.socket_path).await;
    consumer.send(&json!({"id": "q1", "name": "hub_status"})).await;
    let status = consumer.recv().await;
    assert_eq!(status["payload"]["assetServerUrl"], Value::Null);

    consumer
        .send(&json!({"id": "r1", "name": "resolve_assets", "args": {"hashes": []}}))
        .await;
    let response = consumer.recv().await;
    assert_eq!(
        response["error"]["code"],
        "ASSET_SERVER_NOT_CONFIGURED"
    );

    // Proxied routing is unaffected by the disabled subsystem.
    let (mut ws, id) = extension_connect(hub.port).await;
    activate(&mut ws, &id).await;
    consumer
        .send(&json!({"id": "c1", "name": "export_node", "args": {}}))
        .await;
    let call = next_json(&mut ws).await;
    assert_eq!(call["type"], "toolCall");
    let wire_id = call["id"].as_str().unwrap();
    ws.send(Message::Text(
        json!({"type": "toolResult", "id": wire_id, "payload": {"ok": true}}).to_string(),
    ))
    .await
    .unwrap();
    let response = consumer.recv().await;
    assert_eq!(response["id"], "c1");
    assert_eq!(response["payload"]["ok"], true);

    hub.stop().await;
}

#[tokio::test]
async fn test_two_consumers_get_their_own_responses() {
    let tmp = TempDir::new().unwrap();
    let hub = boot(test_config(&tmp)).await;

    let (mut ws, id) = extension_connect(hub.port).await;
    activate(&mut ws, &id).await;

    let mut alpha = Consumer::connect(&hub.socket_path).await;
    let mut beta = Consumer::connect(&hub.socket_path).await;

    alpha
        .send(&json!({"id": "a1", "name": "export_node", "args": {}}))
        .await;
    let alpha_call = next_json(&mut ws).await;
    beta.send(&json!({"id": "b1", "name": "snapshot_scene", "args": {}}))
        .await;
    let beta_call = next_json(&mut ws).await;

    // Answer out of order; each response still lands on its own socket.
    ws.send(Message::Text(
        json!({
            "type": "toolResult",
            "id": beta_call["id"].as_str().unwrap(),
            "payload": {"for": "beta"}
        })
        .to_string(),
    ))
    .await
    .unwrap();
    ws.send(Message::Text(
        json!({
            "type": "toolResult",
            "id": alpha_call["id"].as_str().unwrap(),
            "payload": {"for": "alpha"}
        })
        .to_string(),
    ))
    .await
    .unwrap();

    let beta_response = beta.recv().await;
    assert_eq!(beta_response["id"], "b1");
    assert_eq!(beta_response["payload"]["for"], "beta");

    let alpha_response = alpha.recv().await;
    assert_eq!(alpha_response["id"], "a1");
    assert_eq!(alpha_response["payload"]["for"], "alpha");

    hub.stop().await;
}
