//! Shared helpers: an in-memory scripted agent driven over a duplex pipe.
//!
//! A scripted agent is a closure receiving every JSON-RPC message the
//! client writes and returning the lines to send back, so individual test
//! modules can describe full protocol conversations without subprocesses.

use std::sync::Arc;

use agent_conduit::channel::LineChannel;
use agent_conduit::fs::LocalFs;
use agent_conduit::policy::PermissionPolicy;
use agent_conduit::{AcpClient, ClientConfig};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::task::JoinHandle;

/// Session id the base script hands out on `session/new`.
pub const SESSION_ID: &str = "sess-0001";

/// Install the log subscriber once per test binary; honors `RUST_LOG`.
pub fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Build a line channel wired to an in-memory pipe; the returned stream is
/// the agent's end.
pub fn line_channel_pair() -> (LineChannel, DuplexStream) {
    let (near, far) = tokio::io::duplex(1 << 20);
    let (read_half, write_half) = tokio::io::split(near);
    let channel = LineChannel::from_io(write_half, read_half, None::<tokio::io::Empty>);
    (channel, far)
}

/// Run a scripted agent over `io`: each inbound message is handed to
/// `script`, and every returned value is written back as one line.
pub fn spawn_agent<F>(io: DuplexStream, mut script: F) -> JoinHandle<()>
where
    F: FnMut(&Value) -> Vec<Value> + Send + 'static,
{
    tokio::spawn(async move {
        let (read_half, mut write_half) = tokio::io::split(io);
        let mut lines = BufReader::new(read_half).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let Ok(msg) = serde_json::from_str::<Value>(&line) else {
                continue;
            };
            for reply in script(&msg) {
                let mut bytes = serde_json::to_vec(&reply).expect("serialize reply");
                bytes.push(b'\n');
                if write_half.write_all(&bytes).await.is_err() {
                    return;
                }
            }
        }
    })
}

/// Connect a client to a scripted agent over an in-memory pipe.
pub async fn scripted_client<F>(policy: Arc<dyn PermissionPolicy>, script: F) -> AcpClient
where
    F: FnMut(&Value) -> Vec<Value> + Send + 'static,
{
    init_tracing();
    let (channel, agent_io) = line_channel_pair();
    spawn_agent(agent_io, script);
    AcpClient::connect(
        channel,
        ClientConfig::new("scripted-agent"),
        policy,
        Arc::new(LocalFs),
    )
    .await
    .expect("connect client")
}

/// Wrap `extra` with handling for `initialize` and `session/new`.
pub fn base_script<F>(mut extra: F) -> impl FnMut(&Value) -> Vec<Value> + Send + 'static
where
    F: FnMut(&Value) -> Vec<Value> + Send + 'static,
{
    move |msg| match msg["method"].as_str() {
        Some("initialize") => vec![response(msg, init_result())],
        Some("session/new") => vec![response(msg, json!({ "sessionId": SESSION_ID }))],
        _ => extra(msg),
    }
}

/// Successful response to `msg`, echoing its id.
pub fn response(msg: &Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": msg["id"], "result": result })
}

/// A well-formed `initialize` result.
pub fn init_result() -> Value {
    json!({ "protocolVersion": 1, "agentCapabilities": {}, "authMethods": [] })
}

/// A `session/update` notification envelope.
pub fn update(session_id: &str, update: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "method": "session/update",
        "params": { "sessionId": session_id, "update": update },
    })
}

/// An agent (or user) text message chunk update.
pub fn text_chunk(session_id: &str, kind: &str, text: &str) -> Value {
    update(
        session_id,
        json!({ "sessionUpdate": kind, "content": { "type": "text", "text": text } }),
    )
}

/// An agent-initiated request envelope.
pub fn agent_request(id: i64, method: &str, params: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params })
}
