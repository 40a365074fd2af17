//! RPC peer behavior over an in-memory channel: correlation, callback
//! dispatch, update forwarding, and failure propagation.

use std::pin::Pin;
use std::sync::Arc;

use agent_conduit::rpc::{CallbackHandler, Peer};
use agent_conduit::ClientError;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use super::test_helpers::line_channel_pair;

struct EchoHandler;

impl CallbackHandler for EchoHandler {
    fn handle(
        &self,
        method: String,
        params: Value,
    ) -> Pin<Box<dyn std::future::Future<Output = agent_conduit::Result<Value>> + Send + '_>> {
        Box::pin(async move {
            match method.as_str() {
                "echo" => Ok(json!({ "echoed": params })),
                other => Err(ClientError::MethodNotFound(other.to_owned())),
            }
        })
    }
}

async fn served_peer() -> (
    Arc<Peer>,
    tokio::io::DuplexStream,
    mpsc::Receiver<Value>,
) {
    let (channel, far) = line_channel_pair();
    let peer = Arc::new(Peer::new(channel.outbound()));
    let (update_tx, update_rx) = mpsc::channel::<Value>(16);
    peer.serve(channel, Arc::new(EchoHandler), update_tx)
        .await
        .expect("serve");
    (peer, far, update_rx)
}

#[tokio::test]
async fn responses_resolve_out_of_order() {
    let (peer, far, _updates) = served_peer().await;
    let (far_read, mut far_write) = tokio::io::split(far);

    let first = {
        let peer = Arc::clone(&peer);
        tokio::spawn(async move { peer.request("one", json!({})).await })
    };
    let second = {
        let peer = Arc::clone(&peer);
        tokio::spawn(async move { peer.request("two", json!({})).await })
    };

    let mut lines = BufReader::new(far_read).lines();
    let mut ids = Vec::new();
    for _ in 0..2 {
        let line = lines.next_line().await.expect("read").expect("line");
        let msg: Value = serde_json::from_str(&line).expect("json");
        ids.push((msg["id"].as_i64().expect("id"), msg["method"].clone()));
    }

    // Reply to the second request first.
    for (id, method) in ids.iter().rev() {
        let reply = json!({ "jsonrpc": "2.0", "id": id, "result": { "for": method } });
        let mut bytes = serde_json::to_vec(&reply).expect("serialize");
        bytes.push(b'\n');
        far_write.write_all(&bytes).await.expect("write");
    }

    let first = first.await.expect("join").expect("result");
    let second = second.await.expect("join").expect("result");
    assert_eq!(first["for"], "one");
    assert_eq!(second["for"], "two");
}

#[tokio::test]
async fn error_reply_surfaces_as_rpc_error() {
    let (peer, far, _updates) = served_peer().await;
    let (far_read, mut far_write) = tokio::io::split(far);

    let pending = {
        let peer = Arc::clone(&peer);
        tokio::spawn(async move { peer.request("session/prompt", json!({})).await })
    };

    let mut lines = BufReader::new(far_read).lines();
    let line = lines.next_line().await.expect("read").expect("line");
    let msg: Value = serde_json::from_str(&line).expect("json");
    let reply = json!({
        "jsonrpc": "2.0",
        "id": msg["id"],
        "error": { "code": -32000, "message": "agent refused" },
    });
    let mut bytes = serde_json::to_vec(&reply).expect("serialize");
    bytes.push(b'\n');
    far_write.write_all(&bytes).await.expect("write");

    let result = pending.await.expect("join");
    match result {
        Err(ClientError::Rpc { code, message }) => {
            assert_eq!(code, -32000);
            assert_eq!(message, "agent refused");
        }
        other => panic!("expected rpc error, got {other:?}"),
    }
}

#[tokio::test]
async fn inbound_request_is_answered_by_handler() {
    let (_peer, far, _updates) = served_peer().await;
    let (far_read, mut far_write) = tokio::io::split(far);

    let request = json!({
        "jsonrpc": "2.0",
        "id": 42,
        "method": "echo",
        "params": { "ping": true },
    });
    let mut bytes = serde_json::to_vec(&request).expect("serialize");
    bytes.push(b'\n');
    far_write.write_all(&bytes).await.expect("write");

    let mut lines = BufReader::new(far_read).lines();
    let line = lines.next_line().await.expect("read").expect("line");
    let reply: Value = serde_json::from_str(&line).expect("json");
    assert_eq!(reply["id"], 42);
    assert_eq!(reply["result"]["echoed"]["ping"], true);
}

#[tokio::test]
async fn unknown_inbound_method_gets_method_not_found() {
    let (_peer, far, _updates) = served_peer().await;
    let (far_read, mut far_write) = tokio::io::split(far);

    let request = json!({ "jsonrpc": "2.0", "id": 7, "method": "editor/open", "params": {} });
    let mut bytes = serde_json::to_vec(&request).expect("serialize");
    bytes.push(b'\n');
    far_write.write_all(&bytes).await.expect("write");

    let mut lines = BufReader::new(far_read).lines();
    let line = lines.next_line().await.expect("read").expect("line");
    let reply: Value = serde_json::from_str(&line).expect("json");
    assert_eq!(reply["id"], 7);
    assert_eq!(reply["error"]["code"], -32601);
}

#[tokio::test]
async fn session_update_params_are_forwarded() {
    let (_peer, far, mut updates) = served_peer().await;
    let (_far_read, mut far_write) = tokio::io::split(far);

    let notification = json!({
        "jsonrpc": "2.0",
        "method": "session/update",
        "params": { "sessionId": "s", "update": { "sessionUpdate": "plan", "entries": [] } },
    });
    let mut bytes = serde_json::to_vec(&notification).expect("serialize");
    bytes.push(b'\n');
    far_write.write_all(&bytes).await.expect("write");

    let params = updates.recv().await.expect("forwarded params");
    assert_eq!(params["sessionId"], "s");
    assert_eq!(params["update"]["sessionUpdate"], "plan");
}

#[tokio::test]
async fn malformed_line_is_skipped_not_fatal() {
    let (_peer, far, mut updates) = served_peer().await;
    let (_far_read, mut far_write) = tokio::io::split(far);

    far_write.write_all(b"{this is not json\n").await.expect("write");
    let notification = json!({
        "jsonrpc": "2.0",
        "method": "session/update",
        "params": { "sessionId": "s", "update": {} },
    });
    let mut bytes = serde_json::to_vec(&notification).expect("serialize");
    bytes.push(b'\n');
    far_write.write_all(&bytes).await.expect("write");

    assert_eq!(updates.recv().await.expect("params")["sessionId"], "s");
}

#[tokio::test]
async fn transport_death_fails_pending_requests() {
    let (peer, far, _updates) = served_peer().await;

    let pending = {
        let peer = Arc::clone(&peer);
        tokio::spawn(async move { peer.request("session/prompt", json!({})).await })
    };
    // Let the request get queued before the transport dies.
    tokio::task::yield_now().await;
    drop(far);

    let result = pending.await.expect("join");
    assert!(matches!(result, Err(ClientError::Transport(_))));
}

#[tokio::test]
async fn close_fails_pending_and_ends_updates() {
    let (peer, _far, mut updates) = served_peer().await;

    let pending = {
        let peer = Arc::clone(&peer);
        tokio::spawn(async move { peer.request("session/prompt", json!({})).await })
    };
    tokio::task::yield_now().await;
    peer.close().await;

    assert!(matches!(
        pending.await.expect("join"),
        Err(ClientError::Transport(_))
    ));
    assert!(updates.recv().await.is_none());
}
