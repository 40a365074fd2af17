//! JSON-RPC 2.0 peer: concurrent bidirectional message correlation.
//!
//! The [`Peer`] multiplexes many in-flight outbound requests (correlated by
//! integer id) with inbound traffic from the agent: responses resolve
//! pending requests, `session/update` notifications are forwarded raw to
//! the session layer, and inbound *requests* are dispatched to a registered
//! [`CallbackHandler`], each on its own task so slow callbacks never stall
//! the read loop.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::channel::LineChannel;
use crate::rpc::message::{self, Incoming};
use crate::{ClientError, Result};

/// Handler for the small fixed set of methods the agent may invoke on the
/// client (filesystem, permission, terminal).
///
/// Implementations must tolerate arbitrary interleaving: distinct inbound
/// requests run on independent tasks and may suspend at any await point.
/// Unknown methods must be answered with [`ClientError::MethodNotFound`],
/// which the peer converts into a standard `-32601` reply.
pub trait CallbackHandler: Send + Sync {
    /// Service one agent-initiated request and produce its result payload.
    fn handle(
        &self,
        method: String,
        params: Value,
    ) -> Pin<Box<dyn Future<Output = Result<Value>> + Send + '_>>;
}

type PendingMap = Arc<Mutex<HashMap<i64, oneshot::Sender<Result<Value>>>>>;

/// Bidirectional JSON-RPC 2.0 peer bound to a line channel.
#[derive(Debug)]
pub struct Peer {
    next_id: AtomicI64,
    pending: PendingMap,
    out_tx: mpsc::Sender<String>,
    cancel: CancellationToken,
    channel: Mutex<Option<LineChannel>>,
}

impl Peer {
    /// Create a peer writing outbound messages through `out_tx`.
    ///
    /// The peer is inert until [`Peer::serve`] attaches the inbound side.
    #[must_use]
    pub fn new(out_tx: mpsc::Sender<String>) -> Self {
        Self {
            next_id: AtomicI64::new(1),
            pending: Arc::new(Mutex::new(HashMap::new())),
            out_tx,
            cancel: CancellationToken::new(),
            channel: Mutex::new(None),
        }
    }

    /// Attach the channel's inbound side and start the read loop.
    ///
    /// `handler` services agent-initiated requests; the raw params of every
    /// `session/update` notification are forwarded through `update_tx`,
    /// converted into the consumer's queue item type via `From<Value>` so
    /// agent payloads can never alias the consumer's own control messages.
    /// The peer takes ownership of `channel` so [`Peer::close`] can dispose
    /// it.
    ///
    /// A read-loop failure (transport died) never propagates as an
    /// unhandled task error: all pending outbound requests are failed with
    /// a transport error and the loop exits, which in turn closes
    /// `update_tx` so the layer above observes a clean end of stream.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Protocol`] if the channel's inbound side was
    /// already taken.
    pub async fn serve<U>(
        self: &Arc<Self>,
        mut channel: LineChannel,
        handler: Arc<dyn CallbackHandler>,
        update_tx: mpsc::Sender<U>,
    ) -> Result<()>
    where
        U: From<Value> + Send + 'static,
    {
        let line_rx = channel
            .take_inbound()
            .ok_or_else(|| ClientError::Protocol("channel inbound side already taken".into()))?;
        *self.channel.lock().await = Some(channel);

        let peer = Arc::clone(self);
        tokio::spawn(read_loop(peer, line_rx, handler, update_tx));
        Ok(())
    }

    /// Send a request and await the matching response by id.
    ///
    /// # Errors
    ///
    /// - [`ClientError::Transport`] if the channel is closed before the
    ///   response arrives.
    /// - [`ClientError::Rpc`] if the agent replies with an error object.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let line = serde_json::to_string(&message::request(id, method, params))?;
        if self.out_tx.send(line).await.is_err() {
            self.pending.lock().await.remove(&id);
            return Err(ClientError::Transport(format!(
                "channel closed before request {method:?} could be sent"
            )));
        }

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(ClientError::Transport(format!(
                "peer closed while awaiting response to {method:?}"
            ))),
        }
    }

    /// Send a notification. Fire-and-forget: no id, no reply.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Transport`] if the channel is already closed.
    pub async fn notify(&self, method: &str, params: Value) -> Result<()> {
        let line = serde_json::to_string(&message::notification(method, params))?;
        self.out_tx.send(line).await.map_err(|_| {
            ClientError::Transport(format!(
                "channel closed before notification {method:?} could be sent"
            ))
        })
    }

    /// Close the peer: stop inbound traffic first, then dispose the channel.
    ///
    /// Stopping the read loop before the channel guarantees no handler task
    /// is spawned after close begins, giving the layer above a predictable
    /// shutdown sequence.
    pub async fn close(&self) {
        self.cancel.cancel();
        if let Some(channel) = self.channel.lock().await.take() {
            channel.close().await;
        }
        fail_pending(&self.pending, "peer closed").await;
    }
}

/// Read loop: classify each inbound line and route it.
async fn read_loop<U>(
    peer: Arc<Peer>,
    mut line_rx: mpsc::Receiver<String>,
    handler: Arc<dyn CallbackHandler>,
    update_tx: mpsc::Sender<U>,
) where
    U: From<Value> + Send + 'static,
{
    loop {
        tokio::select! {
            biased;

            () = peer.cancel.cancelled() => {
                debug!("rpc peer: cancellation received, stopping read loop");
                break;
            }

            line = line_rx.recv() => {
                let Some(line) = line else {
                    debug!("rpc peer: inbound stream closed");
                    break;
                };
                dispatch_line(&peer, &line, &handler, &update_tx).await;
            }
        }
    }

    fail_pending(&peer.pending, "connection closed").await;
    // update_tx drops here, ending the session layer's demux stream.
}

/// Route one inbound line to the pending map, the handler, or the update
/// stream. Malformed lines are logged and skipped, never fatal.
async fn dispatch_line<U>(
    peer: &Arc<Peer>,
    line: &str,
    handler: &Arc<dyn CallbackHandler>,
    update_tx: &mpsc::Sender<U>,
) where
    U: From<Value> + Send + 'static,
{
    let msg: Incoming = match serde_json::from_str(line) {
        Ok(msg) => msg,
        Err(err) => {
            warn!(%err, raw_line = %line, "rpc peer: malformed message, skipping");
            return;
        }
    };

    match (msg.method, msg.id) {
        // Request: has a method and an id, expects a response.
        (Some(method), Some(id)) => {
            let params = msg.params.unwrap_or(Value::Null);
            spawn_handler(peer, id, method, params, Arc::clone(handler));
        }
        // Notification: method without id.
        (Some(method), None) => {
            let params = msg.params.unwrap_or(Value::Null);
            if method == "session/update" {
                if update_tx.send(params.into()).await.is_err() {
                    debug!("rpc peer: update consumer gone, dropping session/update");
                }
            } else {
                debug!(method = %method, "rpc peer: skipping unknown notification");
            }
        }
        // Response or error: id without method, matches a pending request.
        (None, Some(id)) => {
            resolve_response(peer, &id, msg.result, msg.error).await;
        }
        (None, None) => {
            warn!(raw_line = %line, "rpc peer: message with neither method nor id, skipping");
        }
    }
}

/// Run one inbound request's handler on its own task and reply when done.
fn spawn_handler(
    peer: &Arc<Peer>,
    id: Value,
    method: String,
    params: Value,
    handler: Arc<dyn CallbackHandler>,
) {
    let out_tx = peer.out_tx.clone();
    tokio::spawn(async move {
        let result = handler.handle(method.clone(), params).await;
        let reply = match result {
            Ok(value) => message::response(&id, value),
            Err(err) => {
                debug!(method = %method, %err, "rpc peer: callback handler returned error");
                message::error_response(&id, message::error_code_for(&err), &err.to_string())
            }
        };
        match serde_json::to_string(&reply) {
            Ok(line) => {
                if out_tx.send(line).await.is_err() {
                    debug!(method = %method, "rpc peer: channel closed before reply could be sent");
                }
            }
            Err(err) => warn!(method = %method, %err, "rpc peer: failed to serialize reply"),
        }
    });
}

/// Resolve a pending outbound request by id.
async fn resolve_response(
    peer: &Arc<Peer>,
    id: &Value,
    result: Option<Value>,
    error: Option<message::RpcError>,
) {
    let Some(id) = id.as_i64() else {
        warn!(?id, "rpc peer: response with non-integer id, skipping");
        return;
    };

    let waiter = peer.pending.lock().await.remove(&id);
    let Some(waiter) = waiter else {
        warn!(id, "rpc peer: response for unknown request id, skipping");
        return;
    };

    let outcome = match error {
        Some(err) => Err(ClientError::Rpc {
            code: err.code,
            message: err.message,
        }),
        None => Ok(result.unwrap_or(Value::Null)),
    };
    let _ = waiter.send(outcome);
}

/// Fail every pending outbound request with a transport error.
async fn fail_pending(pending: &PendingMap, reason: &str) {
    let waiters: Vec<_> = pending.lock().await.drain().collect();
    for (id, tx) in waiters {
        debug!(id, reason, "rpc peer: failing pending request");
        let _ = tx.send(Err(ClientError::Transport(reason.to_owned())));
    }
}
