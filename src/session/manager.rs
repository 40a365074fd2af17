//! Session manager: the protocol orchestrator.
//!
//! Owns per-session state (replay buffer, live subscribers, tool-call
//! table, workspace root, mode info, cancelling flag), implements the
//! initialize / new-session / load-session / prompt / cancel operations,
//! demultiplexes raw `session/update` notifications into typed events, and
//! mediates every agent-initiated callback through the workspace jail and
//! the permission policy.
//!
//! Ordering contract: within a session, an update is appended to the
//! replay buffer and pushed to every live subscriber inside one critical
//! section, and a new subscriber snapshots the buffer and registers its
//! sender inside that same critical section. Late subscribers therefore
//! see a gap-free, duplicate-free prefix-consistent stream.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{ClientCapabilities, ClientConfig, PROTOCOL_VERSION};
use crate::fs::FsProvider;
use crate::policy::{
    select_option, PermissionOption, PermissionOptionWire, PermissionOutcome, PermissionPolicy,
    PermissionRequest,
};
use crate::rpc::{CallbackHandler, Peer};
use crate::session::tool_call::{ToolCall, ToolKind};
use crate::session::updates::{self, ModeState, ParsedUpdate, SessionUpdate, StopReason};
use crate::session::ContentBlock;
use crate::terminal::{self, TerminalEvent, TerminalHandle, TerminalOutput};
use crate::workspace;
use crate::{ClientError, Result};

/// One item on the demux queue.
///
/// Agent input always arrives wrapped in [`DemuxItem::Update`], so no
/// payload the agent crafts can alias the internal turn-end control
/// message.
#[derive(Debug)]
pub enum DemuxItem {
    /// Raw `session/update` params from the agent.
    Update(Value),
    /// A prompt turn finished.
    TurnEnd {
        /// Session whose turn ended.
        session_id: String,
        /// Stop reason from the prompt response, or synthesized on failure.
        stop_reason: StopReason,
    },
}

impl From<Value> for DemuxItem {
    fn from(params: Value) -> Self {
        Self::Update(params)
    }
}

/// Result of the `initialize` capability negotiation.
#[derive(Debug, Clone)]
pub struct InitializeResponse {
    /// Protocol version the agent settled on.
    pub protocol_version: u64,
    /// Agent capability map, kept raw (schema is open-ended).
    pub agent_capabilities: Value,
    /// Authentication methods the agent advertises.
    pub auth_methods: Vec<Value>,
}

/// Per-session state, private to the manager.
#[derive(Debug, Default)]
struct SessionState {
    /// Security boundary for file and terminal operations. `None` for
    /// sessions lazily created by an early update, until registered.
    workspace_root: Option<PathBuf>,
    /// Ordered history of every update ever delivered on this session.
    replay: Vec<SessionUpdate>,
    /// Live subscriber senders; closed ones are pruned on push.
    live: Vec<mpsc::UnboundedSender<SessionUpdate>>,
    /// Tool calls keyed by id, merged across updates.
    tool_calls: HashMap<String, ToolCall>,
    /// Current mode and advertised alternatives, when known.
    mode: Option<ModeState>,
    /// Set by `cancel` before the notification goes out, so racing
    /// permission requests resolve as cancelled.
    cancelling: bool,
}

impl SessionState {
    /// Append to the replay buffer, then fan out to live subscribers.
    /// Caller must hold the sessions lock; buffer-before-live under one
    /// lock is what makes subscription gap-free.
    fn push(&mut self, update: SessionUpdate) {
        self.replay.push(update.clone());
        self.live.retain(|tx| tx.send(update.clone()).is_ok());
    }
}

/// The protocol orchestrator. One per [`AcpClient`](crate::AcpClient).
pub struct SessionManager {
    peer: Arc<Peer>,
    config: ClientConfig,
    policy: Arc<dyn PermissionPolicy>,
    fs: Arc<dyn FsProvider>,
    sessions: Mutex<HashMap<String, SessionState>>,
    terminals: Mutex<HashMap<String, TerminalHandle>>,
    term_event_tx: mpsc::UnboundedSender<TerminalEvent>,
    term_event_rx: Mutex<Option<mpsc::UnboundedReceiver<TerminalEvent>>>,
    /// Weak sender into the demux queue, set once by
    /// [`SessionManager::start_demux`]. Turn endings travel through this
    /// queue too, so a turn-ended item can never overtake updates the
    /// agent emitted before its prompt response. Weak so the queue still
    /// closes when the RPC peer drops its sender.
    demux_tx: OnceLock<mpsc::WeakSender<DemuxItem>>,
    /// Set by [`SessionManager::close`]; queued updates arriving after
    /// disposal must not lazily re-create session state.
    closed: AtomicBool,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager").finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Build a manager over `peer` with the injected collaborators.
    #[must_use]
    pub fn new(
        peer: Arc<Peer>,
        config: ClientConfig,
        policy: Arc<dyn PermissionPolicy>,
        fs: Arc<dyn FsProvider>,
    ) -> Self {
        let (term_event_tx, term_event_rx) = mpsc::unbounded_channel();
        Self {
            peer,
            config,
            policy,
            fs,
            sessions: Mutex::new(HashMap::new()),
            terminals: Mutex::new(HashMap::new()),
            term_event_tx,
            term_event_rx: Mutex::new(Some(term_event_rx)),
            demux_tx: OnceLock::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Create the demux queue and spawn the task consuming it. Returns the
    /// sender the RPC peer forwards raw `session/update` params through
    /// (wrapped into [`DemuxItem::Update`]); the task ends when every sender
    /// is dropped.
    pub fn start_demux(self: &Arc<Self>, depth: usize) -> (mpsc::Sender<DemuxItem>, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel(depth);
        let _ = self.demux_tx.set(tx.downgrade());

        let manager = Arc::clone(self);
        let task = tokio::spawn(async move {
            while let Some(item) = rx.recv().await {
                match item {
                    DemuxItem::Update(params) => manager.handle_update(params).await,
                    DemuxItem::TurnEnd {
                        session_id,
                        stop_reason,
                    } => manager.apply_turn_end(&session_id, stop_reason).await,
                }
            }
            debug!("session update stream closed, demux exiting");
        });
        (tx, task)
    }

    // ── Protocol operations ──────────────────────────────────────────────

    /// Negotiate protocol version and capabilities with the agent.
    ///
    /// # Errors
    ///
    /// - [`ClientError::Protocol`] if the response is malformed or the
    ///   negotiated version is below [`PROTOCOL_VERSION`].
    /// - [`ClientError::Transport`] / [`ClientError::Rpc`] from the peer.
    pub async fn initialize(&self, capabilities: &ClientCapabilities) -> Result<InitializeResponse> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "clientCapabilities": {
                "fs": {
                    "readTextFile": capabilities.read_text_file,
                    "writeTextFile": capabilities.write_text_file,
                },
                "terminal": capabilities.terminal,
            },
        });

        let response = self.peer.request("initialize", params).await?;
        let version = response
            .get("protocolVersion")
            .and_then(Value::as_u64)
            .ok_or_else(|| {
                ClientError::Protocol("initialize response missing protocolVersion".into())
            })?;
        if version < PROTOCOL_VERSION {
            return Err(ClientError::Protocol(format!(
                "agent protocol version {version} is below supported minimum {PROTOCOL_VERSION}"
            )));
        }

        info!(version, "protocol initialized");
        Ok(InitializeResponse {
            protocol_version: version,
            agent_capabilities: response
                .get("agentCapabilities")
                .cloned()
                .unwrap_or(Value::Null),
            auth_methods: response
                .get("authMethods")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default(),
        })
    }

    /// Create a new session rooted at `workspace_root`.
    ///
    /// # Errors
    ///
    /// - [`ClientError::InvalidArgument`] if the root does not resolve.
    /// - [`ClientError::Protocol`] if the agent's response lacks a session
    ///   id, plus peer errors.
    pub async fn new_session(&self, workspace_root: &Path) -> Result<String> {
        let root = canonical_workspace(workspace_root)?;
        let params = json!({
            "cwd": root,
            "mcpServers": self.config.mcp_servers,
        });

        let response = self.peer.request("session/new", params).await?;
        let session_id = response
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| ClientError::Protocol("session/new response missing sessionId".into()))?
            .to_owned();

        self.register_session(&session_id, root, mode_state_of(&response))
            .await;
        info!(session_id, "session created");
        Ok(session_id)
    }

    /// Resume an existing session; the agent replays its history as
    /// ordinary update notifications through the same demux path.
    ///
    /// # Errors
    ///
    /// Same surface as [`SessionManager::new_session`].
    pub async fn load_session(&self, session_id: &str, workspace_root: &Path) -> Result<()> {
        let root = canonical_workspace(workspace_root)?;
        // Register before the request so replayed history lands in a
        // session that already knows its workspace root.
        let existed = {
            let mut sessions = self.sessions.lock().await;
            let existed = sessions.contains_key(session_id);
            let state = sessions.entry(session_id.to_owned()).or_default();
            state.workspace_root = Some(root);
            existed
        };

        let params = json!({
            "sessionId": session_id,
            "cwd": self.root_of(session_id).await?,
            "mcpServers": self.config.mcp_servers,
        });

        match self.peer.request("session/load", params).await {
            Ok(response) => {
                if let Some(mode) = mode_state_of(&response) {
                    let mut sessions = self.sessions.lock().await;
                    if let Some(state) = sessions.get_mut(session_id) {
                        state.mode = Some(mode);
                    }
                }
                info!(session_id, "session loaded");
                Ok(())
            }
            Err(err) => {
                if !existed {
                    self.sessions.lock().await.remove(session_id);
                }
                Err(err)
            }
        }
    }

    /// Send a prompt and return the live single-turn update stream.
    ///
    /// The stream replays nothing, forwards every update of the turn, and
    /// auto-closes right after delivering the turn-ended event. The turn
    /// always converges: on success the agent's stop reason is appended,
    /// and on any failure while awaiting the prompt result a turn-ended
    /// update with [`StopReason::Other`] is synthesized so no caller is
    /// left waiting on a broken turn.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotFound`] synchronously (without contacting
    /// the agent) if `session_id` is unknown.
    pub async fn prompt(
        self: &Arc<Self>,
        session_id: &str,
        content: Vec<ContentBlock>,
    ) -> Result<mpsc::UnboundedReceiver<SessionUpdate>> {
        let live_rx = {
            let mut sessions = self.sessions.lock().await;
            let state = sessions
                .get_mut(session_id)
                .ok_or_else(|| ClientError::NotFound(format!("session {session_id} not found")))?;
            let (tx, rx) = mpsc::unbounded_channel();
            state.live.push(tx);
            rx
        };

        let (turn_tx, turn_rx) = mpsc::unbounded_channel();
        tokio::spawn(forward_turn(live_rx, turn_tx));

        let manager = Arc::clone(self);
        let sid = session_id.to_owned();
        let params = json!({ "sessionId": sid, "prompt": content });
        tokio::spawn(async move {
            let stop_reason = match manager.peer.request("session/prompt", params).await {
                Ok(response) => response
                    .get("stopReason")
                    .and_then(Value::as_str)
                    .map_or(StopReason::EndTurn, StopReason::from_wire),
                Err(err) => {
                    warn!(session_id = %sid, %err, "prompt failed, synthesizing turn end");
                    StopReason::Other
                }
            };
            manager.finish_turn(&sid, stop_reason).await;
        });

        Ok(turn_rx)
    }

    /// Cancel the session's in-flight turn.
    ///
    /// The cancelling flag is set *before* the notification goes out so a
    /// permission request racing the cancel resolves as cancelled instead
    /// of blocking on the policy. Fire-and-forget: no acknowledgment is
    /// awaited.
    ///
    /// # Errors
    ///
    /// [`ClientError::NotFound`] for unknown sessions;
    /// [`ClientError::Transport`] if the notification cannot be sent.
    pub async fn cancel(&self, session_id: &str) -> Result<()> {
        {
            let mut sessions = self.sessions.lock().await;
            let state = sessions
                .get_mut(session_id)
                .ok_or_else(|| ClientError::NotFound(format!("session {session_id} not found")))?;
            state.cancelling = true;
        }
        debug!(session_id, "session marked cancelling");
        self.peer
            .notify("session/cancel", json!({ "sessionId": session_id }))
            .await
    }

    /// Subscribe to the session's full update history plus live tail.
    ///
    /// The replay snapshot and live registration happen in one critical
    /// section, so the stream is gap-free and duplicate-free.
    ///
    /// # Errors
    ///
    /// [`ClientError::NotFound`] for unknown sessions.
    pub async fn subscribe(
        &self,
        session_id: &str,
    ) -> Result<mpsc::UnboundedReceiver<SessionUpdate>> {
        let mut sessions = self.sessions.lock().await;
        let state = sessions
            .get_mut(session_id)
            .ok_or_else(|| ClientError::NotFound(format!("session {session_id} not found")))?;

        let (tx, rx) = mpsc::unbounded_channel();
        for update in &state.replay {
            let _ = tx.send(update.clone());
        }
        state.live.push(tx);
        Ok(rx)
    }

    /// Snapshot of a session's merged tool-call table.
    ///
    /// # Errors
    ///
    /// [`ClientError::NotFound`] for unknown sessions.
    pub async fn tool_calls(&self, session_id: &str) -> Result<HashMap<String, ToolCall>> {
        let sessions = self.sessions.lock().await;
        sessions
            .get(session_id)
            .map(|state| state.tool_calls.clone())
            .ok_or_else(|| ClientError::NotFound(format!("session {session_id} not found")))
    }

    /// Current mode state, when the agent advertises modes.
    ///
    /// # Errors
    ///
    /// [`ClientError::NotFound`] for unknown sessions.
    pub async fn modes(&self, session_id: &str) -> Result<Option<ModeState>> {
        let sessions = self.sessions.lock().await;
        sessions
            .get(session_id)
            .map(|state| state.mode.clone())
            .ok_or_else(|| ClientError::NotFound(format!("session {session_id} not found")))
    }

    /// Ask the agent to switch modes, updating local state on success.
    ///
    /// # Errors
    ///
    /// [`ClientError::NotFound`] for unknown sessions, plus peer errors.
    pub async fn set_mode(&self, session_id: &str, mode_id: &str) -> Result<()> {
        {
            let sessions = self.sessions.lock().await;
            if !sessions.contains_key(session_id) {
                return Err(ClientError::NotFound(format!(
                    "session {session_id} not found"
                )));
            }
        }

        self.peer
            .request(
                "session/set_mode",
                json!({ "sessionId": session_id, "modeId": mode_id }),
            )
            .await?;

        let mut sessions = self.sessions.lock().await;
        if let Some(state) = sessions.get_mut(session_id) {
            if let Some(mode) = &mut state.mode {
                mode.current_mode_id = mode_id.to_owned();
            }
        }
        Ok(())
    }

    /// Take the terminal lifecycle event stream. Yields `None` after the
    /// first call.
    pub async fn terminal_events(&self) -> Option<mpsc::UnboundedReceiver<TerminalEvent>> {
        self.term_event_rx.lock().await.take()
    }

    // ── Host-facing terminal operations ──────────────────────────────────

    /// Buffered output snapshot for a terminal.
    ///
    /// # Errors
    ///
    /// [`ClientError::NotFound`] for unknown terminal ids.
    pub async fn terminal_output(&self, terminal_id: &str) -> Result<TerminalOutput> {
        let terminals = self.terminals.lock().await;
        terminals
            .get(terminal_id)
            .map(TerminalHandle::output)
            .ok_or_else(|| ClientError::NotFound(format!("terminal {terminal_id} not found")))
    }

    /// Wait for a terminal process to exit.
    ///
    /// # Errors
    ///
    /// [`ClientError::NotFound`] for unknown terminal ids.
    pub async fn wait_for_terminal(&self, terminal_id: &str) -> Result<terminal::TerminalExitStatus> {
        let exit_rx = {
            let terminals = self.terminals.lock().await;
            terminals
                .get(terminal_id)
                .map(TerminalHandle::exit_watch)
                .ok_or_else(|| ClientError::NotFound(format!("terminal {terminal_id} not found")))?
        };
        Ok(terminal::wait_on(exit_rx).await)
    }

    /// Kill a terminal process.
    ///
    /// # Errors
    ///
    /// [`ClientError::NotFound`] for unknown terminal ids.
    pub async fn kill_terminal(&self, terminal_id: &str) -> Result<()> {
        let terminals = self.terminals.lock().await;
        let handle = terminals
            .get(terminal_id)
            .ok_or_else(|| ClientError::NotFound(format!("terminal {terminal_id} not found")))?;
        handle.kill().await;
        Ok(())
    }

    /// Release a terminal, removing it from the table.
    ///
    /// # Errors
    ///
    /// [`ClientError::NotFound`] for unknown terminal ids.
    pub async fn release_terminal(&self, terminal_id: &str) -> Result<()> {
        let mut terminals = self.terminals.lock().await;
        let mut handle = terminals
            .remove(terminal_id)
            .ok_or_else(|| ClientError::NotFound(format!("terminal {terminal_id} not found")))?;
        handle.release();
        Ok(())
    }

    /// Close the manager: terminal-event stream, live streams, tables.
    /// Each step is independent so one failure cannot block the rest.
    pub async fn close(&self) {
        // Queued updates must not lazily re-create sessions after this.
        self.closed.store(true, Ordering::SeqCst);

        // Close the terminal event stream.
        self.term_event_rx.lock().await.take();

        // Close every live stream and clear session state.
        {
            let mut sessions = self.sessions.lock().await;
            for state in sessions.values_mut() {
                state.live.clear();
                state.replay.clear();
                state.tool_calls.clear();
            }
            sessions.clear();
        }

        // Release every terminal.
        {
            let mut terminals = self.terminals.lock().await;
            for (_, mut handle) in terminals.drain() {
                handle.release();
            }
        }

        debug!("session manager closed");
    }

    // ── Update demultiplexing ────────────────────────────────────────────

    /// Route one raw `session/update` params object from the demux queue.
    async fn handle_update(&self, params: Value) {
        if self.closed.load(Ordering::SeqCst) {
            debug!("session update after close, dropping");
            return;
        }

        let Some(session_id) = params
            .get("sessionId")
            .and_then(Value::as_str)
            .map(str::to_owned)
        else {
            warn!("session/update without sessionId, dropping");
            return;
        };
        let raw_update = params.get("update").cloned().unwrap_or(Value::Null);

        let mut sessions = self.sessions.lock().await;
        // Lazily initialize: the agent may emit updates immediately after
        // session creation, before the caller registered or subscribed.
        let state = sessions.entry(session_id.clone()).or_default();

        let typed = match updates::parse_update(raw_update) {
            ParsedUpdate::Typed(update) => update,
            ParsedUpdate::ToolCallNew(wire) => {
                let call = ToolCall::from_wire(wire);
                state.tool_calls.insert(call.id.clone(), call.clone());
                SessionUpdate::ToolCallUpdated(call)
            }
            ParsedUpdate::ToolCallDelta(wire) => {
                // An update with no matching create is tolerated, not an
                // error: synthesize the record from the delta alone.
                let merged = match state.tool_calls.get(&wire.tool_call_id) {
                    Some(previous) => previous.merged_with(wire),
                    None => ToolCall::from_wire(wire),
                };
                state.tool_calls.insert(merged.id.clone(), merged.clone());
                SessionUpdate::ToolCallUpdated(merged)
            }
        };

        if let SessionUpdate::ModeChange { current_mode_id } = &typed {
            match &mut state.mode {
                Some(mode) => mode.current_mode_id = current_mode_id.clone(),
                None => {
                    state.mode = Some(ModeState {
                        current_mode_id: current_mode_id.clone(),
                        available_modes: Vec::new(),
                    });
                }
            }
        }

        state.push(typed);
    }

    /// Enqueue the turn ending behind any updates still in flight.
    ///
    /// The prompt response resolves on a different task than update
    /// notifications; pushing the ending through the demux queue keeps it
    /// ordered after everything the agent sent before responding. Falls back
    /// to a direct push only when the queue is already gone (shutdown).
    async fn finish_turn(&self, session_id: &str, stop_reason: StopReason) {
        if let Some(tx) = self.demux_tx.get().and_then(mpsc::WeakSender::upgrade) {
            let item = DemuxItem::TurnEnd {
                session_id: session_id.to_owned(),
                stop_reason,
            };
            if tx.send(item).await.is_ok() {
                return;
            }
        }
        self.apply_turn_end(session_id, stop_reason).await;
    }

    /// Append the turn-ended event and clear the cancelling flag when the
    /// agent confirmed the cancellation.
    async fn apply_turn_end(&self, session_id: &str, stop_reason: StopReason) {
        let mut sessions = self.sessions.lock().await;
        let Some(state) = sessions.get_mut(session_id) else {
            debug!(session_id, "turn finished for closed session, dropping");
            return;
        };
        if state.cancelling && stop_reason == StopReason::Cancelled {
            state.cancelling = false;
        }
        state.push(SessionUpdate::TurnEnded { stop_reason });
        debug!(session_id, ?stop_reason, "turn ended");
    }

    // ── Agent callback servicing ─────────────────────────────────────────

    async fn root_of(&self, session_id: &str) -> Result<PathBuf> {
        let sessions = self.sessions.lock().await;
        sessions
            .get(session_id)
            .and_then(|state| state.workspace_root.clone())
            .ok_or_else(|| ClientError::NotFound(format!("session {session_id} not found")))
    }

    async fn is_cancelling(&self, session_id: &str) -> bool {
        let sessions = self.sessions.lock().await;
        sessions.get(session_id).is_some_and(|s| s.cancelling)
    }

    /// Consult the policy for an implicit approval (no agent-offered
    /// options). Host policy gates every callback even when the agent
    /// never asked for permission itself.
    async fn approve(&self, session_id: &str, title: String, kind: ToolKind) -> Result<()> {
        let request = PermissionRequest {
            session_id: session_id.to_owned(),
            title: title.clone(),
            explanation: None,
            tool_name: None,
            tool_kind: Some(kind),
            options: Vec::new(),
        };
        match self.policy.decide(request).await {
            crate::policy::PermissionDecision::Allow => Ok(()),
            _ => Err(ClientError::PermissionDenied(title)),
        }
    }

    async fn on_read_text_file(&self, params: Value) -> Result<Value> {
        let p: ReadTextFileParams = parse_params(params)?;
        let root = self.root_of(&p.session_id).await?;
        let resolved = workspace::jail_path(
            &root,
            &p.path,
            self.config.allow_outside_workspace_reads,
        )?;
        self.approve(
            &p.session_id,
            format!("Read {}", resolved.display()),
            ToolKind::Read,
        )
        .await?;
        let content = self.fs.read_text_file(resolved, p.line, p.limit).await?;
        Ok(json!({ "content": content }))
    }

    async fn on_write_text_file(&self, params: Value) -> Result<Value> {
        let p: WriteTextFileParams = parse_params(params)?;
        let root = self.root_of(&p.session_id).await?;
        // Writes never leave the workspace root, regardless of the
        // read-outside configuration.
        let resolved = workspace::jail_path(&root, &p.path, false)?;
        self.approve(
            &p.session_id,
            format!("Write {}", resolved.display()),
            ToolKind::Edit,
        )
        .await?;
        self.fs.write_text_file(resolved, p.content).await?;
        Ok(Value::Null)
    }

    async fn on_request_permission(&self, params: Value) -> Result<Value> {
        let p: RequestPermissionParams = parse_params(params)?;

        // A cancelled turn must not hang on a stale approval prompt.
        if self.is_cancelling(&p.session_id).await {
            debug!(
                session_id = %p.session_id,
                "permission request on cancelling session, short-circuiting"
            );
            return Ok(PermissionOutcome::Cancelled.to_value());
        }

        let options: Vec<PermissionOption> =
            p.options.into_iter().map(PermissionOption::from).collect();
        if options.is_empty() {
            return Ok(PermissionOutcome::Cancelled.to_value());
        }

        let tool_call = p.tool_call.unwrap_or(Value::Null);
        let request = PermissionRequest {
            session_id: p.session_id.clone(),
            title: tool_call
                .get("title")
                .and_then(Value::as_str)
                .unwrap_or("Agent permission request")
                .to_owned(),
            explanation: tool_call
                .get("explanation")
                .and_then(Value::as_str)
                .map(str::to_owned),
            tool_name: tool_call
                .get("toolCallId")
                .and_then(Value::as_str)
                .map(str::to_owned),
            tool_kind: tool_call
                .get("kind")
                .and_then(Value::as_str)
                .map(ToolKind::from_wire),
            options: options.clone(),
        };

        let decision = self.policy.decide(request).await;
        Ok(select_option(decision, &options).to_value())
    }

    async fn on_terminal_create(&self, params: Value) -> Result<Value> {
        let p: TerminalCreateParams = parse_params(params)?;
        let root = self.root_of(&p.session_id).await?;
        self.approve(
            &p.session_id,
            format!("Execute {}", p.command),
            ToolKind::Execute,
        )
        .await?;

        let cwd = workspace::clamp_into(
            &root,
            p.cwd.as_deref(),
            self.config.allow_outside_workspace_reads,
        );
        let env: HashMap<String, String> = p
            .env
            .into_iter()
            .map(|var| (var.name, var.value))
            .collect();
        let limit = p
            .output_byte_limit
            .and_then(|l| usize::try_from(l).ok())
            .unwrap_or(self.config.terminal_output_limit);

        let handle = TerminalHandle::spawn(
            &p.session_id,
            &p.command,
            &p.args,
            &env,
            &cwd,
            limit,
            self.term_event_tx.clone(),
        )?;
        let terminal_id = handle.id().to_owned();
        self.terminals
            .lock()
            .await
            .insert(terminal_id.clone(), handle);

        Ok(json!({ "terminalId": terminal_id }))
    }

    async fn on_terminal_output(&self, params: Value) -> Result<Value> {
        let p: TerminalIdParams = parse_params(params)?;
        let terminals = self.terminals.lock().await;
        // A poll racing a release is benign, not an error.
        let Some(handle) = terminals.get(&p.terminal_id) else {
            return Ok(json!({ "output": "", "truncated": false, "exitStatus": Value::Null }));
        };
        let output = handle.output();
        Ok(json!({
            "output": output.output,
            "truncated": output.truncated,
            "exitStatus": output.exit_status.map_or(Value::Null, terminal::TerminalExitStatus::to_value),
        }))
    }

    async fn on_terminal_wait(&self, params: Value) -> Result<Value> {
        let p: TerminalIdParams = parse_params(params)?;
        let exit_rx = {
            let terminals = self.terminals.lock().await;
            terminals.get(&p.terminal_id).map(TerminalHandle::exit_watch)
        };
        let Some(exit_rx) = exit_rx else {
            return Ok(json!({ "exitStatus": Value::Null }));
        };
        let status = terminal::wait_on(exit_rx).await;
        Ok(json!({ "exitStatus": status.to_value() }))
    }

    async fn on_terminal_kill(&self, params: Value) -> Result<Value> {
        let p: TerminalIdParams = parse_params(params)?;
        let terminals = self.terminals.lock().await;
        if let Some(handle) = terminals.get(&p.terminal_id) {
            handle.kill().await;
        }
        Ok(Value::Null)
    }

    async fn on_terminal_release(&self, params: Value) -> Result<Value> {
        let p: TerminalIdParams = parse_params(params)?;
        let mut terminals = self.terminals.lock().await;
        if let Some(mut handle) = terminals.remove(&p.terminal_id) {
            handle.release();
        }
        Ok(Value::Null)
    }
}

impl CallbackHandler for SessionManager {
    fn handle(
        &self,
        method: String,
        params: Value,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Value>> + Send + '_>> {
        Box::pin(async move {
            match method.as_str() {
                "fs/read_text_file" => self.on_read_text_file(params).await,
                "fs/write_text_file" => self.on_write_text_file(params).await,
                "session/request_permission" => self.on_request_permission(params).await,
                "terminal/create" => self.on_terminal_create(params).await,
                "terminal/output" => self.on_terminal_output(params).await,
                "terminal/wait_for_exit" => self.on_terminal_wait(params).await,
                "terminal/kill" => self.on_terminal_kill(params).await,
                "terminal/release" => self.on_terminal_release(params).await,
                other => Err(ClientError::MethodNotFound(other.to_owned())),
            }
        })
    }
}

// ── Callback parameter shapes ─────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReadTextFileParams {
    session_id: String,
    path: PathBuf,
    #[serde(default)]
    line: Option<u64>,
    #[serde(default)]
    limit: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WriteTextFileParams {
    session_id: String,
    path: PathBuf,
    content: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RequestPermissionParams {
    session_id: String,
    #[serde(default)]
    tool_call: Option<Value>,
    #[serde(default)]
    options: Vec<PermissionOptionWire>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EnvVar {
    name: String,
    value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TerminalCreateParams {
    session_id: String,
    command: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: Vec<EnvVar>,
    #[serde(default)]
    cwd: Option<PathBuf>,
    #[serde(default)]
    output_byte_limit: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TerminalIdParams {
    #[allow(dead_code)]
    #[serde(default)]
    session_id: Option<String>,
    terminal_id: String,
}

// ── Private helpers ───────────────────────────────────────────────────────

/// Deserialize callback params, mapping failures to an invalid-params reply.
fn parse_params<T: serde::de::DeserializeOwned>(params: Value) -> Result<T> {
    serde_json::from_value(params)
        .map_err(|err| ClientError::InvalidArgument(format!("invalid params: {err}")))
}

/// Canonicalize a caller-supplied workspace root.
fn canonical_workspace(root: &Path) -> Result<PathBuf> {
    root.canonicalize()
        .map_err(|err| ClientError::InvalidArgument(format!("workspace root invalid: {err}")))
}

/// Extract inline mode information from a session response, if present.
fn mode_state_of(response: &Value) -> Option<ModeState> {
    response
        .get("modes")
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
}

impl SessionManager {
    /// Register (or refresh) session state after creation.
    async fn register_session(&self, session_id: &str, root: PathBuf, mode: Option<ModeState>) {
        let mut sessions = self.sessions.lock().await;
        let state = sessions.entry(session_id.to_owned()).or_default();
        state.workspace_root = Some(root);
        if mode.is_some() {
            state.mode = mode;
        }
    }
}

/// Forward live updates into a turn stream, closing it right after the
/// terminal event.
async fn forward_turn(
    mut live_rx: mpsc::UnboundedReceiver<SessionUpdate>,
    turn_tx: mpsc::UnboundedSender<SessionUpdate>,
) {
    while let Some(update) = live_rx.recv().await {
        let is_end = matches!(update, SessionUpdate::TurnEnded { .. });
        if turn_tx.send(update).is_err() {
            break;
        }
        if is_end {
            break;
        }
    }
}
