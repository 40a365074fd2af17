//! The client facade: wires transport, peer, and session layer together.
//!
//! [`AcpClient`] is the single entry point a host application needs: it
//! spawns (or attaches to) an agent, performs protocol setup, and delegates
//! session, terminal, and raw-protocol operations to the layers below.

use std::collections::HashMap;
use std::path::Path;
use std::process::ExitStatus;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::channel::LineChannel;
use crate::config::{ClientCapabilities, ClientConfig};
use crate::fs::{FsProvider, LocalFs};
use crate::policy::PermissionPolicy;
use crate::rpc::Peer;
use crate::session::{
    ContentBlock, InitializeResponse, ModeState, SessionManager, SessionUpdate, ToolCall,
};
use crate::terminal::{TerminalEvent, TerminalExitStatus, TerminalOutput};
use crate::transport::ProcessTransport;
use crate::Result;

/// Capacity of the raw session-update queue between peer and demux.
const UPDATE_QUEUE_DEPTH: usize = 256;

/// Connected client over one agent process (or in-memory transport).
///
/// Dropping the client does not stop the agent; call [`AcpClient::stop`]
/// for an orderly shutdown. An abandoned subprocess is still reaped through
/// the transport's `kill_on_drop` spawn flag.
pub struct AcpClient {
    transport: Option<ProcessTransport>,
    peer: Arc<Peer>,
    manager: Arc<SessionManager>,
    demux: JoinHandle<()>,
}

impl std::fmt::Debug for AcpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcpClient")
            .field("pid", &self.pid())
            .finish_non_exhaustive()
    }
}

impl AcpClient {
    /// Spawn the configured agent subprocess and connect to it, reading and
    /// writing files through the local filesystem.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidArgument`](crate::ClientError) for a
    /// config that fails validation and
    /// [`ClientError::Transport`](crate::ClientError) if the process cannot
    /// be started or crashes within the startup grace period.
    pub async fn spawn(config: ClientConfig, policy: Arc<dyn PermissionPolicy>) -> Result<Self> {
        Self::spawn_with_fs(config, policy, Arc::new(LocalFs)).await
    }

    /// Spawn with a custom filesystem provider (virtual workspaces, tests).
    ///
    /// # Errors
    ///
    /// Same surface as [`AcpClient::spawn`].
    pub async fn spawn_with_fs(
        mut config: ClientConfig,
        policy: Arc<dyn PermissionPolicy>,
        fs: Arc<dyn FsProvider>,
    ) -> Result<Self> {
        config.validate()?;
        let mut transport = ProcessTransport::start(&config).await?;
        let channel = transport
            .take_channel()
            .ok_or_else(|| crate::ClientError::Transport("transport channel missing".into()))?;

        let (peer, manager, demux) = wire(channel, config, policy, fs).await?;
        info!(pid = transport.pid(), "client connected to agent");
        Ok(Self {
            transport: Some(transport),
            peer,
            manager,
            demux,
        })
    }

    /// Attach to an already-framed transport instead of spawning a process.
    /// Used with in-memory duplex pipes in tests and embedded agents.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidArgument`](crate::ClientError) for a
    /// config that fails validation (the `program` field is still required
    /// to be non-empty) and [`ClientError::Protocol`](crate::ClientError)
    /// if the channel's inbound side was already taken.
    pub async fn connect(
        channel: LineChannel,
        mut config: ClientConfig,
        policy: Arc<dyn PermissionPolicy>,
        fs: Arc<dyn FsProvider>,
    ) -> Result<Self> {
        config.validate()?;
        let (peer, manager, demux) = wire(channel, config, policy, fs).await?;
        debug!("client connected over external channel");
        Ok(Self {
            transport: None,
            peer,
            manager,
            demux,
        })
    }

    /// OS process id of the spawned agent, when one exists.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.transport.as_ref().and_then(ProcessTransport::pid)
    }

    /// Watch resolving to the agent process's exit status, when a process
    /// transport is in use.
    #[must_use]
    pub fn exit_status(&self) -> Option<watch::Receiver<Option<ExitStatus>>> {
        self.transport.as_ref().map(ProcessTransport::exit_status)
    }

    // ── Protocol operations ──────────────────────────────────────────────

    /// Negotiate protocol version and exchange capabilities.
    ///
    /// # Errors
    ///
    /// See [`SessionManager::initialize`].
    pub async fn initialize(&self, capabilities: &ClientCapabilities) -> Result<InitializeResponse> {
        self.manager.initialize(capabilities).await
    }

    /// Create a new session rooted at `workspace_root`, returning its id.
    ///
    /// # Errors
    ///
    /// See [`SessionManager::new_session`].
    pub async fn new_session(&self, workspace_root: &Path) -> Result<String> {
        self.manager.new_session(workspace_root).await
    }

    /// Resume an existing session, replaying its history as updates.
    ///
    /// # Errors
    ///
    /// See [`SessionManager::load_session`].
    pub async fn load_session(&self, session_id: &str, workspace_root: &Path) -> Result<()> {
        self.manager.load_session(session_id, workspace_root).await
    }

    /// Send a prompt; the returned stream carries this turn's updates and
    /// closes after the turn-ended event.
    ///
    /// # Errors
    ///
    /// See [`SessionManager::prompt`].
    pub async fn prompt(
        &self,
        session_id: &str,
        content: Vec<ContentBlock>,
    ) -> Result<mpsc::UnboundedReceiver<SessionUpdate>> {
        self.manager.prompt(session_id, content).await
    }

    /// Cancel the session's in-flight turn.
    ///
    /// # Errors
    ///
    /// See [`SessionManager::cancel`].
    pub async fn cancel(&self, session_id: &str) -> Result<()> {
        self.manager.cancel(session_id).await
    }

    /// Subscribe to a session's full history plus live tail.
    ///
    /// # Errors
    ///
    /// See [`SessionManager::subscribe`].
    pub async fn subscribe(
        &self,
        session_id: &str,
    ) -> Result<mpsc::UnboundedReceiver<SessionUpdate>> {
        self.manager.subscribe(session_id).await
    }

    /// Snapshot of a session's merged tool-call table.
    ///
    /// # Errors
    ///
    /// See [`SessionManager::tool_calls`].
    pub async fn tool_calls(&self, session_id: &str) -> Result<HashMap<String, ToolCall>> {
        self.manager.tool_calls(session_id).await
    }

    /// Current mode state, when the agent advertises modes.
    ///
    /// # Errors
    ///
    /// See [`SessionManager::modes`].
    pub async fn modes(&self, session_id: &str) -> Result<Option<ModeState>> {
        self.manager.modes(session_id).await
    }

    /// Ask the agent to switch modes.
    ///
    /// # Errors
    ///
    /// See [`SessionManager::set_mode`].
    pub async fn set_mode(&self, session_id: &str, mode_id: &str) -> Result<()> {
        self.manager.set_mode(session_id, mode_id).await
    }

    // ── Terminal observation ─────────────────────────────────────────────

    /// Take the terminal lifecycle event stream. Yields `None` after the
    /// first call.
    pub async fn terminal_events(&self) -> Option<mpsc::UnboundedReceiver<TerminalEvent>> {
        self.manager.terminal_events().await
    }

    /// Buffered output snapshot for a terminal.
    ///
    /// # Errors
    ///
    /// See [`SessionManager::terminal_output`].
    pub async fn terminal_output(&self, terminal_id: &str) -> Result<TerminalOutput> {
        self.manager.terminal_output(terminal_id).await
    }

    /// Wait for a terminal process to exit.
    ///
    /// # Errors
    ///
    /// See [`SessionManager::wait_for_terminal`].
    pub async fn wait_for_terminal(&self, terminal_id: &str) -> Result<TerminalExitStatus> {
        self.manager.wait_for_terminal(terminal_id).await
    }

    /// Kill a terminal process without releasing its output buffer.
    ///
    /// # Errors
    ///
    /// See [`SessionManager::kill_terminal`].
    pub async fn kill_terminal(&self, terminal_id: &str) -> Result<()> {
        self.manager.kill_terminal(terminal_id).await
    }

    /// Release a terminal, dropping its buffer and supervision.
    ///
    /// # Errors
    ///
    /// See [`SessionManager::release_terminal`].
    pub async fn release_terminal(&self, terminal_id: &str) -> Result<()> {
        self.manager.release_terminal(terminal_id).await
    }

    // ── Raw protocol escape hatch ────────────────────────────────────────

    /// Send an arbitrary request to the agent and await its result.
    ///
    /// For protocol extensions this crate does not model; the payload is
    /// passed through untouched.
    ///
    /// # Errors
    ///
    /// See [`Peer::request`].
    pub async fn raw_request(&self, method: &str, params: Value) -> Result<Value> {
        self.peer.request(method, params).await
    }

    /// Send an arbitrary notification to the agent.
    ///
    /// # Errors
    ///
    /// See [`Peer::notify`].
    pub async fn raw_notify(&self, method: &str, params: Value) -> Result<()> {
        self.peer.notify(method, params).await
    }

    // ── Shutdown ─────────────────────────────────────────────────────────

    /// Orderly shutdown: session layer first, then the peer, then the
    /// process (graceful termination escalating to a forced kill).
    ///
    /// Idempotent in effect; each stage is best-effort and independent.
    pub async fn stop(mut self) {
        self.manager.close().await;
        self.peer.close().await;
        if let Some(mut transport) = self.transport.take() {
            transport.stop().await;
        }
        self.demux.abort();
        info!("client stopped");
    }
}

/// Two-phase construction: the peer needs the channel's outbound sender
/// before the manager exists, and the manager must be registered as the
/// peer's callback handler before any inbound traffic is consumed.
async fn wire(
    channel: LineChannel,
    config: ClientConfig,
    policy: Arc<dyn PermissionPolicy>,
    fs: Arc<dyn FsProvider>,
) -> Result<(Arc<Peer>, Arc<SessionManager>, JoinHandle<()>)> {
    let peer = Arc::new(Peer::new(channel.outbound()));
    let manager = Arc::new(SessionManager::new(Arc::clone(&peer), config, policy, fs));

    let (update_tx, demux) = manager.start_demux(UPDATE_QUEUE_DEPTH);
    peer.serve(
        channel,
        Arc::clone(&manager) as Arc<dyn crate::rpc::CallbackHandler>,
        update_tx,
    )
    .await?;

    Ok((peer, manager, demux))
}
