//! Managed terminal subprocesses spawned on the agent's behalf.
//!
//! Each [`TerminalHandle`] owns one OS process created through the
//! `terminal/create` callback: its stdout and stderr are drained into a
//! shared append-only buffer (binary-safe, lossy-decoded on read, oldest
//! bytes dropped past the configured cap) and its exit status is recorded
//! into a watch channel so polls can peek without blocking.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{ClientError, Result};

/// Lifecycle events emitted for host observability.
#[derive(Debug, Clone)]
pub enum TerminalEvent {
    /// A terminal process was spawned.
    Created {
        /// Terminal identifier.
        terminal_id: String,
        /// Owning session.
        session_id: String,
        /// Command line being run.
        command: String,
    },
    /// A terminal process exited.
    Exited {
        /// Terminal identifier.
        terminal_id: String,
        /// Recorded exit status.
        status: TerminalExitStatus,
    },
    /// A terminal was released by the agent.
    Released {
        /// Terminal identifier.
        terminal_id: String,
    },
}

/// Exit status of a terminal process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TerminalExitStatus {
    /// Process exit code, when it exited normally.
    pub exit_code: Option<i32>,
    /// Terminating signal number, when killed (unix only).
    pub signal: Option<i32>,
}

impl TerminalExitStatus {
    /// Wire encoding for `terminal/output` and `terminal/wait_for_exit`.
    #[must_use]
    pub fn to_value(self) -> Value {
        json!({ "exitCode": self.exit_code, "signal": self.signal })
    }
}

/// Append-only output buffer with front truncation past the byte cap.
#[derive(Debug)]
struct OutputBuffer {
    data: Vec<u8>,
    truncated: bool,
    limit: usize,
}

impl OutputBuffer {
    fn append(&mut self, chunk: &[u8]) {
        self.data.extend_from_slice(chunk);
        if self.data.len() > self.limit {
            let excess = self.data.len() - self.limit;
            self.data.drain(..excess);
            self.truncated = true;
        }
    }
}

/// Snapshot returned by an output poll.
#[derive(Debug, Clone)]
pub struct TerminalOutput {
    /// Buffered output so far, lossy-decoded.
    pub output: String,
    /// Whether older output was dropped to honor the byte cap.
    pub truncated: bool,
    /// Non-blocking peek at the exit status.
    pub exit_status: Option<TerminalExitStatus>,
}

/// One managed terminal process.
#[derive(Debug)]
pub struct TerminalHandle {
    id: String,
    session_id: String,
    buffer: Arc<Mutex<OutputBuffer>>,
    exit_rx: watch::Receiver<Option<TerminalExitStatus>>,
    kill_tx: mpsc::Sender<()>,
    cancel: CancellationToken,
    events: mpsc::UnboundedSender<TerminalEvent>,
    released: bool,
}

impl TerminalHandle {
    /// Spawn a terminal process and begin draining its output.
    ///
    /// The working directory must already be resolved and jailed by the
    /// caller. The process is spawned with `kill_on_drop(true)` so a
    /// dropped handle cannot leak it.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Transport`] if the spawn fails or a stdio
    /// pipe cannot be captured.
    pub fn spawn(
        session_id: &str,
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
        cwd: &Path,
        output_limit: usize,
        events: mpsc::UnboundedSender<TerminalEvent>,
    ) -> Result<Self> {
        let id = Uuid::new_v4().to_string();

        let mut cmd = Command::new(command);
        cmd.args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in env {
            cmd.env(key, value);
        }

        let mut child = cmd
            .spawn()
            .map_err(|err| ClientError::Transport(format!("failed to spawn terminal: {err}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ClientError::Transport("failed to capture terminal stdout".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ClientError::Transport("failed to capture terminal stderr".into()))?;

        let buffer = Arc::new(Mutex::new(OutputBuffer {
            data: Vec::new(),
            truncated: false,
            limit: output_limit,
        }));
        let cancel = CancellationToken::new();
        let (exit_tx, exit_rx) = watch::channel(None);
        let (kill_tx, kill_rx) = mpsc::channel(4);

        tokio::spawn(drain_stream(stdout, Arc::clone(&buffer), cancel.clone()));
        tokio::spawn(drain_stream(stderr, Arc::clone(&buffer), cancel.clone()));
        tokio::spawn(supervise(
            child,
            id.clone(),
            kill_rx,
            exit_tx,
            events.clone(),
            cancel.clone(),
        ));

        let _ = events.send(TerminalEvent::Created {
            terminal_id: id.clone(),
            session_id: session_id.to_owned(),
            command: command.to_owned(),
        });
        debug!(terminal_id = %id, session_id, command, "terminal spawned");

        Ok(Self {
            id,
            session_id: session_id.to_owned(),
            buffer,
            exit_rx,
            kill_tx,
            cancel,
            events,
            released: false,
        })
    }

    /// Caller-visible terminal identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Session this terminal belongs to.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Snapshot the buffered output plus a non-blocking exit peek.
    #[must_use]
    pub fn output(&self) -> TerminalOutput {
        let (output, truncated) = match self.buffer.lock() {
            Ok(buf) => (String::from_utf8_lossy(&buf.data).into_owned(), buf.truncated),
            Err(_) => (String::new(), false),
        };
        TerminalOutput {
            output,
            truncated,
            exit_status: *self.exit_rx.borrow(),
        }
    }

    /// Clonable watch over the exit status, for waiting without borrowing
    /// the handle (and the table guarding it) across an await.
    #[must_use]
    pub fn exit_watch(&self) -> watch::Receiver<Option<TerminalExitStatus>> {
        self.exit_rx.clone()
    }

    /// Block until the process exits and return its status.
    pub async fn wait_for_exit(&self) -> TerminalExitStatus {
        wait_on(self.exit_rx.clone()).await
    }

    /// Send a kill signal to the process. Idempotent.
    pub async fn kill(&self) {
        let _ = self.kill_tx.send(()).await;
    }

    /// Cancel the drain tasks and supervisor. Idempotent; the process is
    /// torn down through `kill_on_drop` if still running.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.cancel.cancel();
        let _ = self.events.send(TerminalEvent::Released {
            terminal_id: self.id.clone(),
        });
    }
}

/// Await an exit status on a cloned watch receiver.
pub async fn wait_on(
    mut exit_rx: watch::Receiver<Option<TerminalExitStatus>>,
) -> TerminalExitStatus {
    loop {
        if let Some(status) = *exit_rx.borrow() {
            return status;
        }
        if exit_rx.changed().await.is_err() {
            // Supervisor gone without recording a status.
            return TerminalExitStatus::default();
        }
    }
}

/// Drain one output stream into the shared buffer.
async fn drain_stream<R>(mut stream: R, buffer: Arc<Mutex<OutputBuffer>>, cancel: CancellationToken)
where
    R: AsyncReadExt + Unpin + Send,
{
    let mut chunk = [0u8; 4096];
    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => break,

            read = stream.read(&mut chunk) => {
                match read {
                    Ok(0) => break,
                    Ok(n) => {
                        if let Ok(mut buf) = buffer.lock() {
                            buf.append(&chunk[..n]);
                        }
                    }
                    Err(err) => {
                        debug!(%err, "terminal output stream read failed, stopping drain");
                        break;
                    }
                }
            }
        }
    }
}

/// Supervisor task: wait for exit, service kill requests, record status.
async fn supervise(
    mut child: Child,
    terminal_id: String,
    mut kill_rx: mpsc::Receiver<()>,
    exit_tx: watch::Sender<Option<TerminalExitStatus>>,
    events: mpsc::UnboundedSender<TerminalEvent>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                // Released while running; kill_on_drop reaps the process.
                debug!(terminal_id, "terminal released before exit");
                return;
            }
            result = child.wait() => {
                match result {
                    Ok(status) => {
                        let recorded = exit_status_of(status);
                        let _ = exit_tx.send(Some(recorded));
                        let _ = events.send(TerminalEvent::Exited {
                            terminal_id: terminal_id.clone(),
                            status: recorded,
                        });
                        debug!(terminal_id, ?recorded, "terminal exited");
                    }
                    Err(err) => {
                        warn!(terminal_id, %err, "error waiting for terminal process");
                        let _ = exit_tx.send(Some(TerminalExitStatus::default()));
                    }
                }
                return;
            }
            Some(()) = kill_rx.recv() => {
                debug!(terminal_id, "killing terminal process");
                let _ = child.start_kill();
            }
        }
    }
}

#[cfg(unix)]
fn exit_status_of(status: std::process::ExitStatus) -> TerminalExitStatus {
    use std::os::unix::process::ExitStatusExt;
    TerminalExitStatus {
        exit_code: status.code(),
        signal: status.signal(),
    }
}

#[cfg(not(unix))]
fn exit_status_of(status: std::process::ExitStatus) -> TerminalExitStatus {
    TerminalExitStatus {
        exit_code: status.code(),
        signal: None,
    }
}
