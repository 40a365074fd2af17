//! Agent subprocess transport.
//!
//! Spawns the agent executable with the parent environment merged with the
//! configured overrides, detects immediate crash-on-start, supervises the
//! process exit asynchronously, and owns graceful/forced shutdown.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::channel::LineChannel;
use crate::config::ClientConfig;
use crate::{ClientError, Result};

/// Shutdown escalation steps understood by the exit monitor.
#[derive(Debug, Clone, Copy)]
enum KillSignal {
    /// Polite termination request (SIGTERM on unix).
    Graceful,
    /// Unconditional kill (SIGKILL on unix).
    Force,
}

/// Wait bound for the forced-kill fallback during `stop`.
const FORCE_KILL_WAIT: Duration = Duration::from_secs(5);

/// Handle to a spawned agent process.
///
/// Owns the child's lifecycle: the [`LineChannel`] built over its stdio
/// (taken once by the RPC layer), the exit-monitor task, and the
/// graceful-then-forced shutdown sequence. The child is spawned with
/// `kill_on_drop(true)` so an abandoned transport cannot leak a process.
#[derive(Debug)]
pub struct ProcessTransport {
    pid: Option<u32>,
    channel: Option<LineChannel>,
    kill_tx: mpsc::Sender<KillSignal>,
    exit_rx: watch::Receiver<Option<ExitStatus>>,
    monitor: JoinHandle<()>,
    shutdown_timeout: Duration,
}

impl ProcessTransport {
    /// Spawn the configured agent executable and begin supervising it.
    ///
    /// The parent environment is inherited and the configured override map
    /// is merged on top. After spawning, the startup grace period elapses
    /// and the child is probed once: a process that already exited fails
    /// `start` with a descriptive error naming the exit code, rather than
    /// handing back a dead channel whose first write would break a pipe.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Transport`] if the spawn fails, a stdio pipe
    /// cannot be captured, or the process exits within the grace period.
    pub async fn start(config: &ClientConfig) -> Result<Self> {
        let mut cmd = Command::new(&config.program);
        cmd.args(&config.args);
        for (key, value) in &config.env {
            cmd.env(key, value);
        }
        if let Some(dir) = &config.working_dir {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|err| ClientError::Transport(format!("failed to spawn agent: {err}")))?;
        let pid = child.id();

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ClientError::Transport("failed to capture agent stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ClientError::Transport("failed to capture agent stdout".into()))?;
        let stderr = child.stderr.take();

        // Crash probe: give the process a moment, then check it is alive.
        tokio::time::sleep(config.startup_grace()).await;
        let probe = child
            .try_wait()
            .map_err(|err| ClientError::Transport(format!("failed to probe agent: {err}")))?;
        if let Some(status) = probe {
            return Err(ClientError::Transport(format!(
                "agent exited during startup: {}",
                describe_exit(status)
            )));
        }

        info!(pid, program = %config.program, "agent process started");

        let channel = LineChannel::from_io(stdin, stdout, stderr);
        let (kill_tx, kill_rx) = mpsc::channel(4);
        let (exit_tx, exit_rx) = watch::channel(None);
        let monitor = tokio::spawn(monitor_exit(child, pid, kill_rx, exit_tx));

        Ok(Self {
            pid,
            channel: Some(channel),
            kill_tx,
            exit_rx,
            monitor,
            shutdown_timeout: config.shutdown_timeout(),
        })
    }

    /// OS process identifier, if the process had not already exited at
    /// spawn time.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Watch receiver resolving to the agent's exit status.
    ///
    /// Starts at `None` and changes exactly once when the process exits,
    /// letting a caller correlate agent crashes deterministically instead
    /// of polling the OS process table.
    #[must_use]
    pub fn exit_status(&self) -> watch::Receiver<Option<ExitStatus>> {
        self.exit_rx.clone()
    }

    /// Take the stdio line channel. Yields `None` after the first call.
    pub fn take_channel(&mut self) -> Option<LineChannel> {
        self.channel.take()
    }

    /// Stop the agent process.
    ///
    /// Disposes the channel (if still owned here), requests a graceful
    /// termination, waits up to the configured shutdown timeout, and
    /// escalates to a forced kill. Every step is independent and
    /// best-effort: a failure in one never prevents the next.
    pub async fn stop(&mut self) {
        if let Some(channel) = self.channel.take() {
            channel.close().await;
        }

        if self.exit_rx.borrow().is_some() {
            debug!(pid = self.pid, "agent already exited, nothing to stop");
            return;
        }

        let _ = self.kill_tx.send(KillSignal::Graceful).await;

        let mut exit_rx = self.exit_rx.clone();
        let graceful = tokio::time::timeout(self.shutdown_timeout, exit_rx.changed()).await;
        if graceful.is_err() {
            warn!(
                pid = self.pid,
                "agent did not exit within shutdown timeout, forcing kill"
            );
            let _ = self.kill_tx.send(KillSignal::Force).await;
            let _ = tokio::time::timeout(FORCE_KILL_WAIT, exit_rx.changed()).await;
        }

        self.monitor.abort();
    }
}

/// Exit monitor task: waits for the child to exit, records the status, and
/// services kill requests in the meantime.
async fn monitor_exit(
    mut child: Child,
    pid: Option<u32>,
    mut kill_rx: mpsc::Receiver<KillSignal>,
    exit_tx: watch::Sender<Option<ExitStatus>>,
) {
    loop {
        tokio::select! {
            result = child.wait() => {
                match result {
                    Ok(status) => {
                        if status.success() {
                            debug!(pid, "agent exited cleanly");
                        } else {
                            warn!(pid, status = %describe_exit(status), "agent exited abnormally");
                        }
                        let _ = exit_tx.send(Some(status));
                    }
                    Err(err) => {
                        warn!(pid, %err, "error waiting for agent process");
                    }
                }
                break;
            }
            Some(signal) = kill_rx.recv() => {
                match signal {
                    KillSignal::Graceful => {
                        debug!(pid, "sending graceful termination to agent");
                        terminate_gracefully(pid, &mut child);
                    }
                    KillSignal::Force => {
                        debug!(pid, "force-killing agent");
                        let _ = child.start_kill();
                    }
                }
            }
        }
    }
}

/// Human-readable exit description, naming the code or signal.
fn describe_exit(status: ExitStatus) -> String {
    status.code().map_or_else(
        || "terminated by signal".to_owned(),
        |code| format!("exit code {code}"),
    )
}

#[cfg(unix)]
fn terminate_gracefully(pid: Option<u32>, child: &mut Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let raw = pid.and_then(|p| i32::try_from(p).ok());
    if let Some(raw) = raw {
        if let Err(err) = kill(Pid::from_raw(raw), Signal::SIGTERM) {
            warn!(pid, %err, "SIGTERM failed, falling back to kill");
            let _ = child.start_kill();
        }
    } else {
        let _ = child.start_kill();
    }
}

#[cfg(not(unix))]
fn terminate_gracefully(_pid: Option<u32>, child: &mut Child) {
    // No portable polite signal; go straight to the hard kill.
    let _ = child.start_kill();
}
