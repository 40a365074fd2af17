//! Client configuration and capability declaration.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::{ClientError, Result};

/// Minimum (and currently only) ACP protocol version this client speaks.
pub const PROTOCOL_VERSION: u64 = 1;

fn default_startup_grace_ms() -> u64 {
    150
}

fn default_shutdown_timeout_secs() -> u64 {
    5
}

fn default_terminal_output_limit() -> usize {
    1_048_576
}

fn default_true() -> bool {
    true
}

/// Capability flags declared to the agent during `initialize`.
///
/// The `terminal` flag is a non-standard but widely honored extension; it is
/// advertised at the top level of `clientCapabilities` alongside the `fs`
/// capability object.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ClientCapabilities {
    /// Whether the agent may call `fs/read_text_file`.
    #[serde(default = "default_true")]
    pub read_text_file: bool,
    /// Whether the agent may call `fs/write_text_file`.
    #[serde(default = "default_true")]
    pub write_text_file: bool,
    /// Whether the agent may manage terminals through this client.
    #[serde(default = "default_true")]
    pub terminal: bool,
}

impl Default for ClientCapabilities {
    fn default() -> Self {
        Self {
            read_text_file: true,
            write_text_file: true,
            terminal: true,
        }
    }
}

/// Configuration for one [`AcpClient`](crate::AcpClient) instance.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct ClientConfig {
    /// Agent executable (e.g. `claude-code-acp`, `gemini`).
    pub program: String,
    /// Arguments passed to the agent executable.
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment overrides merged on top of the parent environment.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Working directory for the agent process; defaults to the parent's.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// Auxiliary MCP server descriptors forwarded on `session/new` and
    /// `session/load`, kept as raw JSON since their schema is agent-defined.
    #[serde(default)]
    pub mcp_servers: Vec<serde_json::Value>,
    /// Allow `fs/read_text_file` to reach paths outside the workspace root.
    /// Writes are always confined to the root regardless of this flag.
    #[serde(default)]
    pub allow_outside_workspace_reads: bool,
    /// How long to wait after spawn before probing for an immediate crash.
    #[serde(default = "default_startup_grace_ms")]
    pub startup_grace_ms: u64,
    /// How long `stop` waits for a graceful exit before force-killing.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
    /// Byte cap on a managed terminal's buffered output; the oldest bytes
    /// are dropped once the cap is exceeded.
    #[serde(default = "default_terminal_output_limit")]
    pub terminal_output_limit: usize,
}

impl ClientConfig {
    /// Build a config for `program` with every other field defaulted.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: HashMap::new(),
            working_dir: None,
            mcp_servers: Vec::new(),
            allow_outside_workspace_reads: false,
            startup_grace_ms: default_startup_grace_ms(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            terminal_output_limit: default_terminal_output_limit(),
        }
    }

    /// Startup crash-probe grace period.
    #[must_use]
    pub fn startup_grace(&self) -> Duration {
        Duration::from_millis(self.startup_grace_ms)
    }

    /// Graceful-shutdown wait before escalating to a forced kill.
    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Validate field constraints and normalize the working directory.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidArgument`] if `program` is empty,
    /// `terminal_output_limit` is zero, or `working_dir` does not resolve.
    pub fn validate(&mut self) -> Result<()> {
        if self.program.trim().is_empty() {
            return Err(ClientError::InvalidArgument(
                "program must not be empty".into(),
            ));
        }

        if self.terminal_output_limit == 0 {
            return Err(ClientError::InvalidArgument(
                "terminal_output_limit must be greater than zero".into(),
            ));
        }

        if let Some(dir) = &self.working_dir {
            let canonical = dir.canonicalize().map_err(|err| {
                ClientError::InvalidArgument(format!("working_dir invalid: {err}"))
            })?;
            self.working_dir = Some(canonical);
        }

        Ok(())
    }
}
