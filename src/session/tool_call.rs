//! Tool-call records and partial-update merge semantics.
//!
//! A tool call's lifecycle arrives as one `tool_call` notification followed
//! by any number of `tool_call_update` deltas. The deltas are sparse: a
//! field is overwritten only when the incoming update explicitly supplies a
//! value, so previously known state (title, kind, locations, payloads) is
//! never erased by an update that omits it.

use std::path::PathBuf;

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

/// Tool-call lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolCallStatus {
    /// Reported but not yet started.
    Pending,
    /// Currently executing.
    InProgress,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
    /// Aborted before completion.
    Cancelled,
}

impl ToolCallStatus {
    /// Parse a wire status string; unknown values yield `None` so a merge
    /// keeps the previous status instead of guessing.
    #[must_use]
    pub fn from_wire(status: &str) -> Option<Self> {
        match status {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            other => {
                debug!(status = other, "unknown tool call status, ignoring");
                None
            }
        }
    }
}

/// Classification of what a tool call does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    /// Reads files or data.
    Read,
    /// Modifies files.
    Edit,
    /// Removes files.
    Delete,
    /// Moves or renames files.
    Move,
    /// Searches for information.
    Search,
    /// Runs a command or program.
    Execute,
    /// Internal reasoning step.
    Think,
    /// Retrieves remote data.
    Fetch,
    /// Anything else.
    Other,
}

impl ToolKind {
    /// Parse a wire kind string; unknown values map to [`Self::Other`].
    #[must_use]
    pub fn from_wire(kind: &str) -> Self {
        match kind {
            "read" => Self::Read,
            "edit" => Self::Edit,
            "delete" => Self::Delete,
            "move" => Self::Move,
            "search" => Self::Search,
            "execute" => Self::Execute,
            "think" => Self::Think,
            "fetch" => Self::Fetch,
            _ => Self::Other,
        }
    }
}

/// File location a tool call touches.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallLocation {
    /// Path of the touched file.
    pub path: PathBuf,
    /// Optional 1-based line within the file.
    #[serde(default)]
    pub line: Option<u64>,
}

/// Sparse wire payload shared by `tool_call` and `tool_call_update`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ToolCallWire {
    pub tool_call_id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub locations: Option<Vec<ToolCallLocation>>,
    #[serde(default)]
    pub raw_input: Option<Value>,
    #[serde(default)]
    pub raw_output: Option<Value>,
    #[serde(default)]
    pub content: Option<Vec<Value>>,
}

/// One agent-invoked tool/action within a session.
///
/// The id is stable across updates; every other field reflects the latest
/// explicitly supplied value.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    /// Session-scoped identifier, stable across updates.
    pub id: String,
    /// Current lifecycle status.
    pub status: ToolCallStatus,
    /// Human-readable title.
    pub title: Option<String>,
    /// What the tool does.
    pub kind: Option<ToolKind>,
    /// File locations the call touches.
    pub locations: Option<Vec<ToolCallLocation>>,
    /// Raw input payload, schema agent-defined.
    pub raw_input: Option<Value>,
    /// Raw output payload, schema agent-defined.
    pub raw_output: Option<Value>,
    /// Content blocks produced by the call, kept raw.
    pub content: Option<Vec<Value>>,
}

impl ToolCall {
    /// Construct a record from a full `tool_call` payload.
    pub(crate) fn from_wire(wire: ToolCallWire) -> Self {
        Self {
            id: wire.tool_call_id,
            status: wire
                .status
                .as_deref()
                .and_then(ToolCallStatus::from_wire)
                .unwrap_or(ToolCallStatus::Pending),
            title: wire.title,
            kind: wire.kind.as_deref().map(ToolKind::from_wire),
            locations: wire.locations,
            raw_input: wire.raw_input,
            raw_output: wire.raw_output,
            content: wire.content,
        }
    }

    /// Produce a new record with each field taken from `wire` when it
    /// supplies a value, else carried over from `self`. Idempotent: merging
    /// the same delta twice yields the same record as merging it once.
    #[must_use]
    pub(crate) fn merged_with(&self, wire: ToolCallWire) -> Self {
        Self {
            id: self.id.clone(),
            status: wire
                .status
                .as_deref()
                .and_then(ToolCallStatus::from_wire)
                .unwrap_or(self.status),
            title: wire.title.or_else(|| self.title.clone()),
            kind: wire.kind.as_deref().map(ToolKind::from_wire).or(self.kind),
            locations: wire.locations.or_else(|| self.locations.clone()),
            raw_input: wire.raw_input.or_else(|| self.raw_input.clone()),
            raw_output: wire.raw_output.or_else(|| self.raw_output.clone()),
            content: wire.content.or_else(|| self.content.clone()),
        }
    }
}
