//! Typed session updates and the raw-notification demultiplexer.
//!
//! Every `session/update` notification carries an `update` object whose
//! `sessionUpdate` field discriminates its variant. The demultiplexer maps
//! each raw object into exactly one [`SessionUpdate`]; unrecognized
//! discriminators are preserved as [`SessionUpdate::Unknown`] with the raw
//! payload intact, never dropped, because the wire schema is intentionally
//! open-ended.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::session::tool_call::{ToolCall, ToolCallWire};

/// Who authored a message chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageRole {
    /// The human (replayed history on `session/load`).
    User,
    /// The agent.
    Agent,
}

/// One block of message or prompt content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain text.
    Text {
        /// The text itself.
        text: String,
    },
    /// Inline image data.
    Image {
        /// MIME type of the image.
        #[serde(rename = "mimeType")]
        mime_type: String,
        /// Base64-encoded payload.
        data: String,
    },
    /// Inline audio data.
    Audio {
        /// MIME type of the audio.
        #[serde(rename = "mimeType")]
        mime_type: String,
        /// Base64-encoded payload.
        data: String,
    },
    /// Link to a resource by URI.
    ResourceLink {
        /// Resource URI.
        uri: String,
        /// Optional display name.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    /// Embedded resource, kept raw.
    Resource {
        /// Agent-defined resource payload.
        resource: Value,
    },
}

impl ContentBlock {
    /// Convenience constructor for a text block.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

/// Terminal classification of why a turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The agent finished normally.
    EndTurn,
    /// Token budget exhausted.
    MaxTokens,
    /// Turn-request budget exhausted.
    MaxTurnRequests,
    /// The agent refused to continue.
    Refusal,
    /// The turn was cancelled.
    Cancelled,
    /// Anything else, including transport failures mid-turn.
    Other,
}

impl StopReason {
    /// Parse a wire stop-reason string; unknown values map to [`Self::Other`].
    #[must_use]
    pub fn from_wire(reason: &str) -> Self {
        match reason {
            "end_turn" => Self::EndTurn,
            "max_tokens" => Self::MaxTokens,
            "max_turn_requests" => Self::MaxTurnRequests,
            "refusal" => Self::Refusal,
            "cancelled" => Self::Cancelled,
            _ => Self::Other,
        }
    }

    /// Wire encoding, the inverse of [`Self::from_wire`].
    #[must_use]
    pub fn as_wire(self) -> &'static str {
        match self {
            Self::EndTurn => "end_turn",
            Self::MaxTokens => "max_tokens",
            Self::MaxTurnRequests => "max_turn_requests",
            Self::Refusal => "refusal",
            Self::Cancelled => "cancelled",
            Self::Other => "other",
        }
    }
}

/// One entry of an agent-reported plan.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanEntry {
    /// What this step does.
    pub content: String,
    /// Priority label, agent-defined.
    #[serde(default)]
    pub priority: Option<String>,
    /// Step status (`pending`, `in_progress`, `completed`).
    #[serde(default)]
    pub status: Option<String>,
}

/// A slash-command the agent advertises as currently available.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailableCommand {
    /// Command name.
    pub name: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: Option<String>,
    /// Input hint, kept raw.
    #[serde(default)]
    pub input: Option<Value>,
}

/// One agent operating mode.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModeInfo {
    /// Mode identifier.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: Option<String>,
    /// Description of the mode's behavior.
    #[serde(default)]
    pub description: Option<String>,
}

/// Current mode plus the advertised alternatives.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModeState {
    /// Identifier of the active mode.
    pub current_mode_id: String,
    /// All modes the agent offers.
    #[serde(default)]
    pub available_modes: Vec<ModeInfo>,
}

/// Typed update delivered in session order.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    /// Incremental message content from the agent or replayed user input.
    MessageChunk {
        /// Author of the chunk.
        role: MessageRole,
        /// The content block.
        content: ContentBlock,
        /// Whether this is internal reasoning rather than reply text.
        thought: bool,
    },
    /// The agent's current plan.
    Plan {
        /// Ordered plan entries.
        entries: Vec<PlanEntry>,
    },
    /// A tool call was created or updated; carries the merged record.
    ToolCallUpdated(ToolCall),
    /// A proposed or applied file change.
    Diff {
        /// Target file.
        path: PathBuf,
        /// Previous content, when known.
        old_text: Option<String>,
        /// New content.
        new_text: String,
    },
    /// The set of available commands changed.
    AvailableCommands {
        /// Currently available commands.
        commands: Vec<AvailableCommand>,
    },
    /// The agent switched modes.
    ModeChange {
        /// Identifier of the newly active mode.
        current_mode_id: String,
    },
    /// The turn ended. Always the final update of a prompt stream.
    TurnEnded {
        /// Why the turn ended.
        stop_reason: StopReason,
    },
    /// Unrecognized update, raw payload preserved for forward compatibility.
    Unknown(Value),
}

/// Demux outcome: either a fully typed update, or a tool-call payload that
/// still needs the session's tool-call table to resolve.
#[derive(Debug)]
pub(crate) enum ParsedUpdate {
    /// Ready to deliver as-is.
    Typed(SessionUpdate),
    /// `tool_call`: construct and store a fresh record.
    ToolCallNew(ToolCallWire),
    /// `tool_call_update`: merge into the existing record by id.
    ToolCallDelta(ToolCallWire),
}

/// Classify one raw `update` object by its `sessionUpdate` discriminator.
pub(crate) fn parse_update(update: Value) -> ParsedUpdate {
    let Some(discriminator) = update.get("sessionUpdate").and_then(Value::as_str) else {
        debug!("session update without discriminator, preserving raw");
        return ParsedUpdate::Typed(SessionUpdate::Unknown(update));
    };

    match discriminator {
        "user_message_chunk" => parse_chunk(update, MessageRole::User, false),
        "agent_message_chunk" => parse_chunk(update, MessageRole::Agent, false),
        "agent_thought_chunk" => parse_chunk(update, MessageRole::Agent, true),
        "plan" => match parse_field::<Vec<PlanEntry>>(&update, "entries") {
            Some(entries) => ParsedUpdate::Typed(SessionUpdate::Plan { entries }),
            None => ParsedUpdate::Typed(SessionUpdate::Unknown(update)),
        },
        "tool_call" => match serde_json::from_value::<ToolCallWire>(update.clone()) {
            Ok(wire) => ParsedUpdate::ToolCallNew(wire),
            Err(err) => {
                debug!(%err, "malformed tool_call update, preserving raw");
                ParsedUpdate::Typed(SessionUpdate::Unknown(update))
            }
        },
        "tool_call_update" => match serde_json::from_value::<ToolCallWire>(update.clone()) {
            Ok(wire) => ParsedUpdate::ToolCallDelta(wire),
            Err(err) => {
                debug!(%err, "malformed tool_call_update, preserving raw");
                ParsedUpdate::Typed(SessionUpdate::Unknown(update))
            }
        },
        "diff" => {
            let path = parse_field::<PathBuf>(&update, "path");
            let new_text = parse_field::<String>(&update, "newText");
            match (path, new_text) {
                (Some(path), Some(new_text)) => ParsedUpdate::Typed(SessionUpdate::Diff {
                    path,
                    old_text: parse_field::<String>(&update, "oldText"),
                    new_text,
                }),
                _ => ParsedUpdate::Typed(SessionUpdate::Unknown(update)),
            }
        }
        "available_commands_update" => {
            match parse_field::<Vec<AvailableCommand>>(&update, "availableCommands") {
                Some(commands) => {
                    ParsedUpdate::Typed(SessionUpdate::AvailableCommands { commands })
                }
                None => ParsedUpdate::Typed(SessionUpdate::Unknown(update)),
            }
        }
        "current_mode_update" => match parse_field::<String>(&update, "currentModeId") {
            Some(current_mode_id) => {
                ParsedUpdate::Typed(SessionUpdate::ModeChange { current_mode_id })
            }
            None => ParsedUpdate::Typed(SessionUpdate::Unknown(update)),
        },
        other => {
            debug!(
                discriminator = other,
                "unknown session update kind, preserving raw"
            );
            ParsedUpdate::Typed(SessionUpdate::Unknown(update))
        }
    }
}

/// Parse a message-chunk variant.
fn parse_chunk(update: Value, role: MessageRole, thought: bool) -> ParsedUpdate {
    match parse_field::<ContentBlock>(&update, "content") {
        Some(content) => ParsedUpdate::Typed(SessionUpdate::MessageChunk {
            role,
            content,
            thought,
        }),
        None => {
            debug!("message chunk without parsable content, preserving raw");
            ParsedUpdate::Typed(SessionUpdate::Unknown(update))
        }
    }
}

/// Deserialize one field of the update object, `None` on absence or shape
/// mismatch.
fn parse_field<T: serde::de::DeserializeOwned>(update: &Value, field: &str) -> Option<T> {
    update
        .get(field)
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
}
