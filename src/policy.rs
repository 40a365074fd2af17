//! Permission model: requests, outcomes, and the host decision policy.
//!
//! Every agent-initiated action — file reads/writes, explicit permission
//! requests, terminal creation — flows through a [`PermissionPolicy`]
//! before it is allowed to touch the host. The policy is an injected
//! collaborator that may itself do asynchronous I/O (prompt a human) and
//! must be safe to invoke concurrently for multiple sessions.

use std::future::Future;
use std::pin::Pin;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::session::ToolKind;

/// Kind discriminator on a permission option offered by the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionOptionKind {
    /// Approve this occurrence only.
    AllowOnce,
    /// Approve this and future occurrences.
    AllowAlways,
    /// Refuse this occurrence only.
    RejectOnce,
    /// Refuse this and future occurrences.
    RejectAlways,
    /// Unrecognized kind string, preserved for fallback matching.
    Other,
}

impl PermissionOptionKind {
    /// Parse a wire kind string; unknown values become [`Self::Other`].
    #[must_use]
    pub fn from_wire(kind: &str) -> Self {
        match kind {
            "allow_once" => Self::AllowOnce,
            "allow_always" => Self::AllowAlways,
            "reject_once" => Self::RejectOnce,
            "reject_always" => Self::RejectAlways,
            _ => Self::Other,
        }
    }

    /// Whether this kind approves the action.
    #[must_use]
    pub fn is_allow(self) -> bool {
        matches!(self, Self::AllowOnce | Self::AllowAlways)
    }

    /// Whether this kind refuses the action.
    #[must_use]
    pub fn is_reject(self) -> bool {
        matches!(self, Self::RejectOnce | Self::RejectAlways)
    }
}

/// One candidate outcome offered by the agent on a permission request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionOption {
    /// Agent-assigned option identifier, echoed back on selection.
    pub id: String,
    /// Display label.
    pub name: String,
    /// Option kind discriminator.
    pub kind: PermissionOptionKind,
}

/// Wire shape of a permission option.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PermissionOptionWire {
    option_id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    kind: Option<String>,
}

impl From<PermissionOptionWire> for PermissionOption {
    fn from(wire: PermissionOptionWire) -> Self {
        Self {
            kind: wire
                .kind
                .as_deref()
                .map_or(PermissionOptionKind::Other, PermissionOptionKind::from_wire),
            name: wire.name.unwrap_or_else(|| wire.option_id.clone()),
            id: wire.option_id,
        }
    }
}

/// Transient description of a pending approval, handed to the policy.
///
/// Exists only for the duration of one policy evaluation; never persisted.
#[derive(Debug, Clone)]
pub struct PermissionRequest {
    /// Session the action belongs to.
    pub session_id: String,
    /// Short description of the action.
    pub title: String,
    /// Optional longer rationale supplied by the agent.
    pub explanation: Option<String>,
    /// Tool name, when the request originates from a tool call.
    pub tool_name: Option<String>,
    /// Tool kind classification, when known.
    pub tool_kind: Option<ToolKind>,
    /// Candidate outcomes offered by the agent; empty for the implicit
    /// approvals the client raises on its own (file reads, terminals).
    pub options: Vec<PermissionOption>,
}

/// Policy verdict for one [`PermissionRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionDecision {
    /// Proceed with the action.
    Allow,
    /// Refuse the action.
    Deny,
    /// The decision was abandoned (turn cancelled, prompt dismissed).
    Cancelled,
}

/// Resolution of an agent-issued `session/request_permission` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionOutcome {
    /// One of the offered options was selected.
    Selected {
        /// Identifier of the chosen option.
        option_id: String,
    },
    /// The request was abandoned without a selection.
    Cancelled,
}

impl PermissionOutcome {
    /// Wire encoding of the outcome for the JSON-RPC reply.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Selected { option_id } => json!({
                "outcome": { "outcome": "selected", "optionId": option_id },
            }),
            Self::Cancelled => json!({
                "outcome": { "outcome": "cancelled" },
            }),
        }
    }
}

/// Map a policy decision onto the agent's offered option list.
///
/// An allow decision selects the `allow_once`-flavored option and a deny
/// decision the `reject_once`-flavored one, falling back to any option of
/// the same polarity and finally to the first offered option. No options
/// at all resolves as cancelled.
#[must_use]
pub fn select_option(decision: PermissionDecision, options: &[PermissionOption]) -> PermissionOutcome {
    if options.is_empty() || decision == PermissionDecision::Cancelled {
        return PermissionOutcome::Cancelled;
    }

    let (exact, polarity): (PermissionOptionKind, fn(PermissionOptionKind) -> bool) =
        match decision {
            PermissionDecision::Allow => (PermissionOptionKind::AllowOnce, |k| k.is_allow()),
            PermissionDecision::Deny => (PermissionOptionKind::RejectOnce, |k| k.is_reject()),
            PermissionDecision::Cancelled => return PermissionOutcome::Cancelled,
        };

    let chosen = options
        .iter()
        .find(|o| o.kind == exact)
        .or_else(|| options.iter().find(|o| polarity(o.kind)))
        .unwrap_or(&options[0]);

    PermissionOutcome::Selected {
        option_id: chosen.id.clone(),
    }
}

/// Host-provided decision policy for agent-initiated actions.
pub trait PermissionPolicy: Send + Sync {
    /// Decide whether `request` may proceed.
    fn decide(
        &self,
        request: PermissionRequest,
    ) -> Pin<Box<dyn Future<Output = PermissionDecision> + Send + '_>>;
}

/// Policy that approves every request. Useful for trusted agents and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl PermissionPolicy for AllowAll {
    fn decide(
        &self,
        _request: PermissionRequest,
    ) -> Pin<Box<dyn Future<Output = PermissionDecision> + Send + '_>> {
        Box::pin(async { PermissionDecision::Allow })
    }
}

/// Policy that refuses every request.
#[derive(Debug, Clone, Copy, Default)]
pub struct DenyAll;

impl PermissionPolicy for DenyAll {
    fn decide(
        &self,
        _request: PermissionRequest,
    ) -> Pin<Box<dyn Future<Output = PermissionDecision> + Send + '_>> {
        Box::pin(async { PermissionDecision::Deny })
    }
}
