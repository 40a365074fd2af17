//! Session layer: the protocol state machine and update typing.

pub mod manager;
pub mod tool_call;
pub mod updates;

pub use manager::{DemuxItem, InitializeResponse, SessionManager};
pub use tool_call::{ToolCall, ToolCallLocation, ToolCallStatus, ToolKind};
pub use updates::{
    AvailableCommand, ContentBlock, MessageRole, ModeInfo, ModeState, PlanEntry, SessionUpdate,
    StopReason,
};
