#![forbid(unsafe_code)]
//! Client-side runtime for the Agent Client Protocol (ACP).
//!
//! `agent-conduit` spawns an AI coding agent as a subprocess, speaks
//! newline-delimited JSON-RPC 2.0 over its stdio, and exposes the agent's
//! sessions to a host application as ordered, replayable streams of typed
//! updates. Agent-initiated callbacks (file reads/writes, permission
//! approval, terminal process lifecycle) are serviced on the agent's behalf
//! under a workspace-jail and permission-policy security model.
//!
//! The layering, bottom up:
//!
//! - [`channel::LineChannel`] — whole-line framing over a byte stream pair.
//! - [`transport::ProcessTransport`] — subprocess lifecycle and exit
//!   supervision.
//! - [`rpc::Peer`] — bidirectional JSON-RPC 2.0 correlation.
//! - [`session::SessionManager`] — the protocol state machine: sessions,
//!   turn streams, tool-call merging, callback mediation.
//! - [`client::AcpClient`] — the facade that wires the stack together.

pub mod channel;
pub mod client;
pub mod config;
pub mod errors;
pub mod fs;
pub mod policy;
pub mod rpc;
pub mod session;
pub mod terminal;
pub mod transport;
pub mod workspace;

pub use client::AcpClient;
pub use config::{ClientCapabilities, ClientConfig};
pub use errors::{ClientError, Result};
