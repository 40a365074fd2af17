//! Bidirectional JSON-RPC 2.0 peer over a [`LineChannel`](crate::channel::LineChannel).

pub mod message;
pub mod peer;

pub use message::RpcError;
pub use peer::{CallbackHandler, Peer};
