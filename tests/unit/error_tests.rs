//! Error display formats and JSON-RPC error code mapping.

use agent_conduit::rpc::message::{self, REQUEST_FAILED};
use agent_conduit::ClientError;

#[test]
fn transport_error_display_has_prefix() {
    let err = ClientError::Transport("pipe closed".into());
    assert_eq!(err.to_string(), "transport: pipe closed");
}

#[test]
fn rpc_error_display_includes_code_and_message() {
    let err = ClientError::Rpc {
        code: -32000,
        message: "agent busy".into(),
    };
    assert_eq!(err.to_string(), "rpc error -32000: agent busy");
}

#[test]
fn variants_are_distinguishable_by_display() {
    let transport = ClientError::Transport("x".into());
    let protocol = ClientError::Protocol("x".into());
    let io = ClientError::Io("x".into());
    assert_ne!(transport.to_string(), protocol.to_string());
    assert_ne!(protocol.to_string(), io.to_string());
}

#[test]
fn io_error_converts_with_message() {
    let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "broken");
    let err: ClientError = io.into();
    assert!(matches!(err, ClientError::Io(_)));
    assert!(err.to_string().contains("broken"));
}

#[test]
fn json_error_converts_to_protocol() {
    let bad = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
    let err: ClientError = bad.into();
    assert!(matches!(err, ClientError::Protocol(_)));
}

#[test]
fn method_not_found_maps_to_32601() {
    let err = ClientError::MethodNotFound("editor/open".into());
    assert_eq!(message::error_code_for(&err), message::METHOD_NOT_FOUND);
}

#[test]
fn invalid_argument_maps_to_invalid_params() {
    let err = ClientError::InvalidArgument("missing sessionId".into());
    assert_eq!(message::error_code_for(&err), message::INVALID_PARAMS);
}

#[test]
fn path_violation_and_denial_map_to_request_failed() {
    let jail = ClientError::PathViolation("escape".into());
    let denied = ClientError::PermissionDenied("no".into());
    assert_eq!(message::error_code_for(&jail), REQUEST_FAILED);
    assert_eq!(message::error_code_for(&denied), REQUEST_FAILED);
}

#[test]
fn other_errors_map_to_internal() {
    let err = ClientError::Io("disk".into());
    assert_eq!(message::error_code_for(&err), message::INTERNAL_ERROR);
}

#[test]
fn implements_std_error() {
    fn takes_error(_: &dyn std::error::Error) {}
    takes_error(&ClientError::NotFound("session".into()));
}
