//! Config defaults, validation, and capability flags.

use agent_conduit::{ClientCapabilities, ClientConfig, ClientError};

#[test]
fn new_config_has_sensible_defaults() {
    let config = ClientConfig::new("my-agent");

    assert_eq!(config.program, "my-agent");
    assert!(config.args.is_empty());
    assert!(config.env.is_empty());
    assert!(!config.allow_outside_workspace_reads);
    assert_eq!(config.terminal_output_limit, 1_048_576);
    assert_eq!(config.startup_grace().as_millis(), 150);
    assert_eq!(config.shutdown_timeout().as_secs(), 5);
}

#[test]
fn validate_rejects_empty_program() {
    let mut config = ClientConfig::new("  ");
    let result = config.validate();
    assert!(matches!(result, Err(ClientError::InvalidArgument(_))));
}

#[test]
fn validate_rejects_zero_output_limit() {
    let mut config = ClientConfig::new("agent");
    config.terminal_output_limit = 0;
    assert!(config.validate().is_err());
}

#[test]
fn validate_canonicalizes_working_dir() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut config = ClientConfig::new("agent");
    config.working_dir = Some(temp.path().to_path_buf());

    config.validate().expect("valid");

    let canonical = temp.path().canonicalize().expect("canonicalize");
    assert_eq!(config.working_dir, Some(canonical));
}

#[test]
fn validate_rejects_missing_working_dir() {
    let mut config = ClientConfig::new("agent");
    config.working_dir = Some("/definitely/not/a/real/dir/anywhere".into());
    assert!(config.validate().is_err());
}

#[test]
fn capabilities_default_to_everything_enabled() {
    let caps = ClientCapabilities::default();
    assert!(caps.read_text_file);
    assert!(caps.write_text_file);
    assert!(caps.terminal);
}

#[test]
fn config_deserializes_from_json_with_defaults() {
    let config: ClientConfig =
        serde_json::from_str(r#"{ "program": "gemini", "args": ["--acp"] }"#).expect("parse");

    assert_eq!(config.program, "gemini");
    assert_eq!(config.args, vec!["--acp".to_owned()]);
    assert_eq!(config.startup_grace_ms, 150);
}
