//! Permission option selection and the built-in policies.

use agent_conduit::policy::{
    select_option, AllowAll, DenyAll, PermissionDecision, PermissionOption, PermissionOptionKind,
    PermissionOutcome, PermissionPolicy, PermissionRequest,
};

fn option(id: &str, kind: PermissionOptionKind) -> PermissionOption {
    PermissionOption {
        id: id.to_owned(),
        name: id.to_owned(),
        kind,
    }
}

fn request() -> PermissionRequest {
    PermissionRequest {
        session_id: "sess-1".into(),
        title: "Run tests".into(),
        explanation: None,
        tool_name: None,
        tool_kind: None,
        options: Vec::new(),
    }
}

#[test]
fn allow_selects_allow_once_exactly() {
    let options = vec![
        option("always", PermissionOptionKind::AllowAlways),
        option("once", PermissionOptionKind::AllowOnce),
        option("no", PermissionOptionKind::RejectOnce),
    ];

    let outcome = select_option(PermissionDecision::Allow, &options);

    assert_eq!(
        outcome,
        PermissionOutcome::Selected {
            option_id: "once".into()
        }
    );
}

#[test]
fn allow_falls_back_to_any_allow_flavor() {
    let options = vec![
        option("no", PermissionOptionKind::RejectOnce),
        option("always", PermissionOptionKind::AllowAlways),
    ];

    let outcome = select_option(PermissionDecision::Allow, &options);

    assert_eq!(
        outcome,
        PermissionOutcome::Selected {
            option_id: "always".into()
        }
    );
}

#[test]
fn deny_selects_reject_flavor() {
    let options = vec![
        option("yes", PermissionOptionKind::AllowOnce),
        option("never", PermissionOptionKind::RejectAlways),
    ];

    let outcome = select_option(PermissionDecision::Deny, &options);

    assert_eq!(
        outcome,
        PermissionOutcome::Selected {
            option_id: "never".into()
        }
    );
}

#[test]
fn unmatched_polarity_falls_back_to_first_option() {
    let options = vec![
        option("weird-a", PermissionOptionKind::Other),
        option("weird-b", PermissionOptionKind::Other),
    ];

    let outcome = select_option(PermissionDecision::Deny, &options);

    assert_eq!(
        outcome,
        PermissionOutcome::Selected {
            option_id: "weird-a".into()
        }
    );
}

#[test]
fn empty_options_resolve_cancelled() {
    let outcome = select_option(PermissionDecision::Allow, &[]);
    assert_eq!(outcome, PermissionOutcome::Cancelled);
}

#[test]
fn cancelled_decision_resolves_cancelled() {
    let options = vec![option("yes", PermissionOptionKind::AllowOnce)];
    let outcome = select_option(PermissionDecision::Cancelled, &options);
    assert_eq!(outcome, PermissionOutcome::Cancelled);
}

#[test]
fn outcome_wire_encoding() {
    let selected = PermissionOutcome::Selected {
        option_id: "opt-1".into(),
    };
    assert_eq!(
        selected.to_value(),
        serde_json::json!({ "outcome": { "outcome": "selected", "optionId": "opt-1" } })
    );
    assert_eq!(
        PermissionOutcome::Cancelled.to_value(),
        serde_json::json!({ "outcome": { "outcome": "cancelled" } })
    );
}

#[test]
fn kind_parsing_and_polarity() {
    assert!(PermissionOptionKind::from_wire("allow_once").is_allow());
    assert!(PermissionOptionKind::from_wire("allow_always").is_allow());
    assert!(PermissionOptionKind::from_wire("reject_once").is_reject());
    assert!(PermissionOptionKind::from_wire("reject_always").is_reject());
    let other = PermissionOptionKind::from_wire("shrug");
    assert!(!other.is_allow());
    assert!(!other.is_reject());
}

#[tokio::test]
async fn builtin_policies_decide_as_named() {
    assert_eq!(AllowAll.decide(request()).await, PermissionDecision::Allow);
    assert_eq!(DenyAll.decide(request()).await, PermissionDecision::Deny);
}
