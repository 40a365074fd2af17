//! Agent subprocess transport: spawn, crash probe, stdio channel, and
//! shutdown escalation.
#![cfg(unix)]

use agent_conduit::transport::ProcessTransport;
use agent_conduit::{ClientConfig, ClientError};
use tokio::time::{timeout, Duration};

fn sh_config(script: &str) -> ClientConfig {
    let mut config = ClientConfig::new("sh");
    config.args = vec!["-c".into(), script.into()];
    config
}

#[tokio::test]
async fn start_and_stop_long_running_agent() {
    let config = sh_config("read _line");
    let mut transport = ProcessTransport::start(&config).await.expect("start");

    assert!(transport.pid().is_some());
    assert!(transport.take_channel().is_some());
    assert!(transport.take_channel().is_none());

    timeout(Duration::from_secs(10), transport.stop())
        .await
        .expect("stop in time");
}

#[tokio::test]
async fn crash_during_startup_is_detected() {
    let mut config = sh_config("exit 7");
    config.startup_grace_ms = 300;

    let result = ProcessTransport::start(&config).await;

    match result {
        Err(ClientError::Transport(msg)) => {
            assert!(msg.contains("exit code 7"), "unexpected message: {msg}");
        }
        other => panic!("expected startup failure, got {other:?}"),
    }
}

#[tokio::test]
async fn spawn_failure_is_a_transport_error() {
    let config = ClientConfig::new("definitely-not-an-executable-9b1c");

    let result = ProcessTransport::start(&config).await;

    assert!(matches!(result, Err(ClientError::Transport(_))));
}

#[tokio::test]
async fn exit_status_watch_resolves_after_death() {
    let mut config = sh_config("sleep 0.4; exit 5");
    config.startup_grace_ms = 50;
    let mut transport = ProcessTransport::start(&config).await.expect("start");

    let mut exit_rx = transport.exit_status();
    assert!(exit_rx.borrow().is_none());

    timeout(Duration::from_secs(5), exit_rx.changed())
        .await
        .expect("exit observed")
        .expect("watch alive");
    let status = (*exit_rx.borrow()).expect("status recorded");
    assert_eq!(status.code(), Some(5));

    transport.stop().await;
}

#[tokio::test]
async fn channel_round_trips_lines_through_process_stdio() {
    // cat echoes stdin back to stdout line by line.
    let config = ClientConfig::new("cat");
    let mut transport = ProcessTransport::start(&config).await.expect("start");
    let mut channel = transport.take_channel().expect("channel");
    let mut inbound = channel.take_inbound().expect("inbound");

    channel
        .outbound()
        .send(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#.into())
        .await
        .expect("send");

    let echoed = timeout(Duration::from_secs(5), inbound.recv())
        .await
        .expect("echo in time")
        .expect("line");
    assert_eq!(echoed, r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#);

    channel.close().await;
    timeout(Duration::from_secs(10), transport.stop())
        .await
        .expect("stop in time");
}

#[tokio::test]
async fn graceful_stop_terminates_sigterm_ignorer_by_force() {
    // The child ignores SIGTERM, forcing stop() to escalate.
    let mut config = sh_config("trap '' TERM; sleep 60");
    config.shutdown_timeout_secs = 1;
    let mut transport = ProcessTransport::start(&config).await.expect("start");

    timeout(Duration::from_secs(10), transport.stop())
        .await
        .expect("stop escalates in time");
}
