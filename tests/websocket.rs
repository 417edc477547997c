//! Bidirectional bridge: in-process sessions and a real WebSocket client.
#![cfg(unix)]

use std::time::{Duration, Instant};

use futures_util::{stream, SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::{self, Message};

use cgi_gateway::cgi::bridge::{Inbound, Outbound, SessionEnd, CLOSE_ABNORMAL, CLOSE_NORMAL};
use cgi_gateway::cgi::{AmbientEnv, ErrorHandler, Gateway, RequestContext, TransportKind};
use cgi_gateway::config::CgiConfig;

mod common;

fn gateway(root: &std::path::Path, timeout_secs: f64) -> Gateway {
    let mut config = CgiConfig::default();
    config.root = root.to_path_buf();
    config.timeout_secs = timeout_secs;
    Gateway::new(&config, AmbientEnv::capture(), ErrorHandler::log())
}

fn ws_context(path: &str) -> RequestContext {
    RequestContext::new(TransportKind::WebSocket, path)
}

#[tokio::test]
async fn test_clean_exit_closes_normally() {
    let root = tempfile::tempdir().unwrap();
    common::write_script(root.path(), "greet.sh", r#"read line; echo "got $line"; exit 0"#);
    let gateway = gateway(root.path(), 2.0);

    let mut sent = Vec::new();
    let inbound = stream::iter(vec![Inbound::Text("hello\n".to_string())]).chain(stream::pending());
    let outcome = gateway
        .serve_websocket(&ws_context("/greet.sh"), &mut sent, inbound)
        .await
        .unwrap();

    assert_eq!(outcome.close_code, Some(CLOSE_NORMAL));
    assert!(outcome.exit_status.unwrap().success());
    assert_eq!(sent.first(), Some(&Outbound::Text("got hello\n".to_string())));
    assert!(matches!(
        sent.last(),
        Some(Outbound::Close { code: CLOSE_NORMAL, .. })
    ));
    assert_eq!(gateway.admission().in_use(), 0);
}

#[tokio::test]
async fn test_failing_script_closes_abnormally() {
    let root = tempfile::tempdir().unwrap();
    common::write_script(root.path(), "fail.sh", "echo bye; exit 3");
    let gateway = gateway(root.path(), 2.0);

    let mut sent = Vec::new();
    let outcome = gateway
        .serve_websocket(&ws_context("/fail.sh"), &mut sent, stream::pending())
        .await
        .unwrap();

    assert_eq!(outcome.close_code, Some(CLOSE_ABNORMAL));
    assert_eq!(outcome.exit_status.and_then(|s| s.code()), Some(3));
    assert_eq!(sent[0], Outbound::Text("bye\n".to_string()));
    assert_eq!(sent.len(), 2);
}

#[tokio::test]
async fn test_client_disconnect_sends_no_close() {
    let root = tempfile::tempdir().unwrap();
    common::write_script(root.path(), "echo.sh", r#"while read line; do echo "$line"; done"#);
    let gateway = gateway(root.path(), 2.0);

    let mut sent = Vec::new();
    let inbound = stream::iter(vec![Inbound::Disconnect]);
    let outcome = gateway
        .serve_websocket(&ws_context("/echo.sh"), &mut sent, inbound)
        .await
        .unwrap();

    assert_eq!(outcome.ended_by, SessionEnd::ClientDisconnected);
    assert_eq!(outcome.close_code, None);
    assert!(sent.iter().all(|m| !matches!(m, Outbound::Close { .. })));
}

#[tokio::test]
async fn test_lingering_script_is_killed() {
    let root = tempfile::tempdir().unwrap();
    common::write_script(root.path(), "linger.sh", "exec sleep 30");
    let gateway = gateway(root.path(), 0.3);

    let started = Instant::now();
    let mut sent = Vec::new();
    let outcome = gateway
        .serve_websocket(&ws_context("/linger.sh"), &mut sent, stream::empty())
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(!outcome.exit_status.unwrap().success());
    assert_eq!(outcome.close_code, None);
}

#[tokio::test]
async fn test_stderr_reaches_error_handler() {
    let root = tempfile::tempdir().unwrap();
    common::write_script(
        root.path(),
        "noisy.sh",
        "echo out; echo e1 >&2; echo e2 >&2; exit 0",
    );
    let mut config = CgiConfig::default();
    config.root = root.path().to_path_buf();
    config.timeout_secs = 2.0;
    let (errors, mut stderr) = common::capture_stderr();
    let gateway = Gateway::new(&config, AmbientEnv::capture(), errors);

    let mut sent = Vec::new();
    let outcome = gateway
        .serve_websocket(&ws_context("/noisy.sh"), &mut sent, stream::pending())
        .await
        .unwrap();

    assert_eq!(outcome.close_code, Some(CLOSE_NORMAL));
    assert_eq!(sent.first(), Some(&Outbound::Text("out\n".to_string())));

    // Lines written during the session and after it both arrive, in order.
    let mut collected = Vec::new();
    while collected.len() < b"e1\ne2\n".len() {
        let chunk = tokio::time::timeout(Duration::from_secs(5), stderr.recv())
            .await
            .unwrap()
            .unwrap();
        collected.extend_from_slice(&chunk);
    }
    assert_eq!(collected, b"e1\ne2\n");
}

#[tokio::test]
async fn test_missing_script_fails_before_spawn() {
    let root = tempfile::tempdir().unwrap();
    let gateway = gateway(root.path(), 1.0);

    let mut sent = Vec::new();
    let err = gateway
        .serve_websocket(&ws_context("/nope.sh"), &mut sent, stream::pending())
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 404);
    assert_eq!(gateway.runner().spawned(), 0);
    assert!(sent.is_empty());
}

#[tokio::test]
async fn test_echo_over_websocket() {
    let root = tempfile::tempdir().unwrap();
    common::write_script(root.path(), "echo.sh", r#"while read line; do echo "$line"; done"#);
    let server = common::start_server(common::test_config(root.path()), ErrorHandler::log()).await;

    let (mut ws, _) = tokio_tungstenite::connect_async(server.ws_url("/ws/echo.sh"))
        .await
        .unwrap();
    ws.send(Message::Text("ping\n".into())).await.unwrap();

    let reply = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(reply, Message::Text("ping\n".into()));
    ws.close(None).await.unwrap();
}

#[tokio::test]
async fn test_exit_closes_websocket() {
    let root = tempfile::tempdir().unwrap();
    common::write_script(root.path(), "hello.sh", "echo hello");
    let server = common::start_server(common::test_config(root.path()), ErrorHandler::log()).await;

    let (mut ws, _) = tokio_tungstenite::connect_async(server.ws_url("/ws/hello.sh"))
        .await
        .unwrap();

    let mut texts = Vec::new();
    let mut close_code = None;
    while let Ok(Some(Ok(msg))) = tokio::time::timeout(Duration::from_secs(5), ws.next()).await {
        match msg {
            Message::Text(text) => texts.push(text.to_string()),
            Message::Close(frame) => {
                close_code = frame.map(|f| u16::from(f.code));
                break;
            }
            _ => {}
        }
    }
    assert_eq!(texts, vec!["hello\n".to_string()]);
    assert_eq!(close_code, Some(1000));
}

#[tokio::test]
async fn test_missing_script_rejects_upgrade() {
    let root = tempfile::tempdir().unwrap();
    let server = common::start_server(common::test_config(root.path()), ErrorHandler::log()).await;

    let err = tokio_tungstenite::connect_async(server.ws_url("/ws/nope.sh"))
        .await
        .unwrap_err();
    match err {
        tungstenite::Error::Http(response) => assert_eq!(response.status(), 404),
        other => panic!("unexpected error: {other}"),
    }
}
