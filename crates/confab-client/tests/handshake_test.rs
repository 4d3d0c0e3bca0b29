//! S1: the authentication handshake against a live mock socket.

mod common;

use std::time::Duration;

use confab_client::proto::name;
use confab_client::{ClientError, Session, SessionEvent, SocketError};
use confab_harness::MockServerBuilder;
use serde_json::json;

#[tokio::test]
async fn handshake_completes_and_connected_fires_once() {
    let server = MockServerBuilder::new().spawn().await;
    let (session, mut events) = common::connect(&server).await;

    let connected =
        common::wait_for(&mut events, Duration::from_secs(5), |e| e.kind() == "connected").await;
    assert!(matches!(connected, SessionEvent::Connected));
    assert!(session.is_connected());

    // The client answered the server's authentication.request with its
    // identity, nonced with the session's first nonce.
    let responses = server.received_named(name::AUTHENTICATION_RESPONSE);
    assert_eq!(responses.len(), 1);
    let response = &responses[0];
    assert_eq!(response.nonce, Some(1));
    assert_eq!(response.content_u64("userId"), Some(1));
    assert_eq!(
        response.content_str("authKey"),
        Some("YUcAR6imCKT5WRB0Qy0fJFGVUjsnyYCdR8RSIfuE")
    );
    assert!(response.content_str("installationDomain").is_some());
    assert!(response.content_str("clientVersion").is_some());

    // Exactly one connected event.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let mut extra_connected = 0;
    while let Ok(event) = events.try_recv() {
        if event.kind() == "connected" {
            extra_connected += 1;
        }
    }
    assert_eq!(extra_connected, 0);

    session.close().await;
}

#[tokio::test]
async fn auth_error_frame_fails_the_connect() {
    let server = MockServerBuilder::new()
        .fail_auth(json!({"code": "invalid-authkey"}))
        .spawn()
        .await;

    let session = Session::new(common::test_config(&server));
    let err = session.connect().await.expect_err("connect must fail");

    match err {
        ClientError::Socket(SocketError::AuthRejected { contents }) => {
            assert_eq!(contents["code"], "invalid-authkey");
        }
        other => panic!("expected AuthRejected, got {other:?}"),
    }
    assert!(!session.is_connected());
}

#[tokio::test]
async fn unreachable_installation_fails_the_connect() {
    let server = MockServerBuilder::new().spawn().await;
    let config = common::test_config(&server);
    drop(server);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let session = Session::new(config);
    let err = session.connect().await.expect_err("connect must fail");
    assert!(matches!(err, ClientError::Http(_)));
    assert!(!session.is_connected());
}
