//! Shared helpers for integration tests against the mock server.

use std::time::Duration;

use confab_client::{
    Credentials, Installation, Session, SessionConfig, SessionEvent, SocketConfig,
};
use confab_harness::MockServer;
use tokio::sync::broadcast;

/// Session config pointed at a mock server, with fast test timings.
pub fn test_config(server: &MockServer) -> SessionConfig {
    let installation = Installation::new(&server.base_url())
        .unwrap()
        .with_socket_server(&server.ws_url())
        .unwrap();
    let mut config = SessionConfig::new(
        installation,
        Credentials::Login { username: "me".into(), password: "secret".into() },
    );
    config.socket = SocketConfig {
        ping_interval: Duration::from_millis(200),
        ping_timeout: Duration::from_millis(100),
        ping_max_attempts: 3,
        await_timeout: Duration::from_secs(5),
        handshake_timeout: Duration::from_secs(5),
    };
    config.reconnect_interval = Duration::from_millis(100);
    config
}

/// Connect a session against the server, with an event stream subscribed
/// before the connect so nothing is missed.
pub async fn connect(server: &MockServer) -> (Session, broadcast::Receiver<SessionEvent>) {
    let session = Session::new(test_config(server));
    let events = session.events();
    session.connect().await.expect("session connects");
    (session, events)
}

/// Wait for the first event matching the predicate, within the deadline.
pub async fn wait_for(
    events: &mut broadcast::Receiver<SessionEvent>,
    deadline: Duration,
    matches: impl Fn(&SessionEvent) -> bool,
) -> SessionEvent {
    tokio::time::timeout(deadline, async {
        loop {
            match events.recv().await {
                Ok(event) if matches(&event) => return event,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
            }
        }
    })
    .await
    .expect("expected event before deadline")
}
