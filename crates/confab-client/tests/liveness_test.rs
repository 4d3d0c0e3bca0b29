//! S5 and the heartbeat bound: liveness break detection and reconnection.

mod common;

use std::time::{Duration, Instant};

use confab_client::SessionEvent;
use confab_harness::MockServerBuilder;

#[tokio::test]
async fn swallowed_pings_break_the_connection_within_the_bound() {
    let server = MockServerBuilder::new().swallow_pings().spawn().await;
    let (session, mut events) = common::connect(&server).await;
    let config = common::test_config(&server).socket;

    // Worst case: one interval plus max_attempts timed-out pings.
    let bound = config.ping_interval
        + config.ping_timeout * config.ping_max_attempts
        + Duration::from_millis(500);

    let started = Instant::now();
    let event = common::wait_for(&mut events, bound, |e| e.kind() == "disconnect").await;
    assert!(matches!(event, SessionEvent::Disconnect));
    assert!(started.elapsed() <= bound, "disconnect took {:?}", started.elapsed());

    session.close().await;
}

#[tokio::test]
async fn reconnect_fires_with_downtime_after_a_break() {
    let server = MockServerBuilder::new().swallow_pings().spawn().await;
    let (session, mut events) = common::connect(&server).await;

    common::wait_for(&mut events, Duration::from_secs(5), |e| e.kind() == "disconnect").await;

    // The handshake succeeds again (only pings are swallowed), so the
    // reconnect loop comes back and runs catch-up.
    let event =
        common::wait_for(&mut events, Duration::from_secs(10), |e| e.kind() == "reconnect").await;
    let SessionEvent::Reconnect { downtime, .. } = event else { unreachable!() };
    assert!(downtime > Duration::ZERO);

    let monitor = session.monitor();
    assert!(monitor.disconnects >= 1);
    assert!(monitor.reconnects >= 1);
    assert!(monitor.downtime >= downtime);
    assert!(monitor.initial_connection_at.is_some());

    session.close().await;
}

#[tokio::test]
async fn close_is_idempotent_and_suppresses_reconnect() {
    let server = MockServerBuilder::new().spawn().await;
    let (session, mut events) = common::connect(&server).await;

    session.close().await;
    session.close().await;
    session.close().await;

    // With the reconnect loop disabled, nothing comes back.
    let reconnected = tokio::time::timeout(Duration::from_millis(600), async {
        loop {
            match events.recv().await {
                Ok(event) if event.kind() == "connected" || event.kind() == "reconnect" => {
                    return true;
                }
                Ok(_) => continue,
                Err(_) => return false,
            }
        }
    })
    .await
    .unwrap_or(false);

    assert!(!reconnected, "reconnect loop ran after an explicit close");
    assert!(!session.is_connected());
    assert_eq!(session.monitor().reconnects, 0);
}

#[tokio::test]
async fn explicit_close_rejects_in_flight_waiters() {
    let server = MockServerBuilder::new().swallow_pings().spawn().await;
    let (session, _events) = common::connect(&server).await;

    // A ping that will never be answered; closing must reject it promptly
    // rather than letting it run to its timeout.
    let socket = session.wire().socket().unwrap();
    let pending = tokio::spawn(async move {
        socket
            .request("ping", serde_json::json!({}), Duration::from_secs(30))
            .await
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    session.close().await;

    let result = tokio::time::timeout(Duration::from_secs(1), pending)
        .await
        .expect("waiter resolves promptly after close")
        .expect("task completes");
    let err = result.expect_err("waiter must be rejected");
    assert!(err.to_string().contains("closed"), "unexpected error: {err}");
}

#[tokio::test]
async fn connect_after_close_establishes_a_fresh_session() {
    let server = MockServerBuilder::new().spawn().await;
    let (session, _events) = common::connect(&server).await;

    session.close().await;
    assert!(!session.is_connected());

    let events = session.events();
    session.connect().await.expect("reconnect after close");
    let mut events = events;
    common::wait_for(&mut events, Duration::from_secs(5), |e| e.kind() == "connected").await;
    assert!(session.is_connected());

    session.close().await;
}
