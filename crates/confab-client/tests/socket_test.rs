//! Frame-multiplexing primitives end-to-end: filtered awaits, races, and
//! frame buffering over a live socket.

mod common;

use std::sync::Arc;
use std::time::Duration;

use confab_client::proto::{Frame, FrameFilter};
use confab_client::SocketError;
use confab_harness::MockServerBuilder;
use serde_json::json;

#[tokio::test]
async fn await_frame_resolves_on_contents_subset() {
    let server = MockServerBuilder::new().spawn().await;
    let (session, _events) = common::connect(&server).await;
    let socket = session.wire().socket().unwrap();

    let waiter = tokio::spawn({
        let socket = Arc::clone(&socket);
        async move {
            socket
                .await_frame_timeout(
                    FrameFilter::name("demo.signal").with_contents(json!({"channel": 42})),
                    Duration::from_secs(5),
                )
                .await
        }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    // A near miss first, then the real thing.
    server.push(&Frame::event("demo.signal", json!({"channel": 7})));
    server.push(&Frame::event("demo.signal", json!({"channel": 42, "extra": true})));

    let frame = waiter.await.unwrap().unwrap();
    assert_eq!(frame.contents["channel"], 42);

    session.close().await;
}

#[tokio::test]
async fn race_frames_returns_the_first_match_and_cancels_losers() {
    let server = MockServerBuilder::new().spawn().await;
    let (session, _events) = common::connect(&server).await;
    let socket = session.wire().socket().unwrap();

    let race = tokio::spawn({
        let socket = Arc::clone(&socket);
        async move {
            socket
                .race_frames(
                    vec![FrameFilter::name("demo.alpha"), FrameFilter::name("demo.beta")],
                    Duration::from_secs(5),
                )
                .await
        }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    server.push(&Frame::event("demo.beta", json!({"winner": true})));
    let frame = race.await.unwrap().unwrap();
    assert_eq!(frame.name, "demo.beta");

    session.close().await;
}

#[tokio::test]
async fn buffer_frames_captures_in_arrival_order() {
    let server = MockServerBuilder::new().spawn().await;
    let (session, _events) = common::connect(&server).await;
    let socket = session.wire().socket().unwrap();

    let buffer = tokio::spawn({
        let socket = Arc::clone(&socket);
        async move { socket.buffer_frames(3, Duration::from_secs(5)).await }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    for n in 0..3 {
        server.push(&Frame::event("demo.tick", json!({"n": n})));
    }

    let frames = buffer.await.unwrap().unwrap();
    let ns: Vec<_> = frames.iter().map(|f| f.contents["n"].as_u64().unwrap()).collect();
    assert_eq!(ns, vec![0, 1, 2]);

    session.close().await;
}

#[tokio::test]
async fn empty_filters_are_rejected_at_registration() {
    let server = MockServerBuilder::new().spawn().await;
    let (session, _events) = common::connect(&server).await;
    let socket = session.wire().socket().unwrap();

    let empty = FrameFilter::Match(confab_client::proto::FrameMatch::default());
    let err = socket.await_frame(empty).await.unwrap_err();
    assert!(matches!(err, SocketError::Filter(_)));

    let err = socket.race_frames(Vec::new(), Duration::from_secs(1)).await.unwrap_err();
    assert!(matches!(err, SocketError::Filter(_)));

    session.close().await;
}
