//! S2–S4: push-frame fan-out through the cache to session events.

mod common;

use std::sync::Arc;
use std::time::Duration;

use confab_client::proto::{name, Frame};
use confab_client::{PersonStatus, SessionEvent};
use confab_harness::{fixtures, MockServerBuilder};
use serde_json::json;

const DEADLINE: Duration = Duration::from_secs(5);

fn seeded_builder() -> MockServerBuilder {
    let me = fixtures::person(1, "me");
    let peter = fixtures::person_with_status(166, "peter", "away");
    MockServerBuilder::new()
        .person(peter.clone())
        .room(fixtures::pair_room(1, &[me, peter]))
}

#[tokio::test]
async fn pushed_message_reaches_the_cached_room() {
    let server = seeded_builder().spawn().await;
    let (session, mut events) = common::connect(&server).await;

    server.push(&Frame::event(
        name::ROOM_MESSAGE_CREATED,
        json!({
            "id": 52,
            "body": "howya lad",
            "roomId": 1,
            "userId": 166,
            "createdAt": "2017-01-29T18:06:34.640Z"
        }),
    ));

    let event = common::wait_for(&mut events, DEADLINE, |e| e.kind() == "message").await;
    let SessionEvent::Message { room, message } = event else { unreachable!() };
    assert_eq!(room.id(), Some(1));
    assert_eq!(message.id(), 52);
    assert_eq!(message.content(), "howya lad");
    assert_eq!(message.created_at().unwrap().timestamp_millis(), 1_485_713_194_640);

    // The message is retained on the cached room object.
    let cached = session.get_room(1).await.unwrap();
    assert!(Arc::ptr_eq(&cached, &room));
    assert!(cached.find_message(52).is_some());

    session.close().await;
}

#[tokio::test]
async fn unknown_room_is_fetched_then_message_delivered() {
    let server = seeded_builder().spawn().await;
    let (session, mut events) = common::connect(&server).await;

    // The room exists server-side but was not in the initial listing.
    let stranger = fixtures::person(9, "stranger");
    server.add_room(fixtures::room(9999, "private", &[fixtures::person(1, "me"), stranger]));

    server.push(&Frame::event(
        name::ROOM_MESSAGE_CREATED,
        json!({"id": 77, "body": "psst", "roomId": 9999, "userId": 9}),
    ));

    let new_room =
        common::wait_for(&mut events, DEADLINE, |e| e.kind() == "room:new").await;
    let SessionEvent::RoomNew(room) = new_room else { unreachable!() };
    assert_eq!(room.id(), Some(9999));

    let message = common::wait_for(&mut events, DEADLINE, |e| e.kind() == "message").await;
    let SessionEvent::Message { room, message } = message else { unreachable!() };
    assert_eq!(room.id(), Some(9999));
    assert_eq!(message.content(), "psst");

    session.close().await;
}

#[tokio::test]
async fn user_modified_updates_the_person_and_fires() {
    let server = seeded_builder().spawn().await;
    let (session, mut events) = common::connect(&server).await;

    let peter = session.get_person(166).await.unwrap();
    assert_eq!(peter.status(), PersonStatus::Away);

    server.push(&Frame::event(
        name::USER_MODIFIED,
        json!({"userId": 166, "key": "status", "value": "online"}),
    ));

    let event =
        common::wait_for(&mut events, DEADLINE, |e| e.kind() == "person:updated").await;
    let SessionEvent::PersonUpdated(updated) = event else { unreachable!() };
    assert!(Arc::ptr_eq(&updated, &peter));
    assert_eq!(peter.status(), PersonStatus::Online);

    session.close().await;
}

#[tokio::test]
async fn mention_event_fires_for_the_current_user() {
    let server = seeded_builder().spawn().await;
    let (session, mut events) = common::connect(&server).await;

    server.push(&Frame::event(
        name::ROOM_MESSAGE_CREATED,
        json!({"id": 80, "body": "lunch, @me?", "roomId": 1, "userId": 166}),
    ));

    let event =
        common::wait_for(&mut events, DEADLINE, |e| e.kind() == "message:mention").await;
    let SessionEvent::MessageMention { message, .. } = event else { unreachable!() };
    assert_eq!(message.id(), 80);

    session.close().await;
}

#[tokio::test]
async fn malformed_frames_surface_as_error_events_not_failures() {
    let server = seeded_builder().spawn().await;
    let (session, mut events) = common::connect(&server).await;

    server.push_raw("{this is not json");
    let event = common::wait_for(&mut events, DEADLINE, |e| e.kind() == "error").await;
    assert!(matches!(event, SessionEvent::Error { .. }));

    // The connection survives: a normal push still arrives.
    server.push(&Frame::event(
        name::ROOM_MESSAGE_CREATED,
        json!({"id": 81, "body": "still alive", "roomId": 1, "userId": 166}),
    ));
    common::wait_for(&mut events, DEADLINE, |e| e.kind() == "message").await;
    assert!(session.is_connected());

    session.close().await;
}

#[tokio::test]
async fn room_deleted_push_removes_the_room() {
    let server = seeded_builder().spawn().await;
    let (session, mut events) = common::connect(&server).await;

    let room = session.get_room(1).await.unwrap();
    server.push(&Frame::event(name::ROOM_DELETED, json!({"roomId": 1})));

    let event = common::wait_for(&mut events, DEADLINE, |e| e.kind() == "room:deleted").await;
    let SessionEvent::RoomDeleted(deleted) = event else { unreachable!() };
    assert!(Arc::ptr_eq(&deleted, &room));

    session.close().await;
}
