//! S6 and the aliasing/identity invariants: pair rooms, handle resolution,
//! and uninitialized-room creation.

mod common;

use std::sync::Arc;

use confab_client::proto::name;
use confab_client::ClientError;
use confab_harness::{fixtures, MockServerBuilder};

fn seeded_builder() -> MockServerBuilder {
    let me = fixtures::person(1, "me");
    let peter = fixtures::person(166, "peter");
    let ana = fixtures::person(2, "ana");
    let finn = fixtures::person(4, "finn");
    MockServerBuilder::new()
        .person(peter.clone())
        .person(ana)
        .person(finn)
        .room(fixtures::pair_room(5, &[me, peter]))
}

#[tokio::test]
async fn pair_room_aliases_onto_the_persons_pair_room() {
    let server = seeded_builder().spawn().await;
    let (session, _events) = common::connect(&server).await;

    let peter = session.get_person_by_handle("peter").await.unwrap();
    let room = session.get_room(5).await.unwrap();
    let pair = peter.pair_room().expect("peter has a pair room");
    assert!(Arc::ptr_eq(&room, &pair), "room 5 must be peter's pair room");

    // Re-ingesting the listing must not mint a second object.
    let rooms = session.get_all_rooms().await.unwrap();
    let again = rooms.iter().find(|r| r.id() == Some(5)).unwrap();
    assert!(Arc::ptr_eq(again, &room));

    session.close().await;
}

#[tokio::test]
async fn lookups_preserve_identity() {
    let server = seeded_builder().spawn().await;
    let (session, _events) = common::connect(&server).await;

    let first = session.get_person_by_handle("peter").await.unwrap();
    let second = session.get_person_by_handle("peter").await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));

    let by_id = session.get_person(166).await.unwrap();
    assert!(Arc::ptr_eq(&first, &by_id));

    let room_a = session.get_room(5).await.unwrap();
    let room_b = session.get_room(5).await.unwrap();
    assert!(Arc::ptr_eq(&room_a, &room_b));

    session.close().await;
}

#[tokio::test]
async fn single_handle_resolves_to_the_pair_room() {
    let server = seeded_builder().spawn().await;
    let (session, _events) = common::connect(&server).await;

    let peter = session.get_person_by_handle("peter").await.unwrap();
    let room = session.get_room_for_handles(&["peter"]).await.unwrap();
    assert!(Arc::ptr_eq(&room, &peter.pair_room().unwrap()));

    session.close().await;
}

#[tokio::test]
async fn handles_resolving_to_only_self_are_rejected() {
    let server = seeded_builder().spawn().await;
    let (session, _events) = common::connect(&server).await;

    let err = session.get_room_for_handles(&["me"]).await.unwrap_err();
    assert!(matches!(err, ClientError::SelfMessage));

    session.close().await;
}

#[tokio::test]
async fn multi_handle_rooms_start_uninitialized_and_realize_on_send() {
    let server = seeded_builder().spawn().await;
    let (session, _events) = common::connect(&server).await;

    let room = session.get_room_for_handles(&["ana", "finn"]).await.unwrap();
    assert!(!room.is_initialized());
    assert_eq!(room.people().len(), 3); // me + ana + finn

    // Operations that need a server-side id refuse to run.
    let err = session.activate_room(&room).await.unwrap_err();
    assert!(matches!(err, ClientError::UninitializedRoom { .. }));

    // The first message creates the room server-side.
    let message = session.send_message(&room, "kickoff").await.unwrap();
    assert!(room.is_initialized());
    assert_eq!(message.content(), "kickoff");

    let id = room.id().unwrap();
    let fetched = session.get_room(id).await.unwrap();
    assert!(Arc::ptr_eq(&fetched, &room), "realized room registers in the cache");

    // A second resolution for the same handles finds the cached room.
    let again = session.get_room_for_handles(&["ana", "finn"]).await.unwrap();
    assert!(Arc::ptr_eq(&again, &room));

    session.close().await;
}

#[tokio::test]
async fn message_fifo_stays_bounded_under_push_load() {
    let server = seeded_builder().spawn().await;
    let (session, mut events) = common::connect(&server).await;

    for id in 0..60u64 {
        server.push(&confab_client::proto::Frame::event(
            name::ROOM_MESSAGE_CREATED,
            serde_json::json!({"id": 100 + id, "body": format!("m{id}"), "roomId": 5, "userId": 166}),
        ));
    }

    // Wait until the last one lands.
    common::wait_for(&mut events, std::time::Duration::from_secs(5), |e| match e {
        confab_client::SessionEvent::Message { message, .. } => message.id() == 159,
        _ => false,
    })
    .await;

    let room = session.get_room(5).await.unwrap();
    let messages = room.messages();
    assert_eq!(messages.len(), 50);
    assert_eq!(messages.first().unwrap().id(), 110);
    assert_eq!(messages.last().unwrap().id(), 159);

    session.close().await;
}
