//! Entity cache and frame routing.
//!
//! The `Roster` is the single source of truth for Person and Room identity:
//! all mutation goes through [`Roster::save_person`] / [`Roster::save_room`],
//! which update cached objects in place so external references stay valid.
//!
//! Frame routing is Sans-IO: [`Roster::route`] applies what it can and
//! returns a [`Route`] telling the session what to fetch over REST before
//! re-applying. The cache itself never performs I/O.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use confab_proto::{name, Frame};
use serde_json::Value;
use tracing::debug;

use crate::dto::{MessageDto, PersonDto, RoomDto, TypingNotice, UserModified};
use crate::event::SessionEvent;
use crate::model::{Author, Message, MessageStatus, Person, Room, RoomKind};

/// Result of ingesting a room payload.
#[derive(Debug)]
pub struct SavedRoom {
    /// The canonical room object.
    pub room: Arc<Room>,
    /// True when the room was not cached before.
    pub created: bool,
    /// People that joined, by id.
    pub added: Vec<Arc<Person>>,
    /// People that left, by id.
    pub removed: Vec<Arc<Person>>,
}

/// What the session must do to finish applying a frame.
#[derive(Debug)]
pub enum Route {
    /// Cache updated; emit these events in order.
    Events(Vec<SessionEvent>),
    /// A room referenced by the frame is unknown: fetch it over REST,
    /// ingest it, then act per `then`.
    FetchRoom {
        /// Room to fetch.
        id: u64,
        /// Follow-up once the room is cached.
        then: FetchRoomReason,
    },
    /// A person referenced by the frame needs a REST (re)fetch.
    FetchPerson {
        /// Person to fetch.
        id: u64,
        /// Which event the fetch concludes with.
        change: PersonChange,
    },
    /// Nothing to do (unknown frame, or a waiter-owned response).
    Ignored,
}

/// Follow-up after fetching an unknown room.
#[derive(Debug)]
pub enum FetchRoomReason {
    /// Re-route this frame now that the room exists.
    Deliver(Box<Frame>),
    /// The room itself changed: emit update + people diff events.
    Refresh,
}

/// Which person event a [`Route::FetchPerson`] concludes with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersonChange {
    /// `user.added`: conclude with `person:created`.
    Added,
    /// `user.updated` / unknown person: conclude with `person:updated`.
    Updated,
}

/// The live entity cache.
#[derive(Debug)]
pub struct Roster {
    current_user: Arc<Person>,
    current_user_id: u64,
    people: RwLock<HashMap<u64, Arc<Person>>>,
    handles: RwLock<HashMap<String, u64>>,
    rooms: RwLock<HashMap<u64, Arc<Room>>>,
    /// Uninitialized pair-room shells, keyed by the other person's id. A
    /// person's `pair_room` back-reference is weak, so the roster keeps the
    /// shell alive until a server payload realizes it into `rooms`.
    pair_shells: RwLock<HashMap<u64, Arc<Room>>>,
}

impl Roster {
    /// Build a roster around the logged-in user's profile.
    #[must_use]
    pub fn new(current_user: &PersonDto) -> Self {
        let person = Person::from_dto(current_user);
        let mut people = HashMap::new();
        people.insert(person.id(), Arc::clone(&person));
        let mut handles = HashMap::new();
        if !person.handle().is_empty() {
            handles.insert(person.handle(), person.id());
        }
        Self {
            current_user_id: person.id(),
            current_user: person,
            people: RwLock::new(people),
            handles: RwLock::new(handles),
            rooms: RwLock::new(HashMap::new()),
            pair_shells: RwLock::new(HashMap::new()),
        }
    }

    /// The logged-in user.
    #[must_use]
    pub fn current_user(&self) -> Arc<Person> {
        Arc::clone(&self.current_user)
    }

    /// Id of the logged-in user.
    #[must_use]
    pub fn current_user_id(&self) -> u64 {
        self.current_user_id
    }

    /// Cached person by id.
    #[must_use]
    pub fn person(&self, id: u64) -> Option<Arc<Person>> {
        self.people.read().expect("people lock poisoned").get(&id).cloned()
    }

    /// Cached person by handle.
    #[must_use]
    pub fn person_by_handle(&self, handle: &str) -> Option<Arc<Person>> {
        let id = *self.handles.read().expect("handle lock poisoned").get(handle)?;
        self.person(id)
    }

    /// Snapshot of every cached person.
    #[must_use]
    pub fn people(&self) -> Vec<Arc<Person>> {
        self.people.read().expect("people lock poisoned").values().cloned().collect()
    }

    /// Cached room by id.
    #[must_use]
    pub fn room(&self, id: u64) -> Option<Arc<Room>> {
        self.rooms.read().expect("room lock poisoned").get(&id).cloned()
    }

    /// Cached room by exact title.
    #[must_use]
    pub fn room_by_title(&self, title: &str) -> Option<Arc<Room>> {
        self.rooms
            .read()
            .expect("room lock poisoned")
            .values()
            .find(|room| room.title().as_deref() == Some(title))
            .cloned()
    }

    /// Snapshot of every cached room.
    #[must_use]
    pub fn rooms(&self) -> Vec<Arc<Room>> {
        self.rooms.read().expect("room lock poisoned").values().cloned().collect()
    }

    /// A cached room whose participant handles are a superset of `handles`.
    #[must_use]
    pub fn room_for_handles(&self, handles: &[String]) -> Option<Arc<Room>> {
        self.rooms
            .read()
            .expect("room lock poisoned")
            .values()
            .find(|room| {
                let room_handles = room.handles();
                handles.iter().all(|h| room_handles.contains(h))
            })
            .cloned()
    }

    /// Ingest a person payload.
    ///
    /// Updates the cached object in place when the id is known (identity is
    /// preserved); otherwise inserts a new person and creates its pair-room
    /// shell.
    pub fn save_person(&self, dto: &PersonDto) -> (Arc<Person>, bool) {
        let existing = self.person(dto.id);
        match existing {
            Some(person) => {
                person.apply(dto);
                self.reindex(&person);
                (person, false)
            }
            None => {
                let person = Person::from_dto(dto);
                self.people
                    .write()
                    .expect("people lock poisoned")
                    .insert(person.id(), Arc::clone(&person));
                self.reindex(&person);
                if person.id() != self.current_user_id {
                    // The shell stays uninitialized (and out of `rooms`)
                    // until a real pair-room payload realizes it.
                    let shell = Room::pair_shell(&self.current_user, &person);
                    self.pair_shells
                        .write()
                        .expect("shell lock poisoned")
                        .insert(person.id(), shell);
                }
                (person, true)
            }
        }
    }

    fn reindex(&self, person: &Arc<Person>) {
        let mut handles = self.handles.write().expect("handle lock poisoned");
        handles.retain(|_, id| *id != person.id());
        let handle = person.handle();
        if !handle.is_empty() {
            handles.insert(handle, person.id());
        }
    }

    /// Ingest a room payload.
    ///
    /// A known id updates in place and reports the people diff. A new pair
    /// room whose participants are the current user plus exactly one other
    /// person aliases onto that person's pair room instead of creating a
    /// second object. A room whose participants are only the current user is
    /// a degenerate treated as a normal room.
    pub fn save_room(&self, dto: &RoomDto) -> SavedRoom {
        let people: Vec<Arc<Person>> =
            dto.people.iter().map(|p| self.save_person(p).0).collect();

        if let Some(room) = self.room(dto.id) {
            room.apply_meta(dto);
            let (added, removed) = if dto.people.is_empty() {
                (Vec::new(), Vec::new())
            } else {
                room.replace_people(people)
            };
            self.ingest_room_messages(&room, &dto.messages);
            return SavedRoom { room, created: false, added, removed };
        }

        let is_pair = dto.kind.as_deref() == Some("pair");
        let room = match self.pair_other(&people) {
            Some(other) if is_pair => {
                let room = match other.pair_room() {
                    Some(room) => room,
                    None => Room::pair_shell(&self.current_user, &other),
                };
                self.pair_shells.write().expect("shell lock poisoned").remove(&other.id());
                room.set_id(dto.id);
                room.apply_meta(dto);
                if !dto.people.is_empty() {
                    let _ = room.replace_people(people);
                }
                room
            }
            _ => {
                let room = Room::uninitialized(people);
                room.set_id(dto.id);
                room.apply_meta(dto);
                room
            }
        };

        self.rooms
            .write()
            .expect("room lock poisoned")
            .insert(dto.id, Arc::clone(&room));
        self.ingest_room_messages(&room, &dto.messages);
        SavedRoom { room, created: true, added: Vec::new(), removed: Vec::new() }
    }

    /// Realize a locally-constructed room against its first server payload:
    /// assign the id, merge details, and register it in the cache.
    pub fn realize_room(&self, room: &Arc<Room>, dto: &RoomDto) {
        let people: Vec<Arc<Person>> =
            dto.people.iter().map(|p| self.save_person(p).0).collect();
        room.set_id(dto.id);
        room.apply_meta(dto);
        if !dto.people.is_empty() {
            let _ = room.replace_people(people);
        }
        self.rooms
            .write()
            .expect("room lock poisoned")
            .insert(dto.id, Arc::clone(room));
        self.ingest_room_messages(room, &dto.messages);
    }

    /// The canonical pair room for a person, creating the uninitialized
    /// shell if none exists yet.
    pub fn pair_room_for(&self, person: &Arc<Person>) -> Arc<Room> {
        if let Some(room) = person.pair_room() {
            return room;
        }
        let shell = Room::pair_shell(&self.current_user, person);
        self.pair_shells
            .write()
            .expect("shell lock poisoned")
            .insert(person.id(), Arc::clone(&shell));
        shell
    }

    /// The one other participant of a would-be pair room, if the list is
    /// exactly {current user, one other}. Self-only rooms resolve to `None`.
    fn pair_other(&self, people: &[Arc<Person>]) -> Option<Arc<Person>> {
        let mut saw_current = false;
        let mut other: Option<Arc<Person>> = None;
        for person in people {
            if person.id() == self.current_user_id {
                saw_current = true;
                continue;
            }
            match &other {
                None => other = Some(Arc::clone(person)),
                Some(existing) if existing.id() == person.id() => {}
                Some(_) => return None,
            }
        }
        if saw_current { other } else { None }
    }

    /// Create or update a message in a room, resolving the author through
    /// the cache. Trims the room's FIFO.
    pub fn ingest_message(&self, room: &Arc<Room>, dto: &MessageDto) -> Arc<Message> {
        if let Some(existing) = room.find_message(dto.id) {
            existing.merge(dto);
            return existing;
        }
        let author = match dto.user_id {
            Some(id) => match self.person(id) {
                Some(person) => Author::Person(person),
                None => Author::Id(id),
            },
            None => Author::Unknown,
        };
        let message = Message::from_dto(dto, author, room);
        room.push_message(Arc::clone(&message));
        message
    }

    fn ingest_room_messages(&self, room: &Arc<Room>, messages: &[MessageDto]) {
        for dto in messages {
            let _ = self.ingest_message(room, dto);
        }
    }

    /// Drop a room from the cache.
    pub fn remove_room(&self, id: u64) -> Option<Arc<Room>> {
        self.rooms.write().expect("room lock poisoned").remove(&id)
    }

    /// Drop a person from the cache.
    pub fn remove_person(&self, id: u64) -> Option<Arc<Person>> {
        let person = self.people.write().expect("people lock poisoned").remove(&id)?;
        self.handles.write().expect("handle lock poisoned").retain(|_, v| *v != id);
        self.pair_shells.write().expect("shell lock poisoned").remove(&id);
        Some(person)
    }

    /// Apply an inbound frame to the cache.
    ///
    /// Pure with respect to I/O: when the frame references entities the
    /// cache does not hold, the returned [`Route`] instructs the session to
    /// fetch them and call again.
    pub fn route(&self, frame: &Frame) -> Route {
        match frame.name.as_str() {
            name::ROOM_MESSAGE_CREATED => self.route_message_created(frame),
            name::ROOM_MESSAGE_UPDATED => self.route_message_updated(frame),
            name::ROOM_MESSAGES_DELETED => {
                self.route_message_status(frame, MessageStatus::Redacted)
            }
            name::ROOM_MESSAGES_DELETED_UNDONE => {
                self.route_message_status(frame, MessageStatus::Active)
            }
            name::ROOM_UPDATED => match room_id_of(frame) {
                Some(id) => Route::FetchRoom { id, then: FetchRoomReason::Refresh },
                None => malformed(frame, "room.updated without a room id"),
            },
            name::ROOM_DELETED => match room_id_of(frame) {
                Some(id) => match self.remove_room(id) {
                    Some(room) => Route::Events(vec![SessionEvent::RoomDeleted(room)]),
                    None => Route::Ignored,
                },
                None => malformed(frame, "room.deleted without a room id"),
            },
            name::ROOM_TYPING => self.route_typing(frame),
            name::ROOM_USER_ACTIVE => self.route_user_active(frame),
            name::USER_MODIFIED => self.route_user_modified(frame),
            name::USER_ADDED => match frame.content_u64("userId") {
                Some(id) => Route::FetchPerson { id, change: PersonChange::Added },
                None => malformed(frame, "user.added without a user id"),
            },
            name::USER_UPDATED => match frame.content_u64("userId") {
                Some(id) => Route::FetchPerson { id, change: PersonChange::Updated },
                None => malformed(frame, "user.updated without a user id"),
            },
            name::USER_DELETED => match frame.content_u64("userId") {
                Some(id) => match self.remove_person(id) {
                    Some(person) => Route::Events(vec![SessionEvent::PersonDeleted(person)]),
                    None => Route::Ignored,
                },
                None => malformed(frame, "user.deleted without a user id"),
            },
            name::PONG => Route::Events(vec![SessionEvent::Pong]),
            // Waiter-owned responses: correlation happens in the socket layer.
            name::UNSEEN_COUNTS_UPDATED
            | name::AUTHENTICATION_REQUEST
            | name::AUTHENTICATION_CONFIRMATION
            | name::AUTHENTICATION_ERROR => Route::Ignored,
            name::COMPANY_ADDED | name::COMPANY_UPDATED | name::COMPANY_DELETED => {
                debug!(name = %frame.name, "company frame observed, not applied");
                Route::Ignored
            }
            other => {
                debug!(name = other, "unknown frame ignored");
                Route::Ignored
            }
        }
    }

    fn route_message_created(&self, frame: &Frame) -> Route {
        let dto: MessageDto = match serde_json::from_value(frame.contents.clone()) {
            Ok(dto) => dto,
            Err(e) => return malformed(frame, &format!("bad message contents: {e}")),
        };
        let Some(room_id) = dto.room_id else {
            return malformed(frame, "room.message.created without a room id");
        };
        let Some(room) = self.room(room_id) else {
            return Route::FetchRoom {
                id: room_id,
                then: FetchRoomReason::Deliver(Box::new(frame.clone())),
            };
        };

        let message = self.ingest_message(&room, &dto);
        let own = message.author_id() == Some(self.current_user_id);

        let mut events = vec![SessionEvent::Message {
            room: Arc::clone(&room),
            message: Arc::clone(&message),
        }];
        if !own {
            events.push(SessionEvent::MessageReceived {
                room: Arc::clone(&room),
                message: Arc::clone(&message),
            });
            if room.kind() == RoomKind::Pair {
                events.push(SessionEvent::MessageDirect {
                    room: Arc::clone(&room),
                    message: Arc::clone(&message),
                });
            }
        }
        if self.current_user.is_mentioned(&message) {
            events.push(SessionEvent::MessageMention { room, message });
        }
        Route::Events(events)
    }

    fn route_message_updated(&self, frame: &Frame) -> Route {
        let dto: MessageDto = match serde_json::from_value(frame.contents.clone()) {
            Ok(dto) => dto,
            Err(e) => return malformed(frame, &format!("bad message contents: {e}")),
        };
        let room = dto.room_id.and_then(|id| self.room(id));
        match room.and_then(|room| room.find_message(dto.id)) {
            Some(message) => {
                message.merge(&dto);
                Route::Events(Vec::new())
            }
            None => Route::Ignored,
        }
    }

    fn route_message_status(&self, frame: &Frame, status: MessageStatus) -> Route {
        let Some(room) = room_id_of(frame).and_then(|id| self.room(id)) else {
            return Route::Ignored;
        };
        let ids: Vec<u64> = frame
            .content("ids")
            .and_then(Value::as_array)
            .map(|ids| ids.iter().filter_map(Value::as_u64).collect())
            .unwrap_or_default();
        for id in ids {
            if let Some(message) = room.find_message(id) {
                message.set_status(status.clone());
            }
        }
        Route::Events(Vec::new())
    }

    fn route_typing(&self, frame: &Frame) -> Route {
        let notice: TypingNotice = match serde_json::from_value(frame.contents.clone()) {
            Ok(notice) => notice,
            Err(e) => return malformed(frame, &format!("bad typing contents: {e}")),
        };
        let Some(room) = self.room(notice.room_id) else {
            return Route::FetchRoom {
                id: notice.room_id,
                then: FetchRoomReason::Deliver(Box::new(frame.clone())),
            };
        };
        match self.person(notice.user_id) {
            Some(person) => Route::Events(vec![SessionEvent::RoomTyping {
                room,
                person,
                is_typing: notice.is_typing,
            }]),
            None => {
                debug!(user_id = notice.user_id, "typing from unknown person ignored");
                Route::Ignored
            }
        }
    }

    fn route_user_active(&self, frame: &Frame) -> Route {
        if frame.content_u64("userId") == Some(self.current_user_id) {
            if let Some(room) = room_id_of(frame).and_then(|id| self.room(id)) {
                let viewed = frame
                    .content_str("date")
                    .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                    .map_or_else(Utc::now, |dt| dt.with_timezone(&Utc));
                room.set_last_viewed_at(viewed);
            }
        }
        Route::Events(Vec::new())
    }

    fn route_user_modified(&self, frame: &Frame) -> Route {
        let change: UserModified = match serde_json::from_value(frame.contents.clone()) {
            Ok(change) => change,
            Err(e) => return malformed(frame, &format!("bad user.modified contents: {e}")),
        };
        let Some(person) = self.person(change.user_id) else {
            return Route::FetchPerson { id: change.user_id, change: PersonChange::Updated };
        };

        person.apply_field(&change.key, &change.value);
        if change.key == "handle" {
            self.reindex(&person);
        }
        let event = if person.id() == self.current_user_id {
            SessionEvent::UserUpdate(person)
        } else {
            SessionEvent::PersonUpdated(person)
        };
        Route::Events(vec![event])
    }
}

fn room_id_of(frame: &Frame) -> Option<u64> {
    frame.content_u64("roomId").or_else(|| frame.content_u64("id"))
}

fn malformed(frame: &Frame, detail: &str) -> Route {
    Route::Events(vec![SessionEvent::Error {
        message: format!("{} ({})", detail, frame.name),
    }])
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn roster() -> Roster {
        Roster::new(
            &serde_json::from_value(json!({"id": 1, "handle": "me", "firstName": "Mel"})).unwrap(),
        )
    }

    fn person_dto(id: u64, handle: &str) -> PersonDto {
        serde_json::from_value(json!({"id": id, "handle": handle, "status": "away"})).unwrap()
    }

    fn pair_room_dto(id: u64, other: u64, other_handle: &str) -> RoomDto {
        serde_json::from_value(json!({
            "id": id,
            "type": "pair",
            "people": [
                {"id": 1, "handle": "me"},
                {"id": other, "handle": other_handle}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn save_person_preserves_identity() {
        let roster = roster();
        let (first, created) = roster.save_person(&person_dto(166, "peter"));
        assert!(created);

        let (second, created) = roster.save_person(
            &serde_json::from_value(json!({"id": 166, "status": "online"})).unwrap(),
        );
        assert!(!created);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.status(), crate::model::PersonStatus::Online);

        let by_handle = roster.person_by_handle("peter").unwrap();
        assert!(Arc::ptr_eq(&first, &by_handle));
    }

    #[test]
    fn new_people_get_a_pair_room_shell() {
        let roster = roster();
        let (peter, _) = roster.save_person(&person_dto(166, "peter"));
        let shell = peter.pair_room().unwrap();
        assert!(!shell.is_initialized());
        assert_eq!(shell.kind(), RoomKind::Pair);
    }

    #[test]
    fn pair_rooms_alias_onto_the_other_persons_pair_room() {
        let roster = roster();
        let (peter, _) = roster.save_person(&person_dto(166, "peter"));
        let shell = peter.pair_room().unwrap();

        let saved = roster.save_room(&pair_room_dto(5, 166, "peter"));
        assert!(saved.created);
        assert!(Arc::ptr_eq(&saved.room, &shell));
        assert_eq!(saved.room.id(), Some(5));

        // Re-ingesting the same payload must not create a second object.
        let again = roster.save_room(&pair_room_dto(5, 166, "peter"));
        assert!(!again.created);
        assert!(Arc::ptr_eq(&again.room, &shell));
        assert!(Arc::ptr_eq(&roster.room(5).unwrap(), &peter.pair_room().unwrap()));
    }

    #[test]
    fn self_only_rooms_are_not_aliased() {
        let roster = roster();
        let dto: RoomDto = serde_json::from_value(json!({
            "id": 9,
            "type": "pair",
            "people": [{"id": 1, "handle": "me"}, {"id": 1, "handle": "me"}]
        }))
        .unwrap();
        let saved = roster.save_room(&dto);
        assert!(saved.created);
        assert!(roster.current_user().pair_room().is_none());
    }

    #[test]
    fn save_room_reports_people_diff() {
        let roster = roster();
        let dto: RoomDto = serde_json::from_value(json!({
            "id": 3,
            "type": "private",
            "people": [{"id": 1, "handle": "me"}, {"id": 2, "handle": "ana"}]
        }))
        .unwrap();
        roster.save_room(&dto);

        let updated: RoomDto = serde_json::from_value(json!({
            "id": 3,
            "type": "private",
            "people": [{"id": 1, "handle": "me"}, {"id": 4, "handle": "finn"}]
        }))
        .unwrap();
        let saved = roster.save_room(&updated);
        assert!(!saved.created);
        assert_eq!(saved.added.len(), 1);
        assert_eq!(saved.added[0].id(), 4);
        assert_eq!(saved.removed.len(), 1);
        assert_eq!(saved.removed[0].id(), 2);
    }

    #[test]
    fn message_frames_fan_out_events() {
        let roster = roster();
        roster.save_person(&person_dto(2, "ana"));
        roster.save_room(&pair_room_dto(1, 2, "ana"));

        let frame = Frame::event(
            name::ROOM_MESSAGE_CREATED,
            json!({
                "id": 52,
                "body": "howya lad",
                "roomId": 1,
                "userId": 2,
                "createdAt": "2017-01-29T18:06:34.640Z"
            }),
        );
        let Route::Events(events) = roster.route(&frame) else {
            panic!("expected events");
        };
        let kinds: Vec<_> = events.iter().map(SessionEvent::kind).collect();
        assert_eq!(kinds, vec!["message", "message:received", "message:direct"]);

        let room = roster.room(1).unwrap();
        let message = room.find_message(52).unwrap();
        assert_eq!(message.content(), "howya lad");
        assert_eq!(message.created_at().unwrap().timestamp_millis(), 1_485_713_194_640);
    }

    #[test]
    fn mentions_are_detected_on_route() {
        let roster = roster();
        roster.save_person(&person_dto(2, "ana"));
        roster.save_room(&pair_room_dto(1, 2, "ana"));

        let frame = Frame::event(
            name::ROOM_MESSAGE_CREATED,
            json!({"id": 60, "body": "ping @me now", "roomId": 1, "userId": 2}),
        );
        let Route::Events(events) = roster.route(&frame) else {
            panic!("expected events");
        };
        assert!(events.iter().any(|e| e.kind() == "message:mention"));
    }

    #[test]
    fn own_messages_skip_received_and_mention() {
        let roster = roster();
        roster.save_person(&person_dto(2, "ana"));
        roster.save_room(&pair_room_dto(1, 2, "ana"));

        let frame = Frame::event(
            name::ROOM_MESSAGE_CREATED,
            json!({"id": 61, "body": "note for @me", "roomId": 1, "userId": 1}),
        );
        let Route::Events(events) = roster.route(&frame) else {
            panic!("expected events");
        };
        let kinds: Vec<_> = events.iter().map(SessionEvent::kind).collect();
        assert_eq!(kinds, vec!["message"]);
    }

    #[test]
    fn unknown_room_requests_a_fetch() {
        let roster = roster();
        let frame = Frame::event(
            name::ROOM_MESSAGE_CREATED,
            json!({"id": 1, "body": "x", "roomId": 9999, "userId": 2}),
        );
        match roster.route(&frame) {
            Route::FetchRoom { id: 9999, then: FetchRoomReason::Deliver(_) } => {}
            other => panic!("expected FetchRoom, got {other:?}"),
        }
    }

    #[test]
    fn user_modified_updates_and_emits() {
        let roster = roster();
        roster.save_person(&person_dto(166, "peter"));

        let frame = Frame::event(
            name::USER_MODIFIED,
            json!({"userId": 166, "key": "status", "value": "online"}),
        );
        let Route::Events(events) = roster.route(&frame) else {
            panic!("expected events");
        };
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind(), "person:updated");
        assert_eq!(
            roster.person(166).unwrap().status(),
            crate::model::PersonStatus::Online
        );
    }

    #[test]
    fn redaction_and_undo_round_trip() {
        let roster = roster();
        roster.save_person(&person_dto(2, "ana"));
        roster.save_room(&pair_room_dto(1, 2, "ana"));
        roster.route(&Frame::event(
            name::ROOM_MESSAGE_CREATED,
            json!({"id": 70, "body": "oops", "roomId": 1, "userId": 2}),
        ));

        roster.route(&Frame::event(
            name::ROOM_MESSAGES_DELETED,
            json!({"roomId": 1, "ids": [70]}),
        ));
        let room = roster.room(1).unwrap();
        assert_eq!(room.find_message(70).unwrap().status(), MessageStatus::Redacted);

        roster.route(&Frame::event(
            name::ROOM_MESSAGES_DELETED_UNDONE,
            json!({"roomId": 1, "ids": [70]}),
        ));
        assert_eq!(room.find_message(70).unwrap().status(), MessageStatus::Active);
    }

    #[test]
    fn user_deleted_removes_from_cache() {
        let roster = roster();
        roster.save_person(&person_dto(166, "peter"));

        let frame = Frame::event(name::USER_DELETED, json!({"userId": 166}));
        let Route::Events(events) = roster.route(&frame) else {
            panic!("expected events");
        };
        assert_eq!(events[0].kind(), "person:deleted");
        assert!(roster.person(166).is_none());
        assert!(roster.person_by_handle("peter").is_none());
    }

    #[test]
    fn unknown_frames_are_ignored() {
        let roster = roster();
        let frame = Frame::event("installation.confetti", json!({}));
        assert!(matches!(roster.route(&frame), Route::Ignored));
    }

    #[test]
    fn room_for_handles_matches_supersets() {
        let roster = roster();
        let dto: RoomDto = serde_json::from_value(json!({
            "id": 3,
            "type": "private",
            "people": [
                {"id": 1, "handle": "me"},
                {"id": 2, "handle": "ana"},
                {"id": 4, "handle": "finn"}
            ]
        }))
        .unwrap();
        roster.save_room(&dto);

        let found = roster.room_for_handles(&["ana".to_string(), "finn".to_string()]).unwrap();
        assert_eq!(found.id(), Some(3));
        assert!(roster.room_for_handles(&["nobody".to_string()]).is_none());
    }
}
