//! Live entity model: people, rooms, messages.
//!
//! Entities are shared as `Arc` handles with interior-mutable state: external
//! consumers hold references, and updates must never replace a cached
//! object's identity. Navigation back-references (message → room,
//! person → pair room) are `Weak` so rooms own their messages without cycles.
//!
//! All mutation goes through the cache (`Roster`); the methods here are the
//! primitives it uses.

use std::collections::VecDeque;
use std::sync::{Arc, RwLock, Weak};

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::dto::{CompanyDto, MessageDto, PersonDto, RoomDto};

/// Per-room in-memory message retention. Older messages are evicted.
pub const MESSAGE_BUFFER: usize = 50;

/// Presence status of a person.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PersonStatus {
    /// Connected and recently active.
    Online,
    /// Away.
    Away,
    /// Connected but idle.
    Idle,
    /// Actively using the client.
    Active,
    /// Not connected.
    #[default]
    Offline,
    /// A status string this client version does not know.
    Other(String),
}

impl PersonStatus {
    /// Parse a wire status string.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value {
            "online" => Self::Online,
            "away" => Self::Away,
            "idle" => Self::Idle,
            "active" => Self::Active,
            "offline" => Self::Offline,
            other => Self::Other(other.to_string()),
        }
    }

    /// Wire spelling.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Online => "online",
            Self::Away => "away",
            Self::Idle => "idle",
            Self::Active => "active",
            Self::Offline => "offline",
            Self::Other(other) => other,
        }
    }
}

/// Room type.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RoomKind {
    /// Two-person room; one canonical room per pair.
    Pair,
    /// Invite-only group room.
    Private,
    /// Whole-company room.
    Company,
    /// A type this client version does not know.
    Other(String),
    /// Type not reported yet (locally-constructed rooms).
    #[default]
    Unknown,
}

impl RoomKind {
    /// Parse a wire type string.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value {
            "pair" => Self::Pair,
            "private" => Self::Private,
            "company" => Self::Company,
            other => Self::Other(other.to_string()),
        }
    }
}

/// Message lifecycle status.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MessageStatus {
    /// Visible.
    #[default]
    Active,
    /// Deleted; kept in place so an undo can restore it.
    Redacted,
    /// A status this client version does not know.
    Other(String),
}

impl MessageStatus {
    /// Parse a wire status string.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value {
            "active" => Self::Active,
            "deleted" | "redacted" => Self::Redacted,
            other => Self::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Default)]
struct PersonState {
    handle: String,
    first_name: String,
    last_name: String,
    email: Option<String>,
    title: Option<String>,
    status: PersonStatus,
    last_activity_at: Option<DateTime<Utc>>,
    company: Option<CompanyDto>,
}

/// A person. Identity is the id; at most one instance per id lives in the
/// cache, so `Arc::ptr_eq` is meaningful.
#[derive(Debug)]
pub struct Person {
    id: u64,
    state: RwLock<PersonState>,
    pair_room: RwLock<Weak<Room>>,
}

impl Person {
    /// Build a person from a wire payload.
    #[must_use]
    pub fn from_dto(dto: &PersonDto) -> Arc<Self> {
        let person = Arc::new(Self {
            id: dto.id,
            state: RwLock::new(PersonState::default()),
            pair_room: RwLock::new(Weak::new()),
        });
        person.apply(dto);
        person
    }

    /// Person id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Unique handle, no leading `@`.
    #[must_use]
    pub fn handle(&self) -> String {
        self.state.read().expect("person lock poisoned").handle.clone()
    }

    /// First and last name joined.
    #[must_use]
    pub fn full_name(&self) -> String {
        let state = self.state.read().expect("person lock poisoned");
        format!("{} {}", state.first_name, state.last_name).trim().to_string()
    }

    /// Presence status.
    #[must_use]
    pub fn status(&self) -> PersonStatus {
        self.state.read().expect("person lock poisoned").status.clone()
    }

    /// Email address, if known.
    #[must_use]
    pub fn email(&self) -> Option<String> {
        self.state.read().expect("person lock poisoned").email.clone()
    }

    /// Job title, if known.
    #[must_use]
    pub fn title(&self) -> Option<String> {
        self.state.read().expect("person lock poisoned").title.clone()
    }

    /// Last activity timestamp, if known.
    #[must_use]
    pub fn last_activity_at(&self) -> Option<DateTime<Utc>> {
        self.state.read().expect("person lock poisoned").last_activity_at
    }

    /// The canonical pair room with this person, once known.
    #[must_use]
    pub fn pair_room(&self) -> Option<Arc<Room>> {
        self.pair_room.read().expect("person lock poisoned").upgrade()
    }

    /// Record the canonical pair room.
    pub fn set_pair_room(&self, room: &Arc<Room>) {
        *self.pair_room.write().expect("person lock poisoned") = Arc::downgrade(room);
    }

    /// Merge a wire payload into this person. Fields absent from the payload
    /// keep their current value.
    pub fn apply(&self, dto: &PersonDto) {
        let mut state = self.state.write().expect("person lock poisoned");
        if let Some(handle) = &dto.handle {
            state.handle = handle.clone();
        }
        if let Some(first_name) = &dto.first_name {
            state.first_name = first_name.clone();
        }
        if let Some(last_name) = &dto.last_name {
            state.last_name = last_name.clone();
        }
        if let Some(email) = &dto.email {
            state.email = Some(email.clone());
        }
        if let Some(title) = &dto.title {
            state.title = Some(title.clone());
        }
        if let Some(status) = &dto.status {
            state.status = PersonStatus::parse(status);
        }
        if let Some(at) = dto.last_activity_at {
            state.last_activity_at = Some(at);
        }
        if let Some(company) = &dto.company {
            state.company = Some(company.clone());
        }
    }

    /// Apply a single-field change from a `user.modified` frame.
    ///
    /// Returns `false` for field names this client does not track.
    pub fn apply_field(&self, key: &str, value: &Value) -> bool {
        let mut state = self.state.write().expect("person lock poisoned");
        match key {
            "status" => {
                if let Some(status) = value.as_str() {
                    state.status = PersonStatus::parse(status);
                }
            }
            "handle" => {
                if let Some(handle) = value.as_str() {
                    state.handle = handle.to_string();
                }
            }
            "firstName" => {
                if let Some(name) = value.as_str() {
                    state.first_name = name.to_string();
                }
            }
            "lastName" => {
                if let Some(name) = value.as_str() {
                    state.last_name = name.to_string();
                }
            }
            "email" => state.email = value.as_str().map(str::to_string),
            "title" => state.title = value.as_str().map(str::to_string),
            "lastActivityAt" => {
                state.last_activity_at = value
                    .as_str()
                    .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                    .map(|dt| dt.with_timezone(&Utc));
            }
            _ => return false,
        }
        true
    }

    /// Is this person mentioned by the message? True iff the content contains
    /// `@<handle>` as a word and the message was not authored by this person.
    #[must_use]
    pub fn is_mentioned(&self, message: &Message) -> bool {
        if message.author_id() == Some(self.id) {
            return false;
        }
        let handle = self.handle();
        !handle.is_empty() && contains_mention(&message.content(), &handle)
    }
}

/// Word-boundary search for `@handle` inside message content.
fn contains_mention(content: &str, handle: &str) -> bool {
    let is_word = |c: char| c.is_alphanumeric() || c == '_' || c == '-';
    let mut rest = content;
    let mut consumed = 0usize;
    while let Some(at) = rest.find('@') {
        let candidate = &rest[at + 1..];
        let before_ok = {
            let absolute = consumed + at;
            content[..absolute].chars().next_back().is_none_or(|c| !is_word(c))
        };
        if before_ok && candidate.starts_with(handle) {
            let after_ok = candidate[handle.len()..].chars().next().is_none_or(|c| !is_word(c));
            if after_ok {
                return true;
            }
        }
        consumed += at + 1;
        rest = &rest[at + 1..];
    }
    false
}

#[derive(Debug, Default)]
struct RoomState {
    kind: RoomKind,
    title: Option<String>,
    status: Option<String>,
    creator_id: Option<u64>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    last_activity_at: Option<DateTime<Utc>>,
    last_viewed_at: Option<DateTime<Utc>>,
    people: Vec<Arc<Person>>,
    unread_count: u64,
    important_unread_count: u64,
}

/// A room. "Initialized" means a server-side id has been assigned; a room
/// built locally from handles stays uninitialized until the first message
/// creates it server-side.
#[derive(Debug)]
pub struct Room {
    id: RwLock<Option<u64>>,
    state: RwLock<RoomState>,
    messages: RwLock<VecDeque<Arc<Message>>>,
}

impl Room {
    /// Build an uninitialized room holding the given people.
    #[must_use]
    pub fn uninitialized(people: Vec<Arc<Person>>) -> Arc<Self> {
        let room = Self::empty();
        room.state.write().expect("room lock poisoned").people = dedupe_people(people);
        room
    }

    /// Build an uninitialized pair-room shell for the two given people.
    #[must_use]
    pub fn pair_shell(current_user: &Arc<Person>, other: &Arc<Person>) -> Arc<Self> {
        let room = Self::empty();
        {
            let mut state = room.state.write().expect("room lock poisoned");
            state.kind = RoomKind::Pair;
            state.people = vec![Arc::clone(current_user), Arc::clone(other)];
        }
        other.set_pair_room(&room);
        room
    }

    fn empty() -> Arc<Self> {
        Arc::new(Self {
            id: RwLock::new(None),
            state: RwLock::new(RoomState::default()),
            messages: RwLock::new(VecDeque::new()),
        })
    }

    /// Server-side id, once assigned.
    #[must_use]
    pub fn id(&self) -> Option<u64> {
        *self.id.read().expect("room lock poisoned")
    }

    /// True once the server has assigned an id.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.id().is_some()
    }

    /// Assign the server-side id.
    pub fn set_id(&self, id: u64) {
        *self.id.write().expect("room lock poisoned") = Some(id);
    }

    /// Room type.
    #[must_use]
    pub fn kind(&self) -> RoomKind {
        self.state.read().expect("room lock poisoned").kind.clone()
    }

    /// Room title, absent for pair rooms.
    #[must_use]
    pub fn title(&self) -> Option<String> {
        self.state.read().expect("room lock poisoned").title.clone()
    }

    /// Unread message count.
    #[must_use]
    pub fn unread_count(&self) -> u64 {
        self.state.read().expect("room lock poisoned").unread_count
    }

    /// Unread important message count.
    #[must_use]
    pub fn important_unread_count(&self) -> u64 {
        self.state.read().expect("room lock poisoned").important_unread_count
    }

    /// When the current user last viewed the room.
    #[must_use]
    pub fn last_viewed_at(&self) -> Option<DateTime<Utc>> {
        self.state.read().expect("room lock poisoned").last_viewed_at
    }

    /// Record a view timestamp.
    pub fn set_last_viewed_at(&self, at: DateTime<Utc>) {
        self.state.write().expect("room lock poisoned").last_viewed_at = Some(at);
    }

    /// Participants, in server order.
    #[must_use]
    pub fn people(&self) -> Vec<Arc<Person>> {
        self.state.read().expect("room lock poisoned").people.clone()
    }

    /// Participant handles, in server order.
    #[must_use]
    pub fn handles(&self) -> Vec<String> {
        self.people().iter().map(|p| p.handle()).collect()
    }

    /// Is the person a participant?
    #[must_use]
    pub fn contains_person(&self, id: u64) -> bool {
        self.state.read().expect("room lock poisoned").people.iter().any(|p| p.id() == id)
    }

    /// Merge room metadata from a wire payload. People are replaced
    /// separately via [`Room::replace_people`] because they resolve through
    /// the cache.
    pub fn apply_meta(&self, dto: &RoomDto) {
        let mut state = self.state.write().expect("room lock poisoned");
        if let Some(kind) = &dto.kind {
            state.kind = RoomKind::parse(kind);
        }
        if let Some(title) = &dto.title {
            state.title = Some(title.clone());
        }
        if let Some(status) = &dto.status {
            state.status = Some(status.clone());
        }
        if let Some(creator_id) = dto.creator_id {
            state.creator_id = Some(creator_id);
        }
        if let Some(at) = dto.created_at {
            state.created_at = Some(at);
        }
        if let Some(at) = dto.updated_at {
            state.updated_at = Some(at);
        }
        if let Some(at) = dto.last_activity_at {
            state.last_activity_at = Some(at);
        }
        if let Some(at) = dto.last_viewed_at {
            state.last_viewed_at = Some(at);
        }
        state.unread_count = dto.unread_count;
        state.important_unread_count = dto.important_unread_count;
    }

    /// Replace the participant list, returning `(added, removed)` by id.
    pub fn replace_people(
        &self,
        people: Vec<Arc<Person>>,
    ) -> (Vec<Arc<Person>>, Vec<Arc<Person>>) {
        let people = dedupe_people(people);
        let mut state = self.state.write().expect("room lock poisoned");

        let added = people
            .iter()
            .filter(|p| !state.people.iter().any(|old| old.id() == p.id()))
            .cloned()
            .collect();
        let removed = state
            .people
            .iter()
            .filter(|old| !people.iter().any(|p| p.id() == old.id()))
            .cloned()
            .collect();

        state.people = people;
        (added, removed)
    }

    /// Append a message, evicting the oldest past [`MESSAGE_BUFFER`].
    pub fn push_message(&self, message: Arc<Message>) {
        let mut messages = self.messages.write().expect("room lock poisoned");
        messages.push_back(message);
        while messages.len() > MESSAGE_BUFFER {
            messages.pop_front();
        }
    }

    /// Find a retained message by id.
    #[must_use]
    pub fn find_message(&self, id: u64) -> Option<Arc<Message>> {
        self.messages
            .read()
            .expect("room lock poisoned")
            .iter()
            .find(|m| m.id() == id)
            .cloned()
    }

    /// Retained messages, oldest first.
    #[must_use]
    pub fn messages(&self) -> Vec<Arc<Message>> {
        self.messages.read().expect("room lock poisoned").iter().cloned().collect()
    }

    /// Most recently retained message.
    #[must_use]
    pub fn last_message(&self) -> Option<Arc<Message>> {
        self.messages.read().expect("room lock poisoned").back().cloned()
    }
}

fn dedupe_people(people: Vec<Arc<Person>>) -> Vec<Arc<Person>> {
    let mut seen = Vec::new();
    let mut out = Vec::with_capacity(people.len());
    for person in people {
        if !seen.contains(&person.id()) {
            seen.push(person.id());
            out.push(person);
        }
    }
    out
}

/// Message author: resolved to a cached person when possible.
#[derive(Debug, Clone)]
pub enum Author {
    /// Resolved author.
    Person(Arc<Person>),
    /// Only the numeric id is known.
    Id(u64),
    /// The wire payload carried no author.
    Unknown,
}

impl Author {
    /// Author person id, if known.
    #[must_use]
    pub fn id(&self) -> Option<u64> {
        match self {
            Self::Person(person) => Some(person.id()),
            Self::Id(id) => Some(*id),
            Self::Unknown => None,
        }
    }
}

#[derive(Debug, Default)]
struct MessageState {
    content: String,
    created_at: Option<DateTime<Utc>>,
    edited_at: Option<DateTime<Utc>>,
    status: MessageStatus,
    file: Option<Value>,
    third_party_cards: Option<Value>,
    is_user_active: bool,
}

/// A message, owned by its room and ordered by arrival.
#[derive(Debug)]
pub struct Message {
    id: u64,
    room_id: u64,
    author: Author,
    room: Weak<Room>,
    state: RwLock<MessageState>,
}

impl Message {
    /// Build a message from a wire payload.
    #[must_use]
    pub fn from_dto(dto: &MessageDto, author: Author, room: &Arc<Room>) -> Arc<Self> {
        let message = Arc::new(Self {
            id: dto.id,
            room_id: dto.room_id.or_else(|| room.id()).unwrap_or_default(),
            author,
            room: Arc::downgrade(room),
            state: RwLock::new(MessageState::default()),
        });
        message.merge(dto);
        message
    }

    /// Message id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Containing room id.
    #[must_use]
    pub fn room_id(&self) -> u64 {
        self.room_id
    }

    /// Containing room, while it is still cached.
    #[must_use]
    pub fn room(&self) -> Option<Arc<Room>> {
        self.room.upgrade()
    }

    /// The author.
    #[must_use]
    pub fn author(&self) -> &Author {
        &self.author
    }

    /// Author person id, if known.
    #[must_use]
    pub fn author_id(&self) -> Option<u64> {
        self.author.id()
    }

    /// Message text (the wire's `body`).
    #[must_use]
    pub fn content(&self) -> String {
        self.state.read().expect("message lock poisoned").content.clone()
    }

    /// Creation timestamp.
    #[must_use]
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.state.read().expect("message lock poisoned").created_at
    }

    /// Edit timestamp, if edited.
    #[must_use]
    pub fn edited_at(&self) -> Option<DateTime<Utc>> {
        self.state.read().expect("message lock poisoned").edited_at
    }

    /// Lifecycle status.
    #[must_use]
    pub fn status(&self) -> MessageStatus {
        self.state.read().expect("message lock poisoned").status.clone()
    }

    /// Set the lifecycle status (redaction and undo).
    pub fn set_status(&self, status: MessageStatus) {
        self.state.write().expect("message lock poisoned").status = status;
    }

    /// Merge a wire payload into this message. Absent fields keep their
    /// current value.
    pub fn merge(&self, dto: &MessageDto) {
        let mut state = self.state.write().expect("message lock poisoned");
        if let Some(body) = &dto.body {
            state.content = body.clone();
        }
        if let Some(at) = dto.created_at {
            state.created_at = Some(at);
        }
        if let Some(at) = dto.edited_at {
            state.edited_at = Some(at);
        }
        if let Some(status) = &dto.status {
            state.status = MessageStatus::parse(status);
        }
        if let Some(file) = &dto.file {
            state.file = Some(file.clone());
        }
        if let Some(cards) = &dto.third_party_cards {
            state.third_party_cards = Some(cards.clone());
        }
        state.is_user_active = dto.is_user_active;
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn person(id: u64, handle: &str) -> Arc<Person> {
        Person::from_dto(
            &serde_json::from_value(json!({"id": id, "handle": handle, "status": "away"})).unwrap(),
        )
    }

    fn message_in(room: &Arc<Room>, id: u64, author: Author, body: &str) -> Arc<Message> {
        let dto = serde_json::from_value(json!({"id": id, "body": body})).unwrap();
        Message::from_dto(&dto, author, room)
    }

    #[test]
    fn apply_merges_only_present_fields() {
        let peter = person(1, "peter");
        peter.apply(&serde_json::from_value(json!({"id": 1, "firstName": "Peter"})).unwrap());
        assert_eq!(peter.handle(), "peter");
        assert_eq!(peter.status(), PersonStatus::Away);
        assert_eq!(peter.full_name(), "Peter");
    }

    #[test]
    fn apply_field_updates_status() {
        let peter = person(1, "peter");
        assert!(peter.apply_field("status", &json!("online")));
        assert_eq!(peter.status(), PersonStatus::Online);
        assert!(!peter.apply_field("flavour", &json!("salty")));
    }

    #[test]
    fn message_fifo_is_bounded() {
        let room = Room::uninitialized(vec![]);
        room.set_id(1);
        for id in 0..120u64 {
            room.push_message(message_in(&room, id, Author::Id(9), "x"));
        }
        let messages = room.messages();
        assert_eq!(messages.len(), MESSAGE_BUFFER);
        assert_eq!(messages.first().unwrap().id(), 70);
        assert_eq!(messages.last().unwrap().id(), 119);
    }

    #[test]
    fn mention_requires_word_boundaries() {
        let peter = person(1, "peter");
        let room = Room::uninitialized(vec![]);
        room.set_id(1);

        let hit = message_in(&room, 1, Author::Id(2), "hey @peter, lunch?");
        assert!(peter.is_mentioned(&hit));

        let substring = message_in(&room, 2, Author::Id(2), "ask @peterson instead");
        assert!(!peter.is_mentioned(&substring));

        let embedded = message_in(&room, 3, Author::Id(2), "mail me x@peter.example");
        assert!(!peter.is_mentioned(&embedded));

        let punctuation = message_in(&room, 4, Author::Id(2), "(@peter)");
        assert!(peter.is_mentioned(&punctuation));
    }

    #[test]
    fn own_messages_never_mention_their_author() {
        let peter = person(1, "peter");
        let room = Room::uninitialized(vec![]);
        room.set_id(1);
        let own = message_in(&room, 1, Author::Person(Arc::clone(&peter)), "note to @peter");
        assert!(!peter.is_mentioned(&own));
    }

    #[test]
    fn replace_people_reports_diff() {
        let a = person(1, "a");
        let b = person(2, "b");
        let c = person(3, "c");
        let room = Room::uninitialized(vec![Arc::clone(&a), Arc::clone(&b)]);

        let (added, removed) =
            room.replace_people(vec![Arc::clone(&a), Arc::clone(&c)]);
        assert_eq!(added.len(), 1);
        assert_eq!(added[0].id(), 3);
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].id(), 2);
    }

    #[test]
    fn pair_shell_links_back_to_the_other_person() {
        let me = person(1, "me");
        let peter = person(2, "peter");
        let room = Room::pair_shell(&me, &peter);

        assert!(!room.is_initialized());
        assert_eq!(room.kind(), RoomKind::Pair);
        assert!(Arc::ptr_eq(&peter.pair_room().unwrap(), &room));
    }

    #[test]
    fn redaction_round_trip() {
        let room = Room::uninitialized(vec![]);
        room.set_id(1);
        let msg = message_in(&room, 7, Author::Id(2), "soon gone");
        msg.set_status(MessageStatus::Redacted);
        assert_eq!(msg.status(), MessageStatus::Redacted);
        msg.set_status(MessageStatus::Active);
        assert_eq!(msg.status(), MessageStatus::Active);
    }
}
