//! Session events and fan-out.
//!
//! One typed event per semantic occurrence, fanned out on a single broadcast
//! channel. Subscribing to the channel is the wildcard `*` stream; selective
//! listeners filter on [`SessionEvent::kind`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::model::{Message, Person, Room};

/// Buffered events per subscriber before the slowest one starts lagging.
const EVENT_CAPACITY: usize = 256;

/// Events the session emits.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The socket handshake completed.
    Connected,

    /// The connection broke. Fires once per break.
    Disconnect,

    /// The connection was re-established and catch-up succeeded.
    Reconnect {
        /// People changed while disconnected.
        people: Vec<Arc<Person>>,
        /// Rooms changed while disconnected.
        rooms: Vec<Arc<Room>>,
        /// Messages created while disconnected.
        messages: Vec<Arc<Message>>,
        /// How long the connection was down.
        downtime: Duration,
    },

    /// A message arrived in a room (own messages included).
    Message {
        /// Containing room.
        room: Arc<Room>,
        /// The message.
        message: Arc<Message>,
    },

    /// A message arrived that the current user did not author.
    MessageReceived {
        /// Containing room.
        room: Arc<Room>,
        /// The message.
        message: Arc<Message>,
    },

    /// A message arrived in the current user's pair room with the author.
    MessageDirect {
        /// Containing room.
        room: Arc<Room>,
        /// The message.
        message: Arc<Message>,
    },

    /// A message mentions the current user by handle.
    MessageMention {
        /// Containing room.
        room: Arc<Room>,
        /// The message.
        message: Arc<Message>,
    },

    /// A person appeared on the installation.
    PersonCreated(Arc<Person>),
    /// A person's profile or presence changed.
    PersonUpdated(Arc<Person>),
    /// A person was removed from the installation.
    PersonDeleted(Arc<Person>),

    /// A previously-unknown room was realized in the cache.
    RoomNew(Arc<Room>),
    /// Room metadata changed.
    RoomUpdated(Arc<Room>),
    /// A room was deleted.
    RoomDeleted(Arc<Room>),
    /// Somebody started or stopped typing in a room.
    RoomTyping {
        /// The room.
        room: Arc<Room>,
        /// Who is typing.
        person: Arc<Person>,
        /// Started (`true`) or stopped.
        is_typing: bool,
    },
    /// A person joined a room.
    RoomPersonAdded {
        /// The room.
        room: Arc<Room>,
        /// Who joined.
        person: Arc<Person>,
    },
    /// A person left a room.
    RoomPersonRemoved {
        /// The room.
        room: Arc<Room>,
        /// Who left.
        person: Arc<Person>,
    },

    /// The current user's own profile changed.
    UserUpdate(Arc<Person>),

    /// A heartbeat response arrived.
    Pong,

    /// A non-fatal protocol problem (malformed frame, unexpected payload).
    Error {
        /// What went wrong.
        message: String,
    },
}

impl SessionEvent {
    /// Canonical event name, for selective listeners.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Disconnect => "disconnect",
            Self::Reconnect { .. } => "reconnect",
            Self::Message { .. } => "message",
            Self::MessageReceived { .. } => "message:received",
            Self::MessageDirect { .. } => "message:direct",
            Self::MessageMention { .. } => "message:mention",
            Self::PersonCreated(_) => "person:created",
            Self::PersonUpdated(_) => "person:updated",
            Self::PersonDeleted(_) => "person:deleted",
            Self::RoomNew(_) => "room:new",
            Self::RoomUpdated(_) => "room:updated",
            Self::RoomDeleted(_) => "room:deleted",
            Self::RoomTyping { .. } => "room:typing",
            Self::RoomPersonAdded { .. } => "room:person:added",
            Self::RoomPersonRemoved { .. } => "room:person:removed",
            Self::UserUpdate(_) => "user:update",
            Self::Pong => "pong",
            Self::Error { .. } => "error",
        }
    }
}

/// Broadcast fan-out for session events.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SessionEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// New bus with the default capacity.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    /// Subscribe to every event (the `*` stream).
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    /// Emit an event. Dropped silently when nobody listens.
    pub fn emit(&self, event: SessionEvent) {
        let _ = self.tx.send(event);
    }

    /// Emit every event of a batch, in order.
    pub fn emit_all(&self, events: Vec<SessionEvent>) {
        for event in events {
            self.emit(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_see_events_in_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.emit(SessionEvent::Connected);
        bus.emit(SessionEvent::Pong);

        assert_eq!(rx.recv().await.unwrap().kind(), "connected");
        assert_eq!(rx.recv().await.unwrap().kind(), "pong");
    }

    #[tokio::test]
    async fn emitting_without_subscribers_is_fine() {
        let bus = EventBus::new();
        bus.emit(SessionEvent::Disconnect);

        let mut rx = bus.subscribe();
        bus.emit(SessionEvent::Pong);
        assert_eq!(rx.recv().await.unwrap().kind(), "pong");
    }
}
