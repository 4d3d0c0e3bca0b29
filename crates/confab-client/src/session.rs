//! Session orchestrator.
//!
//! The `Session` ties everything together: it owns the wire client, the
//! entity cache, and the event bus; runs the frame router; holds the current
//! user; and drives the reconnect loop with catch-up.
//!
//! A `Session` is a cheap-clone handle (`Arc` inside); background tasks hold
//! clones of it. Lifecycle: [`Session::connect`] establishes everything,
//! [`Session::close`] is idempotent and disables reconnection,
//! [`Session::logout`] additionally destroys the server-side session.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use confab_proto::Frame;
use serde_json::json;
use tokio::sync::broadcast;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use crate::cache::{FetchRoomReason, PersonChange, Roster, Route, SavedRoom};
use crate::dto::{AccountDto, MessageDto, UnseenCounts};
use crate::error::{ClientError, CloseReason};
use crate::event::{EventBus, SessionEvent};
use crate::http::HttpTransport;
use crate::installation::SessionConfig;
use crate::model::{Message, MessageStatus, Person, Room, RoomKind};
use crate::socket::{HandshakeIdentity, SocketSession, SocketState};
use crate::wire::{PeopleQuery, RoomQuery, WireClient};

/// Constant back-off between reconnect attempts.
pub const RECONNECT_INTERVAL: Duration = Duration::from_secs(3);

/// Page size used when walking full listings.
const DIRECTORY_PAGE: u64 = 250;

/// Connection statistics.
#[derive(Debug, Clone, Default)]
pub struct Monitor {
    /// When the first connection succeeded.
    pub initial_connection_at: Option<Instant>,
    /// When the connection last broke.
    pub last_disconnect_at: Option<Instant>,
    /// Cumulative time spent disconnected.
    pub downtime: Duration,
    /// Number of breaks observed.
    pub disconnects: u64,
    /// Number of successful reconnects.
    pub reconnects: u64,
}

/// The logged-in identity: the cached person plus account material.
///
/// Composition, not inheritance: the profile is the same shared [`Person`]
/// the cache hands out everywhere else.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    /// The current user's person object.
    pub person: Arc<Person>,
    /// Account id.
    pub account_id: u64,
    /// Socket handshake auth key.
    pub auth_key: String,
    /// Installation id.
    pub installation_id: u64,
}

#[derive(Debug, Default)]
struct MonitorState {
    monitor: Monitor,
    last_disconnect_wall: Option<DateTime<Utc>>,
}

struct Inner {
    config: SessionConfig,
    wire: WireClient,
    events: EventBus,
    roster: RwLock<Option<Arc<Roster>>>,
    current_user: RwLock<Option<CurrentUser>>,
    monitor: Mutex<MonitorState>,
    force_closed: AtomicBool,
    tasks: Mutex<Vec<AbortHandle>>,
    /// Uninitialized multi-person rooms handed out by `room_for_handles`,
    /// kept alive until their first message realizes them server-side.
    pending_rooms: Mutex<Vec<Arc<Room>>>,
}

/// A live chat session. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

impl Session {
    /// Build a session from configuration. Nothing connects until
    /// [`Session::connect`].
    #[must_use]
    pub fn new(config: SessionConfig) -> Self {
        let http = HttpTransport::new(config.installation.clone());
        Self {
            inner: Arc::new(Inner {
                wire: WireClient::new(http),
                config,
                events: EventBus::new(),
                roster: RwLock::new(None),
                current_user: RwLock::new(None),
                monitor: Mutex::new(MonitorState::default()),
                force_closed: AtomicBool::new(false),
                tasks: Mutex::new(Vec::new()),
                pending_rooms: Mutex::new(Vec::new()),
            }),
        }
    }

    /// The wire client, for callers that need raw RPC access.
    #[must_use]
    pub fn wire(&self) -> &WireClient {
        &self.inner.wire
    }

    /// Subscribe to every session event (the `*` stream).
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Connection statistics snapshot.
    #[must_use]
    pub fn monitor(&self) -> Monitor {
        self.inner.monitor.lock().expect("monitor lock poisoned").monitor.clone()
    }

    /// The logged-in identity, once connected.
    #[must_use]
    pub fn current_user(&self) -> Option<CurrentUser> {
        self.inner.current_user.read().expect("user lock poisoned").clone()
    }

    /// True while an authenticated socket is attached.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner
            .wire
            .socket()
            .map(|socket| socket.state() == SocketState::Connected)
            .unwrap_or(false)
    }

    fn roster(&self) -> Result<Arc<Roster>, ClientError> {
        self.inner
            .roster
            .read()
            .expect("roster lock poisoned")
            .clone()
            .ok_or(ClientError::NotConnected)
    }

    // ---- lifecycle ------------------------------------------------------

    /// Log in, open the socket, run the handshake, and load the directory.
    ///
    /// # Errors
    ///
    /// Login/transport failures and handshake rejections. Once this returns
    /// `Ok`, liveness failures are reported via `disconnect`/`reconnect`
    /// events rather than errors.
    pub async fn connect(&self) -> Result<(), ClientError> {
        self.inner.force_closed.store(false, Ordering::SeqCst);
        self.establish().await
    }

    async fn establish(&self) -> Result<(), ClientError> {
        let wire = &self.inner.wire;

        if wire.http().token().is_none() {
            wire.login(&self.inner.config.credentials).await?;
        }
        let account = wire.get_me().await?;
        let roster = self.ensure_roster(&account);

        *self.inner.current_user.write().expect("user lock poisoned") = Some(CurrentUser {
            person: roster.current_user(),
            account_id: account.id,
            auth_key: account.authkey.clone(),
            installation_id: account.installation_id,
        });

        let token = wire.http().token().ok_or(ClientError::NotConnected)?;
        let identity = HandshakeIdentity {
            auth_key: account.authkey.clone(),
            user_id: account.user.id,
            installation_domain: self.inner.config.installation.domain(),
            installation_id: account.installation_id,
            client_version: env!("CARGO_PKG_VERSION").to_string(),
        };
        let socket_url = self.inner.config.installation.socket_url();
        let socket =
            SocketSession::connect(&socket_url, &token, &identity, self.inner.config.socket)
                .await?;
        wire.set_socket(Some(Arc::clone(&socket)));

        self.spawn_router(&socket);
        self.spawn_error_forwarder(&socket);
        self.spawn_close_watcher(&socket);

        if let Err(e) = self.load_directory().await {
            warn!(error = %e, "initial directory load failed");
        }

        {
            let mut state = self.inner.monitor.lock().expect("monitor lock poisoned");
            if state.monitor.initial_connection_at.is_none() {
                state.monitor.initial_connection_at = Some(Instant::now());
            }
        }
        self.inner.events.emit(SessionEvent::Connected);
        Ok(())
    }

    fn ensure_roster(&self, account: &AccountDto) -> Arc<Roster> {
        let mut slot = self.inner.roster.write().expect("roster lock poisoned");
        match slot.as_ref() {
            Some(roster) => {
                roster.save_person(&account.user);
                Arc::clone(roster)
            }
            None => {
                let roster = Arc::new(Roster::new(&account.user));
                *slot = Some(Arc::clone(&roster));
                roster
            }
        }
    }

    async fn load_directory(&self) -> Result<(), ClientError> {
        let roster = self.roster()?;

        let people = self
            .inner
            .wire
            .get_people(&PeopleQuery::default(), None, Some(DIRECTORY_PAGE))
            .await?;
        for dto in &people.items {
            roster.save_person(dto);
        }

        let filter = RoomQuery { include_users: true, ..RoomQuery::default() };
        let rooms = self.inner.wire.get_rooms(&filter, None, Some(DIRECTORY_PAGE)).await?;
        for dto in &rooms.items {
            roster.save_room(dto);
        }
        Ok(())
    }

    /// Close the session. Idempotent; disables the reconnect loop.
    pub async fn close(&self) {
        if self.inner.force_closed.swap(true, Ordering::SeqCst) {
            return;
        }
        for handle in self.inner.tasks.lock().expect("task lock poisoned").drain(..) {
            handle.abort();
        }
        if let Ok(socket) = self.inner.wire.socket() {
            socket.close(CloseReason::local("session closed by caller"));
            self.inner.events.emit(SessionEvent::Disconnect);
        }
        self.inner.wire.set_socket(None);
    }

    /// Close the session and destroy the server-side login.
    ///
    /// # Errors
    ///
    /// HTTP failures from the logout call; the session is closed regardless.
    pub async fn logout(&self) -> Result<(), ClientError> {
        self.close().await;
        self.inner.wire.logout().await
    }

    // ---- background tasks ----------------------------------------------

    fn spawn_task(&self, handle: AbortHandle) {
        self.inner.tasks.lock().expect("task lock poisoned").push(handle);
    }

    fn spawn_router(&self, socket: &Arc<SocketSession>) {
        let mut frames = socket.frames();
        let session = self.clone();
        let handle = tokio::spawn(async move {
            loop {
                match frames.recv().await {
                    Ok(frame) => session.handle_frame(frame).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "frame router lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        self.spawn_task(handle.abort_handle());
    }

    fn spawn_error_forwarder(&self, socket: &Arc<SocketSession>) {
        let mut errors = socket.protocol_errors();
        let session = self.clone();
        let handle = tokio::spawn(async move {
            loop {
                match errors.recv().await {
                    Ok(message) => session.inner.events.emit(SessionEvent::Error { message }),
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        self.spawn_task(handle.abort_handle());
    }

    fn spawn_close_watcher(&self, socket: &Arc<SocketSession>) {
        let mut closed = socket.closed();
        let session = self.clone();
        let handle = tokio::spawn(async move {
            loop {
                if closed.borrow().is_some() {
                    break;
                }
                if closed.changed().await.is_err() {
                    break;
                }
            }
            session.on_disconnect().await;
        });
        self.spawn_task(handle.abort_handle());
    }

    async fn on_disconnect(&self) {
        {
            let mut state = self.inner.monitor.lock().expect("monitor lock poisoned");
            state.monitor.disconnects += 1;
            state.monitor.last_disconnect_at = Some(Instant::now());
            state.last_disconnect_wall = Some(Utc::now());
        }
        self.inner.wire.set_socket(None);
        self.inner.events.emit(SessionEvent::Disconnect);

        while !self.inner.force_closed.load(Ordering::SeqCst) {
            tokio::time::sleep(self.inner.config.reconnect_interval).await;
            if self.inner.force_closed.load(Ordering::SeqCst) {
                return;
            }
            match self.establish().await {
                Ok(()) => {
                    self.catch_up().await;
                    return;
                }
                Err(e) => warn!(error = %e, "reconnect attempt failed"),
            }
        }
    }

    async fn catch_up(&self) {
        let (since, downtime) = {
            let mut state = self.inner.monitor.lock().expect("monitor lock poisoned");
            let downtime = state
                .monitor
                .last_disconnect_at
                .map(|at| at.elapsed())
                .unwrap_or_default();
            state.monitor.downtime += downtime;
            state.monitor.reconnects += 1;
            (state.last_disconnect_wall, downtime)
        };

        let (people, rooms, messages) = self.fetch_updates(since).await;
        self.inner.events.emit(SessionEvent::Reconnect { people, rooms, messages, downtime });
    }

    /// Run the three catch-up queries and apply the results to the cache.
    /// Partial failures are logged; whatever succeeded is returned.
    async fn fetch_updates(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> (Vec<Arc<Person>>, Vec<Arc<Room>>, Vec<Arc<Message>>) {
        let Ok(roster) = self.roster() else {
            return (Vec::new(), Vec::new(), Vec::new());
        };

        let mut people = Vec::new();
        let filter = PeopleQuery { updated_after: since, ..PeopleQuery::default() };
        match self.inner.wire.get_people(&filter, None, None).await {
            Ok(page) => people.extend(page.items.iter().map(|dto| roster.save_person(dto).0)),
            Err(e) => warn!(error = %e, "catch-up people query failed"),
        }

        let mut rooms = Vec::new();
        let filter = RoomQuery { since, include_users: true, ..RoomQuery::default() };
        match self.inner.wire.get_rooms(&filter, None, None).await {
            Ok(page) => rooms.extend(page.items.iter().map(|dto| roster.save_room(dto).room)),
            Err(e) => warn!(error = %e, "catch-up rooms query failed"),
        }

        let mut messages = Vec::new();
        match self.inner.wire.get_user_messages(since, None, None).await {
            Ok(dtos) => {
                for dto in &dtos {
                    if let Some(room) = dto.room_id.and_then(|id| roster.room(id)) {
                        messages.push(roster.ingest_message(&room, dto));
                    }
                }
            }
            Err(e) => warn!(error = %e, "catch-up messages query failed"),
        }

        (people, rooms, messages)
    }

    /// Fetch everything changed since `since` and apply it to the cache.
    ///
    /// # Errors
    ///
    /// [`ClientError::NotConnected`] before the first connect.
    pub async fn get_updates(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<(Vec<Arc<Person>>, Vec<Arc<Room>>, Vec<Arc<Message>>), ClientError> {
        self.roster()?;
        Ok(self.fetch_updates(since).await)
    }

    // ---- frame routing --------------------------------------------------

    async fn handle_frame(&self, frame: Frame) {
        let Ok(roster) = self.roster() else { return };
        match roster.route(&frame) {
            Route::Events(events) => self.inner.events.emit_all(events),
            Route::FetchRoom { id, then } => self.fetch_room_and_finish(&roster, id, then).await,
            Route::FetchPerson { id, change } => {
                self.fetch_person_and_finish(&roster, id, change).await;
            }
            Route::Ignored => {}
        }
    }

    async fn fetch_room_and_finish(&self, roster: &Roster, id: u64, then: FetchRoomReason) {
        let dto = match self.inner.wire.get_room(id, true).await {
            Ok(dto) => dto,
            Err(e) => {
                warn!(error = %e, room = id, "failed to fetch room referenced by a frame");
                self.inner
                    .events
                    .emit(SessionEvent::Error { message: format!("room {id} fetch failed: {e}") });
                return;
            }
        };

        let SavedRoom { room, created, added, removed } = roster.save_room(&dto);
        if created {
            self.inner.events.emit(SessionEvent::RoomNew(Arc::clone(&room)));
        }
        match then {
            FetchRoomReason::Refresh => {
                if !created {
                    self.inner.events.emit(SessionEvent::RoomUpdated(Arc::clone(&room)));
                }
                for person in added {
                    self.inner
                        .events
                        .emit(SessionEvent::RoomPersonAdded { room: Arc::clone(&room), person });
                }
                for person in removed {
                    self.inner
                        .events
                        .emit(SessionEvent::RoomPersonRemoved { room: Arc::clone(&room), person });
                }
            }
            FetchRoomReason::Deliver(frame) => {
                // One retry with the room realized; anything still missing
                // is dropped rather than looping.
                if let Route::Events(events) = roster.route(&frame) {
                    self.inner.events.emit_all(events);
                } else {
                    debug!(name = %frame.name, "frame undeliverable after room fetch");
                }
            }
        }
    }

    async fn fetch_person_and_finish(&self, roster: &Roster, id: u64, change: PersonChange) {
        let dto = match self.inner.wire.get_person(id).await {
            Ok(dto) => dto,
            Err(e) => {
                warn!(error = %e, person = id, "failed to fetch person referenced by a frame");
                self.inner
                    .events
                    .emit(SessionEvent::Error { message: format!("person {id} fetch failed: {e}") });
                return;
            }
        };

        let (person, _) = roster.save_person(&dto);
        let event = match change {
            PersonChange::Added => SessionEvent::PersonCreated(person),
            PersonChange::Updated => {
                if person.id() == roster.current_user_id() {
                    SessionEvent::UserUpdate(person)
                } else {
                    SessionEvent::PersonUpdated(person)
                }
            }
        };
        self.inner.events.emit(event);
    }

    // ---- lookups --------------------------------------------------------

    /// Person by id: cache first, then REST.
    ///
    /// # Errors
    ///
    /// [`ClientError::NotFound`] and transport failures.
    pub async fn get_person(&self, id: u64) -> Result<Arc<Person>, ClientError> {
        let roster = self.roster()?;
        if let Some(person) = roster.person(id) {
            return Ok(person);
        }
        let dto = self.inner.wire.get_person(id).await?;
        Ok(roster.save_person(&dto).0)
    }

    /// Person by handle: cache first, then a server search with exact match.
    ///
    /// # Errors
    ///
    /// [`ClientError::NotFound`] and transport failures.
    pub async fn get_person_by_handle(&self, handle: &str) -> Result<Arc<Person>, ClientError> {
        let roster = self.roster()?;
        if let Some(person) = roster.person_by_handle(handle) {
            return Ok(person);
        }
        let dto = self.inner.wire.get_person_by_handle(handle).await?;
        Ok(roster.save_person(&dto).0)
    }

    /// Paginated people listing, applied to the cache.
    ///
    /// # Errors
    ///
    /// Transport failures.
    pub async fn get_people(
        &self,
        filter: &PeopleQuery,
        offset: Option<u64>,
        limit: Option<u64>,
    ) -> Result<Vec<Arc<Person>>, ClientError> {
        let roster = self.roster()?;
        let page = self.inner.wire.get_people(filter, offset, limit).await?;
        Ok(page.items.iter().map(|dto| roster.save_person(dto).0).collect())
    }

    /// Every person on the installation, walking all pages.
    ///
    /// # Errors
    ///
    /// Transport failures.
    pub async fn get_all_people(&self) -> Result<Vec<Arc<Person>>, ClientError> {
        let roster = self.roster()?;
        let mut offset = 0;
        loop {
            let page = self
                .inner
                .wire
                .get_people(&PeopleQuery::default(), Some(offset), Some(DIRECTORY_PAGE))
                .await?;
            let fetched = page.items.len() as u64;
            for dto in &page.items {
                roster.save_person(dto);
            }
            if fetched < DIRECTORY_PAGE || page.page.total <= offset + fetched {
                break;
            }
            offset += fetched;
        }
        Ok(roster.people())
    }

    /// Room by id: cache first, then REST.
    ///
    /// # Errors
    ///
    /// [`ClientError::NotFound`] and transport failures.
    pub async fn get_room(&self, id: u64) -> Result<Arc<Room>, ClientError> {
        let roster = self.roster()?;
        if let Some(room) = roster.room(id) {
            return Ok(room);
        }
        let dto = self.inner.wire.get_room(id, true).await?;
        Ok(roster.save_room(&dto).room)
    }

    /// Room by exact title: cache first, then a server search.
    ///
    /// # Errors
    ///
    /// [`ClientError::NotFound`] and transport failures.
    pub async fn get_room_by_title(&self, title: &str) -> Result<Arc<Room>, ClientError> {
        let roster = self.roster()?;
        if let Some(room) = roster.room_by_title(title) {
            return Ok(room);
        }
        let filter = RoomQuery {
            search: Some(title.to_string()),
            include_users: true,
            ..RoomQuery::default()
        };
        let page = self.inner.wire.get_rooms(&filter, None, None).await?;
        for dto in &page.items {
            roster.save_room(dto);
        }
        roster.room_by_title(title).ok_or_else(|| ClientError::not_found("room", title))
    }

    /// Paginated room listing, applied to the cache.
    ///
    /// # Errors
    ///
    /// Transport failures.
    pub async fn get_rooms(
        &self,
        filter: &RoomQuery,
        offset: Option<u64>,
        limit: Option<u64>,
    ) -> Result<Vec<Arc<Room>>, ClientError> {
        let roster = self.roster()?;
        let page = self.inner.wire.get_rooms(filter, offset, limit).await?;
        Ok(page.items.iter().map(|dto| roster.save_room(dto).room).collect())
    }

    /// Every room, walking all pages.
    ///
    /// # Errors
    ///
    /// Transport failures.
    pub async fn get_all_rooms(&self) -> Result<Vec<Arc<Room>>, ClientError> {
        let roster = self.roster()?;
        let filter = RoomQuery { include_users: true, ..RoomQuery::default() };
        let mut offset = 0;
        loop {
            let page =
                self.inner.wire.get_rooms(&filter, Some(offset), Some(DIRECTORY_PAGE)).await?;
            let fetched = page.items.len() as u64;
            for dto in &page.items {
                roster.save_room(dto);
            }
            if fetched < DIRECTORY_PAGE || page.page.total <= offset + fetched {
                break;
            }
            offset += fetched;
        }
        Ok(roster.rooms())
    }

    /// Resolve the room for a set of handles.
    ///
    /// A single other person resolves to their pair room. Otherwise a cached
    /// room whose participants are a superset of the handles wins. Failing
    /// both, an uninitialized room is built locally; its first message
    /// creates it server-side.
    ///
    /// # Errors
    ///
    /// [`ClientError::SelfMessage`] when the handles resolve to nobody but
    /// the current user; lookup and transport failures.
    pub async fn get_room_for_handles(&self, handles: &[&str]) -> Result<Arc<Room>, ClientError> {
        let roster = self.roster()?;
        let self_handle = roster.current_user().handle();

        let mut others: Vec<Arc<Person>> = Vec::new();
        for handle in handles {
            if *handle == self_handle {
                continue;
            }
            let person = self.get_person_by_handle(handle).await?;
            if others.iter().all(|p| p.id() != person.id()) {
                others.push(person);
            }
        }

        if others.is_empty() {
            return Err(ClientError::SelfMessage);
        }
        if others.len() == 1 {
            return Ok(roster.pair_room_for(&others[0]));
        }

        let wanted: Vec<String> = others.iter().map(|p| p.handle()).collect();
        if let Some(room) = roster.room_for_handles(&wanted) {
            return Ok(room);
        }

        let mut people = vec![roster.current_user()];
        people.extend(others);
        let room = Room::uninitialized(people);
        self.inner
            .pending_rooms
            .lock()
            .expect("pending lock poisoned")
            .push(Arc::clone(&room));
        Ok(room)
    }

    /// Create a room with the given handles. With a first message the room
    /// is created server-side immediately; without one it stays local until
    /// the first send.
    ///
    /// # Errors
    ///
    /// See [`Session::get_room_for_handles`] and transport failures.
    pub async fn create_room_with_handles(
        &self,
        handles: &[&str],
        first_message: Option<&str>,
    ) -> Result<Arc<Room>, ClientError> {
        match first_message {
            None => self.get_room_for_handles(handles).await,
            Some(message) => {
                let roster = self.roster()?;
                let handles: Vec<String> = handles.iter().map(|h| (*h).to_string()).collect();
                let id = self.inner.wire.create_room(&handles, message).await?;
                let dto = self.inner.wire.get_room(id, true).await?;
                Ok(roster.save_room(&dto).room)
            }
        }
    }

    // ---- room operations ------------------------------------------------

    /// Send a message to a room.
    ///
    /// On an initialized room this is the `room.message.created` socket RPC.
    /// On an uninitialized room, the room is first created server-side with
    /// this message as its opener, then realized in the cache; the
    /// acknowledged message is the last one fetched back.
    ///
    /// # Errors
    ///
    /// Socket/transport failures; [`ClientError::Payload`] when the server
    /// acknowledgement is malformed.
    pub async fn send_message(
        &self,
        room: &Arc<Room>,
        body: &str,
    ) -> Result<Arc<Message>, ClientError> {
        let roster = self.roster()?;

        if let Some(id) = room.id() {
            let dto = self.inner.wire.send_message(id, body).await?;
            return Ok(roster.ingest_message(room, &dto));
        }

        // First message on a locally-built room creates it server-side.
        let self_handle = roster.current_user().handle();
        let handles: Vec<String> = room
            .handles()
            .into_iter()
            .filter(|handle| *handle != self_handle && !handle.is_empty())
            .collect();
        if handles.is_empty() {
            return Err(ClientError::SelfMessage);
        }

        let id = self.inner.wire.create_room(&handles, body).await?;
        let dto = self.inner.wire.get_room(id, true).await?;
        roster.realize_room(room, &dto);
        self.inner
            .pending_rooms
            .lock()
            .expect("pending lock poisoned")
            .retain(|pending| !Arc::ptr_eq(pending, room));

        let messages = self.inner.wire.get_room_messages(id).await?;
        let mut last = None;
        for dto in &messages {
            last = Some(roster.ingest_message(room, dto));
        }
        last.ok_or_else(|| ClientError::Payload("created room came back without messages".into()))
    }

    /// Send a direct message to a person via their pair room.
    ///
    /// # Errors
    ///
    /// [`ClientError::SelfMessage`] for the current user; send failures.
    pub async fn send_message_to_person(
        &self,
        person: &Arc<Person>,
        body: &str,
    ) -> Result<Arc<Message>, ClientError> {
        let roster = self.roster()?;
        if person.id() == roster.current_user_id() {
            return Err(ClientError::SelfMessage);
        }
        let room = roster.pair_room_for(person);
        self.send_message(&room, body).await
    }

    /// Mark a room active (viewed).
    ///
    /// # Errors
    ///
    /// [`ClientError::UninitializedRoom`]; socket failures.
    pub async fn activate_room(&self, room: &Arc<Room>) -> Result<(), ClientError> {
        let id = room.id().ok_or(ClientError::UninitializedRoom { operation: "activate" })?;
        self.inner.wire.activate_room(id).await
    }

    /// Send a typing notification for a room.
    ///
    /// # Errors
    ///
    /// [`ClientError::UninitializedRoom`]; socket failures.
    pub async fn set_typing(&self, room: &Arc<Room>, is_typing: bool) -> Result<(), ClientError> {
        let id = room.id().ok_or(ClientError::UninitializedRoom { operation: "send typing to" })?;
        self.inner.wire.send_typing(id, is_typing).await
    }

    /// Rename a room.
    ///
    /// # Errors
    ///
    /// [`ClientError::UninitializedRoom`]; transport failures.
    pub async fn update_room_title(&self, room: &Arc<Room>, title: &str) -> Result<(), ClientError> {
        let id = room.id().ok_or(ClientError::UninitializedRoom { operation: "rename" })?;
        self.inner.wire.update_room_title(id, title).await
    }

    /// Delete a room server-side and drop it from the cache.
    ///
    /// # Errors
    ///
    /// [`ClientError::UninitializedRoom`]; transport failures.
    pub async fn delete_room(&self, room: &Arc<Room>) -> Result<(), ClientError> {
        let id = room.id().ok_or(ClientError::UninitializedRoom { operation: "delete" })?;
        self.inner.wire.delete_room(id).await?;
        let roster = self.roster()?;
        if let Some(removed) = roster.remove_room(id) {
            self.inner.events.emit(SessionEvent::RoomDeleted(removed));
        }
        Ok(())
    }

    /// Fetch a room's messages over REST and apply them to its FIFO.
    ///
    /// # Errors
    ///
    /// [`ClientError::UninitializedRoom`]; transport failures.
    pub async fn get_room_messages(
        &self,
        room: &Arc<Room>,
    ) -> Result<Vec<Arc<Message>>, ClientError> {
        let id = room.id().ok_or(ClientError::UninitializedRoom { operation: "read" })?;
        let roster = self.roster()?;
        let dtos = self.inner.wire.get_room_messages(id).await?;
        Ok(dtos.iter().map(|dto| roster.ingest_message(room, dto)).collect())
    }

    /// Clear the visible history of a pair room up to (and including) a
    /// message; defaults to the most recent one.
    ///
    /// # Errors
    ///
    /// [`ClientError::NotPairRoom`] for other room types;
    /// [`ClientError::UninitializedRoom`]; transport failures.
    pub async fn clear_room_history(
        &self,
        room: &Arc<Room>,
        before: Option<&Arc<Message>>,
    ) -> Result<(), ClientError> {
        let id = room.id().ok_or(ClientError::UninitializedRoom { operation: "clear" })?;
        if room.kind() != RoomKind::Pair {
            return Err(ClientError::NotPairRoom);
        }

        let marker = match before {
            Some(message) => message.id(),
            None => match room.last_message() {
                Some(message) => message.id(),
                None => {
                    let messages = self.inner.wire.get_room_messages(id).await?;
                    messages
                        .last()
                        .map(|dto| dto.id)
                        .ok_or_else(|| ClientError::Payload("room has no messages".into()))?
                }
            },
        };
        self.inner.wire.update_history_start(id, marker).await
    }

    /// Un-redact messages in a room.
    ///
    /// # Errors
    ///
    /// [`ClientError::UninitializedRoom`]; transport failures.
    pub async fn undelete_messages(
        &self,
        room: &Arc<Room>,
        ids: &[u64],
    ) -> Result<(), ClientError> {
        let id = room.id().ok_or(ClientError::UninitializedRoom { operation: "restore in" })?;
        self.inner.wire.undelete_messages(id, ids).await?;
        for message_id in ids {
            if let Some(message) = room.find_message(*message_id) {
                message.set_status(MessageStatus::Active);
            }
        }
        Ok(())
    }

    // ---- current-user operations ----------------------------------------

    /// Change the current user's handle.
    ///
    /// # Errors
    ///
    /// Transport failures.
    pub async fn update_handle(&self, handle: &str) -> Result<(), ClientError> {
        let roster = self.roster()?;
        let id = roster.current_user_id();
        self.inner.wire.update_person(id, json!({"handle": handle})).await?;
        roster.current_user().apply_field("handle", &json!(handle));
        Ok(())
    }

    /// Update presence status (`idle` or `active`).
    ///
    /// # Errors
    ///
    /// [`ClientError::InvalidStatus`]; socket failures.
    pub async fn update_status(&self, status: &str) -> Result<(), ClientError> {
        self.inner.wire.update_status(status).await
    }

    /// Query unseen counts.
    ///
    /// # Errors
    ///
    /// Socket failures.
    pub async fn get_unseen_count(&self) -> Result<UnseenCounts, ClientError> {
        self.inner.wire.unseen_counts().await
    }

    /// The current user's recent messages.
    ///
    /// # Errors
    ///
    /// Transport failures.
    pub async fn get_messages(
        &self,
        created_after: Option<DateTime<Utc>>,
    ) -> Result<Vec<MessageDto>, ClientError> {
        self.inner.wire.get_user_messages(created_after, None, None).await
    }

    /// Impersonate another person; the shared auth token rotates atomically.
    ///
    /// # Errors
    ///
    /// Transport failures.
    pub async fn impersonate(&self, person_id: u64) -> Result<(), ClientError> {
        self.inner.wire.impersonate(person_id).await
    }

    /// Revert an impersonation.
    ///
    /// # Errors
    ///
    /// Transport failures.
    pub async fn unimpersonate(&self) -> Result<(), ClientError> {
        self.inner.wire.unimpersonate().await
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("connected", &self.is_connected())
            .field("force_closed", &self.inner.force_closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::installation::{Credentials, Installation};

    fn session() -> Session {
        let installation = Installation::new("http://127.0.0.1:1").unwrap();
        Session::new(SessionConfig::new(installation, Credentials::Token("tok".into())))
    }

    #[tokio::test]
    async fn lookups_before_connect_are_not_connected() {
        let session = session();
        let err = session.get_person(1).await.unwrap_err();
        assert!(matches!(err, ClientError::NotConnected));
        assert!(!session.is_connected());
        assert!(session.current_user().is_none());
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let session = session();
        session.close().await;
        session.close().await;
        assert_eq!(session.monitor().disconnects, 0);
    }

    #[test]
    fn monitor_starts_empty() {
        let monitor = session().monitor();
        assert_eq!(monitor.disconnects, 0);
        assert_eq!(monitor.reconnects, 0);
        assert_eq!(monitor.downtime, Duration::ZERO);
        assert!(monitor.initial_connection_at.is_none());
    }
}
