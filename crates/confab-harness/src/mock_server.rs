//! In-process mock chat server.
//!
//! One axum app serves both the REST surface and the `/ws` frame endpoint.
//! Tests drive it explicitly: seed fixtures, let the client connect, push
//! frames, and inspect what the client sent.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::header::{COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use confab_proto::{name, Frame};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::fixtures;

type SharedState = Arc<MockState>;

/// Behavior switches and fixtures, set before spawning.
pub struct MockServerBuilder {
    swallow_pings: bool,
    fail_auth: Option<Value>,
    me: Value,
    people: Vec<Value>,
    rooms: Vec<Value>,
}

impl Default for MockServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MockServerBuilder {
    /// Builder with the default account fixture (user id 1, handle `me`).
    #[must_use]
    pub fn new() -> Self {
        Self {
            swallow_pings: false,
            fail_auth: None,
            me: fixtures::account(fixtures::person(1, "me")),
            people: Vec::new(),
            rooms: Vec::new(),
        }
    }

    /// Never answer `ping` requests (liveness-break scenarios).
    #[must_use]
    pub fn swallow_pings(mut self) -> Self {
        self.swallow_pings = true;
        self
    }

    /// Answer the handshake with `authentication.error` carrying `contents`.
    #[must_use]
    pub fn fail_auth(mut self, contents: Value) -> Self {
        self.fail_auth = Some(contents);
        self
    }

    /// Replace the account fixture.
    #[must_use]
    pub fn me(mut self, account: Value) -> Self {
        self.me = account;
        self
    }

    /// Seed a person.
    #[must_use]
    pub fn person(mut self, person: Value) -> Self {
        self.people.push(person);
        self
    }

    /// Seed a room.
    #[must_use]
    pub fn room(mut self, room: Value) -> Self {
        self.rooms.push(room);
        self
    }

    /// Bind an ephemeral port and start serving.
    ///
    /// # Panics
    ///
    /// Panics when the listener cannot bind (test environment failure).
    pub async fn spawn(self) -> MockServer {
        let mut people = self.people;
        let me_user = self.me.get("user").cloned().unwrap_or_else(|| json!({"id": 1}));
        let me_id = me_user.get("id").and_then(Value::as_u64).unwrap_or(1);
        if !people.iter().any(|p| p.get("id").and_then(Value::as_u64) == Some(me_id)) {
            people.insert(0, me_user);
        }

        let (push_tx, _) = broadcast::channel(64);
        let state = Arc::new(MockState {
            swallow_pings: self.swallow_pings,
            fail_auth: self.fail_auth,
            me: self.me,
            me_user_id: me_id,
            people: Mutex::new(people),
            rooms: Mutex::new(self.rooms),
            room_messages: Mutex::new(HashMap::new()),
            user_settings: Mutex::new(Vec::new()),
            received: Mutex::new(Vec::new()),
            push_tx,
            next_message_id: AtomicU64::new(1000),
            next_room_id: AtomicU64::new(9000),
            token_counter: AtomicU64::new(0),
            ws_connections: AtomicUsize::new(0),
        });

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock server listener");
        let addr = listener.local_addr().expect("mock server local addr");

        let app = router(Arc::clone(&state));
        let server = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        MockServer { addr, state, server }
    }
}

struct MockState {
    swallow_pings: bool,
    fail_auth: Option<Value>,
    me: Value,
    me_user_id: u64,
    people: Mutex<Vec<Value>>,
    rooms: Mutex<Vec<Value>>,
    room_messages: Mutex<HashMap<u64, Vec<Value>>>,
    user_settings: Mutex<Vec<Value>>,
    received: Mutex<Vec<Frame>>,
    push_tx: broadcast::Sender<String>,
    next_message_id: AtomicU64,
    next_room_id: AtomicU64,
    token_counter: AtomicU64,
    ws_connections: AtomicUsize,
}

impl MockState {
    fn issue_token(&self) -> String {
        let n = self.token_counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("mock-token-{n}")
    }

    fn store_message(&self, room_id: u64, message: Value) {
        self.room_messages
            .lock()
            .expect("message lock poisoned")
            .entry(room_id)
            .or_default()
            .push(message);
    }

    /// Frames the server answers an inbound client frame with.
    fn replies_for(&self, frame: &Frame) -> Vec<Frame> {
        match frame.name.as_str() {
            name::AUTHENTICATION_RESPONSE => match &self.fail_auth {
                Some(contents) => {
                    vec![Frame::event(name::AUTHENTICATION_ERROR, contents.clone())]
                }
                None => vec![Frame::event(name::AUTHENTICATION_CONFIRMATION, json!({}))],
            },
            name::PING => {
                if self.swallow_pings {
                    debug!("swallowing ping");
                    Vec::new()
                } else {
                    vec![reply(name::PONG, json!({}), frame.nonce)]
                }
            }
            name::ROOM_MESSAGE_CREATED => {
                let room_id = frame.content_u64("roomId").unwrap_or_default();
                let body = frame.content_str("body").unwrap_or_default();
                let id = self.next_message_id.fetch_add(1, Ordering::Relaxed);
                let message = fixtures::message(id, room_id, self.me_user_id, body);
                self.store_message(room_id, message.clone());
                vec![reply(name::ROOM_MESSAGE_CREATED, message, frame.nonce)]
            }
            name::ROOM_TYPING => {
                let contents = json!({
                    "userId": self.me_user_id,
                    "roomId": frame.content_u64("roomId"),
                    "isTyping": frame.content("isTyping").cloned().unwrap_or(json!(false)),
                });
                vec![Frame::event(name::ROOM_TYPING, contents)]
            }
            name::ROOM_USER_ACTIVE => {
                let date = frame.content("date").cloned().unwrap_or(Value::Null);
                let contents = json!({
                    "roomId": frame.content_u64("roomId"),
                    "userId": self.me_user_id,
                    "date": date,
                    "activeAt": date,
                });
                vec![Frame::event(name::ROOM_USER_ACTIVE, contents)]
            }
            name::UNSEEN_COUNTS_REQUEST => {
                let contents = json!({
                    "important": {"rooms": 1},
                    "total": {"rooms": 2, "conversations": 5},
                });
                vec![reply(name::UNSEEN_COUNTS_UPDATED, contents, frame.nonce)]
            }
            _ => Vec::new(),
        }
    }
}

fn reply(name: &str, contents: Value, nonce: Option<u64>) -> Frame {
    let mut frame = Frame::event(name, contents);
    frame.nonce = nonce;
    frame
}

/// Handle to a running mock server. The server task stops on drop.
pub struct MockServer {
    addr: SocketAddr,
    state: SharedState,
    server: JoinHandle<()>,
}

impl MockServer {
    /// HTTP base URL.
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// WebSocket endpoint URL.
    #[must_use]
    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    /// Push a frame to every connected socket.
    pub fn push(&self, frame: &Frame) {
        let text = frame.encode().expect("fixture frame encodes");
        let _ = self.state.push_tx.send(text);
    }

    /// Push raw text (malformed-frame scenarios).
    pub fn push_raw(&self, text: &str) {
        let _ = self.state.push_tx.send(text.to_string());
    }

    /// Every frame the client sent over the socket, in arrival order.
    #[must_use]
    pub fn received(&self) -> Vec<Frame> {
        self.state.received.lock().expect("received lock poisoned").clone()
    }

    /// Frames the client sent with the given name.
    #[must_use]
    pub fn received_named(&self, name: &str) -> Vec<Frame> {
        self.received().into_iter().filter(|f| f.name == name).collect()
    }

    /// Number of sockets that ever connected.
    #[must_use]
    pub fn ws_connections(&self) -> usize {
        self.state.ws_connections.load(Ordering::Relaxed)
    }

    /// Seed a person after spawn.
    pub fn add_person(&self, person: Value) {
        self.state.people.lock().expect("people lock poisoned").push(person);
    }

    /// Seed a room after spawn.
    pub fn add_room(&self, room: Value) {
        self.state.rooms.lock().expect("rooms lock poisoned").push(room);
    }

    /// Seed a stored message after spawn.
    pub fn add_message(&self, room_id: u64, message: Value) {
        self.state.store_message(room_id, message);
    }

    /// Recorded user-settings writes (history clearing).
    #[must_use]
    pub fn user_settings(&self) -> Vec<Value> {
        self.state.user_settings.lock().expect("settings lock poisoned").clone()
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.server.abort();
    }
}

fn router(state: SharedState) -> Router {
    Router::new()
        .route("/launchpad/v1/login.json", post(login))
        .route("/launchpad/v1/logout.json", delete(logout))
        .route("/chat/me.json", get(me))
        .route("/chat/v3/people.json", get(people))
        .route("/chat/people/:file", get(person).put(update_person))
        .route("/chat/v2/rooms.json", post(create_room))
        .route("/chat/v2/rooms/:file", get(room))
        .route("/chat/v2/rooms/:id/messages.json", get(room_messages))
        .route("/chat/rooms/:file", delete(delete_room))
        .route(
            "/chat/rooms/:id/messages.json",
            post(post_message).delete(delete_messages).put(put_messages),
        )
        .route("/chat/v3/conversations.json", get(conversations))
        .route("/chat/v2/conversations/:file", put(update_conversation))
        .route("/chat/v2/conversations/:id/user-settings.json", put(user_settings))
        .route("/chat/v2/messages.json", get(user_messages))
        .route("/people/:id/impersonate.json", put(impersonate))
        .route("/people/impersonate/revert.json", put(revert_impersonation))
        .route("/ws", get(ws_upgrade))
        .with_state(state)
}

fn parse_json_id(segment: &str) -> Option<u64> {
    segment.strip_suffix(".json")?.parse().ok()
}

fn authed(headers: &HeaderMap) -> bool {
    headers
        .get(COOKIE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|cookies| cookies.contains("tw-auth="))
}

fn unauthorized() -> Response {
    (StatusCode::UNAUTHORIZED, Json(json!({"error": "no tw-auth cookie"}))).into_response()
}

fn not_found(what: &str) -> Response {
    (StatusCode::NOT_FOUND, Json(json!({"error": format!("{what} not found")}))).into_response()
}

async fn login(State(state): State<SharedState>, Json(body): Json<Value>) -> Response {
    if body.get("username").and_then(Value::as_str).is_none() {
        return (StatusCode::BAD_REQUEST, Json(json!({"error": "username required"})))
            .into_response();
    }
    let cookie = format!("tw-auth={}; Path=/", state.issue_token());
    ([(SET_COOKIE, cookie)], Json(json!({"STATUS": "OK"}))).into_response()
}

async fn logout(headers: HeaderMap) -> Response {
    if !authed(&headers) {
        return unauthorized();
    }
    Json(json!({"STATUS": "OK"})).into_response()
}

async fn me(State(state): State<SharedState>, headers: HeaderMap) -> Response {
    if !authed(&headers) {
        return unauthorized();
    }
    Json(json!({"account": state.me})).into_response()
}

async fn people(
    State(state): State<SharedState>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    if !authed(&headers) {
        return unauthorized();
    }
    let people = state.people.lock().expect("people lock poisoned").clone();
    let filtered: Vec<Value> = match params.get("filter[searchTerm]") {
        Some(term) => people
            .into_iter()
            .filter(|p| {
                p.get("handle")
                    .and_then(Value::as_str)
                    .is_some_and(|handle| handle.contains(term.as_str()))
            })
            .collect(),
        None => people,
    };
    let total = filtered.len();
    Json(json!({
        "people": filtered,
        "meta": {"page": {"offset": 0, "limit": total, "total": total}}
    }))
    .into_response()
}

async fn person(
    State(state): State<SharedState>,
    Path(file): Path<String>,
    headers: HeaderMap,
) -> Response {
    if !authed(&headers) {
        return unauthorized();
    }
    let Some(id) = parse_json_id(&file) else {
        return not_found("person");
    };
    let people = state.people.lock().expect("people lock poisoned");
    match people.iter().find(|p| p.get("id").and_then(Value::as_u64) == Some(id)) {
        Some(person) => Json(json!({"person": person})).into_response(),
        None => not_found("person"),
    }
}

async fn update_person(
    State(state): State<SharedState>,
    Path(file): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !authed(&headers) {
        return unauthorized();
    }
    let Some(id) = parse_json_id(&file) else {
        return not_found("person");
    };
    let mut people = state.people.lock().expect("people lock poisoned");
    let Some(person) =
        people.iter_mut().find(|p| p.get("id").and_then(Value::as_u64) == Some(id))
    else {
        return not_found("person");
    };
    if let (Some(target), Some(fields)) =
        (person.as_object_mut(), body.get("person").and_then(Value::as_object))
    {
        for (key, value) in fields {
            target.insert(key.clone(), value.clone());
        }
    }
    Json(json!({"person": person})).into_response()
}

async fn create_room(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !authed(&headers) {
        return unauthorized();
    }
    let handles: Vec<String> = body
        .pointer("/room/handles")
        .and_then(Value::as_array)
        .map(|values| {
            values.iter().filter_map(Value::as_str).map(str::to_string).collect()
        })
        .unwrap_or_default();
    let opener = body
        .pointer("/room/message/body")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let id = state.next_room_id.fetch_add(1, Ordering::Relaxed);
    let kind = if handles.len() == 1 { "pair" } else { "private" };

    let mut members = vec![state.me.get("user").cloned().unwrap_or_default()];
    {
        let people = state.people.lock().expect("people lock poisoned");
        for handle in &handles {
            if let Some(person) = people
                .iter()
                .find(|p| p.get("handle").and_then(Value::as_str) == Some(handle.as_str()))
            {
                members.push(person.clone());
            }
        }
    }

    let room = fixtures::room(id, kind, &members);
    state.rooms.lock().expect("rooms lock poisoned").push(room);
    if !opener.is_empty() {
        let message_id = state.next_message_id.fetch_add(1, Ordering::Relaxed);
        state.store_message(id, fixtures::message(message_id, id, state.me_user_id, &opener));
    }
    Json(json!({"room": {"id": id}})).into_response()
}

async fn room(
    State(state): State<SharedState>,
    Path(file): Path<String>,
    headers: HeaderMap,
) -> Response {
    if !authed(&headers) {
        return unauthorized();
    }
    let Some(id) = parse_json_id(&file) else {
        return not_found("room");
    };
    let rooms = state.rooms.lock().expect("rooms lock poisoned");
    match rooms.iter().find(|r| r.get("id").and_then(Value::as_u64) == Some(id)) {
        Some(room) => Json(json!({"room": room})).into_response(),
        None => not_found("room"),
    }
}

async fn delete_room(
    State(state): State<SharedState>,
    Path(file): Path<String>,
    headers: HeaderMap,
) -> Response {
    if !authed(&headers) {
        return unauthorized();
    }
    let Some(id) = parse_json_id(&file) else {
        return not_found("room");
    };
    let mut rooms = state.rooms.lock().expect("rooms lock poisoned");
    let before = rooms.len();
    rooms.retain(|r| r.get("id").and_then(Value::as_u64) != Some(id));
    if rooms.len() == before {
        return not_found("room");
    }
    StatusCode::NO_CONTENT.into_response()
}

async fn conversations(
    State(state): State<SharedState>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    if !authed(&headers) {
        return unauthorized();
    }
    let rooms = state.rooms.lock().expect("rooms lock poisoned").clone();
    let filtered: Vec<Value> = match params.get("filter[searchTerm]") {
        Some(term) => rooms
            .into_iter()
            .filter(|r| {
                r.get("title")
                    .and_then(Value::as_str)
                    .is_some_and(|title| title.contains(term.as_str()))
            })
            .collect(),
        None => rooms,
    };
    let total = filtered.len();
    Json(json!({
        "conversations": filtered,
        "meta": {"page": {"offset": 0, "limit": total, "total": total}}
    }))
    .into_response()
}

async fn update_conversation(
    State(state): State<SharedState>,
    Path(file): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !authed(&headers) {
        return unauthorized();
    }
    let Some(id) = parse_json_id(&file) else {
        return not_found("conversation");
    };
    let mut rooms = state.rooms.lock().expect("rooms lock poisoned");
    let Some(room) = rooms.iter_mut().find(|r| r.get("id").and_then(Value::as_u64) == Some(id))
    else {
        return not_found("conversation");
    };
    if let Some(title) = body.pointer("/conversation/title") {
        room["title"] = title.clone();
    }
    StatusCode::NO_CONTENT.into_response()
}

async fn user_settings(
    State(state): State<SharedState>,
    Path(id): Path<u64>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !authed(&headers) {
        return unauthorized();
    }
    state
        .user_settings
        .lock()
        .expect("settings lock poisoned")
        .push(json!({"roomId": id, "body": body}));
    StatusCode::NO_CONTENT.into_response()
}

async fn room_messages(
    State(state): State<SharedState>,
    Path(id): Path<u64>,
    headers: HeaderMap,
) -> Response {
    if !authed(&headers) {
        return unauthorized();
    }
    let messages = state
        .room_messages
        .lock()
        .expect("message lock poisoned")
        .get(&id)
        .cloned()
        .unwrap_or_default();
    Json(json!({"messages": messages})).into_response()
}

async fn post_message(
    State(state): State<SharedState>,
    Path(id): Path<u64>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !authed(&headers) {
        return unauthorized();
    }
    let text = body.pointer("/message/body").and_then(Value::as_str).unwrap_or_default();
    let message_id = state.next_message_id.fetch_add(1, Ordering::Relaxed);
    let message = fixtures::message(message_id, id, state.me_user_id, text);
    state.store_message(id, message.clone());
    Json(json!({"message": message})).into_response()
}

async fn delete_messages(
    State(state): State<SharedState>,
    Path(id): Path<u64>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !authed(&headers) {
        return unauthorized();
    }
    set_message_statuses(&state, id, body.get("ids"), "deleted");
    StatusCode::NO_CONTENT.into_response()
}

async fn put_messages(
    State(state): State<SharedState>,
    Path(id): Path<u64>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !authed(&headers) {
        return unauthorized();
    }
    if let Some(updates) = body.get("messages").and_then(Value::as_array) {
        let mut messages = state.room_messages.lock().expect("message lock poisoned");
        if let Some(stored) = messages.get_mut(&id) {
            for update in updates {
                let target = update.get("id").and_then(Value::as_u64);
                let status = update.get("status").cloned().unwrap_or(json!("active"));
                for message in stored.iter_mut() {
                    if message.get("id").and_then(Value::as_u64) == target {
                        message["status"] = status.clone();
                    }
                }
            }
        }
    }
    StatusCode::NO_CONTENT.into_response()
}

fn set_message_statuses(state: &MockState, room_id: u64, ids: Option<&Value>, status: &str) {
    let ids: Vec<u64> = ids
        .and_then(Value::as_array)
        .map(|ids| ids.iter().filter_map(Value::as_u64).collect())
        .unwrap_or_default();
    let mut messages = state.room_messages.lock().expect("message lock poisoned");
    if let Some(stored) = messages.get_mut(&room_id) {
        for message in stored.iter_mut() {
            if message.get("id").and_then(Value::as_u64).is_some_and(|id| ids.contains(&id)) {
                message["status"] = json!(status);
            }
        }
    }
}

async fn user_messages(State(state): State<SharedState>, headers: HeaderMap) -> Response {
    if !authed(&headers) {
        return unauthorized();
    }
    let mut all: Vec<Value> = state
        .room_messages
        .lock()
        .expect("message lock poisoned")
        .values()
        .flatten()
        .cloned()
        .collect();
    all.sort_by_key(|m| m.get("id").and_then(Value::as_u64).unwrap_or_default());
    Json(json!({"messages": all})).into_response()
}

async fn impersonate(
    State(state): State<SharedState>,
    Path(_id): Path<u64>,
    headers: HeaderMap,
) -> Response {
    if !authed(&headers) {
        return unauthorized();
    }
    let cookie = format!("tw-auth={}; Path=/", state.issue_token());
    ([(SET_COOKIE, cookie)], Json(json!({"STATUS": "OK"}))).into_response()
}

async fn revert_impersonation(State(state): State<SharedState>, headers: HeaderMap) -> Response {
    if !authed(&headers) {
        return unauthorized();
    }
    let cookie = format!("tw-auth={}; Path=/", state.issue_token());
    ([(SET_COOKIE, cookie)], Json(json!({"STATUS": "OK"}))).into_response()
}

async fn ws_upgrade(
    State(state): State<SharedState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    if !authed(&headers) {
        return unauthorized();
    }
    ws.on_upgrade(move |socket| run_ws(socket, state))
}

async fn run_ws(socket: WebSocket, state: SharedState) {
    state.ws_connections.fetch_add(1, Ordering::Relaxed);
    let (mut sender, mut receiver) = socket.split();
    let mut pushes = state.push_tx.subscribe();

    let request = Frame::event(name::AUTHENTICATION_REQUEST, json!({}));
    if send_frame(&mut sender, &request).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            inbound = receiver.next() => {
                let Some(Ok(message)) = inbound else { break };
                let WsMessage::Text(text) = message else { continue };
                let Ok(frame) = Frame::decode(&text) else {
                    debug!("mock server ignoring malformed client frame");
                    continue;
                };
                state
                    .received
                    .lock()
                    .expect("received lock poisoned")
                    .push(frame.clone());
                for reply in state.replies_for(&frame) {
                    if send_frame(&mut sender, &reply).await.is_err() {
                        return;
                    }
                }
            }
            pushed = pushes.recv() => match pushed {
                Ok(text) => {
                    if sender.send(WsMessage::Text(text)).await.is_err() {
                        return;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}

async fn send_frame(
    sender: &mut (impl SinkExt<WsMessage> + Unpin),
    frame: &Frame,
) -> Result<(), ()> {
    let text = frame.encode().map_err(|_| ())?;
    sender.send(WsMessage::Text(text)).await.map_err(|_| ())
}
