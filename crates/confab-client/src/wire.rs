//! Wire client: every domain-level RPC, built atop the two transports.
//!
//! REST operations go through [`HttpTransport`]; realtime operations go
//! through the current [`SocketSession`]. The wire client owns neither the
//! entity cache nor event fan-out: it talks payloads (`dto` types), and the
//! session orchestrator applies them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, SecondsFormat, Utc};
use confab_proto::{name, FrameFilter};
use reqwest::Method;
use serde_json::{json, Value};
use tracing::debug;

use crate::dto::{
    AccountDto, ConversationsEnvelope, MeEnvelope, MessageDto, MessagesEnvelope, Page,
    PeopleEnvelope, PersonDto, PersonEnvelope, RoomDto, RoomEnvelope, UnseenCounts,
};
use crate::error::{ClientError, HttpError};
use crate::http::{extract_auth_cookie, HttpTransport, Query};
use crate::installation::{Credentials, API_KEY_PASSWORD};
use crate::socket::SocketSession;

/// Filter for paginated people queries.
#[derive(Debug, Clone, Default)]
pub struct PeopleQuery {
    /// Only people updated after this instant.
    pub updated_after: Option<DateTime<Utc>>,
    /// Free-text search term.
    pub search_term: Option<String>,
}

/// Filter for paginated room queries.
#[derive(Debug, Clone, Default)]
pub struct RoomQuery {
    /// Only rooms with activity after this instant.
    pub since: Option<DateTime<Utc>>,
    /// Room status filter.
    pub status: Option<String>,
    /// Free-text search term.
    pub search: Option<String>,
    /// Ask the server to embed recent messages.
    pub include_messages: bool,
    /// Ask the server to embed participant profiles.
    pub include_users: bool,
    /// Sort key; defaults to `lastActivityAt`.
    pub sort: Option<String>,
}

/// Domain RPCs over HTTP + socket.
#[derive(Debug)]
pub struct WireClient {
    http: HttpTransport,
    socket: RwLock<Option<Arc<SocketSession>>>,
    current_user_id: AtomicU64,
}

impl WireClient {
    /// Build a wire client over an HTTP transport. No socket is attached
    /// until the orchestrator connects one.
    #[must_use]
    pub fn new(http: HttpTransport) -> Self {
        Self { http, socket: RwLock::new(None), current_user_id: AtomicU64::new(0) }
    }

    /// The underlying HTTP transport.
    #[must_use]
    pub fn http(&self) -> &HttpTransport {
        &self.http
    }

    /// Attach (or detach) the live socket session.
    pub fn set_socket(&self, socket: Option<Arc<SocketSession>>) {
        *self.socket.write().expect("socket lock poisoned") = socket;
    }

    /// The live socket session.
    ///
    /// # Errors
    ///
    /// [`ClientError::NotConnected`] when no socket is attached.
    pub fn socket(&self) -> Result<Arc<SocketSession>, ClientError> {
        self.socket
            .read()
            .expect("socket lock poisoned")
            .clone()
            .ok_or(ClientError::NotConnected)
    }

    /// Record the current user id, used by echo filters.
    pub fn set_current_user(&self, id: u64) {
        self.current_user_id.store(id, Ordering::Relaxed);
    }

    fn current_user_id(&self) -> u64 {
        self.current_user_id.load(Ordering::Relaxed)
    }

    // ---- authentication -------------------------------------------------

    /// Log in and store the `tw-auth` token. Returns the token.
    ///
    /// # Errors
    ///
    /// HTTP failures; [`HttpError::MissingAuthCookie`] when the server did
    /// not set a session cookie.
    pub async fn login(&self, credentials: &Credentials) -> Result<String, ClientError> {
        match credentials {
            Credentials::Login { username, password } => {
                self.login_request(username, password).await
            }
            Credentials::ApiKey(key) => self.login_request(key, API_KEY_PASSWORD).await,
            Credentials::Token(token) => {
                self.http.set_token(token.clone());
                Ok(token.clone())
            }
        }
    }

    async fn login_request(&self, username: &str, password: &str) -> Result<String, ClientError> {
        let path = "/launchpad/v1/login.json";
        let body = json!({"username": username, "password": password, "rememberMe": true});
        let response =
            self.http.request_raw(Method::POST, path, Query::new(), Some(body)).await?;

        let status = response.status();
        let url = response.url().to_string();
        if !status.is_success() {
            let body = response.text().await.ok().filter(|t| !t.is_empty());
            return Err(ClientError::Http(HttpError::Status {
                method: "POST".to_string(),
                url,
                status: status.as_u16(),
                status_text: status.canonical_reason().unwrap_or_default().to_string(),
                body,
            }));
        }

        let token = extract_auth_cookie(&response)
            .ok_or(HttpError::MissingAuthCookie { url })?;
        self.http.set_token(token.clone());
        Ok(token)
    }

    /// DELETE the launchpad session.
    ///
    /// # Errors
    ///
    /// HTTP failures.
    pub async fn logout(&self) -> Result<(), ClientError> {
        self.http
            .request(Method::DELETE, "/launchpad/v1/logout.json", Query::new(), None)
            .await?;
        Ok(())
    }

    /// Fetch the current account, including the socket auth key.
    ///
    /// # Errors
    ///
    /// HTTP failures; [`ClientError::Payload`] for an unexpected envelope.
    pub async fn get_me(&self) -> Result<AccountDto, ClientError> {
        let mut query = Query::new();
        query.push("includeAuth", true);
        let value = required(self.http.get("/chat/me.json", query).await?, "me")?;
        let envelope: MeEnvelope = parse(value, "me")?;
        self.set_current_user(envelope.account.user.id);
        Ok(envelope.account)
    }

    /// Rotate the session onto another person. Atomically replaces the
    /// shared `tw-auth` token; in-flight requests finish under the old one.
    ///
    /// # Errors
    ///
    /// HTTP failures; [`HttpError::MissingAuthCookie`] when no rotated
    /// cookie came back.
    pub async fn impersonate(&self, person_id: u64) -> Result<(), ClientError> {
        self.rotate_token(&format!("/people/{person_id}/impersonate.json")).await
    }

    /// Revert an impersonation.
    ///
    /// # Errors
    ///
    /// See [`WireClient::impersonate`].
    pub async fn unimpersonate(&self) -> Result<(), ClientError> {
        self.rotate_token("/people/impersonate/revert.json").await
    }

    async fn rotate_token(&self, path: &str) -> Result<(), ClientError> {
        let response = self.http.request_raw(Method::PUT, path, Query::new(), None).await?;
        let status = response.status();
        let url = response.url().to_string();
        if !status.is_success() {
            let body = response.text().await.ok().filter(|t| !t.is_empty());
            return Err(ClientError::Http(HttpError::Status {
                method: "PUT".to_string(),
                url,
                status: status.as_u16(),
                status_text: status.canonical_reason().unwrap_or_default().to_string(),
                body,
            }));
        }
        let token =
            extract_auth_cookie(&response).ok_or(HttpError::MissingAuthCookie { url })?;
        self.http.set_token(token);
        Ok(())
    }

    // ---- people ---------------------------------------------------------

    /// Fetch one person.
    ///
    /// # Errors
    ///
    /// HTTP failures; [`ClientError::Payload`] for an unexpected envelope.
    pub async fn get_person(&self, id: u64) -> Result<PersonDto, ClientError> {
        let value =
            required(self.http.get(&format!("/chat/people/{id}.json"), Query::new()).await?, "person")?;
        let envelope: PersonEnvelope = parse(value, "person")?;
        Ok(envelope.person)
    }

    /// Update fields of a person (`{person: {…}}` body).
    ///
    /// # Errors
    ///
    /// HTTP failures.
    pub async fn update_person(&self, id: u64, fields: Value) -> Result<(), ClientError> {
        self.http
            .request(
                Method::PUT,
                &format!("/chat/people/{id}.json"),
                Query::new(),
                Some(json!({ "person": fields })),
            )
            .await?;
        Ok(())
    }

    /// Paginated people listing.
    ///
    /// # Errors
    ///
    /// HTTP failures; [`ClientError::Payload`] for an unexpected envelope.
    pub async fn get_people(
        &self,
        filter: &PeopleQuery,
        offset: Option<u64>,
        limit: Option<u64>,
    ) -> Result<Page<PersonDto>, ClientError> {
        let mut query = Query::new();
        query.nested_opt("filter", "updatedAfter", filter.updated_after.map(format_instant));
        query.nested_opt("filter", "searchTerm", filter.search_term.clone());

        let value = required(
            self.http.request_list("/chat/v3/people.json", offset, limit, query).await?,
            "people",
        )?;
        let envelope: PeopleEnvelope = parse(value, "people")?;
        Ok(Page::new(envelope.people, envelope.meta))
    }

    /// Resolve a person by handle.
    ///
    /// The server has no direct endpoint for this: the client searches by
    /// term and matches the handle exactly in the result.
    ///
    /// # Errors
    ///
    /// [`ClientError::NotFound`] when no exact match exists; HTTP failures.
    pub async fn get_person_by_handle(&self, handle: &str) -> Result<PersonDto, ClientError> {
        let filter = PeopleQuery { search_term: Some(handle.to_string()), ..PeopleQuery::default() };
        let page = self.get_people(&filter, None, None).await?;
        page.items
            .into_iter()
            .find(|person| person.handle.as_deref() == Some(handle))
            .ok_or_else(|| ClientError::not_found("person", handle))
    }

    // ---- rooms ----------------------------------------------------------

    /// Fetch one room.
    ///
    /// # Errors
    ///
    /// HTTP failures; [`ClientError::Payload`] for an unexpected envelope.
    pub async fn get_room(&self, id: u64, include_user_data: bool) -> Result<RoomDto, ClientError> {
        let mut query = Query::new();
        query.push("includeUserData", include_user_data);
        let value = required(
            self.http.get(&format!("/chat/v2/rooms/{id}.json"), query).await?,
            "room",
        )?;
        let envelope: RoomEnvelope = parse(value, "room")?;
        Ok(envelope.room)
    }

    /// Paginated conversation listing.
    ///
    /// # Errors
    ///
    /// HTTP failures; [`ClientError::Payload`] for an unexpected envelope.
    pub async fn get_rooms(
        &self,
        filter: &RoomQuery,
        offset: Option<u64>,
        limit: Option<u64>,
    ) -> Result<Page<RoomDto>, ClientError> {
        let mut query = Query::new();
        query.nested_opt("filter", "activityAfter", filter.since.map(format_instant));
        query.nested_opt("filter", "status", filter.status.clone());
        query.nested_opt("filter", "searchTerm", filter.search.clone());
        query.push("sort", filter.sort.clone().unwrap_or_else(|| "lastActivityAt".to_string()));
        query.push("includeUserData", filter.include_users);
        query.push("includeMessageData", filter.include_messages);

        let value = required(
            self.http.request_list("/chat/v3/conversations.json", offset, limit, query).await?,
            "conversations",
        )?;
        let envelope: ConversationsEnvelope = parse(value, "conversations")?;
        Ok(Page::new(envelope.conversations, envelope.meta))
    }

    /// Create a room from handles with its first message. Returns the new
    /// room id.
    ///
    /// # Errors
    ///
    /// HTTP failures; [`ClientError::Payload`] when the response carries no
    /// room id.
    pub async fn create_room(&self, handles: &[String], message: &str) -> Result<u64, ClientError> {
        let body = json!({ "room": { "handles": handles, "message": { "body": message } } });
        let value = self
            .http
            .request(Method::POST, "/chat/v2/rooms.json", Query::new(), Some(body))
            .await?;

        value
            .as_ref()
            .and_then(|v| {
                v.pointer("/room/id").and_then(Value::as_u64).or_else(|| {
                    v.get("id").and_then(Value::as_u64)
                })
            })
            .ok_or_else(|| ClientError::Payload("room creation returned no id".to_string()))
    }

    /// Delete a room.
    ///
    /// # Errors
    ///
    /// HTTP failures.
    pub async fn delete_room(&self, id: u64) -> Result<(), ClientError> {
        self.http
            .request(Method::DELETE, &format!("/chat/rooms/{id}.json"), Query::new(), None)
            .await?;
        Ok(())
    }

    /// Rename a conversation.
    ///
    /// # Errors
    ///
    /// HTTP failures.
    pub async fn update_room_title(&self, id: u64, title: &str) -> Result<(), ClientError> {
        self.http
            .request(
                Method::PUT,
                &format!("/chat/v2/conversations/{id}.json"),
                Query::new(),
                Some(json!({ "conversation": { "title": title } })),
            )
            .await?;
        Ok(())
    }

    /// Persist the history-clearing marker for a pair room.
    ///
    /// # Errors
    ///
    /// HTTP failures.
    pub async fn update_history_start(
        &self,
        room_id: u64,
        message_id: u64,
    ) -> Result<(), ClientError> {
        self.http
            .request(
                Method::PUT,
                &format!("/chat/v2/conversations/{room_id}/user-settings.json"),
                Query::new(),
                Some(json!({ "userSettings": { "messageIdHistoryStartsAfter": message_id } })),
            )
            .await?;
        Ok(())
    }

    // ---- messages -------------------------------------------------------

    /// Fetch a room's messages.
    ///
    /// # Errors
    ///
    /// HTTP failures; [`ClientError::Payload`] for an unexpected envelope.
    pub async fn get_room_messages(&self, room_id: u64) -> Result<Vec<MessageDto>, ClientError> {
        let value = required(
            self.http.get(&format!("/chat/v2/rooms/{room_id}/messages.json"), Query::new()).await?,
            "messages",
        )?;
        let envelope: MessagesEnvelope = parse(value, "messages")?;
        Ok(envelope.messages)
    }

    /// Post a message over REST (the socket RPC is the primary path).
    ///
    /// # Errors
    ///
    /// HTTP failures.
    pub async fn post_room_message(&self, room_id: u64, body: &str) -> Result<(), ClientError> {
        self.http
            .request(
                Method::POST,
                &format!("/chat/rooms/{room_id}/messages.json"),
                Query::new(),
                Some(json!({ "message": { "body": body } })),
            )
            .await?;
        Ok(())
    }

    /// Delete messages by id.
    ///
    /// # Errors
    ///
    /// HTTP failures.
    pub async fn delete_messages(&self, room_id: u64, ids: &[u64]) -> Result<(), ClientError> {
        self.http
            .request(
                Method::DELETE,
                &format!("/chat/rooms/{room_id}/messages.json"),
                Query::new(),
                Some(json!({ "ids": ids })),
            )
            .await?;
        Ok(())
    }

    /// Undo message deletions.
    ///
    /// # Errors
    ///
    /// HTTP failures.
    pub async fn undelete_messages(&self, room_id: u64, ids: &[u64]) -> Result<(), ClientError> {
        let messages: Vec<Value> =
            ids.iter().map(|id| json!({"id": id, "status": "active"})).collect();
        self.http
            .request(
                Method::PUT,
                &format!("/chat/rooms/{room_id}/messages.json"),
                Query::new(),
                Some(json!({ "messages": messages })),
            )
            .await?;
        Ok(())
    }

    /// The current user's messages across rooms, newest window first.
    ///
    /// # Errors
    ///
    /// HTTP failures; [`ClientError::Payload`] for an unexpected envelope.
    pub async fn get_user_messages(
        &self,
        created_after: Option<DateTime<Utc>>,
        page: Option<u64>,
        page_size: Option<u64>,
    ) -> Result<Vec<MessageDto>, ClientError> {
        let mut query = Query::new();
        query.push_opt("createdAfter", created_after.map(format_instant));
        query.push_opt("page", page);
        query.push_opt("pageSize", page_size);

        let value =
            required(self.http.get("/chat/v2/messages.json", query).await?, "messages")?;
        let envelope: MessagesEnvelope = parse(value, "messages")?;
        Ok(envelope.messages)
    }

    // ---- socket RPCs ----------------------------------------------------

    /// Send a chat message; resolves to the server-assigned message.
    ///
    /// # Errors
    ///
    /// [`ClientError::NotConnected`] without a socket; socket timeouts and
    /// closure; [`ClientError::Payload`] for a malformed acknowledgement.
    pub async fn send_message(&self, room_id: u64, body: &str) -> Result<MessageDto, ClientError> {
        let socket = self.socket()?;
        let timeout = socket.config().await_timeout;
        let reply = socket
            .request(
                name::ROOM_MESSAGE_CREATED,
                json!({"roomId": room_id, "body": body}),
                timeout,
            )
            .await?;
        serde_json::from_value(reply.contents)
            .map_err(|e| ClientError::Payload(format!("bad message acknowledgement: {e}")))
    }

    /// Send a typing notification and await the server echo.
    ///
    /// # Errors
    ///
    /// [`ClientError::NotConnected`] without a socket; socket timeouts.
    pub async fn send_typing(&self, room_id: u64, is_typing: bool) -> Result<(), ClientError> {
        let socket = self.socket()?;
        let timeout = socket.config().await_timeout;
        let echo = FrameFilter::name(name::ROOM_TYPING).with_contents(json!({
            "userId": self.current_user_id(),
            "roomId": room_id,
            "isTyping": is_typing,
        }));
        socket
            .exchange(
                name::ROOM_TYPING,
                json!({"roomId": room_id, "isTyping": is_typing}),
                echo,
                timeout,
            )
            .await?;
        Ok(())
    }

    /// Mark a room active (viewed) and await the server echo.
    ///
    /// # Errors
    ///
    /// [`ClientError::NotConnected`] without a socket; socket timeouts.
    pub async fn activate_room(&self, room_id: u64) -> Result<(), ClientError> {
        let socket = self.socket()?;
        let timeout = socket.config().await_timeout;
        let date = format_instant(Utc::now());
        let echo = FrameFilter::name(name::ROOM_USER_ACTIVE)
            .with_contents(json!({"roomId": room_id, "activeAt": date}));
        socket
            .exchange(
                name::ROOM_USER_ACTIVE,
                json!({"roomId": room_id, "date": date}),
                echo,
                timeout,
            )
            .await?;
        Ok(())
    }

    /// Update the current user's presence status. Fire-and-forget: the
    /// server only replies when the status actually changed.
    ///
    /// # Errors
    ///
    /// [`ClientError::InvalidStatus`] unless `status` is `idle` or `active`;
    /// [`ClientError::NotConnected`] without a socket.
    pub async fn update_status(&self, status: &str) -> Result<(), ClientError> {
        if status != "idle" && status != "active" {
            return Err(ClientError::InvalidStatus { given: status.to_string() });
        }
        let socket = self.socket()?;
        socket.send_event(name::USER_MODIFIED_STATUS, json!({"status": status})).await?;
        debug!(status, "status update sent");
        Ok(())
    }

    /// Query unseen counts.
    ///
    /// # Errors
    ///
    /// [`ClientError::NotConnected`] without a socket; socket timeouts;
    /// [`ClientError::Payload`] for malformed counts.
    pub async fn unseen_counts(&self) -> Result<UnseenCounts, ClientError> {
        let socket = self.socket()?;
        let timeout = socket.config().await_timeout;
        let reply =
            socket.request(name::UNSEEN_COUNTS_REQUEST, json!({}), timeout).await?;
        serde_json::from_value(reply.contents)
            .map_err(|e| ClientError::Payload(format!("bad unseen counts: {e}")))
    }
}

/// Wire timestamp format: RFC 3339 with millisecond precision, UTC `Z`.
fn format_instant(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn required(value: Option<Value>, what: &str) -> Result<Value, ClientError> {
    value.ok_or_else(|| ClientError::Payload(format!("empty response for {what}")))
}

fn parse<T: serde::de::DeserializeOwned>(value: Value, what: &str) -> Result<T, ClientError> {
    serde_json::from_value(value)
        .map_err(|e| ClientError::Payload(format!("unexpected {what} envelope: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::installation::Installation;

    fn wire() -> WireClient {
        WireClient::new(HttpTransport::new(Installation::new("http://127.0.0.1:1").unwrap()))
    }

    #[tokio::test]
    async fn socket_rpcs_require_a_connection() {
        let client = wire();
        let err = client.send_message(1, "hi").await.unwrap_err();
        assert!(matches!(err, ClientError::NotConnected));
    }

    #[tokio::test]
    async fn update_status_validates_its_input() {
        let client = wire();
        let err = client.update_status("online").await.unwrap_err();
        assert!(matches!(err, ClientError::InvalidStatus { .. }));
        // Valid statuses fail later, on the missing socket.
        let err = client.update_status("idle").await.unwrap_err();
        assert!(matches!(err, ClientError::NotConnected));
    }

    #[test]
    fn instants_format_like_the_wire_expects() {
        let at = DateTime::parse_from_rfc3339("2017-01-29T18:06:34.640Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(format_instant(at), "2017-01-29T18:06:34.640Z");
    }
}
