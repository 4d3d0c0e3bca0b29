//! Wire payload shapes.
//!
//! Serde views of the REST envelopes and of the frame contents the cache
//! consumes. Fields default aggressively: the server omits anything it
//! considers uninteresting, and a sparse payload must never fail an ingest.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

/// `GET /chat/me.json?includeAuth=true`.
#[derive(Debug, Clone, Deserialize)]
pub struct MeEnvelope {
    /// Account block.
    pub account: AccountDto,
}

/// The `account` block of the me endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountDto {
    /// Account id.
    pub id: u64,
    /// Socket handshake auth key.
    pub authkey: String,
    /// Canonical installation URL.
    #[serde(default)]
    pub url: Option<String>,
    /// Installation id, echoed during the socket handshake.
    pub installation_id: u64,
    /// The logged-in user's profile.
    pub user: PersonDto,
}

/// A person as the server sends it (REST and room payloads alike).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonDto {
    /// Person id.
    pub id: u64,
    /// Unique handle, no leading `@`.
    #[serde(default)]
    pub handle: Option<String>,
    /// First name.
    #[serde(default)]
    pub first_name: Option<String>,
    /// Last name.
    #[serde(default)]
    pub last_name: Option<String>,
    /// Email address.
    #[serde(default)]
    pub email: Option<String>,
    /// Job title.
    #[serde(default)]
    pub title: Option<String>,
    /// Presence status string.
    #[serde(default)]
    pub status: Option<String>,
    /// Last activity timestamp.
    #[serde(default)]
    pub last_activity_at: Option<DateTime<Utc>>,
    /// Company block.
    #[serde(default)]
    pub company: Option<CompanyDto>,
}

/// Company block nested in person payloads.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanyDto {
    /// Company id.
    #[serde(default)]
    pub id: Option<u64>,
    /// Company name.
    #[serde(default)]
    pub name: Option<String>,
}

/// A room/conversation as the server sends it.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomDto {
    /// Server-side room id.
    pub id: u64,
    /// Room type: `pair`, `private`, `company`, or something newer.
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    /// Room title, absent for pair rooms.
    #[serde(default)]
    pub title: Option<String>,
    /// Room status string.
    #[serde(default)]
    pub status: Option<String>,
    /// Creator person id.
    #[serde(default)]
    pub creator_id: Option<u64>,
    /// Creation timestamp.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    /// Last modification timestamp.
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    /// Last activity timestamp.
    #[serde(default)]
    pub last_activity_at: Option<DateTime<Utc>>,
    /// When the current user last viewed the room.
    #[serde(default)]
    pub last_viewed_at: Option<DateTime<Utc>>,
    /// Participants, populated with `includeUserData`.
    #[serde(default)]
    pub people: Vec<PersonDto>,
    /// Recent messages, populated with `includeMessageData`.
    #[serde(default)]
    pub messages: Vec<MessageDto>,
    /// Unread message count.
    #[serde(default)]
    pub unread_count: u64,
    /// Unread important message count.
    #[serde(default)]
    pub important_unread_count: u64,
}

/// A message as the server sends it (REST and `room.message.*` contents).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDto {
    /// Message id.
    pub id: u64,
    /// Containing room id.
    #[serde(default)]
    pub room_id: Option<u64>,
    /// Author person id.
    #[serde(default)]
    pub user_id: Option<u64>,
    /// Message text. The wire calls this `body`.
    #[serde(default)]
    pub body: Option<String>,
    /// Creation timestamp.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    /// Edit timestamp.
    #[serde(default)]
    pub edited_at: Option<DateTime<Utc>>,
    /// `active`, `redacted`, or something newer.
    #[serde(default)]
    pub status: Option<String>,
    /// Attached file descriptor.
    #[serde(default)]
    pub file: Option<Value>,
    /// Third-party card payloads.
    #[serde(default)]
    pub third_party_cards: Option<Value>,
    /// Whether the author was active in the room when sending.
    #[serde(default)]
    pub is_user_active: bool,
}

/// `{person: {…}}`.
#[derive(Debug, Clone, Deserialize)]
pub struct PersonEnvelope {
    /// The person.
    pub person: PersonDto,
}

/// `{people: […], meta: …}`.
#[derive(Debug, Clone, Deserialize)]
pub struct PeopleEnvelope {
    /// The people.
    #[serde(default)]
    pub people: Vec<PersonDto>,
    /// Pagination annotation.
    #[serde(default)]
    pub meta: Option<PageMeta>,
}

/// `{room: {…}}`.
#[derive(Debug, Clone, Deserialize)]
pub struct RoomEnvelope {
    /// The room.
    pub room: RoomDto,
}

/// `{conversations: […], meta: …}`.
#[derive(Debug, Clone, Deserialize)]
pub struct ConversationsEnvelope {
    /// The conversations.
    #[serde(default)]
    pub conversations: Vec<RoomDto>,
    /// Pagination annotation.
    #[serde(default)]
    pub meta: Option<PageMeta>,
}

/// `{messages: […]}`.
#[derive(Debug, Clone, Deserialize)]
pub struct MessagesEnvelope {
    /// The messages.
    #[serde(default)]
    pub messages: Vec<MessageDto>,
}

/// Pagination annotation on list envelopes.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct PageMeta {
    /// Page block.
    #[serde(default)]
    pub page: Option<PageInfo>,
}

/// Offset/limit/total as the server reports them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    /// Offset of the first returned item.
    #[serde(default)]
    pub offset: u64,
    /// Requested page size.
    #[serde(default)]
    pub limit: u64,
    /// Total matching items.
    #[serde(default)]
    pub total: u64,
}

/// A list response annotated with the server's pagination stamp.
#[derive(Debug, Clone)]
pub struct Page<T> {
    /// Returned items.
    pub items: Vec<T>,
    /// Server pagination stamp; defaults to zeros when the server sent none.
    pub page: PageInfo,
}

impl<T> Page<T> {
    /// Assemble a page from items and an optional meta block.
    #[must_use]
    pub fn new(items: Vec<T>, meta: Option<PageMeta>) -> Self {
        Self { items, page: meta.and_then(|m| m.page).unwrap_or_default() }
    }
}

/// `unseen.counts.updated` contents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct UnseenCounts {
    /// Counts of important unread items.
    #[serde(default)]
    pub important: UnseenBucket,
    /// Counts of all unread items.
    #[serde(default)]
    pub total: UnseenBucket,
}

/// One bucket of unseen counts. `conversations` may be absent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct UnseenBucket {
    /// Unread rooms.
    #[serde(default)]
    pub rooms: u64,
    /// Unread conversations; the server omits this for some installations.
    #[serde(default)]
    pub conversations: Option<u64>,
}

/// `user.modified` contents: a single-field change.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserModified {
    /// Person the change applies to.
    pub user_id: u64,
    /// Changed field name.
    pub key: String,
    /// New value.
    #[serde(default)]
    pub value: Value,
}

/// `room.typing` contents.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingNotice {
    /// Room being typed in.
    pub room_id: u64,
    /// Person typing.
    pub user_id: u64,
    /// Started or stopped.
    #[serde(default)]
    pub is_typing: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn message_contents_parse_from_a_push_frame() {
        let contents = json!({
            "id": 52,
            "body": "howya lad",
            "roomId": 1,
            "userId": 1,
            "createdAt": "2017-01-29T18:06:34.640Z"
        });
        let dto: MessageDto = serde_json::from_value(contents).unwrap();
        assert_eq!(dto.id, 52);
        assert_eq!(dto.room_id, Some(1));
        assert_eq!(dto.body.as_deref(), Some("howya lad"));
        assert_eq!(dto.created_at.unwrap().timestamp_millis(), 1_485_713_194_640);
    }

    #[test]
    fn sparse_person_payload_still_parses() {
        let dto: PersonDto = serde_json::from_value(json!({"id": 166})).unwrap();
        assert_eq!(dto.id, 166);
        assert!(dto.handle.is_none());
        assert!(dto.status.is_none());
    }

    #[test]
    fn room_type_field_maps_to_kind() {
        let dto: RoomDto =
            serde_json::from_value(json!({"id": 5, "type": "pair", "people": []})).unwrap();
        assert_eq!(dto.kind.as_deref(), Some("pair"));
    }

    #[test]
    fn unseen_counts_tolerate_missing_conversations() {
        let counts: UnseenCounts = serde_json::from_value(json!({
            "important": {"rooms": 1},
            "total": {"rooms": 4, "conversations": 9}
        }))
        .unwrap();
        assert_eq!(counts.important.rooms, 1);
        assert_eq!(counts.important.conversations, None);
        assert_eq!(counts.total.conversations, Some(9));
    }

    #[test]
    fn page_defaults_to_zero_stamp() {
        let page: Page<u8> = Page::new(vec![1, 2], None);
        assert_eq!(page.page, PageInfo::default());
    }
}
