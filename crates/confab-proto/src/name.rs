//! Known frame names.
//!
//! Inbound and outbound frame names are plain strings on the wire; the
//! constants here keep the spelling in one place. Unknown inbound names are
//! logged and ignored by the client.

/// Server asks the client to authenticate (first frame after connect).
pub const AUTHENTICATION_REQUEST: &str = "authentication.request";
/// Client's reply carrying the auth key and identity.
pub const AUTHENTICATION_RESPONSE: &str = "authentication.response";
/// Server accepted the authentication.
pub const AUTHENTICATION_CONFIRMATION: &str = "authentication.confirmation";
/// Server rejected the authentication.
pub const AUTHENTICATION_ERROR: &str = "authentication.error";

/// Heartbeat request (nonced).
pub const PING: &str = "ping";
/// Heartbeat response (echoes the ping nonce).
pub const PONG: &str = "pong";

/// A message was created in a room. Also the send-message RPC name.
pub const ROOM_MESSAGE_CREATED: &str = "room.message.created";
/// A message was edited.
pub const ROOM_MESSAGE_UPDATED: &str = "room.message.updated";
/// Messages were deleted (redacted).
pub const ROOM_MESSAGES_DELETED: &str = "room.messages.deleted";
/// A message deletion was undone.
pub const ROOM_MESSAGES_DELETED_UNDONE: &str = "room.messages.deleted-undone";

/// Room metadata changed; the client refreshes the room over REST.
pub const ROOM_UPDATED: &str = "room.updated";
/// Room was deleted.
pub const ROOM_DELETED: &str = "room.deleted";
/// Somebody started or stopped typing in a room.
pub const ROOM_TYPING: &str = "room.typing";
/// A user activated (viewed) a room.
pub const ROOM_USER_ACTIVE: &str = "room.user.active";

/// Single-field change on a person (`{userId, key, value}`).
pub const USER_MODIFIED: &str = "user.modified";
/// Outbound status change (`{status}`), fire-and-forget.
pub const USER_MODIFIED_STATUS: &str = "user.modified.status";
/// A person joined the installation.
pub const USER_ADDED: &str = "user.added";
/// A person's profile changed; the client refetches it.
pub const USER_UPDATED: &str = "user.updated";
/// A person was removed.
pub const USER_DELETED: &str = "user.deleted";

/// Unseen-count query (nonced request).
pub const UNSEEN_COUNTS_REQUEST: &str = "unseen.counts.request";
/// Unseen-count response (echoes the request nonce).
pub const UNSEEN_COUNTS_UPDATED: &str = "unseen.counts.updated";

/// Company created. Observed but never mutates the client cache.
pub const COMPANY_ADDED: &str = "company.added";
/// Company updated. Observed but never mutates the client cache.
pub const COMPANY_UPDATED: &str = "company.updated";
/// Company deleted. Observed but never mutates the client cache.
pub const COMPANY_DELETED: &str = "company.deleted";
