//! Frame envelope and nonce sequencing.
//!
//! A `Frame` is the application-layer packet exchanged over the WebSocket:
//!
//! ```json
//! {
//!   "contentType": "object",
//!   "name": "room.message.created",
//!   "contents": { "roomId": 1, "body": "howya lad" },
//!   "nonce": 7,
//!   "source": {"name": "Confab Rust API", "version": "0.1.0"},
//!   "uid": null, "nodeId": null
//! }
//! ```
//!
//! Outbound request frames carry a nonce drawn from a [`NonceSequence`]; the
//! server echoes the nonce on the paired response, which is how RPCs over the
//! socket are correlated. Pure events (typing, status changes) go out without
//! a nonce.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Source name stamped on every outbound frame.
pub const SOURCE_NAME: &str = "Confab Rust API";

/// The only content type this protocol revision uses.
const CONTENT_TYPE_OBJECT: &str = "object";

/// Errors from frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The text could not be parsed as a frame envelope.
    #[error("failed to decode frame: {0}")]
    Decode(#[source] serde_json::Error),

    /// The frame could not be serialized.
    #[error("failed to encode frame: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Identifies the software that produced a frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameSource {
    /// Producer name.
    pub name: String,
    /// Producer version.
    pub version: String,
}

impl Default for FrameSource {
    fn default() -> Self {
        Self { name: SOURCE_NAME.to_string(), version: env!("CARGO_PKG_VERSION").to_string() }
    }
}

/// A single message on the chat wire protocol.
///
/// Inbound frames are parsed leniently: everything except `name` defaults
/// when absent, because server-originated frames routinely omit `source`,
/// `uid`, and `nodeId`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Frame {
    /// Always `"object"` for this protocol revision.
    #[serde(default = "default_content_type")]
    pub content_type: String,

    /// Frame name, e.g. `"room.message.created"`.
    pub name: String,

    /// Arbitrary JSON contents.
    #[serde(default = "empty_object")]
    pub contents: Value,

    /// Correlation nonce. `None` on pure events and most server pushes.
    #[serde(default)]
    pub nonce: Option<u64>,

    /// Producing software.
    #[serde(default)]
    pub source: FrameSource,

    /// Opaque routing field, unused by this client.
    #[serde(default)]
    pub uid: Option<Value>,

    /// Opaque routing field, unused by this client.
    #[serde(default)]
    pub node_id: Option<Value>,
}

fn default_content_type() -> String {
    CONTENT_TYPE_OBJECT.to_string()
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

impl Frame {
    /// Build a nonced request frame, drawing the next nonce from `nonces`.
    pub fn request(name: impl Into<String>, contents: Value, nonces: &NonceSequence) -> Self {
        Self {
            content_type: default_content_type(),
            name: name.into(),
            contents,
            nonce: Some(nonces.next()),
            source: FrameSource::default(),
            uid: None,
            node_id: None,
        }
    }

    /// Build a nonce-less event frame.
    pub fn event(name: impl Into<String>, contents: Value) -> Self {
        Self {
            content_type: default_content_type(),
            name: name.into(),
            contents,
            nonce: None,
            source: FrameSource::default(),
            uid: None,
            node_id: None,
        }
    }

    /// Serialize the frame to its wire text.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Encode`] if the contents cannot be serialized
    /// (non-string map keys and similar).
    pub fn encode(&self) -> Result<String, CodecError> {
        serde_json::to_string(self).map_err(CodecError::Encode)
    }

    /// Parse a frame from wire text.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Decode`] for malformed JSON or a missing `name`.
    pub fn decode(text: &str) -> Result<Self, CodecError> {
        serde_json::from_str(text).map_err(CodecError::Decode)
    }

    /// Read a field of `contents` by key, if contents is an object.
    #[must_use]
    pub fn content(&self, key: &str) -> Option<&Value> {
        self.contents.get(key)
    }

    /// Read a numeric field of `contents` as `u64`.
    #[must_use]
    pub fn content_u64(&self, key: &str) -> Option<u64> {
        self.content(key).and_then(Value::as_u64)
    }

    /// Read a string field of `contents`.
    #[must_use]
    pub fn content_str(&self, key: &str) -> Option<&str> {
        self.content(key).and_then(Value::as_str)
    }
}

/// Monotonically increasing nonce counter.
///
/// One sequence per socket session: two frames sent in order through the same
/// sequence always satisfy `f1.nonce < f2.nonce`. The counter starts at 1 so
/// a nonce of 0 never appears on the wire.
#[derive(Debug, Default)]
pub struct NonceSequence(AtomicU64);

impl NonceSequence {
    /// Create a fresh sequence starting at 1.
    #[must_use]
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Take the next nonce.
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// The most recently issued nonce, 0 if none yet.
    #[must_use]
    pub fn last(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use serde_json::json;

    use super::*;

    #[test]
    fn request_frames_are_nonced_in_order() {
        let nonces = NonceSequence::new();
        let a = Frame::request("ping", json!({}), &nonces);
        let b = Frame::request("ping", json!({}), &nonces);
        assert_eq!(a.nonce, Some(1));
        assert_eq!(b.nonce, Some(2));
        assert!(a.nonce < b.nonce);
    }

    #[test]
    fn event_frames_carry_no_nonce() {
        let frame = Frame::event("room.typing", json!({"roomId": 1, "isTyping": true}));
        assert_eq!(frame.nonce, None);
    }

    #[test]
    fn envelope_round_trip() {
        let nonces = NonceSequence::new();
        let frame = Frame::request("room.message.created", json!({"roomId": 3, "body": "hi"}), &nonces);

        let wire = frame.encode().unwrap();
        assert!(wire.contains("\"contentType\":\"object\""));
        assert!(wire.contains("\"nonce\":1"));

        let parsed = Frame::decode(&wire).unwrap();
        assert_eq!(parsed, frame);
    }

    #[test]
    fn decode_tolerates_sparse_server_frames() {
        let frame = Frame::decode(r#"{"name":"authentication.request","contents":{}}"#).unwrap();
        assert_eq!(frame.name, "authentication.request");
        assert_eq!(frame.nonce, None);
        assert_eq!(frame.content_type, "object");
        assert!(frame.contents.is_object());
    }

    #[test]
    fn decode_rejects_nameless_frames() {
        assert!(Frame::decode(r#"{"contents":{}}"#).is_err());
        assert!(Frame::decode("not json").is_err());
    }

    #[test]
    fn content_accessors() {
        let frame = Frame::event("user.modified", json!({"userId": 166, "key": "status"}));
        assert_eq!(frame.content_u64("userId"), Some(166));
        assert_eq!(frame.content_str("key"), Some("status"));
        assert_eq!(frame.content("missing"), None);
    }

    proptest! {
        #[test]
        fn nonces_stay_strictly_increasing(count in 1usize..200) {
            let nonces = NonceSequence::new();
            let mut last = 0;
            for _ in 0..count {
                let next = nonces.next();
                prop_assert!(next > last);
                last = next;
            }
            prop_assert_eq!(nonces.last(), last);
        }
    }
}
