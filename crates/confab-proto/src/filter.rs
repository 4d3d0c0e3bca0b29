//! Frame filters and subset matching.
//!
//! A filter is a predicate over inbound frames used to await specific
//! responses: a name (exact, or a glob with a trailing `*` segment), a nonce
//! to match by equality, a contents subset requirement, or the `"*"` wildcard
//! matching everything. Populated fields combine conjunctively.
//!
//! An empty conjunction is rejected at registration time; callers that want
//! every frame subscribe to the raw frame stream instead.

use serde_json::Value;

use crate::frame::Frame;

/// Error produced when validating a filter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FilterError {
    /// No name, nonce, or contents requirement was given.
    #[error("empty frame filter matches nothing; subscribe to the frame stream instead")]
    Empty,
}

/// Deep subset check: every key of `expected` must exist in `actual` with an
/// equal value. Nested objects recurse; arrays and scalars compare by value.
#[must_use]
pub fn is_subset(expected: &Value, actual: &Value) -> bool {
    match (expected, actual) {
        (Value::Object(expected), Value::Object(actual)) => expected
            .iter()
            .all(|(key, value)| actual.get(key).is_some_and(|found| is_subset(value, found))),
        _ => expected == actual,
    }
}

/// The conjunctive part of a [`FrameFilter`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameMatch {
    /// Frame name: exact (`"ping"`) or glob with a trailing `*`
    /// (`"room.message.*"`).
    pub name: Option<String>,
    /// Nonce, matched by equality.
    pub nonce: Option<u64>,
    /// Contents requirement, matched by [`is_subset`].
    pub contents: Option<Value>,
}

impl FrameMatch {
    fn is_empty(&self) -> bool {
        self.name.is_none() && self.nonce.is_none() && self.contents.is_none()
    }

    fn matches(&self, frame: &Frame) -> bool {
        if let Some(pattern) = &self.name {
            if !name_matches(pattern, &frame.name) {
                return false;
            }
        }
        if let Some(nonce) = self.nonce {
            if frame.nonce != Some(nonce) {
                return false;
            }
        }
        if let Some(contents) = &self.contents {
            if !is_subset(contents, &frame.contents) {
                return false;
            }
        }
        true
    }
}

fn name_matches(pattern: &str, name: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(stem) => name.starts_with(stem),
        None => pattern == name,
    }
}

/// Match predicate over inbound frames.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameFilter {
    /// The `"*"` wildcard: matches every frame.
    Any,
    /// Conjunction of name / nonce / contents requirements.
    Match(FrameMatch),
}

impl FrameFilter {
    /// Filter on a frame name (or wildcard when given `"*"`).
    pub fn name(name: impl Into<String>) -> Self {
        let name = name.into();
        if name == "*" {
            return Self::Any;
        }
        Self::Match(FrameMatch { name: Some(name), ..FrameMatch::default() })
    }

    /// Filter on a nonce.
    #[must_use]
    pub fn nonce(nonce: u64) -> Self {
        Self::Match(FrameMatch { nonce: Some(nonce), ..FrameMatch::default() })
    }

    /// Filter on a contents subset.
    #[must_use]
    pub fn contents(contents: Value) -> Self {
        Self::Match(FrameMatch { contents: Some(contents), ..FrameMatch::default() })
    }

    /// Add a contents-subset requirement to this filter.
    #[must_use]
    pub fn with_contents(self, contents: Value) -> Self {
        match self {
            Self::Any => Self::contents(contents),
            Self::Match(m) => Self::Match(FrameMatch { contents: Some(contents), ..m }),
        }
    }

    /// Add a nonce requirement to this filter.
    #[must_use]
    pub fn with_nonce(self, nonce: u64) -> Self {
        match self {
            Self::Any => Self::nonce(nonce),
            Self::Match(m) => Self::Match(FrameMatch { nonce: Some(nonce), ..m }),
        }
    }

    /// Check that the filter can match at all.
    ///
    /// # Errors
    ///
    /// Returns [`FilterError::Empty`] for a conjunction with no requirements.
    pub fn validate(&self) -> Result<(), FilterError> {
        match self {
            Self::Any => Ok(()),
            Self::Match(m) if m.is_empty() => Err(FilterError::Empty),
            Self::Match(_) => Ok(()),
        }
    }

    /// Does this filter accept the frame?
    #[must_use]
    pub fn matches(&self, frame: &Frame) -> bool {
        match self {
            Self::Any => true,
            Self::Match(m) => m.matches(frame),
        }
    }
}

impl From<&str> for FrameFilter {
    fn from(name: &str) -> Self {
        Self::name(name)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use serde_json::json;

    use super::*;
    use crate::frame::NonceSequence;

    fn frame(name: &str, contents: Value) -> Frame {
        Frame::event(name, contents)
    }

    #[test]
    fn subset_accepts_extra_keys() {
        let filter = json!({"roomId": "3735", "ids": [488566]});
        let actual = json!({"roomId": "3735", "ids": [488566], "installationId": 385654, "shard": 7});
        assert!(is_subset(&filter, &actual));
    }

    #[test]
    fn subset_rejects_missing_key_or_unequal_value() {
        let actual = json!({"roomId": "3735", "ids": [488566]});
        assert!(!is_subset(&json!({"roomId": "3735", "extra": 1}), &actual));
        assert!(!is_subset(&json!({"roomId": "9999"}), &actual));
        assert!(!is_subset(&json!({"ids": [488567]}), &actual));
        assert!(!is_subset(&json!({"ids": [488566, 1]}), &actual));
    }

    #[test]
    fn subset_recurses_into_nested_objects() {
        let actual = json!({"counts": {"rooms": 2, "conversations": 5}, "seq": 9});
        assert!(is_subset(&json!({"counts": {"rooms": 2}}), &actual));
        assert!(!is_subset(&json!({"counts": {"rooms": 3}}), &actual));
    }

    #[test]
    fn scalar_subset_is_equality() {
        assert!(is_subset(&json!(7), &json!(7)));
        assert!(!is_subset(&json!(7), &json!(8)));
        assert!(!is_subset(&json!({"a": 1}), &json!(7)));
    }

    #[test]
    fn name_filter_matches_exactly() {
        let filter = FrameFilter::name("ping");
        assert!(filter.matches(&frame("ping", json!({}))));
        assert!(!filter.matches(&frame("pong", json!({}))));
        assert!(!filter.matches(&frame("ping.extra", json!({}))));
    }

    #[test]
    fn glob_name_filter_matches_prefix() {
        let filter = FrameFilter::name("room.message.*");
        assert!(filter.matches(&frame("room.message.created", json!({}))));
        assert!(filter.matches(&frame("room.message.updated", json!({}))));
        assert!(!filter.matches(&frame("room.typing", json!({}))));
    }

    #[test]
    fn wildcard_matches_everything() {
        let filter = FrameFilter::from("*");
        assert_eq!(filter, FrameFilter::Any);
        assert!(filter.matches(&frame("anything.at.all", json!({"x": 1}))));
        assert!(filter.validate().is_ok());
    }

    #[test]
    fn nonce_filter_matches_by_equality() {
        let nonces = NonceSequence::new();
        let sent = Frame::request("ping", json!({}), &nonces);
        let nonce = sent.nonce.unwrap();

        let filter = FrameFilter::nonce(nonce);
        let mut reply = frame("pong", json!({}));
        reply.nonce = Some(nonce);
        assert!(filter.matches(&reply));

        reply.nonce = Some(nonce + 1);
        assert!(!filter.matches(&reply));

        reply.nonce = None;
        assert!(!filter.matches(&reply));
    }

    #[test]
    fn conjunction_requires_all_parts() {
        let filter = FrameFilter::name("room.typing")
            .with_contents(json!({"roomId": 1, "isTyping": true}));

        assert!(filter.matches(&frame("room.typing", json!({"roomId": 1, "isTyping": true, "userId": 5}))));
        assert!(!filter.matches(&frame("room.typing", json!({"roomId": 1, "isTyping": false}))));
        assert!(!filter.matches(&frame("room.updated", json!({"roomId": 1, "isTyping": true}))));
    }

    #[test]
    fn empty_filter_is_rejected() {
        let empty = FrameFilter::Match(FrameMatch::default());
        assert_eq!(empty.validate(), Err(FilterError::Empty));
        assert!(FrameFilter::name("ping").validate().is_ok());
    }

    proptest! {
        #[test]
        fn every_object_is_a_subset_of_itself(keys in proptest::collection::hash_map("[a-z]{1,8}", 0i64..1000, 0..8)) {
            let value = json!(keys);
            prop_assert!(is_subset(&value, &value));
        }

        #[test]
        fn removing_a_key_keeps_subset(keys in proptest::collection::hash_map("[a-z]{1,8}", 0i64..1000, 1..8)) {
            let full = json!(keys.clone());
            let mut reduced = keys;
            let first = reduced.keys().next().cloned().unwrap();
            reduced.remove(&first);
            prop_assert!(is_subset(&json!(reduced), &full));
        }
    }
}
