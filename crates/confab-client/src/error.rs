//! Error types for the client.
//!
//! Strongly-typed errors per layer: HTTP transport failures, socket/protocol
//! failures, and domain-level contract violations. Malformed inbound frames
//! are never fatal; they are logged and surfaced as `error` events instead of
//! propagating through this module.

use std::fmt;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

/// Errors from the HTTP transport.
#[derive(Debug, Error)]
pub enum HttpError {
    /// The request never produced a response (DNS, TLS, connection reset).
    #[error("request to {url} failed: {source}")]
    Transport {
        /// Requested URL.
        url: String,
        /// Underlying client error.
        #[source]
        source: reqwest::Error,
    },

    /// The server answered with a non-2xx status.
    #[error("{method} {url} returned {status} {status_text}")]
    Status {
        /// Request method.
        method: String,
        /// Requested URL.
        url: String,
        /// HTTP status code.
        status: u16,
        /// Canonical status text, empty if unknown.
        status_text: String,
        /// Captured response body, if any.
        body: Option<String>,
    },

    /// The target path already contained a query string while `query` was
    /// also given. Callers supply parameters exclusively through `query`.
    #[error("path {path:?} already contains a query string; pass parameters via `query`")]
    QueryInPath {
        /// Offending path.
        path: String,
    },

    /// A header value could not be constructed (token with control bytes).
    #[error("invalid header value: {0}")]
    InvalidHeader(#[from] reqwest::header::InvalidHeaderValue),

    /// The response body was not the JSON the endpoint promises.
    #[error("failed to parse response from {url}: {source}")]
    Body {
        /// Requested URL.
        url: String,
        /// Parse failure.
        #[source]
        source: serde_json::Error,
    },

    /// The login/impersonation response carried no `tw-auth` cookie.
    #[error("response from {url} did not set a tw-auth cookie")]
    MissingAuthCookie {
        /// Requested URL.
        url: String,
    },
}

impl HttpError {
    /// Parse the captured body of a [`HttpError::Status`] as JSON.
    #[must_use]
    pub fn body_json(&self) -> Option<Value> {
        match self {
            Self::Status { body: Some(body), .. } => serde_json::from_str(body).ok(),
            _ => None,
        }
    }

    /// HTTP status code, if this error carries one.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Why a socket session ended.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CloseReason {
    /// Human-readable reason.
    pub reason: String,
    /// WebSocket close code, when the peer sent one.
    pub code: Option<u16>,
    /// Close frame message, when the peer sent one.
    pub message: Option<String>,
}

impl CloseReason {
    /// A locally-produced close reason with no peer close frame.
    #[must_use]
    pub fn local(reason: impl Into<String>) -> Self {
        Self { reason: reason.into(), code: None, message: None }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "reason={:?}", self.reason)?;
        if let Some(code) = self.code {
            write!(f, " code={code}")?;
        }
        if let Some(message) = &self.message {
            write!(f, " message={message:?}")?;
        }
        Ok(())
    }
}

/// Errors from the socket session.
#[derive(Debug, Error)]
pub enum SocketError {
    /// Opening the WebSocket failed.
    #[error("websocket connect failed: {0}")]
    Connect(String),

    /// Reading or writing the socket failed.
    #[error("websocket transport error: {0}")]
    Transport(String),

    /// An outbound frame could not be serialized.
    #[error(transparent)]
    Codec(#[from] confab_proto::CodecError),

    /// A waiter was registered with an empty filter.
    #[error(transparent)]
    Filter(#[from] confab_proto::FilterError),

    /// No matching frame arrived within the deadline.
    #[error("timed out after {elapsed:?} waiting for a matching frame")]
    Timeout {
        /// How long we waited.
        elapsed: Duration,
    },

    /// The session closed while the operation was pending.
    #[error("socket closed: {reason}")]
    Closed {
        /// Close cause, quoting reason, code, and message.
        reason: CloseReason,
    },

    /// The server answered the handshake with `authentication.error`.
    #[error("authentication rejected: {contents}")]
    AuthRejected {
        /// Contents of the error frame.
        contents: Value,
    },

    /// The handshake did not reach confirmation in time.
    #[error("handshake did not complete: {0}")]
    Handshake(String),
}

impl SocketError {
    /// True for failures that a reconnect may resolve.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connect(_) | Self::Transport(_) | Self::Timeout { .. } | Self::Closed { .. })
    }
}

/// Top-level client error.
#[derive(Debug, Error)]
pub enum ClientError {
    /// HTTP transport or remote status failure.
    #[error(transparent)]
    Http(#[from] HttpError),

    /// Socket session failure.
    #[error(transparent)]
    Socket(#[from] SocketError),

    /// A lookup exhausted the cache and the server.
    #[error("{kind} not found: {key}")]
    NotFound {
        /// Entity kind, e.g. `"person"`.
        kind: &'static str,
        /// Lookup key.
        key: String,
    },

    /// Messages cannot be sent to the current user.
    #[error("cannot send a message to yourself")]
    SelfMessage,

    /// Operation requires a server-side room id the room does not have yet.
    #[error("cannot {operation} a room that has not been created on the server")]
    UninitializedRoom {
        /// Attempted operation.
        operation: &'static str,
    },

    /// `update_status` accepts only `idle` and `active`.
    #[error("invalid status {given:?}: expected \"idle\" or \"active\"")]
    InvalidStatus {
        /// Rejected value.
        given: String,
    },

    /// Clearing history is only legal for pair rooms.
    #[error("history can only be cleared for pair rooms")]
    NotPairRoom,

    /// The session is not connected.
    #[error("session is not connected")]
    NotConnected,

    /// A wire payload was missing a field the operation needs.
    #[error("malformed server payload: {0}")]
    Payload(String),
}

impl ClientError {
    /// Shorthand for [`ClientError::NotFound`].
    #[must_use]
    pub fn not_found(kind: &'static str, key: impl Into<String>) -> Self {
        Self::NotFound { kind, key: key.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_reason_displays_all_parts() {
        let reason = CloseReason {
            reason: "heartbeat failed".to_string(),
            code: Some(1006),
            message: Some("gone".to_string()),
        };
        let text = reason.to_string();
        assert!(text.contains("heartbeat failed"));
        assert!(text.contains("1006"));
        assert!(text.contains("gone"));
    }

    #[test]
    fn status_error_body_is_lazily_parseable() {
        let err = HttpError::Status {
            method: "GET".to_string(),
            url: "https://x.test/a.json".to_string(),
            status: 422,
            status_text: "Unprocessable Entity".to_string(),
            body: Some(r#"{"error":"nope"}"#.to_string()),
        };
        assert_eq!(err.status(), Some(422));
        assert_eq!(err.body_json().unwrap()["error"], "nope");
    }

    #[test]
    fn transient_classification() {
        assert!(SocketError::Timeout { elapsed: Duration::from_secs(30) }.is_transient());
        assert!(SocketError::Closed { reason: CloseReason::local("x") }.is_transient());
        assert!(!SocketError::AuthRejected { contents: serde_json::json!({}) }.is_transient());
    }
}
