//! Fixture payload builders.
//!
//! Raw `serde_json::Value` payloads shaped like the production REST/wire
//! envelopes, so tests read close to real server traffic.

use chrono::{SecondsFormat, Utc};
use serde_json::{json, Value};

/// A person payload.
#[must_use]
pub fn person(id: u64, handle: &str) -> Value {
    json!({
        "id": id,
        "handle": handle,
        "firstName": capitalize(handle),
        "lastName": "Crew",
        "email": format!("{handle}@digitalcrew.example"),
        "title": "Engineer",
        "status": "online",
        "company": {"id": 1, "name": "Digital Crew"}
    })
}

/// A person payload with an explicit status.
#[must_use]
pub fn person_with_status(id: u64, handle: &str, status: &str) -> Value {
    let mut value = person(id, handle);
    value["status"] = json!(status);
    value
}

/// A pair room holding exactly the given two people payloads.
#[must_use]
pub fn pair_room(id: u64, people: &[Value]) -> Value {
    room(id, "pair", people)
}

/// A room payload.
#[must_use]
pub fn room(id: u64, kind: &str, people: &[Value]) -> Value {
    json!({
        "id": id,
        "type": kind,
        "title": if kind == "pair" { Value::Null } else { json!(format!("room-{id}")) },
        "status": "active",
        "creatorId": people.first().and_then(|p| p.get("id")).cloned().unwrap_or(json!(1)),
        "createdAt": now(),
        "updatedAt": now(),
        "lastActivityAt": now(),
        "people": people,
        "unreadCount": 0,
        "importantUnreadCount": 0
    })
}

/// A message payload.
#[must_use]
pub fn message(id: u64, room_id: u64, user_id: u64, body: &str) -> Value {
    json!({
        "id": id,
        "roomId": room_id,
        "userId": user_id,
        "body": body,
        "createdAt": now(),
        "status": "active",
        "isUserActive": true
    })
}

/// The `account` block returned by the me endpoint.
#[must_use]
pub fn account(user: Value) -> Value {
    json!({
        "id": 139099,
        "authkey": "YUcAR6imCKT5WRB0Qy0fJFGVUjsnyYCdR8RSIfuE",
        "url": "https://digitalcrew.teamwork.com/",
        "installationId": 1,
        "user": user
    })
}

/// Wire timestamp for "now".
#[must_use]
pub fn now() -> Value {
    json!(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true))
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
