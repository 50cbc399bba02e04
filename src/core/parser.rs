//! Event parser for chat source messages
//!
//! Each frame from the source is a JSON object `{"type": ..., "data": {...}}`
//! or an array of them. Non-event frames (handshake, keepalive) are ignored.

use serde_json::Value;
use tracing::{debug, trace, warn};

use super::message::ChatEvent;

const EVENT_TYPES: &[&str] = &[
    "ChatMessageArrived",
    "MessageDeleted",
    "UserTimedOut",
    "ChatCleared",
];

/// Parse one source frame into an event.
///
/// Returns None for malformed JSON, non-event frames, or event payloads
/// that do not match their declared type.
pub fn parse_event(msg: &str) -> Option<ChatEvent> {
    trace!(len = msg.len(), "Parsing message");

    let json: Value = serde_json::from_str(msg)
        .map_err(|e| {
            warn!(error = %e, "Failed to parse JSON");
        })
        .ok()?;

    event_from_value(json)
}

/// Parse a frame that may carry a single event or an array of events
pub fn parse_batch(msg: &str) -> Vec<ChatEvent> {
    let json: Value = match serde_json::from_str(msg) {
        Ok(json) => json,
        Err(e) => {
            warn!(error = %e, "Failed to parse JSON");
            return Vec::new();
        }
    };

    match json {
        Value::Array(items) => items.into_iter().filter_map(event_from_value).collect(),
        other => event_from_value(other).into_iter().collect(),
    }
}

fn event_from_value(json: Value) -> Option<ChatEvent> {
    let msg_type = json["type"].as_str()?;
    if !EVENT_TYPES.contains(&msg_type) {
        // Not an event (could be "connected", "ping", ...)
        trace!(msg_type, "Ignoring non-event frame");
        return None;
    }
    let msg_type = msg_type.to_string();

    let event: ChatEvent = serde_json::from_value(json)
        .map_err(|e| {
            debug!(msg_type = %msg_type, error = %e, "Failed to parse event payload");
        })
        .ok()?;

    trace!(kind = event.kind(), "Event parsed");
    Some(event)
}
