//! Typed gateway events.
//!
//! Instead of matching on raw `(op, t, serde_json::Value)` tuples everywhere,
//! the gateway module deserialises dispatch payloads into this enum so the rest
//! of the bot can pattern-match on strongly-typed data.

use serde::de::DeserializeOwned;
use tracing::warn;

use crate::types::*;

// ---------------------------------------------------------------------------
// The top-level event enum
// ---------------------------------------------------------------------------

/// A fully-parsed event coming off the Discord gateway.
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    /// Identify succeeded and the session is live.
    Ready(ReadyEvent),

    /// A message was created in a channel we can see.
    MessageCreate(Message),

    /// Heartbeat ACK from the gateway (op 11).
    HeartbeatAck,

    /// The gateway is asking us to heartbeat immediately (op 1).
    HeartbeatRequest,

    /// Gateway told us to reconnect (op 7).
    Reconnect,

    /// Session has been invalidated (op 9). The inner bool indicates whether
    /// the session is resumable (`true`) or we must re-identify (`false`).
    InvalidSession(bool),

    /// An event we received but don't have a typed variant for.
    Unknown {
        event_name: Option<String>,
        op: u8,
        data: Option<serde_json::Value>,
    },
}

// ---------------------------------------------------------------------------
// Parsing from a raw GatewayPayload
// ---------------------------------------------------------------------------

impl GatewayEvent {
    /// Convert a raw [`GatewayPayload`] into a typed event.
    ///
    /// This never fails: unrecognised or malformed events become
    /// [`GatewayEvent::Unknown`].
    pub fn from_payload(payload: GatewayPayload) -> Self {
        match payload.op {
            0 => Self::parse_dispatch(payload.t.as_deref(), payload.d),
            1 => GatewayEvent::HeartbeatRequest,
            7 => GatewayEvent::Reconnect,
            9 => {
                let resumable = payload
                    .d
                    .as_ref()
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                GatewayEvent::InvalidSession(resumable)
            }
            11 => GatewayEvent::HeartbeatAck,
            _ => GatewayEvent::Unknown {
                event_name: payload.t,
                op: payload.op,
                data: payload.d,
            },
        }
    }

    /// Parse an op-0 DISPATCH event by its `t` name.
    fn parse_dispatch(event_name: Option<&str>, data: Option<serde_json::Value>) -> Self {
        let (Some(name), Some(d)) = (event_name, data.as_ref()) else {
            return GatewayEvent::Unknown {
                event_name: event_name.map(str::to_string),
                op: 0,
                data,
            };
        };

        match name {
            "READY" => parse_or_unknown(name, d, GatewayEvent::Ready),
            "MESSAGE_CREATE" => parse_or_unknown(name, d, GatewayEvent::MessageCreate),
            _ => GatewayEvent::Unknown {
                event_name: Some(name.to_string()),
                op: 0,
                data,
            },
        }
    }

    /// The dispatch name for `Unknown` events, if any.
    pub fn unknown_name(&self) -> Option<&str> {
        match self {
            GatewayEvent::Unknown { event_name, .. } => event_name.as_deref(),
            _ => None,
        }
    }
}

fn parse_or_unknown<T: DeserializeOwned>(
    name: &str,
    data: &serde_json::Value,
    wrap: impl FnOnce(T) -> GatewayEvent,
) -> GatewayEvent {
    match serde_json::from_value::<T>(data.clone()) {
        Ok(parsed) => wrap(parsed),
        Err(e) => {
            warn!(event = name, error = %e, "failed to parse dispatch payload");
            GatewayEvent::Unknown {
                event_name: Some(name.to_string()),
                op: 0,
                data: Some(data.clone()),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: serde_json::Value) -> GatewayPayload {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn parses_message_create() {
        let event = GatewayEvent::from_payload(payload(json!({
            "op": 0,
            "s": 5,
            "t": "MESSAGE_CREATE",
            "d": {
                "id": "1",
                "channel_id": "2",
                "author": { "id": "3", "username": "dave" },
                "content": "!joke",
                "timestamp": "2024-01-01T00:00:00+00:00",
            }
        })));
        match event {
            GatewayEvent::MessageCreate(msg) => {
                assert_eq!(msg.content, "!joke");
                assert_eq!(msg.author.id, "3");
            }
            other => panic!("expected MessageCreate, got {:?}", other),
        }
    }

    #[test]
    fn parses_ready() {
        let event = GatewayEvent::from_payload(payload(json!({
            "op": 0,
            "s": 1,
            "t": "READY",
            "d": {
                "v": 10,
                "user": { "id": "99", "username": "chatterbox", "bot": true },
                "session_id": "abc",
                "resume_gateway_url": "wss://resume.example",
                "guilds": [{ "id": "7", "unavailable": true }],
                "application": { "id": "99" },
            }
        })));
        match event {
            GatewayEvent::Ready(ready) => {
                assert_eq!(ready.session_id, "abc");
                assert_eq!(ready.guilds.len(), 1);
                assert!(ready.user.bot);
            }
            other => panic!("expected Ready, got {:?}", other),
        }
    }

    #[test]
    fn malformed_dispatch_becomes_unknown() {
        let event = GatewayEvent::from_payload(payload(json!({
            "op": 0,
            "t": "MESSAGE_CREATE",
            "d": { "id": "1" }
        })));
        assert_eq!(event.unknown_name(), Some("MESSAGE_CREATE"));
    }

    #[test]
    fn unhandled_dispatch_keeps_name() {
        let event = GatewayEvent::from_payload(payload(json!({
            "op": 0,
            "t": "TYPING_START",
            "d": {}
        })));
        assert_eq!(event.unknown_name(), Some("TYPING_START"));
    }

    #[test]
    fn control_opcodes() {
        assert!(matches!(
            GatewayEvent::from_payload(payload(json!({ "op": 1 }))),
            GatewayEvent::HeartbeatRequest
        ));
        assert!(matches!(
            GatewayEvent::from_payload(payload(json!({ "op": 7 }))),
            GatewayEvent::Reconnect
        ));
        assert!(matches!(
            GatewayEvent::from_payload(payload(json!({ "op": 11 }))),
            GatewayEvent::HeartbeatAck
        ));
    }

    #[test]
    fn invalid_session_reads_resumable_flag() {
        assert!(matches!(
            GatewayEvent::from_payload(payload(json!({ "op": 9, "d": true }))),
            GatewayEvent::InvalidSession(true)
        ));
        assert!(matches!(
            GatewayEvent::from_payload(payload(json!({ "op": 9, "d": false }))),
            GatewayEvent::InvalidSession(false)
        ));
        assert!(matches!(
            GatewayEvent::from_payload(payload(json!({ "op": 9 }))),
            GatewayEvent::InvalidSession(false)
        ));
    }
}
