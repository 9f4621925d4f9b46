//! Typed representations of the Discord API objects the bot touches.
//!
//! Only the slice of the API needed to receive messages, reply to them and
//! set a presence lives here. Everything else arriving on the gateway stays
//! as raw JSON inside [`crate::events::GatewayEvent::Unknown`].

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

// ---------------------------------------------------------------------------
// Primitives
// ---------------------------------------------------------------------------

/// Discord IDs are snowflakes transmitted as strings in JSON.
pub type Snowflake = String;

// ---------------------------------------------------------------------------
// Gateway payload (the envelope that wraps every WS message)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayPayload {
    pub op: u8,
    pub d: Option<serde_json::Value>,
    pub s: Option<u64>,
    pub t: Option<String>,
}

bitflags! {
    /// Gateway intents sent with IDENTIFY.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Intents: u32 {
        const GUILDS = 1;
        const GUILD_MEMBERS = 1 << 1;
        const GUILD_PRESENCES = 1 << 8;
        const GUILD_MESSAGES = 1 << 9;
        const DIRECT_MESSAGES = 1 << 12;
        const MESSAGE_CONTENT = 1 << 15;
    }
}

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct User {
    pub id: Snowflake,
    pub username: String,
    pub discriminator: Option<String>,
    #[serde(default)]
    pub bot: bool,
    pub global_name: Option<String>,
}

impl User {
    /// `Username#Discriminator` or just `Username` for the new username system.
    pub fn tag(&self) -> String {
        match self.discriminator.as_deref() {
            Some("0") | None => self.username.clone(),
            Some(disc) => format!("{}#{}", self.username, disc),
        }
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Message {
    pub id: Snowflake,
    pub channel_id: Snowflake,
    pub guild_id: Option<Snowflake>,
    pub author: User,
    pub content: String,
    pub timestamp: String,
    #[serde(default)]
    pub mentions: Vec<User>,
    pub message_reference: Option<MessageReference>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MessageReference {
    pub message_id: Option<Snowflake>,
    pub channel_id: Option<Snowflake>,
    pub guild_id: Option<Snowflake>,
    #[serde(default)]
    pub fail_if_not_exists: bool,
}

// ---------------------------------------------------------------------------
// READY event payload
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReadyEvent {
    pub v: u8,
    pub user: User,
    pub session_id: String,
    pub resume_gateway_url: String,
    #[serde(default)]
    pub guilds: Vec<UnavailableGuild>,
    pub application: ReadyApplication,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UnavailableGuild {
    pub id: Snowflake,
    #[serde(default)]
    pub unavailable: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReadyApplication {
    pub id: Snowflake,
    pub flags: Option<u64>,
}

// ---------------------------------------------------------------------------
// Presence (outbound op 3)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize_repr, Serialize_repr)]
#[repr(u8)]
pub enum ActivityType {
    Playing = 0,
    Streaming = 1,
    Listening = 2,
    Watching = 3,
    Custom = 4,
    Competing = 5,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Activity {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ActivityType,
}

/// Body of a gateway `PRESENCE_UPDATE` (op 3) send.
#[derive(Debug, Clone, Serialize)]
pub struct UpdatePresence {
    pub since: Option<u64>,
    pub activities: Vec<Activity>,
    pub status: String,
    pub afk: bool,
}

impl UpdatePresence {
    /// Online, "Playing {name}".
    pub fn playing(name: impl Into<String>) -> Self {
        Self {
            since: None,
            activities: vec![Activity {
                name: name.into(),
                kind: ActivityType::Playing,
            }],
            status: "online".to_string(),
            afk: false,
        }
    }

    /// Wrap into the full gateway payload.
    pub fn into_payload(self) -> serde_json::Value {
        serde_json::json!({ "op": 3, "d": self })
    }
}

// ---------------------------------------------------------------------------
// Outbound message body (for REST POST /channels/{id}/messages)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize)]
pub struct CreateMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_reference: Option<MessageReference>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_mentions: Option<AllowedMentions>,
}

/// Controls which mentions in `content` actually ping.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AllowedMentions {
    pub parse: Vec<String>,
    pub replied_user: bool,
}

impl CreateMessage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content(mut self, text: impl Into<String>) -> Self {
        self.content = Some(text.into());
        self
    }

    pub fn reply_to(mut self, message_id: impl Into<String>) -> Self {
        self.message_reference = Some(MessageReference {
            message_id: Some(message_id.into()),
            channel_id: None,
            guild_id: None,
            fail_if_not_exists: false,
        });
        self
    }

    /// Model output is echoed verbatim, so never let it ping `@everyone`.
    pub fn suppress_mentions(mut self) -> Self {
        self.allowed_mentions = Some(AllowedMentions::default());
        self
    }
}

// ---------------------------------------------------------------------------
// Rate-limit info parsed from response headers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct RateLimitInfo {
    pub remaining: Option<u32>,
    pub reset_after: Option<f64>,
    pub bucket: Option<String>,
    pub is_global: bool,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_test::{assert_tokens, Token};

    #[test]
    fn user_tag_drops_legacy_zero_discriminator() {
        let user: User = serde_json::from_value(serde_json::json!({
            "id": "1",
            "username": "alice",
            "discriminator": "0",
        }))
        .unwrap();
        assert_eq!(user.tag(), "alice");
        assert!(!user.bot);
    }

    #[test]
    fn user_tag_keeps_real_discriminator() {
        let user: User = serde_json::from_value(serde_json::json!({
            "id": "1",
            "username": "bob",
            "discriminator": "1234",
            "bot": true,
        }))
        .unwrap();
        assert_eq!(user.tag(), "bob#1234");
        assert!(user.bot);
    }

    #[test]
    fn message_parses_with_minimal_fields() {
        let msg: Message = serde_json::from_value(serde_json::json!({
            "id": "10",
            "channel_id": "20",
            "author": { "id": "30", "username": "carol" },
            "content": "!ping",
            "timestamp": "2024-01-01T00:00:00+00:00",
            "mentions": [{ "id": "99", "username": "chatterbox", "bot": true }],
        }))
        .unwrap();
        assert_eq!(msg.content, "!ping");
        assert!(msg.guild_id.is_none());
        assert_eq!(msg.mentions[0].id, "99");
    }

    #[test]
    fn activity_type_serializes_as_integer() {
        assert_tokens(&ActivityType::Playing, &[Token::U8(0)]);
        assert_tokens(&ActivityType::Competing, &[Token::U8(5)]);
    }

    #[test]
    fn presence_payload_has_op_3_and_activity() {
        let payload = UpdatePresence::playing("Ask me anything!").into_payload();
        assert_eq!(payload["op"], 3);
        assert_eq!(payload["d"]["status"], "online");
        assert_eq!(payload["d"]["activities"][0]["name"], "Ask me anything!");
        assert_eq!(payload["d"]["activities"][0]["type"], 0);
        assert_eq!(payload["d"]["afk"], false);
    }

    #[test]
    fn create_message_skips_unset_fields() {
        let body = serde_json::to_value(CreateMessage::new().content("hi")).unwrap();
        assert_eq!(body, serde_json::json!({ "content": "hi" }));
    }

    #[test]
    fn create_message_reply_and_suppressed_mentions() {
        let body = serde_json::to_value(
            CreateMessage::new()
                .content("hi")
                .reply_to("42")
                .suppress_mentions(),
        )
        .unwrap();
        assert_eq!(body["message_reference"]["message_id"], "42");
        assert_eq!(body["allowed_mentions"]["parse"], serde_json::json!([]));
        assert_eq!(body["allowed_mentions"]["replied_user"], false);
    }

    #[test]
    fn intents_bits_match_discord_values() {
        assert_eq!(Intents::GUILD_MESSAGES.bits(), 512);
        assert_eq!(Intents::DIRECT_MESSAGES.bits(), 4096);
        assert_eq!(Intents::MESSAGE_CONTENT.bits(), 32768);
    }
}
