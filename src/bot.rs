//! Core bot infrastructure: wiring, gateway bridge, and async event loop.
//!
//! This module owns the "engine" of the bot: building the REST and
//! inference clients, connecting to Discord's gateway, and dispatching each
//! command message to a [`CommandHandler`] on its own task.

use std::sync::Arc;
use std::time::Instant;

use async_lock::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::config::BotConfig;
use crate::error::{BotError, UNEXPECTED_ERROR_REPLY};
use crate::events::GatewayEvent;
use crate::gateway::{self, GatewayConfig};
use crate::handlers::{CommandHandler, HandlerOptions, Invoker};
use crate::history::HistoryStore;
use crate::http::DiscordHttpClient;
use crate::llama::LlamaServerModel;
use crate::types::{CreateMessage, Intents, Message, ReadyEvent, UpdatePresence};

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Bot identity and lifecycle state.
#[derive(Debug)]
pub struct BotState {
    /// The bot's own user ID (set on READY).
    bot_user_id: RwLock<Option<String>>,
    /// When the bot started.
    pub start_time: Instant,
}

impl Default for BotState {
    fn default() -> Self {
        Self {
            bot_user_id: RwLock::new(None),
            start_time: Instant::now(),
        }
    }
}

impl BotState {
    pub async fn bot_user_id(&self) -> Option<String> {
        self.bot_user_id.read().await.clone()
    }

    pub async fn set_bot_user_id(&self, id: impl Into<String>) {
        *self.bot_user_id.write().await = Some(id.into());
    }
}

// ---------------------------------------------------------------------------
// Gateway intents
// ---------------------------------------------------------------------------

/// Guild and DM messages, with their content.
pub fn gateway_intents() -> Intents {
    Intents::GUILDS | Intents::GUILD_MESSAGES | Intents::DIRECT_MESSAGES | Intents::MESSAGE_CONTENT
}

// ---------------------------------------------------------------------------
// Bot entry point
// ---------------------------------------------------------------------------

/// Build every client from `config`, connect to the gateway, and run the
/// event loop until the gateway gives up.
pub async fn start(config: BotConfig) -> Result<(), BotError> {
    info!(config = ?config, "starting bot");

    let http = DiscordHttpClient::new(&config.token).map_err(|e| BotError::Client {
        client: "discord",
        reason: e.to_string(),
    })?;

    let model = LlamaServerModel::new(
        &config.inference_url,
        config.eos_token_id,
        config.inference_timeout,
    )
    .map_err(|e| BotError::Client {
        client: "inference",
        reason: e.to_string(),
    })?;

    let history = Arc::new(HistoryStore::new(config.history_limit));
    let handler = CommandHandler::new(
        Arc::new(model),
        history,
        HandlerOptions {
            command_prefix: config.command_prefix.clone(),
            max_length: config.max_length,
            personality: config.personality,
        },
    );
    let state = BotState::default();

    let gw = gateway::connect(GatewayConfig {
        token: config.token.clone(),
        intents: gateway_intents(),
    });

    info!("gateway driver started, entering event loop");

    // ----- Main event loop -----
    while let Ok(event) = gw.events.recv().await {
        match event {
            GatewayEvent::Ready(ready) => {
                on_ready(&state, &gw.sender, &config.status, ready).await;
            }

            GatewayEvent::MessageCreate(msg) => {
                if msg.author.bot {
                    continue;
                }
                let bot_user_id = state.bot_user_id().await;
                dispatch_message(handler.clone(), http.clone(), msg, bot_user_id);
            }

            // Heartbeats, reconnects and invalid sessions are handled by the
            // gateway driver.
            GatewayEvent::HeartbeatAck
            | GatewayEvent::HeartbeatRequest
            | GatewayEvent::Reconnect
            | GatewayEvent::InvalidSession(_) => {}

            unknown @ GatewayEvent::Unknown { .. } => {
                trace!(event = ?unknown.unknown_name(), "unhandled gateway event");
            }
        }
    }

    match gw.driver_handle.await {
        Ok(()) => warn!("event stream ended, bot shutting down"),
        Err(e) => return Err(BotError::Gateway(e.to_string())),
    }
    Ok(())
}

async fn on_ready(
    state: &BotState,
    gateway: &async_channel::Sender<serde_json::Value>,
    status: &str,
    ready: ReadyEvent,
) {
    info!(
        user = %ready.user.tag(),
        guilds = ready.guilds.len(),
        "logged in"
    );
    state.set_bot_user_id(ready.user.id).await;

    if status.is_empty() {
        return;
    }
    let presence = UpdatePresence::playing(status).into_payload();
    if gateway.send(presence).await.is_err() {
        warn!("gateway closed before presence could be set");
    }
}

/// Answer one message on its own task so a slow `!ask` never blocks the
/// event loop or other users.
fn dispatch_message(
    handler: CommandHandler,
    http: DiscordHttpClient,
    msg: Message,
    bot_user_id: Option<String>,
) {
    let channel_id = msg.channel_id.clone();
    let message_id = msg.id.clone();
    let fallback_http = http.clone();

    tokio::spawn(async move {
        let task = tokio::spawn(reply_to_message(handler, http, msg, bot_user_id));
        reply_if_panicked(task, &fallback_http, &channel_id, message_id).await;
    });
}

/// Wait for a command task; if it panicked, answer the invoking message
/// with the generic error reply.
async fn reply_if_panicked(
    task: JoinHandle<()>,
    http: &DiscordHttpClient,
    channel_id: &str,
    message_id: String,
) {
    let Err(e) = task.await else {
        return;
    };
    if !e.is_panic() {
        return;
    }
    error!(message_id = %message_id, "command task panicked");
    let reply = CreateMessage::new()
        .content(UNEXPECTED_ERROR_REPLY)
        .reply_to(message_id)
        .suppress_mentions();
    if let Err(e) = http.create_message(channel_id, &reply).await {
        error!(error = %e, "failed to send error reply");
    }
}

async fn reply_to_message(
    handler: CommandHandler,
    http: DiscordHttpClient,
    msg: Message,
    bot_user_id: Option<String>,
) {
    let tag = msg.author.tag();
    let invoker = Invoker {
        user_id: &msg.author.id,
        tag: &tag,
    };

    let Some(reply) = handler
        .respond(invoker, &msg.content, bot_user_id.as_deref())
        .await
    else {
        return;
    };

    let reply = CreateMessage::new()
        .content(reply)
        .reply_to(msg.id.clone())
        .suppress_mentions();
    match http.create_message(&msg.channel_id, &reply).await {
        Ok(sent) => debug!(message_id = %sent.id, "reply sent"),
        Err(e) => error!(error = %e, channel_id = %msg.channel_id, "failed to send reply"),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
