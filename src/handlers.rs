//! Command handlers.
//!
//! [`CommandHandler`] owns everything a command needs (the model, the
//! history store, a few knobs) and turns one incoming message into at most
//! one reply. It never touches Discord directly, so the bot runtime decides
//! how replies are delivered and tests can drive it with a fake model.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::canned::{self, CannedKind};
use crate::commands::{help_text, Command};
use crate::error::CommandError;
use crate::history::{HistoryStore, Turn};
use crate::model::ChatModel;

pub const PONG_REPLY: &str = "🏓 Pong!";
pub const HISTORY_CLEARED_REPLY: &str = "🧹 Your conversation history has been cleared.";

/// Tunables for [`CommandHandler`].
#[derive(Debug, Clone)]
pub struct HandlerOptions {
    pub command_prefix: String,
    pub max_length: usize,
    pub personality: bool,
}

impl Default for HandlerOptions {
    fn default() -> Self {
        Self {
            command_prefix: crate::config::DEFAULT_PREFIX.to_string(),
            max_length: crate::config::DEFAULT_MAX_LENGTH,
            personality: true,
        }
    }
}

/// Who sent a command, for history keying and logs.
#[derive(Debug, Clone, Copy)]
pub struct Invoker<'a> {
    pub user_id: &'a str,
    pub tag: &'a str,
}

#[derive(Clone)]
pub struct CommandHandler {
    model: Arc<dyn ChatModel>,
    history: Arc<HistoryStore>,
    options: HandlerOptions,
}

impl CommandHandler {
    pub fn new(
        model: Arc<dyn ChatModel>,
        history: Arc<HistoryStore>,
        options: HandlerOptions,
    ) -> Self {
        Self {
            model,
            history,
            options,
        }
    }

    pub fn history(&self) -> &Arc<HistoryStore> {
        &self.history
    }

    /// Parse and run one message. Returns `None` when the message isn't a
    /// command; otherwise the text to send back, errors included.
    pub async fn respond(
        &self,
        invoker: Invoker<'_>,
        content: &str,
        bot_user_id: Option<&str>,
    ) -> Option<String> {
        let command = match Command::parse(content, &self.options.command_prefix, bot_user_id) {
            Ok(Some(command)) => command,
            Ok(None) => return None,
            Err(e) => {
                info!(user = invoker.tag, error = %e, "rejected command");
                return Some(e.user_message().to_string());
            }
        };

        info!(user = invoker.tag, command = command.name(), "handling command");

        match self.execute(invoker, command).await {
            Ok(reply) => Some(reply),
            Err(e) if e.is_user_error() => {
                warn!(user = invoker.tag, error = %e, "command failed");
                Some(e.user_message().to_string())
            }
            Err(e) => {
                error!(user = invoker.tag, error = %e, "command failed");
                Some(e.user_message().to_string())
            }
        }
    }

    /// Run an already-parsed command.
    pub async fn execute(
        &self,
        invoker: Invoker<'_>,
        command: Command,
    ) -> Result<String, CommandError> {
        match command {
            Command::Ask(query) => self.ask(invoker.user_id, &query).await,
            Command::Canned(kind) => Ok(self.canned(kind)),
            Command::ClearHistory => {
                self.history.clear(invoker.user_id).await;
                Ok(HISTORY_CLEARED_REPLY.to_string())
            }
            Command::Ping => Ok(PONG_REPLY.to_string()),
            Command::Help => Ok(help_text(&self.options.command_prefix)),
        }
    }

    fn canned(&self, kind: CannedKind) -> String {
        canned::pick(kind, &mut rand::thread_rng())
    }

    /// Generate an answer to `query` using the user's history as context.
    ///
    /// The user's conversation stays locked for the whole generation. The
    /// query and answer turns are only written back once the answer has
    /// been fully produced, so a failed request leaves history as it was.
    pub async fn ask(&self, user_id: &str, query: &str) -> Result<String, CommandError> {
        let mut conversation = self.history.lock(user_id).await;
        let max_length = self.options.max_length;

        let query_turn = self.model.encode_turn(query).await?;
        // Leave room for at least one generated token.
        let budget = max_length.saturating_sub(1);
        let input = conversation
            .context_with(&query_turn, budget)
            .ok_or(crate::model::InferenceError::ContextOverflow {
                query_len: query_turn.len(),
                max_length,
            })?;

        let output = self.model.generate(&input, max_length).await?;
        let generated = output.get(input.len()..).unwrap_or_default();
        let answer = self.model.decode_skipping_special(generated).await?;
        let answer = answer.trim();
        if answer.is_empty() {
            return Err(crate::model::InferenceError::EmptyResponse.into());
        }

        let answer_turn = self.model.encode_turn(answer).await?;
        conversation.push(Turn::user(query_turn));
        conversation.push(Turn::bot(answer_turn));
        drop(conversation);

        info!(
            user_id,
            input_tokens = input.len(),
            generated_tokens = generated.len(),
            "generated answer"
        );

        if self.options.personality {
            Ok(canned::with_personality(answer, &mut rand::thread_rng()))
        } else {
            Ok(answer.to_string())
        }
    }
}

impl std::fmt::Debug for CommandHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandHandler")
            .field("history", &self.history)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
