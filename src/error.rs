//! Error kinds for every layer of the bot.
//!
//! Startup errors ([`ConfigError`], [`BotError`]) are fatal. Per-invocation
//! errors ([`CommandError`]) are turned into a user-facing reply and never
//! take the process down.

use thiserror::Error;

use crate::model::InferenceError;

// ---------------------------------------------------------------------------
// User-visible replies
// ---------------------------------------------------------------------------

pub const UNKNOWN_COMMAND_REPLY: &str =
    "Oops! That command was not found. Type `!help` to see the list of available commands.";
pub const MISSING_ARGUMENT_REPLY: &str =
    "It looks like you missed a required argument. Please check the command and try again.";
pub const INFERENCE_FAILED_REPLY: &str =
    "Sorry, there was an error processing your request. Please try again later.";
pub const UNEXPECTED_ERROR_REPLY: &str = "An unexpected error occurred. Please try again later.";

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("DISCORD_TOKEN not found in environment variables")]
    MissingToken,
    #[error("invalid value for {var}: {value:?}")]
    Invalid { var: &'static str, value: String },
}

// ---------------------------------------------------------------------------
// Command invocation
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("unknown command `{0}`")]
    UnknownCommand(String),
    #[error("command `{command}` is missing its `{argument}` argument")]
    MissingArgument {
        command: &'static str,
        argument: &'static str,
    },
    #[error("inference failed: {0}")]
    Inference(#[from] InferenceError),
}

impl CommandError {
    /// The fixed text sent back to the channel for this failure.
    pub fn user_message(&self) -> &'static str {
        match self {
            CommandError::UnknownCommand(_) => UNKNOWN_COMMAND_REPLY,
            CommandError::MissingArgument { .. } => MISSING_ARGUMENT_REPLY,
            CommandError::Inference(_) => INFERENCE_FAILED_REPLY,
        }
    }

    /// Routing errors are the user's mistake; everything else is ours.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            CommandError::UnknownCommand(_) | CommandError::MissingArgument { .. }
        )
    }
}

// ---------------------------------------------------------------------------
// Startup
// ---------------------------------------------------------------------------

/// Fatal errors that stop the bot from starting.
#[derive(Debug, Error)]
pub enum BotError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to start gateway: {0}")]
    Gateway(String),
    #[error("failed to build {client} client: {reason}")]
    Client {
        client: &'static str,
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routing_errors_map_to_fixed_replies() {
        let unknown = CommandError::UnknownCommand("dance".to_string());
        assert_eq!(unknown.user_message(), UNKNOWN_COMMAND_REPLY);
        assert!(unknown.is_user_error());

        let missing = CommandError::MissingArgument {
            command: "ask",
            argument: "query",
        };
        assert_eq!(missing.user_message(), MISSING_ARGUMENT_REPLY);
        assert!(missing.is_user_error());
    }

    #[test]
    fn inference_errors_are_not_user_errors() {
        let err = CommandError::from(InferenceError::EmptyResponse);
        assert_eq!(err.user_message(), INFERENCE_FAILED_REPLY);
        assert!(!err.is_user_error());
    }

    #[test]
    fn unknown_command_reply_points_at_help() {
        assert!(UNKNOWN_COMMAND_REPLY.contains("!help"));
    }

    #[test]
    fn config_error_display_names_the_variable() {
        let err = ConfigError::Invalid {
            var: "HISTORY_LIMIT",
            value: "ten".to_string(),
        };
        assert_eq!(err.to_string(), "invalid value for HISTORY_LIMIT: \"ten\"");
    }
}
