//! Prefix-command parsing.
//!
//! A message is a command when it starts with the configured prefix, or when
//! it starts by mentioning the bot (`@bot ask ...` and `@bot !ask ...` both
//! work). Parsing is pure so routing rules can be tested without Discord.

use crate::canned::CannedKind;
use crate::error::CommandError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Ask(String),
    Canned(CannedKind),
    ClearHistory,
    Ping,
    Help,
}

impl Command {
    /// Every command name the bot answers to.
    pub const NAMES: &'static [&'static str] =
        &["ask", "joke", "quote", "fact", "clear_history", "ping", "help"];

    /// Parse a raw message.
    ///
    /// Returns `Ok(None)` when the message is not addressed to the bot at all,
    /// and `Err` when it is but names an unknown command or lacks an argument.
    pub fn parse(
        content: &str,
        prefix: &str,
        bot_user_id: Option<&str>,
    ) -> Result<Option<Command>, CommandError> {
        let Some(invocation) = strip_invocation(content.trim(), prefix, bot_user_id) else {
            return Ok(None);
        };

        let (name, args) = match invocation.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, rest.trim()),
            None => (invocation, ""),
        };

        if name.is_empty() {
            return Ok(None);
        }

        let command = match name {
            "ask" if args.is_empty() => {
                return Err(CommandError::MissingArgument {
                    command: "ask",
                    argument: "query",
                })
            }
            "ask" => Command::Ask(args.to_string()),
            "joke" => Command::Canned(CannedKind::Joke),
            "quote" => Command::Canned(CannedKind::Quote),
            "fact" => Command::Canned(CannedKind::Fact),
            "clear_history" => Command::ClearHistory,
            "ping" => Command::Ping,
            "help" => Command::Help,
            other => return Err(CommandError::UnknownCommand(other.to_string())),
        };
        Ok(Some(command))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::Ask(_) => "ask",
            Command::Canned(CannedKind::Joke) => "joke",
            Command::Canned(CannedKind::Quote) => "quote",
            Command::Canned(CannedKind::Fact) => "fact",
            Command::ClearHistory => "clear_history",
            Command::Ping => "ping",
            Command::Help => "help",
        }
    }
}

/// Strip the prefix or the leading bot mention, returning the
/// `name args...` remainder.
fn strip_invocation<'a>(
    content: &'a str,
    prefix: &str,
    bot_user_id: Option<&str>,
) -> Option<&'a str> {
    if let Some(rest) = content.strip_prefix(prefix) {
        return Some(rest);
    }

    let bid = bot_user_id?;
    let mention = format!("<@{}>", bid);
    let mention_nick = format!("<@!{}>", bid);
    let rest = content
        .strip_prefix(&mention)
        .or_else(|| content.strip_prefix(&mention_nick))?
        .trim_start();
    Some(rest.strip_prefix(prefix).unwrap_or(rest))
}

pub fn help_text(prefix: &str) -> String {
    format!(
        "🤖 **Available Commands:**\n\
         • `{p}ask <question>` - Chat with me (I remember our last few messages)\n\
         • `{p}joke` - Hear a joke\n\
         • `{p}quote` - Get an inspiring quote\n\
         • `{p}fact` - Learn a random fact\n\
         • `{p}clear_history` - Make me forget our conversation\n\
         • `{p}ping` - Check that I'm alive\n\
         • `{p}help` - Show this help message",
        p = prefix
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
