//! Runtime configuration read from the environment.
//!
//! `DISCORD_TOKEN` is the only required variable; everything else has a
//! default suited to a DialoGPT-style model behind a local inference server.

use std::time::Duration;

use crate::error::ConfigError;
use crate::history::DEFAULT_HISTORY_LIMIT;
use crate::model::TokenId;

pub const DEFAULT_PREFIX: &str = "!";
pub const DEFAULT_MAX_LENGTH: usize = 1000;
pub const DEFAULT_INFERENCE_URL: &str = "http://127.0.0.1:8080";
pub const DEFAULT_INFERENCE_TIMEOUT: Duration = Duration::from_secs(120);
/// `<|endoftext|>` in the GPT-2 vocabulary DialoGPT uses.
pub const DEFAULT_EOS_TOKEN_ID: TokenId = 50256;
pub const DEFAULT_STATUS: &str = "Ask me anything!";

#[derive(Clone)]
pub struct BotConfig {
    pub token: String,
    pub command_prefix: String,
    /// `None` keeps every turn.
    pub history_limit: Option<usize>,
    /// Total token budget for one generation, input included.
    pub max_length: usize,
    pub personality: bool,
    pub inference_url: String,
    pub inference_timeout: Duration,
    pub eos_token_id: TokenId,
    pub status: String,
}

impl BotConfig {
    /// Config with the given token and every other field at its default.
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            command_prefix: DEFAULT_PREFIX.to_string(),
            history_limit: Some(DEFAULT_HISTORY_LIMIT),
            max_length: DEFAULT_MAX_LENGTH,
            personality: true,
            inference_url: DEFAULT_INFERENCE_URL.to_string(),
            inference_timeout: DEFAULT_INFERENCE_TIMEOUT,
            eos_token_id: DEFAULT_EOS_TOKEN_ID,
            status: DEFAULT_STATUS.to_string(),
        }
    }

    /// Read the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let token = lookup("DISCORD_TOKEN")
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or(ConfigError::MissingToken)?;

        let mut config = Self::with_token(token);

        if let Some(prefix) = lookup("COMMAND_PREFIX") {
            if prefix.trim().is_empty() || prefix.contains(char::is_whitespace) {
                return Err(ConfigError::Invalid {
                    var: "COMMAND_PREFIX",
                    value: prefix,
                });
            }
            config.command_prefix = prefix;
        }
        if let Some(limit) = parse::<usize>(&lookup, "HISTORY_LIMIT")? {
            config.history_limit = (limit > 0).then_some(limit);
        }
        if let Some(max_length) = parse::<usize>(&lookup, "MAX_LENGTH")? {
            if max_length < 2 {
                return Err(ConfigError::Invalid {
                    var: "MAX_LENGTH",
                    value: max_length.to_string(),
                });
            }
            config.max_length = max_length;
        }
        if let Some(raw) = lookup("PERSONALITY") {
            config.personality = parse_bool(&raw).ok_or(ConfigError::Invalid {
                var: "PERSONALITY",
                value: raw,
            })?;
        }
        if let Some(url) = lookup("INFERENCE_URL") {
            config.inference_url = url.trim_end_matches('/').to_string();
        }
        if let Some(secs) = parse::<u64>(&lookup, "INFERENCE_TIMEOUT_SECS")? {
            config.inference_timeout = Duration::from_secs(secs);
        }
        if let Some(eos) = parse::<TokenId>(&lookup, "EOS_TOKEN_ID")? {
            config.eos_token_id = eos;
        }
        if let Some(status) = lookup("BOT_STATUS") {
            config.status = status;
        }

        Ok(config)
    }
}

impl std::fmt::Debug for BotConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BotConfig")
            .field("token", &"<redacted>")
            .field("command_prefix", &self.command_prefix)
            .field("history_limit", &self.history_limit)
            .field("max_length", &self.max_length)
            .field("personality", &self.personality)
            .field("inference_url", &self.inference_url)
            .field("inference_timeout", &self.inference_timeout)
            .field("eos_token_id", &self.eos_token_id)
            .field("status", &self.status)
            .finish()
    }
}

fn parse<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { var, value: raw }),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var: &str| map.get(var).cloned()
    }

    #[test]
    fn missing_token_is_fatal() {
        let err = BotConfig::from_lookup(lookup(&[])).unwrap_err();
        assert_eq!(err, ConfigError::MissingToken);
    }

    #[test]
    fn blank_token_is_fatal() {
        let err = BotConfig::from_lookup(lookup(&[("DISCORD_TOKEN", "  ")])).unwrap_err();
        assert_eq!(err, ConfigError::MissingToken);
    }

    #[test]
    fn defaults_apply() {
        let config = BotConfig::from_lookup(lookup(&[("DISCORD_TOKEN", "abc")])).unwrap();
        assert_eq!(config.token, "abc");
        assert_eq!(config.command_prefix, "!");
        assert_eq!(config.history_limit, Some(10));
        assert_eq!(config.max_length, 1000);
        assert!(config.personality);
        assert_eq!(config.inference_url, DEFAULT_INFERENCE_URL);
        assert_eq!(config.eos_token_id, 50256);
        assert_eq!(config.status, "Ask me anything!");
    }

    #[test]
    fn overrides_apply() {
        let config = BotConfig::from_lookup(lookup(&[
            ("DISCORD_TOKEN", "abc"),
            ("COMMAND_PREFIX", "?"),
            ("HISTORY_LIMIT", "4"),
            ("MAX_LENGTH", "512"),
            ("PERSONALITY", "off"),
            ("INFERENCE_URL", "http://model:9000/"),
            ("INFERENCE_TIMEOUT_SECS", "5"),
            ("EOS_TOKEN_ID", "2"),
        ]))
        .unwrap();
        assert_eq!(config.command_prefix, "?");
        assert_eq!(config.history_limit, Some(4));
        assert_eq!(config.max_length, 512);
        assert!(!config.personality);
        assert_eq!(config.inference_url, "http://model:9000");
        assert_eq!(config.inference_timeout, Duration::from_secs(5));
        assert_eq!(config.eos_token_id, 2);
    }

    #[test]
    fn zero_history_limit_means_unbounded() {
        let config =
            BotConfig::from_lookup(lookup(&[("DISCORD_TOKEN", "abc"), ("HISTORY_LIMIT", "0")]))
                .unwrap();
        assert_eq!(config.history_limit, None);
    }

    #[test]
    fn malformed_numbers_are_rejected() {
        let err =
            BotConfig::from_lookup(lookup(&[("DISCORD_TOKEN", "abc"), ("MAX_LENGTH", "lots")]))
                .unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                var: "MAX_LENGTH",
                value: "lots".to_string()
            }
        );
    }

    #[test]
    fn malformed_bool_is_rejected() {
        let err =
            BotConfig::from_lookup(lookup(&[("DISCORD_TOKEN", "abc"), ("PERSONALITY", "maybe")]))
                .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "PERSONALITY", .. }));
    }

    #[test]
    fn debug_redacts_token() {
        let config = BotConfig::with_token("super-secret");
        let debug = format!("{:?}", config);
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("<redacted>"));
    }
}
