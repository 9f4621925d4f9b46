//! The conversational language model seen from the bot's side.
//!
//! The bot only ever needs three operations: turn text into tokens, continue
//! a token sequence, and turn tokens back into text. [`ChatModel`] is that
//! seam; [`crate::llama`] provides the HTTP-backed implementation.

use async_trait::async_trait;
use thiserror::Error;

pub type TokenId = u32;

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("inference transport error: {0}")]
    Transport(String),
    #[error("inference server returned {status} on {endpoint}: {body}")]
    Status {
        status: u16,
        endpoint: &'static str,
        body: String,
    },
    #[error("malformed inference response from {endpoint}: {reason}")]
    Decode {
        endpoint: &'static str,
        reason: String,
    },
    #[error("query of {query_len} tokens does not fit in max length {max_length}")]
    ContextOverflow { query_len: usize, max_length: usize },
    #[error("model produced an empty response")]
    EmptyResponse,
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Token that terminates every turn.
    fn eos_token_id(&self) -> TokenId;

    /// Tokenize `text` without adding any special tokens.
    async fn encode(&self, text: &str) -> Result<Vec<TokenId>, InferenceError>;

    /// Continue `input` until EOS or until the whole sequence reaches
    /// `max_length` tokens. Returns `input` followed by the continuation.
    async fn generate(
        &self,
        input: &[TokenId],
        max_length: usize,
    ) -> Result<Vec<TokenId>, InferenceError>;

    /// Turn tokens back into text.
    async fn decode(&self, tokens: &[TokenId]) -> Result<String, InferenceError>;

    /// Encode `text` as a complete turn, EOS appended.
    async fn encode_turn(&self, text: &str) -> Result<Vec<TokenId>, InferenceError> {
        let mut tokens = self.encode(text).await?;
        tokens.push(self.eos_token_id());
        Ok(tokens)
    }

    /// Decode with the EOS token stripped out.
    async fn decode_skipping_special(&self, tokens: &[TokenId]) -> Result<String, InferenceError> {
        let eos = self.eos_token_id();
        let filtered: Vec<TokenId> = tokens.iter().copied().filter(|t| *t != eos).collect();
        if filtered.is_empty() {
            return Ok(String::new());
        }
        self.decode(&filtered).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
