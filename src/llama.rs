//! [`ChatModel`] backed by a llama.cpp-compatible inference server.
//!
//! The server keeps the weights and the tokenizer; this client only moves
//! token ids around:
//!   - `POST /tokenize`   text → tokens
//!   - `POST /completion` tokens → continuation tokens
//!   - `POST /detokenize` tokens → text

use std::time::Duration;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::debug;

use crate::model::{ChatModel, InferenceError, TokenId};

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct TokenizeRequest<'a> {
    content: &'a str,
    add_special: bool,
}

#[derive(Debug, Deserialize)]
struct TokenizeResponse {
    tokens: Vec<TokenId>,
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    prompt: &'a [TokenId],
    n_predict: usize,
    return_tokens: bool,
    stream: bool,
    cache_prompt: bool,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    tokens: Vec<TokenId>,
    #[serde(default)]
    stopped_eos: bool,
}

#[derive(Debug, Serialize)]
struct DetokenizeRequest<'a> {
    tokens: &'a [TokenId],
}

#[derive(Debug, Deserialize)]
struct DetokenizeResponse {
    content: String,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Cheap to clone (reqwest's client is `Arc` inside).
#[derive(Debug, Clone)]
pub struct LlamaServerModel {
    base_url: String,
    eos_token_id: TokenId,
    client: reqwest::Client,
}

impl LlamaServerModel {
    pub fn new(
        base_url: impl Into<String>,
        eos_token_id: TokenId,
        timeout: Duration,
    ) -> Result<Self, InferenceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| InferenceError::Transport(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            eos_token_id,
            client,
        })
    }

    async fn post<B, T>(&self, endpoint: &'static str, body: &B) -> Result<T, InferenceError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, endpoint);
        let resp = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| InferenceError::Transport(e.to_string()))?;

        let status = resp.status();
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| InferenceError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(InferenceError::Status {
                status: status.as_u16(),
                endpoint,
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }

        serde_json::from_slice(&bytes).map_err(|e| {
            let raw = String::from_utf8_lossy(&bytes);
            let snippet: String = raw.chars().take(200).collect();
            InferenceError::Decode {
                endpoint,
                reason: format!("{}: {}", e, snippet),
            }
        })
    }
}

#[async_trait]
impl ChatModel for LlamaServerModel {
    fn eos_token_id(&self) -> TokenId {
        self.eos_token_id
    }

    async fn encode(&self, text: &str) -> Result<Vec<TokenId>, InferenceError> {
        let resp: TokenizeResponse = self
            .post(
                "/tokenize",
                &TokenizeRequest {
                    content: text,
                    add_special: false,
                },
            )
            .await?;
        Ok(resp.tokens)
    }

    async fn generate(
        &self,
        input: &[TokenId],
        max_length: usize,
    ) -> Result<Vec<TokenId>, InferenceError> {
        let n_predict = max_length.saturating_sub(input.len());
        if n_predict == 0 {
            return Err(InferenceError::ContextOverflow {
                query_len: input.len(),
                max_length,
            });
        }

        let resp: CompletionResponse = self
            .post(
                "/completion",
                &CompletionRequest {
                    prompt: input,
                    n_predict,
                    return_tokens: true,
                    stream: false,
                    cache_prompt: true,
                },
            )
            .await?;

        debug!(
            input_tokens = input.len(),
            generated = resp.tokens.len(),
            stopped_eos = resp.stopped_eos,
            "completion finished"
        );

        let mut output = Vec::with_capacity(input.len() + resp.tokens.len());
        output.extend_from_slice(input);
        output.extend(resp.tokens.into_iter().take(n_predict));
        Ok(output)
    }

    async fn decode(&self, tokens: &[TokenId]) -> Result<String, InferenceError> {
        let resp: DetokenizeResponse = self
            .post("/detokenize", &DetokenizeRequest { tokens })
            .await?;
        Ok(resp.content)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
