//! Text generator for OpenAI-compatible chat completion APIs.
//!
//! Only available with the `openai` feature. Works against the OpenAI API and
//! local servers exposing `POST {base_url}/chat/completions` (Ollama, vLLM,
//! llama.cpp server).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::error::GenerationError;
use crate::generation::TextGenerator;

pub use govrag_index::openai::OPENAI_BASE_URL;

/// Sampling temperature used for every evaluation.
pub const TEMPERATURE: f32 = 0.1;

/// Upper bound on generated tokens per evaluation.
pub const MAX_TOKENS: u32 = 400;

/// A [`TextGenerator`] backed by an OpenAI-compatible chat completions endpoint.
pub struct OpenAiGenerator {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl OpenAiGenerator {
    /// Create a generator for `model` served at `base_url`.
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
            model: model.into(),
        }
    }

    /// Send `api_key` as a bearer token.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        let api_key = api_key.into();
        self.api_key = (!api_key.is_empty()).then_some(api_key);
        self
    }

    fn backend(&self) -> String {
        format!("openai-compatible:{}", self.model)
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatContent,
}

#[derive(Deserialize)]
struct ChatContent {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl TextGenerator for OpenAiGenerator {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        debug!(model = %self.model, prompt_len = prompt.len(), "requesting completion");

        let body = ChatRequest {
            model: &self.model,
            messages: [ChatMessage { role: "user", content: prompt }],
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
        };
        let mut request =
            self.client.post(format!("{}/chat/completions", self.base_url)).json(&body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await.map_err(|e| {
            error!(base_url = %self.base_url, error = %e, "completion request failed");
            if e.is_connect() || e.is_timeout() {
                GenerationError::Unavailable { backend: self.backend(), message: e.to_string() }
            } else {
                GenerationError::Backend { backend: self.backend(), message: e.to_string() }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            error!(%status, "completion API error");
            let message = format!("API returned {status}: {detail}");
            return Err(if status.is_server_error() {
                GenerationError::Unavailable { backend: self.backend(), message }
            } else {
                GenerationError::Backend { backend: self.backend(), message }
            });
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| GenerationError::Backend {
            backend: self.backend(),
            message: format!("failed to parse response: {e}"),
        })?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| GenerationError::Backend {
                backend: self.backend(),
                message: "response contained no completion".to_string(),
            })
    }
}
