//! Ollama `/api/chat` backend.
//!
//! Ollama streams NDJSON by default. We ask for a single body but accept
//! either shape, concatenating `message.content` across chunks.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, ClientBuilder};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::LlmError;
use crate::llm::provider::{
    ChatMessage, CompletionRequest, CompletionResponse, FinishReason, LlmProvider,
};

const PROVIDER: &str = "ollama";

pub struct OllamaProvider {
    client: Client,
    endpoint: String,
    model: String,
    timeout: Duration,
}

impl OllamaProvider {
    pub fn new(base_url: &str, model: &str, timeout: Duration) -> Result<Self, LlmError> {
        let client = ClientBuilder::new()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::RequestFailed {
                provider: PROVIDER.into(),
                reason: format!("Failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            endpoint: format!("{}/api/chat", base_url.trim_end_matches('/')),
            model: model.to_string(),
            timeout,
        })
    }
}

#[derive(Serialize)]
struct ChatBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    #[serde(skip_serializing_if = "Options::is_empty")]
    options: Options,
}

#[derive(Serialize, Default)]
struct Options {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

impl Options {
    fn is_empty(&self) -> bool {
        self.temperature.is_none() && self.num_predict.is_none()
    }
}

#[derive(Deserialize)]
struct ChatChunk {
    #[serde(default)]
    message: Option<ChunkMessage>,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct ChunkMessage {
    #[serde(default)]
    content: String,
}

/// Fold a single JSON body or NDJSON stream into one response.
fn parse_chat_body(raw: &str) -> Result<CompletionResponse, LlmError> {
    let mut content = String::new();
    let mut input_tokens = 0;
    let mut output_tokens = 0;
    let mut finish = None;
    let mut parsed_any = false;

    for line in raw.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let chunk: ChatChunk = match serde_json::from_str(line) {
            Ok(chunk) => chunk,
            Err(e) => {
                debug!(error = %e, "Skipping undecodable Ollama chunk");
                continue;
            }
        };
        parsed_any = true;

        if let Some(error) = chunk.error {
            return Err(LlmError::InvalidResponse {
                provider: PROVIDER.into(),
                reason: error,
            });
        }
        if let Some(message) = chunk.message {
            content.push_str(&message.content);
        }
        if let Some(n) = chunk.prompt_eval_count {
            input_tokens = n;
        }
        if let Some(n) = chunk.eval_count {
            output_tokens = n;
        }
        if chunk.done_reason.is_some() {
            finish = chunk.done_reason;
        }
    }

    if !parsed_any {
        return Err(LlmError::InvalidResponse {
            provider: PROVIDER.into(),
            reason: "no decodable JSON in response body".into(),
        });
    }
    if content.trim().is_empty() {
        return Err(LlmError::EmptyResponse {
            provider: PROVIDER.into(),
        });
    }

    Ok(CompletionResponse {
        content: content.trim().to_string(),
        input_tokens,
        output_tokens,
        finish_reason: FinishReason::from_provider(finish.as_deref()),
    })
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let body = ChatBody {
            model: &self.model,
            messages: &request.messages,
            stream: false,
            options: Options {
                temperature: request.temperature,
                num_predict: request.max_tokens,
            },
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| super::transport_error(PROVIDER, self.timeout, e))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| super::transport_error(PROVIDER, self.timeout, e))?;

        if !status.is_success() {
            return Err(LlmError::Status {
                provider: PROVIDER.into(),
                status: status.as_u16(),
                body: text.chars().take(500).collect(),
            });
        }

        parse_chat_body(&text)
    }
}
