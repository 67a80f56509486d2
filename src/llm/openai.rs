//! OpenAI-compatible `/v1/chat/completions` backend.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, ClientBuilder};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::LlmError;
use crate::llm::provider::{
    ChatMessage, CompletionRequest, CompletionResponse, FinishReason, LlmProvider,
};

const PROVIDER: &str = "openai";

pub struct OpenAiProvider {
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<SecretString>,
    timeout: Duration,
}

impl OpenAiProvider {
    pub fn new(
        base_url: &str,
        model: &str,
        api_key: Option<SecretString>,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        let client = ClientBuilder::new()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::RequestFailed {
                provider: PROVIDER.into(),
                reason: format!("Failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            endpoint: format!("{}/v1/chat/completions", base_url.trim_end_matches('/')),
            model: model.to_string(),
            api_key,
            timeout,
        })
    }
}

#[derive(Serialize)]
struct ChatBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

fn parse_completion(raw: &str) -> Result<CompletionResponse, LlmError> {
    let completion: ChatCompletion =
        serde_json::from_str(raw).map_err(|e| LlmError::InvalidResponse {
            provider: PROVIDER.into(),
            reason: e.to_string(),
        })?;

    let choice = completion
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::EmptyResponse {
            provider: PROVIDER.into(),
        })?;

    let content = choice.message.content.unwrap_or_default();
    if content.trim().is_empty() {
        return Err(LlmError::EmptyResponse {
            provider: PROVIDER.into(),
        });
    }

    let (input_tokens, output_tokens) = completion
        .usage
        .map(|u| (u.prompt_tokens, u.completion_tokens))
        .unwrap_or_default();

    Ok(CompletionResponse {
        content: content.trim().to_string(),
        input_tokens,
        output_tokens,
        finish_reason: FinishReason::from_provider(choice.finish_reason.as_deref()),
    })
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let body = ChatBody {
            model: &self.model,
            messages: &request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let mut builder = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key.expose_secret());
        }

        let response = builder
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

        parse_completion(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_first_choice() {
        let raw = r#"{
            "choices": [{"message": {"role": "assistant", "content": " Hi there \n"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3}
        }"#;
        let response = parse_completion(raw).unwrap();
        assert_eq!(response.content, "Hi there");
        assert_eq!(response.input_tokens, 12);
        assert_eq!(response.output_tokens, 3);
        assert_eq!(response.finish_reason, FinishReason::Stop);
    }

    #[test]
    fn no_choices_is_empty() {
        assert!(matches!(
            parse_completion(r#"{"choices": []}"#),
            Err(LlmError::EmptyResponse { .. })
        ));
    }

    #[test]
    fn null_content_is_empty() {
        let raw = r#"{"choices": [{"message": {"content": null}}]}"#;
        assert!(matches!(
            parse_completion(raw),
            Err(LlmError::EmptyResponse { .. })
        ));
    }

    #[test]
    fn malformed_body_is_invalid() {
        assert!(matches!(
            parse_completion("upstream connect error"),
            Err(LlmError::InvalidResponse { .. })
        ));
    }
}
