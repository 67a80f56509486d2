//! Reasoning-service integration.
//!
//! Supports:
//! - **Ollama**: local `/api/chat`, the default backend
//! - **OpenAI-compatible**: any `/v1/chat/completions` endpoint
//!
//! The service is optional and unreliable by contract. Nothing in the
//! pipeline fails because of it; callers fall back to deterministic logic.

mod ollama;
mod openai;
pub mod provider;

pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;
pub use provider::*;

use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::{ConfigError, LlmError};

/// Default request timeout for the reasoning service.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Supported reasoning-service backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmBackend {
    Ollama,
    OpenAi,
}

impl LlmBackend {
    fn default_base_url(self) -> &'static str {
        match self {
            Self::Ollama => "http://127.0.0.1:11434",
            Self::OpenAi => "https://api.openai.com",
        }
    }

    fn default_model(self) -> &'static str {
        match self {
            Self::Ollama => "mistral",
            Self::OpenAi => "gpt-4o-mini",
        }
    }
}

/// Configuration for creating a provider.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub backend: LlmBackend,
    pub base_url: String,
    pub model: String,
    pub api_key: Option<SecretString>,
    pub timeout: Duration,
}

impl LlmConfig {
    /// Load from environment variables. `Ok(None)` when no backend is configured.
    ///
    /// - `TRIAGE_LLM_BACKEND`: `ollama` | `openai` | `none` (unset means none)
    /// - `TRIAGE_LLM_BASE_URL`, `TRIAGE_LLM_MODEL`: per-backend defaults
    /// - `TRIAGE_LLM_API_KEY`: required for the hosted OpenAI endpoint
    /// - `TRIAGE_LLM_TIMEOUT_SECS`: default 30
    pub fn from_env() -> Result<Option<Self>, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable variable source.
    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Option<Self>, ConfigError> {
        let backend = match lookup("TRIAGE_LLM_BACKEND")
            .map(|b| b.trim().to_ascii_lowercase())
            .as_deref()
        {
            None | Some("") | Some("none") => return Ok(None),
            Some("ollama") => LlmBackend::Ollama,
            Some("openai") => LlmBackend::OpenAi,
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    key: "TRIAGE_LLM_BACKEND".into(),
                    message: format!("unknown backend '{}'", other),
                });
            }
        };

        let base_url = lookup("TRIAGE_LLM_BASE_URL")
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| backend.default_base_url().to_string());
        let model = lookup("TRIAGE_LLM_MODEL")
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| backend.default_model().to_string());
        let api_key = lookup("TRIAGE_LLM_API_KEY")
            .filter(|k| !k.is_empty())
            .map(SecretString::from);

        if backend == LlmBackend::OpenAi
            && api_key.is_none()
            && base_url == backend.default_base_url()
        {
            return Err(ConfigError::MissingEnvVar("TRIAGE_LLM_API_KEY".into()));
        }

        let timeout_secs = match lookup("TRIAGE_LLM_TIMEOUT_SECS") {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .map_err(|e| ConfigError::InvalidValue {
                    key: "TRIAGE_LLM_TIMEOUT_SECS".into(),
                    message: e.to_string(),
                })?,
            None => DEFAULT_TIMEOUT_SECS,
        };

        Ok(Some(Self {
            backend,
            base_url,
            model,
            api_key,
            timeout: Duration::from_secs(timeout_secs),
        }))
    }
}

/// Create a provider from configuration.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    match config.backend {
        LlmBackend::Ollama => {
            let provider = OllamaProvider::new(&config.base_url, &config.model, config.timeout)?;
            tracing::info!("Using Ollama (model: {}, url: {})", config.model, config.base_url);
            Ok(Arc::new(provider))
        }
        LlmBackend::OpenAi => {
            let provider = OpenAiProvider::new(
                &config.base_url,
                &config.model,
                config.api_key.clone(),
                config.timeout,
            )?;
            tracing::info!("Using OpenAI-compatible endpoint (model: {})", config.model);
            Ok(Arc::new(provider))
        }
    }
}

/// Map a transport failure, keeping timeouts distinguishable.
pub(crate) fn transport_error(provider: &str, timeout: Duration, e: reqwest::Error) -> LlmError {
    if e.is_timeout() {
        LlmError::Timeout {
            provider: provider.to_string(),
            timeout,
        }
    } else {
        LlmError::RequestFailed {
            provider: provider.to_string(),
            reason: e.to_string(),
        }
    }
}

/// Extract a JSON object from model output (handles markdown wrapping).
pub fn extract_json_object(text: &str) -> String {
    let trimmed = text.trim();

    if trimmed.starts_with('{') {
        return trimmed.to_string();
    }

    // Fenced block, tagged or not
    for fence in ["```json", "```"] {
        if let Some(start) = trimmed.find(fence) {
            let after = &trimmed[start + fence.len()..];
            if let Some(end) = after.find("```") {
                let inner = after[..end].trim();
                if inner.starts_with('{') {
                    return inner.to_string();
                }
            }
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && end > start
    {
        return trimmed[start..=end].to_string();
    }

    trimmed.to_string()
}


#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn unset_backend_means_no_service() {
        assert!(LlmConfig::from_lookup(lookup(&[])).unwrap().is_none());
        assert!(
            LlmConfig::from_lookup(lookup(&[("TRIAGE_LLM_BACKEND", "none")]))
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn ollama_defaults() {
        let config = LlmConfig::from_lookup(lookup(&[("TRIAGE_LLM_BACKEND", "Ollama")]))
            .unwrap()
            .unwrap();
        assert_eq!(config.backend, LlmBackend::Ollama);
        assert_eq!(config.base_url, "http://127.0.0.1:11434");
        assert_eq!(config.model, "mistral");
        assert_eq!(config.timeout, Duration::from_secs(DEFAULT_TIMEOUT_SECS));
    }

    #[test]
    fn hosted_openai_requires_key() {
        let result = LlmConfig::from_lookup(lookup(&[("TRIAGE_LLM_BACKEND", "openai")]));
        assert!(matches!(result, Err(ConfigError::MissingEnvVar(_))));

        let local = LlmConfig::from_lookup(lookup(&[
            ("TRIAGE_LLM_BACKEND", "openai"),
            ("TRIAGE_LLM_BASE_URL", "http://localhost:8080"),
        ]))
        .unwrap()
        .unwrap();
        assert!(local.api_key.is_none());
    }

    #[test]
    fn bad_backend_and_timeout_rejected() {
        assert!(LlmConfig::from_lookup(lookup(&[("TRIAGE_LLM_BACKEND", "gpt")])).is_err());
        assert!(
            LlmConfig::from_lookup(lookup(&[
                ("TRIAGE_LLM_BACKEND", "ollama"),
                ("TRIAGE_LLM_TIMEOUT_SECS", "soon"),
            ]))
            .is_err()
        );
    }

    #[test]
    fn create_provider_reports_model() {
        let config = LlmConfig {
            backend: LlmBackend::OpenAi,
            base_url: "http://localhost:8080".into(),
            model: "local-model".into(),
            api_key: Some(SecretString::from("sk-test")),
            timeout: Duration::from_secs(5),
        };
        let provider = create_provider(&config).unwrap();
        assert_eq!(provider.model_name(), "local-model");
    }

    #[test]
    fn extract_json_direct_object() {
        let input = r#"{"job_related": true}"#;
        assert_eq!(extract_json_object(input), input);
    }

    #[test]
    fn extract_json_from_markdown_block() {
        let input = "```json\n{\"rate\": \"90\"}\n```";
        assert_eq!(extract_json_object(input), "{\"rate\": \"90\"}");
    }

    #[test]
    fn extract_json_from_untagged_fence() {
        let input = "Here you go:\n```\n{\"rate\": \"90\"}\n```";
        assert_eq!(extract_json_object(input), "{\"rate\": \"90\"}");
    }

    #[test]
    fn extract_json_embedded_in_text() {
        let input = "Sure! {\"not_related\": false} Hope that helps.";
        assert_eq!(extract_json_object(input), "{\"not_related\": false}");
    }
}
