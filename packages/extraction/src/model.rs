//! Language-model collaborator, consumed as an opaque function
//! `prompt -> {value, confidence, context}`.
//!
//! The pipeline only depends on the [`FieldModel`] trait. The shipped
//! implementation talks to any OpenAI-compatible chat-completions endpoint
//! (LM Studio, Ollama, vLLM, hosted APIs).

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;

use crate::error::{ModelError, ModelResult};
use crate::types::config::ModelConfig;
use crate::types::field::Candidate;

const SYSTEM_PROMPT: &str = "Voce e um assistente especialista em ler Fichas de Dados de \
    Seguranca (FDS) de produtos quimicos. Responda sempre em JSON com os campos \
    {\"value\": \"...\", \"confidence\": 0.0-1.0, \"context\": \"...\"} e nunca invente dados.";

/// Seam over the model completion service.
#[async_trait]
pub trait FieldModel: Send + Sync {
    /// Ask the model for one field over one prompt.
    ///
    /// Implementations surface transport and protocol problems as
    /// [`ModelError`]; the orchestrator degrades those to a low-confidence
    /// placeholder instead of aborting the document.
    async fn extract_field(&self, field_label: &str, prompt: &str) -> ModelResult<Candidate>;

    /// Free-form completion, used by the model-backed online search.
    async fn complete(&self, system_prompt: &str, prompt: &str) -> ModelResult<String>;
}

/// Client for OpenAI-compatible chat-completions endpoints.
pub struct OpenAiCompatModel {
    http: reqwest::Client,
    config: ModelConfig,
    api_key: Option<SecretString>,
}

impl OpenAiCompatModel {
    pub fn new(config: ModelConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            api_key: None,
        }
    }

    /// Attach a bearer token for hosted endpoints.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(SecretString::from(api_key.into()));
        self
    }

    async fn chat(&self, system_prompt: &str, prompt: &str) -> ModelResult<String> {
        #[derive(Deserialize)]
        struct ChatResponse {
            #[serde(default)]
            choices: Vec<Choice>,
        }

        #[derive(Deserialize)]
        struct Choice {
            message: Message,
        }

        #[derive(Deserialize)]
        struct Message {
            #[serde(default)]
            content: String,
        }

        let body = json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": prompt},
            ],
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
        });

        let mut request = self
            .http
            .post(format!("{}/chat/completions", self.config.base_url))
            .timeout(self.config.timeout)
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.expose_secret());
        }

        let response = request
            .send()
            .await
            .map_err(|e| ModelError::Http(Box::new(e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ModelError::Status {
                status: status.as_u16(),
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ModelError::Http(Box::new(e)))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();
        if content.trim().is_empty() {
            return Err(ModelError::EmptyResponse);
        }
        Ok(content)
    }
}

#[async_trait]
impl FieldModel for OpenAiCompatModel {
    async fn extract_field(&self, field_label: &str, prompt: &str) -> ModelResult<Candidate> {
        tracing::info!(field = field_label, "consulting model");
        let raw = self.chat(SYSTEM_PROMPT, prompt.trim()).await?;
        tracing::debug!(field = field_label, reply = %raw, "model reply");
        Ok(parse_model_reply(&raw))
    }

    async fn complete(&self, system_prompt: &str, prompt: &str) -> ModelResult<String> {
        self.chat(system_prompt, prompt).await
    }
}

/// Strip a Markdown code fence around a JSON payload, if present.
pub(crate) fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    for fence in ["```json", "```"] {
        if let Some(rest) = trimmed.strip_prefix(fence) {
            if let Some(end) = rest.find("```") {
                return rest[..end].trim();
            }
            return rest.trim();
        }
    }
    trimmed
}

/// Parse the model's JSON reply into a candidate.
///
/// Malformed replies degrade to the raw text as the value at a fixed low
/// confidence rather than failing the call.
pub(crate) fn parse_model_reply(raw: &str) -> Candidate {
    #[derive(Deserialize)]
    struct Reply {
        value: Option<String>,
        confidence: Option<f64>,
        #[serde(default)]
        context: String,
    }

    let content = strip_code_fence(raw);
    match serde_json::from_str::<Reply>(content) {
        Ok(reply) => Candidate::new(
            reply.value.unwrap_or_else(|| crate::types::field::NOT_FOUND.to_string()),
            reply.confidence.unwrap_or(0.0),
        )
        .with_context(reply.context),
        Err(_) => {
            tracing::warn!("model reply was not valid JSON");
            Candidate::new(content, 0.4)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_formed_reply_is_parsed() {
        let candidate =
            parse_model_reply(r#"{"value": "1090", "confidence": 0.92, "context": "Secao 14"}"#);
        assert_eq!(candidate.value, "1090");
        assert_eq!(candidate.confidence, 0.92);
        assert_eq!(candidate.context, "Secao 14");
    }

    #[test]
    fn fenced_reply_is_unwrapped() {
        let raw = "```json\n{\"value\": \"II\", \"confidence\": 0.8}\n```";
        let candidate = parse_model_reply(raw);
        assert_eq!(candidate.value, "II");
        assert_eq!(candidate.confidence, 0.8);
    }

    #[test]
    fn non_json_reply_degrades_to_low_confidence() {
        let candidate = parse_model_reply("O numero ONU e 1090.");
        assert_eq!(candidate.value, "O numero ONU e 1090.");
        assert_eq!(candidate.confidence, 0.4);
    }

    #[test]
    fn out_of_range_confidence_is_clamped() {
        let candidate = parse_model_reply(r#"{"value": "x", "confidence": 3.0}"#);
        assert_eq!(candidate.confidence, 1.0);
    }

    #[test]
    fn missing_value_becomes_not_found() {
        let candidate = parse_model_reply(r#"{"confidence": 0.1}"#);
        assert_eq!(candidate.value, crate::types::field::NOT_FOUND);
    }
}
