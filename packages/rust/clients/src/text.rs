//! AI text generation over an OpenAI-compatible chat completions API.

use std::time::Duration;

use async_trait::async_trait;
use contentforge_shared::{AiConfig, ContentForgeError, Result, resolve_secret};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{build_http_client, check_status};

const SERVICE: &str = "ai";

/// Requested response shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    /// Prose or markup returned as-is.
    FreeText,
    /// A single JSON object (JSON mode).
    Structured,
}

/// One text-generation request.
#[derive(Debug, Clone)]
pub struct TextRequest {
    pub system: String,
    pub prompt: String,
    pub shape: ResponseShape,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

impl TextRequest {
    /// Low-temperature JSON request.
    pub fn structured(system: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            prompt: prompt.into(),
            shape: ResponseShape::Structured,
            temperature: 0.2,
            max_tokens: None,
        }
    }

    /// Higher-temperature prose request.
    pub fn free_text(system: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            prompt: prompt.into(),
            shape: ResponseShape::FreeText,
            temperature: 0.7,
            max_tokens: None,
        }
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// AI text-generation service. Returns the raw completion text; callers
/// validate structured payloads themselves.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, request: TextRequest) -> Result<String>;
}

/// [`TextGenerator`] for any OpenAI-compatible `/chat/completions` endpoint
/// (OpenAI, OpenRouter, local servers).
pub struct OpenAiTextGenerator {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiTextGenerator {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            client: build_http_client(SERVICE, timeout)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
        })
    }

    /// Build from the `[ai]` config section. A missing key is a config error.
    pub fn from_config(config: &AiConfig) -> Result<Self> {
        let api_key = resolve_secret(&config.api_key_env, "AI API key")?;
        Self::new(
            &config.base_url,
            api_key,
            &config.model,
            Duration::from_secs(config.timeout_secs),
        )
    }
}

#[async_trait]
impl TextGenerator for OpenAiTextGenerator {
    async fn generate(&self, request: TextRequest) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.prompt,
                },
            ],
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            response_format: (request.shape == ResponseShape::Structured)
                .then_some(ResponseFormat { kind: "json_object" }),
        };

        debug!(
            url = %url,
            model = %self.model,
            shape = ?request.shape,
            "sending completion request"
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ContentForgeError::external(SERVICE, format!("request failed: {e}")))?;

        let response = check_status(SERVICE, response).await?;
        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ContentForgeError::parse(format!("invalid completion response: {e}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| ContentForgeError::parse("completion response has no content"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contentforge_shared::ErrorKind;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn generator(server: &MockServer) -> OpenAiTextGenerator {
        OpenAiTextGenerator::new(server.uri(), "test-key", "test-model", Duration::from_secs(5))
            .expect("build generator")
    }

    fn completion(content: &str) -> serde_json::Value {
        json!({ "choices": [{ "message": { "role": "assistant", "content": content } }] })
    }

    #[tokio::test]
    async fn structured_request_uses_json_mode() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .and(body_partial_json(json!({
                "model": "test-model",
                "response_format": { "type": "json_object" }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion(r#"{"ok":true}"#)))
            .expect(1)
            .mount(&server)
            .await;

        let out = generator(&server)
            .generate(TextRequest::structured("system", "prompt"))
            .await
            .unwrap();
        assert_eq!(out, r#"{"ok":true}"#);
    }

    #[tokio::test]
    async fn free_text_request_returns_content() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("<p>Hello</p>")))
            .mount(&server)
            .await;

        let out = generator(&server)
            .generate(TextRequest::free_text("system", "prompt").max_tokens(100))
            .await
            .unwrap();
        assert_eq!(out, "<p>Hello</p>");
    }

    #[tokio::test]
    async fn server_error_is_external_service_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
            .mount(&server)
            .await;

        let err = generator(&server)
            .generate(TextRequest::free_text("s", "p"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ExternalService);
        assert!(err.to_string().contains("429"));
    }

    #[tokio::test]
    async fn empty_choices_is_parse_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })))
            .mount(&server)
            .await;

        let err = generator(&server)
            .generate(TextRequest::structured("s", "p"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parse);
    }

    #[test]
    fn missing_key_is_config_error() {
        let config = AiConfig {
            api_key_env: "CF_TEST_MISSING_AI_KEY_98765".into(),
            ..AiConfig::default()
        };
        let err = OpenAiTextGenerator::from_config(&config).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Config);
    }
}
