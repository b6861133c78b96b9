//! Embedding service over an OpenAI-compatible `/embeddings` API.

use std::time::Duration;

use async_trait::async_trait;
use contentforge_shared::{ContentForgeError, EmbeddingConfig, Result, resolve_secret};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{build_http_client, check_status};

const SERVICE: &str = "embedding";

/// Text → fixed-length vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

pub struct OpenAiEmbedder {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

impl OpenAiEmbedder {
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

    pub fn from_config(config: &EmbeddingConfig, timeout: Duration) -> Result<Self> {
        let api_key = resolve_secret(&config.api_key_env, "embedding API key")?;
        Self::new(&config.base_url, api_key, &config.model, timeout)
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/embeddings", self.base_url);
        debug!(url = %url, model = %self.model, chars = text.len(), "requesting embedding");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest {
                model: &self.model,
                input: text,
            })
            .send()
            .await
            .map_err(|e| ContentForgeError::external(SERVICE, format!("request failed: {e}")))?;

        let response = check_status(SERVICE, response).await?;
        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| ContentForgeError::parse(format!("invalid embedding response: {e}")))?;

        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ContentForgeError::parse("embedding response has no vector"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contentforge_shared::ErrorKind;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn embedder(server: &MockServer) -> OpenAiEmbedder {
        OpenAiEmbedder::new(server.uri(), "k", "text-embedding-3-small", Duration::from_secs(5))
            .expect("build embedder")
    }

    #[tokio::test]
    async fn returns_first_vector() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .and(body_partial_json(json!({ "input": "hello" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{ "index": 0, "embedding": [0.25, -0.5, 1.0] }]
            })))
            .mount(&server)
            .await;

        let v = embedder(&server).embed("hello").await.unwrap();
        assert_eq!(v, vec![0.25, -0.5, 1.0]);
    }

    #[tokio::test]
    async fn empty_data_is_parse_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": [] })))
            .mount(&server)
            .await;

        let err = embedder(&server).embed("hello").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parse);
    }
}
