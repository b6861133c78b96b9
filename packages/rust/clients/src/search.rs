//! Search-results API (Serper-style `POST {q}` → `organic[]`).

use std::time::Duration;

use async_trait::async_trait;
use contentforge_shared::{ContentForgeError, Result, SearchConfig, resolve_secret};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{build_http_client, check_status};

const SERVICE: &str = "search";

/// Results requested per query.
const RESULTS_PER_QUERY: u32 = 5;

/// One ranked search result.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub title: String,
    pub description: String,
}

#[async_trait]
pub trait SearchClient: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>>;
}

pub struct SerperSearchClient {
    client: Client,
    endpoint: String,
    api_key: String,
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    q: &'a str,
    num: u32,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    organic: Vec<OrganicResult>,
}

#[derive(Deserialize)]
struct OrganicResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    snippet: String,
}

impl SerperSearchClient {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            client: build_http_client(SERVICE, timeout)?,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        })
    }

    pub fn from_config(config: &SearchConfig, timeout: Duration) -> Result<Self> {
        let api_key = resolve_secret(&config.api_key_env, "search API key")?;
        Self::new(&config.endpoint, api_key, timeout)
    }
}

#[async_trait]
impl SearchClient for SerperSearchClient {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>> {
        debug!(endpoint = %self.endpoint, query, "searching");

        let response = self
            .client
            .post(&self.endpoint)
            .header("X-API-KEY", &self.api_key)
            .json(&SearchRequest {
                q: query,
                num: RESULTS_PER_QUERY,
            })
            .send()
            .await
            .map_err(|e| ContentForgeError::external(SERVICE, format!("request failed: {e}")))?;

        let response = check_status(SERVICE, response).await?;
        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| ContentForgeError::parse(format!("invalid search response: {e}")))?;

        Ok(parsed
            .organic
            .into_iter()
            .map(|r| SearchHit {
                title: r.title,
                description: r.snippet,
            })
            .collect())
    }
}
