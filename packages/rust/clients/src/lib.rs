//! HTTP clients for the external services the pipeline consumes.
//!
//! Each service sits behind a trait so stages can be driven by fakes:
//! - [`TextGenerator`]: OpenAI-compatible chat completions
//! - [`Embedder`]: OpenAI-compatible embeddings
//! - [`SearchClient`]: search-results API used for fact verification
//! - [`CmsClient`] / [`CmsConnector`]: WordPress REST drafts

mod cms;
mod embedding;
mod search;
mod text;

use std::time::Duration;

use contentforge_shared::{ContentForgeError, Result};
use reqwest::{Client, Response};

pub use cms::{CmsClient, CmsConnector, DraftPost, RemotePost, WordPressClient, WordPressConnector};
pub use embedding::{Embedder, OpenAiEmbedder};
pub use search::{SearchClient, SearchHit, SerperSearchClient};
pub use text::{OpenAiTextGenerator, ResponseShape, TextGenerator, TextRequest};

/// User-Agent string sent with every request.
const USER_AGENT: &str = concat!("ContentForge/", env!("CARGO_PKG_VERSION"));

/// Longest error body echoed into an error message.
const MAX_ERROR_BODY_CHARS: usize = 300;

pub(crate) fn build_http_client(service: &'static str, timeout: Duration) -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
        .map_err(|e| {
            ContentForgeError::external(service, format!("failed to build HTTP client: {e}"))
        })
}

/// Turn a non-success response into an external service error.
pub(crate) async fn check_status(service: &'static str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let body: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
    Err(ContentForgeError::external(
        service,
        format!("HTTP {status}: {}", body.trim()),
    ))
}
