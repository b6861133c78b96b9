//! HTTP retrieval of feed documents.

use std::time::Duration;

use async_trait::async_trait;
use contentforge_shared::{ContentForgeError, FeedEntry, Result};
use reqwest::Client;
use tracing::debug;

use crate::parser::parse_feed;

/// User-Agent string sent with every feed request.
const USER_AGENT: &str = concat!("ContentForge/", env!("CARGO_PKG_VERSION"));

/// Fetches one feed and returns its normalized entries.
#[async_trait]
pub trait FeedFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<FeedEntry>>;
}

/// [`FeedFetcher`] over HTTP(S) with `reqwest`.
pub struct HttpFeedFetcher {
    client: Client,
}

impl HttpFeedFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(timeout)
            .build()
            .map_err(|e| {
                ContentForgeError::external("feed", format!("failed to build HTTP client: {e}"))
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl FeedFetcher for HttpFeedFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<FeedEntry>> {
        debug!(url, "fetching feed");
        let response = self
            .client
            .get(url)
            .header(
                reqwest::header::ACCEPT,
                "application/rss+xml, application/atom+xml, application/xml;q=0.9, */*;q=0.8",
            )
            .send()
            .await
            .map_err(|e| ContentForgeError::external("feed", format!("GET {url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ContentForgeError::external(
                "feed",
                format!("GET {url} returned HTTP {status}"),
            ));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ContentForgeError::external("feed", format!("reading {url}: {e}")))?;

        let entries = parse_feed(&body)?;
        debug!(url, entries = entries.len(), "parsed feed");
        Ok(entries)
    }
}
