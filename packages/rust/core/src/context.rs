//! Everything a pipeline operation needs: repositories, external services,
//! configuration, and the event and progress sinks.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use contentforge_clients::{
    CmsConnector, Embedder, OpenAiEmbedder, OpenAiTextGenerator, SearchClient, SearchHit,
    SerperSearchClient, TextGenerator, TextRequest, WordPressConnector,
};
use contentforge_feeds::{FeedFetcher, HttpFeedFetcher};
use contentforge_shared::{AppConfig, ContentForgeError, ErrorKind, Result, Stage};
use contentforge_storage::Stores;

use crate::events::{EventSink, PipelineEvent, TracingEventSink};

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Progress callbacks for long-running operations.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a stage.
    fn phase(&self, stage: Stage);
    /// Called after each unit of a batch stage.
    fn item_done(&self, stage: Stage, current: usize, total: usize);
    /// Called when an operation finishes.
    fn done(&self, summary: &str);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _stage: Stage) {}
    fn item_done(&self, _stage: Stage, _current: usize, _total: usize) {}
    fn done(&self, _summary: &str) {}
}

// ---------------------------------------------------------------------------
// Services
// ---------------------------------------------------------------------------

/// External services used by the stages.
#[derive(Clone)]
pub struct Services {
    pub text: Arc<dyn TextGenerator>,
    pub embedder: Arc<dyn Embedder>,
    pub search: Arc<dyn SearchClient>,
    pub cms: Arc<dyn CmsConnector>,
    pub fetcher: Arc<dyn FeedFetcher>,
}

impl Services {
    /// Build HTTP-backed services from config.
    ///
    /// A service whose credentials are missing is replaced by a stand-in that
    /// fails with the same config error on first use, so commands that never
    /// touch it still work.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.ai.timeout_secs);

        let text: Arc<dyn TextGenerator> = match OpenAiTextGenerator::from_config(&config.ai) {
            Ok(client) => Arc::new(client),
            Err(e) => Arc::new(Unconfigured::from_error(e)?),
        };
        let embedder: Arc<dyn Embedder> =
            match OpenAiEmbedder::from_config(&config.embedding, timeout) {
                Ok(client) => Arc::new(client),
                Err(e) => Arc::new(Unconfigured::from_error(e)?),
            };
        let search: Arc<dyn SearchClient> =
            match SerperSearchClient::from_config(&config.search, timeout) {
                Ok(client) => Arc::new(client),
                Err(e) => Arc::new(Unconfigured::from_error(e)?),
            };

        Ok(Self {
            text,
            embedder,
            search,
            cms: Arc::new(WordPressConnector::new(timeout)),
            fetcher: Arc::new(HttpFeedFetcher::new(timeout)?),
        })
    }
}

/// Stand-in for a service without credentials.
struct Unconfigured {
    message: String,
}

impl Unconfigured {
    /// Keep config errors for later; anything else is returned immediately.
    fn from_error(err: ContentForgeError) -> Result<Self> {
        match err {
            ContentForgeError::Config { message } => Ok(Self { message }),
            other if other.kind() == ErrorKind::Config => Ok(Self {
                message: other.to_string(),
            }),
            other => Err(other),
        }
    }

    fn error(&self) -> ContentForgeError {
        ContentForgeError::config(self.message.clone())
    }
}

#[async_trait]
impl TextGenerator for Unconfigured {
    async fn generate(&self, _request: TextRequest) -> Result<String> {
        Err(self.error())
    }
}

#[async_trait]
impl Embedder for Unconfigured {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(self.error())
    }
}

#[async_trait]
impl SearchClient for Unconfigured {
    async fn search(&self, _query: &str) -> Result<Vec<SearchHit>> {
        Err(self.error())
    }
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Shared state passed to every pipeline operation.
pub struct PipelineContext {
    pub stores: Stores,
    pub services: Services,
    pub config: AppConfig,
    pub events: Arc<dyn EventSink>,
    pub progress: Arc<dyn ProgressReporter>,
}

impl PipelineContext {
    /// Context that logs events through `tracing` and reports no progress.
    pub fn new(stores: Stores, services: Services, config: AppConfig) -> Self {
        Self {
            stores,
            services,
            config,
            events: Arc::new(TracingEventSink),
            progress: Arc::new(SilentProgress),
        }
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub(crate) fn emit(&self, event: PipelineEvent) {
        self.events.emit(&event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unconfigured_service_fails_with_config_error() {
        let stub = Unconfigured::from_error(ContentForgeError::config(
            "API key not found. Set the OPENROUTER_API_KEY environment variable.",
        ))
        .unwrap();
        let err = stub
            .generate(TextRequest::free_text("sys", "prompt"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert!(err.to_string().contains("OPENROUTER_API_KEY"));
    }

    #[test]
    fn non_config_errors_are_not_deferred() {
        assert!(Unconfigured::from_error(ContentForgeError::Storage("x".into())).is_err());
    }
}
