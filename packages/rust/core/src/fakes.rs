//! In-process fakes for the external service traits, paired with
//! [`contentforge_storage::MemoryStore`] in stage tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use contentforge_clients::{
    CmsClient, CmsConnector, DraftPost, Embedder, RemotePost, SearchClient, SearchHit,
    TextGenerator, TextRequest,
};
use contentforge_feeds::FeedFetcher;
use contentforge_shared::{
    AppConfig, CmsConfig, ContentForgeError, FeedEntry, Result, SiteConfig,
};
use contentforge_storage::{MemoryStore, Stores};

use crate::context::{PipelineContext, Services};
use crate::events::RecordingEventSink;
use crate::prompts::{CLUSTER_SYSTEM, EXTRACT_SYSTEM, SCORE_SYSTEM, SEO_SYSTEM};

// ---------------------------------------------------------------------------
// Text generation
// ---------------------------------------------------------------------------

type TextResponder = Box<dyn Fn(&TextRequest) -> Result<String> + Send + Sync>;

/// Answers each request through a closure and records every request.
pub struct ScriptedText {
    responder: TextResponder,
    requests: Mutex<Vec<TextRequest>>,
}

impl ScriptedText {
    pub fn new(responder: impl Fn(&TextRequest) -> Result<String> + Send + Sync + 'static) -> Self {
        Self {
            responder: Box::new(responder),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Well-formed answers for every stage.
    pub fn canned() -> Self {
        Self::new(canned_response)
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or_default()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.requests
            .lock()
            .map(|r| r.iter().map(|req| req.prompt.clone()).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl TextGenerator for ScriptedText {
    async fn generate(&self, request: TextRequest) -> Result<String> {
        let response = (self.responder)(&request);
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }
        response
    }
}

/// The section named in a section prompt, e.g. `faq`.
pub fn requested_section(request: &TextRequest) -> Option<&str> {
    request
        .prompt
        .lines()
        .find_map(|line| line.strip_prefix("Section: "))
        .map(str::trim)
}

/// A valid response for whichever stage issued `request`.
pub fn canned_response(request: &TextRequest) -> Result<String> {
    let body = match request.system.as_str() {
        SCORE_SYSTEM => r#"{"seo_score": 80, "viral_score": 50, "rationale": "solid search demand"}"#.to_string(),
        EXTRACT_SYSTEM => r#"{
            "facts": [
                {"claim": "Rust 1.85 stabilized the 2024 edition", "confidence": 0.9, "source_quote": "released 1.85"},
                {"claim": "Async closures are now stable", "confidence": 0.7, "source_quote": "async closures"}
            ],
            "keywords": ["rust", "2024 edition"]
        }"#
        .to_string(),
        CLUSTER_SYSTEM => r#"{"label": "Rust releases", "summary": "News about Rust toolchain releases."}"#.to_string(),
        SEO_SYSTEM => r#"{"title": "What the Rust 2024 Edition Changes", "seo_title": "Rust 2024 Edition Explained", "seo_description": "Everything that changed in the Rust 2024 edition.", "focus_keyword": "rust 2024 edition"}"#.to_string(),
        _ => match requested_section(request) {
            Some("glossary") => r#"{"terms": [{"term": "Edition", "definition": "An opt-in set of language changes."}]}"#.to_string(),
            Some("faq") => r#"{"questions": [{"question": "Is the 2024 edition stable?", "answer": "Yes, since Rust 1.85."}]}"#.to_string(),
            Some(section) => format!("<p>The {section} section about the Rust 2024 edition.</p>"),
            None => {
                return Err(ContentForgeError::parse("unrecognized request"));
            }
        },
    };
    Ok(body)
}

// ---------------------------------------------------------------------------
// Embeddings
// ---------------------------------------------------------------------------

/// Returns the vector of the first keyword found in the input text.
pub struct KeywordEmbedder {
    vectors: Vec<(String, Vec<f32>)>,
    fallback: Vec<f32>,
}

impl KeywordEmbedder {
    pub fn new(fallback: Vec<f32>) -> Self {
        Self {
            vectors: Vec::new(),
            fallback,
        }
    }

    pub fn with(mut self, keyword: impl Into<String>, vector: Vec<f32>) -> Self {
        self.vectors.push((keyword.into(), vector));
        self
    }
}

#[async_trait]
impl Embedder for KeywordEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self
            .vectors
            .iter()
            .find(|(keyword, _)| text.contains(keyword.as_str()))
            .map_or_else(|| self.fallback.clone(), |(_, v)| v.clone()))
    }
}

// ---------------------------------------------------------------------------
// Search
// ---------------------------------------------------------------------------

type SearchResponder = Box<dyn Fn(&str) -> Result<Vec<SearchHit>> + Send + Sync>;

/// Answers each query through a closure and records every query.
pub struct ScriptedSearch {
    responder: SearchResponder,
    queries: Mutex<Vec<String>>,
}

impl ScriptedSearch {
    pub fn new(responder: impl Fn(&str) -> Result<Vec<SearchHit>> + Send + Sync + 'static) -> Self {
        Self {
            responder: Box::new(responder),
            queries: Mutex::new(Vec::new()),
        }
    }

    /// Corroborates every query with one long description.
    pub fn corroborating() -> Self {
        Self::new(|query| {
            Ok(vec![SearchHit {
                title: query.to_string(),
                description: format!(
                    "Independent reporting confirms that {query}, according to several outlets."
                ),
            }])
        })
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().map(|q| q.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl SearchClient for ScriptedSearch {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>> {
        if let Ok(mut queries) = self.queries.lock() {
            queries.push(query.to_string());
        }
        (self.responder)(query)
    }
}

// ---------------------------------------------------------------------------
// CMS
// ---------------------------------------------------------------------------

/// Accepts drafts and remembers them. [`RecordingCms::fail_next`] makes the
/// next pushes fail like an unavailable site.
#[derive(Default)]
pub struct RecordingCms {
    posts: Mutex<Vec<DraftPost>>,
    failures: AtomicUsize,
}

impl RecordingCms {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn posts(&self) -> Vec<DraftPost> {
        self.posts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn fail_next(&self, pushes: usize) {
        self.failures.store(pushes, Ordering::SeqCst);
    }
}

#[async_trait]
impl CmsClient for RecordingCms {
    async fn create_draft_post(&self, post: &DraftPost) -> Result<RemotePost> {
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ContentForgeError::external("cms", "HTTP 503: service unavailable"));
        }
        let mut posts = self
            .posts
            .lock()
            .map_err(|_| ContentForgeError::external("cms", "recorder poisoned"))?;
        posts.push(post.clone());
        let id = posts.len();
        Ok(RemotePost {
            remote_id: id.to_string(),
            url: format!("https://blog.example.com/?p={id}"),
        })
    }
}

/// Hands out one shared [`RecordingCms`] to every site with a `cms` section.
pub struct RecordingConnector {
    pub client: Arc<RecordingCms>,
}

impl RecordingConnector {
    pub fn new() -> Self {
        Self {
            client: RecordingCms::new(),
        }
    }
}

impl Default for RecordingConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl CmsConnector for RecordingConnector {
    fn connect(&self, site: &SiteConfig) -> Result<Arc<dyn CmsClient>> {
        if site.cms.is_none() {
            return Err(ContentForgeError::config(format!(
                "site '{}' has no [sites.cms] credentials",
                site.id
            )));
        }
        Ok(self.client.clone())
    }
}

// ---------------------------------------------------------------------------
// Feeds
// ---------------------------------------------------------------------------

/// Serves fixed entries per URL. Unknown URLs fail like an unreachable host.
#[derive(Default)]
pub struct StaticFetcher {
    feeds: HashMap<String, Vec<FeedEntry>>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_feed(mut self, url: impl Into<String>, entries: Vec<FeedEntry>) -> Self {
        self.feeds.insert(url.into(), entries);
        self
    }
}

#[async_trait]
impl FeedFetcher for StaticFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<FeedEntry>> {
        self.feeds
            .get(url)
            .cloned()
            .ok_or_else(|| {
                ContentForgeError::external("feed", format!("GET {url}: connection refused"))
            })
    }
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Config with one site, `tech`, that has CMS credentials.
pub fn test_config() -> AppConfig {
    AppConfig {
        sites: vec![SiteConfig {
            id: "tech".into(),
            name: "Tech Blog".into(),
            cms: Some(CmsConfig {
                base_url: "https://blog.example.com".into(),
                username: "editor".into(),
                password_env: "CONTENTFORGE_TEST_WP_PASSWORD".into(),
            }),
        }],
        ..AppConfig::default()
    }
}

/// Fakes that succeed at every stage.
pub fn fake_services() -> Services {
    Services {
        text: Arc::new(ScriptedText::canned()),
        embedder: Arc::new(KeywordEmbedder::new(vec![1.0, 0.0, 0.0])),
        search: Arc::new(ScriptedSearch::corroborating()),
        cms: Arc::new(RecordingConnector::new()),
        fetcher: Arc::new(StaticFetcher::new()),
    }
}

/// In-memory context over [`fake_services`], adjusted by `customize`.
pub fn test_context_with(
    customize: impl FnOnce(&mut Services),
) -> (PipelineContext, Arc<RecordingEventSink>) {
    let mut services = fake_services();
    customize(&mut services);
    let events = Arc::new(RecordingEventSink::new());
    let ctx = PipelineContext::new(
        Stores::from_shared(Arc::new(MemoryStore::new())),
        services,
        test_config(),
    )
    .with_events(events.clone());
    (ctx, events)
}
