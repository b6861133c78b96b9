//! Persistent store for the content pipeline.
//!
//! Stages talk to the store only through the repository traits
//! [`FeedStore`], [`ItemStore`], [`ClusterStore`] and [`RunStore`]. Two
//! implementations are provided:
//! - [`Storage`]: Turso Embedded / libSQL, used by the CLI
//! - [`MemoryStore`]: in-process maps, used by tests
//!
//! Every item mutation is status-gated: a write that would move an item's
//! status backwards is rejected with a validation error.

mod db;
mod memory;
mod migrations;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use contentforge_shared::{
    ArticleId, Cluster, ClusterId, ContentForgeError, ExtractedFact, Feed, FeedEntry, FeedId,
    GeneratedArticle, Item, ItemId, ItemStatus, PipelineRun, Result, RunId, RunStatus,
    ScoreResult, Sections, SeoMetadata, VerificationResult,
};

pub use db::Storage;
pub use memory::MemoryStore;

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// Ordering applied by [`ItemStore::list_items`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ItemOrder {
    /// Oldest first (ingestion order).
    #[default]
    Oldest,
    /// Highest combined score first, ties broken by age.
    ScoreDesc,
}

/// Filter for status-gated item queries. Unset fields do not filter.
#[derive(Debug, Clone, Default)]
pub struct ItemQuery {
    pub statuses: Vec<ItemStatus>,
    pub site_id: Option<String>,
    pub ids: Option<Vec<ItemId>>,
    pub has_embedding: Option<bool>,
    /// Only items without a cluster.
    pub unclustered: bool,
    /// Only items without a verification result.
    pub unverified: bool,
    pub min_score: Option<u8>,
    pub order: ItemOrder,
    pub limit: Option<usize>,
}

impl ItemQuery {
    pub fn with_status(status: ItemStatus) -> Self {
        Self {
            statuses: vec![status],
            ..Self::default()
        }
    }

    pub fn site(mut self, site_id: Option<&str>) -> Self {
        self.site_id = site_id.map(str::to_owned);
        self
    }

    pub fn ids(mut self, ids: Vec<ItemId>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn order(mut self, order: ItemOrder) -> Self {
        self.order = order;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether `item` (owned by a feed of `item_site`) passes every filter.
    pub(crate) fn matches(&self, item: &Item, item_site: &str) -> bool {
        (self.statuses.is_empty() || self.statuses.contains(&item.status))
            && self.site_id.as_deref().is_none_or(|s| s == item_site)
            && self.ids.as_ref().is_none_or(|ids| ids.contains(&item.id))
            && self
                .has_embedding
                .is_none_or(|want| want == item.embedding.is_some())
            && (!self.unclustered || item.cluster_id.is_none())
            && (!self.unverified || item.verification.is_none())
            && self
                .min_score
                .is_none_or(|min| item.combined_score().is_some_and(|s| s >= min))
    }
}

// ---------------------------------------------------------------------------
// Repository traits
// ---------------------------------------------------------------------------

#[async_trait]
pub trait FeedStore: Send + Sync {
    /// Register a feed. A duplicate `(site_id, url)` is a validation error.
    async fn insert_feed(&self, feed: &Feed) -> Result<()>;

    async fn get_feed(&self, id: FeedId) -> Result<Feed>;

    async fn list_feeds(&self, site_id: Option<&str>) -> Result<Vec<Feed>>;

    /// Record last-poll metadata, regardless of how many entries were new.
    async fn record_poll(&self, id: FeedId, polled_at: DateTime<Utc>, count: u32) -> Result<()>;
}

#[async_trait]
pub trait ItemStore: Send + Sync {
    /// Insert an entry as a new `ingested` item. Returns `false` without
    /// touching the store when `(feed_id, guid)` already exists.
    async fn upsert_item(&self, feed_id: FeedId, entry: &FeedEntry) -> Result<bool>;

    async fn get_item(&self, id: ItemId) -> Result<Item>;

    async fn list_items(&self, query: &ItemQuery) -> Result<Vec<Item>>;

    async fn count_items(&self, feed_id: Option<FeedId>) -> Result<usize>;

    /// `ingested → scored`.
    async fn record_score(&self, id: ItemId, score: &ScoreResult) -> Result<()>;

    /// `scored → extracted`.
    async fn record_extraction(
        &self,
        id: ItemId,
        facts: &[ExtractedFact],
        keywords: &[String],
    ) -> Result<()>;

    /// Set once, on an item that has been extracted.
    async fn record_verification(&self, id: ItemId, result: &VerificationResult) -> Result<()>;

    /// Set once, on an item that is not yet clustered.
    async fn record_embedding(&self, id: ItemId, embedding: &[f32]) -> Result<()>;

    /// Mark items `used`. Items already terminal are left alone.
    async fn mark_used(&self, ids: &[ItemId]) -> Result<()>;

    /// Mark an item `skipped` (terminal).
    async fn skip_item(&self, id: ItemId) -> Result<()>;
}

#[async_trait]
pub trait ClusterStore: Send + Sync {
    /// Persist a cluster and assign its members atomically. Fails without
    /// side effects if any member already belongs to a cluster.
    async fn create_cluster(&self, cluster: &Cluster) -> Result<()>;

    async fn set_cluster_label(&self, id: ClusterId, label: &str, summary: &str) -> Result<()>;

    async fn get_cluster(&self, id: ClusterId) -> Result<Cluster>;

    async fn list_clusters(&self, site_id: Option<&str>, unlabeled_only: bool)
    -> Result<Vec<Cluster>>;
}

#[async_trait]
pub trait RunStore: Send + Sync {
    async fn create_run(&self, run: &PipelineRun) -> Result<()>;

    async fn get_run(&self, id: RunId) -> Result<PipelineRun>;

    /// Most recent first.
    async fn list_runs(&self, site_id: Option<&str>, limit: usize) -> Result<Vec<PipelineRun>>;

    /// Forward-only status transition; `error` is recorded when given.
    async fn update_run_status(
        &self,
        id: RunId,
        status: RunStatus,
        error: Option<&str>,
    ) -> Result<()>;

    /// `failed → publishing` for a run that was already assembled, clearing
    /// its error. Anything else is a validation error.
    async fn reopen_publish(&self, id: RunId) -> Result<()>;

    async fn save_sections(&self, id: RunId, sections: &Sections) -> Result<()>;

    async fn save_assembly(&self, id: RunId, html: &str, seo: &SeoMetadata) -> Result<()>;

    /// Insert an article record. A second article for the same run is rejected.
    async fn create_article(&self, article: &GeneratedArticle) -> Result<()>;

    async fn get_article(&self, id: ArticleId) -> Result<GeneratedArticle>;

    async fn count_articles(&self, run_id: RunId) -> Result<usize>;

    /// The run's article, whether or not it has been attached yet.
    async fn article_for_run(&self, run_id: RunId) -> Result<Option<GeneratedArticle>>;

    /// Set the run's article reference. Set at most once.
    async fn attach_article(&self, run_id: RunId, article_id: ArticleId) -> Result<()>;

    /// Store the latest push's remote id and URL, replacing earlier ones.
    async fn record_publication(
        &self,
        run_id: RunId,
        remote_post_id: &str,
        remote_url: &str,
    ) -> Result<()>;

    /// Take the per-site pipeline lease. An unexpired lease held by someone
    /// else is a validation error naming the holder.
    async fn acquire_site_lease(&self, site_id: &str, holder: &str, ttl: Duration) -> Result<()>;

    /// Release a lease if `holder` still owns it.
    async fn release_site_lease(&self, site_id: &str, holder: &str) -> Result<()>;
}

/// The four repositories, injected together into the pipeline.
#[derive(Clone)]
pub struct Stores {
    pub feeds: Arc<dyn FeedStore>,
    pub items: Arc<dyn ItemStore>,
    pub clusters: Arc<dyn ClusterStore>,
    pub runs: Arc<dyn RunStore>,
}

impl Stores {
    /// Use one backend for every repository.
    pub fn from_shared<S>(store: Arc<S>) -> Self
    where
        S: FeedStore + ItemStore + ClusterStore + RunStore + 'static,
    {
        Self {
            feeds: store.clone(),
            items: store.clone(),
            clusters: store.clone(),
            runs: store,
        }
    }
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

pub(crate) fn item_transition_error(
    id: ItemId,
    current: ItemStatus,
    wanted: &str,
) -> ContentForgeError {
    ContentForgeError::validation(format!("item {id} is {current}, expected {wanted}"))
}

pub(crate) fn lease_held_error(
    site_id: &str,
    holder: &str,
    expires_at: DateTime<Utc>,
) -> ContentForgeError {
    ContentForgeError::validation(format!(
        "site '{site_id}' is locked by pipeline {holder} until {}",
        expires_at.to_rfc3339()
    ))
}

pub(crate) fn reopen_error(run: &PipelineRun) -> ContentForgeError {
    ContentForgeError::validation(format!(
        "run {} is {}; only failed runs that were assembled can be published again",
        run.id, run.status
    ))
}

pub(crate) fn run_transition_error(
    id: RunId,
    current: RunStatus,
    next: RunStatus,
) -> ContentForgeError {
    ContentForgeError::validation(format!(
        "pipeline run {id} cannot move from {current} to {next}"
    ))
}
