//! In-process implementation of the repository traits.
//!
//! Mirrors the status gates of [`crate::Storage`] so pipeline behavior can be
//! exercised without a database file.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use contentforge_shared::{
    ArticleId, Cluster, ClusterId, ContentForgeError, ExtractedFact, Feed, FeedEntry, FeedId,
    GeneratedArticle, Item, ItemId, ItemStatus, PipelineRun, Result, RunId, RunStatus,
    ScoreResult, Sections, SeoMetadata, VerificationResult,
};

use crate::{
    ClusterStore, FeedStore, ItemOrder, ItemQuery, ItemStore, RunStore, item_transition_error,
    lease_held_error, reopen_error, run_transition_error,
};

#[derive(Default)]
struct State {
    feeds: Vec<Feed>,
    items: Vec<Item>,
    clusters: Vec<Cluster>,
    runs: Vec<PipelineRun>,
    articles: Vec<GeneratedArticle>,
    leases: HashMap<String, (String, DateTime<Utc>)>,
}

impl State {
    fn item_mut(&mut self, id: ItemId) -> Result<&mut Item> {
        self.items
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or_else(|| ContentForgeError::not_found("item", id))
    }

    fn run_mut(&mut self, id: RunId) -> Result<&mut PipelineRun> {
        self.runs
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| ContentForgeError::not_found("pipeline run", id))
    }

    fn site_of(&self, feed_id: FeedId) -> &str {
        self.feeds
            .iter()
            .find(|f| f.id == feed_id)
            .map(|f| f.site_id.as_str())
            .unwrap_or_default()
    }

    fn with_members(&self, cluster: &Cluster) -> Cluster {
        let mut members: Vec<&Item> = self
            .items
            .iter()
            .filter(|i| i.cluster_id == Some(cluster.id))
            .collect();
        members.sort_by_key(|i| (i.created_at, i.id));
        Cluster {
            member_ids: members.into_iter().map(|i| i.id).collect(),
            ..cluster.clone()
        }
    }
}

/// Repository backed by in-memory vectors behind a mutex.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| ContentForgeError::Storage("memory store lock poisoned".into()))
    }
}

#[async_trait]
impl FeedStore for MemoryStore {
    async fn insert_feed(&self, feed: &Feed) -> Result<()> {
        let mut state = self.state()?;
        if state
            .feeds
            .iter()
            .any(|f| f.site_id == feed.site_id && f.url == feed.url)
        {
            return Err(ContentForgeError::validation(format!(
                "feed {} is already registered for site '{}'",
                feed.url, feed.site_id
            )));
        }
        state.feeds.push(feed.clone());
        Ok(())
    }

    async fn get_feed(&self, id: FeedId) -> Result<Feed> {
        self.state()?
            .feeds
            .iter()
            .find(|f| f.id == id)
            .cloned()
            .ok_or_else(|| ContentForgeError::not_found("feed", id))
    }

    async fn list_feeds(&self, site_id: Option<&str>) -> Result<Vec<Feed>> {
        Ok(self
            .state()?
            .feeds
            .iter()
            .filter(|f| site_id.is_none_or(|s| f.site_id == s))
            .cloned()
            .collect())
    }

    async fn record_poll(&self, id: FeedId, polled_at: DateTime<Utc>, count: u32) -> Result<()> {
        let mut state = self.state()?;
        let feed = state
            .feeds
            .iter_mut()
            .find(|f| f.id == id)
            .ok_or_else(|| ContentForgeError::not_found("feed", id))?;
        feed.last_polled_at = Some(polled_at);
        feed.last_poll_count = count;
        Ok(())
    }
}

#[async_trait]
impl ItemStore for MemoryStore {
    async fn upsert_item(&self, feed_id: FeedId, entry: &FeedEntry) -> Result<bool> {
        let mut state = self.state()?;
        if state
            .items
            .iter()
            .any(|i| i.feed_id == feed_id && i.guid == entry.guid)
        {
            return Ok(false);
        }
        state.items.push(Item::from_entry(feed_id, entry));
        Ok(true)
    }

    async fn get_item(&self, id: ItemId) -> Result<Item> {
        Ok(self.state()?.item_mut(id)?.clone())
    }

    async fn list_items(&self, query: &ItemQuery) -> Result<Vec<Item>> {
        let state = self.state()?;
        let mut items: Vec<Item> = state
            .items
            .iter()
            .filter(|i| query.matches(i, state.site_of(i.feed_id)))
            .cloned()
            .collect();

        match query.order {
            ItemOrder::Oldest => items.sort_by_key(|i| (i.created_at, i.id)),
            ItemOrder::ScoreDesc => items.sort_by(|a, b| {
                b.combined_score()
                    .cmp(&a.combined_score())
                    .then(a.created_at.cmp(&b.created_at))
                    .then(a.id.cmp(&b.id))
            }),
        }
        if let Some(limit) = query.limit {
            items.truncate(limit);
        }
        Ok(items)
    }

    async fn count_items(&self, feed_id: Option<FeedId>) -> Result<usize> {
        Ok(self
            .state()?
            .items
            .iter()
            .filter(|i| feed_id.is_none_or(|f| i.feed_id == f))
            .count())
    }

    async fn record_score(&self, id: ItemId, score: &ScoreResult) -> Result<()> {
        let mut state = self.state()?;
        let item = state.item_mut(id)?;
        if item.status != ItemStatus::Ingested {
            return Err(item_transition_error(id, item.status, "ingested"));
        }
        item.score = Some(score.clone());
        item.status = ItemStatus::Scored;
        item.updated_at = Utc::now();
        Ok(())
    }

    async fn record_extraction(
        &self,
        id: ItemId,
        facts: &[ExtractedFact],
        keywords: &[String],
    ) -> Result<()> {
        let mut state = self.state()?;
        let item = state.item_mut(id)?;
        if item.status != ItemStatus::Scored {
            return Err(item_transition_error(id, item.status, "scored"));
        }
        item.facts = facts.to_vec();
        item.keywords = keywords.to_vec();
        item.status = ItemStatus::Extracted;
        item.updated_at = Utc::now();
        Ok(())
    }

    async fn record_verification(&self, id: ItemId, result: &VerificationResult) -> Result<()> {
        let mut state = self.state()?;
        let item = state.item_mut(id)?;
        let eligible = matches!(item.status, ItemStatus::Extracted | ItemStatus::Clustered);
        if !eligible || item.verification.is_some() {
            return Err(item_transition_error(id, item.status, "extracted and unverified"));
        }
        item.verification = Some(result.clone());
        item.updated_at = Utc::now();
        Ok(())
    }

    async fn record_embedding(&self, id: ItemId, embedding: &[f32]) -> Result<()> {
        let mut state = self.state()?;
        let item = state.item_mut(id)?;
        let terminal = matches!(item.status, ItemStatus::Used | ItemStatus::Skipped);
        if terminal || item.embedding.is_some() || item.cluster_id.is_some() {
            return Err(item_transition_error(id, item.status, "unembedded and unclustered"));
        }
        item.embedding = Some(embedding.to_vec());
        item.updated_at = Utc::now();
        Ok(())
    }

    async fn mark_used(&self, ids: &[ItemId]) -> Result<()> {
        let mut state = self.state()?;
        let now = Utc::now();
        for item in state.items.iter_mut().filter(|i| ids.contains(&i.id)) {
            if item.status.can_advance_to(ItemStatus::Used) {
                item.status = ItemStatus::Used;
                item.updated_at = now;
            }
        }
        Ok(())
    }

    async fn skip_item(&self, id: ItemId) -> Result<()> {
        let mut state = self.state()?;
        let item = state.item_mut(id)?;
        if !item.status.can_advance_to(ItemStatus::Skipped) {
            return Err(item_transition_error(id, item.status, "not yet used or skipped"));
        }
        item.status = ItemStatus::Skipped;
        item.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl ClusterStore for MemoryStore {
    async fn create_cluster(&self, cluster: &Cluster) -> Result<()> {
        if cluster.member_ids.len() < 2 {
            return Err(ContentForgeError::validation(format!(
                "cluster {} needs at least 2 members, got {}",
                cluster.id,
                cluster.member_ids.len()
            )));
        }

        let mut state = self.state()?;
        // Check every member before touching any of them.
        for member in &cluster.member_ids {
            let free = state
                .items
                .iter()
                .any(|i| i.id == *member && i.cluster_id.is_none());
            if !free {
                return Err(ContentForgeError::validation(format!(
                    "item {member} is missing or already clustered"
                )));
            }
        }

        let now = Utc::now();
        for item in state
            .items
            .iter_mut()
            .filter(|i| cluster.member_ids.contains(&i.id))
        {
            item.cluster_id = Some(cluster.id);
            if item.status == ItemStatus::Extracted {
                item.status = ItemStatus::Clustered;
            }
            item.updated_at = now;
        }
        state.clusters.push(Cluster {
            member_ids: Vec::new(),
            ..cluster.clone()
        });
        Ok(())
    }

    async fn set_cluster_label(&self, id: ClusterId, label: &str, summary: &str) -> Result<()> {
        let mut state = self.state()?;
        let cluster = state
            .clusters
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| ContentForgeError::not_found("cluster", id))?;
        cluster.label = Some(label.to_owned());
        cluster.summary = Some(summary.to_owned());
        Ok(())
    }

    async fn get_cluster(&self, id: ClusterId) -> Result<Cluster> {
        let state = self.state()?;
        state
            .clusters
            .iter()
            .find(|c| c.id == id)
            .map(|c| state.with_members(c))
            .ok_or_else(|| ContentForgeError::not_found("cluster", id))
    }

    async fn list_clusters(
        &self,
        site_id: Option<&str>,
        unlabeled_only: bool,
    ) -> Result<Vec<Cluster>> {
        let state = self.state()?;
        Ok(state
            .clusters
            .iter()
            .filter(|c| site_id.is_none_or(|s| c.site_id.as_deref() == Some(s)))
            .filter(|c| !unlabeled_only || c.label.is_none())
            .map(|c| state.with_members(c))
            .collect())
    }
}

#[async_trait]
impl RunStore for MemoryStore {
    async fn create_run(&self, run: &PipelineRun) -> Result<()> {
        self.state()?.runs.push(run.clone());
        Ok(())
    }

    async fn get_run(&self, id: RunId) -> Result<PipelineRun> {
        Ok(self.state()?.run_mut(id)?.clone())
    }

    async fn list_runs(&self, site_id: Option<&str>, limit: usize) -> Result<Vec<PipelineRun>> {
        let state = self.state()?;
        let mut runs: Vec<PipelineRun> = state
            .runs
            .iter()
            .filter(|r| site_id.is_none_or(|s| r.site_id == s))
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        runs.truncate(limit);
        Ok(runs)
    }

    async fn update_run_status(
        &self,
        id: RunId,
        status: RunStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let mut state = self.state()?;
        let run = state.run_mut(id)?;
        if !run.status.can_advance_to(status) {
            return Err(run_transition_error(id, run.status, status));
        }
        run.status = status;
        if let Some(error) = error {
            run.error = Some(error.to_owned());
        }
        run.updated_at = Utc::now();
        Ok(())
    }

    async fn reopen_publish(&self, id: RunId) -> Result<()> {
        let mut state = self.state()?;
        let run = state.run_mut(id)?;
        if run.status != RunStatus::Failed || !run.is_assembled() {
            return Err(reopen_error(run));
        }
        run.status = RunStatus::Publishing;
        run.error = None;
        run.updated_at = Utc::now();
        Ok(())
    }

    async fn save_sections(&self, id: RunId, sections: &Sections) -> Result<()> {
        let mut state = self.state()?;
        let run = state.run_mut(id)?;
        run.sections = sections.clone();
        run.updated_at = Utc::now();
        Ok(())
    }

    async fn save_assembly(&self, id: RunId, html: &str, seo: &SeoMetadata) -> Result<()> {
        let mut state = self.state()?;
        let run = state.run_mut(id)?;
        run.assembled_html = Some(html.to_owned());
        run.seo = Some(seo.clone());
        run.updated_at = Utc::now();
        Ok(())
    }

    async fn create_article(&self, article: &GeneratedArticle) -> Result<()> {
        let mut state = self.state()?;
        if state.articles.iter().any(|a| a.run_id == article.run_id) {
            return Err(ContentForgeError::validation(format!(
                "pipeline run {} already has an article",
                article.run_id
            )));
        }
        state.articles.push(article.clone());
        Ok(())
    }

    async fn get_article(&self, id: ArticleId) -> Result<GeneratedArticle> {
        self.state()?
            .articles
            .iter()
            .find(|a| a.id == id)
            .cloned()
            .ok_or_else(|| ContentForgeError::not_found("article", id))
    }

    async fn count_articles(&self, run_id: RunId) -> Result<usize> {
        Ok(self
            .state()?
            .articles
            .iter()
            .filter(|a| a.run_id == run_id)
            .count())
    }

    async fn article_for_run(&self, run_id: RunId) -> Result<Option<GeneratedArticle>> {
        Ok(self
            .state()?
            .articles
            .iter()
            .find(|a| a.run_id == run_id)
            .cloned())
    }

    async fn attach_article(&self, run_id: RunId, article_id: ArticleId) -> Result<()> {
        let mut state = self.state()?;
        let run = state.run_mut(run_id)?;
        match run.article_id {
            None => {
                run.article_id = Some(article_id);
                run.updated_at = Utc::now();
                Ok(())
            }
            Some(existing) if existing == article_id => Ok(()),
            Some(_) => Err(ContentForgeError::validation(format!(
                "pipeline run {run_id} already references a different article"
            ))),
        }
    }

    async fn record_publication(
        &self,
        run_id: RunId,
        remote_post_id: &str,
        remote_url: &str,
    ) -> Result<()> {
        let mut state = self.state()?;
        let run = state.run_mut(run_id)?;
        run.remote_post_id = Some(remote_post_id.to_owned());
        run.remote_url = Some(remote_url.to_owned());
        run.updated_at = Utc::now();
        Ok(())
    }

    async fn acquire_site_lease(&self, site_id: &str, holder: &str, ttl: Duration) -> Result<()> {
        let mut state = self.state()?;
        let now = Utc::now();
        if let Some((current, expires_at)) = state.leases.get(site_id) {
            if current != holder && *expires_at > now {
                return Err(lease_held_error(site_id, current, *expires_at));
            }
        }
        state
            .leases
            .insert(site_id.to_owned(), (holder.to_owned(), now + ttl));
        Ok(())
    }

    async fn release_site_lease(&self, site_id: &str, holder: &str) -> Result<()> {
        let mut state = self.state()?;
        if state
            .leases
            .get(site_id)
            .is_some_and(|(current, _)| current == holder)
        {
            state.leases.remove(site_id);
        }
        Ok(())
    }
}
