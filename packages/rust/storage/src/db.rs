//! Turso Embedded / libSQL implementation of the repository traits.

use std::fmt::Display;
use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use contentforge_shared::{
    ArticleId, Cluster, ClusterId, ContentForgeError, ExtractedFact, Feed, FeedEntry, FeedId,
    GeneratedArticle, Item, ItemId, ItemStatus, PipelineRun, Preset, Result, RunId, RunStatus,
    ScoreResult, Sections, SeoMetadata, VerificationResult,
};
use libsql::params::Params;
use libsql::{Connection, Database, Value, params};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::{
    ClusterStore, FeedStore, ItemOrder, ItemQuery, ItemStore, RunStore, item_transition_error,
    lease_held_error, migrations, reopen_error, run_transition_error,
};

const FEED_COLUMNS: &str =
    "id, site_id, url, poll_interval_mins, last_polled_at, last_poll_count, created_at";

const ITEM_COLUMNS: &str = "i.id, i.feed_id, i.guid, i.title, i.link, i.content, i.published_at, \
     i.status, i.seo_score, i.viral_score, i.combined_score, i.score_rationale, i.facts_json, \
     i.keywords_json, i.verification_json, i.embedding_json, i.cluster_id, i.created_at, i.updated_at";

const RUN_COLUMNS: &str = "id, site_id, preset, persona, status, source_item_ids_json, \
     sections_json, assembled_html, seo_json, article_id, remote_post_id, remote_url, error, \
     created_at, updated_at";

const ARTICLE_COLUMNS: &str =
    "id, run_id, site_id, title, html, seo_json, word_count, created_at";

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
}

impl Storage {
    /// Open or create a database at `path` and apply pending migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ContentForgeError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(sql_err)?;

        let conn = db.connect().map_err(sql_err)?;

        let storage = Self { db, conn };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        ContentForgeError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Current status of an item, or `NotFound`.
    async fn item_status(&self, id: ItemId) -> Result<ItemStatus> {
        let mut rows = self
            .conn
            .query(
                "SELECT status FROM items WHERE id = ?1",
                params![id.to_string()],
            )
            .await
            .map_err(sql_err)?;

        match rows.next().await.map_err(sql_err)? {
            Some(row) => row.get::<String>(0).map_err(sql_err)?.parse(),
            None => Err(ContentForgeError::not_found("item", id)),
        }
    }

    async fn cluster_members(&self, id: ClusterId) -> Result<Vec<ItemId>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id FROM items WHERE cluster_id = ?1 ORDER BY created_at, id",
                params![id.to_string()],
            )
            .await
            .map_err(sql_err)?;

        let mut members = Vec::new();
        while let Some(row) = rows.next().await.map_err(sql_err)? {
            members.push(parse_id(&row.get::<String>(0).map_err(sql_err)?)?);
        }
        Ok(members)
    }

    async fn row_to_cluster(&self, row: &libsql::Row) -> Result<Cluster> {
        let id: ClusterId = parse_id(&row.get::<String>(0).map_err(sql_err)?)?;
        Ok(Cluster {
            id,
            site_id: row.get::<String>(1).ok(),
            label: row.get::<String>(2).ok(),
            summary: row.get::<String>(3).ok(),
            member_ids: self.cluster_members(id).await?,
            created_at: parse_ts(&row.get::<String>(4).map_err(sql_err)?)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Feeds
// ---------------------------------------------------------------------------

#[async_trait]
impl FeedStore for Storage {
    async fn insert_feed(&self, feed: &Feed) -> Result<()> {
        let inserted = self
            .conn
            .execute(
                "INSERT INTO feeds (id, site_id, url, poll_interval_mins, last_polled_at, last_poll_count, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(site_id, url) DO NOTHING",
                params![
                    feed.id.to_string(),
                    feed.site_id.as_str(),
                    feed.url.as_str(),
                    i64::from(feed.poll_interval_mins),
                    feed.last_polled_at.map(|t| t.to_rfc3339()),
                    i64::from(feed.last_poll_count),
                    feed.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(sql_err)?;

        if inserted == 0 {
            return Err(ContentForgeError::validation(format!(
                "feed {} is already registered for site '{}'",
                feed.url, feed.site_id
            )));
        }
        Ok(())
    }

    async fn get_feed(&self, id: FeedId) -> Result<Feed> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {FEED_COLUMNS} FROM feeds WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(sql_err)?;

        match rows.next().await.map_err(sql_err)? {
            Some(row) => row_to_feed(&row),
            None => Err(ContentForgeError::not_found("feed", id)),
        }
    }

    async fn list_feeds(&self, site_id: Option<&str>) -> Result<Vec<Feed>> {
        let mut rows = match site_id {
            Some(site) => {
                self.conn
                    .query(
                        &format!(
                            "SELECT {FEED_COLUMNS} FROM feeds WHERE site_id = ?1 ORDER BY created_at"
                        ),
                        params![site],
                    )
                    .await
            }
            None => {
                self.conn
                    .query(
                        &format!("SELECT {FEED_COLUMNS} FROM feeds ORDER BY site_id, created_at"),
                        params![],
                    )
                    .await
            }
        }
        .map_err(sql_err)?;

        let mut feeds = Vec::new();
        while let Some(row) = rows.next().await.map_err(sql_err)? {
            feeds.push(row_to_feed(&row)?);
        }
        Ok(feeds)
    }

    async fn record_poll(&self, id: FeedId, polled_at: DateTime<Utc>, count: u32) -> Result<()> {
        let changed = self
            .conn
            .execute(
                "UPDATE feeds SET last_polled_at = ?1, last_poll_count = ?2 WHERE id = ?3",
                params![polled_at.to_rfc3339(), i64::from(count), id.to_string()],
            )
            .await
            .map_err(sql_err)?;

        if changed == 0 {
            return Err(ContentForgeError::not_found("feed", id));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Items
// ---------------------------------------------------------------------------

#[async_trait]
impl ItemStore for Storage {
    async fn upsert_item(&self, feed_id: FeedId, entry: &FeedEntry) -> Result<bool> {
        let item = Item::from_entry(feed_id, entry);
        let now = item.created_at.to_rfc3339();
        let inserted = self
            .conn
            .execute(
                "INSERT INTO items (id, feed_id, guid, title, link, content, published_at, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(feed_id, guid) DO NOTHING",
                params![
                    item.id.to_string(),
                    feed_id.to_string(),
                    item.guid.as_str(),
                    item.title.as_str(),
                    item.link.as_deref(),
                    item.content.as_str(),
                    item.published_at.map(|t| t.to_rfc3339()),
                    item.status.as_str(),
                    now.as_str(),
                    now.as_str(),
                ],
            )
            .await
            .map_err(sql_err)?;
        Ok(inserted > 0)
    }

    async fn get_item(&self, id: ItemId) -> Result<Item> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {ITEM_COLUMNS} FROM items i WHERE i.id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(sql_err)?;

        match rows.next().await.map_err(sql_err)? {
            Some(row) => row_to_item(&row),
            None => Err(ContentForgeError::not_found("item", id)),
        }
    }

    async fn list_items(&self, query: &ItemQuery) -> Result<Vec<Item>> {
        if query.ids.as_ref().is_some_and(Vec::is_empty) {
            return Ok(Vec::new());
        }

        let mut sql = format!(
            "SELECT {ITEM_COLUMNS} FROM items i JOIN feeds f ON f.id = i.feed_id WHERE 1 = 1"
        );
        let mut args: Vec<Value> = Vec::new();

        if !query.statuses.is_empty() {
            sql.push_str(&format!(
                " AND i.status IN ({})",
                placeholders(query.statuses.len())
            ));
            args.extend(
                query
                    .statuses
                    .iter()
                    .map(|s| Value::Text(s.as_str().to_owned())),
            );
        }
        if let Some(site) = &query.site_id {
            sql.push_str(" AND f.site_id = ?");
            args.push(Value::Text(site.clone()));
        }
        if let Some(ids) = &query.ids {
            sql.push_str(&format!(" AND i.id IN ({})", placeholders(ids.len())));
            args.extend(ids.iter().map(|id| Value::Text(id.to_string())));
        }
        match query.has_embedding {
            Some(true) => sql.push_str(" AND i.embedding_json IS NOT NULL"),
            Some(false) => sql.push_str(" AND i.embedding_json IS NULL"),
            None => {}
        }
        if query.unclustered {
            sql.push_str(" AND i.cluster_id IS NULL");
        }
        if query.unverified {
            sql.push_str(" AND i.verification_json IS NULL");
        }
        if let Some(min) = query.min_score {
            sql.push_str(" AND i.combined_score >= ?");
            args.push(Value::Integer(i64::from(min)));
        }
        sql.push_str(match query.order {
            ItemOrder::Oldest => " ORDER BY i.created_at, i.id",
            ItemOrder::ScoreDesc => " ORDER BY i.combined_score DESC, i.created_at, i.id",
        });
        if let Some(limit) = query.limit {
            sql.push_str(" LIMIT ?");
            args.push(Value::Integer(limit as i64));
        }

        let mut rows = self
            .conn
            .query(&sql, Params::Positional(args))
            .await
            .map_err(sql_err)?;

        let mut items = Vec::new();
        while let Some(row) = rows.next().await.map_err(sql_err)? {
            items.push(row_to_item(&row)?);
        }
        Ok(items)
    }

    async fn count_items(&self, feed_id: Option<FeedId>) -> Result<usize> {
        let mut rows = match feed_id {
            Some(feed) => {
                self.conn
                    .query(
                        "SELECT COUNT(*) FROM items WHERE feed_id = ?1",
                        params![feed.to_string()],
                    )
                    .await
            }
            None => self.conn.query("SELECT COUNT(*) FROM items", params![]).await,
        }
        .map_err(sql_err)?;

        match rows.next().await.map_err(sql_err)? {
            Some(row) => Ok(row.get::<i64>(0).map_err(sql_err)? as usize),
            None => Ok(0),
        }
    }

    async fn record_score(&self, id: ItemId, score: &ScoreResult) -> Result<()> {
        let changed = self
            .conn
            .execute(
                "UPDATE items SET status = 'scored', seo_score = ?1, viral_score = ?2,
                   combined_score = ?3, score_rationale = ?4, updated_at = ?5
                 WHERE id = ?6 AND status = 'ingested'",
                params![
                    i64::from(score.seo_score),
                    i64::from(score.viral_score),
                    i64::from(score.combined_score),
                    score.rationale.as_str(),
                    Utc::now().to_rfc3339(),
                    id.to_string(),
                ],
            )
            .await
            .map_err(sql_err)?;

        if changed == 0 {
            let current = self.item_status(id).await?;
            return Err(item_transition_error(id, current, "ingested"));
        }
        Ok(())
    }

    async fn record_extraction(
        &self,
        id: ItemId,
        facts: &[ExtractedFact],
        keywords: &[String],
    ) -> Result<()> {
        let changed = self
            .conn
            .execute(
                "UPDATE items SET status = 'extracted', facts_json = ?1, keywords_json = ?2, updated_at = ?3
                 WHERE id = ?4 AND status = 'scored'",
                params![
                    to_json(&facts)?,
                    to_json(&keywords)?,
                    Utc::now().to_rfc3339(),
                    id.to_string(),
                ],
            )
            .await
            .map_err(sql_err)?;

        if changed == 0 {
            let current = self.item_status(id).await?;
            return Err(item_transition_error(id, current, "scored"));
        }
        Ok(())
    }

    async fn record_verification(&self, id: ItemId, result: &VerificationResult) -> Result<()> {
        let changed = self
            .conn
            .execute(
                "UPDATE items SET verification_json = ?1, updated_at = ?2
                 WHERE id = ?3 AND verification_json IS NULL AND status IN ('extracted', 'clustered')",
                params![to_json(result)?, Utc::now().to_rfc3339(), id.to_string()],
            )
            .await
            .map_err(sql_err)?;

        if changed == 0 {
            let current = self.item_status(id).await?;
            return Err(item_transition_error(id, current, "extracted and unverified"));
        }
        Ok(())
    }

    async fn record_embedding(&self, id: ItemId, embedding: &[f32]) -> Result<()> {
        let changed = self
            .conn
            .execute(
                "UPDATE items SET embedding_json = ?1, updated_at = ?2
                 WHERE id = ?3 AND embedding_json IS NULL AND cluster_id IS NULL
                   AND status NOT IN ('used', 'skipped')",
                params![to_json(&embedding)?, Utc::now().to_rfc3339(), id.to_string()],
            )
            .await
            .map_err(sql_err)?;

        if changed == 0 {
            let current = self.item_status(id).await?;
            return Err(item_transition_error(id, current, "unembedded and unclustered"));
        }
        Ok(())
    }

    async fn mark_used(&self, ids: &[ItemId]) -> Result<()> {
        let tx = self.conn.transaction().await.map_err(sql_err)?;
        let now = Utc::now().to_rfc3339();
        for id in ids {
            tx.execute(
                "UPDATE items SET status = 'used', updated_at = ?1
                 WHERE id = ?2 AND status NOT IN ('used', 'skipped')",
                params![now.as_str(), id.to_string()],
            )
            .await
            .map_err(sql_err)?;
        }
        tx.commit().await.map_err(sql_err)?;
        Ok(())
    }

    async fn skip_item(&self, id: ItemId) -> Result<()> {
        let changed = self
            .conn
            .execute(
                "UPDATE items SET status = 'skipped', updated_at = ?1
                 WHERE id = ?2 AND status NOT IN ('used', 'skipped')",
                params![Utc::now().to_rfc3339(), id.to_string()],
            )
            .await
            .map_err(sql_err)?;

        if changed == 0 {
            let current = self.item_status(id).await?;
            return Err(item_transition_error(id, current, "not yet used or skipped"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Clusters
// ---------------------------------------------------------------------------

#[async_trait]
impl ClusterStore for Storage {
    async fn create_cluster(&self, cluster: &Cluster) -> Result<()> {
        if cluster.member_ids.len() < 2 {
            return Err(ContentForgeError::validation(format!(
                "cluster {} needs at least 2 members, got {}",
                cluster.id,
                cluster.member_ids.len()
            )));
        }

        let tx = self.conn.transaction().await.map_err(sql_err)?;
        tx.execute(
            "INSERT INTO clusters (id, site_id, label, summary, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                cluster.id.to_string(),
                cluster.site_id.as_deref(),
                cluster.label.as_deref(),
                cluster.summary.as_deref(),
                cluster.created_at.to_rfc3339(),
            ],
        )
        .await
        .map_err(sql_err)?;

        let now = Utc::now().to_rfc3339();
        for member in &cluster.member_ids {
            let changed = tx
                .execute(
                    "UPDATE items SET cluster_id = ?1,
                       status = CASE WHEN status = 'extracted' THEN 'clustered' ELSE status END,
                       updated_at = ?2
                     WHERE id = ?3 AND cluster_id IS NULL",
                    params![cluster.id.to_string(), now.as_str(), member.to_string()],
                )
                .await
                .map_err(sql_err)?;

            if changed == 0 {
                tx.rollback().await.map_err(sql_err)?;
                return Err(ContentForgeError::validation(format!(
                    "item {member} is missing or already clustered"
                )));
            }
        }

        tx.commit().await.map_err(sql_err)?;
        Ok(())
    }

    async fn set_cluster_label(&self, id: ClusterId, label: &str, summary: &str) -> Result<()> {
        let changed = self
            .conn
            .execute(
                "UPDATE clusters SET label = ?1, summary = ?2 WHERE id = ?3",
                params![label, summary, id.to_string()],
            )
            .await
            .map_err(sql_err)?;

        if changed == 0 {
            return Err(ContentForgeError::not_found("cluster", id));
        }
        Ok(())
    }

    async fn get_cluster(&self, id: ClusterId) -> Result<Cluster> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, site_id, label, summary, created_at FROM clusters WHERE id = ?1",
                params![id.to_string()],
            )
            .await
            .map_err(sql_err)?;

        match rows.next().await.map_err(sql_err)? {
            Some(row) => self.row_to_cluster(&row).await,
            None => Err(ContentForgeError::not_found("cluster", id)),
        }
    }

    async fn list_clusters(
        &self,
        site_id: Option<&str>,
        unlabeled_only: bool,
    ) -> Result<Vec<Cluster>> {
        let mut sql =
            String::from("SELECT id, site_id, label, summary, created_at FROM clusters WHERE 1 = 1");
        let mut args: Vec<Value> = Vec::new();
        if let Some(site) = site_id {
            sql.push_str(" AND site_id = ?");
            args.push(Value::Text(site.to_owned()));
        }
        if unlabeled_only {
            sql.push_str(" AND label IS NULL");
        }
        sql.push_str(" ORDER BY created_at, id");

        let mut rows = self
            .conn
            .query(&sql, Params::Positional(args))
            .await
            .map_err(sql_err)?;

        let mut clusters = Vec::new();
        while let Some(row) = rows.next().await.map_err(sql_err)? {
            clusters.push(self.row_to_cluster(&row).await?);
        }
        Ok(clusters)
    }
}

// ---------------------------------------------------------------------------
// Pipeline runs, articles and site leases
// ---------------------------------------------------------------------------

#[async_trait]
impl RunStore for Storage {
    async fn create_run(&self, run: &PipelineRun) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO pipeline_runs (id, site_id, preset, persona, status, source_item_ids_json,
                   sections_json, assembled_html, seo_json, article_id, remote_post_id, remote_url,
                   error, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                params![
                    run.id.to_string(),
                    run.site_id.as_str(),
                    run.preset.as_str(),
                    run.persona.as_deref(),
                    run.status.as_str(),
                    to_json(&run.source_item_ids)?,
                    to_json(&run.sections)?,
                    run.assembled_html.as_deref(),
                    run.seo.as_ref().map(to_json).transpose()?,
                    run.article_id.map(|a| a.to_string()),
                    run.remote_post_id.as_deref(),
                    run.remote_url.as_deref(),
                    run.error.as_deref(),
                    run.created_at.to_rfc3339(),
                    run.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(sql_err)?;
        Ok(())
    }

    async fn get_run(&self, id: RunId) -> Result<PipelineRun> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {RUN_COLUMNS} FROM pipeline_runs WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(sql_err)?;

        match rows.next().await.map_err(sql_err)? {
            Some(row) => row_to_run(&row),
            None => Err(ContentForgeError::not_found("pipeline run", id)),
        }
    }

    async fn list_runs(&self, site_id: Option<&str>, limit: usize) -> Result<Vec<PipelineRun>> {
        let mut rows = match site_id {
            Some(site) => {
                self.conn
                    .query(
                        &format!(
                            "SELECT {RUN_COLUMNS} FROM pipeline_runs WHERE site_id = ?1
                             ORDER BY created_at DESC, id DESC LIMIT ?2"
                        ),
                        params![site, limit as i64],
                    )
                    .await
            }
            None => {
                self.conn
                    .query(
                        &format!(
                            "SELECT {RUN_COLUMNS} FROM pipeline_runs
                             ORDER BY created_at DESC, id DESC LIMIT ?1"
                        ),
                        params![limit as i64],
                    )
                    .await
            }
        }
        .map_err(sql_err)?;

        let mut runs = Vec::new();
        while let Some(row) = rows.next().await.map_err(sql_err)? {
            runs.push(row_to_run(&row)?);
        }
        Ok(runs)
    }

    async fn update_run_status(
        &self,
        id: RunId,
        status: RunStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let current = self.get_run(id).await?.status;
        if !current.can_advance_to(status) {
            return Err(run_transition_error(id, current, status));
        }

        let changed = self
            .conn
            .execute(
                "UPDATE pipeline_runs SET status = ?1, error = COALESCE(?2, error), updated_at = ?3
                 WHERE id = ?4 AND status = ?5",
                params![
                    status.as_str(),
                    error,
                    Utc::now().to_rfc3339(),
                    id.to_string(),
                    current.as_str(),
                ],
            )
            .await
            .map_err(sql_err)?;

        if changed == 0 {
            // Another writer moved the run between the read and the update.
            let latest = self.get_run(id).await?.status;
            return Err(run_transition_error(id, latest, status));
        }
        Ok(())
    }

    async fn reopen_publish(&self, id: RunId) -> Result<()> {
        let changed = self
            .conn
            .execute(
                "UPDATE pipeline_runs SET status = ?1, error = NULL, updated_at = ?2
                 WHERE id = ?3 AND status = ?4
                   AND assembled_html IS NOT NULL AND seo_json IS NOT NULL",
                params![
                    RunStatus::Publishing.as_str(),
                    Utc::now().to_rfc3339(),
                    id.to_string(),
                    RunStatus::Failed.as_str(),
                ],
            )
            .await
            .map_err(sql_err)?;

        if changed == 0 {
            return Err(reopen_error(&self.get_run(id).await?));
        }
        Ok(())
    }

    async fn save_sections(&self, id: RunId, sections: &Sections) -> Result<()> {
        let changed = self
            .conn
            .execute(
                "UPDATE pipeline_runs SET sections_json = ?1, updated_at = ?2 WHERE id = ?3",
                params![to_json(sections)?, Utc::now().to_rfc3339(), id.to_string()],
            )
            .await
            .map_err(sql_err)?;

        if changed == 0 {
            return Err(ContentForgeError::not_found("pipeline run", id));
        }
        Ok(())
    }

    async fn save_assembly(&self, id: RunId, html: &str, seo: &SeoMetadata) -> Result<()> {
        let changed = self
            .conn
            .execute(
                "UPDATE pipeline_runs SET assembled_html = ?1, seo_json = ?2, updated_at = ?3 WHERE id = ?4",
                params![html, to_json(seo)?, Utc::now().to_rfc3339(), id.to_string()],
            )
            .await
            .map_err(sql_err)?;

        if changed == 0 {
            return Err(ContentForgeError::not_found("pipeline run", id));
        }
        Ok(())
    }

    async fn create_article(&self, article: &GeneratedArticle) -> Result<()> {
        if self.count_articles(article.run_id).await? > 0 {
            return Err(ContentForgeError::validation(format!(
                "pipeline run {} already has an article",
                article.run_id
            )));
        }

        self.conn
            .execute(
                &format!(
                    "INSERT INTO generated_articles ({ARTICLE_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
                ),
                params![
                    article.id.to_string(),
                    article.run_id.to_string(),
                    article.site_id.as_str(),
                    article.title.as_str(),
                    article.html.as_str(),
                    to_json(&article.seo)?,
                    article.word_count as i64,
                    article.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(sql_err)?;
        Ok(())
    }

    async fn get_article(&self, id: ArticleId) -> Result<GeneratedArticle> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {ARTICLE_COLUMNS} FROM generated_articles WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(sql_err)?;

        match rows.next().await.map_err(sql_err)? {
            Some(row) => row_to_article(&row),
            None => Err(ContentForgeError::not_found("article", id)),
        }
    }

    async fn count_articles(&self, run_id: RunId) -> Result<usize> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*) FROM generated_articles WHERE run_id = ?1",
                params![run_id.to_string()],
            )
            .await
            .map_err(sql_err)?;

        match rows.next().await.map_err(sql_err)? {
            Some(row) => Ok(row.get::<i64>(0).map_err(sql_err)? as usize),
            None => Ok(0),
        }
    }

    async fn article_for_run(&self, run_id: RunId) -> Result<Option<GeneratedArticle>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {ARTICLE_COLUMNS} FROM generated_articles WHERE run_id = ?1"),
                params![run_id.to_string()],
            )
            .await
            .map_err(sql_err)?;

        match rows.next().await.map_err(sql_err)? {
            Some(row) => Ok(Some(row_to_article(&row)?)),
            None => Ok(None),
        }
    }

    async fn attach_article(&self, run_id: RunId, article_id: ArticleId) -> Result<()> {
        let changed = self
            .conn
            .execute(
                "UPDATE pipeline_runs SET article_id = ?1, updated_at = ?2
                 WHERE id = ?3 AND article_id IS NULL",
                params![
                    article_id.to_string(),
                    Utc::now().to_rfc3339(),
                    run_id.to_string()
                ],
            )
            .await
            .map_err(sql_err)?;

        if changed == 0 {
            let run = self.get_run(run_id).await?;
            if run.article_id != Some(article_id) {
                return Err(ContentForgeError::validation(format!(
                    "pipeline run {run_id} already references a different article"
                )));
            }
        }
        Ok(())
    }

    async fn record_publication(
        &self,
        run_id: RunId,
        remote_post_id: &str,
        remote_url: &str,
    ) -> Result<()> {
        let changed = self
            .conn
            .execute(
                "UPDATE pipeline_runs SET remote_post_id = ?1, remote_url = ?2, updated_at = ?3 WHERE id = ?4",
                params![
                    remote_post_id,
                    remote_url,
                    Utc::now().to_rfc3339(),
                    run_id.to_string()
                ],
            )
            .await
            .map_err(sql_err)?;

        if changed == 0 {
            return Err(ContentForgeError::not_found("pipeline run", run_id));
        }
        Ok(())
    }

    async fn acquire_site_lease(&self, site_id: &str, holder: &str, ttl: Duration) -> Result<()> {
        let now = Utc::now();
        let tx = self.conn.transaction().await.map_err(sql_err)?;

        let mut rows = tx
            .query(
                "SELECT holder, expires_at FROM site_leases WHERE site_id = ?1",
                params![site_id],
            )
            .await
            .map_err(sql_err)?;

        if let Some(row) = rows.next().await.map_err(sql_err)? {
            let current: String = row.get(0).map_err(sql_err)?;
            let expires_at = parse_ts(&row.get::<String>(1).map_err(sql_err)?)?;
            if current != holder && expires_at > now {
                drop(rows);
                tx.rollback().await.map_err(sql_err)?;
                return Err(lease_held_error(site_id, &current, expires_at));
            }
        }
        drop(rows);

        tx.execute(
            "INSERT INTO site_leases (site_id, holder, acquired_at, expires_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(site_id) DO UPDATE SET
               holder = excluded.holder,
               acquired_at = excluded.acquired_at,
               expires_at = excluded.expires_at",
            params![
                site_id,
                holder,
                now.to_rfc3339(),
                (now + ttl).to_rfc3339()
            ],
        )
        .await
        .map_err(sql_err)?;

        tx.commit().await.map_err(sql_err)?;
        Ok(())
    }

    async fn release_site_lease(&self, site_id: &str, holder: &str) -> Result<()> {
        self.conn
            .execute(
                "DELETE FROM site_leases WHERE site_id = ?1 AND holder = ?2",
                params![site_id, holder],
            )
            .await
            .map_err(sql_err)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Row conversion
// ---------------------------------------------------------------------------

fn sql_err(e: impl Display) -> ContentForgeError {
    ContentForgeError::Storage(e.to_string())
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| ContentForgeError::Storage(format!("encode: {e}")))
}

fn from_json<T: DeserializeOwned>(s: &str) -> Result<T> {
    serde_json::from_str(s).map_err(|e| ContentForgeError::Storage(format!("decode: {e}")))
}

/// Decode an optional JSON column; NULL maps to `None`.
fn json_column<T: DeserializeOwned>(row: &libsql::Row, idx: i32) -> Result<Option<T>> {
    row.get::<String>(idx).ok().map(|s| from_json(&s)).transpose()
}

fn parse_id<T>(s: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    s.parse()
        .map_err(|e| ContentForgeError::Storage(format!("invalid id '{s}': {e}")))
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ContentForgeError::Storage(format!("invalid date: {e}")))
}

fn optional_ts(row: &libsql::Row, idx: i32) -> Result<Option<DateTime<Utc>>> {
    row.get::<String>(idx).ok().map(|s| parse_ts(&s)).transpose()
}

fn row_to_feed(row: &libsql::Row) -> Result<Feed> {
    Ok(Feed {
        id: parse_id(&row.get::<String>(0).map_err(sql_err)?)?,
        site_id: row.get(1).map_err(sql_err)?,
        url: row.get(2).map_err(sql_err)?,
        poll_interval_mins: row.get::<i64>(3).map_err(sql_err)? as u32,
        last_polled_at: optional_ts(row, 4)?,
        last_poll_count: row.get::<i64>(5).map_err(sql_err)? as u32,
        created_at: parse_ts(&row.get::<String>(6).map_err(sql_err)?)?,
    })
}

fn row_to_item(row: &libsql::Row) -> Result<Item> {
    let score = match (
        row.get::<i64>(8).ok(),
        row.get::<i64>(9).ok(),
        row.get::<i64>(10).ok(),
    ) {
        (Some(seo), Some(viral), Some(combined)) => Some(ScoreResult {
            seo_score: seo as u8,
            viral_score: viral as u8,
            combined_score: combined as u8,
            rationale: row.get::<String>(11).unwrap_or_default(),
        }),
        _ => None,
    };

    Ok(Item {
        id: parse_id(&row.get::<String>(0).map_err(sql_err)?)?,
        feed_id: parse_id(&row.get::<String>(1).map_err(sql_err)?)?,
        guid: row.get(2).map_err(sql_err)?,
        title: row.get(3).map_err(sql_err)?,
        link: row.get::<String>(4).ok(),
        content: row.get(5).map_err(sql_err)?,
        published_at: optional_ts(row, 6)?,
        status: row.get::<String>(7).map_err(sql_err)?.parse()?,
        score,
        facts: json_column(row, 12)?.unwrap_or_default(),
        keywords: json_column(row, 13)?.unwrap_or_default(),
        verification: json_column(row, 14)?,
        embedding: json_column(row, 15)?,
        cluster_id: row
            .get::<String>(16)
            .ok()
            .map(|s| parse_id(&s))
            .transpose()?,
        created_at: parse_ts(&row.get::<String>(17).map_err(sql_err)?)?,
        updated_at: parse_ts(&row.get::<String>(18).map_err(sql_err)?)?,
    })
}

fn row_to_run(row: &libsql::Row) -> Result<PipelineRun> {
    Ok(PipelineRun {
        id: parse_id(&row.get::<String>(0).map_err(sql_err)?)?,
        site_id: row.get(1).map_err(sql_err)?,
        preset: row.get::<String>(2).map_err(sql_err)?.parse::<Preset>()?,
        persona: row.get::<String>(3).ok(),
        status: row.get::<String>(4).map_err(sql_err)?.parse()?,
        source_item_ids: from_json(&row.get::<String>(5).map_err(sql_err)?)?,
        sections: from_json(&row.get::<String>(6).map_err(sql_err)?)?,
        assembled_html: row.get::<String>(7).ok(),
        seo: json_column(row, 8)?,
        article_id: row
            .get::<String>(9)
            .ok()
            .map(|s| parse_id(&s))
            .transpose()?,
        remote_post_id: row.get::<String>(10).ok(),
        remote_url: row.get::<String>(11).ok(),
        error: row.get::<String>(12).ok(),
        created_at: parse_ts(&row.get::<String>(13).map_err(sql_err)?)?,
        updated_at: parse_ts(&row.get::<String>(14).map_err(sql_err)?)?,
    })
}

fn row_to_article(row: &libsql::Row) -> Result<GeneratedArticle> {
    Ok(GeneratedArticle {
        id: parse_id(&row.get::<String>(0).map_err(sql_err)?)?,
        run_id: parse_id(&row.get::<String>(1).map_err(sql_err)?)?,
        site_id: row.get(2).map_err(sql_err)?,
        title: row.get(3).map_err(sql_err)?,
        html: row.get(4).map_err(sql_err)?,
        seo: from_json(&row.get::<String>(5).map_err(sql_err)?)?,
        word_count: row.get::<i64>(6).map_err(sql_err)? as usize,
        created_at: parse_ts(&row.get::<String>(7).map_err(sql_err)?)?,
    })
}
