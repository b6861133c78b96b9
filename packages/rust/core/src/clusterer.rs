//! Semantic clustering of extracted items.
//!
//! Items are embedded once, then grouped greedily: each unclustered seed
//! takes its nearest unclustered neighbours above the similarity threshold,
//! and forms a cluster only when enough of them qualify. Members are
//! removed from the pool as soon as a cluster forms, so clusters are
//! disjoint. Labels come from one AI call per cluster; a cluster whose
//! label fails stays unlabeled until [`relabel_clusters`] repairs it.

use std::cmp::Ordering;

use chrono::Utc;
use contentforge_clients::TextRequest;
use contentforge_shared::{
    Cluster, ClusterId, ClusteringConfig, Item, ItemId, ItemStatus, Result, Stage,
};
use contentforge_storage::ItemQuery;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::batch::{BatchReport, ItemBatch, ensure_active, is_fatal};
use crate::context::PipelineContext;
use crate::events::PipelineEvent;
use crate::prompts::{CLUSTER_SYSTEM, cluster_label_prompt};
use crate::schemas::{ClusterLabelResponse, parse_structured};

/// Cosine similarity; `0.0` for mismatched lengths or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (mut dot, mut norm_a, mut norm_b) = (0.0f32, 0.0f32, 0.0f32);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Greedy disjoint grouping. Candidates are seeded in the given order; each
/// returned group starts with its seed.
pub fn plan_clusters(
    candidates: &[(ItemId, &[f32])],
    settings: &ClusteringConfig,
) -> Vec<Vec<ItemId>> {
    let mut taken = vec![false; candidates.len()];
    let mut groups = Vec::new();

    for seed in 0..candidates.len() {
        if taken[seed] {
            continue;
        }
        let seed_vec = candidates[seed].1;
        let mut neighbours: Vec<(usize, f32)> = candidates
            .iter()
            .enumerate()
            .filter(|(j, _)| *j != seed && !taken[*j])
            .map(|(j, (_, v))| (j, cosine_similarity(seed_vec, v)))
            .filter(|(_, sim)| *sim >= settings.similarity_threshold)
            .collect();
        neighbours.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
        neighbours.truncate(settings.candidate_cap);

        if neighbours.len() < settings.min_neighbours {
            continue;
        }
        taken[seed] = true;
        let mut group = vec![candidates[seed].0];
        for (j, _) in neighbours {
            taken[j] = true;
            group.push(candidates[j].0);
        }
        groups.push(group);
    }
    groups
}

/// Text sent to the embedding service for one item.
fn embedding_input(item: &Item, max_chars: usize) -> String {
    let text = format!("{}\n\n{}", item.title, item.content);
    text.chars().take(max_chars).collect()
}

/// Embed extracted items that have no embedding yet.
#[instrument(skip(ctx, cancel))]
pub async fn embed_items(
    ctx: &PipelineContext,
    site_id: Option<&str>,
    limit: Option<usize>,
    cancel: &CancellationToken,
) -> Result<ItemBatch<usize>> {
    ctx.progress.phase(Stage::Embed);
    let query = ItemQuery {
        has_embedding: Some(false),
        unclustered: true,
        ..ItemQuery::with_status(ItemStatus::Extracted)
    }
    .site(site_id)
    .limit(limit.unwrap_or(ctx.config.pipeline.embed_batch));
    let items = ctx.stores.items.list_items(&query).await?;

    let total = items.len();
    let mut report = ItemBatch::default();
    for (i, item) in items.iter().enumerate() {
        ensure_active(cancel, Stage::Embed)?;
        let input = embedding_input(item, ctx.config.embedding.input_chars);
        let outcome = match ctx.services.embedder.embed(&input).await {
            Ok(vector) => ctx
                .stores
                .items
                .record_embedding(item.id, &vector)
                .await
                .map(|()| vector.len()),
            Err(e) => Err(e),
        };
        match outcome {
            Ok(dims) => report.push(item.id, Ok(dims)),
            Err(e) if is_fatal(&e) => return Err(e),
            Err(e) => {
                warn!(item_id = %item.id, error = %e, "embedding failed, skipping item");
                report.push(item.id, Err(e));
            }
        }
        ctx.progress.item_done(Stage::Embed, i + 1, total);
    }

    info!(embedded = report.succeeded(), total, "embedding complete");
    ctx.emit(PipelineEvent::ItemsEmbedded {
        embedded: report.succeeded(),
        total,
    });
    Ok(report)
}

/// Result of one clustering pass.
#[derive(Debug, Default)]
pub struct ClusterReport {
    pub clusters: Vec<Cluster>,
    /// Embedded, unclustered items considered.
    pub candidates: usize,
    /// Clusters whose label call failed.
    pub unlabeled: usize,
}

/// Group embedded, unclustered items of a site into labeled clusters.
#[instrument(skip(ctx, cancel))]
pub async fn cluster_items(
    ctx: &PipelineContext,
    site_id: Option<&str>,
    cancel: &CancellationToken,
) -> Result<ClusterReport> {
    ctx.progress.phase(Stage::Cluster);
    let query = ItemQuery {
        has_embedding: Some(true),
        unclustered: true,
        ..ItemQuery::with_status(ItemStatus::Extracted)
    }
    .site(site_id);
    let items = ctx.stores.items.list_items(&query).await?;

    let candidates: Vec<(ItemId, &[f32])> = items
        .iter()
        .filter_map(|i| i.embedding.as_deref().map(|v| (i.id, v)))
        .collect();
    let groups = plan_clusters(&candidates, &ctx.config.clustering);
    debug!(candidates = candidates.len(), groups = groups.len(), "cluster plan ready");

    let planned = groups.len();
    let mut report = ClusterReport {
        candidates: candidates.len(),
        ..ClusterReport::default()
    };
    for (i, members) in groups.into_iter().enumerate() {
        ensure_active(cancel, Stage::Cluster)?;
        let mut cluster = Cluster {
            id: ClusterId::new(),
            site_id: site_id.map(str::to_owned),
            label: None,
            summary: None,
            member_ids: members,
            created_at: Utc::now(),
        };
        if let Err(e) = ctx.stores.clusters.create_cluster(&cluster).await {
            if is_fatal(&e) {
                return Err(e);
            }
            warn!(error = %e, "cluster could not be stored, skipping group");
            continue;
        }

        let titles: Vec<&str> = items
            .iter()
            .filter(|it| cluster.member_ids.contains(&it.id))
            .map(|it| it.title.as_str())
            .collect();
        match label_cluster(ctx, cluster.id, &titles).await {
            Ok(label) => {
                cluster.label = Some(label.label);
                cluster.summary = Some(label.summary);
            }
            Err(e) if is_fatal(&e) => return Err(e),
            Err(e) => {
                warn!(
                    cluster_id = %cluster.id,
                    error = %e,
                    "labeling failed, cluster left unlabeled"
                );
                report.unlabeled += 1;
            }
        }
        report.clusters.push(cluster);
        ctx.progress.item_done(Stage::Cluster, i + 1, planned);
    }

    let clustered: usize = report.clusters.iter().map(|c| c.member_ids.len()).sum();
    info!(
        clusters = report.clusters.len(),
        clustered,
        unlabeled = report.unlabeled,
        "clustering complete"
    );
    ctx.emit(PipelineEvent::ItemsClustered {
        clusters: report.clusters.iter().map(|c| c.id).collect(),
        items: clustered,
        unlabeled: report.unlabeled,
    });
    Ok(report)
}

/// Label and summary chosen for a cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterLabel {
    pub label: String,
    pub summary: String,
}

async fn label_cluster(
    ctx: &PipelineContext,
    id: ClusterId,
    titles: &[&str],
) -> Result<ClusterLabel> {
    let sample: Vec<&str> = titles
        .iter()
        .copied()
        .take(ctx.config.clustering.label_sample)
        .collect();
    let request =
        TextRequest::structured(CLUSTER_SYSTEM, cluster_label_prompt(&sample)).max_tokens(200);
    let raw = ctx.services.text.generate(request).await?;
    let response: ClusterLabelResponse = parse_structured(&raw, "cluster label")?;
    ctx.stores
        .clusters
        .set_cluster_label(id, &response.label, &response.summary)
        .await?;
    Ok(ClusterLabel {
        label: response.label,
        summary: response.summary,
    })
}

/// Retry labeling for clusters that have none.
#[instrument(skip(ctx, cancel))]
pub async fn relabel_clusters(
    ctx: &PipelineContext,
    site_id: Option<&str>,
    cancel: &CancellationToken,
) -> Result<BatchReport<ClusterId, ClusterLabel>> {
    let clusters = ctx.stores.clusters.list_clusters(site_id, true).await?;
    let mut report = BatchReport::default();
    for cluster in &clusters {
        ensure_active(cancel, Stage::Cluster)?;
        let members = ctx
            .stores
            .items
            .list_items(&ItemQuery::default().ids(cluster.member_ids.clone()))
            .await?;
        let titles: Vec<&str> = members.iter().map(|i| i.title.as_str()).collect();
        match label_cluster(ctx, cluster.id, &titles).await {
            Ok(label) => report.push(cluster.id, Ok(label)),
            Err(e) if is_fatal(&e) => return Err(e),
            Err(e) => {
                warn!(cluster_id = %cluster.id, error = %e, "relabel failed");
                report.push(cluster.id, Err(e));
            }
        }
    }
    info!(relabeled = report.succeeded(), total = report.total(), "relabel complete");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::extractor::{ExtractTarget, extract_facts};
    use crate::fakes::{
        KeywordEmbedder, ScriptedText, StaticFetcher, canned_response, test_context_with,
    };
    use crate::ingest::{add_feed, poll_feed};
    use crate::scorer::score_batch;
    use contentforge_shared::{ContentForgeError, FeedEntry};

    fn settings() -> ClusteringConfig {
        ClusteringConfig::default()
    }

    #[test]
    fn cosine_basics() {
        assert!((cosine_similarity(&[1.0, 0.0], &[2.0, 0.0]) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn three_similar_items_form_one_cluster() {
        let ids: Vec<ItemId> = (0..4).map(|_| ItemId::new()).collect();
        let a = [1.0, 0.0, 0.0];
        let b = [0.95, 0.1, 0.0];
        let c = [0.9, 0.0, 0.2];
        let d = [0.0, 0.0, 1.0];
        let candidates = vec![
            (ids[0], &a[..]),
            (ids[1], &b[..]),
            (ids[2], &c[..]),
            (ids[3], &d[..]),
        ];

        let groups = plan_clusters(&candidates, &settings());
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0][0], ids[0]);
        let mut members = groups[0].clone();
        members.sort();
        let mut expected = ids[..3].to_vec();
        expected.sort();
        assert_eq!(members, expected);
    }

    #[test]
    fn a_single_neighbour_is_not_enough() {
        let ids: Vec<ItemId> = (0..3).map(|_| ItemId::new()).collect();
        let a = [1.0, 0.0];
        let b = [0.99, 0.05];
        let c = [0.0, 1.0];
        let candidates = vec![(ids[0], &a[..]), (ids[1], &b[..]), (ids[2], &c[..])];
        assert!(plan_clusters(&candidates, &settings()).is_empty());
    }

    #[test]
    fn clusters_are_disjoint_and_capped() {
        let settings = ClusteringConfig {
            candidate_cap: 3,
            ..settings()
        };
        let vectors: Vec<[f32; 2]> = (0..9).map(|i| [1.0, i as f32 * 0.01]).collect();
        let ids: Vec<ItemId> = (0..9).map(|_| ItemId::new()).collect();
        let candidates: Vec<(ItemId, &[f32])> =
            ids.iter().zip(&vectors).map(|(id, v)| (*id, &v[..])).collect();

        let groups = plan_clusters(&candidates, &settings);
        assert!(groups.iter().all(|g| g.len() <= 4));
        let mut seen: Vec<ItemId> = groups.concat();
        let total = seen.len();
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), total);
        assert_eq!(total, 8);
    }

    fn entry(title: &str) -> FeedEntry {
        FeedEntry {
            guid: title.into(),
            title: title.into(),
            link: None,
            content: format!("{title} body"),
            published_at: None,
        }
    }

    async fn extracted_context(fail_labels: bool) -> PipelineContext {
        let fetcher = StaticFetcher::new().with_feed(
            "https://news.example.com/rss",
            vec![
                entry("rust release one"),
                entry("rust release two"),
                entry("rust release three"),
                entry("gardening tips"),
            ],
        );
        let embedder = KeywordEmbedder::new(vec![0.0, 0.0, 1.0])
            .with("rust release one", vec![1.0, 0.0, 0.0])
            .with("rust release two", vec![0.95, 0.1, 0.0])
            .with("rust release three", vec![0.9, 0.0, 0.2]);
        let text = ScriptedText::new(move |req| {
            if fail_labels && req.system == CLUSTER_SYSTEM {
                return Err(ContentForgeError::external("ai", "HTTP 500"));
            }
            canned_response(req)
        });
        let (ctx, _) = test_context_with(|s| {
            s.fetcher = Arc::new(fetcher);
            s.embedder = Arc::new(embedder);
            s.text = Arc::new(text);
        });
        let feed = add_feed(&ctx, "tech", "https://news.example.com/rss", 30)
            .await
            .unwrap();
        let cancel = CancellationToken::new();
        poll_feed(&ctx, feed.id).await.unwrap();
        score_batch(&ctx, None, None, &cancel).await.unwrap();
        extract_facts(&ctx, None, ExtractTarget::Top(10), &cancel).await.unwrap();
        ctx
    }

    #[tokio::test]
    async fn clustering_moves_members_to_clustered() {
        let ctx = extracted_context(false).await;
        let cancel = CancellationToken::new();
        let embedded = embed_items(&ctx, Some("tech"), None, &cancel).await.unwrap();
        assert_eq!(embedded.succeeded(), 4);

        let report = cluster_items(&ctx, Some("tech"), &cancel).await.unwrap();
        assert_eq!(report.candidates, 4);
        assert_eq!(report.clusters.len(), 1);
        assert_eq!(report.unlabeled, 0);

        let cluster = ctx
            .stores
            .clusters
            .get_cluster(report.clusters[0].id)
            .await
            .unwrap();
        assert_eq!(cluster.member_ids.len(), 3);
        assert_eq!(cluster.label.as_deref(), Some("Rust releases"));

        let left = ctx
            .stores
            .items
            .list_items(&ItemQuery::with_status(ItemStatus::Extracted))
            .await
            .unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].title, "gardening tips");

        // A second pass finds nothing new to group.
        let again = cluster_items(&ctx, Some("tech"), &cancel).await.unwrap();
        assert!(again.clusters.is_empty());
    }

    #[tokio::test]
    async fn failed_label_leaves_cluster_for_relabel() {
        let ctx = extracted_context(true).await;
        let cancel = CancellationToken::new();
        embed_items(&ctx, None, None, &cancel).await.unwrap();
        let report = cluster_items(&ctx, Some("tech"), &cancel).await.unwrap();
        assert_eq!(report.clusters.len(), 1);
        assert_eq!(report.unlabeled, 1);

        let unlabeled = ctx.stores.clusters.list_clusters(Some("tech"), true).await.unwrap();
        assert_eq!(unlabeled.len(), 1);
    }
}
