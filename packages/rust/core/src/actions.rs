//! Every pipeline operation as one dispatchable value.
//!
//! Front ends build an [`Action`] and hand it to [`dispatch`]; the match is
//! exhaustive, so a new action cannot be added without a handler.

use contentforge_shared::{
    ClusterId, ContentForgeError, Feed, FeedId, ItemId, PipelineRun, Preset, Result, RunId,
    ScoreResult, VerificationResult,
};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::batch::{BatchReport, FeedBatch, ItemBatch};
use crate::clusterer::{ClusterLabel, ClusterReport, cluster_items, embed_items, relabel_clusters};
use crate::context::PipelineContext;
use crate::extractor::{ExtractTarget, ExtractionSummary, extract_facts};
use crate::ingest::{PollOutcome, add_feed, list_feeds, poll_all_feeds, poll_feed};
use crate::pipeline::{
    PipelineOutcome, RunOptions, assemble_article, generate_all_sections, get_run, list_runs,
    publish_to_wp, resume_run, run_full_pipeline,
};
use crate::scorer::score_batch;
use crate::verifier::fact_check;

/// A requested pipeline operation.
#[derive(Debug, Clone)]
pub enum Action {
    AddFeed {
        site_id: String,
        url: String,
        poll_interval_mins: u32,
    },
    ListFeeds {
        site_id: Option<String>,
    },
    PollFeed {
        feed_id: FeedId,
    },
    PollAllFeeds {
        site_id: Option<String>,
        only_due: bool,
    },
    ScoreBatch {
        site_id: Option<String>,
        limit: Option<usize>,
    },
    ExtractFacts {
        site_id: Option<String>,
        target: ExtractTarget,
    },
    FactCheck {
        site_id: Option<String>,
        item_ids: Option<Vec<ItemId>>,
    },
    EmbedItems {
        site_id: Option<String>,
        limit: Option<usize>,
    },
    ClusterItems {
        site_id: Option<String>,
    },
    RelabelClusters {
        site_id: Option<String>,
    },
    GenerateAllSections {
        item_ids: Vec<ItemId>,
        preset: Preset,
        persona: Option<String>,
    },
    GenerateFromCluster {
        cluster_id: ClusterId,
        preset: Preset,
        persona: Option<String>,
    },
    AssembleArticle {
        run_id: RunId,
    },
    PublishToWp {
        run_id: RunId,
        site_id: String,
    },
    RunFullPipeline {
        site_id: String,
        options: RunOptions,
    },
    ResumeRun {
        run_id: RunId,
    },
    GetRun {
        run_id: RunId,
    },
    ListRuns {
        site_id: Option<String>,
        limit: usize,
    },
    SkipItem {
        item_id: ItemId,
    },
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Self::AddFeed { .. } => "add_feed",
            Self::ListFeeds { .. } => "list_feeds",
            Self::PollFeed { .. } => "poll_feed",
            Self::PollAllFeeds { .. } => "poll_all_feeds",
            Self::ScoreBatch { .. } => "score_batch",
            Self::ExtractFacts { .. } => "extract_facts",
            Self::FactCheck { .. } => "fact_check",
            Self::EmbedItems { .. } => "embed_items",
            Self::ClusterItems { .. } => "cluster_items",
            Self::RelabelClusters { .. } => "relabel_clusters",
            Self::GenerateAllSections { .. } => "generate_all_sections",
            Self::GenerateFromCluster { .. } => "generate_from_cluster",
            Self::AssembleArticle { .. } => "assemble_article",
            Self::PublishToWp { .. } => "publish_to_wp",
            Self::RunFullPipeline { .. } => "run_full_pipeline",
            Self::ResumeRun { .. } => "resume_run",
            Self::GetRun { .. } => "get_run",
            Self::ListRuns { .. } => "list_runs",
            Self::SkipItem { .. } => "skip_item",
        }
    }
}

/// What an action produced.
#[derive(Debug)]
pub enum ActionOutcome {
    Feed(Feed),
    Feeds(Vec<Feed>),
    Polled(PollOutcome),
    PolledAll(FeedBatch<PollOutcome>),
    Scored(ItemBatch<ScoreResult>),
    Extracted(ItemBatch<ExtractionSummary>),
    Checked(ItemBatch<VerificationResult>),
    Embedded(ItemBatch<usize>),
    Clustered(ClusterReport),
    Relabeled(BatchReport<ClusterId, ClusterLabel>),
    Run(PipelineRun),
    Runs(Vec<PipelineRun>),
    Pipeline(PipelineOutcome),
    Skipped(ItemId),
}

/// Run one action.
pub async fn dispatch(
    ctx: &PipelineContext,
    action: Action,
    cancel: &CancellationToken,
) -> Result<ActionOutcome> {
    info!(action = action.name(), "dispatching action");
    let outcome = match action {
        Action::AddFeed {
            site_id,
            url,
            poll_interval_mins,
        } => ActionOutcome::Feed(add_feed(ctx, &site_id, &url, poll_interval_mins).await?),
        Action::ListFeeds { site_id } => {
            ActionOutcome::Feeds(list_feeds(ctx, site_id.as_deref()).await?)
        }
        Action::PollFeed { feed_id } => ActionOutcome::Polled(poll_feed(ctx, feed_id).await?),
        Action::PollAllFeeds { site_id, only_due } => ActionOutcome::PolledAll(
            poll_all_feeds(ctx, site_id.as_deref(), only_due, cancel).await?,
        ),
        Action::ScoreBatch { site_id, limit } => {
            ActionOutcome::Scored(score_batch(ctx, site_id.as_deref(), limit, cancel).await?)
        }
        Action::ExtractFacts { site_id, target } => {
            ActionOutcome::Extracted(extract_facts(ctx, site_id.as_deref(), target, cancel).await?)
        }
        Action::FactCheck { site_id, item_ids } => {
            ActionOutcome::Checked(fact_check(ctx, site_id.as_deref(), item_ids, cancel).await?)
        }
        Action::EmbedItems { site_id, limit } => {
            ActionOutcome::Embedded(embed_items(ctx, site_id.as_deref(), limit, cancel).await?)
        }
        Action::ClusterItems { site_id } => {
            ActionOutcome::Clustered(cluster_items(ctx, site_id.as_deref(), cancel).await?)
        }
        Action::RelabelClusters { site_id } => {
            ActionOutcome::Relabeled(relabel_clusters(ctx, site_id.as_deref(), cancel).await?)
        }
        Action::GenerateAllSections {
            item_ids,
            preset,
            persona,
        } => ActionOutcome::Run(
            generate_all_sections(ctx, item_ids, preset, persona, cancel).await?,
        ),
        Action::GenerateFromCluster {
            cluster_id,
            preset,
            persona,
        } => {
            let cluster = ctx.stores.clusters.get_cluster(cluster_id).await?;
            if cluster.member_ids.is_empty() {
                return Err(ContentForgeError::validation(format!(
                    "cluster {cluster_id} has no members"
                )));
            }
            ActionOutcome::Run(
                generate_all_sections(ctx, cluster.member_ids, preset, persona, cancel).await?,
            )
        }
        Action::AssembleArticle { run_id } => {
            ActionOutcome::Run(assemble_article(ctx, run_id, cancel).await?)
        }
        Action::PublishToWp { run_id, site_id } => {
            ActionOutcome::Run(publish_to_wp(ctx, run_id, &site_id, cancel).await?)
        }
        Action::RunFullPipeline { site_id, options } => {
            ActionOutcome::Pipeline(run_full_pipeline(ctx, &site_id, options, cancel).await?)
        }
        Action::ResumeRun { run_id } => ActionOutcome::Run(resume_run(ctx, run_id, cancel).await?),
        Action::GetRun { run_id } => ActionOutcome::Run(get_run(ctx, run_id).await?),
        Action::ListRuns { site_id, limit } => {
            ActionOutcome::Runs(list_runs(ctx, site_id.as_deref(), limit).await?)
        }
        Action::SkipItem { item_id } => {
            ctx.stores.items.skip_item(item_id).await?;
            ActionOutcome::Skipped(item_id)
        }
    };
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::test_context_with;

    #[tokio::test]
    async fn dispatches_feed_registry_actions() {
        let (ctx, _) = test_context_with(|_| {});
        let cancel = CancellationToken::new();
        let added = dispatch(
            &ctx,
            Action::AddFeed {
                site_id: "tech".into(),
                url: "https://news.example.com/rss".into(),
                poll_interval_mins: 15,
            },
            &cancel,
        )
        .await
        .unwrap();
        assert!(matches!(added, ActionOutcome::Feed(ref f) if f.site_id == "tech"));

        let listed = dispatch(&ctx, Action::ListFeeds { site_id: None }, &cancel)
            .await
            .unwrap();
        let ActionOutcome::Feeds(feeds) = listed else {
            panic!("expected feeds");
        };
        assert_eq!(feeds.len(), 1);
    }

    #[tokio::test]
    async fn unknown_run_is_not_found() {
        let (ctx, _) = test_context_with(|_| {});
        let err = dispatch(&ctx, Action::GetRun { run_id: RunId::new() }, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), contentforge_shared::ErrorKind::NotFound);
    }

    #[test]
    fn names_are_snake_case() {
        let action = Action::SkipItem {
            item_id: ItemId::new(),
        };
        assert_eq!(action.name(), "skip_item");
    }
}
