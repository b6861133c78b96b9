//! Pipeline orchestration.
//!
//! [`run_full_pipeline`] drives one site end to end: poll → score → extract
//! → verify → select → generate → assemble → publish. Everything from
//! generation on is recorded as a [`PipelineRun`] whose status only moves
//! forward, so an interrupted run can be resumed from its last completed
//! step with [`resume_run`].
//!
//! This module is the only place that moves run status and marks items
//! `used`. A stage failure marks the run `failed` with the error, emits
//! `pipeline_failed`, and returns the error tagged with its stage.

use chrono::Duration;
use contentforge_shared::{
    ContentForgeError, ErrorKind, Item, ItemId, ItemStatus, PipelineRun, Preset, Result, RunId,
    RunStatus, Stage,
};
use contentforge_storage::{ItemOrder, ItemQuery};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::assembler::assemble;
use crate::batch::ensure_active;
use crate::context::PipelineContext;
use crate::events::PipelineEvent;
use crate::extractor::{ExtractTarget, extract_facts};
use crate::ingest::poll_all_feeds;
use crate::publisher::publish_run;
use crate::scorer::score_batch;
use crate::sections::{ContentBrief, generate_sections};
use crate::verifier::fact_check;

/// Per-invocation overrides for [`run_full_pipeline`]. Unset fields fall
/// back to the `[defaults]` config.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub preset: Option<Preset>,
    pub min_score: Option<u8>,
    pub persona: Option<String>,
}

/// How a full pipeline invocation ended.
#[derive(Debug, Clone)]
pub enum PipelineOutcome {
    /// An article was generated and published.
    Completed(PipelineRun),
    /// No item reached the threshold; no run was created.
    NoContent { message: String },
}

// ---------------------------------------------------------------------------
// Full pipeline
// ---------------------------------------------------------------------------

/// Run the whole pipeline for one site while holding its lease.
#[instrument(skip(ctx, options, cancel), fields(site = %site_id))]
pub async fn run_full_pipeline(
    ctx: &PipelineContext,
    site_id: &str,
    options: RunOptions,
    cancel: &CancellationToken,
) -> Result<PipelineOutcome> {
    info!("starting full pipeline");
    let holder = Uuid::now_v7().to_string();
    if let Err(e) = acquire_lease(ctx, site_id, &holder).await {
        report_failure(ctx, site_id, &e);
        return Err(e);
    }

    let result = run_locked(ctx, site_id, &options, cancel).await;
    release_lease(ctx, site_id, &holder).await;
    result
}

async fn run_locked(
    ctx: &PipelineContext,
    site_id: &str,
    options: &RunOptions,
    cancel: &CancellationToken,
) -> Result<PipelineOutcome> {
    // Fail before any work when the site cannot be published to.
    let prepared = match ctx.config.site(site_id) {
        Ok(_) => prepare_items(ctx, site_id, options, cancel).await,
        Err(e) => Err(e),
    };
    let selected = match prepared {
        Ok(selected) => selected,
        Err(e) => {
            report_failure(ctx, site_id, &e);
            return Err(e);
        }
    };

    if selected.is_empty() {
        let min_score = options.min_score.unwrap_or(ctx.config.defaults.min_score);
        let message = format!(
            "no extracted items for site '{site_id}' scored at or above {min_score}"
        );
        info!(%message, "nothing to publish");
        ctx.progress.done(&message);
        return Ok(PipelineOutcome::NoContent { message });
    }

    // --- Run: generate → assemble → publish ---
    let run = PipelineRun::pending(
        site_id,
        options.preset.unwrap_or(ctx.config.defaults.preset),
        options.persona.clone(),
        selected,
    );
    if let Err(e) = ctx.stores.runs.create_run(&run).await {
        report_failure(ctx, site_id, &e);
        return Err(e);
    }
    info!(
        run_id = %run.id,
        items = run.source_item_ids.len(),
        preset = %run.preset,
        "pipeline run created"
    );

    let run = drive_run(ctx, run.id, RunStatus::Completed, cancel).await?;
    ctx.progress
        .done(&format!("published {}", run.remote_url.as_deref().unwrap_or("draft")));
    Ok(PipelineOutcome::Completed(run))
}

/// Ingest-side stages, then selection of the best extracted items.
async fn prepare_items(
    ctx: &PipelineContext,
    site_id: &str,
    options: &RunOptions,
    cancel: &CancellationToken,
) -> Result<Vec<ItemId>> {
    let site = Some(site_id);
    let batches = &ctx.config.pipeline;

    // --- Phase 1: Ingest ---
    poll_all_feeds(ctx, site, false, cancel)
        .await
        .map_err(|e| e.at(Stage::Poll))?;

    // --- Phase 2: Score ---
    score_batch(ctx, site, None, cancel)
        .await
        .map_err(|e| e.at(Stage::Score))?;

    // --- Phase 3: Extract ---
    extract_facts(ctx, site, ExtractTarget::Top(batches.extract_batch), cancel)
        .await
        .map_err(|e| e.at(Stage::Extract))?;

    // --- Phase 4: Verify ---
    fact_check(ctx, site, None, cancel)
        .await
        .map_err(|e| e.at(Stage::Verify))?;

    // --- Phase 5: Select ---
    ensure_active(cancel, Stage::Select)?;
    ctx.progress.phase(Stage::Select);
    let query = ItemQuery {
        min_score: Some(options.min_score.unwrap_or(ctx.config.defaults.min_score)),
        ..ItemQuery::with_status(ItemStatus::Extracted)
    }
    .site(site)
    .order(ItemOrder::ScoreDesc)
    .limit(batches.select_limit);
    let selected = ctx
        .stores
        .items
        .list_items(&query)
        .await
        .map_err(|e| e.at(Stage::Select))?;

    Ok(selected.into_iter().map(|i| i.id).collect())
}

// ---------------------------------------------------------------------------
// Run-level operations
// ---------------------------------------------------------------------------

/// Create a run for explicit items and generate its sections. The run is
/// left `assembling`.
#[instrument(skip(ctx, item_ids, cancel), fields(items = item_ids.len()))]
pub async fn generate_all_sections(
    ctx: &PipelineContext,
    item_ids: Vec<ItemId>,
    preset: Preset,
    persona: Option<String>,
    cancel: &CancellationToken,
) -> Result<PipelineRun> {
    let items = load_items(ctx, &item_ids).await?;
    if let Some(done) = items.iter().find(|i| i.status.is_terminal()) {
        return Err(ContentForgeError::validation(format!(
            "item {} is {} and cannot be written about",
            done.id, done.status
        )));
    }
    let site_id = common_site(ctx, &items).await?;

    let run = PipelineRun::pending(site_id, preset, persona, item_ids);
    ctx.stores.runs.create_run(&run).await?;
    drive_run(ctx, run.id, RunStatus::Assembling, cancel).await
}

/// Assemble a run whose sections are generated. The run is left `publishing`.
pub async fn assemble_article(
    ctx: &PipelineContext,
    run_id: RunId,
    cancel: &CancellationToken,
) -> Result<PipelineRun> {
    let run = ctx.stores.runs.get_run(run_id).await?;
    if run.status != RunStatus::Assembling {
        return Err(ContentForgeError::validation(format!(
            "run {run_id} is {}, expected assembling",
            run.status
        )));
    }
    drive_run(ctx, run_id, RunStatus::Publishing, cancel).await
}

/// Publish an assembled run to `site_id`.
///
/// A run that failed after assembly is reopened and only the push is
/// repeated. A completed run is pushed again using its existing article
/// record; its status and items are left as they are.
pub async fn publish_to_wp(
    ctx: &PipelineContext,
    run_id: RunId,
    site_id: &str,
    cancel: &CancellationToken,
) -> Result<PipelineRun> {
    let run = ctx.stores.runs.get_run(run_id).await?;
    if run.site_id != site_id {
        return Err(ContentForgeError::validation(format!(
            "run {run_id} belongs to site '{}', not '{site_id}'",
            run.site_id
        )));
    }
    match run.status {
        RunStatus::Publishing => drive_run(ctx, run_id, RunStatus::Completed, cancel).await,
        RunStatus::Failed if run.is_assembled() => {
            reopen_publish(ctx, &run).await?;
            drive_run(ctx, run_id, RunStatus::Completed, cancel).await
        }
        RunStatus::Completed => {
            let publication = publish_run(ctx, &run).await.map_err(|e| e.at(Stage::Publish))?;
            ctx.emit(PipelineEvent::ArticlePublished {
                run_id,
                site_id: run.site_id.clone(),
                remote_post_id: publication.remote.remote_id,
                url: publication.remote.url,
            });
            ctx.stores.runs.get_run(run_id).await
        }
        other => Err(ContentForgeError::validation(format!(
            "run {run_id} is {other}; only assembled runs can be published"
        ))),
    }
}

/// Continue an interrupted run from its last completed step, holding the
/// site lease while it runs. A run that failed after assembly resumes at
/// publishing.
#[instrument(skip(ctx, cancel))]
pub async fn resume_run(
    ctx: &PipelineContext,
    run_id: RunId,
    cancel: &CancellationToken,
) -> Result<PipelineRun> {
    let run = ctx.stores.runs.get_run(run_id).await?;
    let retry_publish = run.status == RunStatus::Failed && run.is_assembled();
    if run.status.is_terminal() && !retry_publish {
        return Err(ContentForgeError::validation(format!(
            "run {run_id} is already {}",
            run.status
        )));
    }
    info!(status = %run.status, "resuming pipeline run");

    let holder = run_id.to_string();
    acquire_lease(ctx, &run.site_id, &holder).await?;
    let result = async {
        if retry_publish {
            reopen_publish(ctx, &run).await?;
        }
        drive_run(ctx, run_id, RunStatus::Completed, cancel).await
    }
    .await;
    release_lease(ctx, &run.site_id, &holder).await;
    result
}

pub async fn get_run(ctx: &PipelineContext, run_id: RunId) -> Result<PipelineRun> {
    ctx.stores.runs.get_run(run_id).await
}

pub async fn list_runs(
    ctx: &PipelineContext,
    site_id: Option<&str>,
    limit: usize,
) -> Result<Vec<PipelineRun>> {
    ctx.stores.runs.list_runs(site_id, limit).await
}

// ---------------------------------------------------------------------------
// Run state machine
// ---------------------------------------------------------------------------

/// Stage that moves a run out of `status`.
fn stage_for(status: RunStatus) -> Stage {
    match status {
        RunStatus::Pending | RunStatus::Generating => Stage::Generate,
        RunStatus::Assembling => Stage::Assemble,
        RunStatus::Publishing | RunStatus::Completed | RunStatus::Failed => Stage::Publish,
    }
}

/// Advance a run step by step until it reaches `until` or completes.
async fn drive_run(
    ctx: &PipelineContext,
    run_id: RunId,
    until: RunStatus,
    cancel: &CancellationToken,
) -> Result<PipelineRun> {
    loop {
        let run = ctx.stores.runs.get_run(run_id).await?;
        match run.status {
            RunStatus::Completed => return Ok(run),
            RunStatus::Failed => {
                return Err(ContentForgeError::validation(format!(
                    "run {run_id} has failed: {}",
                    run.error.as_deref().unwrap_or("unknown error")
                )));
            }
            status if status == until => return Ok(run),
            _ => {}
        }

        let stage = stage_for(run.status);
        let step = match ensure_active(cancel, stage) {
            Ok(()) => advance(ctx, &run, cancel).await,
            Err(e) => Err(e),
        };
        if let Err(e) = step {
            return Err(fail_run(ctx, &run, e.at(stage)).await);
        }
    }
}

/// Perform the work of the run's current status and move it one step on.
async fn advance(
    ctx: &PipelineContext,
    run: &PipelineRun,
    cancel: &CancellationToken,
) -> Result<()> {
    let runs = &ctx.stores.runs;
    match run.status {
        RunStatus::Pending => runs.update_run_status(run.id, RunStatus::Generating, None).await,
        RunStatus::Generating => {
            ctx.progress.phase(Stage::Generate);
            let brief = brief_for(ctx, run).await?;
            let sections =
                generate_sections(ctx, &brief, run.preset, run.persona.as_deref(), cancel).await?;
            runs.save_sections(run.id, &sections).await?;
            runs.update_run_status(run.id, RunStatus::Assembling, None).await?;
            ctx.emit(PipelineEvent::SectionsGenerated {
                run_id: run.id,
                sections: sections.len(),
                words: sections.total_words(),
            });
            Ok(())
        }
        RunStatus::Assembling => {
            ctx.progress.phase(Stage::Assemble);
            let brief = brief_for(ctx, run).await?;
            let article = assemble(ctx, &run.sections, &brief).await?;
            runs.save_assembly(run.id, &article.html, &article.seo).await?;
            runs.update_run_status(run.id, RunStatus::Publishing, None).await?;
            ctx.emit(PipelineEvent::ArticleAssembled {
                run_id: run.id,
                word_count: article.word_count,
            });
            Ok(())
        }
        RunStatus::Publishing => {
            ctx.progress.phase(Stage::Publish);
            let publication = publish_run(ctx, run).await?;
            ctx.stores.items.mark_used(&run.source_item_ids).await?;
            runs.update_run_status(run.id, RunStatus::Completed, None).await?;
            ctx.emit(PipelineEvent::ArticlePublished {
                run_id: run.id,
                site_id: run.site_id.clone(),
                remote_post_id: publication.remote.remote_id,
                url: publication.remote.url,
            });
            ctx.emit(PipelineEvent::PipelineCompleted {
                site_id: run.site_id.clone(),
                run_id: run.id,
            });
            info!(run_id = %run.id, "pipeline run completed");
            Ok(())
        }
        RunStatus::Completed | RunStatus::Failed => Ok(()),
    }
}

/// Record a failure on the run and signal it. Returns the error for the
/// caller to propagate.
async fn fail_run(
    ctx: &PipelineContext,
    run: &PipelineRun,
    err: ContentForgeError,
) -> ContentForgeError {
    let reason = if err.kind() == ErrorKind::Cancelled {
        "cancelled".to_string()
    } else {
        err.to_string()
    };
    if let Err(store_err) = ctx
        .stores
        .runs
        .update_run_status(run.id, RunStatus::Failed, Some(&reason))
        .await
    {
        warn!(run_id = %run.id, error = %store_err, "could not mark run failed");
    }
    report_failure(ctx, &run.site_id, &err);
    err
}

fn report_failure(ctx: &PipelineContext, site_id: &str, err: &ContentForgeError) {
    warn!(site = %site_id, error = %err, "pipeline failed");
    ctx.emit(PipelineEvent::PipelineFailed {
        site_id: site_id.to_string(),
        stage: err.stage(),
        message: err.to_string(),
    });
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn acquire_lease(ctx: &PipelineContext, site_id: &str, holder: &str) -> Result<()> {
    let ttl_secs = i64::try_from(ctx.config.pipeline.lease_ttl_secs).unwrap_or(i64::MAX / 1000);
    ctx.stores
        .runs
        .acquire_site_lease(site_id, holder, Duration::seconds(ttl_secs))
        .await
}

async fn reopen_publish(ctx: &PipelineContext, run: &PipelineRun) -> Result<()> {
    ctx.stores.runs.reopen_publish(run.id).await?;
    info!(run_id = %run.id, previous_error = ?run.error, "retrying publish of failed run");
    Ok(())
}

async fn release_lease(ctx: &PipelineContext, site_id: &str, holder: &str) {
    if let Err(e) = ctx.stores.runs.release_site_lease(site_id, holder).await {
        warn!(site = %site_id, error = %e, "could not release site lease");
    }
}

/// Items by id, highest score first. Missing ids are an error.
async fn load_items(ctx: &PipelineContext, ids: &[ItemId]) -> Result<Vec<Item>> {
    if ids.is_empty() {
        return Err(ContentForgeError::validation("no source items given"));
    }
    let mut items = ctx
        .stores
        .items
        .list_items(&ItemQuery::default().ids(ids.to_vec()))
        .await?;
    if let Some(missing) = ids.iter().find(|id| !items.iter().any(|i| i.id == **id)) {
        return Err(ContentForgeError::not_found("item", missing));
    }
    items.sort_by(|a, b| b.combined_score().cmp(&a.combined_score()));
    Ok(items)
}

async fn brief_for(ctx: &PipelineContext, run: &PipelineRun) -> Result<ContentBrief> {
    ContentBrief::from_items(&load_items(ctx, &run.source_item_ids).await?)
}

/// The one site owning every item's feed.
async fn common_site(ctx: &PipelineContext, items: &[Item]) -> Result<String> {
    let mut site: Option<String> = None;
    for item in items {
        let feed = ctx.stores.feeds.get_feed(item.feed_id).await?;
        match &site {
            None => site = Some(feed.site_id),
            Some(existing) if *existing == feed.site_id => {}
            Some(existing) => {
                return Err(ContentForgeError::validation(format!(
                    "items span sites '{existing}' and '{}'",
                    feed.site_id
                )));
            }
        }
    }
    site.ok_or_else(|| ContentForgeError::validation("no source items given"))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::events::RecordingEventSink;
    use crate::fakes::{
        RecordingConnector, ScriptedText, StaticFetcher, canned_response, requested_section,
        test_context_with,
    };
    use crate::ingest::add_feed;
    use crate::prompts::SCORE_SYSTEM;
    use contentforge_clients::TextRequest;
    use contentforge_shared::{Feed, FeedEntry};

    const FEED_URL: &str = "https://news.example.com/rss";

    fn entries() -> Vec<FeedEntry> {
        ["Rust 1.85 ships the 2024 edition", "Async closures land"]
            .iter()
            .enumerate()
            .map(|(i, title)| FeedEntry {
                guid: format!("g{i}"),
                title: title.to_string(),
                link: Some(format!("https://news.example.com/{i}")),
                content: format!("{title}. Details follow."),
                published_at: None,
            })
            .collect()
    }

    struct Harness {
        ctx: PipelineContext,
        events: Arc<RecordingEventSink>,
        cms: Arc<RecordingConnector>,
        no_cancel: CancellationToken,
    }

    async fn harness(
        text: impl Fn(&TextRequest) -> Result<String> + Send + Sync + 'static,
    ) -> Harness {
        let cms = Arc::new(RecordingConnector::new());
        let (ctx, events) = test_context_with(|s| {
            s.text = Arc::new(ScriptedText::new(text));
            s.fetcher = Arc::new(StaticFetcher::new().with_feed(FEED_URL, entries()));
            s.cms = cms.clone();
        });
        add_feed(&ctx, "tech", FEED_URL, 30).await.unwrap();
        Harness {
            ctx,
            events,
            cms,
            no_cancel: CancellationToken::new(),
        }
    }

    async fn run_tech(h: &Harness, options: RunOptions) -> Result<PipelineOutcome> {
        run_full_pipeline(&h.ctx, "tech", options, &h.no_cancel).await
    }

    async fn completed_run(h: &Harness) -> PipelineRun {
        match run_tech(h, RunOptions::default()).await.unwrap() {
            PipelineOutcome::Completed(run) => run,
            other => panic!("expected a completed run, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn completes_and_marks_items_used() {
        let h = harness(canned_response).await;
        let outcome = run_tech(&h, RunOptions::default()).await.unwrap();

        let PipelineOutcome::Completed(run) = outcome else {
            panic!("expected a completed run");
        };
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.source_item_ids.len(), 2);
        assert_eq!(run.sections.len(), 6);
        let html = run.assembled_html.as_deref().unwrap();
        assert!(html.starts_with("<section class=\"cf-section cf-zero-click\">"));
        assert_eq!(run.remote_post_id.as_deref(), Some("1"));
        assert_eq!(h.ctx.stores.runs.count_articles(run.id).await.unwrap(), 1);

        let used = h
            .ctx
            .stores
            .items
            .list_items(&ItemQuery::with_status(ItemStatus::Used))
            .await
            .unwrap();
        assert_eq!(used.len(), 2);

        let names = h.events.names();
        assert_eq!(names.last(), Some(&"pipeline_completed"));
        assert!(names.contains(&"sections_generated"));
        assert!(names.contains(&"article_assembled"));
        assert!(!names.contains(&"pipeline_failed"));

        // The lease is released afterwards.
        h.ctx
            .stores
            .runs
            .acquire_site_lease("tech", "someone-else", Duration::seconds(60))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn below_threshold_is_no_content() {
        let h = harness(|req| {
            if req.system == SCORE_SYSTEM {
                return Ok(r#"{"seo_score": 85, "viral_score": 85}"#.into());
            }
            canned_response(req)
        })
        .await;

        let outcome = run_tech(
            &h,
            RunOptions {
                min_score: Some(90),
                ..RunOptions::default()
            },
        )
        .await
        .unwrap();

        let PipelineOutcome::NoContent { message } = outcome else {
            panic!("expected no content");
        };
        assert!(message.contains("90"));
        assert!(list_runs(&h.ctx, Some("tech"), 10).await.unwrap().is_empty());
        assert!(h.cms.client.posts().is_empty());
    }

    #[tokio::test]
    async fn section_failure_fails_the_run_and_signals() {
        let h = harness(|req| {
            if requested_section(req) == Some("body") {
                return Err(ContentForgeError::external("ai", "HTTP 502: bad gateway"));
            }
            canned_response(req)
        })
        .await;

        let err = run_tech(&h, RunOptions::default()).await.unwrap_err();
        assert_eq!(err.stage(), Some(Stage::Generate));
        assert!(err.to_string().contains("HTTP 502"));

        let runs = list_runs(&h.ctx, Some("tech"), 10).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, RunStatus::Failed);
        assert!(runs[0].error.as_deref().unwrap().contains("HTTP 502"));

        let failed: Vec<_> = h
            .events
            .events()
            .into_iter()
            .filter(|e| e.name() == "pipeline_failed")
            .collect();
        assert_eq!(failed.len(), 1);
        let PipelineEvent::PipelineFailed { site_id, stage, message } = &failed[0] else {
            unreachable!();
        };
        assert_eq!(site_id, "tech");
        assert_eq!(*stage, Some(Stage::Generate));
        assert!(message.contains("HTTP 502"));

        // Source items stay available for a later run.
        let used = h
            .ctx
            .stores
            .items
            .list_items(&ItemQuery::with_status(ItemStatus::Used))
            .await
            .unwrap();
        assert!(used.is_empty());
    }

    #[tokio::test]
    async fn publishing_twice_reuses_the_article() {
        let h = harness(canned_response).await;
        let run = completed_run(&h).await;

        let again = publish_to_wp(&h.ctx, run.id, "tech", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(again.status, RunStatus::Completed);
        assert_eq!(again.article_id, run.article_id);
        assert_eq!(h.ctx.stores.runs.count_articles(run.id).await.unwrap(), 1);
        assert_eq!(h.cms.client.posts().len(), 2);
    }

    async fn failed_push_run(h: &Harness) -> PipelineRun {
        h.cms.client.fail_next(1);
        let err = run_tech(h, RunOptions::default()).await.unwrap_err();
        assert_eq!(err.stage(), Some(Stage::Publish));

        let runs = list_runs(&h.ctx, Some("tech"), 10).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, RunStatus::Failed);
        assert!(runs[0].article_id.is_some());
        runs[0].clone()
    }

    async fn used_count(h: &Harness) -> usize {
        h.ctx
            .stores
            .items
            .list_items(&ItemQuery::with_status(ItemStatus::Used))
            .await
            .unwrap()
            .len()
    }

    #[tokio::test]
    async fn failed_push_is_retried_without_a_second_article() {
        let h = harness(canned_response).await;
        let failed = failed_push_run(&h).await;
        assert_eq!(used_count(&h).await, 0);

        let run = publish_to_wp(&h.ctx, failed.id, "tech", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.error, None);
        assert_eq!(run.article_id, failed.article_id);
        assert_eq!(run.remote_post_id.as_deref(), Some("1"));
        assert_eq!(h.ctx.stores.runs.count_articles(run.id).await.unwrap(), 1);
        assert_eq!(h.cms.client.posts().len(), 1);
        assert_eq!(used_count(&h).await, 2);
        assert_eq!(h.events.names().last(), Some(&"pipeline_completed"));
    }

    #[tokio::test]
    async fn resume_retries_a_failed_push() {
        let h = harness(canned_response).await;
        let failed = failed_push_run(&h).await;

        let run = resume_run(&h.ctx, failed.id, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(h.ctx.stores.runs.count_articles(run.id).await.unwrap(), 1);
        assert_eq!(used_count(&h).await, 2);
    }

    #[tokio::test]
    async fn run_failed_before_assembly_cannot_be_published() {
        let h = harness(|req| {
            if requested_section(req) == Some("body") {
                return Err(ContentForgeError::external("ai", "HTTP 502: bad gateway"));
            }
            canned_response(req)
        })
        .await;
        run_tech(&h, RunOptions::default()).await.unwrap_err();
        let failed = &list_runs(&h.ctx, Some("tech"), 10).await.unwrap()[0];

        let err = publish_to_wp(&h.ctx, failed.id, "tech", &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        let err = resume_run(&h.ctx, failed.id, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("already failed"));
    }

    #[tokio::test]
    async fn publishing_to_another_site_is_rejected() {
        let h = harness(canned_response).await;
        let run = completed_run(&h).await;
        let err = publish_to_wp(&h.ctx, run.id, "other", &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    async fn extracted_ids(h: &Harness) -> Vec<ItemId> {
        let cancel = CancellationToken::new();
        let site = Some("tech");
        poll_all_feeds(&h.ctx, site, false, &cancel).await.unwrap();
        score_batch(&h.ctx, site, None, &cancel).await.unwrap();
        extract_facts(&h.ctx, site, ExtractTarget::Top(10), &cancel)
            .await
            .unwrap();
        h.ctx
            .stores
            .items
            .list_items(&ItemQuery::with_status(ItemStatus::Extracted))
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.id)
            .collect()
    }

    #[tokio::test]
    async fn step_by_step_operations_then_resume() {
        let h = harness(canned_response).await;
        let ids = extracted_ids(&h).await;
        let cancel = CancellationToken::new();

        let run = generate_all_sections(&h.ctx, ids, Preset::NewsPost, None, &cancel)
            .await
            .unwrap();
        assert_eq!(run.status, RunStatus::Assembling);
        assert_eq!(run.sections.len(), 5);

        let run = assemble_article(&h.ctx, run.id, &cancel).await.unwrap();
        assert_eq!(run.status, RunStatus::Publishing);
        assert!(run.seo.is_some());

        // Assembling again is not allowed once past that step.
        assert!(assemble_article(&h.ctx, run.id, &cancel).await.is_err());

        let run = resume_run(&h.ctx, run.id, &cancel).await.unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert!(run.remote_url.is_some());
        assert!(resume_run(&h.ctx, run.id, &cancel).await.is_err());
    }

    #[tokio::test]
    async fn cancellation_fails_the_active_run() {
        let h = harness(canned_response).await;
        let ids = extracted_ids(&h).await;
        let run = generate_all_sections(&h.ctx, ids, Preset::NewsPost, None, &h.no_cancel)
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = resume_run(&h.ctx, run.id, &cancel).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);

        let stored = get_run(&h.ctx, run.id).await.unwrap();
        assert_eq!(stored.status, RunStatus::Failed);
        assert_eq!(stored.error.as_deref(), Some("cancelled"));
        assert_eq!(h.events.names().last(), Some(&"pipeline_failed"));
    }

    #[tokio::test]
    async fn held_lease_blocks_a_second_pipeline() {
        let h = harness(canned_response).await;
        h.ctx
            .stores
            .runs
            .acquire_site_lease("tech", "other-invocation", Duration::seconds(600))
            .await
            .unwrap();

        let err = run_tech(&h, RunOptions::default()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.to_string().contains("other-invocation"));
        assert_eq!(h.events.names(), vec!["pipeline_failed"]);
    }

    #[tokio::test]
    async fn items_from_different_sites_cannot_share_a_run() {
        let h = harness(canned_response).await;
        let mut ids = extracted_ids(&h).await;

        let other = Feed::new("gardening", "https://garden.example.com/rss", 30);
        h.ctx.stores.feeds.insert_feed(&other).await.unwrap();
        h.ctx
            .stores
            .items
            .upsert_item(other.id, &entries()[0])
            .await
            .unwrap();
        let foreign = h
            .ctx
            .stores
            .items
            .list_items(&ItemQuery::with_status(ItemStatus::Ingested).site(Some("gardening")))
            .await
            .unwrap();
        ids.push(foreign[0].id);

        let err = generate_all_sections(&h.ctx, ids, Preset::NewsPost, None, &h.no_cancel)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("span sites"));
    }

    #[tokio::test]
    async fn unconfigured_site_fails_before_polling() {
        let h = harness(canned_response).await;
        let err = run_full_pipeline(&h.ctx, "unknown", RunOptions::default(), &h.no_cancel)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert_eq!(h.ctx.stores.items.count_items(None).await.unwrap(), 0);
    }
}
