//! Relevance scoring: `ingested → scored`.

use contentforge_clients::TextRequest;
use contentforge_shared::{Item, ItemStatus, Result, ScoreResult, Stage};
use contentforge_storage::ItemQuery;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::batch::{ItemBatch, ensure_active, is_fatal};
use crate::context::PipelineContext;
use crate::events::PipelineEvent;
use crate::prompts::{SCORE_SYSTEM, score_prompt};
use crate::schemas::{ScoreResponse, parse_structured};

/// Ask the AI service to rate one item. Axis scores are clamped to
/// `[0, 100]` before the combined score is derived.
pub async fn score_item(ctx: &PipelineContext, item: &Item) -> Result<ScoreResult> {
    let prompt = score_prompt(
        &item.title,
        &item.content,
        ctx.config.pipeline.content_prefix_chars,
    );
    let raw = ctx
        .services
        .text
        .generate(TextRequest::structured(SCORE_SYSTEM, prompt).max_tokens(300))
        .await?;
    let response: ScoreResponse = parse_structured(&raw, "score")?;
    Ok(ScoreResult::from_axes(
        response.seo_score,
        response.viral_score,
        response.rationale,
    ))
}

/// Score up to `limit` ingested items, oldest first.
#[instrument(skip(ctx, cancel))]
pub async fn score_batch(
    ctx: &PipelineContext,
    site_id: Option<&str>,
    limit: Option<usize>,
    cancel: &CancellationToken,
) -> Result<ItemBatch<ScoreResult>> {
    ctx.progress.phase(Stage::Score);
    let limit = limit.unwrap_or(ctx.config.pipeline.score_batch);
    let items = ctx
        .stores
        .items
        .list_items(
            &ItemQuery::with_status(ItemStatus::Ingested)
                .site(site_id)
                .limit(limit),
        )
        .await?;

    let total = items.len();
    let mut report = ItemBatch::default();
    for (i, item) in items.iter().enumerate() {
        ensure_active(cancel, Stage::Score)?;
        let result = match score_item(ctx, item).await {
            Ok(score) => ctx
                .stores
                .items
                .record_score(item.id, &score)
                .await
                .map(|()| score),
            Err(e) => Err(e),
        };
        match result {
            Ok(score) => {
                debug!(item_id = %item.id, combined = score.combined_score, "item scored");
                report.push(item.id, Ok(score));
            }
            Err(e) if is_fatal(&e) => return Err(e),
            Err(e) => {
                warn!(item_id = %item.id, error = %e, "scoring failed, skipping item");
                report.push(item.id, Err(e));
            }
        }
        ctx.progress.item_done(Stage::Score, i + 1, total);
    }

    info!(scored = report.succeeded(), total, "scoring complete");
    ctx.emit(PipelineEvent::ItemsScored {
        scored: report.succeeded(),
        total,
    });
    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::fakes::{ScriptedText, StaticFetcher, test_context_with};
    use crate::ingest::{add_feed, poll_feed};
    use contentforge_shared::{ContentForgeError, FeedEntry};

    fn entries(n: usize) -> Vec<FeedEntry> {
        (0..n)
            .map(|i| FeedEntry {
                guid: format!("g{i}"),
                title: format!("Story {i}"),
                link: None,
                content: format!("Content {i}"),
                published_at: None,
            })
            .collect()
    }

    async fn seeded(
        text: ScriptedText,
        n: usize,
    ) -> (PipelineContext, Arc<crate::events::RecordingEventSink>) {
        let fetcher = StaticFetcher::new().with_feed("https://news.example.com/rss", entries(n));
        let (ctx, events) = test_context_with(|s| {
            s.text = Arc::new(text);
            s.fetcher = Arc::new(fetcher);
        });
        let feed = add_feed(&ctx, "tech", "https://news.example.com/rss", 30)
            .await
            .unwrap();
        poll_feed(&ctx, feed.id).await.unwrap();
        (ctx, events)
    }

    #[tokio::test]
    async fn combined_score_weights_seo_and_virality() {
        let text = ScriptedText::new(|_| Ok(r#"{"seo_score": 80, "viral_score": 50}"#.into()));
        let (ctx, events) = seeded(text, 1).await;

        let report = score_batch(&ctx, None, None, &CancellationToken::new())
            .await
            .unwrap();
        let (_, score) = report.successes().next().unwrap();
        assert_eq!(score.combined_score, 68);

        let scored = ctx
            .stores
            .items
            .list_items(&ItemQuery::with_status(ItemStatus::Scored))
            .await
            .unwrap();
        assert_eq!(scored[0].combined_score(), Some(68));
        assert!(events.names().contains(&"items_scored"));
    }

    #[tokio::test]
    async fn out_of_range_axes_are_clamped() {
        let text = ScriptedText::new(|_| Ok(r#"{"seo_score": 140, "viral_score": -20}"#.into()));
        let (ctx, _) = seeded(text, 1).await;
        let report = score_batch(&ctx, None, None, &CancellationToken::new())
            .await
            .unwrap();
        let (_, score) = report.successes().next().unwrap();
        assert_eq!((score.seo_score, score.viral_score, score.combined_score), (100, 0, 60));
    }

    #[tokio::test]
    async fn malformed_response_skips_only_that_item() {
        let text = ScriptedText::new(|req| {
            if req.prompt.contains("Story 1") {
                Ok("I think it's pretty good".into())
            } else {
                Ok(r#"{"seo_score": 70, "viral_score": 70}"#.into())
            }
        });
        let (ctx, _) = seeded(text, 3).await;

        let report = score_batch(&ctx, None, None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.total(), 3);
        assert_eq!(report.succeeded(), 2);

        let still_ingested = ctx
            .stores
            .items
            .list_items(&ItemQuery::with_status(ItemStatus::Ingested))
            .await
            .unwrap();
        assert_eq!(still_ingested.len(), 1);
        assert_eq!(still_ingested[0].title, "Story 1");
    }

    #[tokio::test]
    async fn missing_credentials_abort_the_batch() {
        let text = ScriptedText::new(|_| Err(ContentForgeError::config("API key not found")));
        let (ctx, _) = seeded(text, 2).await;
        let err = score_batch(&ctx, None, None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), contentforge_shared::ErrorKind::Config);
    }

    #[tokio::test]
    async fn respects_limit() {
        let (ctx, _) = seeded(ScriptedText::canned(), 3).await;
        let report = score_batch(&ctx, None, Some(2), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.total(), 2);
    }
}
