//! Feed registry and polling.

use chrono::Utc;
use contentforge_shared::{ContentForgeError, Feed, FeedId, Result, Stage};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::batch::{FeedBatch, ensure_active, is_fatal};
use crate::context::PipelineContext;
use crate::events::PipelineEvent;

/// Result of polling one feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollOutcome {
    pub feed_id: FeedId,
    /// Entries in the fetched document.
    pub entries: usize,
    /// Entries stored as new items.
    pub new_items: usize,
}

/// Register a feed for a site.
#[instrument(skip(ctx))]
pub async fn add_feed(
    ctx: &PipelineContext,
    site_id: &str,
    url: &str,
    poll_interval_mins: u32,
) -> Result<Feed> {
    if site_id.trim().is_empty() {
        return Err(ContentForgeError::validation("site id must not be empty"));
    }
    let parsed = url::Url::parse(url)
        .map_err(|e| ContentForgeError::validation(format!("invalid feed URL '{url}': {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ContentForgeError::validation(format!(
            "feed URL must be http(s): {url}"
        )));
    }

    let feed = Feed::new(site_id, parsed.as_str(), poll_interval_mins);
    ctx.stores.feeds.insert_feed(&feed).await?;
    info!(feed_id = %feed.id, "feed registered");
    Ok(feed)
}

pub async fn list_feeds(ctx: &PipelineContext, site_id: Option<&str>) -> Result<Vec<Feed>> {
    ctx.stores.feeds.list_feeds(site_id).await
}

/// Fetch one feed and store unseen entries as `ingested` items.
///
/// Entries already stored for this feed are skipped, so polling is
/// idempotent. Poll metadata is recorded after every successful fetch.
#[instrument(skip(ctx), fields(feed_id = %feed_id))]
pub async fn poll_feed(ctx: &PipelineContext, feed_id: FeedId) -> Result<PollOutcome> {
    let feed = ctx.stores.feeds.get_feed(feed_id).await?;
    let entries = ctx.services.fetcher.fetch(&feed.url).await?;

    let mut new_items = 0;
    for entry in &entries {
        if ctx.stores.items.upsert_item(feed.id, entry).await? {
            new_items += 1;
        }
    }

    let seen = u32::try_from(entries.len()).unwrap_or(u32::MAX);
    ctx.stores.feeds.record_poll(feed.id, Utc::now(), seen).await?;

    info!(url = %feed.url, entries = entries.len(), new_items, "feed polled");
    ctx.emit(PipelineEvent::FeedPolled {
        feed_id: feed.id,
        site_id: feed.site_id.clone(),
        entries: entries.len(),
        new_items,
    });

    Ok(PollOutcome {
        feed_id: feed.id,
        entries: entries.len(),
        new_items,
    })
}

/// Poll every feed of a site (or of all sites). A feed that fails is
/// reported and skipped.
#[instrument(skip(ctx, cancel))]
pub async fn poll_all_feeds(
    ctx: &PipelineContext,
    site_id: Option<&str>,
    only_due: bool,
    cancel: &CancellationToken,
) -> Result<FeedBatch<PollOutcome>> {
    ctx.progress.phase(Stage::Poll);
    let now = Utc::now();
    let feeds: Vec<Feed> = ctx
        .stores
        .feeds
        .list_feeds(site_id)
        .await?
        .into_iter()
        .filter(|f| !only_due || f.is_due(now))
        .collect();

    let total = feeds.len();
    let mut report = FeedBatch::default();
    for (i, feed) in feeds.iter().enumerate() {
        ensure_active(cancel, Stage::Poll)?;
        match poll_feed(ctx, feed.id).await {
            Ok(outcome) => report.push(feed.id, Ok(outcome)),
            Err(e) if is_fatal(&e) => return Err(e),
            Err(e) => {
                warn!(url = %feed.url, error = %e, "feed poll failed, skipping feed");
                report.push(feed.id, Err(e));
            }
        }
        ctx.progress.item_done(Stage::Poll, i + 1, total);
    }

    let new_items: usize = report.successes().map(|(_, o)| o.new_items).sum();
    info!(
        polled = report.succeeded(),
        failed = report.failed(),
        new_items,
        "feeds polled"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{StaticFetcher, test_context_with};
    use contentforge_shared::{FeedEntry, ItemStatus};
    use contentforge_storage::ItemQuery;

    fn entry(guid: &str) -> FeedEntry {
        FeedEntry {
            guid: guid.into(),
            title: format!("Story {guid}"),
            link: Some(format!("https://news.example.com/{guid}")),
            content: "Body text".into(),
            published_at: None,
        }
    }

    #[tokio::test]
    async fn polling_twice_is_idempotent() {
        let fetcher = StaticFetcher::new()
            .with_feed("https://news.example.com/rss", vec![entry("a"), entry("b")]);
        let (ctx, events) = test_context_with(|s| s.fetcher = std::sync::Arc::new(fetcher));
        let feed = add_feed(&ctx, "tech", "https://news.example.com/rss", 30)
            .await
            .unwrap();

        let first = poll_feed(&ctx, feed.id).await.unwrap();
        let second = poll_feed(&ctx, feed.id).await.unwrap();

        assert_eq!(first.new_items, 2);
        assert_eq!(second.new_items, 0);
        assert_eq!(second.entries, 2);
        assert_eq!(ctx.stores.items.count_items(Some(feed.id)).await.unwrap(), 2);

        let items = ctx
            .stores
            .items
            .list_items(&ItemQuery::with_status(ItemStatus::Ingested))
            .await
            .unwrap();
        assert_eq!(items.len(), 2);

        let polled = ctx.stores.feeds.get_feed(feed.id).await.unwrap();
        assert!(polled.last_polled_at.is_some());
        assert_eq!(polled.last_poll_count, 2);
        assert_eq!(events.names(), vec!["feed_polled", "feed_polled"]);
    }

    #[tokio::test]
    async fn failing_feed_does_not_stop_the_others() {
        let fetcher =
            StaticFetcher::new().with_feed("https://good.example.com/rss", vec![entry("a")]);
        let (ctx, _) = test_context_with(|s| s.fetcher = std::sync::Arc::new(fetcher));
        add_feed(&ctx, "tech", "https://good.example.com/rss", 30).await.unwrap();
        add_feed(&ctx, "tech", "https://down.example.com/rss", 30).await.unwrap();

        let report = poll_all_feeds(&ctx, Some("tech"), false, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.total(), 2);
        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.failed(), 1);
    }

    #[tokio::test]
    async fn only_due_skips_recently_polled_feeds() {
        let fetcher =
            StaticFetcher::new().with_feed("https://news.example.com/rss", vec![entry("a")]);
        let (ctx, _) = test_context_with(|s| s.fetcher = std::sync::Arc::new(fetcher));
        add_feed(&ctx, "tech", "https://news.example.com/rss", 60).await.unwrap();

        let cancel = CancellationToken::new();
        let first = poll_all_feeds(&ctx, None, true, &cancel).await.unwrap();
        let second = poll_all_feeds(&ctx, None, true, &cancel).await.unwrap();
        assert_eq!(first.total(), 1);
        assert_eq!(second.total(), 0);
    }

    #[tokio::test]
    async fn rejects_invalid_feed_url() {
        let (ctx, _) = test_context_with(|_| {});
        assert!(add_feed(&ctx, "tech", "not a url", 30).await.is_err());
        assert!(add_feed(&ctx, "tech", "ftp://example.com/feed", 30).await.is_err());
    }
}
