//! Fact and keyword extraction: `scored → extracted`.

use contentforge_clients::TextRequest;
use contentforge_shared::{ContentForgeError, Item, ItemId, ItemStatus, Result, Stage};
use contentforge_storage::{ItemOrder, ItemQuery};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::batch::{ItemBatch, ensure_active, is_fatal};
use crate::context::PipelineContext;
use crate::events::PipelineEvent;
use crate::prompts::{EXTRACT_SYSTEM, extract_prompt};
use crate::schemas::{ExtractionResponse, parse_structured};

/// Which scored items to extract from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractTarget {
    /// These items, in the given order.
    Ids(Vec<ItemId>),
    /// The highest-scored items, up to this many.
    Top(usize),
}

/// Counts stored for one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractionSummary {
    pub facts: usize,
    pub keywords: usize,
}

/// Extract facts and keywords from one item and store them.
pub async fn extract_item(ctx: &PipelineContext, item: &Item) -> Result<ExtractionSummary> {
    let prompt = extract_prompt(
        &item.title,
        &item.content,
        ctx.config.pipeline.content_prefix_chars,
    );
    let raw = ctx
        .services
        .text
        .generate(TextRequest::structured(EXTRACT_SYSTEM, prompt).max_tokens(1200))
        .await?;
    let response: ExtractionResponse = parse_structured(&raw, "extraction")?;
    let (facts, keywords) = response.into_facts();

    ctx.stores
        .items
        .record_extraction(item.id, &facts, &keywords)
        .await?;
    Ok(ExtractionSummary {
        facts: facts.len(),
        keywords: keywords.len(),
    })
}

/// Run extraction over the target's scored items.
#[instrument(skip(ctx, cancel))]
pub async fn extract_facts(
    ctx: &PipelineContext,
    site_id: Option<&str>,
    target: ExtractTarget,
    cancel: &CancellationToken,
) -> Result<ItemBatch<ExtractionSummary>> {
    ctx.progress.phase(Stage::Extract);
    let query = ItemQuery::with_status(ItemStatus::Scored)
        .site(site_id)
        .order(ItemOrder::ScoreDesc);
    let mut report = ItemBatch::default();

    let items = match &target {
        ExtractTarget::Top(limit) => ctx.stores.items.list_items(&query.limit(*limit)).await?,
        ExtractTarget::Ids(ids) => {
            let found = ctx.stores.items.list_items(&query.ids(ids.clone())).await?;
            let mut ordered = Vec::with_capacity(ids.len());
            for id in ids {
                match found.iter().find(|i| i.id == *id) {
                    Some(item) => ordered.push(item.clone()),
                    None => report.push(
                        *id,
                        Err(ContentForgeError::validation(format!(
                            "item {id} is not awaiting extraction"
                        ))),
                    ),
                }
            }
            ordered
        }
    };

    let total = items.len() + report.total();
    for (i, item) in items.iter().enumerate() {
        ensure_active(cancel, Stage::Extract)?;
        match extract_item(ctx, item).await {
            Ok(summary) => report.push(item.id, Ok(summary)),
            Err(e) if is_fatal(&e) => return Err(e),
            Err(e) => {
                warn!(item_id = %item.id, error = %e, "extraction failed, skipping item");
                report.push(item.id, Err(e));
            }
        }
        ctx.progress.item_done(Stage::Extract, i + 1, items.len());
    }

    info!(extracted = report.succeeded(), total, "extraction complete");
    ctx.emit(PipelineEvent::FactsExtracted {
        extracted: report.succeeded(),
        total,
    });
    Ok(report)
}
