//! Fact verification against web search results.
//!
//! At most `max_facts_per_item` claims of an item are checked, one search
//! per claim. A claim is verified when a result carries a description long
//! enough to count as corroboration. A search outage never fails the item:
//! every checked claim becomes unverified with the outage as the reason.

use contentforge_shared::{
    ContentForgeError, ExtractedFact, Item, ItemId, ItemStatus, Result, SearchConfig, Stage,
    UnverifiedFact, VerificationResult, VerifiedFact,
};
use contentforge_storage::{ItemOrder, ItemQuery};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::batch::{ItemBatch, ensure_active, is_fatal};
use crate::context::PipelineContext;
use crate::events::PipelineEvent;

const NO_RESULTS: &str = "no SERP results";
const NO_CORROBORATION: &str = "no corroborating description";

/// Check one item's facts. Only configuration errors and cancellation
/// escape; search failures are folded into the result.
pub async fn verify_item(ctx: &PipelineContext, item: &Item) -> Result<VerificationResult> {
    let settings = &ctx.config.search;
    let facts: Vec<&ExtractedFact> = item.facts.iter().take(settings.max_facts_per_item).collect();

    let mut result = VerificationResult::default();
    for fact in &facts {
        let query = search_query(&fact.claim, settings.query_max_chars);
        match ctx.services.search.search(&query).await {
            Ok(hits) => {
                if hits.is_empty() {
                    result.unverified.push(UnverifiedFact {
                        claim: fact.claim.clone(),
                        reason: NO_RESULTS.into(),
                    });
                    continue;
                }
                let min_chars = settings.min_description_chars;
                match hits
                    .iter()
                    .find(|h| h.description.trim().chars().count() >= min_chars)
                {
                    Some(hit) => result.verified.push(VerifiedFact {
                        claim: fact.claim.clone(),
                        evidence: hit.description.trim().to_string(),
                        boosted_confidence: boost(fact.confidence, settings),
                    }),
                    None => result.unverified.push(UnverifiedFact {
                        claim: fact.claim.clone(),
                        reason: NO_CORROBORATION.into(),
                    }),
                }
            }
            Err(e) if is_fatal(&e) => return Err(e),
            Err(e) => {
                warn!(item_id = %item.id, error = %e, "search failed, marking claims unverified");
                return Ok(outage(&facts, &e));
            }
        }
    }
    Ok(result)
}

/// Every checked claim unverified, with the outage as the reason.
fn outage(facts: &[&ExtractedFact], err: &ContentForgeError) -> VerificationResult {
    VerificationResult {
        verified: Vec::new(),
        unverified: facts
            .iter()
            .map(|f| UnverifiedFact {
                claim: f.claim.clone(),
                reason: err.to_string(),
            })
            .collect(),
    }
}

fn search_query(claim: &str, max_chars: usize) -> String {
    claim.trim().chars().take(max_chars).collect()
}

fn boost(confidence: f64, settings: &SearchConfig) -> f64 {
    (confidence + settings.confidence_boost).min(1.0)
}

/// Verify extracted (or clustered) items that have no verification yet.
#[instrument(skip(ctx, cancel, item_ids))]
pub async fn fact_check(
    ctx: &PipelineContext,
    site_id: Option<&str>,
    item_ids: Option<Vec<ItemId>>,
    cancel: &CancellationToken,
) -> Result<ItemBatch<VerificationResult>> {
    ctx.progress.phase(Stage::Verify);
    let mut query = ItemQuery {
        statuses: vec![ItemStatus::Extracted, ItemStatus::Clustered],
        unverified: true,
        order: ItemOrder::ScoreDesc,
        ..ItemQuery::default()
    }
    .site(site_id);
    query = match item_ids {
        Some(ids) => query.ids(ids),
        None => query.limit(ctx.config.pipeline.verify_batch),
    };
    let items = ctx.stores.items.list_items(&query).await?;

    let total = items.len();
    let mut report = ItemBatch::default();
    let (mut verified_claims, mut unverified_claims) = (0, 0);
    for (i, item) in items.iter().enumerate() {
        ensure_active(cancel, Stage::Verify)?;
        let outcome = match verify_item(ctx, item).await {
            Ok(result) => ctx
                .stores
                .items
                .record_verification(item.id, &result)
                .await
                .map(|()| result),
            Err(e) => Err(e),
        };
        match outcome {
            Ok(result) => {
                verified_claims += result.verified.len();
                unverified_claims += result.unverified.len();
                report.push(item.id, Ok(result));
            }
            Err(e) if is_fatal(&e) => return Err(e),
            Err(e) => {
                warn!(item_id = %item.id, error = %e, "verification failed, skipping item");
                report.push(item.id, Err(e));
            }
        }
        ctx.progress.item_done(Stage::Verify, i + 1, total);
    }

    info!(
        checked = report.succeeded(),
        total, verified_claims, unverified_claims, "fact check complete"
    );
    ctx.emit(PipelineEvent::FactsChecked {
        checked: report.succeeded(),
        total,
        verified_claims,
        unverified_claims,
    });
    Ok(report)
}
