//! Article assembly: sections in fixed order plus SEO metadata.
//!
//! The output order is `zero_click → intro → body → glossary → faq →
//! conclusion` no matter which sections exist or in what order they were
//! produced. Assembly does not touch item state.

use contentforge_clients::TextRequest;
use contentforge_shared::{ContentForgeError, Result, SectionKind, Sections, SeoMetadata};
use tracing::{debug, instrument};

use crate::context::PipelineContext;
use crate::markup::{strip_tags, word_count, wrap_section};
use crate::prompts::{SEO_SYSTEM, seo_prompt};
use crate::schemas::{SeoResponse, parse_structured};
use crate::sections::ContentBrief;

/// Assembled HTML with its metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledArticle {
    pub html: String,
    pub seo: SeoMetadata,
    pub word_count: usize,
}

/// Concatenate sections in assembly order.
pub fn assemble_html(sections: &Sections) -> String {
    SectionKind::ALL
        .iter()
        .filter_map(|kind| sections.get(*kind))
        .map(|s| wrap_section(s.kind, &s.html))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Assemble the article and derive SEO metadata with one AI call.
#[instrument(skip_all, fields(sections = sections.len()))]
pub async fn assemble(
    ctx: &PipelineContext,
    sections: &Sections,
    brief: &ContentBrief,
) -> Result<AssembledArticle> {
    if sections.is_empty() {
        return Err(ContentForgeError::validation("nothing to assemble: no sections"));
    }
    let html = assemble_html(sections);
    let text = strip_tags(&html)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");

    let raw = ctx
        .services
        .text
        .generate(
            TextRequest::structured(
                SEO_SYSTEM,
                seo_prompt(brief, &text, ctx.config.pipeline.content_prefix_chars),
            )
            .max_tokens(400),
        )
        .await?;
    let mut seo: SeoMetadata = parse_structured::<SeoResponse>(&raw, "seo")?.into();
    if seo.focus_keyword.is_empty() {
        seo.focus_keyword = brief.keywords.first().cloned().unwrap_or_default();
    }

    let word_count = word_count(&html);
    debug!(word_count, title = %seo.title, "article assembled");
    Ok(AssembledArticle {
        html,
        seo,
        word_count,
    })
}
