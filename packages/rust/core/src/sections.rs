//! Section generation for a preset.
//!
//! Free-form sections are requested as HTML prose; glossary and FAQ are
//! requested as JSON and rendered locally. Generation stops at the first
//! failing section.

use contentforge_clients::TextRequest;
use contentforge_shared::{
    ContentForgeError, GeneratedSection, Item, Preset, Result, SectionKind, Sections, Stage,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::batch::ensure_active;
use crate::context::PipelineContext;
use crate::markup::{clean_fragment, render_faq, render_glossary, word_count};
use crate::prompts::{section_prompt, section_system};
use crate::schemas::{FaqResponse, GlossaryResponse, parse_structured};

const MAX_BRIEF_KEYWORDS: usize = 15;
const MAX_BRIEF_FACTS: usize = 20;

/// What the writer is told about the source items.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContentBrief {
    pub topic: String,
    pub keywords: Vec<String>,
    /// Verified claims where an item has any, its extracted claims otherwise.
    pub facts: Vec<String>,
    pub sources: Vec<String>,
}

impl ContentBrief {
    /// Build from items ordered by relevance; the first item names the topic.
    pub fn from_items(items: &[Item]) -> Result<Self> {
        let lead = items
            .first()
            .ok_or_else(|| ContentForgeError::validation("no source items to write about"))?;

        let mut keywords: Vec<String> = Vec::new();
        let mut facts: Vec<String> = Vec::new();
        let mut sources = Vec::with_capacity(items.len());
        for item in items {
            for keyword in &item.keywords {
                if !keywords.iter().any(|k| k.eq_ignore_ascii_case(keyword)) {
                    keywords.push(keyword.clone());
                }
            }
            let claims: Vec<&str> = match &item.verification {
                Some(v) if !v.verified.is_empty() => {
                    v.verified.iter().map(|f| f.claim.as_str()).collect()
                }
                _ => item.facts.iter().map(|f| f.claim.as_str()).collect(),
            };
            for claim in claims {
                if !facts.iter().any(|f| f == claim) {
                    facts.push(claim.to_owned());
                }
            }
            sources.push(match &item.link {
                Some(link) => format!("{} ({link})", item.title),
                None => item.title.clone(),
            });
        }
        keywords.truncate(MAX_BRIEF_KEYWORDS);
        facts.truncate(MAX_BRIEF_FACTS);

        Ok(Self {
            topic: lead.title.clone(),
            keywords,
            facts,
            sources,
        })
    }
}

/// Generate one section.
pub async fn generate_section(
    ctx: &PipelineContext,
    kind: SectionKind,
    brief: &ContentBrief,
    preset: Preset,
    persona: Option<&str>,
) -> Result<GeneratedSection> {
    let system = section_system(persona);
    let prompt = section_prompt(kind, brief, preset);
    let max_tokens = preset.target_words(kind) * 3;

    let html = if kind.is_structured() {
        let raw = ctx
            .services
            .text
            .generate(TextRequest::structured(system, prompt).max_tokens(max_tokens))
            .await?;
        match kind {
            SectionKind::Glossary => {
                render_glossary(&parse_structured::<GlossaryResponse>(&raw, "glossary")?.terms)
            }
            _ => render_faq(&parse_structured::<FaqResponse>(&raw, "faq")?.questions),
        }
    } else {
        let raw = ctx
            .services
            .text
            .generate(TextRequest::free_text(system, prompt).max_tokens(max_tokens))
            .await?;
        let html = clean_fragment(&raw);
        if html.is_empty() {
            return Err(ContentForgeError::parse(format!("{kind} section came back empty")));
        }
        html
    };

    Ok(GeneratedSection {
        kind,
        word_count: word_count(&html),
        html,
    })
}

/// Generate every section of `preset`, in assembly order.
#[instrument(skip(ctx, brief, cancel), fields(topic = %brief.topic))]
pub async fn generate_sections(
    ctx: &PipelineContext,
    brief: &ContentBrief,
    preset: Preset,
    persona: Option<&str>,
    cancel: &CancellationToken,
) -> Result<Sections> {
    let kinds = preset.sections();
    let mut sections = Sections::default();
    for (i, kind) in kinds.iter().enumerate() {
        ensure_active(cancel, Stage::Generate)?;
        let section = generate_section(ctx, *kind, brief, preset, persona)
            .await
            .inspect_err(|e| warn!(section = %kind, error = %e, "section generation failed"))?;
        debug!(section = %kind, words = section.word_count, "section generated");
        sections.insert(section);
        ctx.progress.item_done(Stage::Generate, i + 1, kinds.len());
    }
    Ok(sections)
}
