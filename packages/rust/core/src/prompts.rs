//! Prompt templates for every AI call.

use contentforge_shared::{Preset, SectionKind};

use crate::sections::ContentBrief;

pub const SCORE_SYSTEM: &str = "You are an SEO and social media analyst. \
Rate news items for search potential and shareability. \
Respond with a single JSON object only.";

pub const EXTRACT_SYSTEM: &str = "You are a fact extraction assistant. \
Pull concrete, checkable claims out of articles. \
Respond with a single JSON object only.";

pub const CLUSTER_SYSTEM: &str = "You are an editor grouping related stories. \
Respond with a single JSON object only.";

pub const SEO_SYSTEM: &str = "You are an SEO editor writing article metadata. \
Respond with a single JSON object only.";

const DEFAULT_PERSONA: &str = "an experienced technology journalist";

/// Cut `content` to `max_chars` characters, marking the cut.
pub fn truncate_content(content: &str, max_chars: usize) -> String {
    match content.char_indices().nth(max_chars) {
        None => content.to_string(),
        Some((cut, _)) => format!("{}\n\n[... content truncated ...]", &content[..cut]),
    }
}

pub fn score_prompt(title: &str, content: &str, max_chars: usize) -> String {
    format!(
        "Rate this news item on two axes from 0 to 100.\n\
         - seo_score: search demand and keyword potential\n\
         - viral_score: likelihood of being shared\n\n\
         Title: {title}\n\n\
         Content:\n{}\n\n\
         Return JSON: {{\"seo_score\": number, \"viral_score\": number, \"rationale\": string}}",
        truncate_content(content, max_chars)
    )
}

pub fn extract_prompt(title: &str, content: &str, max_chars: usize) -> String {
    format!(
        "Extract 3 to 8 factual claims from this article, each with a confidence \
         between 0 and 1 and the sentence it came from. Also list up to 10 SEO keywords.\n\n\
         Title: {title}\n\n\
         Content:\n{}\n\n\
         Return JSON: {{\"facts\": [{{\"claim\": string, \"confidence\": number, \
         \"source_quote\": string}}], \"keywords\": [string]}}",
        truncate_content(content, max_chars)
    )
}

pub fn cluster_label_prompt(titles: &[&str]) -> String {
    let list = titles
        .iter()
        .map(|t| format!("- {t}"))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "These stories cover the same topic:\n{list}\n\n\
         Give the topic a short label (at most 8 words) and a one-sentence summary.\n\
         Return JSON: {{\"label\": string, \"summary\": string}}"
    )
}

pub fn section_system(persona: Option<&str>) -> String {
    format!(
        "You are {}. Write clear, accurate web content in HTML fragments. \
         Use only <h2>, <h3>, <p>, <ul>, <ol>, <li>, <strong> and <em>. \
         Never invent facts beyond those provided.",
        persona.unwrap_or(DEFAULT_PERSONA)
    )
}

fn section_instructions(kind: SectionKind) -> &'static str {
    match kind {
        SectionKind::ZeroClick => {
            "Write a direct answer paragraph that resolves the reader's question \
             without clicking further. One <p>, no heading."
        }
        SectionKind::Intro => "Write an engaging introduction. No heading.",
        SectionKind::Body => {
            "Write the main body with <h2> subheadings covering each key fact \
             and its context."
        }
        SectionKind::Glossary => {
            "List the technical terms a newcomer would need explained. \
             Return JSON: {\"terms\": [{\"term\": string, \"definition\": string}]}"
        }
        SectionKind::Faq => {
            "Write the questions readers most often ask about this topic with \
             concise answers. Return JSON: {\"questions\": [{\"question\": string, \
             \"answer\": string}]}"
        }
        SectionKind::Conclusion => "Write a short conclusion with a takeaway. Start with an <h2>.",
    }
}

pub fn section_prompt(kind: SectionKind, brief: &ContentBrief, preset: Preset) -> String {
    let mut prompt = format!(
        "Section: {kind}\nFormat: {preset}\nTarget length: about {} words.\n\n{}\n\n\
         Topic: {}\n",
        preset.target_words(kind),
        section_instructions(kind),
        brief.topic
    );
    if !brief.keywords.is_empty() {
        prompt.push_str(&format!("Keywords: {}\n", brief.keywords.join(", ")));
    }
    if !brief.facts.is_empty() {
        prompt.push_str("\nFacts:\n");
        for fact in &brief.facts {
            prompt.push_str(&format!("- {fact}\n"));
        }
    }
    if !brief.sources.is_empty() {
        prompt.push_str("\nSources:\n");
        for source in &brief.sources {
            prompt.push_str(&format!("- {source}\n"));
        }
    }
    prompt
}

pub fn seo_prompt(brief: &ContentBrief, article_text: &str, max_chars: usize) -> String {
    format!(
        "Write metadata for this article.\n\
         Topic: {}\nKeywords: {}\n\n\
         Article:\n{}\n\n\
         Return JSON: {{\"title\": string, \"seo_title\": string (max 60 chars), \
         \"seo_description\": string (max 160 chars), \"focus_keyword\": string}}",
        brief.topic,
        brief.keywords.join(", "),
        truncate_content(article_text, max_chars)
    )
}
