//! Structured AI responses and their validation.
//!
//! Every structured completion goes through [`parse_structured`]: code fences
//! are stripped, the JSON object is deserialized, and [`Validate`] normalizes
//! it. Anything that does not fit becomes a parse error.

use contentforge_shared::{ContentForgeError, ExtractedFact, Result, SeoMetadata};
use serde::Deserialize;
use serde::de::DeserializeOwned;

const MAX_FACTS: usize = 8;
const MAX_KEYWORDS: usize = 15;
const SEO_TITLE_MAX_CHARS: usize = 60;
const SEO_DESCRIPTION_MAX_CHARS: usize = 160;

/// Normalize a deserialized response, rejecting payloads that are unusable.
pub trait Validate: Sized {
    fn validate(self) -> Result<Self>;
}

/// Parse a structured completion into `T`.
pub fn parse_structured<T>(raw: &str, what: &str) -> Result<T>
where
    T: DeserializeOwned + Validate,
{
    let body = json_body(raw);
    let value: T = serde_json::from_str(body)
        .map_err(|e| ContentForgeError::parse(format!("{what} response is not valid JSON: {e}")))?;
    value
        .validate()
        .map_err(|e| ContentForgeError::parse(format!("{what} response rejected: {e}")))
}

/// The outermost `{...}` of a completion, ignoring fences and chatter.
fn json_body(raw: &str) -> &str {
    let trimmed = raw.trim();
    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if end > start => &trimmed[start..=end],
        _ => trimmed,
    }
}

fn required(field: &str, value: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ContentForgeError::validation(format!("'{field}' is empty")));
    }
    Ok(value.to_string())
}

fn truncate_chars(value: &str, max: usize) -> String {
    value.chars().take(max).collect::<String>().trim_end().to_string()
}

// ---------------------------------------------------------------------------
// Scoring
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ScoreResponse {
    pub seo_score: f64,
    pub viral_score: f64,
    #[serde(default)]
    pub rationale: String,
}

impl Validate for ScoreResponse {
    fn validate(self) -> Result<Self> {
        if !self.seo_score.is_finite() || !self.viral_score.is_finite() {
            return Err(ContentForgeError::validation("scores must be finite numbers"));
        }
        Ok(Self {
            rationale: self.rationale.trim().to_string(),
            ..self
        })
    }
}

// ---------------------------------------------------------------------------
// Fact extraction
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct FactPayload {
    pub claim: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub source_quote: String,
}

fn default_confidence() -> f64 {
    0.5
}

#[derive(Debug, Deserialize)]
pub struct ExtractionResponse {
    pub facts: Vec<FactPayload>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl ExtractionResponse {
    pub fn into_facts(self) -> (Vec<ExtractedFact>, Vec<String>) {
        let facts = self
            .facts
            .into_iter()
            .map(|f| ExtractedFact {
                claim: f.claim,
                confidence: f.confidence,
                source_quote: f.source_quote,
            })
            .collect();
        (facts, self.keywords)
    }
}

impl Validate for ExtractionResponse {
    fn validate(self) -> Result<Self> {
        let facts: Vec<FactPayload> = self
            .facts
            .into_iter()
            .filter(|f| !f.claim.trim().is_empty())
            .take(MAX_FACTS)
            .map(|f| FactPayload {
                claim: f.claim.trim().to_string(),
                confidence: if f.confidence.is_finite() {
                    f.confidence.clamp(0.0, 1.0)
                } else {
                    0.0
                },
                source_quote: f.source_quote.trim().to_string(),
            })
            .collect();
        if facts.is_empty() {
            return Err(ContentForgeError::validation("no facts with a claim"));
        }

        let mut keywords: Vec<String> = Vec::new();
        for keyword in self.keywords {
            let keyword = keyword.trim().to_lowercase();
            if !keyword.is_empty() && !keywords.contains(&keyword) {
                keywords.push(keyword);
            }
        }
        keywords.truncate(MAX_KEYWORDS);

        Ok(Self { facts, keywords })
    }
}

// ---------------------------------------------------------------------------
// Cluster labels
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ClusterLabelResponse {
    pub label: String,
    #[serde(default)]
    pub summary: String,
}

impl Validate for ClusterLabelResponse {
    fn validate(self) -> Result<Self> {
        Ok(Self {
            label: required("label", &self.label)?,
            summary: self.summary.trim().to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Structured sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct GlossaryTerm {
    pub term: String,
    pub definition: String,
}

#[derive(Debug, Deserialize)]
pub struct GlossaryResponse {
    pub terms: Vec<GlossaryTerm>,
}

impl Validate for GlossaryResponse {
    fn validate(self) -> Result<Self> {
        let terms: Vec<GlossaryTerm> = self
            .terms
            .into_iter()
            .filter(|t| !t.term.trim().is_empty() && !t.definition.trim().is_empty())
            .map(|t| GlossaryTerm {
                term: t.term.trim().to_string(),
                definition: t.definition.trim().to_string(),
            })
            .collect();
        if terms.is_empty() {
            return Err(ContentForgeError::validation("glossary has no terms"));
        }
        Ok(Self { terms })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FaqEntry {
    pub question: String,
    pub answer: String,
}

#[derive(Debug, Deserialize)]
pub struct FaqResponse {
    pub questions: Vec<FaqEntry>,
}

impl Validate for FaqResponse {
    fn validate(self) -> Result<Self> {
        let questions: Vec<FaqEntry> = self
            .questions
            .into_iter()
            .filter(|q| !q.question.trim().is_empty() && !q.answer.trim().is_empty())
            .map(|q| FaqEntry {
                question: q.question.trim().to_string(),
                answer: q.answer.trim().to_string(),
            })
            .collect();
        if questions.is_empty() {
            return Err(ContentForgeError::validation("FAQ has no questions"));
        }
        Ok(Self { questions })
    }
}

// ---------------------------------------------------------------------------
// SEO metadata
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct SeoResponse {
    pub title: String,
    #[serde(default)]
    pub seo_title: String,
    #[serde(default)]
    pub seo_description: String,
    #[serde(default)]
    pub focus_keyword: String,
}

impl Validate for SeoResponse {
    fn validate(self) -> Result<Self> {
        let title = required("title", &self.title)?;
        let seo_title = match self.seo_title.trim() {
            "" => truncate_chars(&title, SEO_TITLE_MAX_CHARS),
            s => truncate_chars(s, SEO_TITLE_MAX_CHARS),
        };
        Ok(Self {
            title,
            seo_title,
            seo_description: truncate_chars(self.seo_description.trim(), SEO_DESCRIPTION_MAX_CHARS),
            focus_keyword: self.focus_keyword.trim().to_lowercase(),
        })
    }
}

impl From<SeoResponse> for SeoMetadata {
    fn from(r: SeoResponse) -> Self {
        Self {
            title: r.title,
            seo_title: r.seo_title,
            seo_description: r.seo_description,
            focus_keyword: r.focus_keyword,
        }
    }
}
