//! Core domain types for the content production pipeline.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ContentForgeError;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Generate a new time-sortable identifier.
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }
    };
}

uuid_id!(
    /// Identifier of a syndication feed.
    FeedId
);
uuid_id!(
    /// Identifier of an ingested item.
    ItemId
);
uuid_id!(
    /// Identifier of a topic cluster.
    ClusterId
);
uuid_id!(
    /// Identifier of a pipeline run.
    RunId
);
uuid_id!(
    /// Identifier of a generated article record.
    ArticleId
);

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

/// Named pipeline stage, carried by stage-tagged errors and progress reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Poll,
    Score,
    Extract,
    Verify,
    Embed,
    Cluster,
    Select,
    Generate,
    Assemble,
    Publish,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Poll => "poll",
            Self::Score => "score",
            Self::Extract => "extract",
            Self::Verify => "verify",
            Self::Embed => "embed",
            Self::Cluster => "cluster",
            Self::Select => "select",
            Self::Generate => "generate",
            Self::Assemble => "assemble",
            Self::Publish => "publish",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Feed
// ---------------------------------------------------------------------------

/// A syndication source owned by a site.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feed {
    pub id: FeedId,
    /// Owning site (matches a `[[sites]]` entry in the config).
    pub site_id: String,
    pub url: String,
    /// Minimum minutes between polls when polling only due feeds.
    pub poll_interval_mins: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_polled_at: Option<DateTime<Utc>>,
    /// Number of entries seen by the last poll (new or not).
    pub last_poll_count: u32,
    pub created_at: DateTime<Utc>,
}

impl Feed {
    pub fn new(
        site_id: impl Into<String>,
        url: impl Into<String>,
        poll_interval_mins: u32,
    ) -> Self {
        Self {
            id: FeedId::new(),
            site_id: site_id.into(),
            url: url.into(),
            poll_interval_mins,
            last_polled_at: None,
            last_poll_count: 0,
            created_at: Utc::now(),
        }
    }

    /// Whether the poll interval has elapsed at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_polled_at {
            None => true,
            Some(last) => {
                now.signed_duration_since(last).num_minutes() >= i64::from(self.poll_interval_mins)
            }
        }
    }
}

/// One normalized entry parsed from a feed document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedEntry {
    pub guid: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    /// Plain-text content (markup stripped).
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Item
// ---------------------------------------------------------------------------

/// Item lifecycle. Status only moves forward; `Skipped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Ingested,
    Scored,
    Extracted,
    Clustered,
    Used,
    Skipped,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ingested => "ingested",
            Self::Scored => "scored",
            Self::Extracted => "extracted",
            Self::Clustered => "clustered",
            Self::Used => "used",
            Self::Skipped => "skipped",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Ingested => 0,
            Self::Scored => 1,
            Self::Extracted => 2,
            Self::Clustered => 3,
            Self::Used | Self::Skipped => 4,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Used | Self::Skipped)
    }

    /// Whether moving from `self` to `next` keeps the lifecycle monotonic.
    pub fn can_advance_to(&self, next: ItemStatus) -> bool {
        match self {
            Self::Used | Self::Skipped => false,
            _ => next == Self::Skipped || next.rank() > self.rank(),
        }
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemStatus {
    type Err = ContentForgeError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "ingested" => Ok(Self::Ingested),
            "scored" => Ok(Self::Scored),
            "extracted" => Ok(Self::Extracted),
            "clustered" => Ok(Self::Clustered),
            "used" => Ok(Self::Used),
            "skipped" => Ok(Self::Skipped),
            other => Err(ContentForgeError::validation(format!(
                "unknown item status '{other}'"
            ))),
        }
    }
}

/// One candidate unit of content. Stage fields are filled monotonically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub feed_id: FeedId,
    pub guid: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    pub status: ItemStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<ScoreResult>,
    #[serde(default)]
    pub facts: Vec<ExtractedFact>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerificationResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_id: Option<ClusterId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Item {
    /// Build a freshly ingested item from a feed entry.
    pub fn from_entry(feed_id: FeedId, entry: &FeedEntry) -> Self {
        let now = Utc::now();
        Self {
            id: ItemId::new(),
            feed_id,
            guid: entry.guid.clone(),
            title: entry.title.clone(),
            link: entry.link.clone(),
            content: entry.content.clone(),
            published_at: entry.published_at,
            status: ItemStatus::Ingested,
            score: None,
            facts: Vec::new(),
            keywords: Vec::new(),
            verification: None,
            embedding: None,
            cluster_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn combined_score(&self) -> Option<u8> {
        self.score.as_ref().map(|s| s.combined_score)
    }
}

// ---------------------------------------------------------------------------
// Stage results
// ---------------------------------------------------------------------------

/// Weight of the SEO axis in the combined score (tenths).
const SEO_WEIGHT_TENTHS: u32 = 6;
/// Weight of the virality axis in the combined score (tenths).
const VIRAL_WEIGHT_TENTHS: u32 = 4;

/// Relevance scores for one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreResult {
    pub seo_score: u8,
    pub viral_score: u8,
    pub combined_score: u8,
    #[serde(default)]
    pub rationale: String,
}

impl ScoreResult {
    /// Clamp raw axis values into [0,100] and derive the combined score.
    pub fn from_axes(seo: f64, viral: f64, rationale: impl Into<String>) -> Self {
        let seo_score = clamp_axis(seo);
        let viral_score = clamp_axis(viral);
        Self {
            seo_score,
            viral_score,
            combined_score: combined_score(seo_score, viral_score),
            rationale: rationale.into(),
        }
    }
}

/// Clamp one raw axis value into `0..=100`. NaN counts as zero.
pub fn clamp_axis(raw: f64) -> u8 {
    if raw.is_nan() {
        return 0;
    }
    raw.clamp(0.0, 100.0).round() as u8
}

/// `round(0.6·seo + 0.4·viral)`, computed in integer tenths so the result is
/// exact for every pair of axis scores.
pub fn combined_score(seo: u8, viral: u8) -> u8 {
    let tenths = SEO_WEIGHT_TENTHS * u32::from(seo) + VIRAL_WEIGHT_TENTHS * u32::from(viral);
    ((tenths + 5) / 10) as u8
}

/// A factual claim pulled from item content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedFact {
    pub claim: String,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    #[serde(default)]
    pub source_quote: String,
}

/// A claim corroborated by search results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifiedFact {
    pub claim: String,
    pub evidence: String,
    pub boosted_confidence: f64,
}

/// A claim that could not be corroborated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnverifiedFact {
    pub claim: String,
    pub reason: String,
}

/// Partition of an item's checked facts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub verified: Vec<VerifiedFact>,
    pub unverified: Vec<UnverifiedFact>,
}

impl VerificationResult {
    pub fn checked(&self) -> usize {
        self.verified.len() + self.unverified.len()
    }
}

// ---------------------------------------------------------------------------
// Cluster
// ---------------------------------------------------------------------------

/// A topic group of two or more semantically similar items.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    pub id: ClusterId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub member_ids: Vec<ItemId>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Sections & presets
// ---------------------------------------------------------------------------

/// Modular content block. Declaration order is the assembly order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionKind {
    ZeroClick,
    Intro,
    Body,
    Glossary,
    Faq,
    Conclusion,
}

impl SectionKind {
    /// Every section kind, in assembly order.
    pub const ALL: [SectionKind; 6] = [
        Self::ZeroClick,
        Self::Intro,
        Self::Body,
        Self::Glossary,
        Self::Faq,
        Self::Conclusion,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ZeroClick => "zero_click",
            Self::Intro => "intro",
            Self::Body => "body",
            Self::Glossary => "glossary",
            Self::Faq => "faq",
            Self::Conclusion => "conclusion",
        }
    }

    /// Glossary and FAQ are requested as structured data.
    pub fn is_structured(&self) -> bool {
        matches!(self, Self::Glossary | Self::Faq)
    }
}

impl fmt::Display for SectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SectionKind {
    type Err = ContentForgeError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| ContentForgeError::validation(format!("unknown section '{s}'")))
    }
}

/// Named length/structure profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Preset {
    FullArticle,
    NewsPost,
}

impl Preset {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FullArticle => "full-article",
            Self::NewsPost => "news-post",
        }
    }

    /// Ordered section calls for one generation pass.
    pub fn sections(&self) -> &'static [SectionKind] {
        match self {
            Self::FullArticle => &SectionKind::ALL,
            Self::NewsPost => &[
                SectionKind::ZeroClick,
                SectionKind::Intro,
                SectionKind::Body,
                SectionKind::Faq,
                SectionKind::Conclusion,
            ],
        }
    }

    /// Target words for one section under this preset.
    pub fn target_words(&self, kind: SectionKind) -> u32 {
        match (self, kind) {
            (Self::FullArticle, SectionKind::ZeroClick) => 60,
            (Self::FullArticle, SectionKind::Intro) => 200,
            (Self::FullArticle, SectionKind::Body) => 1200,
            (Self::FullArticle, SectionKind::Glossary) => 200,
            (Self::FullArticle, SectionKind::Faq) => 300,
            (Self::FullArticle, SectionKind::Conclusion) => 150,
            (Self::NewsPost, SectionKind::ZeroClick) => 40,
            (Self::NewsPost, SectionKind::Intro) => 80,
            (Self::NewsPost, SectionKind::Body) => 400,
            (Self::NewsPost, SectionKind::Glossary) => 100,
            (Self::NewsPost, SectionKind::Faq) => 150,
            (Self::NewsPost, SectionKind::Conclusion) => 60,
        }
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Preset {
    type Err = ContentForgeError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "full-article" => Ok(Self::FullArticle),
            "news-post" => Ok(Self::NewsPost),
            other => Err(ContentForgeError::validation(format!(
                "unknown preset '{other}': expected 'full-article' or 'news-post'"
            ))),
        }
    }
}

/// One rendered section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedSection {
    pub kind: SectionKind,
    pub html: String,
    pub word_count: usize,
}

/// Generated sections keyed by kind; iteration follows assembly order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sections(pub BTreeMap<SectionKind, GeneratedSection>);

impl Sections {
    pub fn insert(&mut self, section: GeneratedSection) {
        self.0.insert(section.kind, section);
    }

    pub fn get(&self, kind: SectionKind) -> Option<&GeneratedSection> {
        self.0.get(&kind)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn total_words(&self) -> usize {
        self.0.values().map(|s| s.word_count).sum()
    }
}

/// SEO metadata derived at assembly time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeoMetadata {
    pub title: String,
    pub seo_title: String,
    pub seo_description: String,
    pub focus_keyword: String,
}

// ---------------------------------------------------------------------------
// Pipeline runs & articles
// ---------------------------------------------------------------------------

/// Run lifecycle: `pending → generating → assembling → publishing → completed | failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Generating,
    Assembling,
    Publishing,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Generating => "generating",
            Self::Assembling => "assembling",
            Self::Publishing => "publishing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Generating => 1,
            Self::Assembling => 2,
            Self::Publishing => 3,
            Self::Completed | Self::Failed => 4,
        }
    }

    /// Forward-only transitions; any non-terminal status may fail.
    pub fn can_advance_to(&self, next: RunStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == Self::Failed || next.rank() > self.rank()
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = ContentForgeError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "generating" => Ok(Self::Generating),
            "assembling" => Ok(Self::Assembling),
            "publishing" => Ok(Self::Publishing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(ContentForgeError::validation(format!(
                "unknown run status '{other}'"
            ))),
        }
    }
}

/// Audit record of one generation → assembly → publish execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: RunId,
    pub site_id: String,
    pub preset: Preset,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persona: Option<String>,
    pub status: RunStatus,
    pub source_item_ids: Vec<ItemId>,
    #[serde(default)]
    pub sections: Sections,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assembled_html: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seo: Option<SeoMetadata>,
    /// Set at most once; the publisher's idempotency guard.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub article_id: Option<ArticleId>,
    /// Remote id and URL of the most recent successful push; a republish
    /// replaces them. The article record is never duplicated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_post_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PipelineRun {
    /// A new `pending` run for the selected items.
    pub fn pending(
        site_id: impl Into<String>,
        preset: Preset,
        persona: Option<String>,
        source_item_ids: Vec<ItemId>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: RunId::new(),
            site_id: site_id.into(),
            preset,
            persona,
            status: RunStatus::Pending,
            source_item_ids,
            sections: Sections::default(),
            assembled_html: None,
            seo: None,
            article_id: None,
            remote_post_id: None,
            remote_url: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether assembly output is recorded, so publishing can proceed.
    pub fn is_assembled(&self) -> bool {
        self.assembled_html.is_some() && self.seo.is_some()
    }
}

/// The article record created once per run by the publisher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedArticle {
    pub id: ArticleId,
    pub run_id: RunId,
    pub site_id: String,
    pub title: String,
    pub html: String,
    pub seo: SeoMetadata,
    pub word_count: usize,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combined_score_matches_weighted_round() {
        assert_eq!(combined_score(80, 50), 68);
        assert_eq!(combined_score(100, 100), 100);
        assert_eq!(combined_score(0, 0), 0);
        // 0.6·1 + 0.4·0 = 0.6 → 1
        assert_eq!(combined_score(1, 0), 1);
        // 0.6·0 + 0.4·1 = 0.4 → 0
        assert_eq!(combined_score(0, 1), 0);
        for seo in 0..=100u8 {
            for viral in 0..=100u8 {
                let expected = (0.6 * f64::from(seo) + 0.4 * f64::from(viral)).round() as u8;
                let got = combined_score(seo, viral);
                assert!(
                    got.abs_diff(expected) <= 1,
                    "seo={seo} viral={viral} got={got} expected={expected}"
                );
            }
        }
    }

    #[test]
    fn axes_are_clamped_before_combining() {
        let s = ScoreResult::from_axes(140.0, -20.0, "over");
        assert_eq!(s.seo_score, 100);
        assert_eq!(s.viral_score, 0);
        assert_eq!(s.combined_score, 60);

        let s = ScoreResult::from_axes(f64::NAN, 50.0, "");
        assert_eq!(s.seo_score, 0);
        assert_eq!(s.combined_score, 20);
    }

    #[test]
    fn item_status_moves_forward_only() {
        assert!(ItemStatus::Ingested.can_advance_to(ItemStatus::Scored));
        assert!(ItemStatus::Extracted.can_advance_to(ItemStatus::Used));
        assert!(ItemStatus::Scored.can_advance_to(ItemStatus::Skipped));
        assert!(!ItemStatus::Extracted.can_advance_to(ItemStatus::Scored));
        assert!(!ItemStatus::Used.can_advance_to(ItemStatus::Skipped));
        assert!(!ItemStatus::Skipped.can_advance_to(ItemStatus::Used));
    }

    #[test]
    fn run_status_transitions() {
        assert!(RunStatus::Pending.can_advance_to(RunStatus::Generating));
        assert!(RunStatus::Assembling.can_advance_to(RunStatus::Failed));
        assert!(!RunStatus::Publishing.can_advance_to(RunStatus::Generating));
        assert!(!RunStatus::Completed.can_advance_to(RunStatus::Failed));
        assert!(!RunStatus::Failed.can_advance_to(RunStatus::Completed));
    }

    #[test]
    fn statuses_roundtrip_through_strings() {
        for s in ["ingested", "scored", "extracted", "clustered", "used", "skipped"] {
            assert_eq!(s.parse::<ItemStatus>().unwrap().as_str(), s);
        }
        for s in ["pending", "generating", "assembling", "publishing", "completed", "failed"] {
            assert_eq!(s.parse::<RunStatus>().unwrap().as_str(), s);
        }
        assert!("archived".parse::<ItemStatus>().is_err());
    }

    #[test]
    fn sections_iterate_in_assembly_order() {
        let mut sections = Sections::default();
        for kind in [SectionKind::Conclusion, SectionKind::ZeroClick, SectionKind::Faq] {
            sections.insert(GeneratedSection {
                kind,
                html: String::new(),
                word_count: 1,
            });
        }
        let order: Vec<_> = sections.0.keys().copied().collect();
        assert_eq!(
            order,
            vec![SectionKind::ZeroClick, SectionKind::Faq, SectionKind::Conclusion]
        );
        assert_eq!(sections.total_words(), 3);
    }

    #[test]
    fn preset_parsing_and_sections() {
        assert_eq!("news-post".parse::<Preset>().unwrap(), Preset::NewsPost);
        assert!("longform".parse::<Preset>().is_err());
        assert_eq!(Preset::FullArticle.sections().len(), 6);
        assert!(!Preset::NewsPost.sections().contains(&SectionKind::Glossary));
        assert!(
            Preset::FullArticle.target_words(SectionKind::Body)
                > Preset::NewsPost.target_words(SectionKind::Body)
        );
    }

    #[test]
    fn feed_due_after_interval() {
        let mut feed = Feed::new("site", "https://example.com/rss", 30);
        let now = Utc::now();
        assert!(feed.is_due(now));
        feed.last_polled_at = Some(now - chrono::Duration::minutes(10));
        assert!(!feed.is_due(now));
        feed.last_polled_at = Some(now - chrono::Duration::minutes(31));
        assert!(feed.is_due(now));
    }
}
