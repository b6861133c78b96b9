//! Shared types, error model, and configuration for ContentForge.
//!
//! This crate is the foundation depended on by all other ContentForge crates.
//! It provides:
//! - [`ContentForgeError`]: the unified error type
//! - Domain types ([`Feed`], [`Item`], [`Cluster`], [`PipelineRun`], ...)
//! - Configuration ([`AppConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AiConfig, AppConfig, ClusteringConfig, CmsConfig, DefaultsConfig, EmbeddingConfig,
    PipelineConfig, SearchConfig, SiteConfig, config_dir, config_file_path, expand_home,
    init_config, load_config, load_config_from, resolve_secret,
};
pub use error::{ContentForgeError, ErrorKind, Result};
pub use types::{
    ArticleId, Cluster, ClusterId, ExtractedFact, Feed, FeedEntry, FeedId, GeneratedArticle,
    GeneratedSection, Item, ItemId, ItemStatus, PipelineRun, Preset, RunId, RunStatus,
    ScoreResult, SectionKind, Sections, SeoMetadata, Stage, UnverifiedFact, VerificationResult,
    VerifiedFact, clamp_axis, combined_score,
};
