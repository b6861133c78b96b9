//! Application configuration for ContentForge.
//!
//! User config lives at `~/.contentforge/contentforge.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ContentForgeError, Result};
use crate::types::Preset;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "contentforge.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".contentforge";

// ---------------------------------------------------------------------------
// Config structs (matching contentforge.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// AI text-generation service.
    #[serde(default)]
    pub ai: AiConfig,

    /// Embedding service.
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Search-results API used by fact verification.
    #[serde(default)]
    pub search: SearchConfig,

    /// Semantic clustering parameters.
    #[serde(default)]
    pub clustering: ClusteringConfig,

    /// Batch sizes and orchestrator limits.
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Sites the pipeline publishes to.
    #[serde(default)]
    pub sites: Vec<SiteConfig>,
}

impl AppConfig {
    /// Look up a configured site by id. An unknown site is a config error.
    pub fn site(&self, site_id: &str) -> Result<&SiteConfig> {
        self.sites.iter().find(|s| s.id == site_id).ok_or_else(|| {
            ContentForgeError::config(format!(
                "site '{site_id}' is not configured. Add a [[sites]] entry with id = \"{site_id}\"."
            ))
        })
    }
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Path of the libSQL database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Preset used when none is given.
    #[serde(default = "default_preset")]
    pub preset: Preset,

    /// Selection threshold on the combined score.
    #[serde(default = "default_min_score")]
    pub min_score: u8,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            preset: default_preset(),
            min_score: default_min_score(),
        }
    }
}

fn default_database_path() -> String {
    "~/.contentforge/contentforge.db".into()
}
fn default_preset() -> Preset {
    Preset::FullArticle
}
fn default_min_score() -> u8 {
    60
}

/// `[ai]` section. Any OpenAI-compatible chat completions endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    #[serde(default = "default_ai_base_url")]
    pub base_url: String,

    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_ai_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_ai_model")]
    pub model: String,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            base_url: default_ai_base_url(),
            api_key_env: default_ai_key_env(),
            model: default_ai_model(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_ai_base_url() -> String {
    "https://openrouter.ai/api/v1".into()
}
fn default_ai_key_env() -> String {
    "OPENROUTER_API_KEY".into()
}
fn default_ai_model() -> String {
    "openai/gpt-4o-mini".into()
}
fn default_timeout_secs() -> u64 {
    60
}

/// `[embedding]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_base_url")]
    pub base_url: String,

    #[serde(default = "default_embedding_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Characters of item text sent for embedding.
    #[serde(default = "default_embedding_input_chars")]
    pub input_chars: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: default_embedding_base_url(),
            api_key_env: default_embedding_key_env(),
            model: default_embedding_model(),
            input_chars: default_embedding_input_chars(),
        }
    }
}

fn default_embedding_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_embedding_key_env() -> String {
    "OPENAI_API_KEY".into()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".into()
}
fn default_embedding_input_chars() -> usize {
    2000
}

/// `[search]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_search_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_search_key_env")]
    pub api_key_env: String,

    /// Hard cap on facts checked per item.
    #[serde(default = "default_max_facts_per_item")]
    pub max_facts_per_item: usize,

    /// Claims longer than this are truncated before querying.
    #[serde(default = "default_query_max_chars")]
    pub query_max_chars: usize,

    /// Minimum description length counted as corroboration.
    #[serde(default = "default_min_description_chars")]
    pub min_description_chars: usize,

    /// Confidence added to a verified claim (result capped at 1.0).
    #[serde(default = "default_confidence_boost")]
    pub confidence_boost: f64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            endpoint: default_search_endpoint(),
            api_key_env: default_search_key_env(),
            max_facts_per_item: default_max_facts_per_item(),
            query_max_chars: default_query_max_chars(),
            min_description_chars: default_min_description_chars(),
            confidence_boost: default_confidence_boost(),
        }
    }
}

fn default_search_endpoint() -> String {
    "https://google.serper.dev/search".into()
}
fn default_search_key_env() -> String {
    "SERPER_API_KEY".into()
}
fn default_max_facts_per_item() -> usize {
    5
}
fn default_query_max_chars() -> usize {
    200
}
fn default_min_description_chars() -> usize {
    50
}
fn default_confidence_boost() -> f64 {
    0.1
}

/// `[clustering]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusteringConfig {
    /// Minimum cosine similarity for a neighbour to qualify.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,

    /// Nearest neighbours considered per seed item.
    #[serde(default = "default_candidate_cap")]
    pub candidate_cap: usize,

    /// Qualifying neighbours (excluding the seed) needed to form a cluster.
    #[serde(default = "default_min_neighbours")]
    pub min_neighbours: usize,

    /// Member titles shown to the labeler.
    #[serde(default = "default_label_sample")]
    pub label_sample: usize,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            candidate_cap: default_candidate_cap(),
            min_neighbours: default_min_neighbours(),
            label_sample: default_label_sample(),
        }
    }
}

fn default_similarity_threshold() -> f32 {
    0.75
}
fn default_candidate_cap() -> usize {
    20
}
fn default_min_neighbours() -> usize {
    2
}
fn default_label_sample() -> usize {
    10
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_score_batch")]
    pub score_batch: usize,

    #[serde(default = "default_extract_batch")]
    pub extract_batch: usize,

    #[serde(default = "default_verify_batch")]
    pub verify_batch: usize,

    #[serde(default = "default_embed_batch")]
    pub embed_batch: usize,

    /// Maximum items selected for one run.
    #[serde(default = "default_select_limit")]
    pub select_limit: usize,

    /// Characters of item content included in AI prompts.
    #[serde(default = "default_content_prefix_chars")]
    pub content_prefix_chars: usize,

    /// Seconds before an abandoned site lease may be taken over.
    #[serde(default = "default_lease_ttl_secs")]
    pub lease_ttl_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            score_batch: default_score_batch(),
            extract_batch: default_extract_batch(),
            verify_batch: default_verify_batch(),
            embed_batch: default_embed_batch(),
            select_limit: default_select_limit(),
            content_prefix_chars: default_content_prefix_chars(),
            lease_ttl_secs: default_lease_ttl_secs(),
        }
    }
}

fn default_score_batch() -> usize {
    20
}
fn default_extract_batch() -> usize {
    10
}
fn default_verify_batch() -> usize {
    10
}
fn default_embed_batch() -> usize {
    50
}
fn default_select_limit() -> usize {
    5
}
fn default_content_prefix_chars() -> usize {
    3000
}
fn default_lease_ttl_secs() -> u64 {
    1800
}

/// `[[sites]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    /// Stable slug used as `site_id` throughout the store.
    pub id: String,

    /// Human-readable name.
    #[serde(default)]
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cms: Option<CmsConfig>,
}

/// `[sites.cms]` table: WordPress REST credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CmsConfig {
    /// Site root, e.g. `https://blog.example.com`.
    pub base_url: String,
    pub username: String,
    /// Name of the env var holding the application password.
    pub password_env: String,
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.contentforge/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| ContentForgeError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.contentforge/contentforge.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| ContentForgeError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        ContentForgeError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| ContentForgeError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| ContentForgeError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| ContentForgeError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Expand a leading `~/` against the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

/// Read a secret from the named env var. Missing or empty is a config error.
pub fn resolve_secret(var_name: &str, what: &str) -> Result<String> {
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(ContentForgeError::config(format!(
            "{what} not found. Set the {var_name} environment variable."
        ))),
    }
}
