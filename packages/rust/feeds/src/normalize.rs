//! Text normalization for feed titles and bodies.

use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(script|style)[^>]*>.*?</(script|style)>|</?[a-z!][^>]*>")
        .expect("tag regex is valid")
});

static WS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("ws regex is valid"));

/// Decode HTML entities, strip markup, and collapse whitespace.
///
/// Entities are decoded twice around tag stripping so that escaped markup
/// (`&lt;p&gt;`) is removed as well.
pub fn normalize_text(raw: &str) -> String {
    let decoded = html_escape::decode_html_entities(raw);
    let stripped = TAG_RE.replace_all(&decoded, " ");
    let decoded = html_escape::decode_html_entities(&stripped);
    WS_RE.replace_all(&decoded, " ").trim().to_string()
}

/// Identity for entries that carry no guid: the link if present, otherwise a
/// SHA-256 of title and link.
pub fn fallback_guid(title: &str, link: Option<&str>) -> String {
    if let Some(link) = link.filter(|l| !l.trim().is_empty()) {
        return link.trim().to_string();
    }
    let mut hasher = Sha256::new();
    hasher.update(title.as_bytes());
    hasher.update(link.unwrap_or_default().as_bytes());
    format!("{:x}", hasher.finalize())
}
