//! RSS 2.0 and Atom parsing into normalized [`FeedEntry`] values.

use chrono::{DateTime, Utc};
use contentforge_shared::{ContentForgeError, FeedEntry, Result};
use quick_xml::Reader;
use quick_xml::events::Event;
use serde::Deserialize;

use crate::normalize::{fallback_guid, normalize_text};

// ---------------------------------------------------------------------------
// RSS 2.0
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Rss {
    channel: RssChannel,
}

#[derive(Debug, Deserialize)]
struct RssChannel {
    #[serde(rename = "item", default)]
    items: Vec<RssItem>,
}

#[derive(Debug, Deserialize)]
struct RssItem {
    title: Option<String>,
    link: Option<String>,
    guid: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
    #[serde(rename = "encoded", alias = "content:encoded")]
    encoded: Option<String>,
}

// ---------------------------------------------------------------------------
// Atom
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct AtomFeed {
    #[serde(rename = "entry", default)]
    entries: Vec<AtomEntry>,
}

#[derive(Debug, Deserialize)]
struct AtomEntry {
    id: Option<String>,
    title: Option<AtomText>,
    #[serde(rename = "link", default)]
    links: Vec<AtomLink>,
    published: Option<String>,
    updated: Option<String>,
    summary: Option<AtomText>,
    content: Option<AtomText>,
}

/// Text construct; the `type` attribute is ignored since markup is stripped anyway.
#[derive(Debug, Deserialize)]
struct AtomText {
    #[serde(rename = "$text", default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct AtomLink {
    #[serde(rename = "@href")]
    href: String,
    #[serde(rename = "@rel")]
    rel: Option<String>,
}

impl AtomEntry {
    /// The `alternate` link, or the first link when none is marked.
    fn alternate_link(&self) -> Option<&str> {
        self.links
            .iter()
            .find(|l| l.rel.as_deref().is_none_or(|r| r == "alternate"))
            .or_else(|| self.links.first())
            .map(|l| l.href.as_str())
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse an RSS 2.0 or Atom document. Entries with neither title nor content
/// are dropped.
pub fn parse_feed(xml: &str) -> Result<Vec<FeedEntry>> {
    let entries = match root_element(xml)?.as_str() {
        "rss" => parse_rss(xml)?,
        "feed" => parse_atom(xml)?,
        other => {
            return Err(ContentForgeError::parse(format!(
                "unsupported feed format: root element <{other}>"
            )));
        }
    };

    Ok(entries
        .into_iter()
        .filter(|e| !e.title.is_empty() || !e.content.is_empty())
        .collect())
}

fn parse_rss(xml: &str) -> Result<Vec<FeedEntry>> {
    let rss: Rss = quick_xml::de::from_str(xml)
        .map_err(|e| ContentForgeError::parse(format!("invalid RSS document: {e}")))?;

    Ok(rss
        .channel
        .items
        .into_iter()
        .map(|item| {
            let title = normalize_text(item.title.as_deref().unwrap_or_default());
            let link = non_empty(item.link);
            let body = item.encoded.or(item.description);
            let guid = non_empty(item.guid)
                .unwrap_or_else(|| fallback_guid(&title, link.as_deref()));
            FeedEntry {
                guid,
                title,
                link,
                content: normalize_text(body.as_deref().unwrap_or_default()),
                published_at: item.pub_date.as_deref().and_then(parse_rfc2822),
            }
        })
        .collect())
}

fn parse_atom(xml: &str) -> Result<Vec<FeedEntry>> {
    let feed: AtomFeed = quick_xml::de::from_str(xml)
        .map_err(|e| ContentForgeError::parse(format!("invalid Atom document: {e}")))?;

    Ok(feed
        .entries
        .into_iter()
        .map(|entry| {
            let title = normalize_text(entry.title.as_ref().map_or("", |t| t.value.as_str()));
            let link = entry.alternate_link().map(str::to_owned);
            let body = entry.content.as_ref().or(entry.summary.as_ref());
            let guid = non_empty(entry.id.clone())
                .unwrap_or_else(|| fallback_guid(&title, link.as_deref()));
            FeedEntry {
                guid,
                title,
                link,
                content: normalize_text(body.map_or("", |t| t.value.as_str())),
                published_at: entry
                    .published
                    .as_deref()
                    .or(entry.updated.as_deref())
                    .and_then(parse_rfc3339),
            }
        })
        .collect())
}

/// Local name of the document's first element.
fn root_element(xml: &str) -> Result<String> {
    let mut reader = Reader::from_str(xml);
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                return Ok(String::from_utf8_lossy(e.local_name().as_ref()).into_owned());
            }
            Ok(Event::Eof) => return Err(ContentForgeError::parse("empty feed document")),
            Err(e) => {
                return Err(ContentForgeError::parse(format!(
                    "malformed XML at position {}: {e}",
                    reader.error_position()
                )));
            }
            Ok(_) => {}
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_rfc2822(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(s.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn parse_rfc3339(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture(name: &str) -> String {
        std::fs::read_to_string(format!("../../../fixtures/feeds/{name}")).expect("read fixture")
    }

    #[test]
    fn parses_rss_items() {
        let entries = parse_feed(&fixture("rss2.xml")).unwrap();
        assert_eq!(entries.len(), 3);

        let first = &entries[0];
        assert_eq!(first.guid, "abc123");
        assert_eq!(first.title, "Rust 1.85 ships the 2024 edition");
        assert_eq!(
            first.content,
            "The Rust team released 1.85 & stabilized the 2024 edition."
        );
        assert_eq!(
            first.published_at.unwrap().to_rfc3339(),
            "2025-02-20T14:30:00+00:00"
        );
    }

    #[test]
    fn rss_guid_falls_back_to_link_then_hash() {
        let entries = parse_feed(&fixture("rss2.xml")).unwrap();
        assert_eq!(entries[1].guid, "https://news.example.com/async-closures");
        assert_eq!(entries[1].title, "Async closures land & more");
        assert_eq!(entries[2].link, None);
        assert_eq!(entries[2].guid.len(), 64);
    }

    #[test]
    fn parses_atom_entries() {
        let entries = parse_feed(&fixture("atom.xml")).unwrap();
        assert_eq!(entries.len(), 2);

        let first = &entries[0];
        assert_eq!(first.guid, "tag:blog.example.com,2025:libsql-edge");
        assert_eq!(first.title, "Scaling libSQL at the edge");
        assert_eq!(first.link.as_deref(), Some("https://blog.example.com/libsql-edge"));
        assert_eq!(first.content, "Embedded replicas sync from a primary.");
        assert_eq!(
            first.published_at.unwrap().to_rfc3339(),
            "2025-02-28T07:15:00+00:00"
        );

        // No <content>: summary is used, <updated> stands in for <published>
        let second = &entries[1];
        assert_eq!(second.content, "Structured logs with spans.");
        assert!(second.published_at.is_some());
    }

    #[test]
    fn empty_channel_yields_no_entries() {
        let xml = r#"<rss version="2.0"><channel><title>Quiet</title></channel></rss>"#;
        assert!(parse_feed(xml).unwrap().is_empty());
    }

    #[test]
    fn rejects_unknown_root() {
        let err = parse_feed("<html><body>not a feed</body></html>").unwrap_err();
        assert!(err.to_string().contains("unsupported feed format"));
    }

    #[test]
    fn rejects_empty_document() {
        assert!(parse_feed("").is_err());
    }
}
