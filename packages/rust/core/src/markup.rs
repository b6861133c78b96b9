//! HTML helpers for generated sections.

use std::fmt::Write;
use std::sync::LazyLock;

use contentforge_shared::SectionKind;
use regex::Regex;

use crate::schemas::{FaqEntry, GlossaryTerm};

static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"</?[a-zA-Z!][^>]*>").expect("tag regex is valid"));

static FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^```[a-zA-Z]*\s*|\s*```$").expect("fence regex is valid"));

/// Remove tags, leaving text content.
pub fn strip_tags(html: &str) -> String {
    TAG_RE.replace_all(html, " ").into_owned()
}

/// Words of visible text.
pub fn word_count(html: &str) -> usize {
    strip_tags(html).split_whitespace().count()
}

/// Trim a free-text completion down to its HTML fragment.
pub fn clean_fragment(raw: &str) -> String {
    FENCE_RE.replace_all(raw.trim(), "").trim().to_string()
}

/// Wrap a section body so its kind is visible in the assembled article.
pub fn wrap_section(kind: SectionKind, body: &str) -> String {
    format!(
        "<section class=\"cf-section cf-{}\">\n{body}\n</section>",
        kind.as_str().replace('_', "-")
    )
}

/// Glossary as a definition list.
pub fn render_glossary(terms: &[GlossaryTerm]) -> String {
    let mut html = String::from("<h2>Glossary</h2>\n<dl class=\"cf-glossary\">\n");
    for t in terms {
        let _ = writeln!(
            html,
            "  <dt>{}</dt>\n  <dd>{}</dd>",
            html_escape::encode_text(&t.term),
            html_escape::encode_text(&t.definition)
        );
    }
    html.push_str("</dl>");
    html
}

/// FAQ with schema.org `FAQPage` microdata.
pub fn render_faq(entries: &[FaqEntry]) -> String {
    let mut html = String::from(
        "<h2>Frequently Asked Questions</h2>\n<div itemscope itemtype=\"https://schema.org/FAQPage\">\n",
    );
    for e in entries {
        let _ = write!(
            html,
            concat!(
                "  <div itemscope itemprop=\"mainEntity\" itemtype=\"https://schema.org/Question\">\n",
                "    <h3 itemprop=\"name\">{}</h3>\n",
                "    <div itemscope itemprop=\"acceptedAnswer\" itemtype=\"https://schema.org/Answer\">\n",
                "      <p itemprop=\"text\">{}</p>\n",
                "    </div>\n",
                "  </div>\n"
            ),
            html_escape::encode_text(&e.question),
            html_escape::encode_text(&e.answer)
        );
    }
    html.push_str("</div>");
    html
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_visible_words_only() {
        assert_eq!(word_count("<p>Hello <b>async</b> world</p>"), 3);
        assert_eq!(word_count(""), 0);
    }

    #[test]
    fn cleans_fenced_fragment() {
        assert_eq!(clean_fragment("```html\n<p>Hi</p>\n```"), "<p>Hi</p>");
        assert_eq!(clean_fragment("  <p>Plain</p> "), "<p>Plain</p>");
    }

    #[test]
    fn glossary_escapes_text() {
        let html = render_glossary(&[GlossaryTerm {
            term: "Vec<T>".into(),
            definition: "A growable array & more".into(),
        }]);
        assert!(html.contains("<dt>Vec&lt;T&gt;</dt>"));
        assert!(html.contains("<dd>A growable array &amp; more</dd>"));
    }

    #[test]
    fn faq_has_microdata() {
        let html = render_faq(&[FaqEntry {
            question: "What is Tokio?".into(),
            answer: "An async runtime.".into(),
        }]);
        assert!(html.contains("https://schema.org/FAQPage"));
        assert!(html.contains("<h3 itemprop=\"name\">What is Tokio?</h3>"));
        assert_eq!(word_count(&html), 9);
    }

    #[test]
    fn wraps_with_kind_class() {
        let html = wrap_section(SectionKind::ZeroClick, "<p>x</p>");
        assert!(html.starts_with("<section class=\"cf-section cf-zero-click\">"));
    }
}
