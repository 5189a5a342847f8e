// src/ingest/extract.rs
//! Best-effort article body extraction from fetched HTML.
//!
//! Site-specific selectors live outside this crate; this is the generic
//! fallback: drop boilerplate containers, then keep substantial paragraphs.

use once_cell::sync::OnceCell;
use regex::Regex;

use crate::format::clean_text;

/// Paragraphs shorter than this are navigation/boilerplate noise.
const MIN_PARAGRAPH_CHARS: usize = 30;

pub fn extract_article_text(html: &str) -> String {
    if html.is_empty() {
        return String::new();
    }

    static RE_DROP: OnceCell<Regex> = OnceCell::new();
    let re_drop = RE_DROP.get_or_init(|| {
        Regex::new(
            r"(?is)<(?:script|style|nav|header|footer|aside)[^>]*>.*?</(?:script|style|nav|header|footer|aside)>",
        )
        .expect("boilerplate regex")
    });
    let stripped = re_drop.replace_all(html, " ");

    static RE_P: OnceCell<Regex> = OnceCell::new();
    let re_p = RE_P.get_or_init(|| Regex::new(r"(?is)<p[^>]*>(.*?)</p>").expect("paragraph regex"));

    let mut paragraphs = Vec::new();
    for caps in re_p.captures_iter(&stripped) {
        if let Some(m) = caps.get(1) {
            let text = clean_text(m.as_str());
            if text.chars().count() > MIN_PARAGRAPH_CHARS {
                paragraphs.push(text);
            }
        }
    }

    paragraphs.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_substantial_paragraphs_only() {
        let html = r#"
            <html><head><style>p { color: red }</style></head><body>
            <nav><p>Home | News | About and more navigation links here</p></nav>
            <p>Short.</p>
            <p>The new offshore wind farm will supply power to roughly
               400,000 households starting next year.</p>
            <script>var x = "a very long script body that must never leak";</script>
            </body></html>"#;
        let text = extract_article_text(html);
        assert!(text.contains("offshore wind farm"));
        assert!(!text.contains("Short."));
        assert!(!text.contains("script body"));
        assert!(!text.contains("navigation links"));
    }

    #[test]
    fn empty_input_yields_empty_output() {
        assert_eq!(extract_article_text(""), "");
        assert_eq!(extract_article_text("<div>no paragraphs</div>"), "");
    }
}
