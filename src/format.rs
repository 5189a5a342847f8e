// src/format.rs
//! Text cleanup and outbound message rendering.

use once_cell::sync::OnceCell;
use regex::Regex;

use crate::store::RecordPayload;

/// Publication body is truncated beyond this many characters so the final
/// message stays inside one transport frame together with its header lines.
pub const PUBLICATION_TEXT_LIMIT: usize = 3_800;

/// Strip HTML tags, decode entities, and collapse whitespace.
pub fn clean_text(s: &str) -> String {
    if s.is_empty() {
        return String::new();
    }

    static RE_TAGS: OnceCell<Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| Regex::new(r"(?is)</?[^>]+>").expect("tag regex"));
    let out = re_tags.replace_all(s, "").to_string();

    let out = html_escape::decode_html_entities(&out).to_string();

    static RE_WS: OnceCell<Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| Regex::new(r"\s+").expect("whitespace regex"));
    re_ws.replace_all(&out, " ").trim().to_string()
}

/// Render the message posted to the moderation channel.
pub fn moderation_message(item: &RecordPayload) -> String {
    let title = clean_text(&item.title);
    let title = if title.is_empty() { "Untitled".to_string() } else { title };
    let preview = clean_text(&item.preview);
    let source = clean_text(&item.source);
    let source = if source.is_empty() { "Unknown source".to_string() } else { source };
    let date = clean_text(&item.date);
    let marker = if item.edited { " [edited]" } else { "" };

    format!(
        "{title}{marker}\n\n{preview}\n\nSource: {source} ({date})\n{url}",
        url = item.url
    )
}

/// Render the message published to the destination channel after approval.
pub fn publication_message(item: &RecordPayload) -> String {
    let title = clean_text(&item.title);
    let title = if title.is_empty() { "Untitled".to_string() } else { title };
    let mut text = clean_text(&item.full_text);
    let source = clean_text(&item.source);
    let source = if source.is_empty() { "Unknown source".to_string() } else { source };

    if text.chars().count() > PUBLICATION_TEXT_LIMIT {
        text = text.chars().take(PUBLICATION_TEXT_LIMIT).collect();
        text.push_str("… [truncated]");
    }

    format!(
        "{title}\n\n{text}\n\nSource: {source}\nOriginal: {url}",
        url = item.url
    )
}
