// src/fingerprint.rs
//! Deterministic content identity for candidate items.
//!
//! The same logical article must map to the same fingerprint across runs and
//! restarts, so the sent-set can suppress re-ingestion of material we have
//! already admitted to moderation.

use sha2::{Digest, Sha256};

/// Hex prefix of the SHA-256 digest of `input`.
pub(crate) fn sha256_hex(input: &str, hex_len: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(hex_len);
    for b in digest.iter().take(hex_len.div_ceil(2)) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out.truncate(hex_len);
    out
}

/// Compute the 16-hex-char fingerprint of a candidate item.
///
/// Identity key precedence: trimmed url, then `"{title}-{date}"` trimmed,
/// then the first 120 characters of the preview.
pub fn content_fingerprint(url: &str, title: &str, date: &str, preview: &str) -> String {
    let mut key = url.trim().to_string();
    if key.is_empty() {
        key = format!("{title}-{date}").trim().to_string();
    }
    if key == "-" || key.is_empty() {
        key = preview.chars().take(120).collect();
    }
    sha256_hex(&key, 16)
}
