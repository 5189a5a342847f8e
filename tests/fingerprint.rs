// tests/fingerprint.rs
mod common;

use common::sample_item;
use energy_news_pipeline::fingerprint::content_fingerprint;

#[test]
fn fingerprint_is_stable_across_calls() {
    let item = sample_item("https://x/1", "T");
    let a = item.fingerprint();
    let b = item.fingerprint();
    assert_eq!(a, b);
    assert_eq!(a, content_fingerprint("https://x/1", "T", "2024-01-01 09:00", &item.preview));
}

#[test]
fn distinct_urls_get_distinct_fingerprints() {
    let a = sample_item("https://x/1", "T").fingerprint();
    let b = sample_item("https://x/2", "T").fingerprint();
    assert_ne!(a, b);
}

#[test]
fn fingerprint_shape_is_16_hex() {
    let fp = sample_item("https://x/1", "T").fingerprint();
    assert_eq!(fp.len(), 16);
    assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
}
