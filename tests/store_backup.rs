// tests/store_backup.rs
mod common;

use std::fs;
use std::time::Duration;

use common::sample_payload;
use energy_news_pipeline::store::ModerationStore;

fn backups_in(dir: &std::path::Path, prefix: &str) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .expect("read dir")
        .flatten()
        .map(|e| e.file_name().to_string_lossy().to_string())
        .filter(|n| n.starts_with(prefix))
        .collect();
    names.sort();
    names
}

#[test]
fn create_backup_copies_both_files() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = ModerationStore::open(
        dir.path().join("news_db.json"),
        dir.path().join("sent_ids.json"),
        Duration::from_secs(3_600),
    )
    .expect("open");

    store
        .put("fp1", sample_payload("https://x/1", "T"), 1, "mod")
        .expect("put");
    store.create_backup().expect("backup");

    assert_eq!(backups_in(dir.path(), "news_db.json.backup_").len(), 1);
    assert_eq!(backups_in(dir.path(), "sent_ids.json.backup_").len(), 1);
}

#[test]
fn rotation_keeps_only_the_newest_ten() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = ModerationStore::open(
        dir.path().join("news_db.json"),
        dir.path().join("sent_ids.json"),
        Duration::from_secs(3_600),
    )
    .expect("open");
    store
        .put("fp1", sample_payload("https://x/1", "T"), 1, "mod")
        .expect("put");

    // Seed 12 stale backups with old timestamps; the fresh backup below
    // sorts after all of them.
    for i in 1..=12 {
        let name = format!("news_db.json.backup_20200101_{i:06}");
        fs::write(dir.path().join(name), "{}").expect("seed backup");
    }

    store.create_backup().expect("backup");

    let remaining = backups_in(dir.path(), "news_db.json.backup_");
    assert_eq!(remaining.len(), 10);
    // The oldest seeds are gone, the fresh backup survives.
    assert!(!remaining.contains(&"news_db.json.backup_20200101_000001".to_string()));
    assert!(remaining.iter().any(|n| !n.starts_with("news_db.json.backup_2020")));
}

#[test]
fn corrupt_primary_recovers_from_newest_backup() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = dir.path().join("news_db.json");
    let sent = dir.path().join("sent_ids.json");

    {
        let store = ModerationStore::open(&db, &sent, Duration::from_secs(3_600)).expect("open");
        store
            .put("fp1", sample_payload("https://x/1", "T"), 1, "mod")
            .expect("put");
        store.create_backup().expect("backup");
    }

    fs::write(&db, "{ not json").expect("corrupt");

    let store = ModerationStore::open(&db, &sent, Duration::from_secs(3_600)).expect("reopen");
    let record = store.get("fp1").expect("restored record");
    assert_eq!(record.item.title, "T");
    assert!(store.is_sent("fp1"));
}

#[test]
fn corrupt_primary_without_backup_starts_empty() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = dir.path().join("news_db.json");
    fs::write(&db, "][").expect("corrupt");

    let store = ModerationStore::open(
        &db,
        dir.path().join("sent_ids.json"),
        Duration::from_secs(3_600),
    )
    .expect("open");
    assert_eq!(store.stats().total, 0);
}

#[test]
fn backup_if_due_respects_interval() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = ModerationStore::open(
        dir.path().join("news_db.json"),
        dir.path().join("sent_ids.json"),
        Duration::from_secs(3_600),
    )
    .expect("open");
    store
        .put("fp1", sample_payload("https://x/1", "T"), 1, "mod")
        .expect("put");

    // Interval has not elapsed since open.
    assert!(!store.backup_if_due().expect("check"));
    assert!(backups_in(dir.path(), "news_db.json.backup_").is_empty());
}
