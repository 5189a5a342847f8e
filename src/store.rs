// src/store.rs
//! Thread-safe, crash-recoverable moderation record store.
//!
//! Two maps live behind one mutex: fingerprint -> record, and the permanent
//! sent-set of every fingerprint ever admitted. All mutations run inside a
//! transaction: snapshot, apply, persist both files atomically; any
//! persistence failure rolls the in-memory state back to the snapshot.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::ingest::NewsItem;

/// How often the background task checks whether a backup is due.
const BACKUP_CHECK_PERIOD: Duration = Duration::from_secs(300);

/// Rotated backups retained per file.
const BACKUPS_RETAINED: usize = 10;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Pending,
    Published,
    Rejected,
}

/// Item payload embedded in a record, extended with moderation-side fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecordPayload {
    pub title: String,
    pub source: String,
    pub date: String,
    pub url: String,
    pub preview: String,
    pub full_text: String,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub relevance_reason: String,
    #[serde(default)]
    pub edited: bool,
    #[serde(default)]
    pub preview_message_ids: Vec<i64>,
    #[serde(default)]
    pub preview_chat_id: Option<String>,
}

impl From<NewsItem> for RecordPayload {
    fn from(item: NewsItem) -> Self {
        Self {
            title: item.title,
            source: item.source,
            date: item.date,
            url: item.url,
            preview: item.preview,
            full_text: item.full_text,
            language: item.language,
            relevance_reason: item.relevance_reason,
            edited: false,
            preview_message_ids: Vec::new(),
            preview_chat_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModerationRecord {
    #[serde(rename = "news_data")]
    pub item: RecordPayload,
    pub message_id: i64,
    pub channel_id: String,
    pub status: Status,
    /// RFC 3339.
    pub created_at: String,
    pub updated_at: String,
}

/// The enumerable set of legal record mutations.
#[derive(Debug, Clone)]
pub enum RecordField {
    FullText(String),
    Edited(bool),
    PreviewMessageIds(Vec<i64>),
    PreviewChatId(Option<String>),
    Status(Status),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub total: usize,
    pub pending: usize,
    pub published: usize,
    pub rejected: usize,
    pub sent_count: usize,
    pub db_size_bytes: u64,
}

#[derive(Debug, Clone, Default)]
struct Inner {
    records: BTreeMap<String, ModerationRecord>,
    sent: BTreeSet<String>,
}

pub struct ModerationStore {
    inner: Mutex<Inner>,
    db_path: PathBuf,
    sent_path: PathBuf,
    backup_interval: Duration,
    last_backup: Mutex<Instant>,
}

impl ModerationStore {
    /// Open the store, falling back to the newest backup when the primary
    /// records file is corrupt. A missing file starts empty.
    pub fn open(
        db_path: impl Into<PathBuf>,
        sent_path: impl Into<PathBuf>,
        backup_interval: Duration,
    ) -> StoreResult<Self> {
        let db_path = db_path.into();
        let sent_path = sent_path.into();

        for path in [&db_path, &sent_path] {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
        }

        let records = match load_records(&db_path) {
            Ok(records) => records,
            Err(e) => {
                warn!(path = %db_path.display(), error = %e, "records file unreadable, trying backup");
                match restore_records_from_backup(&db_path) {
                    Some(records) => records,
                    None => {
                        warn!(path = %db_path.display(), "no usable backup, starting empty");
                        BTreeMap::new()
                    }
                }
            }
        };

        let sent = match load_sent(&sent_path) {
            Ok(sent) => sent,
            Err(e) => {
                warn!(path = %sent_path.display(), error = %e, "sent-ids file unreadable, starting empty");
                BTreeSet::new()
            }
        };

        info!(
            records = records.len(),
            sent = sent.len(),
            "moderation store opened"
        );

        Ok(Self {
            inner: Mutex::new(Inner { records, sent }),
            db_path,
            sent_path,
            backup_interval,
            last_backup: Mutex::new(Instant::now()),
        })
    }

    /// Create a pending record and mark the fingerprint as sent.
    pub fn put(
        &self,
        fingerprint: &str,
        item: RecordPayload,
        message_id: i64,
        channel_id: &str,
    ) -> StoreResult<()> {
        self.transaction(|inner| {
            let now = Utc::now().to_rfc3339();
            inner.records.insert(
                fingerprint.to_string(),
                ModerationRecord {
                    item,
                    message_id,
                    channel_id: channel_id.to_string(),
                    status: Status::Pending,
                    created_at: now.clone(),
                    updated_at: now,
                },
            );
            inner.sent.insert(fingerprint.to_string());
            debug!(fingerprint, "record created");
            Ok(())
        })
    }

    pub fn get(&self, fingerprint: &str) -> Option<ModerationRecord> {
        let inner = self.inner.lock().expect("store mutex poisoned");
        inner.records.get(fingerprint).cloned()
    }

    pub fn is_sent(&self, fingerprint: &str) -> bool {
        let inner = self.inner.lock().expect("store mutex poisoned");
        inner.sent.contains(fingerprint)
    }

    /// Apply field updates to a record, refreshing `updated_at`.
    pub fn update(&self, fingerprint: &str, updates: Vec<RecordField>) -> StoreResult<()> {
        self.transaction(|inner| {
            let record = inner
                .records
                .get_mut(fingerprint)
                .ok_or_else(|| StoreError::NotFound(fingerprint.to_string()))?;
            for update in updates {
                match update {
                    RecordField::FullText(text) => record.item.full_text = text,
                    RecordField::Edited(edited) => record.item.edited = edited,
                    RecordField::PreviewMessageIds(ids) => record.item.preview_message_ids = ids,
                    RecordField::PreviewChatId(chat) => record.item.preview_chat_id = chat,
                    RecordField::Status(status) => record.status = status,
                }
            }
            record.updated_at = Utc::now().to_rfc3339();
            debug!(fingerprint, "record updated");
            Ok(())
        })
    }

    /// Remove a record. The fingerprint stays in the sent-set permanently.
    pub fn delete(&self, fingerprint: &str) -> StoreResult<bool> {
        self.transaction(|inner| {
            let removed = inner.records.remove(fingerprint).is_some();
            if removed {
                debug!(fingerprint, "record deleted");
            }
            Ok(removed)
        })
    }

    /// Remove records created earlier than `days` days ago.
    pub fn cleanup_old(&self, days: i64) -> StoreResult<usize> {
        let cutoff = Utc::now() - chrono::Duration::days(days);
        self.transaction(|inner| {
            let stale: Vec<String> = inner
                .records
                .iter()
                .filter(|(_, r)| {
                    chrono::DateTime::parse_from_rfc3339(&r.created_at)
                        .map(|ts| ts.with_timezone(&Utc) < cutoff)
                        .unwrap_or(false)
                })
                .map(|(fp, _)| fp.clone())
                .collect();
            for fp in &stale {
                inner.records.remove(fp);
            }
            if !stale.is_empty() {
                info!(removed = stale.len(), "cleaned up old records");
            }
            Ok(stale.len())
        })
    }

    pub fn clear_all(&self) -> StoreResult<()> {
        self.transaction(|inner| {
            inner.records.clear();
            inner.sent.clear();
            warn!("store cleared");
            Ok(())
        })
    }

    pub fn stats(&self) -> StoreStats {
        let inner = self.inner.lock().expect("store mutex poisoned");
        let mut stats = StoreStats {
            total: inner.records.len(),
            sent_count: inner.sent.len(),
            db_size_bytes: fs::metadata(&self.db_path).map(|m| m.len()).unwrap_or(0),
            ..StoreStats::default()
        };
        for record in inner.records.values() {
            match record.status {
                Status::Pending => stats.pending += 1,
                Status::Published => stats.published += 1,
                Status::Rejected => stats.rejected += 1,
            }
        }
        stats
    }

    /// Persist the current in-memory state without mutating it.
    pub fn force_save(&self) -> StoreResult<()> {
        let inner = self.inner.lock().expect("store mutex poisoned");
        self.persist(&inner)?;
        info!("store force saved");
        Ok(())
    }

    /// Copy both files to timestamped backups and rotate old ones.
    pub fn create_backup(&self) -> StoreResult<()> {
        let _inner = self.inner.lock().expect("store mutex poisoned");
        let stamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();

        for path in [&self.db_path, &self.sent_path] {
            if path.exists() {
                let backup = backup_path(path, &stamp);
                fs::copy(path, &backup)?;
                debug!(backup = %backup.display(), "backup created");
            }
            cleanup_old_backups(path)?;
        }

        *self.last_backup.lock().expect("backup clock poisoned") = Instant::now();
        info!("store backup created");
        Ok(())
    }

    /// Create a backup if the configured interval has elapsed.
    pub fn backup_if_due(&self) -> StoreResult<bool> {
        let due = {
            let last = self.last_backup.lock().expect("backup clock poisoned");
            last.elapsed() >= self.backup_interval
        };
        if due {
            self.create_backup()?;
        }
        Ok(due)
    }

    fn transaction<T>(&self, f: impl FnOnce(&mut Inner) -> StoreResult<T>) -> StoreResult<T> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        let snapshot = inner.clone();

        let out = f(&mut inner).and_then(|value| {
            self.persist(&inner)?;
            Ok(value)
        });

        if let Err(e) = &out {
            *inner = snapshot;
            error!(error = %e, "transaction rolled back");
        }
        out
    }

    fn persist(&self, inner: &Inner) -> StoreResult<()> {
        let records = serde_json::to_string_pretty(&inner.records)?;
        write_atomic(&self.db_path, &records)?;
        let sent: Vec<&String> = inner.sent.iter().collect();
        let sent = serde_json::to_string_pretty(&sent)?;
        write_atomic(&self.sent_path, &sent)?;
        Ok(())
    }
}

/// Background task: wake periodically, back up when the interval elapses.
/// Never blocks foreground operations beyond the duration of a file copy.
pub fn spawn_backup_task(store: Arc<ModerationStore>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(BACKUP_CHECK_PERIOD);
        ticker.tick().await; // immediate first tick
        loop {
            ticker.tick().await;
            if let Err(e) = store.backup_if_due() {
                error!(error = %e, "periodic backup failed");
            }
        }
    })
}

/// Write to a sibling temp file, then atomically rename over the target.
fn write_atomic(path: &Path, contents: &str) -> io::Result<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "store".to_string());
    let tmp = path.with_file_name(format!("{file_name}.tmp"));
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn load_records(path: &Path) -> StoreResult<BTreeMap<String, ModerationRecord>> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

fn load_sent(path: &Path) -> StoreResult<BTreeSet<String>> {
    if !path.exists() {
        return Ok(BTreeSet::new());
    }
    let content = fs::read_to_string(path)?;
    let ids: Vec<String> = serde_json::from_str(&content)?;
    Ok(ids.into_iter().collect())
}

fn backup_path(path: &Path, stamp: &str) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "store".to_string());
    path.with_file_name(format!("{file_name}.backup_{stamp}"))
}

/// List this file's backups, oldest first. Timestamped names sort
/// chronologically.
fn list_backups(path: &Path) -> Vec<PathBuf> {
    let Some(dir) = path.parent() else {
        return Vec::new();
    };
    let Some(file_name) = path.file_name().map(|n| n.to_string_lossy().to_string()) else {
        return Vec::new();
    };
    let prefix = format!("{file_name}.backup_");

    let mut backups: Vec<PathBuf> = fs::read_dir(dir)
        .map(|entries| {
            entries
                .flatten()
                .map(|e| e.path())
                .filter(|p| {
                    p.file_name()
                        .map(|n| n.to_string_lossy().starts_with(&prefix))
                        .unwrap_or(false)
                })
                .collect()
        })
        .unwrap_or_default();
    backups.sort();
    backups
}

fn cleanup_old_backups(path: &Path) -> io::Result<()> {
    let backups = list_backups(path);
    if backups.len() > BACKUPS_RETAINED {
        for stale in &backups[..backups.len() - BACKUPS_RETAINED] {
            fs::remove_file(stale)?;
            debug!(backup = %stale.display(), "removed old backup");
        }
    }
    Ok(())
}

fn restore_records_from_backup(path: &Path) -> Option<BTreeMap<String, ModerationRecord>> {
    let backups = list_backups(path);
    let latest = backups.last()?;
    let content = fs::read_to_string(latest).ok()?;
    let records = serde_json::from_str(&content).ok()?;
    info!(backup = %latest.display(), "restored records from backup");
    Some(records)
}
