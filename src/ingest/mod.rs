// src/ingest/mod.rs
//! Concurrent feed ingestion: fetch, extract, translate, gate, dedup.
//!
//! One task per enabled source bounded by a global semaphore; article
//! extraction within a source is bounded by a smaller per-source semaphore.
//! A source failing never aborts the pass; failures become counters.

pub mod extract;
pub mod feed;
pub mod sources;

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::fetch::FetchClient;
use crate::fingerprint::content_fingerprint;
use crate::format::clean_text;
use crate::ingest::sources::FeedSource;
use crate::relevance::RelevanceGate;
use crate::translate::SharedTranslator;

const PREVIEW_CHARS: usize = 300;

/// One-time metrics registration (so series show up on a recorder if wired).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_accepted_total", "Articles accepted by the relevance gate.");
        describe_counter!("ingest_rejected_total", "Articles rejected (old or not relevant).");
        describe_counter!("ingest_fetch_errors_total", "Feed or article fetch failures.");
        describe_histogram!("ingest_source_ms", "Per-source processing time in milliseconds.");
        describe_gauge!("ingest_last_run_ts", "Unix ts when the ingestion pass last ran.");
    });
}

/// A candidate item produced by ingestion. Immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewsItem {
    pub title: String,
    pub source: String,
    /// `%Y-%m-%d %H:%M`, UTC.
    pub date: String,
    pub url: String,
    pub preview: String,
    pub full_text: String,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub relevance_reason: String,
}

impl NewsItem {
    pub fn fingerprint(&self) -> String {
        content_fingerprint(&self.url, &self.title, &self.date, &self.preview)
    }
}

/// Per-source outcome counters for one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SourceCounters {
    pub accepted: u32,
    pub too_old: u32,
    pub not_relevant: u32,
    pub fetch_failed: u32,
    pub processing_error: u32,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestStats {
    pub per_source: BTreeMap<String, SourceCounters>,
}

impl IngestStats {
    fn entry(&mut self, source: &str) -> &mut SourceCounters {
        self.per_source.entry(source.to_string()).or_default()
    }

    pub fn totals(&self) -> SourceCounters {
        let mut t = SourceCounters::default();
        for c in self.per_source.values() {
            t.accepted += c.accepted;
            t.too_old += c.too_old;
            t.not_relevant += c.not_relevant;
            t.fetch_failed += c.fetch_failed;
            t.processing_error += c.processing_error;
        }
        t
    }
}

/// Result of one full ingestion pass.
#[derive(Debug, Default)]
pub struct IngestReport {
    pub items: Vec<NewsItem>,
    pub stats: IngestStats,
    pub errors: Vec<String>,
    pub elapsed: Duration,
}

#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Concurrent source tasks.
    pub max_workers: usize,
    /// Concurrent article extractions within one source.
    pub article_concurrency: usize,
    /// Entries older than this many days are discarded.
    pub days_back: i64,
    pub target_language: String,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_workers: 10,
            article_concurrency: 5,
            days_back: 21,
            target_language: "en".to_string(),
        }
    }
}

enum EntryOutcome {
    Accepted(Box<NewsItem>),
    TooOld,
    NotRelevant,
    Skipped,
}

#[derive(Clone)]
pub struct IngestionEngine {
    fetch: Arc<FetchClient>,
    gate: Arc<RelevanceGate>,
    translator: Option<SharedTranslator>,
    config: IngestConfig,
}

impl IngestionEngine {
    pub fn new(
        fetch: Arc<FetchClient>,
        gate: Arc<RelevanceGate>,
        translator: Option<SharedTranslator>,
        config: IngestConfig,
    ) -> Self {
        Self {
            fetch,
            gate,
            translator,
            config,
        }
    }

    /// Process all enabled sources concurrently and return the unique result
    /// set plus per-source counters.
    pub async fn run(&self, sources: &[FeedSource]) -> IngestReport {
        ensure_metrics_described();
        let start = Instant::now();
        let cutoff = Utc::now() - chrono::Duration::days(self.config.days_back);

        let enabled: Vec<FeedSource> = sources.iter().filter(|s| s.enabled).cloned().collect();
        info!(sources = enabled.len(), "starting ingestion pass");

        let limit = Arc::new(Semaphore::new(self.config.max_workers.max(1)));
        let mut tasks: JoinSet<(usize, String, Vec<NewsItem>, SourceCounters, Vec<String>)> =
            JoinSet::new();

        for (idx, src) in enabled.into_iter().enumerate() {
            let engine = self.clone();
            let limit = limit.clone();
            tasks.spawn(async move {
                let _permit = limit.acquire_owned().await.expect("semaphore closed");
                let t0 = Instant::now();
                let name = src.name.clone();
                let (items, counters, errors) = engine.process_source(&src, cutoff).await;
                histogram!("ingest_source_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
                (idx, name, items, counters, errors)
            });
        }

        let mut per_source: Vec<(usize, String, Vec<NewsItem>, SourceCounters, Vec<String>)> =
            Vec::new();
        let mut report = IngestReport::default();

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => per_source.push(result),
                Err(e) => {
                    warn!(error = ?e, "source task aborted");
                    report.errors.push(format!("source task aborted: {e}"));
                }
            }
        }

        // Restore configured source order before URL dedup so "first
        // occurrence wins" is deterministic.
        per_source.sort_by_key(|(idx, ..)| *idx);

        let mut all_items = Vec::new();
        for (_, name, items, counters, errors) in per_source {
            all_items.extend(items);
            *report.stats.entry(&name) = counters;
            report.errors.extend(errors);
        }

        let total = all_items.len();
        report.items = dedup_by_url(all_items);
        report.elapsed = start.elapsed();

        let totals = report.stats.totals();
        counter!("ingest_accepted_total").increment(totals.accepted as u64);
        counter!("ingest_rejected_total")
            .increment((totals.too_old + totals.not_relevant) as u64);
        counter!("ingest_fetch_errors_total").increment(totals.fetch_failed as u64);
        gauge!("ingest_last_run_ts").set(Utc::now().timestamp().max(0) as f64);

        info!(
            unique = report.items.len(),
            total,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "ingestion pass completed"
        );
        report
    }

    async fn process_source(
        &self,
        src: &FeedSource,
        cutoff: DateTime<Utc>,
    ) -> (Vec<NewsItem>, SourceCounters, Vec<String>) {
        let mut counters = SourceCounters::default();
        let mut errors = Vec::new();

        let delay = Duration::from_secs_f64(src.rate_limit_delay.max(0.0));
        let body = match self
            .fetch
            .get_with_delay(&src.url, &src.custom_headers, delay)
            .await
            .body()
        {
            Some(b) => b,
            None => {
                warn!(source = %src.name, url = %src.url, "feed fetch failed");
                counters.fetch_failed += 1;
                return (Vec::new(), counters, errors);
            }
        };

        let xml = String::from_utf8_lossy(&body).to_string();
        let entries = match feed::parse_feed(&xml) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(source = %src.name, error = ?e, "feed parse failed");
                counters.processing_error += 1;
                errors.push(format!("{}: {e}", src.name));
                return (Vec::new(), counters, errors);
            }
        };

        let article_limit = Arc::new(Semaphore::new(self.config.article_concurrency.max(1)));
        let mut tasks: JoinSet<(usize, EntryOutcome)> = JoinSet::new();

        for (idx, entry) in entries.into_iter().take(src.max_articles).enumerate() {
            let engine = self.clone();
            let src = src.clone();
            let article_limit = article_limit.clone();
            tasks.spawn(async move {
                let _permit = article_limit.acquire_owned().await.expect("semaphore closed");
                (idx, engine.process_entry(entry, &src, cutoff).await)
            });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    counters.processing_error += 1;
                    errors.push(format!("{}: entry task aborted: {e}", src.name));
                }
            }
        }
        outcomes.sort_by_key(|(idx, _)| *idx);

        let mut items = Vec::new();
        for (_, outcome) in outcomes {
            match outcome {
                EntryOutcome::Accepted(item) => {
                    counters.accepted += 1;
                    items.push(*item);
                }
                EntryOutcome::TooOld => counters.too_old += 1,
                EntryOutcome::NotRelevant => counters.not_relevant += 1,
                EntryOutcome::Skipped => {}
            }
        }

        info!(source = %src.name, accepted = counters.accepted, "source processed");
        (items, counters, errors)
    }

    async fn process_entry(
        &self,
        entry: feed::FeedEntry,
        src: &FeedSource,
        cutoff: DateTime<Utc>,
    ) -> EntryOutcome {
        if entry.title.trim().is_empty() || entry.link.trim().is_empty() {
            return EntryOutcome::Skipped;
        }

        let published_at = entry.published_at.unwrap_or_else(Utc::now);
        if published_at < cutoff {
            return EntryOutcome::TooOld;
        }

        // Best-effort full text; empty on failure, never fatal.
        let delay = Duration::from_secs_f64(src.rate_limit_delay.max(0.0));
        let full_text = match self
            .fetch
            .get_with_delay(&entry.link, &src.custom_headers, delay)
            .await
            .body()
        {
            Some(body) => extract::extract_article_text(&String::from_utf8_lossy(&body)),
            None => String::new(),
        };

        let mut title = entry.title.clone();
        let mut summary = entry.summary.clone();
        let mut combined = format!("{} {} {}", title, summary, full_text)
            .trim()
            .to_string();

        if src.language != self.config.target_language && !combined.is_empty() {
            if let Some(translator) = &self.translator {
                combined = self
                    .translate_or_keep(translator, &combined, &src.language, &entry.link)
                    .await;
                title = self
                    .translate_or_keep(translator, &title, &src.language, &entry.link)
                    .await;
                if !summary.is_empty() {
                    summary = self
                        .translate_or_keep(translator, &summary, &src.language, &entry.link)
                        .await;
                }
            }
        }

        let decision = self.gate.evaluate(&combined).await;
        if !decision.accepted {
            return EntryOutcome::NotRelevant;
        }

        let preview_source = if summary.trim().is_empty() {
            combined.as_str()
        } else {
            summary.as_str()
        };

        EntryOutcome::Accepted(Box::new(NewsItem {
            title: clean_text(&title),
            source: src.name.clone(),
            date: published_at.format("%Y-%m-%d %H:%M").to_string(),
            url: entry.link,
            preview: make_preview(&clean_text(preview_source)),
            full_text: clean_text(&full_text),
            language: src.language.clone(),
            relevance_reason: decision.reason,
        }))
    }

    async fn translate_or_keep(
        &self,
        translator: &SharedTranslator,
        text: &str,
        source_lang: &str,
        url: &str,
    ) -> String {
        match translator
            .translate(text, source_lang, &self.config.target_language)
            .await
        {
            Ok(t) => t,
            Err(e) => {
                warn!(error = ?e, url, "translation failed, keeping original");
                text.to_string()
            }
        }
    }
}

/// Truncate a cleaned text to the preview budget.
fn make_preview(text: &str) -> String {
    let mut preview: String = text.chars().take(PREVIEW_CHARS).collect();
    if text.chars().count() > PREVIEW_CHARS {
        preview.pop();
        preview.push('…');
    }
    preview
}

/// Keep the first occurrence of each URL.
pub fn dedup_by_url(items: Vec<NewsItem>) -> Vec<NewsItem> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut unique = Vec::with_capacity(items.len());
    for item in items {
        if item.url.is_empty() || seen.insert(item.url.clone()) {
            unique.push(item);
        }
    }
    unique
}

/// Write the candidate item set consumed by the moderation side.
pub fn save_items(path: &Path, items: &[NewsItem]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(items).context("serializing candidate items")?;
    fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

/// Read candidate items, skipping entries missing required keys.
/// Returns the valid items and the count of malformed entries.
pub fn load_items(path: &Path) -> Result<(Vec<NewsItem>, usize)> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading candidate items from {}", path.display()))?;
    let raw: Vec<serde_json::Value> =
        serde_json::from_str(&content).context("parsing candidate items json")?;

    let mut items = Vec::with_capacity(raw.len());
    let mut malformed = 0usize;
    for value in raw {
        match serde_json::from_value::<NewsItem>(value) {
            Ok(item) => items.push(item),
            Err(e) => {
                warn!(error = %e, "skipping malformed candidate item");
                malformed += 1;
            }
        }
    }
    Ok((items, malformed))
}
