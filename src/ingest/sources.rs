// src/ingest/sources.rs
//! Feed source configuration. Loaded once at startup, read-only during a
//! pipeline run; individual sources may be toggled between runs.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use tracing::info;

const ENV_PATH: &str = "FEED_SOURCES_PATH";

#[derive(Debug, Clone, Deserialize)]
pub struct FeedSource {
    pub url: String,
    pub name: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub custom_headers: HashMap<String, String>,
    /// Minimum seconds between requests to this source's domain.
    #[serde(default = "default_rate_limit")]
    pub rate_limit_delay: f64,
    #[serde(default = "default_max_articles")]
    pub max_articles: usize,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_language() -> String {
    "en".to_string()
}

fn default_rate_limit() -> f64 {
    1.0
}

fn default_max_articles() -> usize {
    100
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceStatus {
    pub name: String,
    pub url: String,
    pub language: String,
    pub enabled: bool,
    pub rate_limit: f64,
    pub max_articles: usize,
}

/// The configured feed set, with toggling between runs.
#[derive(Debug, Clone, Default)]
pub struct SourceSet {
    feeds: Vec<FeedSource>,
}

impl SourceSet {
    pub fn new(feeds: Vec<FeedSource>) -> Self {
        Self { feeds }
    }

    pub fn add(&mut self, feed: FeedSource) {
        info!(name = %feed.name, url = %feed.url, "added feed");
        self.feeds.push(feed);
    }

    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.feeds.len();
        self.feeds.retain(|f| f.name != name);
        let removed = self.feeds.len() < before;
        if removed {
            info!(name, "removed feed");
        }
        removed
    }

    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> bool {
        for feed in &mut self.feeds {
            if feed.name == name {
                feed.enabled = enabled;
                info!(name, enabled, "toggled feed");
                return true;
            }
        }
        false
    }

    /// Sources participating in the next pass.
    pub fn enabled(&self) -> Vec<FeedSource> {
        self.feeds.iter().filter(|f| f.enabled).cloned().collect()
    }

    pub fn status(&self) -> Vec<SourceStatus> {
        self.feeds
            .iter()
            .map(|f| SourceStatus {
                name: f.name.clone(),
                url: f.url.clone(),
                language: f.language.clone(),
                enabled: f.enabled,
                rate_limit: f.rate_limit_delay,
                max_articles: f.max_articles,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.feeds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.feeds.is_empty()
    }
}

/// Load sources from an explicit path. Supports TOML or JSON.
pub fn load_sources_from(path: &Path) -> Result<SourceSet> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading feed sources from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    let feeds = parse_sources(&content, ext.as_str())?;
    Ok(SourceSet::new(feeds))
}

/// Load sources using env var + fallbacks:
/// 1) $FEED_SOURCES_PATH
/// 2) config/feeds.toml
/// 3) config/feeds.json
pub fn load_sources_default() -> Result<SourceSet> {
    if let Ok(p) = std::env::var(ENV_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_sources_from(&pb);
        }
        return Err(anyhow!("FEED_SOURCES_PATH points to non-existent path"));
    }
    let toml_p = PathBuf::from("config/feeds.toml");
    if toml_p.exists() {
        return load_sources_from(&toml_p);
    }
    let json_p = PathBuf::from("config/feeds.json");
    if json_p.exists() {
        return load_sources_from(&json_p);
    }
    Ok(SourceSet::default())
}

fn parse_sources(s: &str, hint_ext: &str) -> Result<Vec<FeedSource>> {
    #[derive(Deserialize)]
    struct Root {
        feeds: Vec<FeedSource>,
    }

    if hint_ext == "toml" || s.contains("[[feeds]]") {
        let root: Root = toml::from_str(s).context("parsing feed sources toml")?;
        return Ok(root.feeds);
    }
    let feeds: Vec<FeedSource> = serde_json::from_str(s).context("parsing feed sources json")?;
    Ok(feeds)
}
