// src/config.rs
//! Runtime configuration: optional JSON config file overlaid with env vars.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::delivery::DeliveryConfig;
use crate::fetch::FetchConfig;
use crate::ingest::IngestConfig;
use crate::workflow::WorkflowConfig;

const ENV_CONFIG_FILE: &str = "CONFIG_FILE";
const DEFAULT_CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransportSettings {
    pub moderation_channel: String,
    pub publish_channel: String,
    pub max_message_length: usize,
    pub retry_attempts: u32,
    pub flood_control_delay_ms: u64,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            moderation_channel: String::new(),
            publish_channel: String::new(),
            max_message_length: 4_000,
            retry_attempts: 5,
            flood_control_delay_ms: 1_500,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ParserSettings {
    pub max_workers: usize,
    pub article_concurrency: usize,
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub retry_attempts: u32,
    pub days_back: i64,
    pub target_language: String,
    pub output_file: PathBuf,
}

impl Default for ParserSettings {
    fn default() -> Self {
        Self {
            max_workers: 10,
            article_concurrency: 5,
            request_timeout_secs: 30,
            connect_timeout_secs: 10,
            retry_attempts: 3,
            days_back: 21,
            target_language: "en".to_string(),
            output_file: PathBuf::from("data/candidates.json"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub db_file: PathBuf,
    pub sent_ids_file: PathBuf,
    pub backup_interval_secs: u64,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            db_file: PathBuf::from("data/news_db.json"),
            sent_ids_file: PathBuf::from("data/sent_ids.json"),
            backup_interval_secs: 3_600,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub transport: TransportSettings,
    pub parser: ParserSettings,
    pub database: DatabaseSettings,
}

impl Config {
    /// Load from $CONFIG_FILE (default `config.json`) when present, then
    /// apply env-var overrides.
    pub fn load() -> Result<Self> {
        let path = std::env::var(ENV_CONFIG_FILE).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.into());
        let mut config = if Path::new(&path).exists() {
            Self::load_from(Path::new(&path))?
        } else {
            Self::default()
        };
        config.apply_env();
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("parsing {}", path.display()))
    }

    fn apply_env(&mut self) {
        override_string("MODERATION_CHANNEL", &mut self.transport.moderation_channel);
        override_string("PUBLISH_CHANNEL", &mut self.transport.publish_channel);
        override_parse("MAX_MESSAGE_LENGTH", &mut self.transport.max_message_length);
        override_parse("DELIVERY_RETRY_ATTEMPTS", &mut self.transport.retry_attempts);
        override_parse(
            "FLOOD_CONTROL_DELAY_MS",
            &mut self.transport.flood_control_delay_ms,
        );

        override_parse("PARSER_MAX_WORKERS", &mut self.parser.max_workers);
        override_parse("REQUEST_TIMEOUT", &mut self.parser.request_timeout_secs);
        override_parse("FETCH_RETRY_ATTEMPTS", &mut self.parser.retry_attempts);
        override_parse("DAYS_BACK", &mut self.parser.days_back);
        override_string("TARGET_LANGUAGE", &mut self.parser.target_language);
        override_path("CANDIDATES_FILE", &mut self.parser.output_file);

        override_path("DB_FILE", &mut self.database.db_file);
        override_path("SENT_IDS_FILE", &mut self.database.sent_ids_file);
        override_parse("BACKUP_INTERVAL", &mut self.database.backup_interval_secs);
    }

    pub fn fetch_config(&self) -> FetchConfig {
        FetchConfig {
            timeout: Duration::from_secs(self.parser.request_timeout_secs),
            connect_timeout: Duration::from_secs(self.parser.connect_timeout_secs),
            max_attempts: self.parser.retry_attempts,
            ..FetchConfig::default()
        }
    }

    pub fn ingest_config(&self) -> IngestConfig {
        IngestConfig {
            max_workers: self.parser.max_workers,
            article_concurrency: self.parser.article_concurrency,
            days_back: self.parser.days_back,
            target_language: self.parser.target_language.clone(),
        }
    }

    pub fn delivery_config(&self) -> DeliveryConfig {
        DeliveryConfig {
            retry_attempts: self.transport.retry_attempts,
            max_message_length: self.transport.max_message_length,
            flood_delay: Duration::from_millis(self.transport.flood_control_delay_ms),
            ..DeliveryConfig::default()
        }
    }

    pub fn workflow_config(&self) -> WorkflowConfig {
        WorkflowConfig {
            moderation_channel: self.transport.moderation_channel.clone(),
            publish_channel: self.transport.publish_channel.clone(),
        }
    }

    pub fn backup_interval(&self) -> Duration {
        Duration::from_secs(self.database.backup_interval_secs)
    }
}

fn override_string(var: &str, target: &mut String) {
    if let Ok(v) = std::env::var(var) {
        if !v.trim().is_empty() {
            *target = v;
        }
    }
}

fn override_path(var: &str, target: &mut PathBuf) {
    if let Ok(v) = std::env::var(var) {
        if !v.trim().is_empty() {
            *target = PathBuf::from(v);
        }
    }
}

fn override_parse<T: std::str::FromStr>(var: &str, target: &mut T) {
    if let Ok(v) = std::env::var(var) {
        if let Ok(parsed) = v.trim().parse::<T>() {
            *target = parsed;
        }
    }
}
