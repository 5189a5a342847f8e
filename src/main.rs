//! Harvester entrypoint: run one ingestion pass over the configured feed
//! sources and write the candidate-item file the moderation side consumes.

use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use energy_news_pipeline::config::Config;
use energy_news_pipeline::fetch::FetchClient;
use energy_news_pipeline::ingest::{self, sources, IngestionEngine};
use energy_news_pipeline::relevance::RelevanceGate;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let config = Config::load()?;
    let source_set = sources::load_sources_default()?;
    if source_set.is_empty() {
        warn!("no feed sources configured, nothing to do");
        return Ok(());
    }

    let fetch = Arc::new(FetchClient::new(config.fetch_config())?);
    // The external classifier is optional; without it the gate runs
    // keyword-only.
    let gate = Arc::new(RelevanceGate::new(None));
    let engine = IngestionEngine::new(fetch, gate, None, config.ingest_config());

    let report = engine.run(&source_set.enabled()).await;

    for (source, counters) in &report.stats.per_source {
        info!(
            source = %source,
            accepted = counters.accepted,
            too_old = counters.too_old,
            not_relevant = counters.not_relevant,
            fetch_failed = counters.fetch_failed,
            processing_error = counters.processing_error,
            "source summary"
        );
    }
    for error in &report.errors {
        warn!(error = %error, "source error");
    }

    ingest::save_items(&config.parser.output_file, &report.items)?;
    info!(
        items = report.items.len(),
        output = %config.parser.output_file.display(),
        elapsed_ms = report.elapsed.as_millis() as u64,
        "candidate items written"
    );

    Ok(())
}
