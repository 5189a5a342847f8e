// tests/ingest_engine.rs
//! End-to-end ingestion pass against a local HTTP fixture server.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use energy_news_pipeline::fetch::{FetchClient, FetchConfig};
use energy_news_pipeline::ingest::{sources::FeedSource, IngestConfig, IngestionEngine};
use energy_news_pipeline::relevance::RelevanceGate;

/// Minimal one-request-per-connection HTTP server for fixtures.
async fn spawn_server(routes: HashMap<String, String>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let routes = Arc::new(routes);

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let routes = routes.clone();
            tokio::spawn(async move {
                let mut request = Vec::new();
                let mut buf = [0u8; 4096];
                loop {
                    match socket.read(&mut buf).await {
                        Ok(0) => break,
                        Ok(n) => {
                            request.extend_from_slice(&buf[..n]);
                            if request.windows(4).any(|w| w == b"\r\n\r\n") {
                                break;
                            }
                        }
                        Err(_) => return,
                    }
                }
                let head = String::from_utf8_lossy(&request);
                let path = head.split_whitespace().nth(1).unwrap_or("/").to_string();
                let (status, body) = match routes.get(&path) {
                    Some(body) => ("200 OK", body.clone()),
                    None => ("404 Not Found", String::new()),
                };
                let response = format!(
                    "HTTP/1.1 {status}\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    format!("http://{addr}")
}

fn article_html(text: &str) -> String {
    format!(
        "<html><body><p>{text} This paragraph is long enough to survive extraction filters.</p></body></html>"
    )
}

fn rss(base: &str) -> String {
    let fresh = (Utc::now() - chrono::Duration::days(1)).to_rfc2822();
    let stale = (Utc::now() - chrono::Duration::days(100)).to_rfc2822();
    format!(
        r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>Fixture Wire</title>
<item><title>Solar farm adds battery storage</title><link>{base}/a1</link><pubDate>{fresh}</pubDate><description>Solar plus battery project goes live.</description></item>
<item><title>Local bakery wins award</title><link>{base}/a2</link><pubDate>{fresh}</pubDate><description>Croissants praised by judges.</description></item>
<item><title>Old hydrogen pilot with battery backup</title><link>{base}/a3</link><pubDate>{stale}</pubDate><description>Hydrogen and battery from months ago.</description></item>
<item><title>Missing link entry</title><pubDate>{fresh}</pubDate><description>Solar battery text without a link.</description></item>
</channel></rss>"#
    )
}

fn engine() -> IngestionEngine {
    let fetch = FetchClient::new(FetchConfig {
        timeout: Duration::from_secs(5),
        connect_timeout: Duration::from_secs(2),
        max_attempts: 1,
        default_domain_delay: Duration::ZERO,
    })
    .expect("fetch client");
    IngestionEngine::new(
        Arc::new(fetch),
        Arc::new(RelevanceGate::new(None)),
        None,
        IngestConfig {
            max_workers: 4,
            article_concurrency: 2,
            days_back: 21,
            target_language: "en".to_string(),
        },
    )
}

fn source(name: &str, url: String) -> FeedSource {
    FeedSource {
        url,
        name: name.to_string(),
        language: "en".to_string(),
        custom_headers: HashMap::new(),
        rate_limit_delay: 0.0,
        max_articles: 100,
        enabled: true,
    }
}

#[tokio::test]
async fn pass_filters_counts_and_extracts() {
    let mut routes = HashMap::new();
    routes.insert("/a1".to_string(), article_html("Solar output keeps climbing."));
    routes.insert("/a2".to_string(), article_html("The bakery is beloved."));
    let article_base = spawn_server(routes.clone()).await;
    routes.insert("/feed".to_string(), rss(&article_base));
    let feed_base = spawn_server(routes).await;

    let report = engine()
        .run(&[source("Fixture Wire", format!("{feed_base}/feed"))])
        .await;

    assert_eq!(report.items.len(), 1);
    let item = &report.items[0];
    assert_eq!(item.title, "Solar farm adds battery storage");
    assert_eq!(item.source, "Fixture Wire");
    assert!(item.full_text.contains("Solar output keeps climbing"));
    assert!(item.relevance_reason.contains("keywords matched"));
    assert!(!item.preview.is_empty());

    let counters = report.stats.per_source.get("Fixture Wire").expect("stats");
    assert_eq!(counters.accepted, 1);
    assert_eq!(counters.too_old, 1);
    assert_eq!(counters.not_relevant, 1);
    assert_eq!(counters.fetch_failed, 0);
}

#[tokio::test]
async fn failing_source_does_not_abort_the_pass() {
    let mut routes = HashMap::new();
    routes.insert("/a1".to_string(), article_html("Solar output keeps climbing."));
    let article_base = spawn_server(routes.clone()).await;
    routes.insert("/feed".to_string(), rss(&article_base));
    let feed_base = spawn_server(routes).await;

    // Reserve a port and drop the listener so connections are refused.
    let dead = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);
        format!("http://{addr}/feed")
    };

    let report = engine()
        .run(&[
            source("Dead Wire", dead),
            source("Fixture Wire", format!("{feed_base}/feed")),
        ])
        .await;

    assert_eq!(report.items.len(), 1);
    let dead_counters = report.stats.per_source.get("Dead Wire").expect("stats");
    assert_eq!(dead_counters.fetch_failed, 1);
    assert_eq!(dead_counters.accepted, 0);
    let live_counters = report.stats.per_source.get("Fixture Wire").expect("stats");
    assert_eq!(live_counters.accepted, 1);
}

#[tokio::test]
async fn disabled_sources_are_skipped() {
    let mut disabled = source("Off Wire", "http://127.0.0.1:1/feed".to_string());
    disabled.enabled = false;

    let report = engine().run(&[disabled]).await;
    assert!(report.items.is_empty());
    assert!(report.stats.per_source.is_empty());
}
