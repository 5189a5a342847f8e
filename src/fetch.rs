// src/fetch.rs
//! Pooled HTTP client with per-domain rate limiting and bounded retries.
//!
//! Expected failure classes (timeouts, resets, 5xx, exhausted retries) are
//! returned as [`FetchOutcome::Unavailable`], never as errors; callers branch
//! on the outcome. 429 responses honor the server's `Retry-After` without
//! consuming the retry budget.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{debug, warn};

const USER_AGENT: &str = "Mozilla/5.0 (compatible; EnergyNewsBot/1.0)";

/// Ceiling for exponential backoff between retries.
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Wait applied to a 429 response that carries no `Retry-After` header.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub max_attempts: u32,
    /// Minimum spacing between requests to the same domain.
    pub default_domain_delay: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            max_attempts: 3,
            default_domain_delay: Duration::from_secs(1),
        }
    }
}

/// Result of a fetch. `Unavailable` covers every expected failure class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Body(Vec<u8>),
    Unavailable { reason: String },
}

impl FetchOutcome {
    pub fn body(self) -> Option<Vec<u8>> {
        match self {
            FetchOutcome::Body(b) => Some(b),
            FetchOutcome::Unavailable { .. } => None,
        }
    }
}

pub struct FetchClient {
    client: reqwest::Client,
    config: FetchConfig,
    // Last request instant per domain. Locked only around map access so
    // unrelated domains never serialize on each other's sleeps.
    last_request: Mutex<HashMap<String, Instant>>,
}

impl FetchClient {
    pub fn new(config: FetchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(Duration::from_secs(60))
            .build()
            .context("building http client")?;

        Ok(Self {
            client,
            config,
            last_request: Mutex::new(HashMap::new()),
        })
    }

    /// GET `url` with the configured retry budget and per-domain spacing.
    pub async fn get(&self, url: &str, headers: &HashMap<String, String>) -> FetchOutcome {
        self.get_with_delay(url, headers, self.config.default_domain_delay)
            .await
    }

    /// GET with a source-specific per-domain delay override.
    pub async fn get_with_delay(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
        domain_delay: Duration,
    ) -> FetchOutcome {
        self.rate_limit(host_of(url), domain_delay).await;

        let mut attempt: u32 = 0;
        let mut last_error = String::new();

        while attempt < self.config.max_attempts {
            let mut request = self.client.get(url);
            for (k, v) in headers {
                request = request.header(k, v);
            }

            match request.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        match resp.bytes().await {
                            Ok(body) => return FetchOutcome::Body(body.to_vec()),
                            Err(e) => {
                                last_error = format!("body read failed: {e}");
                            }
                        }
                    } else if status.as_u16() == 429 {
                        let wait = resp
                            .headers()
                            .get("retry-after")
                            .and_then(|v| v.to_str().ok())
                            .and_then(|s| s.trim().parse::<u64>().ok())
                            .map(Duration::from_secs)
                            .unwrap_or(DEFAULT_RETRY_AFTER);
                        warn!(url, wait_secs = wait.as_secs(), "rate limited, honoring retry-after");
                        tokio::time::sleep(wait).await;
                        // Mandated wait; does not consume the retry budget.
                        continue;
                    } else if status.is_server_error() {
                        last_error = format!("HTTP {status}");
                    } else {
                        // Definitive client-side response; retrying won't help.
                        return FetchOutcome::Unavailable {
                            reason: format!("HTTP {status}"),
                        };
                    }
                }
                Err(e) => {
                    last_error = if e.is_timeout() {
                        format!("timeout: {e}")
                    } else if e.is_connect() {
                        format!("connect error: {e}")
                    } else {
                        format!("request error: {e}")
                    };
                }
            }

            attempt += 1;
            if attempt < self.config.max_attempts {
                let backoff = Duration::from_secs(1u64 << attempt.min(6)).min(MAX_BACKOFF);
                debug!(url, attempt, backoff_secs = backoff.as_secs(), "retrying fetch");
                tokio::time::sleep(backoff).await;
            }
        }

        FetchOutcome::Unavailable { reason: last_error }
    }

    async fn rate_limit(&self, domain: &str, delay: Duration) {
        if delay.is_zero() {
            return;
        }
        let wait = {
            let guard = self.last_request.lock().expect("rate limiter poisoned");
            guard.get(domain).and_then(|last| {
                let elapsed = last.elapsed();
                (elapsed < delay).then(|| delay - elapsed)
            })
        };
        if let Some(wait) = wait {
            debug!(domain, wait_ms = wait.as_millis() as u64, "rate limiting");
            tokio::time::sleep(wait).await;
        }
        self.last_request
            .lock()
            .expect("rate limiter poisoned")
            .insert(domain.to_string(), Instant::now());
    }
}

fn host_of(url: &str) -> &str {
    let rest = url.split("://").nth(1).unwrap_or(url);
    rest.split('/').next().unwrap_or(rest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_extraction() {
        assert_eq!(host_of("https://example.com/feed/rss"), "example.com");
        assert_eq!(host_of("example.com/feed"), "example.com");
        assert_eq!(host_of("https://example.com"), "example.com");
    }

    #[test]
    fn unavailable_has_no_body() {
        let out = FetchOutcome::Unavailable {
            reason: "HTTP 500".into(),
        };
        assert!(out.body().is_none());
    }
}
