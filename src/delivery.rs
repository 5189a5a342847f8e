// src/delivery.rs
//! Reliable outbound messaging: circuit breaker, retry with backoff,
//! rate-limit compliance, duplicate suppression, and message splitting.
//!
//! The concrete chat transport stays behind [`MessageTransport`]; everything
//! in this module works against that contract.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::fingerprint::sha256_hex;

/// Ceiling for exponential backoff between network-error retries.
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Prune the duplicate-suppression cache past this size.
const SUPPRESS_CACHE_LIMIT: usize = 1_000;

/// Entries older than this are dropped when pruning.
const SUPPRESS_CACHE_MAX_AGE: Duration = Duration::from_secs(3_600);

/// Inline action button attached to a moderation message. The token is the
/// opaque `"<verb>|<fingerprint>"` operator-action protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionButton {
    pub label: String,
    pub token: String,
}

/// Transport-level failure classes. Callers branch on the variant.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("rate limited, retry after {wait:?}")]
    RateLimited { wait: Duration },
    #[error("network error: {0}")]
    Network(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("message not found")]
    NotFound,
}

/// Generic message transport contract (the concrete chat API lives outside
/// this crate).
#[async_trait::async_trait]
pub trait MessageTransport: Send + Sync {
    async fn send(
        &self,
        destination: &str,
        text: &str,
        buttons: Option<&[ActionButton]>,
    ) -> Result<i64, TransportError>;

    async fn edit(
        &self,
        destination: &str,
        message_id: i64,
        text: &str,
        buttons: Option<&[ActionButton]>,
    ) -> Result<(), TransportError>;

    async fn delete(&self, destination: &str, message_id: i64) -> Result<(), TransportError>;
}

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("circuit breaker is open")]
    CircuitOpen,
    #[error("send failed after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },
    #[error("rejected by transport: {0}")]
    Rejected(String),
}

// ---------------------------------------------------------------------------
// Circuit breaker
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy)]
pub struct BreakerStats {
    pub state: BreakerState,
    pub failure_count: u32,
    pub success_count: u64,
    pub total_requests: u64,
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    failure_count: u32,
    success_count: u64,
    total_requests: u64,
    last_failure: Option<Instant>,
}

/// Stops calling a failing transport for a cool-down period.
/// closed -> open after `failure_threshold` consecutive failures;
/// open -> half_open once `recovery_timeout` elapses;
/// half_open -> closed on the first success, back to open on failure.
pub struct CircuitBreaker {
    failure_threshold: u32,
    recovery_timeout: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            failure_threshold,
            recovery_timeout,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                failure_count: 0,
                success_count: 0,
                total_requests: 0,
                last_failure: None,
            }),
        }
    }

    /// Whether a call may proceed. Transitions open -> half_open when the
    /// recovery timeout has elapsed.
    pub fn try_acquire(&self) -> bool {
        let mut inner = self.inner.lock().expect("breaker mutex poisoned");
        inner.total_requests += 1;
        match inner.state {
            BreakerState::Open => {
                let recovered = inner
                    .last_failure
                    .map(|t| t.elapsed() >= self.recovery_timeout)
                    .unwrap_or(true);
                if recovered {
                    inner.state = BreakerState::HalfOpen;
                    info!("circuit breaker half-open, probing");
                    true
                } else {
                    false
                }
            }
            BreakerState::Closed | BreakerState::HalfOpen => true,
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().expect("breaker mutex poisoned");
        inner.success_count += 1;
        if inner.state == BreakerState::HalfOpen {
            inner.state = BreakerState::Closed;
            inner.failure_count = 0;
            info!("circuit breaker closed after successful probe");
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().expect("breaker mutex poisoned");
        inner.failure_count += 1;
        inner.last_failure = Some(Instant::now());
        match inner.state {
            BreakerState::Closed if inner.failure_count >= self.failure_threshold => {
                inner.state = BreakerState::Open;
                warn!(
                    failures = inner.failure_count,
                    "circuit breaker opened"
                );
            }
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                warn!("circuit breaker re-opened from half-open");
            }
            _ => {}
        }
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().expect("breaker mutex poisoned").state
    }

    pub fn stats(&self) -> BreakerStats {
        let inner = self.inner.lock().expect("breaker mutex poisoned");
        BreakerStats {
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            total_requests: inner.total_requests,
        }
    }
}

// ---------------------------------------------------------------------------
// Delivery service
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    pub retry_attempts: u32,
    pub max_message_length: usize,
    /// Pause after each successful send (transport flood control).
    pub flood_delay: Duration,
    /// Window within which an identical destination+text send is suppressed.
    pub dedup_window: Duration,
    /// Pause between deletions in a batch.
    pub delete_pause: Duration,
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            retry_attempts: 5,
            max_message_length: 4_000,
            flood_delay: Duration::from_millis(1_500),
            dedup_window: Duration::from_secs(60),
            delete_pause: Duration::from_millis(100),
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct HealthReport {
    pub breaker: BreakerStats,
    pub suppress_cache_size: usize,
}

pub struct DeliveryService {
    transport: Arc<dyn MessageTransport>,
    breaker: CircuitBreaker,
    config: DeliveryConfig,
    recent_sends: Mutex<HashMap<String, Instant>>,
}

impl DeliveryService {
    pub fn new(transport: Arc<dyn MessageTransport>, config: DeliveryConfig) -> Self {
        let breaker = CircuitBreaker::new(config.failure_threshold, config.recovery_timeout);
        Self {
            transport,
            breaker,
            config,
            recent_sends: Mutex::new(HashMap::new()),
        }
    }

    /// Send one message with retries. Returns the message id, or `None` when
    /// the send was suppressed as a duplicate of a just-sent message.
    ///
    /// Network errors retry with exponential backoff up to the attempt
    /// budget; a rate-limit signal sleeps exactly the mandated wait without
    /// consuming the budget; bad requests fail immediately. While the breaker
    /// is open, fails fast without touching the transport.
    pub async fn send_with_retry(
        &self,
        destination: &str,
        text: &str,
        buttons: Option<&[ActionButton]>,
    ) -> Result<Option<i64>, DeliveryError> {
        let key = suppress_key(destination, text);
        if self.recently_sent(&key) {
            warn!(destination, "duplicate message suppressed");
            return Ok(None);
        }

        let mut attempt: u32 = 0;
        let mut last_error = String::new();

        loop {
            if !self.breaker.try_acquire() {
                return Err(DeliveryError::CircuitOpen);
            }

            match self.transport.send(destination, text, buttons).await {
                Ok(message_id) => {
                    self.breaker.record_success();
                    self.remember_send(key);
                    tokio::time::sleep(self.config.flood_delay).await;
                    return Ok(Some(message_id));
                }
                Err(TransportError::RateLimited { wait }) => {
                    // Mandated wait; does not consume the retry budget.
                    warn!(destination, wait_secs = wait.as_secs(), "rate limited");
                    tokio::time::sleep(wait).await;
                }
                Err(TransportError::BadRequest(msg)) => {
                    self.breaker.record_failure();
                    return Err(DeliveryError::Rejected(msg));
                }
                Err(TransportError::NotFound) => {
                    self.breaker.record_failure();
                    return Err(DeliveryError::Rejected("destination not found".to_string()));
                }
                Err(TransportError::Network(msg)) => {
                    self.breaker.record_failure();
                    attempt += 1;
                    last_error = msg;
                    if attempt >= self.config.retry_attempts {
                        return Err(DeliveryError::Exhausted {
                            attempts: attempt,
                            last: last_error,
                        });
                    }
                    let backoff = Duration::from_secs(1u64 << attempt.min(6)).min(MAX_BACKOFF);
                    warn!(
                        destination,
                        attempt,
                        backoff_secs = backoff.as_secs(),
                        "send failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    /// Split `text` on sentence boundaries and send the chunks sequentially.
    /// Returns the ordered ids of the messages actually sent.
    pub async fn split_and_send(
        &self,
        destination: &str,
        text: &str,
        max_length: Option<usize>,
    ) -> Result<Vec<i64>, DeliveryError> {
        let max_length = max_length.unwrap_or(self.config.max_message_length);
        let mut message_ids = Vec::new();
        for chunk in split_message(text, max_length) {
            if let Some(id) = self.send_with_retry(destination, &chunk, None).await? {
                message_ids.push(id);
            }
        }
        Ok(message_ids)
    }

    /// Best-effort batch deletion. "Already gone" counts as done; other
    /// failures are logged and skipped. Returns how many were deleted.
    pub async fn safe_delete_many(&self, destination: &str, message_ids: &[i64]) -> usize {
        if message_ids.is_empty() {
            debug!(destination, "no messages to delete");
            return 0;
        }

        let mut deleted = 0usize;
        for &message_id in message_ids {
            match self.transport.delete(destination, message_id).await {
                Ok(()) => {
                    deleted += 1;
                    debug!(destination, message_id, "message deleted");
                }
                Err(TransportError::NotFound) => {
                    debug!(destination, message_id, "message already gone");
                }
                Err(e) => {
                    warn!(destination, message_id, error = %e, "delete failed");
                }
            }
            tokio::time::sleep(self.config.delete_pause).await;
        }

        info!(
            destination,
            deleted,
            requested = message_ids.len(),
            "batch delete finished"
        );
        deleted
    }

    /// Single-attempt message edit behind the breaker.
    pub async fn edit_message(
        &self,
        destination: &str,
        message_id: i64,
        text: &str,
        buttons: Option<&[ActionButton]>,
    ) -> Result<(), DeliveryError> {
        if !self.breaker.try_acquire() {
            return Err(DeliveryError::CircuitOpen);
        }
        match self.transport.edit(destination, message_id, text, buttons).await {
            Ok(()) => {
                self.breaker.record_success();
                Ok(())
            }
            Err(e) => {
                self.breaker.record_failure();
                Err(DeliveryError::Rejected(e.to_string()))
            }
        }
    }

    pub fn circuit_stats(&self) -> BreakerStats {
        self.breaker.stats()
    }

    pub fn health_check(&self) -> HealthReport {
        HealthReport {
            breaker: self.breaker.stats(),
            suppress_cache_size: self
                .recent_sends
                .lock()
                .expect("suppress cache poisoned")
                .len(),
        }
    }

    fn recently_sent(&self, key: &str) -> bool {
        let cache = self.recent_sends.lock().expect("suppress cache poisoned");
        cache
            .get(key)
            .map(|t| t.elapsed() < self.config.dedup_window)
            .unwrap_or(false)
    }

    fn remember_send(&self, key: String) {
        let mut cache = self.recent_sends.lock().expect("suppress cache poisoned");
        cache.insert(key, Instant::now());
        if cache.len() > SUPPRESS_CACHE_LIMIT {
            cache.retain(|_, t| t.elapsed() < SUPPRESS_CACHE_MAX_AGE);
        }
    }
}

fn suppress_key(destination: &str, text: &str) -> String {
    sha256_hex(&format!("{destination}:{text}"), 32)
}

/// Split on `". "` boundaries so each chunk stays within `max_length`
/// characters; single oversized sentences fall back to hard slicing.
pub fn split_message(text: &str, max_length: usize) -> Vec<String> {
    if text.chars().count() <= max_length {
        return vec![text.to_string()];
    }

    let sentences: Vec<&str> = text.split(". ").collect();
    let last = sentences.len() - 1;
    let mut chunks = Vec::new();
    let mut current = String::new();

    for (i, sentence) in sentences.iter().enumerate() {
        let sep = if i < last { ". " } else { "" };
        if current.chars().count() + sentence.chars().count() + sep.len() <= max_length {
            current.push_str(sentence);
            current.push_str(sep);
            continue;
        }

        if !current.is_empty() {
            chunks.push(current.trim_end().to_string());
            current.clear();
        }

        if sentence.chars().count() + sep.len() > max_length {
            let mut rest = (*sentence).to_string();
            while rest.chars().count() + sep.len() > max_length {
                let head: String = rest.chars().take(max_length).collect();
                rest = rest.chars().skip(max_length).collect();
                chunks.push(head);
            }
            if !rest.is_empty() {
                current = format!("{rest}{sep}");
            }
        } else {
            current = format!("{sentence}{sep}");
        }
    }

    let tail = current.trim_end();
    if !tail.is_empty() {
        chunks.push(tail.to_string());
    }
    chunks
}
