// tests/common/mod.rs
//! Shared test doubles: a scripted in-memory message transport plus small
//! fixture builders.
#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use energy_news_pipeline::delivery::{
    ActionButton, DeliveryConfig, MessageTransport, TransportError,
};
use energy_news_pipeline::ingest::NewsItem;
use energy_news_pipeline::store::RecordPayload;

#[derive(Debug, Clone)]
pub struct SentMessage {
    pub destination: String,
    pub text: String,
    pub buttons: Vec<ActionButton>,
    pub message_id: i64,
}

/// In-memory transport. Outcomes for `send` can be scripted; with an empty
/// script every send succeeds with an incrementing message id.
#[derive(Default)]
pub struct MockTransport {
    pub sent: Mutex<Vec<SentMessage>>,
    pub edited: Mutex<Vec<(String, i64, String)>>,
    pub deleted: Mutex<Vec<(String, i64)>>,
    pub send_script: Mutex<VecDeque<Result<i64, TransportError>>>,
    /// Message ids whose deletion reports "not found".
    pub missing: Mutex<HashSet<i64>>,
    pub fail_edit: AtomicBool,
    pub send_calls: AtomicU32,
    next_id: AtomicI64,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1),
            ..Default::default()
        }
    }

    pub fn script_sends(&self, outcomes: Vec<Result<i64, TransportError>>) {
        self.send_script.lock().unwrap().extend(outcomes);
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|m| m.text.clone()).collect()
    }

    pub fn sent_to(&self, destination: &str) -> Vec<SentMessage> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.destination == destination)
            .cloned()
            .collect()
    }
}

#[async_trait::async_trait]
impl MessageTransport for MockTransport {
    async fn send(
        &self,
        destination: &str,
        text: &str,
        buttons: Option<&[ActionButton]>,
    ) -> Result<i64, TransportError> {
        self.send_calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.send_script.lock().unwrap().pop_front();
        let message_id = match scripted {
            Some(Ok(id)) => id,
            Some(Err(e)) => return Err(e),
            None => self.next_id.fetch_add(1, Ordering::SeqCst),
        };
        self.sent.lock().unwrap().push(SentMessage {
            destination: destination.to_string(),
            text: text.to_string(),
            buttons: buttons.map(|b| b.to_vec()).unwrap_or_default(),
            message_id,
        });
        Ok(message_id)
    }

    async fn edit(
        &self,
        destination: &str,
        message_id: i64,
        text: &str,
        _buttons: Option<&[ActionButton]>,
    ) -> Result<(), TransportError> {
        if self.fail_edit.load(Ordering::SeqCst) {
            return Err(TransportError::Network("edit failed".to_string()));
        }
        self.edited
            .lock()
            .unwrap()
            .push((destination.to_string(), message_id, text.to_string()));
        Ok(())
    }

    async fn delete(&self, destination: &str, message_id: i64) -> Result<(), TransportError> {
        if self.missing.lock().unwrap().contains(&message_id) {
            return Err(TransportError::NotFound);
        }
        self.deleted
            .lock()
            .unwrap()
            .push((destination.to_string(), message_id));
        Ok(())
    }
}

/// Delivery config without the production pacing delays.
pub fn fast_delivery_config() -> DeliveryConfig {
    DeliveryConfig {
        flood_delay: Duration::ZERO,
        delete_pause: Duration::ZERO,
        ..DeliveryConfig::default()
    }
}

pub fn sample_item(url: &str, title: &str) -> NewsItem {
    NewsItem {
        title: title.to_string(),
        source: "Example Wire".to_string(),
        date: "2024-01-01 09:00".to_string(),
        url: url.to_string(),
        preview: "Solar output doubled in the region.".to_string(),
        full_text: "Solar output doubled. Grid operators confirmed the numbers.".to_string(),
        language: "en".to_string(),
        relevance_reason: "2 keywords matched".to_string(),
    }
}

pub fn sample_payload(url: &str, title: &str) -> RecordPayload {
    RecordPayload::from(sample_item(url, title))
}
