// src/classify.rs
//! External classifier collaborator contract.
//!
//! The relevance gate treats the classifier as an enhancement: it is consulted
//! only when the keyword heuristic is inconclusive, and any failure falls back
//! to the keyword-only decision.

use std::sync::Arc;

use anyhow::Result;

/// Raw label/score pair returned by a classifier backend.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub label: String,
    pub score: f32,
}

#[async_trait::async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, text: &str) -> Result<Classification>;
    /// Backend name for diagnostics.
    fn name(&self) -> &'static str;
}

pub type SharedClassifier = Arc<dyn Classifier>;

/// Deterministic classifier returning a fixed label/score.
///
/// Used by tests and local runs without a real backend.
pub struct FixedClassifier {
    pub label: String,
    pub score: f32,
}

#[async_trait::async_trait]
impl Classifier for FixedClassifier {
    async fn classify(&self, _text: &str) -> Result<Classification> {
        Ok(Classification {
            label: self.label.clone(),
            score: self.score,
        })
    }

    fn name(&self) -> &'static str {
        "fixed"
    }
}
