// src/relevance.rs
//! Relevance gate: keyword heuristic first, classifier second.
//!
//! Two or more keyword hits accept outright. Below that, an optional external
//! classifier gets the first ~400 characters; a "neutral" label above the
//! confidence threshold accepts. When the classifier is absent or failing the
//! gate degrades to keyword-only so ingestion keeps running.

use tracing::warn;

use crate::classify::SharedClassifier;

pub const DEFAULT_CLASSIFIER_THRESHOLD: f32 = 0.90;

/// How many leading characters of the combined text the classifier sees.
const CLASSIFIER_INPUT_CHARS: usize = 400;

/// Domain keyword list, matched case-insensitively as substrings.
pub const EXPANDED_KEYWORDS: &[&str] = &[
    "renewable",
    "solar",
    "wind turbine",
    "wind power",
    "wind farm",
    "battery",
    "hydrogen",
    "decarbonization",
    "decarbonisation",
    "sustainability",
    "green energy",
    "clean tech",
    "cleantech",
    "photovoltaic",
    "geothermal",
    "biofuel",
    "tidal energy",
    "energy storage",
    "energy transition",
    "energy efficiency",
    "electric vehicle",
    "power grid",
    "climate",
    "emissions",
    "carbon capture",
    "heat pump",
    "offshore wind",
];

/// Outcome of a relevance evaluation. Callers branch on data, not errors.
#[derive(Debug, Clone, PartialEq)]
pub struct RelevanceDecision {
    pub accepted: bool,
    pub reason: String,
}

impl RelevanceDecision {
    fn accept(reason: impl Into<String>) -> Self {
        Self {
            accepted: true,
            reason: reason.into(),
        }
    }

    fn reject(reason: impl Into<String>) -> Self {
        Self {
            accepted: false,
            reason: reason.into(),
        }
    }
}

pub struct RelevanceGate {
    classifier: Option<SharedClassifier>,
    threshold: f32,
}

impl RelevanceGate {
    pub fn new(classifier: Option<SharedClassifier>) -> Self {
        Self {
            classifier,
            threshold: DEFAULT_CLASSIFIER_THRESHOLD,
        }
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold.clamp(0.0, 1.0);
        self
    }

    /// Count case-insensitive keyword occurrences in `text`.
    pub fn keyword_hits(text: &str) -> usize {
        let lower = text.to_lowercase();
        EXPANDED_KEYWORDS
            .iter()
            .filter(|kw| lower.contains(*kw))
            .count()
    }

    pub async fn evaluate(&self, text: &str) -> RelevanceDecision {
        if text.trim().is_empty() {
            return RelevanceDecision::reject("empty text");
        }

        let hits = Self::keyword_hits(text);
        if hits >= 2 {
            return RelevanceDecision::accept(format!("{hits} keywords matched"));
        }

        let Some(classifier) = &self.classifier else {
            return RelevanceDecision {
                accepted: hits > 0,
                reason: "keyword-only".to_string(),
            };
        };

        let head: String = text.chars().take(CLASSIFIER_INPUT_CHARS).collect();
        match classifier.classify(&head).await {
            Ok(c) if c.label == "neutral" && c.score > self.threshold => {
                RelevanceDecision::accept(format!("classifier {} ({:.2})", c.label, c.score))
            }
            Ok(c) => RelevanceDecision::reject(format!("classifier {} ({:.2})", c.label, c.score)),
            Err(e) => {
                warn!(error = ?e, backend = classifier.name(), "classifier error, keyword fallback");
                RelevanceDecision {
                    accepted: hits > 0,
                    reason: "keyword-only".to_string(),
                }
            }
        }
    }
}
