// src/translate.rs
//! Machine-translation collaborator contract. Opaque text in, text out.
//! Translation failures are never fatal to ingestion; callers keep the
//! original text.

use std::sync::Arc;

use anyhow::Result;

#[async_trait::async_trait]
pub trait Translator: Send + Sync {
    async fn translate(&self, text: &str, source_lang: &str, target_lang: &str) -> Result<String>;
}

pub type SharedTranslator = Arc<dyn Translator>;
