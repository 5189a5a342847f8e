// src/workflow.rs
//! Moderation state machine: ingestion admission, operator actions, and the
//! edit sub-flow, tying the store and the delivery service together.
//!
//! Approve, reject, and edit-submit always re-read the record immediately
//! before using its data; an edit saved between the moderation post and an
//! approve must be what gets published.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{error, info, warn};

use crate::delivery::{ActionButton, DeliveryService};
use crate::format;
use crate::ingest::NewsItem;
use crate::store::{ModerationStore, RecordField, RecordPayload};

/// Literal an operator sends to abandon an edit without changes.
pub const SKIP_COMMAND: &str = "/skip";

#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    pub moderation_channel: String,
    pub publish_channel: String,
}

/// Result of admitting one batch of candidate items.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdmissionSummary {
    pub admitted: usize,
    pub duplicates: usize,
    pub failed: usize,
}

/// Operator-visible result of an action. `ok` reflects whether the intended
/// state change happened; `message` is the acknowledgment to render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionOutcome {
    pub ok: bool,
    pub message: String,
}

impl ActionOutcome {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
        }
    }

    fn fail(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
        }
    }
}

pub struct ModerationWorkflow {
    store: Arc<ModerationStore>,
    delivery: Arc<DeliveryService>,
    config: WorkflowConfig,
    // operator id -> fingerprint under edit. Process-local by design; a
    // restart just drops open sessions and the operator re-initiates.
    edit_sessions: Mutex<HashMap<String, String>>,
}

impl ModerationWorkflow {
    pub fn new(
        store: Arc<ModerationStore>,
        delivery: Arc<DeliveryService>,
        config: WorkflowConfig,
    ) -> Self {
        Self {
            store,
            delivery,
            config,
            edit_sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Admit new candidate items into moderation. Items whose fingerprint is
    /// already in the sent-set are skipped. An item is only recorded once its
    /// moderation message was posted; on send failure nothing is persisted,
    /// so the item is retried on the next ingestion pass.
    pub async fn admit(&self, items: &[NewsItem]) -> AdmissionSummary {
        let mut summary = AdmissionSummary::default();

        for item in items {
            let fingerprint = item.fingerprint();
            if self.store.is_sent(&fingerprint) {
                summary.duplicates += 1;
                continue;
            }

            let payload = RecordPayload::from(item.clone());
            let text = format::moderation_message(&payload);
            let buttons = moderation_buttons(&fingerprint);

            match self
                .delivery
                .send_with_retry(&self.config.moderation_channel, &text, Some(&buttons))
                .await
            {
                Ok(Some(message_id)) => {
                    match self.store.put(
                        &fingerprint,
                        payload,
                        message_id,
                        &self.config.moderation_channel,
                    ) {
                        Ok(()) => {
                            info!(%fingerprint, message_id, "item admitted to moderation");
                            summary.admitted += 1;
                        }
                        Err(e) => {
                            error!(%fingerprint, error = %e, "record creation failed after post");
                            summary.failed += 1;
                        }
                    }
                }
                Ok(None) => {
                    warn!(%fingerprint, "moderation post suppressed as duplicate");
                    summary.failed += 1;
                }
                Err(e) => {
                    warn!(%fingerprint, error = %e, "moderation post failed");
                    summary.failed += 1;
                }
            }
        }

        info!(
            admitted = summary.admitted,
            duplicates = summary.duplicates,
            failed = summary.failed,
            "admission finished"
        );
        summary
    }

    /// Dispatch an opaque `"<verb>|<fingerprint>"` action token.
    /// `operator_chat` is where edit previews are posted.
    pub async fn handle_action(
        &self,
        operator: &str,
        operator_chat: &str,
        token: &str,
    ) -> ActionOutcome {
        let Some((verb, fingerprint)) = token.split_once('|') else {
            return ActionOutcome::fail(format!("Malformed action: {token}"));
        };

        match verb {
            "approve" => self.approve(fingerprint).await,
            "reject" => self.reject(fingerprint).await,
            "edit" => self.begin_edit(operator, operator_chat, fingerprint).await,
            other => ActionOutcome::fail(format!("Unknown action: {other}")),
        }
    }

    /// Pending -> Published. The record is only removed after the publication
    /// message was delivered; on failure it stays pending, untouched.
    async fn approve(&self, fingerprint: &str) -> ActionOutcome {
        // Fresh read: an edit may have changed the record since the button
        // was rendered.
        let Some(record) = self.store.get(fingerprint) else {
            return ActionOutcome::fail(format!("Record not found: {fingerprint}"));
        };

        let text = format::publication_message(&record.item);
        match self
            .delivery
            .send_with_retry(&self.config.publish_channel, &text, None)
            .await
        {
            // A suppressed duplicate means this exact publication just went
            // out; proceed with cleanup.
            Ok(_) => {}
            Err(e) => {
                warn!(fingerprint, error = %e, "publication failed, record stays pending");
                return ActionOutcome::fail(format!("Publication failed: {e}"));
            }
        }

        let edited = if let Some(record) = self.store.get(fingerprint) {
            self.cleanup_previews(&record.item).await;
            self.delivery
                .safe_delete_many(&record.channel_id, &[record.message_id])
                .await;
            if let Err(e) = self.store.delete(fingerprint) {
                error!(fingerprint, error = %e, "record removal failed after publish");
            }
            record.item.edited
        } else {
            false
        };

        info!(fingerprint, edited, "item published");
        let suffix = if edited { " (edited)" } else { "" };
        ActionOutcome::ok(format!("Item {fingerprint} published{suffix}."))
    }

    /// Pending -> Rejected. Deletes are best-effort cleanup; the record is
    /// removed regardless of partial delete failures.
    async fn reject(&self, fingerprint: &str) -> ActionOutcome {
        let Some(record) = self.store.get(fingerprint) else {
            return ActionOutcome::fail(format!("Record not found: {fingerprint}"));
        };

        self.cleanup_previews(&record.item).await;
        self.delivery
            .safe_delete_many(&record.channel_id, &[record.message_id])
            .await;

        if let Err(e) = self.store.delete(fingerprint) {
            error!(fingerprint, error = %e, "record removal failed on reject");
            return ActionOutcome::fail(format!("Reject failed: {e}"));
        }

        info!(fingerprint, "item rejected");
        ActionOutcome::ok(format!("Item {fingerprint} rejected and removed."))
    }

    /// Pending -> Editing. Posts the current full text to the operator's
    /// chat, remembers the resulting message ids for later cleanup, and opens
    /// an edit session.
    async fn begin_edit(
        &self,
        operator: &str,
        operator_chat: &str,
        fingerprint: &str,
    ) -> ActionOutcome {
        let Some(record) = self.store.get(fingerprint) else {
            return ActionOutcome::fail(format!("Record not found: {fingerprint}"));
        };

        let mut preview_ids = Vec::new();
        if record.item.full_text.trim().is_empty() {
            if let Ok(Some(id)) = self
                .delivery
                .send_with_retry(operator_chat, "No stored text for this item.", None)
                .await
            {
                preview_ids.push(id);
            }
        } else {
            let header = format!("Current full text ({fingerprint}):");
            if let Ok(Some(id)) = self
                .delivery
                .send_with_retry(operator_chat, &header, None)
                .await
            {
                preview_ids.push(id);
            }
            match self
                .delivery
                .split_and_send(operator_chat, &record.item.full_text, None)
                .await
            {
                Ok(ids) => preview_ids.extend(ids),
                Err(e) => {
                    warn!(fingerprint, error = %e, "full text preview failed");
                }
            }
        }

        if let Err(e) = self.store.update(
            fingerprint,
            vec![
                RecordField::PreviewMessageIds(preview_ids),
                RecordField::PreviewChatId(Some(operator_chat.to_string())),
            ],
        ) {
            return ActionOutcome::fail(format!("Could not open edit: {e}"));
        }

        self.edit_sessions
            .lock()
            .expect("edit sessions poisoned")
            .insert(operator.to_string(), fingerprint.to_string());

        info!(fingerprint, operator, "edit session opened");
        ActionOutcome::ok(format!(
            "Send the corrected text, or {SKIP_COMMAND} to keep it as is."
        ))
    }

    /// Free text from an operator with an open session. Returns `None` when
    /// the operator has no session (the message is not for us).
    ///
    /// A failed moderation-message refresh does not roll the edit back: the
    /// text change is already durable when the refresh runs.
    pub async fn submit_text(&self, operator: &str, text: &str) -> Option<ActionOutcome> {
        let fingerprint = self
            .edit_sessions
            .lock()
            .expect("edit sessions poisoned")
            .get(operator)
            .cloned()?;

        if text.trim() == SKIP_COMMAND {
            self.close_session(operator);
            info!(%fingerprint, operator, "edit skipped");
            return Some(ActionOutcome::ok("Edit skipped."));
        }

        let Some(record) = self.store.get(&fingerprint) else {
            self.close_session(operator);
            return Some(ActionOutcome::fail(format!(
                "Record not found: {fingerprint}"
            )));
        };

        if let Err(e) = self.store.update(
            &fingerprint,
            vec![
                RecordField::FullText(text.to_string()),
                RecordField::Edited(true),
            ],
        ) {
            self.close_session(operator);
            return Some(ActionOutcome::fail(format!("Edit failed: {e}")));
        }
        // From here on the text change is durable; refresh failures below
        // must not undo it.

        // Drop the preview messages posted when the edit was requested.
        if !record.item.preview_message_ids.is_empty() {
            self.cleanup_previews(&record.item).await;
            if let Err(e) = self.store.update(
                &fingerprint,
                vec![
                    RecordField::PreviewMessageIds(Vec::new()),
                    RecordField::PreviewChatId(None),
                ],
            ) {
                warn!(%fingerprint, error = %e, "preview field reset failed");
            }
        }

        let outcome = match self.store.get(&fingerprint) {
            Some(fresh) => {
                let rendered = format::moderation_message(&fresh.item);
                let buttons = moderation_buttons(&fingerprint);
                match self
                    .delivery
                    .edit_message(
                        &fresh.channel_id,
                        fresh.message_id,
                        &rendered,
                        Some(&buttons),
                    )
                    .await
                {
                    Ok(()) => ActionOutcome::ok("Text saved; moderation message refreshed."),
                    Err(e) => {
                        warn!(%fingerprint, error = %e, "moderation message refresh failed");
                        ActionOutcome::ok(format!(
                            "Text saved; moderation message could not be refreshed: {e}"
                        ))
                    }
                }
            }
            None => ActionOutcome::ok("Text saved."),
        };

        self.close_session(operator);
        info!(%fingerprint, operator, "edit submitted");
        Some(outcome)
    }

    pub fn has_session(&self, operator: &str) -> bool {
        self.edit_sessions
            .lock()
            .expect("edit sessions poisoned")
            .contains_key(operator)
    }

    fn close_session(&self, operator: &str) {
        self.edit_sessions
            .lock()
            .expect("edit sessions poisoned")
            .remove(operator);
    }

    async fn cleanup_previews(&self, item: &RecordPayload) {
        if item.preview_message_ids.is_empty() {
            return;
        }
        if let Some(chat) = &item.preview_chat_id {
            self.delivery
                .safe_delete_many(chat, &item.preview_message_ids)
                .await;
        }
    }
}

fn moderation_buttons(fingerprint: &str) -> Vec<ActionButton> {
    vec![
        ActionButton {
            label: "Approve".to_string(),
            token: format!("approve|{fingerprint}"),
        },
        ActionButton {
            label: "Reject".to_string(),
            token: format!("reject|{fingerprint}"),
        },
        ActionButton {
            label: "Edit".to_string(),
            token: format!("edit|{fingerprint}"),
        },
    ]
}
