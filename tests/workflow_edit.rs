// tests/workflow_edit.rs
mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use common::{fast_delivery_config, sample_item, MockTransport};
use energy_news_pipeline::delivery::DeliveryService;
use energy_news_pipeline::store::ModerationStore;
use energy_news_pipeline::workflow::{ModerationWorkflow, WorkflowConfig};

struct Fixture {
    transport: Arc<MockTransport>,
    store: Arc<ModerationStore>,
    workflow: ModerationWorkflow,
    _dir: tempfile::TempDir,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(
        ModerationStore::open(
            dir.path().join("news_db.json"),
            dir.path().join("sent_ids.json"),
            Duration::from_secs(3_600),
        )
        .expect("open store"),
    );
    let transport = Arc::new(MockTransport::new());
    let delivery = Arc::new(DeliveryService::new(
        transport.clone(),
        fast_delivery_config(),
    ));
    let workflow = ModerationWorkflow::new(
        store.clone(),
        delivery,
        WorkflowConfig {
            moderation_channel: "mod-room".to_string(),
            publish_channel: "main-channel".to_string(),
        },
    );
    Fixture {
        transport,
        store,
        workflow,
        _dir: dir,
    }
}

#[tokio::test(start_paused = true)]
async fn edit_request_posts_preview_and_opens_session() {
    let fx = fixture();
    let item = sample_item("https://x/1", "Solar record");
    let fingerprint = item.fingerprint();
    fx.workflow.admit(&[item]).await;

    let outcome = fx
        .workflow
        .handle_action("op1", "op-chat", &format!("edit|{fingerprint}"))
        .await;
    assert!(outcome.ok);
    assert!(fx.workflow.has_session("op1"));

    // Header plus at least one text chunk landed in the operator chat.
    let preview = fx.transport.sent_to("op-chat");
    assert!(preview.len() >= 2);
    assert!(preview[0].text.contains(&fingerprint));

    let record = fx.store.get(&fingerprint).expect("record");
    assert_eq!(
        record.item.preview_message_ids.len(),
        preview.len(),
        "all preview message ids are remembered"
    );
    assert_eq!(record.item.preview_chat_id.as_deref(), Some("op-chat"));
}

#[tokio::test(start_paused = true)]
async fn edit_submit_saves_text_and_refreshes_moderation_message() {
    let fx = fixture();
    let item = sample_item("https://x/1", "Solar record");
    let fingerprint = item.fingerprint();
    fx.workflow.admit(&[item]).await;
    fx.workflow
        .handle_action("op1", "op-chat", &format!("edit|{fingerprint}"))
        .await;
    let preview_ids: Vec<i64> = fx
        .store
        .get(&fingerprint)
        .expect("record")
        .item
        .preview_message_ids
        .clone();

    let outcome = fx
        .workflow
        .submit_text("op1", "new body")
        .await
        .expect("session active");
    assert!(outcome.ok);
    assert!(!fx.workflow.has_session("op1"));

    let record = fx.store.get(&fingerprint).expect("record");
    assert_eq!(record.item.full_text, "new body");
    assert!(record.item.edited);
    assert!(record.item.preview_message_ids.is_empty());
    assert!(record.item.preview_chat_id.is_none());

    // Preview messages were cleaned up from the operator chat.
    let deleted = fx.transport.deleted.lock().unwrap().clone();
    for id in preview_ids {
        assert!(deleted.contains(&("op-chat".to_string(), id)));
    }

    // Moderation message was re-rendered with the edited marker.
    let edited = fx.transport.edited.lock().unwrap().clone();
    assert_eq!(edited.len(), 1);
    assert_eq!(edited[0].0, "mod-room");
    assert!(edited[0].2.contains("[edited]"));
}

#[tokio::test(start_paused = true)]
async fn approve_after_edit_publishes_the_new_text() {
    let fx = fixture();
    let item = sample_item("https://x/1", "Solar record");
    let fingerprint = item.fingerprint();
    fx.workflow.admit(&[item]).await;
    fx.workflow
        .handle_action("op1", "op-chat", &format!("edit|{fingerprint}"))
        .await;
    fx.workflow
        .submit_text("op1", "new body")
        .await
        .expect("session active");

    let outcome = fx
        .workflow
        .handle_action("op1", "op-chat", &format!("approve|{fingerprint}"))
        .await;
    assert!(outcome.ok);
    assert!(outcome.message.contains("(edited)"));

    let published = fx.transport.sent_to("main-channel");
    assert_eq!(published.len(), 1);
    assert!(published[0].text.contains("new body"));
    assert!(!published[0].text.contains("Grid operators confirmed"));
    assert!(fx.store.get(&fingerprint).is_none());
}

#[tokio::test(start_paused = true)]
async fn skip_closes_the_session_without_changes() {
    let fx = fixture();
    let item = sample_item("https://x/1", "Solar record");
    let fingerprint = item.fingerprint();
    fx.workflow.admit(&[item.clone()]).await;
    fx.workflow
        .handle_action("op1", "op-chat", &format!("edit|{fingerprint}"))
        .await;

    let outcome = fx
        .workflow
        .submit_text("op1", "/skip")
        .await
        .expect("session active");
    assert!(outcome.ok);
    assert!(outcome.message.contains("skipped"));
    assert!(!fx.workflow.has_session("op1"));

    let record = fx.store.get(&fingerprint).expect("record");
    assert_eq!(record.item.full_text, item.full_text);
    assert!(!record.item.edited);
}

#[tokio::test(start_paused = true)]
async fn free_text_without_session_is_ignored() {
    let fx = fixture();
    assert!(fx.workflow.submit_text("op9", "stray message").await.is_none());
}

#[tokio::test(start_paused = true)]
async fn failed_refresh_still_keeps_the_saved_edit() {
    let fx = fixture();
    let item = sample_item("https://x/1", "Solar record");
    let fingerprint = item.fingerprint();
    fx.workflow.admit(&[item]).await;
    fx.workflow
        .handle_action("op1", "op-chat", &format!("edit|{fingerprint}"))
        .await;

    fx.transport.fail_edit.store(true, Ordering::SeqCst);
    let outcome = fx
        .workflow
        .submit_text("op1", "new body")
        .await
        .expect("session active");

    // The edit is durable even though the refresh failed.
    assert!(outcome.ok);
    assert!(outcome.message.contains("could not be refreshed"));
    let record = fx.store.get(&fingerprint).expect("record");
    assert_eq!(record.item.full_text, "new body");
    assert!(record.item.edited);
}

#[tokio::test(start_paused = true)]
async fn concurrent_operators_edit_different_items() {
    let fx = fixture();
    let first = sample_item("https://x/1", "Solar record");
    let second = sample_item("https://x/2", "Wind record");
    let fp1 = first.fingerprint();
    let fp2 = second.fingerprint();
    fx.workflow.admit(&[first, second]).await;

    fx.workflow
        .handle_action("op1", "chat-1", &format!("edit|{fp1}"))
        .await;
    fx.workflow
        .handle_action("op2", "chat-2", &format!("edit|{fp2}"))
        .await;

    fx.workflow.submit_text("op1", "body one").await.expect("op1");
    fx.workflow.submit_text("op2", "body two").await.expect("op2");

    assert_eq!(fx.store.get(&fp1).expect("fp1").item.full_text, "body one");
    assert_eq!(fx.store.get(&fp2).expect("fp2").item.full_text, "body two");
}
