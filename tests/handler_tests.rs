use std::sync::Arc;

use announcement_notifier::{
    clients::DeliveryLedger,
    config::DispatchConfig,
    dispatcher::Dispatcher,
    models::status::DeliveryStatus,
    worker::{AnnouncementHandler, DeliveryAction},
};
use anyhow::{Result, bail};

use crate::common::{InMemoryDirectory, InMemoryLedger, RecordingGateway, user};

fn handler_with(
    directory: Arc<InMemoryDirectory>,
    gateway: Arc<RecordingGateway>,
    ledger: Arc<InMemoryLedger>,
    batch_size: usize,
) -> AnnouncementHandler {
    let config = DispatchConfig {
        batch_size,
        ..DispatchConfig::default()
    };
    let dispatcher = Dispatcher::new(directory, gateway, config);

    AnnouncementHandler::new(Arc::new(dispatcher)).with_ledger(ledger)
}

fn campus_directory() -> Arc<InMemoryDirectory> {
    Arc::new(InMemoryDirectory::new(vec![
        user("u1", "faculty", Some("f1")),
        user("u2", "student", Some("s1")),
    ]))
}

/// Test: Malformed events are dead-lettered without touching the store
#[tokio::test]
async fn test_invalid_json_is_dead_lettered() -> Result<()> {
    let directory = campus_directory();
    let gateway = Arc::new(RecordingGateway::new());
    let ledger = Arc::new(InMemoryLedger::default());
    let handler = handler_with(directory.clone(), gateway.clone(), ledger, 500);

    let action = handler.handle(b"{ invalid json }").await;

    match action {
        DeliveryAction::DeadLetter(message) => {
            assert_eq!(message.announcement_id, None);
            assert_eq!(message.original_payload, "{ invalid json }");
        }
        DeliveryAction::Ack => bail!("invalid payload should not be acknowledged"),
    }
    assert_eq!(directory.query_count(), 0);
    assert!(gateway.sent().is_empty());

    Ok(())
}

/// Test: An empty role list violates the target invariant
#[tokio::test]
async fn test_empty_role_target_is_dead_lettered() -> Result<()> {
    let directory = campus_directory();
    let gateway = Arc::new(RecordingGateway::new());
    let ledger = Arc::new(InMemoryLedger::default());
    let handler = handler_with(directory.clone(), gateway, ledger, 500);

    let action = handler
        .handle(br#"{"id":"a1","title":"x","target":[]}"#)
        .await;

    assert!(matches!(action, DeliveryAction::DeadLetter(_)));
    assert_eq!(directory.query_count(), 0);

    Ok(())
}

/// Test: A delivered announcement is acknowledged and recorded as sent
#[tokio::test]
async fn test_successful_dispatch_is_acknowledged() -> Result<()> {
    let gateway = Arc::new(RecordingGateway::new());
    let ledger = Arc::new(InMemoryLedger::default());
    let handler = handler_with(campus_directory(), gateway.clone(), ledger.clone(), 500);

    let action = handler
        .handle(br#"{"id":"a1","title":"Exam Schedule","body":"Posted","target":["faculty"]}"#)
        .await;

    assert!(matches!(action, DeliveryAction::Ack));
    assert_eq!(ledger.status("a1"), DeliveryStatus::Sent);
    assert_eq!(gateway.sent().len(), 1);
    assert_eq!(gateway.sent()[0].tokens, vec!["f1".to_string()]);

    Ok(())
}

/// Test: Redelivered events are skipped once dispatched
#[tokio::test]
async fn test_redelivery_is_not_dispatched_twice() -> Result<()> {
    let directory = campus_directory();
    let gateway = Arc::new(RecordingGateway::new());
    let ledger = Arc::new(InMemoryLedger::default());
    let handler = handler_with(directory.clone(), gateway.clone(), ledger, 500);

    let payload = br#"{"id":"a1","title":"Exam Schedule","target":"ALL"}"#;

    let first = handler.handle(payload).await;
    let second = handler.handle(payload).await;

    assert!(matches!(first, DeliveryAction::Ack));
    assert!(matches!(second, DeliveryAction::Ack));
    assert_eq!(directory.query_count(), 1, "Second delivery should be skipped");
    assert_eq!(gateway.sent().len(), 1);

    Ok(())
}

/// Test: Query failures are dead-lettered and may be dispatched again later
#[tokio::test]
async fn test_query_failure_is_dead_lettered_and_retryable() -> Result<()> {
    let directory = Arc::new(InMemoryDirectory::failing());
    let gateway = Arc::new(RecordingGateway::new());
    let ledger = Arc::new(InMemoryLedger::default());
    let handler = handler_with(directory.clone(), gateway, ledger.clone(), 500);

    let payload = br#"{"id":"a9","target":"ALL"}"#;

    match handler.handle(payload).await {
        DeliveryAction::DeadLetter(message) => {
            assert_eq!(message.announcement_id.as_deref(), Some("a9"));
            assert!(message.failure_reason.contains("Recipient query failed"));
        }
        DeliveryAction::Ack => bail!("query failure should be dead-lettered"),
    }
    assert_eq!(ledger.status("a9"), DeliveryStatus::Failed);

    let _ = handler.handle(payload).await;
    assert_eq!(
        directory.query_count(),
        2,
        "Failed deliveries should be dispatched again"
    );

    Ok(())
}

/// Test: Failed batches mark the delivery as partial but still acknowledge it
#[tokio::test]
async fn test_partial_failure_is_recorded() -> Result<()> {
    let gateway = Arc::new(RecordingGateway::new().unreachable_for("s1"));
    let ledger = Arc::new(InMemoryLedger::default());
    let handler = handler_with(campus_directory(), gateway.clone(), ledger.clone(), 1);

    let action = handler.handle(br#"{"id":"a2","target":"ALL"}"#).await;

    assert!(matches!(action, DeliveryAction::Ack));
    assert_eq!(ledger.status("a2"), DeliveryStatus::Partial);
    assert_eq!(gateway.sent().len(), 2);

    Ok(())
}

/// Test: A redelivery that finds an unfinished claim is dead-lettered, not dropped
#[tokio::test]
async fn test_unfinished_claim_is_dead_lettered() -> Result<()> {
    let directory = campus_directory();
    let gateway = Arc::new(RecordingGateway::new());
    let ledger = Arc::new(InMemoryLedger::default());
    let handler = handler_with(directory.clone(), gateway.clone(), ledger.clone(), 500);

    ledger.claim("a1").await?;

    match handler.handle(br#"{"id":"a1","target":"ALL"}"#).await {
        DeliveryAction::DeadLetter(message) => {
            assert_eq!(message.announcement_id.as_deref(), Some("a1"));
            assert!(message.failure_reason.contains("already in progress"));
        }
        DeliveryAction::Ack => bail!("unfinished delivery must not be acknowledged"),
    }
    assert_eq!(directory.query_count(), 0);
    assert!(gateway.sent().is_empty());
    assert_eq!(ledger.status("a1"), DeliveryStatus::Processing);

    Ok(())
}
