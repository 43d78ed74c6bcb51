mod common;

use common::{creator, eligible_event, payout_request, t0, TestApp};
use event_bus::{BusMessage, DlqRecord, EventBus, EventEnvelope};
use mutation_kernel::{
    DedupStore, EventHandler, IdempotencyStore, InboundOutcome, KernelError, RequestContext,
};
use payouts_rs::models::{Payout, PayoutStatus};
use payouts_rs::{handlers, PayoutEligibleHandler, PayoutStore};
use serde_json::json;

#[tokio::test]
async fn test_retried_create_replays_original_payout() {
    let app = TestApp::new();
    let ctx = RequestContext::new("req-1");

    let first = app
        .service
        .create_payout(&ctx, &creator("pay-abc"), payout_request())
        .await
        .unwrap();
    let second = app
        .service
        .create_payout(&ctx, &creator("pay-abc"), payout_request())
        .await
        .unwrap();

    assert_eq!(first.status_code, 201);
    assert!(!first.replayed);
    assert!(second.replayed);
    assert_eq!(second.status_code, 201);
    assert_eq!(first.body, second.body);
    assert_eq!(first.value.payout_id, second.value.payout_id);

    assert_eq!(app.store.count().await.unwrap(), 1);
    assert_eq!(app.outbox_types().await, vec!["payout.paid", "payout.requested"]);

    let payout = &first.value;
    assert_eq!(payout.status, PayoutStatus::Paid);
    assert_eq!(payout.amount_minor, 12_525);
    assert_eq!(payout.fee_minor, 188);
    assert_eq!(payout.net_minor, 12_337);
    assert_eq!(payout.paid_at, Some(t0()));
}

#[tokio::test]
async fn test_same_key_different_body_conflicts() {
    let app = TestApp::new();
    let ctx = RequestContext::new("req-1");

    app.service
        .create_payout(&ctx, &creator("pay-abc"), payout_request())
        .await
        .unwrap();

    let mut changed = payout_request();
    changed.amount = 99.0;
    let err = app
        .service
        .create_payout(&ctx, &creator("pay-abc"), changed)
        .await
        .unwrap_err();

    assert!(matches!(err, KernelError::IdempotencyConflict));
    assert_eq!(app.store.count().await.unwrap(), 1);
    assert_eq!(app.outbox.len().await, 2);
}

#[tokio::test]
async fn test_other_users_payout_is_forbidden() {
    let app = TestApp::new();
    let ctx = RequestContext::new("req-1");
    let mut request = payout_request();
    request.user_id = "someone-else".to_string();

    let err = app
        .service
        .create_payout(&ctx, &creator("pay-abc"), request.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, KernelError::Forbidden(_)));
    assert_eq!(app.store.count().await.unwrap(), 0);
    assert!(app.outbox.is_empty().await);

    let finance = mutation_kernel::Actor::new("ops-1", "finance").with_idempotency_key("pay-abc");
    let created = app.service.create_payout(&ctx, &finance, request).await.unwrap();
    assert_eq!(created.value.user_id, "someone-else");
}

#[tokio::test]
async fn test_invalid_amount_leaves_no_trace() {
    let app = TestApp::new();
    let mut request = payout_request();
    request.amount = -5.0;

    let err = app
        .service
        .create_payout(&RequestContext::new("req-1"), &creator("pay-neg"), request)
        .await
        .unwrap_err();

    assert!(matches!(err, KernelError::InvalidInput(_)));
    assert_eq!(app.store.count().await.unwrap(), 0);
    assert!(app.outbox.is_empty().await);
    assert!(app
        .kernel
        .idempotency()
        .get("user-42:pay-neg", t0())
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_oversized_instant_amount_is_rejected_before_reservation() {
    let app = TestApp::new();
    let mut request = payout_request();
    request.amount = 1e15;

    let err = app
        .service
        .create_payout(&RequestContext::new("req-1"), &creator("pay-huge"), request)
        .await
        .unwrap_err();

    assert!(matches!(err, KernelError::InvalidInput(_)));
    assert_eq!(app.store.count().await.unwrap(), 0);
    assert!(app.outbox.is_empty().await);
    assert!(app
        .kernel
        .idempotency()
        .get("user-42:pay-huge", t0())
        .await
        .unwrap()
        .is_none());

    // The key is still free for a corrected request
    let ok = app
        .service
        .create_payout(&RequestContext::new("req-2"), &creator("pay-huge"), payout_request())
        .await
        .unwrap();
    assert!(!ok.replayed);
}

#[tokio::test]
async fn test_flush_publishes_domain_and_analytics_subjects() {
    let app = TestApp::new();
    app.service
        .create_payout(&RequestContext::new("req-1"), &creator("pay-abc"), payout_request())
        .await
        .unwrap();

    let report = app.kernel.flusher().flush_once().await.unwrap();
    assert_eq!(report.published, 2);

    let subjects: Vec<String> = app.bus.published().into_iter().map(|m| m.subject).collect();
    assert_eq!(
        subjects,
        vec!["payouts.events.payout.paid", "payouts.analytics.payout.requested"]
    );
    assert_eq!(app.outbox.pending_count().await, 0);
}

#[tokio::test]
async fn test_redelivered_eligibility_schedules_one_payout() {
    let app = TestApp::new();
    let processor = app.kernel.inbound_processor(handlers(&app.kernel, app.store.clone()));
    let msg = BusMessage::new(
        "rewards.events.reward.payout_eligible",
        eligible_event("sub-9").with_event_id("evt-1").encode().unwrap(),
    );
    let ctx = RequestContext::background();

    assert_eq!(processor.process(&ctx, &msg).await.unwrap(), InboundOutcome::Handled);
    assert_eq!(processor.process(&ctx, &msg).await.unwrap(), InboundOutcome::Duplicate);

    let payouts = app.store.find_by_submission("sub-9").await.unwrap();
    assert_eq!(payouts.len(), 1);
    assert_eq!(payouts[0].status, PayoutStatus::Scheduled);
    assert_eq!(payouts[0].amount_minor, 4_000);
    assert_eq!(payouts[0].fee_minor, 0);
    assert_eq!(app.outbox_types().await, vec!["payout.scheduled"]);
    assert!(app.kernel.dedup().seen("evt-1", t0()).await.unwrap());

    let scheduled = &app.outbox.all().await[0].envelope;
    assert_eq!(scheduled.trace_id, "trace-rewards-1");
    assert_eq!(scheduled.partition_key, payouts[0].payout_id);
}

#[tokio::test]
async fn test_handler_retry_after_partial_failure_is_harmless() {
    let app = TestApp::new();
    let handler = PayoutEligibleHandler::new(&app.kernel, app.store.clone());
    let envelope = eligible_event("sub-3");
    let ctx = RequestContext::background();

    handler.handle(&ctx, &envelope).await.unwrap();
    handler.handle(&ctx, &envelope).await.unwrap();

    assert_eq!(app.store.count().await.unwrap(), 1);
    assert_eq!(app.outbox.len().await, 1);
    let payout: Payout = app
        .store
        .find_by_source_event(&envelope.event_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(payout.scheduled_at, t0() + chrono::Duration::hours(24));
}

#[tokio::test]
async fn test_tampered_partition_key_is_rejected_and_dead_lettered() {
    let app = TestApp::new();
    let processor = app.kernel.inbound_processor(handlers(&app.kernel, app.store.clone()));

    let mut envelope = eligible_event("sub-1");
    envelope.data["submission_id"] = json!("sub-2");
    let msg = BusMessage::new("rewards.events.reward.payout_eligible", envelope.encode().unwrap());

    let err = processor
        .process(&RequestContext::background(), &msg)
        .await
        .unwrap_err();
    assert!(matches!(err, KernelError::InvalidEnvelope(_)));
    assert_eq!(app.store.count().await.unwrap(), 0);
    assert!(app.outbox.is_empty().await);

    let dead = app.bus.published_matching("payouts.dlq");
    assert_eq!(dead.len(), 1);
    let record: DlqRecord = serde_json::from_slice(&dead[0].payload).unwrap();
    assert_eq!(record.source_topic, "rewards.events.reward.payout_eligible");
    assert_eq!(record.envelope.partition_key, "sub-1");
}

#[tokio::test]
async fn test_worker_consumes_from_bus() {
    let app = TestApp::new();
    let consumer = mutation_kernel::BusConsumer::subscribe(
        app.bus.as_ref(),
        "*.events.reward.payout_eligible",
        std::time::Duration::from_millis(50),
    )
    .await
    .unwrap();

    let envelope: EventEnvelope = eligible_event("sub-5");
    app.bus
        .publish("rewards.events.reward.payout_eligible", envelope.encode().unwrap())
        .await
        .unwrap();

    let processor = app.kernel.inbound_processor(handlers(&app.kernel, app.store.clone()));
    let msg = mutation_kernel::Consumer::receive(&consumer, &Default::default())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        processor.process(&RequestContext::background(), &msg).await.unwrap(),
        InboundOutcome::Handled
    );
    assert_eq!(app.store.find_by_submission("sub-5").await.unwrap().len(), 1);
}
