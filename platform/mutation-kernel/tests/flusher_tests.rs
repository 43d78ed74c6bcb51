mod common;

use common::{envelope, Harness};
use event_bus::{EventClass, EventEnvelope, InMemoryBus};
use mutation_kernel::{
    Kernel, KernelConfig, KernelError, Outbox, OutboxRecord,
};
use serde_json::json;
use std::sync::Arc;

fn hold_created(n: usize) -> EventEnvelope {
    envelope(
        "escrow.hold_created",
        EventClass::Domain,
        "escrow_id",
        json!({"escrow_id": format!("esc_{}", n), "amount": 100}),
    )
}

fn page_view(n: usize) -> EventEnvelope {
    envelope(
        "escrow.dashboard_viewed",
        EventClass::AnalyticsOnly,
        "user_id",
        json!({"user_id": format!("user_{}", n)}),
    )
}

async fn enqueue(h: &Harness, envelopes: Vec<EventEnvelope>) -> Vec<String> {
    let mut ids = Vec::new();
    for env in envelopes {
        let record = OutboxRecord::new(env, common::t0());
        ids.push(record.record_id.clone());
        h.outbox.enqueue(record).await.unwrap();
    }
    ids
}

#[tokio::test]
async fn test_flush_publishes_in_insertion_order_and_marks_sent() {
    let h = Harness::new("escrow");
    enqueue(&h, vec![hold_created(1), hold_created(2), hold_created(3)]).await;

    let report = h.kernel.flusher().flush_once().await.unwrap();

    assert_eq!(report.published, 3);
    let keys: Vec<String> = h
        .domain
        .published()
        .into_iter()
        .map(|e| e.partition_key)
        .collect();
    assert_eq!(keys, vec!["esc_1", "esc_2", "esc_3"]);
    assert_eq!(h.outbox.pending_count().await, 0);
    assert!(h.outbox.all().await.iter().all(|r| r.sent_at == Some(common::t0())));
}

#[tokio::test]
async fn test_domain_failure_dead_letters_once_and_halts_batch() {
    let h = Harness::new("escrow");
    let ids = enqueue(&h, vec![hold_created(1), hold_created(2)]).await;
    h.domain.fail_next(1);

    let err = h.kernel.flusher().flush_once().await.unwrap_err();

    assert!(matches!(err, KernelError::Publish(_)));
    let dlq = h.dlq.records();
    assert_eq!(dlq.len(), 1);
    assert_eq!(dlq[0].envelope.partition_key, "esc_1");
    assert!(!dlq[0].error.trim().is_empty());
    assert_eq!(dlq[0].retry_count, 1);
    assert_eq!(dlq[0].dlq_topic, "escrow.dlq");
    assert_eq!(dlq[0].source_topic, "escrow.hold_created");
    assert_eq!(dlq[0].trace_id, "trace-test");

    assert!(h.domain.published().is_empty(), "later records wait behind the stuck one");
    let pending = h.outbox.list_pending(10).await.unwrap();
    assert_eq!(pending.len(), 2);
    assert_eq!(pending[0].record_id, ids[0]);
    assert_eq!(pending[0].attempts, 1);
}

#[tokio::test]
async fn test_stuck_record_ships_on_next_tick() {
    let h = Harness::new("escrow");
    enqueue(&h, vec![hold_created(1), hold_created(2)]).await;
    h.domain.fail_next(2);

    let flusher = h.kernel.flusher();
    assert!(flusher.flush_once().await.is_err());
    h.clock.advance(chrono::Duration::seconds(2));
    assert!(flusher.flush_once().await.is_err());

    let dlq = h.dlq.records();
    assert_eq!(dlq.len(), 2);
    assert_eq!(dlq[1].retry_count, 2);
    assert_eq!(dlq[1].first_seen_at, common::t0());
    assert!(dlq[1].last_error_at > dlq[1].first_seen_at);

    let report = flusher.flush_once().await.unwrap();
    assert_eq!(report.published, 2);
    assert_eq!(h.outbox.pending_count().await, 0);
}

#[tokio::test]
async fn test_analytics_failure_is_dropped_and_marked_sent() {
    let h = Harness::new("escrow");
    enqueue(&h, vec![page_view(1), hold_created(1)]).await;
    h.analytics.fail_next(1);

    let report = h.kernel.flusher().flush_once().await.unwrap();

    assert_eq!(report.dropped, 1);
    assert_eq!(report.published, 1);
    assert!(h.dlq.records().is_empty());
    assert_eq!(h.domain.event_types(), vec!["escrow.hold_created"]);
    assert_eq!(h.outbox.pending_count().await, 0);
}

#[tokio::test]
async fn test_ops_record_halts_batch() {
    let h = Harness::new("escrow");
    let ops = envelope(
        "escrow.reindex_requested",
        EventClass::Ops,
        "escrow_id",
        json!({"escrow_id": "esc_9"}),
    );
    enqueue(&h, vec![hold_created(1), ops, hold_created(2)]).await;

    let err = h.kernel.flusher().flush_once().await.unwrap_err();

    assert_eq!(err, KernelError::UnsupportedEventClass(EventClass::Ops));
    assert_eq!(h.domain.published().len(), 1);
    assert_eq!(h.outbox.pending_count().await, 2);
}

#[tokio::test]
async fn test_batch_size_caps_each_flush() {
    let config = KernelConfig::new("escrow").unwrap().with_flush_batch_size(2);
    let h = Harness::with_config(config);
    enqueue(&h, (1..=5).map(hold_created).collect()).await;

    let flusher = h.kernel.flusher();
    assert_eq!(flusher.flush_once().await.unwrap().published, 2);
    assert_eq!(flusher.flush_once().await.unwrap().published, 2);
    assert_eq!(flusher.flush_once().await.unwrap().published, 1);
    assert!(flusher.flush_once().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_bus_backed_flush_routes_by_class() {
    let bus = Arc::new(InMemoryBus::new().with_publish_log());
    let kernel = Kernel::builder(KernelConfig::new("escrow").unwrap())
        .bus(bus.clone())
        .build();

    for env in [hold_created(1), page_view(1)] {
        kernel
            .outbox()
            .enqueue(OutboxRecord::new(env, common::t0()))
            .await
            .unwrap();
    }
    kernel.flusher().flush_once().await.unwrap();

    assert_eq!(bus.published_matching("escrow.events.>").len(), 1);
    assert_eq!(bus.published_matching("escrow.analytics.>").len(), 1);

    bus.fail_next_publishes(1);
    kernel
        .outbox()
        .enqueue(OutboxRecord::new(hold_created(2), common::t0()))
        .await
        .unwrap();
    assert!(kernel.flusher().flush_once().await.is_err());

    let dlq = bus.published_matching("escrow.dlq");
    assert_eq!(dlq.len(), 1);
    let record: serde_json::Value = serde_json::from_slice(&dlq[0].payload).unwrap();
    assert_eq!(record["envelope"]["partition_key"], "esc_2");
}
