#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use event_bus::{EventClass, EventEnvelope, InMemoryBus};
use mutation_kernel::{Actor, InMemoryOutbox, Kernel, KernelConfig, ManualClock};
use payouts_rs::models::{CreatePayoutRequest, PayoutMethod};
use payouts_rs::{InMemoryPayoutStore, PayoutService};
use serde_json::json;
use std::sync::Arc;

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
}

/// Payouts wired to in-memory infrastructure and a manual clock.
pub struct TestApp {
    pub kernel: Kernel,
    pub bus: Arc<InMemoryBus>,
    pub outbox: Arc<InMemoryOutbox>,
    pub store: Arc<InMemoryPayoutStore>,
    pub clock: Arc<ManualClock>,
    pub service: Arc<PayoutService>,
}

impl TestApp {
    pub fn new() -> Self {
        let bus = Arc::new(InMemoryBus::new().with_publish_log());
        let outbox = Arc::new(InMemoryOutbox::new());
        let clock = Arc::new(ManualClock::new(t0()));
        let kernel = Kernel::builder(KernelConfig::new("payouts").unwrap())
            .bus(bus.clone())
            .outbox(outbox.clone())
            .clock(clock.clone())
            .build();
        let store = Arc::new(InMemoryPayoutStore::new());
        let service = Arc::new(PayoutService::new(&kernel, store.clone()));

        Self {
            kernel,
            bus,
            outbox,
            store,
            clock,
            service,
        }
    }

    pub async fn outbox_types(&self) -> Vec<String> {
        self.outbox
            .all()
            .await
            .into_iter()
            .map(|r| r.envelope.event_type)
            .collect()
    }
}

pub fn creator(key: &str) -> Actor {
    Actor::new("user-42", "creator")
        .with_request_id("req-1")
        .with_idempotency_key(key)
}

pub fn payout_request() -> CreatePayoutRequest {
    CreatePayoutRequest {
        user_id: "user-42".to_string(),
        submission_id: "sub-7".to_string(),
        amount: 125.25,
        currency: "USD".to_string(),
        method: PayoutMethod::Instant,
        scheduled_at: t0(),
    }
}

pub fn eligible_event(submission_id: &str) -> EventEnvelope {
    EventEnvelope::build(
        "reward.payout_eligible",
        EventClass::Domain,
        json!({
            "submission_id": submission_id,
            "user_id": "user-42",
            "gross_amount": 40.0,
            "currency": "USD",
            "campaign_id": "camp-1"
        }),
        submission_id,
        "data.submission_id",
        "trace-rewards-1",
        "1",
        "rewards",
        t0(),
    )
}
