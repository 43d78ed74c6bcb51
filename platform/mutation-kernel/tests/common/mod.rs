#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use event_bus::{BusError, BusResult, DlqRecord, EventClass, EventEnvelope};
use mutation_kernel::{
    DlqPublisher, EnvelopePublisher, InMemoryDedupStore, InMemoryIdempotencyStore,
    InMemoryOutbox, Kernel, KernelConfig, ManualClock,
};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 2, 10, 0, 0, 0).unwrap()
}

/// Envelope publisher that records what it was given and can be told to fail.
#[derive(Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<EventEnvelope>>,
    failures: AtomicUsize,
}

impl RecordingPublisher {
    pub fn fail_next(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<EventEnvelope> {
        self.published.lock().unwrap().clone()
    }

    pub fn event_types(&self) -> Vec<String> {
        self.published().into_iter().map(|e| e.event_type).collect()
    }
}

#[async_trait]
impl EnvelopePublisher for RecordingPublisher {
    async fn publish(&self, envelope: &EventEnvelope) -> BusResult<()> {
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(BusError::PublishError("broker unavailable".to_string()));
        }
        envelope.validate()?;
        self.published.lock().unwrap().push(envelope.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingDlq {
    records: Mutex<Vec<DlqRecord>>,
}

impl RecordingDlq {
    pub fn records(&self) -> Vec<DlqRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl DlqPublisher for RecordingDlq {
    async fn publish(&self, record: &DlqRecord) -> BusResult<()> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}

/// A kernel over in-memory stores with handles to every part.
pub struct Harness {
    pub kernel: Kernel,
    pub idempotency: Arc<InMemoryIdempotencyStore>,
    pub dedup: Arc<InMemoryDedupStore>,
    pub outbox: Arc<InMemoryOutbox>,
    pub domain: Arc<RecordingPublisher>,
    pub analytics: Arc<RecordingPublisher>,
    pub dlq: Arc<RecordingDlq>,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    pub fn new(service: &str) -> Self {
        Self::with_config(KernelConfig::new(service).unwrap())
    }

    pub fn with_config(config: KernelConfig) -> Self {
        let idempotency = Arc::new(InMemoryIdempotencyStore::new(config.idempotency_ttl));
        let dedup = Arc::new(InMemoryDedupStore::new());
        let outbox = Arc::new(InMemoryOutbox::new());
        let domain = Arc::new(RecordingPublisher::default());
        let analytics = Arc::new(RecordingPublisher::default());
        let dlq = Arc::new(RecordingDlq::default());
        let clock = Arc::new(ManualClock::new(t0()));

        let kernel = Kernel::builder(config)
            .idempotency_store(idempotency.clone())
            .dedup_store(dedup.clone())
            .outbox(outbox.clone())
            .publishers(domain.clone(), analytics.clone(), dlq.clone())
            .clock(clock.clone())
            .build();

        Self {
            kernel,
            idempotency,
            dedup,
            outbox,
            domain,
            analytics,
            dlq,
            clock,
        }
    }
}

pub fn envelope(event_type: &str, class: EventClass, field: &str, data: Value) -> EventEnvelope {
    let key = event_bus::stringify_scalar(&data[field]).unwrap();
    EventEnvelope::build(
        event_type,
        class,
        data,
        key,
        format!("data.{}", field),
        "trace-test",
        "1.0.0",
        "rewards",
        t0(),
    )
}
