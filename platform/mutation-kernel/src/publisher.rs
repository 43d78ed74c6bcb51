//! Outbound seams: envelope publishers (domain and analytics) and the
//! dead-letter publisher, with adapters over [`event_bus::EventBus`].

use async_trait::async_trait;
use event_bus::{
    BusMessage, BusResult, DlqRecord, EventBus, EventEnvelope, TRACE_ID_HEADER,
};
use std::sync::Arc;

/// Publishes a validated envelope to the broker.
#[async_trait]
pub trait EnvelopePublisher: Send + Sync {
    async fn publish(&self, envelope: &EventEnvelope) -> BusResult<()>;
}

/// Publishes dead-letter records.
#[async_trait]
pub trait DlqPublisher: Send + Sync {
    async fn publish(&self, record: &DlqRecord) -> BusResult<()>;
}

/// Publishes envelopes to `<subject_prefix>.<event_type>`.
///
/// Every envelope is validated again before it leaves the process, so the
/// broker only ever sees envelopes that satisfy the partition-key invariant.
#[derive(Clone)]
pub struct BusPublisher {
    bus: Arc<dyn EventBus>,
    subject_prefix: String,
}

impl BusPublisher {
    pub fn new(bus: Arc<dyn EventBus>, subject_prefix: impl Into<String>) -> Self {
        Self {
            bus,
            subject_prefix: subject_prefix.into(),
        }
    }

    pub fn subject_for(&self, envelope: &EventEnvelope) -> String {
        format!("{}.{}", self.subject_prefix, envelope.event_type)
    }
}

#[async_trait]
impl EnvelopePublisher for BusPublisher {
    async fn publish(&self, envelope: &EventEnvelope) -> BusResult<()> {
        envelope.validate()?;

        let subject = self.subject_for(envelope);
        let msg = BusMessage::new(subject.as_str(), envelope.encode()?)
            .with_header(TRACE_ID_HEADER, envelope.trace_id.as_str());

        self.bus.publish_message(msg).await?;

        tracing::debug!(
            event_id = %envelope.event_id,
            event_type = %envelope.event_type,
            subject = %subject,
            "Published event"
        );
        Ok(())
    }
}

/// Publishes dead-letter records to a single DLQ topic.
#[derive(Clone)]
pub struct BusDlqPublisher {
    bus: Arc<dyn EventBus>,
    topic: String,
}

impl BusDlqPublisher {
    pub fn new(bus: Arc<dyn EventBus>, topic: impl Into<String>) -> Self {
        Self {
            bus,
            topic: topic.into(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

#[async_trait]
impl DlqPublisher for BusDlqPublisher {
    async fn publish(&self, record: &DlqRecord) -> BusResult<()> {
        let msg = BusMessage::new(self.topic.as_str(), record.encode()?)
            .with_header(TRACE_ID_HEADER, record.trace_id.as_str());

        self.bus.publish_message(msg).await?;

        tracing::warn!(
            event_id = %record.envelope.event_id,
            event_type = %record.envelope.event_type,
            dlq_topic = %self.topic,
            retry_count = record.retry_count,
            error = %record.error,
            "Event moved to DLQ"
        );
        Ok(())
    }
}
