//! Dead-letter records
//!
//! A `DlqRecord` preserves an event that could not be published or handled so
//! an operator can inspect and replay it. Nothing is silently dropped for the
//! `domain` class.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::envelope::{EnvelopeError, EventEnvelope};

/// Conventional DLQ topic for a service: `<service>.dlq`
pub fn dlq_topic_for(service_name: &str) -> String {
    format!("{}.dlq", service_name)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DlqRecord {
    /// The original envelope, untouched
    pub envelope: EventEnvelope,
    /// Human-readable failure summary
    pub error: String,
    /// Failed attempts so far (at least 1)
    pub retry_count: u32,
    pub first_seen_at: DateTime<Utc>,
    pub last_error_at: DateTime<Utc>,
    /// Topic the event was headed to or read from
    pub source_topic: String,
    pub dlq_topic: String,
    pub trace_id: String,
}

impl DlqRecord {
    /// Dead-letter an envelope after its first failure.
    ///
    /// `source_topic` defaults to the envelope's `event_type`.
    pub fn new(
        envelope: EventEnvelope,
        error: impl Into<String>,
        dlq_topic: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        let mut error = error.into();
        if error.trim().is_empty() {
            error = "unknown error".to_string();
        }

        Self {
            source_topic: envelope.event_type.clone(),
            trace_id: envelope.trace_id.clone(),
            envelope,
            error,
            retry_count: 1,
            first_seen_at: at,
            last_error_at: at,
            dlq_topic: dlq_topic.into(),
        }
    }

    pub fn with_source_topic(mut self, topic: impl Into<String>) -> Self {
        let topic = topic.into();
        if !topic.is_empty() {
            self.source_topic = topic;
        }
        self
    }

    /// Carry over the failure history of an earlier attempt.
    pub fn with_history(mut self, retry_count: u32, first_seen_at: DateTime<Utc>) -> Self {
        self.retry_count = retry_count.max(1);
        if first_seen_at < self.first_seen_at {
            self.first_seen_at = first_seen_at;
        }
        self
    }

    pub fn encode(&self) -> Result<Vec<u8>, EnvelopeError> {
        serde_json::to_vec(self).map_err(|e| EnvelopeError::Malformed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::EventClass;
    use chrono::Duration;
    use serde_json::json;

    fn envelope() -> EventEnvelope {
        EventEnvelope::build(
            "escrow.hold_created",
            EventClass::Domain,
            json!({"escrow_id": "esc_1"}),
            "esc_1",
            "data.escrow_id",
            "trace-9",
            "1.0.0",
            "escrow",
            Utc::now(),
        )
    }

    #[test]
    fn test_new_record_defaults() {
        let now = Utc::now();
        let record = DlqRecord::new(envelope(), "bus down", dlq_topic_for("escrow"), now);

        assert_eq!(record.retry_count, 1);
        assert_eq!(record.source_topic, "escrow.hold_created");
        assert_eq!(record.dlq_topic, "escrow.dlq");
        assert_eq!(record.trace_id, "trace-9");
        assert_eq!(record.first_seen_at, now);
        assert_eq!(record.last_error_at, now);
    }

    #[test]
    fn test_blank_error_gets_summary() {
        let record = DlqRecord::new(envelope(), "  ", "escrow.dlq", Utc::now());
        assert!(!record.error.trim().is_empty());
    }

    #[test]
    fn test_history_keeps_earliest_first_seen() {
        let now = Utc::now();
        let earlier = now - Duration::minutes(5);
        let record = DlqRecord::new(envelope(), "timeout", "escrow.dlq", now)
            .with_history(3, earlier)
            .with_source_topic("escrow.events.escrow.hold_created");

        assert_eq!(record.retry_count, 3);
        assert_eq!(record.first_seen_at, earlier);
        assert_eq!(record.last_error_at, now);
        assert_eq!(record.source_topic, "escrow.events.escrow.hold_created");
    }
}
