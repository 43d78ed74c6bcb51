//! # Event Bus
//!
//! Shared messaging layer for every service in the fleet: the canonical event
//! envelope codec, the bus abstraction the outbox flusher and inbound workers
//! talk to, dead-letter records, and consumer retry.
//!
//! ## Implementations
//!
//! - **NatsBus**: Production implementation using NATS
//! - **InMemoryBus**: Test/dev implementation using in-memory channels, with
//!   a publish log and injectable publish failures
//!
//! ## Usage
//!
//! ```rust,no_run
//! use chrono::Utc;
//! use event_bus::{EventBus, EventClass, EventEnvelope, InMemoryBus};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let bus: Arc<dyn EventBus> = Arc::new(InMemoryBus::new());
//!
//! let envelope = EventEnvelope::build(
//!     "escrow.hold_created",
//!     EventClass::Domain,
//!     json!({"escrow_id": "esc_1", "amount": 100}),
//!     "esc_1",
//!     "data.escrow_id",
//!     "trace-1",
//!     "1.0.0",
//!     "escrow",
//!     Utc::now(),
//! );
//! envelope.validate()?;
//!
//! bus.publish("escrow.events.escrow.hold_created", envelope.encode()?).await?;
//! # Ok(())
//! # }
//! ```

pub mod canonical;
pub mod consumer_retry;
mod dlq;
mod envelope;
mod inmemory_bus;
mod nats_bus;

pub use dlq::{dlq_topic_for, DlqRecord};
pub use envelope::{
    peek_class, stringify_scalar, EnvelopeError, EventClass, EventEnvelope, PARTITION_PATH_PREFIX,
};
pub use inmemory_bus::InMemoryBus;
pub use nats_bus::NatsBus;

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::fmt;

/// Header carrying the envelope's trace id on the wire
pub const TRACE_ID_HEADER: &str = "trace-id";

/// A message received from the event bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    /// The subject/topic this message was published to
    pub subject: String,
    /// The message payload (raw bytes)
    pub payload: Vec<u8>,
    /// Optional headers
    pub headers: Option<HashMap<String, String>>,
    /// Optional reply-to subject (for request-response patterns)
    pub reply_to: Option<String>,
}

impl BusMessage {
    pub fn new(subject: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            subject: subject.into(),
            payload,
            headers: None,
            reply_to: None,
        }
    }

    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = Some(headers);
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .as_ref()
            .and_then(|h| h.get(key))
            .map(|v| v.as_str())
    }
}

/// Errors that can occur when using the event bus
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BusError {
    #[error("failed to publish message: {0}")]
    PublishError(String),

    #[error("failed to subscribe to subject: {0}")]
    SubscribeError(String),

    #[error("connection error: {0}")]
    ConnectionError(String),

    #[error("serialization error: {0}")]
    SerializationError(String),

    #[error("invalid subject pattern: {0}")]
    InvalidSubject(String),
}

impl From<EnvelopeError> for BusError {
    fn from(e: EnvelopeError) -> Self {
        BusError::SerializationError(e.to_string())
    }
}

/// Result type for event bus operations
pub type BusResult<T> = Result<T, BusError>;

/// Publish-subscribe transport under the outbox flusher and inbound workers.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish raw bytes to a subject
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> BusResult<()>;

    /// Publish a message including its headers.
    ///
    /// The default drops headers; transports that carry them override this.
    async fn publish_message(&self, msg: BusMessage) -> BusResult<()> {
        self.publish(&msg.subject, msg.payload).await
    }

    /// Subscribe to messages matching a subject pattern
    ///
    /// Patterns support NATS wildcards: `*` matches a single token,
    /// `>` matches one or more trailing tokens.
    async fn subscribe(&self, subject: &str) -> BusResult<BoxStream<'static, BusMessage>>;
}

impl fmt::Debug for dyn EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventBus")
    }
}

/// Check that a subject used for publishing is concrete (no wildcards, no
/// empty tokens).
pub fn validate_publish_subject(subject: &str) -> BusResult<()> {
    if subject.is_empty()
        || subject
            .split('.')
            .any(|token| token.is_empty() || token == "*" || token == ">")
    {
        return Err(BusError::InvalidSubject(subject.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_subject_validation() {
        assert!(validate_publish_subject("payouts.events.payout.paid").is_ok());
        assert!(validate_publish_subject("payouts.dlq").is_ok());
        assert!(validate_publish_subject("").is_err());
        assert!(validate_publish_subject("payouts..paid").is_err());
        assert!(validate_publish_subject("payouts.*").is_err());
        assert!(validate_publish_subject("payouts.>").is_err());
    }

    #[test]
    fn test_message_headers() {
        let msg = BusMessage::new("a.b", b"x".to_vec()).with_header(TRACE_ID_HEADER, "t-1");
        assert_eq!(msg.header(TRACE_ID_HEADER), Some("t-1"));
        assert_eq!(msg.header("missing"), None);
    }
}
