//! Inbound seam: something that hands the worker one message at a time.

use async_trait::async_trait;
use event_bus::{BusError, BusMessage, BusResult, EventBus, EventEnvelope};
use futures::stream::{BoxStream, StreamExt};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

#[async_trait]
pub trait Consumer: Send + Sync {
    /// Next message, or `None` when nothing is available right now (end of
    /// stream for this tick). Returns promptly once `cancel` fires.
    async fn receive(&self, cancel: &CancellationToken) -> Result<Option<BusMessage>, BusError>;
}

/// Consumer over a bus subscription.
///
/// Each `receive` waits at most `wait` for the next message.
pub struct BusConsumer {
    pattern: String,
    stream: Mutex<BoxStream<'static, BusMessage>>,
    wait: Duration,
}

impl BusConsumer {
    pub async fn subscribe(bus: &dyn EventBus, pattern: &str, wait: Duration) -> BusResult<Self> {
        let stream = bus.subscribe(pattern).await?;
        tracing::info!(pattern = %pattern, "Subscribed to inbound events");

        Ok(Self {
            pattern: pattern.to_string(),
            stream: Mutex::new(stream),
            wait,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }
}

#[async_trait]
impl Consumer for BusConsumer {
    async fn receive(&self, cancel: &CancellationToken) -> Result<Option<BusMessage>, BusError> {
        let mut stream = self.stream.lock().await;

        tokio::select! {
            _ = cancel.cancelled() => Ok(None),
            next = tokio::time::timeout(self.wait, stream.next()) => match next {
                Ok(Some(msg)) => Ok(Some(msg)),
                Ok(None) => Err(BusError::ConnectionError(format!(
                    "subscription '{}' closed",
                    self.pattern
                ))),
                Err(_) => Ok(None),
            },
        }
    }
}

/// Queue-backed consumer for tests and local replays.
#[derive(Default)]
pub struct InMemoryConsumer {
    queue: Mutex<VecDeque<BusMessage>>,
}

impl InMemoryConsumer {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push(&self, msg: BusMessage) {
        self.queue.lock().await.push_back(msg);
    }

    /// Queue an envelope as it would arrive from the broker
    pub async fn push_envelope(&self, envelope: &EventEnvelope) -> BusResult<()> {
        let subject = format!("inbound.{}", envelope.event_type);
        self.push(BusMessage::new(subject, envelope.encode()?)).await;
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.queue.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.queue.lock().await.is_empty()
    }
}

#[async_trait]
impl Consumer for InMemoryConsumer {
    async fn receive(&self, cancel: &CancellationToken) -> Result<Option<BusMessage>, BusError> {
        if cancel.is_cancelled() {
            return Ok(None);
        }
        Ok(self.queue.lock().await.pop_front())
    }
}
