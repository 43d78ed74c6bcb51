//! In-memory implementation of the EventBus trait for testing and development

use crate::{validate_publish_subject, BusError, BusMessage, BusResult, EventBus};
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

/// EventBus implementation using in-memory channels
///
/// Messages are broadcast to every subscriber whose pattern matches. A bus
/// built with [`InMemoryBus::with_publish_log`] also keeps every successful
/// publish for tests to inspect; the default bus retains nothing. The next N
/// publishes can be made to fail to exercise DLQ paths.
///
/// # Example
/// ```rust
/// use event_bus::{EventBus, InMemoryBus};
/// use futures::StreamExt;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = InMemoryBus::new().with_publish_log();
/// let mut stream = bus.subscribe("escrow.events.>").await?;
///
/// bus.publish("escrow.events.escrow.released", b"{}".to_vec()).await?;
///
/// let msg = stream.next().await.unwrap();
/// assert_eq!(msg.subject, "escrow.events.escrow.released");
/// assert_eq!(bus.published().len(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct InMemoryBus {
    sender: Arc<broadcast::Sender<BusMessage>>,
    log: Option<Arc<Mutex<Vec<BusMessage>>>>,
    pending_failures: Arc<AtomicUsize>,
}

impl InMemoryBus {
    /// Create a bus with a 1000-message broadcast buffer
    pub fn new() -> Self {
        Self::with_capacity(1000)
    }

    /// Create a bus with a custom broadcast buffer.
    ///
    /// Subscribers that fall more than `buffer_size` messages behind skip the
    /// oldest ones.
    pub fn with_capacity(buffer_size: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer_size.max(1));
        Self {
            sender: Arc::new(sender),
            log: None,
            pending_failures: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Make the next `count` publishes fail with `BusError::PublishError`
    pub fn fail_next_publishes(&self, count: usize) {
        self.pending_failures.store(count, Ordering::SeqCst);
    }

    /// Record every successful publish from now on.
    ///
    /// The log grows without bound, so this is meant for tests and short-lived
    /// development runs.
    pub fn with_publish_log(mut self) -> Self {
        self.log = Some(Arc::new(Mutex::new(Vec::new())));
        self
    }

    /// Every message published so far, in publish order.
    ///
    /// Always empty unless the bus was built with a publish log.
    pub fn published(&self) -> Vec<BusMessage> {
        match &self.log {
            Some(log) => log
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .clone(),
            None => Vec::new(),
        }
    }

    /// Published messages whose subject matches `pattern`
    pub fn published_matching(&self, pattern: &str) -> Vec<BusMessage> {
        self.published()
            .into_iter()
            .filter(|m| subject_matches(&m.subject, pattern))
            .collect()
    }

    fn take_failure(&self) -> bool {
        self.pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

/// NATS-style subject matching
///
/// - `*` matches exactly one token
/// - `>` matches one or more trailing tokens
pub(crate) fn subject_matches(subject: &str, pattern: &str) -> bool {
    let mut subject_tokens = subject.split('.');
    let mut pattern_tokens = pattern.split('.').peekable();

    while let Some(p) = pattern_tokens.next() {
        if p == ">" {
            return pattern_tokens.peek().is_none() && subject_tokens.next().is_some();
        }
        match subject_tokens.next() {
            Some(s) if p == "*" || p == s => continue,
            _ => return false,
        }
    }

    subject_tokens.next().is_none()
}

#[async_trait]
impl EventBus for InMemoryBus {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> BusResult<()> {
        self.publish_message(BusMessage::new(subject, payload)).await
    }

    async fn publish_message(&self, msg: BusMessage) -> BusResult<()> {
        validate_publish_subject(&msg.subject)?;

        if self.take_failure() {
            return Err(BusError::PublishError(format!(
                "injected failure publishing to {}",
                msg.subject
            )));
        }

        if let Some(log) = &self.log {
            log.lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .push(msg.clone());
        }

        // No receivers is not an error
        let _ = self.sender.send(msg);
        Ok(())
    }

    async fn subscribe(&self, pattern: &str) -> BusResult<BoxStream<'static, BusMessage>> {
        if pattern.is_empty() {
            return Err(BusError::InvalidSubject(pattern.to_string()));
        }

        let mut receiver = self.sender.subscribe();
        let pattern = pattern.to_string();

        let stream = async_stream::stream! {
            loop {
                match receiver.recv().await {
                    Ok(msg) => {
                        if subject_matches(&msg.subject, &pattern) {
                            yield msg;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(pattern = %pattern, skipped, "InMemoryBus subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        };

        Ok(stream.boxed())
    }
}
