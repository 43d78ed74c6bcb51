//! Inbound event processing
//!
//! Per message: decode and validate the envelope, skip events already
//! handled, dispatch by `event_type` with bounded retry, then remember the
//! `event_id`. The dedup mark is written only after the handler succeeds.

use async_trait::async_trait;
use event_bus::consumer_retry::retry_with_backoff;
use event_bus::{peek_class, BusMessage, DlqRecord, EventClass, EventEnvelope, TRACE_ID_HEADER};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::actor::RequestContext;
use crate::clock::Clock;
use crate::config::KernelConfig;
use crate::consumer::Consumer;
use crate::dedup::DedupStore;
use crate::error::{KernelError, KernelResult};
use crate::flusher::OutboxFlusher;
use crate::publisher::DlqPublisher;

/// Service-side handler for one event type.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, ctx: &RequestContext, envelope: &EventEnvelope) -> KernelResult<()>;
}

/// Handlers keyed by `event_type`.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn EventHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, event_type: impl Into<String>, handler: Arc<dyn EventHandler>) -> Self {
        self.handlers.insert(event_type.into(), handler);
        self
    }

    pub fn get(&self, event_type: &str) -> Option<&Arc<dyn EventHandler>> {
        self.handlers.get(event_type)
    }

    pub fn event_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundOutcome {
    /// Handler succeeded and the event was marked
    Handled,
    /// Already handled within the dedup window
    Duplicate,
    /// Analytics event whose handler failed; logged and swallowed
    Dropped,
}

pub struct InboundProcessor {
    config: KernelConfig,
    dedup: Arc<dyn DedupStore>,
    handlers: HandlerRegistry,
    dlq: Arc<dyn DlqPublisher>,
    clock: Arc<dyn Clock>,
}

impl InboundProcessor {
    pub fn new(
        config: KernelConfig,
        dedup: Arc<dyn DedupStore>,
        handlers: HandlerRegistry,
        dlq: Arc<dyn DlqPublisher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            dedup,
            handlers,
            dlq,
            clock,
        }
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    /// Process one delivered message.
    ///
    /// Invalid envelopes fail with `InvalidEnvelope` before any handler runs;
    /// domain-class ones are dead-lettered first. Handler failures on domain
    /// events are dead-lettered and returned so the broker can redeliver.
    pub async fn process(&self, ctx: &RequestContext, msg: &BusMessage) -> KernelResult<InboundOutcome> {
        let envelope = match EventEnvelope::decode_validated(&msg.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                self.reject_invalid(msg, &e.to_string()).await;
                return Err(KernelError::InvalidEnvelope(e));
            }
        };

        let span = tracing::info_span!(
            "inbound_event",
            event_id = %envelope.event_id,
            event_type = %envelope.event_type,
            trace_id = %envelope.trace_id,
        );

        self.dispatch(ctx, msg, envelope).instrument(span).await
    }

    async fn dispatch(
        &self,
        ctx: &RequestContext,
        msg: &BusMessage,
        envelope: EventEnvelope,
    ) -> KernelResult<InboundOutcome> {
        if self.dedup.seen(&envelope.event_id, self.clock.now()).await? {
            tracing::info!("Duplicate event ignored (already processed)");
            return Ok(InboundOutcome::Duplicate);
        }

        if envelope.event_class == EventClass::Ops {
            return Err(KernelError::UnsupportedEventClass(envelope.event_class));
        }

        let handler = self
            .handlers
            .get(&envelope.event_type)
            .ok_or_else(|| KernelError::UnsupportedEventType(envelope.event_type.clone()))?
            .as_ref();

        let first_seen_at = self.clock.now();
        let context = format!("handle {}", envelope.event_type);
        let env = &envelope;
        let result = retry_with_backoff(
            move || handler.handle(ctx, env),
            &self.config.handler_retry,
            &context,
            ctx.cancel_token(),
        )
        .await;

        let exhausted = match result {
            Ok(()) => {
                let expires_at = self.clock.now() + self.config.event_dedup_ttl;
                self.dedup
                    .mark(&envelope.event_id, &envelope.event_type, expires_at)
                    .await?;
                tracing::debug!("Event processed");
                return Ok(InboundOutcome::Handled);
            }
            Err(exhausted) => exhausted,
        };

        if exhausted.cancelled {
            tracing::warn!(attempts = exhausted.attempts, "Handler retry cancelled; left for redelivery");
            return Err(exhausted.error);
        }

        if envelope.event_class == EventClass::AnalyticsOnly {
            tracing::warn!(
                attempts = exhausted.attempts,
                error = %exhausted.error,
                "Analytics event handler failed; dropping"
            );
            return Ok(InboundOutcome::Dropped);
        }

        let record = DlqRecord::new(
            envelope,
            exhausted.error.to_string(),
            self.config.dlq_topic.as_str(),
            self.clock.now(),
        )
        .with_source_topic(msg.subject.as_str())
        .with_history(exhausted.attempts, first_seen_at);
        self.publish_dlq(&record).await;

        Err(exhausted.error)
    }

    /// Dead-letter an invalid domain envelope when enough of it decodes.
    async fn reject_invalid(&self, msg: &BusMessage, error: &str) {
        match peek_class(&msg.payload) {
            Some(EventClass::Domain) => {}
            class => {
                tracing::debug!(subject = %msg.subject, ?class, error = %error, "Discarding invalid envelope");
                return;
            }
        }

        let envelope = match EventEnvelope::decode(&msg.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::error!(
                    subject = %msg.subject,
                    error = %e,
                    "Undecodable domain event; cannot dead-letter"
                );
                return;
            }
        };

        tracing::warn!(
            event_id = %envelope.event_id,
            event_type = %envelope.event_type,
            error = %error,
            "Rejecting invalid domain envelope"
        );

        let record = DlqRecord::new(envelope, error, self.config.dlq_topic.as_str(), self.clock.now())
            .with_source_topic(msg.subject.as_str());
        self.publish_dlq(&record).await;
    }

    async fn publish_dlq(&self, record: &DlqRecord) {
        if let Err(e) = self.dlq.publish(record).await {
            tracing::error!(
                event_id = %record.envelope.event_id,
                error = %e,
                "Failed to publish DLQ record"
            );
        }
    }

    /// Drop expired dedup entries
    pub async fn purge_dedup(&self) -> KernelResult<usize> {
        Ok(self.dedup.purge_expired(self.clock.now()).await?)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub received: usize,
    pub handled: usize,
    pub duplicates: usize,
    pub dropped: usize,
    pub failed: usize,
    pub purged: usize,
}

/// Polls a [`Consumer`] and feeds an [`InboundProcessor`].
pub struct InboundWorker {
    processor: Arc<InboundProcessor>,
    consumer: Arc<dyn Consumer>,
    flusher: Option<Arc<OutboxFlusher>>,
    poll_interval: std::time::Duration,
}

impl InboundWorker {
    pub fn new(
        processor: Arc<InboundProcessor>,
        consumer: Arc<dyn Consumer>,
        poll_interval: std::time::Duration,
    ) -> Self {
        Self {
            processor,
            consumer,
            flusher: None,
            poll_interval,
        }
    }

    /// Flush the outbox at the start of every tick
    pub fn with_flusher(mut self, flusher: Arc<OutboxFlusher>) -> Self {
        self.flusher = Some(flusher);
        self
    }

    /// One tick: optional flush, drain the consumer, purge the dedup window.
    pub async fn tick_once(&self, cancel: &CancellationToken) -> TickReport {
        let mut report = TickReport::default();

        if let Some(flusher) = &self.flusher {
            if let Err(e) = flusher.flush_once().await {
                tracing::warn!(error = %e, "Outbox flush during consumer tick failed");
            }
        }

        while !cancel.is_cancelled() {
            let msg = match self.consumer.receive(cancel).await {
                Ok(Some(msg)) => msg,
                Ok(None) => break,
                Err(e) => {
                    tracing::error!(error = %e, "Consumer receive failed");
                    break;
                }
            };
            report.received += 1;

            let ctx = RequestContext::new(msg.header(TRACE_ID_HEADER).unwrap_or_default())
                .with_cancel(cancel.child_token());

            match self.processor.process(&ctx, &msg).await {
                Ok(InboundOutcome::Handled) => report.handled += 1,
                Ok(InboundOutcome::Duplicate) => report.duplicates += 1,
                Ok(InboundOutcome::Dropped) => report.dropped += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::error!(subject = %msg.subject, error = %e, "Failed to process inbound event");
                }
            }
        }

        match self.processor.purge_dedup().await {
            Ok(purged) => report.purged = purged,
            Err(e) => tracing::warn!(error = %e, "Dedup purge failed"),
        }

        report
    }

    /// Tick until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            event_types = ?self.processor.handlers().event_types(),
            "Starting inbound worker"
        );

        loop {
            let report = self.tick_once(&cancel).await;
            if report.received > 0 {
                tracing::debug!(
                    received = report.received,
                    handled = report.handled,
                    duplicates = report.duplicates,
                    failed = report.failed,
                    "Inbound tick complete"
                );
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        tracing::info!("Inbound worker stopped");
    }
}
