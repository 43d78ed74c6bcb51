//! Outbox flusher: drains pending records to the class-appropriate publisher.
//!
//! Records drain strictly in insertion order. A domain record that fails to
//! publish is dead-lettered and halts the batch, so it blocks every record
//! behind it until it ships.

use event_bus::{DlqRecord, EventClass};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::config::KernelConfig;
use crate::error::{KernelError, KernelResult};
use crate::outbox::{Outbox, OutboxRecord};
use crate::publisher::{DlqPublisher, EnvelopePublisher};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Records published and marked sent
    pub published: usize,
    /// Analytics records whose publish failed; marked sent anyway
    pub dropped: usize,
}

impl FlushReport {
    pub fn is_empty(&self) -> bool {
        self.published == 0 && self.dropped == 0
    }
}

pub struct OutboxFlusher {
    outbox: Arc<dyn Outbox>,
    domain: Arc<dyn EnvelopePublisher>,
    analytics: Arc<dyn EnvelopePublisher>,
    dlq: Arc<dyn DlqPublisher>,
    clock: Arc<dyn Clock>,
    batch_size: usize,
    dlq_topic: String,
    interval: Duration,
}

impl OutboxFlusher {
    pub fn new(
        config: &KernelConfig,
        outbox: Arc<dyn Outbox>,
        domain: Arc<dyn EnvelopePublisher>,
        analytics: Arc<dyn EnvelopePublisher>,
        dlq: Arc<dyn DlqPublisher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            outbox,
            domain,
            analytics,
            dlq,
            clock,
            batch_size: config.flush_batch(),
            dlq_topic: config.dlq_topic.clone(),
            interval: config.outbox_flush_interval,
        }
    }

    /// Publish one batch of pending records.
    ///
    /// Returns an error, after dead-lettering the record, when a domain
    /// publish fails; and `UnsupportedEventClass` on an `ops` record.
    pub async fn flush_once(&self) -> KernelResult<FlushReport> {
        let pending = self.outbox.list_pending(self.batch_size).await?;
        let mut report = FlushReport::default();

        for record in pending {
            match record.event_class {
                EventClass::Domain => {
                    if let Err(e) = self.domain.publish(&record.envelope).await {
                        return Err(self.dead_letter(&record, &e.to_string()).await);
                    }
                    report.published += 1;
                }
                EventClass::AnalyticsOnly => match self.analytics.publish(&record.envelope).await {
                    Ok(()) => report.published += 1,
                    Err(e) => {
                        tracing::warn!(
                            record_id = %record.record_id,
                            event_id = %record.envelope.event_id,
                            event_type = %record.envelope.event_type,
                            error = %e,
                            "Dropping analytics event after publish failure"
                        );
                        report.dropped += 1;
                    }
                },
                EventClass::Ops => {
                    tracing::error!(
                        record_id = %record.record_id,
                        event_type = %record.envelope.event_type,
                        "Outbox holds an ops-class record; halting batch"
                    );
                    return Err(KernelError::UnsupportedEventClass(record.event_class));
                }
            }

            self.outbox
                .mark_sent(&record.record_id, self.clock.now())
                .await?;
        }

        Ok(report)
    }

    async fn dead_letter(&self, record: &OutboxRecord, error: &str) -> KernelError {
        let now = self.clock.now();

        let (attempts, first_failed_at) = match self
            .outbox
            .record_failure(&record.record_id, error, now)
            .await
        {
            Ok(updated) => (updated.attempts, updated.first_failed_at.unwrap_or(now)),
            Err(e) => {
                tracing::error!(
                    record_id = %record.record_id,
                    error = %e,
                    "Failed to record publish failure"
                );
                (record.attempts + 1, record.first_failed_at.unwrap_or(now))
            }
        };

        let dlq_record = DlqRecord::new(record.envelope.clone(), error, self.dlq_topic.as_str(), now)
            .with_history(attempts, first_failed_at);

        if let Err(e) = self.dlq.publish(&dlq_record).await {
            tracing::error!(
                record_id = %record.record_id,
                event_id = %record.envelope.event_id,
                error = %e,
                "Failed to publish DLQ record"
            );
        }

        tracing::error!(
            record_id = %record.record_id,
            event_id = %record.envelope.event_id,
            event_type = %record.envelope.event_type,
            attempts,
            error = %error,
            "Domain event publish failed; batch halted"
        );

        KernelError::Publish(format!(
            "outbox record {} ({}): {}",
            record.record_id, record.envelope.event_type, error
        ))
    }

    /// Flush on every tick until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(
            interval_ms = self.interval.as_millis() as u64,
            batch_size = self.batch_size,
            "Starting outbox flusher"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.flush_once().await {
                Ok(report) if !report.is_empty() => {
                    tracing::debug!(
                        published = report.published,
                        dropped = report.dropped,
                        "Flushed outbox batch"
                    );
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "Outbox flush failed"),
            }
        }

        tracing::info!("Outbox flusher stopped");
    }
}
