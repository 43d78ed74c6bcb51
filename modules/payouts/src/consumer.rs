//! Inbound reward events.
//!
//! `reward.payout_eligible` schedules a standard payout for the submission.
//! Dedup in the kernel covers redelivery; the handler is additionally keyed
//! on the source event so a retried attempt never books a second payout.

use async_trait::async_trait;
use chrono::Duration;
use event_bus::EventEnvelope;
use mutation_kernel::{
    Clock, CommitLock, EventDraft, EventHandler, HandlerRegistry, Kernel, KernelConfig, KernelError,
    KernelResult, Outbox, OutboxRecord, RequestContext, StoreError,
};
use std::sync::Arc;

use crate::models::{PayoutEligiblePayload, PayoutEventPayload, PayoutMethod};
use crate::service::new_payout;
use crate::store::PayoutStore;

pub const PAYOUT_ELIGIBLE: &str = "reward.payout_eligible";

/// Eligible payouts settle on the next business cycle
const SCHEDULE_DELAY_HOURS: i64 = 24;

pub struct PayoutEligibleHandler {
    config: KernelConfig,
    store: Arc<dyn PayoutStore>,
    outbox: Arc<dyn Outbox>,
    clock: Arc<dyn Clock>,
    commit_lock: CommitLock,
}

impl PayoutEligibleHandler {
    pub fn new(kernel: &Kernel, store: Arc<dyn PayoutStore>) -> Self {
        Self {
            config: kernel.config().clone(),
            store,
            outbox: kernel.outbox(),
            clock: kernel.clock(),
            commit_lock: kernel.commit_lock(),
        }
    }
}

#[async_trait]
impl EventHandler for PayoutEligibleHandler {
    async fn handle(&self, _ctx: &RequestContext, envelope: &EventEnvelope) -> KernelResult<()> {
        let payload: PayoutEligiblePayload = serde_json::from_value(envelope.data.clone())
            .map_err(|e| KernelError::InvalidInput(format!("bad {} payload: {}", PAYOUT_ELIGIBLE, e)))?;

        let _commit = self.commit_lock.lock().await;

        let payout = match self.store.find_by_source_event(&envelope.event_id).await? {
            Some(existing) => existing,
            None => {
                let now = self.clock.now();
                let mut payout = new_payout(
                    &payload.user_id,
                    &payload.submission_id,
                    payload.gross_amount,
                    &payload.currency,
                    PayoutMethod::Standard,
                    now + Duration::hours(SCHEDULE_DELAY_HOURS),
                    now,
                )?;
                payout.source_event_id = Some(envelope.event_id.clone());
                self.store.insert(payout.clone()).await?;
                payout
            }
        };

        let envelope_out = EventDraft::domain(
            "payout.scheduled",
            "payout_id",
            &PayoutEventPayload::from(&payout),
        )?
        .into_envelope(&self.config, &envelope.trace_id, self.clock.now())?;

        // One scheduled event per payout; a retry after a partial failure
        // finds the record already queued.
        let mut record = OutboxRecord::new(envelope_out, self.clock.now());
        record.record_id = format!("payout.scheduled:{}", payout.payout_id);
        match self.outbox.enqueue(record).await {
            Ok(()) | Err(StoreError::Conflict(_)) => {}
            Err(e) => return Err(e.into()),
        }

        tracing::info!(
            payout_id = %payout.payout_id,
            submission_id = %payout.submission_id,
            source_event_id = %envelope.event_id,
            "Payout scheduled"
        );
        Ok(())
    }
}

pub fn handlers(kernel: &Kernel, store: Arc<dyn PayoutStore>) -> HandlerRegistry {
    HandlerRegistry::new().register(
        PAYOUT_ELIGIBLE,
        Arc::new(PayoutEligibleHandler::new(kernel, store)),
    )
}
