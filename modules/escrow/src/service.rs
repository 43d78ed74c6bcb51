//! Escrow holds and releases through the mutation kernel.

use mutation_kernel::{
    Actor, Clock, EffectOutcome, EventDraft, Kernel, KernelError, KernelResult, Mutation,
    MutationCoordinator, MutationResponse, RequestContext,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{
    Escrow, EscrowStatus, HoldCreatedPayload, HoldRequest, ReleasePayload, ReleaseRequest,
    ReleaseResult,
};
use crate::store::{EscrowStore, ReleaseError};

/// Roles allowed to move campaign funds
pub const TREASURY_ROLES: &[&str] = &["admin", "finance", "brand"];

impl From<ReleaseError> for KernelError {
    fn from(e: ReleaseError) -> Self {
        match e {
            ReleaseError::NotFound(id) => KernelError::NotFound(format!("escrow '{}'", id)),
            ReleaseError::InsufficientBalance { .. } => KernelError::Conflict(e.to_string()),
            ReleaseError::Store(e) => e.into(),
        }
    }
}

fn require_positive(amount: i64) -> KernelResult<()> {
    if amount <= 0 {
        return Err(KernelError::InvalidInput(
            "amount must be positive".to_string(),
        ));
    }
    Ok(())
}

pub struct EscrowService {
    coordinator: MutationCoordinator,
    store: Arc<dyn EscrowStore>,
    clock: Arc<dyn Clock>,
}

impl EscrowService {
    pub fn new(kernel: &Kernel, store: Arc<dyn EscrowStore>) -> Self {
        Self {
            coordinator: kernel.coordinator(),
            store,
            clock: kernel.clock(),
        }
    }

    /// Place funds on hold for a creator.
    pub async fn hold(
        &self,
        ctx: &RequestContext,
        actor: &Actor,
        request: HoldRequest,
    ) -> KernelResult<MutationResponse<Escrow>> {
        require_positive(request.amount)?;
        if request.campaign_id.trim().is_empty() || request.creator_id.trim().is_empty() {
            return Err(KernelError::InvalidInput(
                "campaign_id and creator_id are required".to_string(),
            ));
        }
        let mutation = Mutation::new("escrow.hold", actor, &request)?.allow_roles(TREASURY_ROLES);

        self.coordinator
            .execute(ctx, mutation, || async move {
                let now = self.clock.now();
                let escrow = Escrow {
                    escrow_id: format!("esc_{}", Uuid::new_v4().simple()),
                    campaign_id: request.campaign_id,
                    creator_id: request.creator_id,
                    amount: request.amount,
                    released: 0,
                    status: EscrowStatus::Held,
                    created_at: now,
                    updated_at: now,
                };
                self.store.insert(escrow.clone()).await?;

                tracing::info!(
                    escrow_id = %escrow.escrow_id,
                    campaign_id = %escrow.campaign_id,
                    amount = escrow.amount,
                    "Escrow hold created"
                );

                let event = EventDraft::domain(
                    "escrow.hold_created",
                    "escrow_id",
                    &HoldCreatedPayload {
                        escrow_id: escrow.escrow_id.clone(),
                        campaign_id: escrow.campaign_id.clone(),
                        creator_id: escrow.creator_id.clone(),
                        amount: escrow.amount,
                    },
                )?;
                Ok::<_, KernelError>(EffectOutcome::created(escrow).with_event(event))
            })
            .await
    }

    /// Release part or all of a hold. Emits `escrow.partial_release` while a
    /// balance remains and `escrow.released` once it reaches zero.
    pub async fn release(
        &self,
        ctx: &RequestContext,
        actor: &Actor,
        request: ReleaseRequest,
    ) -> KernelResult<MutationResponse<ReleaseResult>> {
        require_positive(request.amount)?;
        let mutation =
            Mutation::new("escrow.release", actor, &request)?.allow_roles(TREASURY_ROLES);

        self.coordinator
            .execute(ctx, mutation, || async move {
                let escrow = self
                    .store
                    .release(&request.escrow_id, request.amount, self.clock.now())
                    .await?;

                let remaining = escrow.remaining();
                let event_type = if remaining == 0 {
                    "escrow.released"
                } else {
                    "escrow.partial_release"
                };

                tracing::info!(
                    escrow_id = %escrow.escrow_id,
                    released = request.amount,
                    remaining,
                    "Escrow released"
                );

                let event = EventDraft::domain(
                    event_type,
                    "escrow_id",
                    &ReleasePayload {
                        escrow_id: escrow.escrow_id.clone(),
                        campaign_id: escrow.campaign_id.clone(),
                        creator_id: escrow.creator_id.clone(),
                        released: request.amount,
                        remaining,
                    },
                )?;
                Ok::<_, KernelError>(EffectOutcome::new(ReleaseResult {
                    escrow,
                    released_now: request.amount,
                })
                .with_event(event))
            })
            .await
    }

    pub async fn get(&self, actor: &Actor, escrow_id: &str) -> KernelResult<Escrow> {
        actor.require_subject()?;
        let escrow = self
            .store
            .get(escrow_id)
            .await?
            .ok_or_else(|| KernelError::NotFound(format!("escrow '{}'", escrow_id)))?;
        actor.require_self_or_role(&escrow.creator_id, TREASURY_ROLES)?;
        Ok(escrow)
    }
}
