//! Payout creation through the mutation kernel.

use chrono::{DateTime, Utc};
use mutation_kernel::{
    Actor, Clock, EffectOutcome, EventDraft, Kernel, KernelError, KernelResult, Mutation,
    MutationCoordinator, MutationResponse, RequestContext,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{
    CreatePayoutRequest, Payout, PayoutEventPayload, PayoutMethod, PayoutRequestedMetric,
    PayoutStatus,
};
use crate::store::PayoutStore;

/// Roles that may act on any user's payouts
pub const PRIVILEGED_ROLES: &[&str] = &["admin", "finance"];

/// Instant payouts cost 1.5%, rounded half up to the cent
const INSTANT_FEE_BPS: i64 = 150;

fn amount_too_large() -> KernelError {
    KernelError::InvalidInput("amount is too large".to_string())
}

pub fn fee_minor(method: PayoutMethod, amount_minor: i64) -> KernelResult<i64> {
    match method {
        PayoutMethod::Standard => Ok(0),
        PayoutMethod::Instant => amount_minor
            .checked_mul(INSTANT_FEE_BPS)
            .and_then(|bps| bps.checked_add(5_000))
            .map(|scaled| scaled / 10_000)
            .ok_or_else(amount_too_large),
    }
}

/// Convert a major-unit amount to cents. Amounts that do not fit in an
/// `i64` are rejected rather than saturated.
pub fn to_minor(amount: f64) -> KernelResult<i64> {
    if !amount.is_finite() || amount <= 0.0 {
        return Err(KernelError::InvalidInput(
            "amount must be a positive number".to_string(),
        ));
    }
    let minor = (amount * 100.0).round();
    if minor >= i64::MAX as f64 {
        return Err(amount_too_large());
    }
    Ok(minor as i64)
}

fn validate_currency(currency: &str) -> KernelResult<()> {
    if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_uppercase()) {
        return Err(KernelError::InvalidInput(format!(
            "currency must be an ISO 4217 code, got '{}'",
            currency
        )));
    }
    Ok(())
}

/// Amount and fee in cents, after checking ids, currency and amount.
fn price(
    user_id: &str,
    submission_id: &str,
    amount: f64,
    currency: &str,
    method: PayoutMethod,
) -> KernelResult<(i64, i64)> {
    if user_id.trim().is_empty() || submission_id.trim().is_empty() {
        return Err(KernelError::InvalidInput(
            "user_id and submission_id are required".to_string(),
        ));
    }
    validate_currency(currency)?;
    let amount_minor = to_minor(amount)?;
    let fee = fee_minor(method, amount_minor)?;
    Ok((amount_minor, fee))
}

/// Reject a request that could never produce a payout.
pub fn validate_request(request: &CreatePayoutRequest) -> KernelResult<()> {
    price(
        &request.user_id,
        &request.submission_id,
        request.amount,
        &request.currency,
        request.method,
    )
    .map(|_| ())
}

/// Build a payout with fee and net computed.
pub fn new_payout(
    user_id: &str,
    submission_id: &str,
    amount: f64,
    currency: &str,
    method: PayoutMethod,
    scheduled_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> KernelResult<Payout> {
    let (amount_minor, fee) = price(user_id, submission_id, amount, currency, method)?;

    Ok(Payout {
        payout_id: format!("po_{}", Uuid::new_v4().simple()),
        user_id: user_id.trim().to_string(),
        submission_id: submission_id.trim().to_string(),
        amount,
        amount_minor,
        fee_minor: fee,
        net_minor: amount_minor - fee,
        currency: currency.to_string(),
        method,
        status: PayoutStatus::Scheduled,
        scheduled_at,
        created_at: now,
        paid_at: None,
        source_event_id: None,
    })
}

pub struct PayoutService {
    coordinator: MutationCoordinator,
    store: Arc<dyn PayoutStore>,
    clock: Arc<dyn Clock>,
}

impl PayoutService {
    pub fn new(kernel: &Kernel, store: Arc<dyn PayoutStore>) -> Self {
        Self {
            coordinator: kernel.coordinator(),
            store,
            clock: kernel.clock(),
        }
    }

    pub fn store(&self) -> &Arc<dyn PayoutStore> {
        &self.store
    }

    /// Create and settle a payout. Retries with the same key replay the
    /// original payout. Invalid requests fail before the key is reserved.
    pub async fn create_payout(
        &self,
        ctx: &RequestContext,
        actor: &Actor,
        request: CreatePayoutRequest,
    ) -> KernelResult<MutationResponse<Payout>> {
        validate_request(&request)?;
        let owner = request.user_id.clone();
        let mutation = Mutation::new("payout.create", actor, &request)?
            .authorize(move |a| a.require_self_or_role(&owner, PRIVILEGED_ROLES));

        self.coordinator
            .execute(ctx, mutation, || self.pay(request))
            .await
    }

    async fn pay(&self, request: CreatePayoutRequest) -> KernelResult<EffectOutcome<Payout>> {
        let now = self.clock.now();
        let mut payout = new_payout(
            &request.user_id,
            &request.submission_id,
            request.amount,
            &request.currency,
            request.method,
            request.scheduled_at,
            now,
        )?;
        payout.status = PayoutStatus::Paid;
        payout.paid_at = Some(now);

        self.store.insert(payout.clone()).await?;

        tracing::info!(
            payout_id = %payout.payout_id,
            user_id = %payout.user_id,
            amount_minor = payout.amount_minor,
            "Payout paid"
        );

        let paid = EventDraft::domain("payout.paid", "payout_id", &PayoutEventPayload::from(&payout))?;
        let metric = EventDraft::analytics(
            "payout.requested",
            "user_id",
            &PayoutRequestedMetric {
                user_id: payout.user_id.clone(),
                method: payout.method,
                amount_minor: payout.amount_minor,
            },
        )?;

        Ok(EffectOutcome::created(payout).with_event(paid).with_event(metric))
    }

    pub async fn get_payout(&self, actor: &Actor, payout_id: &str) -> KernelResult<Payout> {
        actor.require_subject()?;
        let payout = self
            .store
            .get(payout_id)
            .await?
            .ok_or_else(|| KernelError::NotFound(format!("payout '{}'", payout_id)))?;
        actor.require_self_or_role(&payout.user_id, PRIVILEGED_ROLES)?;
        Ok(payout)
    }
}
