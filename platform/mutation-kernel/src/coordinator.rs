//! Mutation coordinator
//!
//! Runs one mutating request through the idempotency protocol:
//!
//! 1. guard the actor
//! 2. hash the canonical form of the request
//! 3. replay a completed response, or refuse a conflicting one
//! 4. reserve the key
//! 5. run the business effect
//! 6. build, validate and enqueue the effect's events
//! 7. cache the serialized response
//! 8. return it
//!
//! Steps 5 and 6 run under the service's commit lock, so outbox order
//! matches the order in which effects commit.
//!
//! Nothing here publishes. Enqueued events leave through the
//! [`OutboxFlusher`](crate::flusher::OutboxFlusher).

use chrono::{DateTime, Utc};
use event_bus::canonical::hash_serializable;
use event_bus::{stringify_scalar, EventClass, EventEnvelope, PARTITION_PATH_PREFIX};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::actor::{Actor, RequestContext};
use crate::clock::Clock;
use crate::config::{InFlightPolicy, KernelConfig};
use crate::error::{KernelError, KernelResult};
use crate::idempotency::{IdempotencyRecord, IdempotencyStore, ReserveOutcome};
use crate::outbox::{Outbox, OutboxRecord};

/// An event the business effect wants emitted.
///
/// The coordinator turns it into a full envelope: the partition key is read
/// from `data.<partition_field>`.
#[derive(Debug, Clone, PartialEq)]
pub struct EventDraft {
    pub event_type: String,
    pub event_class: EventClass,
    pub partition_field: String,
    pub data: Value,
    pub occurred_at: Option<DateTime<Utc>>,
}

impl EventDraft {
    pub fn new(
        event_type: impl Into<String>,
        event_class: EventClass,
        partition_field: impl Into<String>,
        data: &impl Serialize,
    ) -> KernelResult<Self> {
        Ok(Self {
            event_type: event_type.into(),
            event_class,
            partition_field: partition_field.into(),
            data: serde_json::to_value(data)?,
            occurred_at: None,
        })
    }

    pub fn domain(
        event_type: impl Into<String>,
        partition_field: impl Into<String>,
        data: &impl Serialize,
    ) -> KernelResult<Self> {
        Self::new(event_type, EventClass::Domain, partition_field, data)
    }

    pub fn analytics(
        event_type: impl Into<String>,
        partition_field: impl Into<String>,
        data: &impl Serialize,
    ) -> KernelResult<Self> {
        Self::new(event_type, EventClass::AnalyticsOnly, partition_field, data)
    }

    pub fn with_occurred_at(mut self, at: DateTime<Utc>) -> Self {
        self.occurred_at = Some(at);
        self
    }

    /// Build and validate the envelope. Fails closed.
    pub fn into_envelope(
        self,
        config: &KernelConfig,
        trace_id: &str,
        now: DateTime<Utc>,
    ) -> KernelResult<EventEnvelope> {
        let partition_key = self
            .data
            .get(&self.partition_field)
            .and_then(stringify_scalar)
            .unwrap_or_default();

        let envelope = EventEnvelope::build(
            self.event_type,
            self.event_class,
            self.data,
            partition_key,
            format!("{}{}", PARTITION_PATH_PREFIX, self.partition_field),
            trace_id,
            config.schema_version.as_str(),
            config.service_name.as_str(),
            self.occurred_at.unwrap_or(now),
        );
        envelope.validate()?;
        Ok(envelope)
    }
}

/// What the business effect produced.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectOutcome<T> {
    pub response: T,
    pub status_code: u16,
    pub events: Vec<EventDraft>,
}

impl<T> EffectOutcome<T> {
    pub fn new(response: T) -> Self {
        Self {
            response,
            status_code: 200,
            events: Vec::new(),
        }
    }

    pub fn created(response: T) -> Self {
        Self::new(response).with_status(201)
    }

    pub fn with_status(mut self, status_code: u16) -> Self {
        self.status_code = status_code;
        self
    }

    pub fn with_event(mut self, event: EventDraft) -> Self {
        self.events.push(event);
        self
    }

    pub fn with_events(mut self, events: impl IntoIterator<Item = EventDraft>) -> Self {
        self.events.extend(events);
        self
    }
}

/// Result of a mutation, fresh or replayed.
///
/// `body` holds the exact bytes cached in the idempotency store; hosts should
/// write them to the wire instead of re-serializing `value`.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationResponse<T> {
    pub value: T,
    pub status_code: u16,
    pub body: Vec<u8>,
    pub replayed: bool,
}

type AuthorizeFn = Box<dyn FnOnce(&Actor) -> KernelResult<()> + Send + Sync>;

/// Description of one mutating request.
pub struct Mutation {
    operation: String,
    actor: Actor,
    request: Value,
    allowed_roles: Vec<String>,
    authorize: Option<AuthorizeFn>,
    key_required: bool,
}

impl Mutation {
    /// `request` is the semantic input hashed for idempotency. It should not
    /// include transport details such as the request id.
    pub fn new(
        operation: impl Into<String>,
        actor: &Actor,
        request: &impl Serialize,
    ) -> KernelResult<Self> {
        Ok(Self {
            operation: operation.into(),
            actor: actor.clone(),
            request: serde_json::to_value(request)?,
            allowed_roles: Vec::new(),
            authorize: None,
            key_required: true,
        })
    }

    /// Only these roles may run the mutation
    pub fn allow_roles(mut self, roles: &[&str]) -> Self {
        self.allowed_roles = roles.iter().map(|r| r.to_string()).collect();
        self
    }

    /// Host-specific authorization, run after the role check
    pub fn authorize(
        mut self,
        check: impl FnOnce(&Actor) -> KernelResult<()> + Send + Sync + 'static,
    ) -> Self {
        self.authorize = Some(Box::new(check));
        self
    }

    /// Run without idempotency when the caller sent no key
    pub fn key_optional(mut self) -> Self {
        self.key_required = false;
        self
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    fn guard(&mut self) -> KernelResult<()> {
        self.actor.require_subject()?;
        if self.key_required {
            self.actor.require_idempotency_key()?;
        }
        if !self.allowed_roles.is_empty() {
            let roles: Vec<&str> = self.allowed_roles.iter().map(String::as_str).collect();
            self.actor.require_role(&roles)?;
        }
        if let Some(check) = self.authorize.take() {
            check(&self.actor)?;
        }
        Ok(())
    }

    /// SHA-256 over the canonical form of `{operation, request}`
    pub fn request_hash(&self) -> KernelResult<String> {
        Ok(hash_serializable(&json!({
            "operation": self.operation,
            "request": self.request,
        }))?)
    }

    /// Store key, scoped to the subject so callers cannot collide
    pub fn scoped_key(&self) -> String {
        format!(
            "{}:{}",
            self.actor.subject_id.trim(),
            self.actor.idempotency_key.trim()
        )
    }
}

/// Serializes effect-plus-enqueue across every coordinator that shares it.
pub type CommitLock = Arc<Mutex<()>>;

pub struct MutationCoordinator {
    config: KernelConfig,
    idempotency: Arc<dyn IdempotencyStore>,
    outbox: Arc<dyn Outbox>,
    clock: Arc<dyn Clock>,
    commit_lock: CommitLock,
}

impl MutationCoordinator {
    pub fn new(
        config: KernelConfig,
        idempotency: Arc<dyn IdempotencyStore>,
        outbox: Arc<dyn Outbox>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            idempotency,
            outbox,
            clock,
            commit_lock: CommitLock::default(),
        }
    }

    /// Share a commit lock with other coordinators of the same service.
    pub fn with_commit_lock(mut self, commit_lock: CommitLock) -> Self {
        self.commit_lock = commit_lock;
        self
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn outbox(&self) -> &Arc<dyn Outbox> {
        &self.outbox
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Run `effect` at most once per (subject, idempotency key) within the TTL.
    ///
    /// Errors from `effect` abort the mutation and leave the reservation to
    /// expire. Events are enqueued before the response is cached; a failure
    /// to cache is logged and the fresh response is still returned.
    pub async fn execute<T, F, Fut>(
        &self,
        ctx: &RequestContext,
        mut mutation: Mutation,
        effect: F,
    ) -> KernelResult<MutationResponse<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = KernelResult<EffectOutcome<T>>>,
    {
        mutation.guard()?;

        if mutation.actor.idempotency_key.trim().is_empty() {
            ctx.check()?;
            let (response, _) = self.run_effect(ctx, &mutation, effect).await?;
            return Ok(response);
        }

        let request_hash = mutation.request_hash()?;
        let key = mutation.scoped_key();

        let now = self.clock.now();
        if let Some(record) = self.idempotency.get(&key, now).await? {
            return self.resolve_existing(ctx, &key, &request_hash, record).await;
        }

        ctx.check()?;

        let expires_at = now + self.config.idempotency_ttl;
        match self
            .idempotency
            .reserve(&key, &request_hash, now, expires_at)
            .await?
        {
            ReserveOutcome::Reserved => {}
            ReserveOutcome::AlreadyReserved => {
                return self.wait_for_completion(ctx, &key, &request_hash).await;
            }
        }

        ctx.check()?;

        let (response, record_count) = self.run_effect(ctx, &mutation, effect).await?;

        if let Err(e) = self
            .idempotency
            .complete(&key, response.status_code, &response.body, self.clock.now())
            .await
        {
            tracing::warn!(
                operation = %mutation.operation,
                idempotency_key = %key,
                error = %e,
                "Failed to cache mutation response; replays will see the reservation"
            );
        }

        tracing::info!(
            operation = %mutation.operation,
            idempotency_key = %key,
            request_id = %ctx.request_id,
            status_code = response.status_code,
            events = record_count,
            "Mutation completed"
        );

        Ok(response)
    }

    /// Steps 5 and 6: effect, then envelopes into the outbox.
    ///
    /// Both happen while the commit lock is held.
    async fn run_effect<T, F, Fut>(
        &self,
        ctx: &RequestContext,
        mutation: &Mutation,
        effect: F,
    ) -> KernelResult<(MutationResponse<T>, usize)>
    where
        T: Serialize,
        F: FnOnce() -> Fut,
        Fut: Future<Output = KernelResult<EffectOutcome<T>>>,
    {
        let _commit = self.commit_lock.lock().await;

        let outcome = match effect().await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(
                    operation = %mutation.operation,
                    request_id = %ctx.request_id,
                    error = %e,
                    "Mutation effect failed"
                );
                return Err(e);
            }
        };

        let now = self.clock.now();
        let mut records = Vec::with_capacity(outcome.events.len());
        for draft in outcome.events {
            let envelope = draft.into_envelope(&self.config, &ctx.request_id, now)?;
            records.push(OutboxRecord::new(envelope, now));
        }
        let record_count = records.len();

        if !records.is_empty() {
            if let Err(e) = self.outbox.enqueue_batch(records).await {
                tracing::error!(
                    operation = %mutation.operation,
                    request_id = %ctx.request_id,
                    error = %e,
                    "Failed to enqueue events after effect committed"
                );
                return Err(e.into());
            }
        }

        let body = serde_json::to_vec(&outcome.response)?;
        Ok((
            MutationResponse {
                value: outcome.response,
                status_code: outcome.status_code,
                body,
                replayed: false,
            },
            record_count,
        ))
    }

    async fn resolve_existing<T: DeserializeOwned>(
        &self,
        ctx: &RequestContext,
        key: &str,
        request_hash: &str,
        record: IdempotencyRecord,
    ) -> KernelResult<MutationResponse<T>> {
        if record.request_hash != request_hash {
            tracing::warn!(idempotency_key = %key, "Idempotency key reused with a different request");
            return Err(KernelError::IdempotencyConflict);
        }
        if record.is_completed() {
            tracing::debug!(idempotency_key = %key, "Replaying cached response");
            return replay(record);
        }
        self.wait_for_completion(ctx, key, request_hash).await
    }

    /// The key is reserved by a request that has not completed yet.
    async fn wait_for_completion<T: DeserializeOwned>(
        &self,
        ctx: &RequestContext,
        key: &str,
        request_hash: &str,
    ) -> KernelResult<MutationResponse<T>> {
        let (attempts, interval) = match self.config.in_flight_policy {
            InFlightPolicy::Reject => return Err(KernelError::RequestInFlight),
            InFlightPolicy::WaitAndRetry { attempts, interval } => (attempts, interval),
        };

        for _ in 0..attempts {
            tokio::select! {
                _ = ctx.cancel_token().cancelled() => return Err(KernelError::Cancelled),
                _ = tokio::time::sleep(interval) => {}
            }

            match self.idempotency.get(key, self.clock.now()).await? {
                Some(record) if record.request_hash != request_hash => {
                    return Err(KernelError::IdempotencyConflict);
                }
                Some(record) if record.is_completed() => return replay(record),
                Some(_) => continue,
                None => break,
            }
        }

        tracing::debug!(idempotency_key = %key, attempts, "Request still in flight");
        Err(KernelError::RequestInFlight)
    }
}

fn replay<T: DeserializeOwned>(record: IdempotencyRecord) -> KernelResult<MutationResponse<T>> {
    let value = serde_json::from_slice(&record.response_body)?;
    Ok(MutationResponse {
        value,
        status_code: record.response_code,
        body: record.response_body,
        replayed: true,
    })
}
