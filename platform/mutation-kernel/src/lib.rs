//! # Mutation Kernel
//!
//! Exactly-once-effect request handling and reliable event emission for the
//! services of the fleet.
//!
//! - [`IdempotencyStore`]: caller keys make mutating requests retryable; a
//!   retry gets the original response bytes, a retry with a different payload
//!   is refused.
//! - [`DedupStore`]: inbound events are handled at most once per `event_id`
//!   inside a bounded window.
//! - [`Outbox`]: events are recorded with the state change that produced them
//!   and drained in order by the [`OutboxFlusher`], with dead-letter fallback.
//! - [`MutationCoordinator`]: runs one request through guard, hash, replay,
//!   reserve, effect, enqueue and complete.
//!
//! In-memory adapters ship by default; Postgres adapters sit behind the
//! `postgres` feature.
//!
//! ```rust,no_run
//! use mutation_kernel::{
//!     Actor, EffectOutcome, EventDraft, Kernel, KernelConfig, KernelError, Mutation,
//!     RequestContext,
//! };
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let kernel = Kernel::builder(KernelConfig::new("escrow")?).build();
//! let coordinator = kernel.coordinator();
//!
//! let actor = Actor::new("user_1", "creator").with_idempotency_key("idem-hold-1");
//! let input = json!({"campaign_id": "camp_1", "amount": 100});
//! let mutation = Mutation::new("escrow.hold", &actor, &input)?;
//!
//! let response = coordinator
//!     .execute(&RequestContext::background(), mutation, || async {
//!         let hold = json!({"escrow_id": "esc_1", "amount": 100});
//!         let event = EventDraft::domain("escrow.hold_created", "escrow_id", &hold)?;
//!         Ok::<_, KernelError>(EffectOutcome::created(hold).with_event(event))
//!     })
//!     .await?;
//!
//! assert!(!response.replayed);
//! kernel.flusher().flush_once().await?;
//! # Ok(())
//! # }
//! ```

pub mod actor;
pub mod clock;
pub mod config;
pub mod consumer;
pub mod coordinator;
pub mod dedup;
pub mod error;
pub mod flusher;
pub mod idempotency;
pub mod inbound;
pub mod kernel;
pub mod outbox;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod publisher;
pub mod runtime;

pub use event_bus::{EventClass, EventEnvelope};

pub use actor::{Actor, RequestContext};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{InFlightPolicy, KernelConfig};
pub use consumer::{BusConsumer, Consumer, InMemoryConsumer};
pub use coordinator::{CommitLock, EffectOutcome, EventDraft, Mutation, MutationCoordinator, MutationResponse};
pub use dedup::{DedupRecord, DedupStore, InMemoryDedupStore};
pub use error::{KernelError, KernelResult, StoreError};
pub use flusher::{FlushReport, OutboxFlusher};
pub use idempotency::{IdempotencyRecord, IdempotencyStore, InMemoryIdempotencyStore, ReserveOutcome};
pub use inbound::{
    EventHandler, HandlerRegistry, InboundOutcome, InboundProcessor, InboundWorker, TickReport,
};
pub use kernel::{Kernel, KernelBuilder};
pub use outbox::{InMemoryOutbox, Outbox, OutboxRecord};
pub use publisher::{BusDlqPublisher, BusPublisher, DlqPublisher, EnvelopePublisher};
pub use runtime::KernelRuntime;
