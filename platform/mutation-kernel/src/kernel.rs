//! Wiring: one [`Kernel`] per service bundles the stores, publishers and
//! clock, and hands out the coordinator, flusher and inbound processor.

use event_bus::{EventBus, InMemoryBus};
use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::config::KernelConfig;
use crate::consumer::Consumer;
use crate::coordinator::{CommitLock, MutationCoordinator};
use crate::dedup::{DedupStore, InMemoryDedupStore};
use crate::flusher::OutboxFlusher;
use crate::idempotency::{IdempotencyStore, InMemoryIdempotencyStore};
use crate::inbound::{HandlerRegistry, InboundProcessor, InboundWorker};
use crate::outbox::{InMemoryOutbox, Outbox};
use crate::publisher::{BusDlqPublisher, BusPublisher, DlqPublisher, EnvelopePublisher};
use crate::runtime::KernelRuntime;

#[derive(Clone)]
pub struct Kernel {
    config: KernelConfig,
    idempotency: Arc<dyn IdempotencyStore>,
    dedup: Arc<dyn DedupStore>,
    outbox: Arc<dyn Outbox>,
    domain: Arc<dyn EnvelopePublisher>,
    analytics: Arc<dyn EnvelopePublisher>,
    dlq: Arc<dyn DlqPublisher>,
    clock: Arc<dyn Clock>,
    commit_lock: CommitLock,
}

impl Kernel {
    pub fn builder(config: KernelConfig) -> KernelBuilder {
        KernelBuilder::new(config)
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn idempotency(&self) -> Arc<dyn IdempotencyStore> {
        self.idempotency.clone()
    }

    pub fn dedup(&self) -> Arc<dyn DedupStore> {
        self.dedup.clone()
    }

    pub fn outbox(&self) -> Arc<dyn Outbox> {
        self.outbox.clone()
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    /// Held by every coordinator from this kernel while an effect commits
    /// and enqueues. Inbound handlers that write domain state and enqueue
    /// events take it too.
    pub fn commit_lock(&self) -> CommitLock {
        self.commit_lock.clone()
    }

    pub fn coordinator(&self) -> MutationCoordinator {
        MutationCoordinator::new(
            self.config.clone(),
            self.idempotency.clone(),
            self.outbox.clone(),
            self.clock.clone(),
        )
        .with_commit_lock(self.commit_lock.clone())
    }

    pub fn flusher(&self) -> OutboxFlusher {
        OutboxFlusher::new(
            &self.config,
            self.outbox.clone(),
            self.domain.clone(),
            self.analytics.clone(),
            self.dlq.clone(),
            self.clock.clone(),
        )
    }

    pub fn inbound_processor(&self, handlers: HandlerRegistry) -> InboundProcessor {
        InboundProcessor::new(
            self.config.clone(),
            self.dedup.clone(),
            handlers,
            self.dlq.clone(),
            self.clock.clone(),
        )
    }

    /// Spawn the background flusher and, when given, the inbound worker.
    pub fn start(&self, inbound: Option<(HandlerRegistry, Arc<dyn Consumer>)>) -> KernelRuntime {
        let flusher = Arc::new(self.flusher());

        let worker = inbound.map(|(handlers, consumer)| {
            let processor = Arc::new(self.inbound_processor(handlers));
            let worker =
                InboundWorker::new(processor, consumer, self.config.consumer_poll_interval);
            let worker = if self.config.flush_in_consumer_tick {
                worker.with_flusher(flusher.clone())
            } else {
                worker
            };
            Arc::new(worker)
        });

        KernelRuntime::start(flusher, worker)
    }
}

pub struct KernelBuilder {
    config: KernelConfig,
    idempotency: Option<Arc<dyn IdempotencyStore>>,
    dedup: Option<Arc<dyn DedupStore>>,
    outbox: Option<Arc<dyn Outbox>>,
    bus: Option<Arc<dyn EventBus>>,
    publishers: Option<(
        Arc<dyn EnvelopePublisher>,
        Arc<dyn EnvelopePublisher>,
        Arc<dyn DlqPublisher>,
    )>,
    clock: Option<Arc<dyn Clock>>,
}

impl KernelBuilder {
    pub fn new(config: KernelConfig) -> Self {
        Self {
            config,
            idempotency: None,
            dedup: None,
            outbox: None,
            bus: None,
            publishers: None,
            clock: None,
        }
    }

    pub fn idempotency_store(mut self, store: Arc<dyn IdempotencyStore>) -> Self {
        self.idempotency = Some(store);
        self
    }

    pub fn dedup_store(mut self, store: Arc<dyn DedupStore>) -> Self {
        self.dedup = Some(store);
        self
    }

    pub fn outbox(mut self, outbox: Arc<dyn Outbox>) -> Self {
        self.outbox = Some(outbox);
        self
    }

    /// Publish through `bus`: domain events to `<service>.events.<type>`,
    /// analytics to `<service>.analytics.<type>`, DLQ records to the DLQ topic.
    pub fn bus(mut self, bus: Arc<dyn EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Explicit publishers; takes precedence over [`KernelBuilder::bus`]
    pub fn publishers(
        mut self,
        domain: Arc<dyn EnvelopePublisher>,
        analytics: Arc<dyn EnvelopePublisher>,
        dlq: Arc<dyn DlqPublisher>,
    ) -> Self {
        self.publishers = Some((domain, analytics, dlq));
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Anything not supplied falls back to the in-memory adapter.
    pub fn build(self) -> Kernel {
        let config = self.config;

        let (domain, analytics, dlq) = match self.publishers {
            Some(publishers) => publishers,
            None => {
                let bus = self
                    .bus
                    .unwrap_or_else(|| Arc::new(InMemoryBus::new()) as Arc<dyn EventBus>);
                (
                    Arc::new(BusPublisher::new(bus.clone(), config.domain_subject_prefix()))
                        as Arc<dyn EnvelopePublisher>,
                    Arc::new(BusPublisher::new(bus.clone(), config.analytics_subject_prefix()))
                        as Arc<dyn EnvelopePublisher>,
                    Arc::new(BusDlqPublisher::new(bus, config.dlq_topic.clone()))
                        as Arc<dyn DlqPublisher>,
                )
            }
        };

        Kernel {
            idempotency: self.idempotency.unwrap_or_else(|| {
                Arc::new(InMemoryIdempotencyStore::new(config.idempotency_ttl))
            }),
            dedup: self
                .dedup
                .unwrap_or_else(|| Arc::new(InMemoryDedupStore::new())),
            outbox: self.outbox.unwrap_or_else(|| Arc::new(InMemoryOutbox::new())),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            domain,
            analytics,
            dlq,
            commit_lock: CommitLock::default(),
            config,
        }
    }
}
