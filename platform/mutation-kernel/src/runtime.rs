//! Background tasks of a running kernel.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::flusher::OutboxFlusher;
use crate::inbound::InboundWorker;

/// Owns the flusher and inbound worker tasks and their shared cancel token.
pub struct KernelRuntime {
    cancel: CancellationToken,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl KernelRuntime {
    pub fn start(flusher: Arc<OutboxFlusher>, worker: Option<Arc<InboundWorker>>) -> Self {
        let cancel = CancellationToken::new();
        let mut tasks = Vec::with_capacity(2);

        let token = cancel.clone();
        tasks.push((
            "outbox_flusher",
            tokio::spawn(async move { flusher.run(token).await }),
        ));

        if let Some(worker) = worker {
            let token = cancel.clone();
            tasks.push((
                "inbound_worker",
                tokio::spawn(async move { worker.run(token).await }),
            ));
        }

        Self { cancel, tasks }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Signal every task and wait for them to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for (name, handle) in self.tasks {
            if let Err(e) = handle.await {
                tracing::error!(task = name, error = %e, "Kernel task ended abnormally");
            }
        }
        tracing::info!("Kernel runtime stopped");
    }
}
