use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mutation_kernel::StoreError;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::models::{Escrow, EscrowStatus};

#[derive(Debug, Error)]
pub enum ReleaseError {
    #[error("escrow '{0}' not found")]
    NotFound(String),

    #[error("release of {requested} exceeds remaining balance {remaining}")]
    InsufficientBalance { requested: i64, remaining: i64 },

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[async_trait]
pub trait EscrowStore: Send + Sync {
    async fn insert(&self, escrow: Escrow) -> Result<(), StoreError>;

    async fn get(&self, escrow_id: &str) -> Result<Option<Escrow>, StoreError>;

    /// Check the balance and apply the release as one step.
    async fn release(
        &self,
        escrow_id: &str,
        amount: i64,
        at: DateTime<Utc>,
    ) -> Result<Escrow, ReleaseError>;
}

#[derive(Debug, Default)]
pub struct InMemoryEscrowStore {
    escrows: Mutex<HashMap<String, Escrow>>,
}

impl InMemoryEscrowStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EscrowStore for InMemoryEscrowStore {
    async fn insert(&self, escrow: Escrow) -> Result<(), StoreError> {
        let mut escrows = self.escrows.lock().await;
        if escrows.contains_key(&escrow.escrow_id) {
            return Err(StoreError::Conflict(format!(
                "escrow '{}' already exists",
                escrow.escrow_id
            )));
        }
        escrows.insert(escrow.escrow_id.clone(), escrow);
        Ok(())
    }

    async fn get(&self, escrow_id: &str) -> Result<Option<Escrow>, StoreError> {
        Ok(self.escrows.lock().await.get(escrow_id).cloned())
    }

    async fn release(
        &self,
        escrow_id: &str,
        amount: i64,
        at: DateTime<Utc>,
    ) -> Result<Escrow, ReleaseError> {
        let mut escrows = self.escrows.lock().await;
        let escrow = escrows
            .get_mut(escrow_id)
            .ok_or_else(|| ReleaseError::NotFound(escrow_id.to_string()))?;

        let remaining = escrow.remaining();
        if amount > remaining {
            return Err(ReleaseError::InsufficientBalance {
                requested: amount,
                remaining,
            });
        }

        escrow.released += amount;
        escrow.updated_at = at;
        escrow.status = if escrow.remaining() == 0 {
            EscrowStatus::Released
        } else {
            EscrowStatus::PartiallyReleased
        };
        Ok(escrow.clone())
    }
}
