//! Payout domain store

use async_trait::async_trait;
use mutation_kernel::StoreError;
use tokio::sync::Mutex;

use crate::models::Payout;

#[async_trait]
pub trait PayoutStore: Send + Sync {
    /// Insert a new payout; a duplicate `payout_id` is a conflict
    async fn insert(&self, payout: Payout) -> Result<(), StoreError>;

    async fn get(&self, payout_id: &str) -> Result<Option<Payout>, StoreError>;

    async fn find_by_submission(&self, submission_id: &str) -> Result<Vec<Payout>, StoreError>;

    /// Payout created by a given inbound event
    async fn find_by_source_event(&self, event_id: &str) -> Result<Option<Payout>, StoreError>;

    async fn count(&self) -> Result<usize, StoreError>;
}

#[derive(Debug, Default)]
pub struct InMemoryPayoutStore {
    payouts: Mutex<Vec<Payout>>,
}

impl InMemoryPayoutStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PayoutStore for InMemoryPayoutStore {
    async fn insert(&self, payout: Payout) -> Result<(), StoreError> {
        let mut payouts = self.payouts.lock().await;
        if payouts.iter().any(|p| p.payout_id == payout.payout_id) {
            return Err(StoreError::Conflict(format!(
                "payout '{}' already exists",
                payout.payout_id
            )));
        }
        payouts.push(payout);
        Ok(())
    }

    async fn get(&self, payout_id: &str) -> Result<Option<Payout>, StoreError> {
        let payouts = self.payouts.lock().await;
        Ok(payouts.iter().find(|p| p.payout_id == payout_id).cloned())
    }

    async fn find_by_submission(&self, submission_id: &str) -> Result<Vec<Payout>, StoreError> {
        let payouts = self.payouts.lock().await;
        Ok(payouts
            .iter()
            .filter(|p| p.submission_id == submission_id)
            .cloned()
            .collect())
    }

    async fn find_by_source_event(&self, event_id: &str) -> Result<Option<Payout>, StoreError> {
        let payouts = self.payouts.lock().await;
        Ok(payouts
            .iter()
            .find(|p| p.source_event_id.as_deref() == Some(event_id))
            .cloned())
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.payouts.lock().await.len())
    }
}
