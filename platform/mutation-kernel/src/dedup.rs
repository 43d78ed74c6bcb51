//! Inbound event deduplication
//!
//! Remembers which `event_id`s were handled successfully for a bounded window
//! (the broker's redelivery horizon). Marking happens only after the handler
//! succeeds, so a failed event stays eligible for redelivery.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::error::StoreError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupRecord {
    pub event_id: String,
    pub event_type: String,
    pub expires_at: DateTime<Utc>,
}

#[async_trait]
pub trait DedupStore: Send + Sync {
    /// True iff a live record exists. Expired records are removed.
    async fn seen(&self, event_id: &str, now: DateTime<Utc>) -> Result<bool, StoreError>;

    /// Insert or overwrite the record for `event_id`
    async fn mark(
        &self,
        event_id: &str,
        event_type: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Remove every expired record; returns how many were removed
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError>;
}

#[derive(Debug, Default)]
pub struct InMemoryDedupStore {
    records: Mutex<HashMap<String, DedupRecord>>,
}

impl InMemoryDedupStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }

    pub async fn get(&self, event_id: &str) -> Option<DedupRecord> {
        self.records.lock().await.get(event_id).cloned()
    }
}

#[async_trait]
impl DedupStore for InMemoryDedupStore {
    async fn seen(&self, event_id: &str, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut records = self.records.lock().await;

        let expired = match records.get(event_id) {
            Some(record) => now > record.expires_at,
            None => return Ok(false),
        };

        if expired {
            records.remove(event_id);
            return Ok(false);
        }
        Ok(true)
    }

    async fn mark(
        &self,
        event_id: &str,
        event_type: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.records.lock().await.insert(
            event_id.to_string(),
            DedupRecord {
                event_id: event_id.to_string(),
                event_type: event_type.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut records = self.records.lock().await;
        let before = records.len();
        records.retain(|_, r| now <= r.expires_at);
        Ok(before - records.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 10, 0, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_unmarked_event_not_seen() {
        let store = InMemoryDedupStore::new();
        assert!(!store.seen("evt-1", t0()).await.unwrap());
    }

    #[tokio::test]
    async fn test_marked_event_seen_until_expiry() {
        let store = InMemoryDedupStore::new();
        let exp = t0() + Duration::days(7);
        store.mark("evt-1", "reward.payout_eligible", exp).await.unwrap();

        assert!(store.seen("evt-1", t0()).await.unwrap());
        assert!(store.seen("evt-1", exp).await.unwrap());
        assert!(!store.seen("evt-1", exp + Duration::seconds(1)).await.unwrap());
        assert!(store.is_empty().await, "expired record evicted on lookup");
    }

    #[tokio::test]
    async fn test_mark_overwrites() {
        let store = InMemoryDedupStore::new();
        store.mark("evt-1", "a.b", t0()).await.unwrap();
        store.mark("evt-1", "a.b", t0() + Duration::days(1)).await.unwrap();

        assert_eq!(store.len().await, 1);
        assert_eq!(
            store.get("evt-1").await.unwrap().expires_at,
            t0() + Duration::days(1)
        );
    }

    #[tokio::test]
    async fn test_purge_bounds_memory() {
        let store = InMemoryDedupStore::new();
        for i in 0..10 {
            store
                .mark(&format!("evt-{}", i), "a.b", t0() + Duration::hours(i))
                .await
                .unwrap();
        }

        let removed = store.purge_expired(t0() + Duration::minutes(270)).await.unwrap();
        assert_eq!(removed, 5);
        assert_eq!(store.len().await, 5);
    }
}
