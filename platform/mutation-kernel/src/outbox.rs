//! Transactional outbox
//!
//! The write-ahead log for event emission. Records are appended together with
//! the state change that produced them and drained in insertion order by the
//! flusher. `sent_at` is set once on successful publish and never cleared;
//! records are kept as a logical log.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use event_bus::{EventClass, EventEnvelope};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::DEFAULT_FLUSH_BATCH_SIZE;
use crate::error::StoreError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxRecord {
    pub record_id: String,
    pub event_class: EventClass,
    pub envelope: EventEnvelope,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    /// Failed publish attempts so far
    pub attempts: u32,
    pub last_error: Option<String>,
    pub first_failed_at: Option<DateTime<Utc>>,
}

impl OutboxRecord {
    pub fn new(envelope: EventEnvelope, created_at: DateTime<Utc>) -> Self {
        Self {
            record_id: Uuid::new_v4().to_string(),
            event_class: envelope.event_class,
            envelope,
            created_at,
            sent_at: None,
            attempts: 0,
            last_error: None,
            first_failed_at: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.sent_at.is_none()
    }
}

#[async_trait]
pub trait Outbox: Send + Sync {
    /// Append one record. A duplicate `record_id` is a conflict.
    async fn enqueue(&self, record: OutboxRecord) -> Result<(), StoreError>;

    /// Append several records as one unit: all or none.
    async fn enqueue_batch(&self, records: Vec<OutboxRecord>) -> Result<(), StoreError> {
        for record in records {
            self.enqueue(record).await?;
        }
        Ok(())
    }

    /// Unsent records in insertion order, at most `limit` (0 means 100)
    async fn list_pending(&self, limit: usize) -> Result<Vec<OutboxRecord>, StoreError>;

    /// Set `sent_at`. The first successful call wins.
    async fn mark_sent(&self, record_id: &str, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Note a failed publish attempt and return the updated record
    async fn record_failure(
        &self,
        record_id: &str,
        error: &str,
        at: DateTime<Utc>,
    ) -> Result<OutboxRecord, StoreError>;
}

pub(crate) fn effective_limit(limit: usize) -> usize {
    if limit == 0 {
        DEFAULT_FLUSH_BATCH_SIZE
    } else {
        limit
    }
}

#[derive(Debug, Default)]
struct OutboxLog {
    records: Vec<OutboxRecord>,
    positions: HashMap<String, usize>,
}

impl OutboxLog {
    fn get_mut(&mut self, record_id: &str) -> Result<&mut OutboxRecord, StoreError> {
        let pos = *self
            .positions
            .get(record_id)
            .ok_or_else(|| StoreError::NotFound(format!("outbox record '{}'", record_id)))?;
        Ok(&mut self.records[pos])
    }

    fn append(&mut self, record: OutboxRecord) {
        self.positions
            .insert(record.record_id.clone(), self.records.len());
        self.records.push(record);
    }
}

/// In-memory adapter, one mutex over the whole log.
#[derive(Debug, Default)]
pub struct InMemoryOutbox {
    log: Mutex<OutboxLog>,
}

impl InMemoryOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every record ever enqueued, sent or not, in insertion order
    pub async fn all(&self) -> Vec<OutboxRecord> {
        self.log.lock().await.records.clone()
    }

    pub async fn len(&self) -> usize {
        self.log.lock().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.log.lock().await.records.is_empty()
    }

    pub async fn pending_count(&self) -> usize {
        self.log
            .lock()
            .await
            .records
            .iter()
            .filter(|r| r.is_pending())
            .count()
    }
}

#[async_trait]
impl Outbox for InMemoryOutbox {
    async fn enqueue(&self, record: OutboxRecord) -> Result<(), StoreError> {
        let mut log = self.log.lock().await;
        if log.positions.contains_key(&record.record_id) {
            return Err(StoreError::Conflict(format!(
                "outbox record '{}' already exists",
                record.record_id
            )));
        }
        log.append(record);
        Ok(())
    }

    async fn enqueue_batch(&self, records: Vec<OutboxRecord>) -> Result<(), StoreError> {
        let mut log = self.log.lock().await;

        let mut incoming = std::collections::HashSet::new();
        for record in &records {
            if log.positions.contains_key(&record.record_id)
                || !incoming.insert(record.record_id.as_str())
            {
                return Err(StoreError::Conflict(format!(
                    "outbox record '{}' already exists",
                    record.record_id
                )));
            }
        }

        for record in records {
            log.append(record);
        }
        Ok(())
    }

    async fn list_pending(&self, limit: usize) -> Result<Vec<OutboxRecord>, StoreError> {
        let log = self.log.lock().await;
        Ok(log
            .records
            .iter()
            .filter(|r| r.is_pending())
            .take(effective_limit(limit))
            .cloned()
            .collect())
    }

    async fn mark_sent(&self, record_id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut log = self.log.lock().await;
        let record = log.get_mut(record_id)?;
        if record.sent_at.is_none() {
            record.sent_at = Some(at);
        }
        Ok(())
    }

    async fn record_failure(
        &self,
        record_id: &str,
        error: &str,
        at: DateTime<Utc>,
    ) -> Result<OutboxRecord, StoreError> {
        let mut log = self.log.lock().await;
        let record = log.get_mut(record_id)?;
        record.attempts += 1;
        record.last_error = Some(error.to_string());
        record.first_failed_at.get_or_insert(at);
        Ok(record.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 10, 0, 0, 0).unwrap()
    }

    fn record(n: usize) -> OutboxRecord {
        let envelope = EventEnvelope::build(
            "escrow.hold_created",
            EventClass::Domain,
            json!({"escrow_id": format!("esc_{}", n)}),
            format!("esc_{}", n),
            "data.escrow_id",
            "trace",
            "1.0.0",
            "escrow",
            t0(),
        );
        OutboxRecord::new(envelope, t0() + Duration::seconds(n as i64))
    }

    #[tokio::test]
    async fn test_pending_in_insertion_order() {
        let outbox = InMemoryOutbox::new();
        let records: Vec<OutboxRecord> = (0..5).map(record).collect();
        for r in &records {
            outbox.enqueue(r.clone()).await.unwrap();
        }

        let pending = outbox.list_pending(5).await.unwrap();
        let ids: Vec<&str> = pending.iter().map(|r| r.record_id.as_str()).collect();
        let expected: Vec<&str> = records.iter().map(|r| r.record_id.as_str()).collect();
        assert_eq!(ids, expected);
    }

    #[tokio::test]
    async fn test_mark_sent_removes_from_pending() {
        let outbox = InMemoryOutbox::new();
        let first = record(1);
        let second = record(2);
        outbox.enqueue(first.clone()).await.unwrap();
        outbox.enqueue(second.clone()).await.unwrap();

        outbox.mark_sent(&first.record_id, t0()).await.unwrap();

        let pending = outbox.list_pending(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].record_id, second.record_id);
        assert_eq!(outbox.len().await, 2, "sent records stay in the log");
    }

    #[tokio::test]
    async fn test_sent_at_never_moves() {
        let outbox = InMemoryOutbox::new();
        let r = record(1);
        outbox.enqueue(r.clone()).await.unwrap();

        outbox.mark_sent(&r.record_id, t0()).await.unwrap();
        outbox.mark_sent(&r.record_id, t0() + Duration::hours(1)).await.unwrap();

        assert_eq!(outbox.all().await[0].sent_at, Some(t0()));
    }

    #[tokio::test]
    async fn test_duplicate_record_id_conflicts() {
        let outbox = InMemoryOutbox::new();
        let r = record(1);
        outbox.enqueue(r.clone()).await.unwrap();
        assert!(matches!(
            outbox.enqueue(r).await,
            Err(StoreError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_batch_is_all_or_nothing() {
        let outbox = InMemoryOutbox::new();
        let existing = record(1);
        outbox.enqueue(existing.clone()).await.unwrap();

        let err = outbox
            .enqueue_batch(vec![record(2), existing.clone()])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(outbox.len().await, 1);
    }

    #[tokio::test]
    async fn test_limit_caps_and_zero_defaults() {
        let outbox = InMemoryOutbox::new();
        for n in 0..120 {
            outbox.enqueue(record(n)).await.unwrap();
        }

        assert_eq!(outbox.list_pending(3).await.unwrap().len(), 3);
        assert_eq!(outbox.list_pending(0).await.unwrap().len(), 100);
    }

    #[tokio::test]
    async fn test_mark_sent_unknown_is_not_found() {
        let outbox = InMemoryOutbox::new();
        assert!(matches!(
            outbox.mark_sent("ghost", t0()).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_record_failure_tracks_history() {
        let outbox = InMemoryOutbox::new();
        let r = record(1);
        outbox.enqueue(r.clone()).await.unwrap();

        let first = outbox.record_failure(&r.record_id, "timeout", t0()).await.unwrap();
        assert_eq!(first.attempts, 1);
        assert_eq!(first.first_failed_at, Some(t0()));

        let later = t0() + Duration::seconds(2);
        let second = outbox.record_failure(&r.record_id, "refused", later).await.unwrap();
        assert_eq!(second.attempts, 2);
        assert_eq!(second.first_failed_at, Some(t0()));
        assert_eq!(second.last_error.as_deref(), Some("refused"));
        assert!(second.is_pending());
    }
}
