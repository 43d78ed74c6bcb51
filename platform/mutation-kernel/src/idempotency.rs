//! Request-level idempotency store
//!
//! A record is reserved before a mutating request runs its effect and
//! completed with the serialized response afterwards. Retries within the TTL
//! get the cached response; a retry carrying a different payload under the
//! same key is refused.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::error::StoreError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub key: String,
    pub request_hash: String,
    /// Zero while the reservation is pending
    pub response_code: u16,
    /// Exact response bytes; empty while pending
    pub response_body: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    pub fn is_completed(&self) -> bool {
        !self.response_body.is_empty()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Result of a successful reservation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReserveOutcome {
    /// A new pending record was created
    Reserved,
    /// A live record with the same request hash already exists
    AlreadyReserved,
}

#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Live record for `key`, or `None`. Expired records are deleted.
    async fn get(&self, key: &str, now: DateTime<Utc>)
        -> Result<Option<IdempotencyRecord>, StoreError>;

    /// Reserve `key` for `request_hash` until `expires_at`.
    ///
    /// Fails with `StoreError::IdempotencyConflict` when a live record holds
    /// the key for a different hash.
    async fn reserve(
        &self,
        key: &str,
        request_hash: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<ReserveOutcome, StoreError>;

    /// Store the response for `key`. Extends `expires_at` by the store's
    /// default TTL when `at` is already past it.
    async fn complete(
        &self,
        key: &str,
        response_code: u16,
        response_body: &[u8],
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Drop every expired record; returns how many were removed
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError>;
}

/// In-memory adapter, one mutex over the whole map.
#[derive(Debug)]
pub struct InMemoryIdempotencyStore {
    records: Mutex<HashMap<String, IdempotencyRecord>>,
    default_ttl: Duration,
}

impl InMemoryIdempotencyStore {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            default_ttl,
        }
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}

impl Default for InMemoryIdempotencyStore {
    fn default() -> Self {
        Self::new(Duration::hours(crate::config::DEFAULT_TTL_HOURS))
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn get(
        &self,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<IdempotencyRecord>, StoreError> {
        let mut records = self.records.lock().await;

        let expired = match records.get(key) {
            Some(record) => record.is_expired(now),
            None => return Ok(None),
        };

        if expired {
            tracing::debug!(idempotency_key = %key, "Dropping expired idempotency record");
            records.remove(key);
            return Ok(None);
        }
        Ok(records.get(key).cloned())
    }

    async fn reserve(
        &self,
        key: &str,
        request_hash: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<ReserveOutcome, StoreError> {
        if key.is_empty() {
            return Err(StoreError::Conflict("empty idempotency key".to_string()));
        }

        let mut records = self.records.lock().await;

        if let Some(existing) = records.get(key) {
            if !existing.is_expired(now) {
                if existing.request_hash == request_hash {
                    return Ok(ReserveOutcome::AlreadyReserved);
                }
                return Err(StoreError::IdempotencyConflict {
                    key: key.to_string(),
                });
            }
        }

        records.insert(
            key.to_string(),
            IdempotencyRecord {
                key: key.to_string(),
                request_hash: request_hash.to_string(),
                response_code: 0,
                response_body: Vec::new(),
                created_at: now,
                expires_at,
            },
        );
        Ok(ReserveOutcome::Reserved)
    }

    async fn complete(
        &self,
        key: &str,
        response_code: u16,
        response_body: &[u8],
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        let record = records
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound(format!("idempotency record '{}'", key)))?;

        record.response_code = response_code;
        record.response_body = response_body.to_vec();
        if at > record.expires_at {
            record.expires_at = at + self.default_ttl;
        }
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut records = self.records.lock().await;
        let before = records.len();
        records.retain(|_, r| !r.is_expired(now));
        Ok(before - records.len())
    }
}
