//! Postgres adapters for the three kernel stores.
//!
//! Schema lives in `db/migrations`. Hosts that need the outbox append to
//! commit with their domain write call [`insert_outbox_record`] on the same
//! transaction.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use event_bus::{EventClass, EventEnvelope};
use sqlx::{FromRow, PgConnection, PgPool};

use crate::dedup::DedupStore;
use crate::error::StoreError;
use crate::idempotency::{IdempotencyRecord, IdempotencyStore, ReserveOutcome};
use crate::outbox::{effective_limit, Outbox, OutboxRecord};

const UNIQUE_VIOLATION: &str = "23505";

fn backend(e: sqlx::Error) -> StoreError {
    let unique = e
        .as_database_error()
        .and_then(|d| d.code())
        .is_some_and(|code| code == UNIQUE_VIOLATION);
    if unique {
        StoreError::Conflict(e.to_string())
    } else {
        StoreError::Backend(e.to_string())
    }
}

/// Apply the kernel migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::migrate!("./db/migrations")
        .run(pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))
}

#[derive(Debug, FromRow)]
struct IdempotencyRow {
    key: String,
    request_hash: String,
    response_code: i32,
    response_body: Vec<u8>,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl From<IdempotencyRow> for IdempotencyRecord {
    fn from(row: IdempotencyRow) -> Self {
        Self {
            key: row.key,
            request_hash: row.request_hash,
            response_code: u16::try_from(row.response_code).unwrap_or_default(),
            response_body: row.response_body,
            created_at: row.created_at,
            expires_at: row.expires_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PgIdempotencyStore {
    pool: PgPool,
    default_ttl: Duration,
}

impl PgIdempotencyStore {
    pub fn new(pool: PgPool, default_ttl: Duration) -> Self {
        Self { pool, default_ttl }
    }
}

#[async_trait]
impl IdempotencyStore for PgIdempotencyStore {
    async fn get(
        &self,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<IdempotencyRecord>, StoreError> {
        sqlx::query("DELETE FROM idempotency_keys WHERE key = $1 AND expires_at < $2")
            .bind(key)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(backend)?;

        let row = sqlx::query_as::<_, IdempotencyRow>(
            r#"
            SELECT key, request_hash, response_code, response_body, created_at, expires_at
            FROM idempotency_keys
            WHERE key = $1
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        Ok(row.map(IdempotencyRecord::from))
    }

    async fn reserve(
        &self,
        key: &str,
        request_hash: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<ReserveOutcome, StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        sqlx::query("DELETE FROM idempotency_keys WHERE key = $1 AND expires_at < $2")
            .bind(key)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO idempotency_keys (key, request_hash, created_at, expires_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (key) DO NOTHING
            "#,
        )
        .bind(key)
        .bind(request_hash)
        .bind(now)
        .bind(expires_at)
        .execute(&mut *tx)
        .await
        .map_err(backend)?
        .rows_affected();

        let outcome = if inserted == 1 {
            ReserveOutcome::Reserved
        } else {
            let (existing,): (String,) =
                sqlx::query_as("SELECT request_hash FROM idempotency_keys WHERE key = $1")
                    .bind(key)
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(backend)?;
            if existing != request_hash {
                return Err(StoreError::IdempotencyConflict {
                    key: key.to_string(),
                });
            }
            ReserveOutcome::AlreadyReserved
        };

        tx.commit().await.map_err(backend)?;
        Ok(outcome)
    }

    async fn complete(
        &self,
        key: &str,
        response_code: u16,
        response_body: &[u8],
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let updated = sqlx::query(
            r#"
            UPDATE idempotency_keys
            SET response_code = $2,
                response_body = $3,
                expires_at = CASE WHEN $4 > expires_at THEN $5 ELSE expires_at END
            WHERE key = $1
            "#,
        )
        .bind(key)
        .bind(i32::from(response_code))
        .bind(response_body)
        .bind(at)
        .bind(at + self.default_ttl)
        .execute(&self.pool)
        .await
        .map_err(backend)?
        .rows_affected();

        if updated == 0 {
            return Err(StoreError::NotFound(format!("idempotency key '{}'", key)));
        }
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let purged = sqlx::query("DELETE FROM idempotency_keys WHERE expires_at < $1")
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(backend)?
            .rows_affected();
        Ok(purged as usize)
    }
}

#[derive(Debug, Clone)]
pub struct PgDedupStore {
    pool: PgPool,
}

impl PgDedupStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DedupStore for PgDedupStore {
    async fn seen(&self, event_id: &str, now: DateTime<Utc>) -> Result<bool, StoreError> {
        sqlx::query("DELETE FROM processed_events WHERE event_id = $1 AND expires_at < $2")
            .bind(event_id)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(backend)?;

        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM processed_events WHERE event_id = $1")
                .bind(event_id)
                .fetch_one(&self.pool)
                .await
                .map_err(backend)?;

        Ok(count > 0)
    }

    async fn mark(
        &self,
        event_id: &str,
        event_type: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO processed_events (event_id, event_type, expires_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (event_id)
            DO UPDATE SET event_type = EXCLUDED.event_type, expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(event_id)
        .bind(event_type)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        tracing::debug!(event_id = %event_id, event_type = %event_type, "Event marked as processed");
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let purged = sqlx::query("DELETE FROM processed_events WHERE expires_at < $1")
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(backend)?
            .rows_affected();
        Ok(purged as usize)
    }
}

#[derive(Debug, FromRow)]
struct OutboxRow {
    record_id: String,
    event_class: String,
    envelope: serde_json::Value,
    created_at: DateTime<Utc>,
    sent_at: Option<DateTime<Utc>>,
    attempts: i32,
    last_error: Option<String>,
    first_failed_at: Option<DateTime<Utc>>,
}

impl TryFrom<OutboxRow> for OutboxRecord {
    type Error = StoreError;

    fn try_from(row: OutboxRow) -> Result<Self, Self::Error> {
        let event_class: EventClass = row
            .event_class
            .parse()
            .map_err(|e: event_bus::EnvelopeError| StoreError::Backend(e.to_string()))?;
        let envelope: EventEnvelope = serde_json::from_value(row.envelope)
            .map_err(|e| StoreError::Backend(format!("corrupt outbox envelope: {}", e)))?;

        Ok(Self {
            record_id: row.record_id,
            event_class,
            envelope,
            created_at: row.created_at,
            sent_at: row.sent_at,
            attempts: u32::try_from(row.attempts).unwrap_or_default(),
            last_error: row.last_error,
            first_failed_at: row.first_failed_at,
        })
    }
}

const OUTBOX_COLUMNS: &str =
    "record_id, event_class, envelope, created_at, sent_at, attempts, last_error, first_failed_at";

/// Append one record on an open connection or transaction.
pub async fn insert_outbox_record(
    conn: &mut PgConnection,
    record: &OutboxRecord,
) -> Result<(), StoreError> {
    let envelope = serde_json::to_value(&record.envelope)
        .map_err(|e| StoreError::Backend(e.to_string()))?;

    sqlx::query(
        r#"
        INSERT INTO events_outbox
            (record_id, event_class, event_type, envelope, created_at, attempts)
        VALUES ($1, $2, $3, $4, $5, 0)
        "#,
    )
    .bind(&record.record_id)
    .bind(record.event_class.as_str())
    .bind(&record.envelope.event_type)
    .bind(envelope)
    .bind(record.created_at)
    .execute(conn)
    .await
    .map_err(backend)?;

    tracing::debug!(
        record_id = %record.record_id,
        event_id = %record.envelope.event_id,
        event_type = %record.envelope.event_type,
        "Event enqueued to outbox"
    );
    Ok(())
}

#[derive(Debug, Clone)]
pub struct PgOutbox {
    pool: PgPool,
}

impl PgOutbox {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Outbox for PgOutbox {
    async fn enqueue(&self, record: OutboxRecord) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire().await.map_err(backend)?;
        insert_outbox_record(&mut conn, &record).await
    }

    async fn enqueue_batch(&self, records: Vec<OutboxRecord>) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        for record in &records {
            insert_outbox_record(&mut tx, record).await?;
        }
        tx.commit().await.map_err(backend)
    }

    async fn list_pending(&self, limit: usize) -> Result<Vec<OutboxRecord>, StoreError> {
        let rows = sqlx::query_as::<_, OutboxRow>(&format!(
            "SELECT {} FROM events_outbox WHERE sent_at IS NULL ORDER BY seq ASC LIMIT $1",
            OUTBOX_COLUMNS
        ))
        .bind(effective_limit(limit) as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.into_iter().map(OutboxRecord::try_from).collect()
    }

    async fn mark_sent(&self, record_id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        let updated = sqlx::query(
            "UPDATE events_outbox SET sent_at = COALESCE(sent_at, $2) WHERE record_id = $1",
        )
        .bind(record_id)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(backend)?
        .rows_affected();

        if updated == 0 {
            return Err(StoreError::NotFound(format!("outbox record '{}'", record_id)));
        }
        Ok(())
    }

    async fn record_failure(
        &self,
        record_id: &str,
        error: &str,
        at: DateTime<Utc>,
    ) -> Result<OutboxRecord, StoreError> {
        let row = sqlx::query_as::<_, OutboxRow>(&format!(
            r#"
            UPDATE events_outbox
            SET attempts = attempts + 1,
                last_error = $2,
                first_failed_at = COALESCE(first_failed_at, $3)
            WHERE record_id = $1
            RETURNING {}
            "#,
            OUTBOX_COLUMNS
        ))
        .bind(record_id)
        .bind(error)
        .bind(at)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?
        .ok_or_else(|| StoreError::NotFound(format!("outbox record '{}'", record_id)))?;

        OutboxRecord::try_from(row)
    }
}
