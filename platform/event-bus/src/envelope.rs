//! # Event Envelope
//!
//! Canonical envelope carried by every event a service emits or consumes.
//!
//! ## Envelope Fields
//!
//! - `event_id`: Unique per emission; consumers deduplicate on it
//! - `event_type`: Dotted identifier (e.g. `payout.paid`)
//! - `event_class`: Routing class (`domain`, `analytics_only`, `ops`)
//! - `occurred_at`: Business time of the effect
//! - `partition_key_path`: `data.<field>` naming the partition field in `data`
//! - `partition_key`: Value found at `partition_key_path`, stringified
//! - `source_service`, `trace_id`, `schema_version`: Provenance
//! - `data`: Event-specific JSON document
//!
//! ## Partition-Key Invariant
//!
//! `validate` resolves `partition_key_path` inside `data` and requires its
//! stringified value to equal `partition_key`. Downstream consumers route and
//! shard on `partition_key` without understanding the payload, so a mismatch
//! is a hard failure at the service boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::canonical::{canonical_hash, normalize_number};

/// Required prefix of `partition_key_path`.
pub const PARTITION_PATH_PREFIX: &str = "data.";

/// Routing class of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventClass {
    /// Business facts other services act on. Publish failures dead-letter.
    Domain,
    /// Best-effort analytics. Publish failures are dropped.
    AnalyticsOnly,
    /// Reserved. Never published.
    Ops,
}

impl EventClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventClass::Domain => "domain",
            EventClass::AnalyticsOnly => "analytics_only",
            EventClass::Ops => "ops",
        }
    }
}

impl fmt::Display for EventClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventClass {
    type Err = EnvelopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "domain" => Ok(EventClass::Domain),
            "analytics_only" => Ok(EventClass::AnalyticsOnly),
            "ops" => Ok(EventClass::Ops),
            other => Err(EnvelopeError::UnknownClass(other.to_string())),
        }
    }
}

/// Envelope validation and decoding failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnvelopeError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("occurred_at must be set")]
    ZeroTimestamp,

    #[error("data must be a non-empty JSON object")]
    EmptyData,

    #[error("invalid partition_key_path '{0}': expected data.<field>")]
    InvalidPartitionPath(String),

    #[error("partition field '{0}' not present in data")]
    PartitionFieldMissing(String),

    #[error("partition field '{0}' is not a scalar")]
    PartitionFieldNotScalar(String),

    #[error("partition_key mismatch at '{path}': envelope has '{expected}', data has '{actual}'")]
    PartitionKeyMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("unknown event class '{0}'")]
    UnknownClass(String),

    #[error("malformed envelope: {0}")]
    Malformed(String),
}

/// Canonical event envelope.
///
/// # Examples
///
/// ```rust
/// use chrono::Utc;
/// use event_bus::{EventClass, EventEnvelope};
/// use serde_json::json;
///
/// let envelope = EventEnvelope::build(
///     "payout.paid",
///     EventClass::Domain,
///     json!({"payout_id": "po_1", "amount_minor": 12525}),
///     "po_1",
///     "data.payout_id",
///     "trace-1",
///     "1.0.0",
///     "payouts",
///     Utc::now(),
/// );
/// assert!(envelope.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_id: String,
    pub event_type: String,
    pub event_class: EventClass,
    pub occurred_at: DateTime<Utc>,
    pub partition_key_path: String,
    pub partition_key: String,
    pub source_service: String,
    pub trace_id: String,
    pub schema_version: String,
    pub data: Value,
}

impl EventEnvelope {
    /// Build an envelope with a fresh `event_id`.
    ///
    /// Does not check the partition-key invariant; `data` is assumed to be
    /// freshly serialized with a known field. Call [`EventEnvelope::validate`]
    /// before handing the envelope to anything that publishes it.
    pub fn build(
        event_type: impl Into<String>,
        event_class: EventClass,
        data: Value,
        partition_key: impl Into<String>,
        partition_key_path: impl Into<String>,
        trace_id: impl Into<String>,
        schema_version: impl Into<String>,
        source_service: impl Into<String>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            event_type: event_type.into(),
            event_class,
            occurred_at,
            partition_key_path: partition_key_path.into(),
            partition_key: partition_key.into(),
            source_service: source_service.into(),
            trace_id: trace_id.into(),
            schema_version: schema_version.into(),
            data,
        }
    }

    /// Replace the generated event id (fixtures and replays)
    pub fn with_event_id(mut self, event_id: impl Into<String>) -> Self {
        self.event_id = event_id.into();
        self
    }

    /// Enforce every envelope invariant. Fails closed.
    pub fn validate(&self) -> Result<(), EnvelopeError> {
        let required: [(&'static str, &str); 7] = [
            ("event_id", self.event_id.as_str()),
            ("event_type", self.event_type.as_str()),
            ("partition_key_path", self.partition_key_path.as_str()),
            ("partition_key", self.partition_key.as_str()),
            ("source_service", self.source_service.as_str()),
            ("trace_id", self.trace_id.as_str()),
            ("schema_version", self.schema_version.as_str()),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(EnvelopeError::MissingField(name));
            }
        }

        if self.occurred_at.timestamp() <= 0 {
            return Err(EnvelopeError::ZeroTimestamp);
        }

        match &self.data {
            Value::Object(map) if !map.is_empty() => {}
            _ => return Err(EnvelopeError::EmptyData),
        }

        let actual = self.resolve_partition_value()?;
        if actual != self.partition_key {
            return Err(EnvelopeError::PartitionKeyMismatch {
                path: self.partition_key_path.clone(),
                expected: self.partition_key.clone(),
                actual,
            });
        }

        Ok(())
    }

    /// Field name addressed by `partition_key_path` (`data.<field>` → `<field>`).
    pub fn partition_field(&self) -> Result<&str, EnvelopeError> {
        let field = self
            .partition_key_path
            .strip_prefix(PARTITION_PATH_PREFIX)
            .ok_or_else(|| EnvelopeError::InvalidPartitionPath(self.partition_key_path.clone()))?;

        // Nested paths are not supported in this envelope version.
        if field.is_empty() || field.contains('.') {
            return Err(EnvelopeError::InvalidPartitionPath(
                self.partition_key_path.clone(),
            ));
        }
        Ok(field)
    }

    fn resolve_partition_value(&self) -> Result<String, EnvelopeError> {
        let field = self.partition_field()?;
        let value = self
            .data
            .get(field)
            .ok_or_else(|| EnvelopeError::PartitionFieldMissing(self.partition_key_path.clone()))?;

        stringify_scalar(value)
            .ok_or_else(|| EnvelopeError::PartitionFieldNotScalar(self.partition_key_path.clone()))
    }

    /// Serialize to JSON bytes for the wire
    pub fn encode(&self) -> Result<Vec<u8>, EnvelopeError> {
        serde_json::to_vec(self).map_err(|e| EnvelopeError::Malformed(e.to_string()))
    }

    /// Parse JSON bytes into an envelope. Does not validate invariants.
    pub fn decode(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        serde_json::from_slice(bytes).map_err(|e| EnvelopeError::Malformed(e.to_string()))
    }

    /// Decode and validate in one step.
    pub fn decode_validated(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        let envelope = Self::decode(bytes)?;
        envelope.validate()?;
        Ok(envelope)
    }

    /// SHA-256 of the canonical JSON form of the whole envelope.
    pub fn content_hash(&self) -> Result<String, EnvelopeError> {
        let value = serde_json::to_value(self).map_err(|e| EnvelopeError::Malformed(e.to_string()))?;
        Ok(canonical_hash(&value))
    }
}

/// Best-effort read of `event_class` from raw bytes that may not decode as a
/// full envelope. Used to route invalid inbound events.
pub fn peek_class(bytes: &[u8]) -> Option<EventClass> {
    let value: Value = serde_json::from_slice(bytes).ok()?;
    value
        .get("event_class")
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse().ok())
}

/// Stringify a scalar JSON value for partition-key comparison.
///
/// Strings map to their content, numbers to their normalized decimal form,
/// booleans to `true`/`false`. Null, arrays and objects have no scalar form.
pub fn stringify_scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(normalize_number(n)),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}
