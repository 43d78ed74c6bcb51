//! Error taxonomy shared by the kernel and its host services.

use event_bus::{BusError, EnvelopeError, EventClass};

/// Failures reported by the idempotency, dedup and outbox stores.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("idempotency key '{key}' was already used with a different request")]
    IdempotencyConflict { key: String },

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Errors surfaced to host services and, through them, to callers.
///
/// Guard and validation variants are returned unwrapped so the HTTP layer can
/// map them with [`KernelError::status_code`] and [`KernelError::code`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KernelError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("idempotency key is required for this operation")]
    IdempotencyRequired,

    #[error("idempotency key was already used with a different request")]
    IdempotencyConflict,

    #[error("a request with this idempotency key is still in flight")]
    RequestInFlight,

    #[error("invalid envelope: {0}")]
    InvalidEnvelope(#[from] EnvelopeError),

    #[error("unsupported event type: {0}")]
    UnsupportedEventType(String),

    #[error("unsupported event class: {0}")]
    UnsupportedEventClass(EventClass),

    #[error("request cancelled")]
    Cancelled,

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl KernelError {
    /// Stable machine-readable code used in error envelopes
    pub fn code(&self) -> &'static str {
        match self {
            KernelError::Unauthorized(_) => "unauthorized",
            KernelError::Forbidden(_) => "forbidden",
            KernelError::InvalidInput(_) => "invalid_input",
            KernelError::NotFound(_) => "not_found",
            KernelError::Conflict(_) => "conflict",
            KernelError::IdempotencyRequired => "idempotency_key_required",
            KernelError::IdempotencyConflict => "idempotency_conflict",
            KernelError::RequestInFlight => "request_in_flight",
            KernelError::InvalidEnvelope(_) => "invalid_envelope",
            KernelError::UnsupportedEventType(_) => "unsupported_event_type",
            KernelError::UnsupportedEventClass(_) => "unsupported_event_class",
            KernelError::Cancelled => "request_cancelled",
            KernelError::Publish(_) => "publish_failed",
            KernelError::Storage(_) => "storage_error",
            KernelError::Serialization(_) => "serialization_error",
        }
    }

    /// HTTP status a host should answer with
    pub fn status_code(&self) -> u16 {
        match self {
            KernelError::Unauthorized(_) => 401,
            KernelError::Forbidden(_) => 403,
            KernelError::InvalidInput(_) => 400,
            KernelError::NotFound(_) => 404,
            KernelError::Conflict(_) => 409,
            KernelError::IdempotencyRequired => 400,
            KernelError::IdempotencyConflict => 409,
            KernelError::RequestInFlight => 409,
            KernelError::InvalidEnvelope(_) => 400,
            KernelError::UnsupportedEventType(_) => 400,
            KernelError::UnsupportedEventClass(_) => 400,
            KernelError::Cancelled => 408,
            KernelError::Publish(_) => 502,
            KernelError::Storage(_) => 500,
            KernelError::Serialization(_) => 500,
        }
    }

    /// Whether a retry of the same request might succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            KernelError::RequestInFlight
                | KernelError::Cancelled
                | KernelError::Publish(_)
                | KernelError::Storage(_)
        )
    }
}

impl From<StoreError> for KernelError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => KernelError::NotFound(what),
            StoreError::Conflict(what) => KernelError::Conflict(what),
            StoreError::IdempotencyConflict { .. } => KernelError::IdempotencyConflict,
            StoreError::Backend(msg) => KernelError::Storage(msg),
        }
    }
}

impl From<BusError> for KernelError {
    fn from(e: BusError) -> Self {
        KernelError::Publish(e.to_string())
    }
}

impl From<serde_json::Error> for KernelError {
    fn from(e: serde_json::Error) -> Self {
        KernelError::Serialization(e.to_string())
    }
}

pub type KernelResult<T> = Result<T, KernelError>;
