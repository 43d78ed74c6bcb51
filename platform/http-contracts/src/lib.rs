//! Shared HTTP contract for mutating endpoints.
//!
//! - [`ApiError`]: the error envelope every service answers with; the
//!   top-level `code` always mirrors `error.code`
//! - kernel error to status mapping
//! - actor and `Idempotency-Key` header extraction (`axum` feature)

pub mod error;
#[cfg(feature = "axum")]
pub mod headers;

pub use error::{ApiError, ErrorBody};
#[cfg(feature = "axum")]
pub use headers::{
    actor_from_headers, fallback_request_id, json_bytes_response, RequestActor,
    IDEMPOTENCY_KEY_HEADER, REQUEST_ID_HEADER, ROLE_HEADER, SUBJECT_ID_HEADER,
};
