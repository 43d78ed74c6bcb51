//! Error envelope
//!
//! ```json
//! {
//!   "status": 409,
//!   "code": "idempotency_conflict",
//!   "message": "...",
//!   "request_id": "req-1",
//!   "error": {"code": "idempotency_conflict", "message": "...", "request_id": "req-1"}
//! }
//! ```

use mutation_kernel::KernelError;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Nested error object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    pub request_id: String,
}

/// Error envelope returned by every mutating endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ApiError {
    pub status: u16,
    pub code: String,
    pub message: String,
    pub request_id: String,
    pub error: ErrorBody,
}

impl ApiError {
    pub fn new(
        status: u16,
        code: impl Into<String>,
        message: impl Into<String>,
        request_id: impl Into<String>,
    ) -> Self {
        let code = code.into();
        let message = message.into();
        let request_id = request_id.into();
        Self {
            status,
            error: ErrorBody {
                code: code.clone(),
                message: message.clone(),
                request_id: request_id.clone(),
            },
            code,
            message,
            request_id,
        }
    }

    /// Map a kernel error. Infrastructure failures do not leak details.
    pub fn from_kernel(err: &KernelError, request_id: impl Into<String>) -> Self {
        let message = match err {
            KernelError::Storage(_) => "storage unavailable".to_string(),
            KernelError::Serialization(_) => "internal error".to_string(),
            KernelError::Publish(_) => "event delivery unavailable".to_string(),
            other => other.to_string(),
        };
        Self::new(err.status_code(), err.code(), message, request_id)
    }

    pub fn bad_request(message: impl Into<String>, request_id: impl Into<String>) -> Self {
        Self::new(400, "invalid_input", message, request_id)
    }

    pub fn not_found(message: impl Into<String>, request_id: impl Into<String>) -> Self {
        Self::new(404, "not_found", message, request_id)
    }

    /// Serialized envelope
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}: {}", self.status, self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

#[cfg(feature = "axum")]
impl axum::response::IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = http::StatusCode::from_u16(self.status)
            .unwrap_or(http::StatusCode::INTERNAL_SERVER_ERROR);
        (status, axum::Json(self)).into_response()
    }
}
