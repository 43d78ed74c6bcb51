//! Who is calling, and the ambient context of the call.

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::KernelError;

/// The authenticated principal performing an operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub subject_id: String,
    pub role: String,
    pub request_id: String,
    pub idempotency_key: String,
}

impl Actor {
    pub fn new(subject_id: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            role: role.into(),
            ..Self::default()
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = key.into();
        self
    }

    /// Empty subject means the caller is not authenticated.
    pub fn require_subject(&self) -> Result<(), KernelError> {
        if self.subject_id.trim().is_empty() {
            return Err(KernelError::Unauthorized("missing subject".to_string()));
        }
        Ok(())
    }

    pub fn require_idempotency_key(&self) -> Result<(), KernelError> {
        if self.idempotency_key.trim().is_empty() {
            return Err(KernelError::IdempotencyRequired);
        }
        Ok(())
    }

    pub fn has_role(&self, roles: &[&str]) -> bool {
        roles.iter().any(|r| r.eq_ignore_ascii_case(self.role.trim()))
    }

    pub fn require_role(&self, roles: &[&str]) -> Result<(), KernelError> {
        if self.has_role(roles) {
            return Ok(());
        }
        Err(KernelError::Forbidden(format!(
            "role '{}' may not perform this operation",
            self.role
        )))
    }

    /// Allow the subject to act on its own resources, or any privileged role
    /// to act on anyone's.
    pub fn require_self_or_role(&self, owner_id: &str, roles: &[&str]) -> Result<(), KernelError> {
        if self.subject_id == owner_id || self.has_role(roles) {
            return Ok(());
        }
        Err(KernelError::Forbidden(format!(
            "subject '{}' may not act on behalf of '{}'",
            self.subject_id, owner_id
        )))
    }
}

/// Request-scoped context: request id, cancellation, optional deadline.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl RequestContext {
    pub fn new(request_id: impl Into<String>) -> Self {
        let request_id = request_id.into();
        Self {
            request_id: if request_id.trim().is_empty() {
                Uuid::new_v4().to_string()
            } else {
                request_id
            },
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Context for work not tied to a caller (workers, tests)
    pub fn background() -> Self {
        Self::new(Uuid::new_v4().to_string())
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Cancelled explicitly or past the deadline
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    pub fn check(&self) -> Result<(), KernelError> {
        if self.is_cancelled() {
            return Err(KernelError::Cancelled);
        }
        Ok(())
    }
}
