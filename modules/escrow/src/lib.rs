//! Campaign escrow.
//!
//! A brand places a hold for a creator and releases it in one or more
//! steps. Every step is idempotent per caller key and emits its event
//! through the outbox in the order the steps happened.

pub mod models;
pub mod service;
pub mod store;

pub use models::{Escrow, EscrowStatus, HoldRequest, ReleaseRequest, ReleaseResult};
pub use service::EscrowService;
pub use store::{EscrowStore, InMemoryEscrowStore, ReleaseError};
