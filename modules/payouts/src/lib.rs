//! Creator payouts.
//!
//! Payouts are created over HTTP through the mutation kernel, and scheduled
//! from `reward.payout_eligible` events delivered by the rewards service.

pub mod config;
pub mod consumer;
pub mod models;
pub mod routes;
pub mod service;
pub mod store;

pub const SERVICE_NAME: &str = "payouts";

pub use consumer::{handlers, PayoutEligibleHandler, PAYOUT_ELIGIBLE};
pub use routes::{router, AppState};
pub use service::PayoutService;
pub use store::{InMemoryPayoutStore, PayoutStore};
