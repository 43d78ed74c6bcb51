use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// PAYOUTS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutMethod {
    Standard,
    Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutStatus {
    /// Created from an eligibility event, waiting for its schedule
    Scheduled,
    Paid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payout {
    pub payout_id: String,
    pub user_id: String,
    pub submission_id: String,
    pub amount: f64,
    pub amount_minor: i64,
    pub fee_minor: i64,
    pub net_minor: i64,
    pub currency: String,
    pub method: PayoutMethod,
    pub status: PayoutStatus,
    pub scheduled_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paid_at: Option<DateTime<Utc>>,
    /// Inbound event that created this payout, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_event_id: Option<String>,
}

/// Body of `POST /api/payouts`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatePayoutRequest {
    pub user_id: String,
    pub submission_id: String,
    pub amount: f64,
    pub currency: String,
    pub method: PayoutMethod,
    pub scheduled_at: DateTime<Utc>,
}

// ============================================================================
// INCOMING EVENT PAYLOADS
// ============================================================================

/// Payload for reward.payout_eligible
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayoutEligiblePayload {
    pub submission_id: String,
    pub user_id: String,
    pub gross_amount: f64,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub campaign_id: Option<String>,
}

fn default_currency() -> String {
    "USD".to_string()
}

// ============================================================================
// OUTGOING EVENT PAYLOADS
// ============================================================================

/// Payload for payout.paid and payout.scheduled
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayoutEventPayload {
    pub payout_id: String,
    pub user_id: String,
    pub submission_id: String,
    pub amount_minor: i64,
    pub net_minor: i64,
    pub currency: String,
    pub method: PayoutMethod,
}

impl From<&Payout> for PayoutEventPayload {
    fn from(p: &Payout) -> Self {
        Self {
            payout_id: p.payout_id.clone(),
            user_id: p.user_id.clone(),
            submission_id: p.submission_id.clone(),
            amount_minor: p.amount_minor,
            net_minor: p.net_minor,
            currency: p.currency.clone(),
            method: p.method,
        }
    }
}

/// Payload for payout.requested (analytics)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayoutRequestedMetric {
    pub user_id: String,
    pub method: PayoutMethod,
    pub amount_minor: i64,
}
