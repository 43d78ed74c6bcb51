use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowStatus {
    Held,
    PartiallyReleased,
    Released,
}

/// Funds a campaign holds for a creator. Amounts are in minor units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Escrow {
    pub escrow_id: String,
    pub campaign_id: String,
    pub creator_id: String,
    pub amount: i64,
    pub released: i64,
    pub status: EscrowStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Escrow {
    pub fn remaining(&self) -> i64 {
        self.amount - self.released
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HoldRequest {
    pub campaign_id: String,
    pub creator_id: String,
    pub amount: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseRequest {
    pub escrow_id: String,
    pub amount: i64,
}

/// Response of a release: the escrow after it, and how much moved
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseResult {
    pub escrow: Escrow,
    pub released_now: i64,
}

// ============================================================================
// OUTGOING EVENT PAYLOADS
// ============================================================================

/// Payload for escrow.hold_created
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HoldCreatedPayload {
    pub escrow_id: String,
    pub campaign_id: String,
    pub creator_id: String,
    pub amount: i64,
}

/// Payload for escrow.partial_release and escrow.released
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleasePayload {
    pub escrow_id: String,
    pub campaign_id: String,
    pub creator_id: String,
    pub released: i64,
    pub remaining: i64,
}
