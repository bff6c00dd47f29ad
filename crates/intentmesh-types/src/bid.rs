//! Bid types

use crate::{BidId, IntentId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a bid
///
/// A bid moves through `Pending -> Accepted | Rejected | Failover`, and an
/// accepted bid ends as `Executed` or `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BidStatus {
    Pending,
    Accepted,
    Rejected,
    Failover,
    Executed,
    Failed,
}

impl fmt::Display for BidStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Accepted => "ACCEPTED",
            Self::Rejected => "REJECTED",
            Self::Failover => "FAILOVER",
            Self::Executed => "EXECUTED",
            Self::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// Provider facts captured when the bid is submitted.
///
/// Scoring only ever reads this snapshot, never the live reputation
/// service, so ranking is reproducible from the stored bids.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderSnapshot {
    /// Reputation on a 0-5 scale
    pub reputation: f64,
    pub tee_attested: bool,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

impl ProviderSnapshot {
    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }
}

/// A provider's offer for an intent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bid {
    pub id: BidId,
    pub intent_id: IntentId,
    pub provider: String,
    pub provider_address: String,
    pub bid_amount: Decimal,
    pub estimated_time_ms: u64,
    /// Provider's self-reported confidence, 0-100
    pub confidence: u8,
    pub snapshot: ProviderSnapshot,
    pub score: Option<f64>,
    /// 1-based position after ranking
    pub rank: Option<u32>,
    pub submitted_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: BidStatus,
}
