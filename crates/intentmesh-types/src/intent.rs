//! Intent types
//!
//! An intent is a client's request for a unit of work, carrying a budget and
//! deadlines, opened to competitive bidding by providers.

use crate::{EscrowId, IntentId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of an intent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntentStatus {
    /// Allocated, escrow not yet funded
    Created,
    /// Bidding window is open
    Open,
    /// A winner has been selected
    Assigned,
    /// The assigned provider reported progress
    Executing,
    /// Work delivered and escrow settled
    Completed,
    /// No bids, failover exhausted, or execution deadline missed
    Failed,
    /// Cancelled by the client before assignment
    Cancelled,
    /// Outcome contested; resolved outside the engine
    Disputed,
}

impl IntentStatus {
    /// Check if this is a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::Disputed
        )
    }

    /// Check if a provider currently holds the work
    pub fn is_in_execution(&self) -> bool {
        matches!(self, Self::Assigned | Self::Executing)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Open => "OPEN",
            Self::Assigned => "ASSIGNED",
            Self::Executing => "EXECUTING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
            Self::Disputed => "DISPUTED",
        }
    }
}

impl fmt::Display for IntentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hard requirements a bid must satisfy to be ranked at all
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntentRequirements {
    /// Minimum reputation on the 0-5 scale
    pub min_reputation: Option<f64>,
    /// Only TEE-attested providers may win
    #[serde(default)]
    pub require_tee: bool,
    /// If non-empty, only these providers may win
    #[serde(default)]
    pub allowed_providers: Vec<String>,
    /// Providers that may not bid
    #[serde(default)]
    pub excluded_providers: Vec<String>,
    /// Maximum acceptable latency; also the scoring reference latency
    pub max_latency_ms: Option<u64>,
    /// Capabilities the provider must have advertised at bid time
    #[serde(default)]
    pub required_capabilities: Vec<String>,
}

impl IntentRequirements {
    pub fn excludes(&self, provider: &str) -> bool {
        self.excluded_providers.iter().any(|p| p == provider)
    }
}

/// Outcome recorded when an intent completes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentResult {
    pub output: serde_json::Value,
    /// Provider that executed the work
    pub provider: String,
    pub execution_time_ms: u64,
    pub proof_ref: Option<String>,
    pub attestation_ref: Option<String>,
    /// Rail reference of the payment to the provider
    pub settlement_reference: Option<String>,
    pub amount_settled: Decimal,
    pub completed_at: DateTime<Utc>,
}

/// A requested unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub id: IntentId,
    pub client_id: String,
    pub client_address: String,
    pub work_type: String,
    pub parameters: serde_json::Value,
    pub requirements: IntentRequirements,
    pub max_budget: Decimal,
    pub currency: String,
    pub bidding_deadline: DateTime<Utc>,
    pub execution_deadline: DateTime<Utc>,
    pub status: IntentStatus,
    pub assigned_provider: Option<String>,
    /// Backup providers in descending score order
    pub failover_queue: Vec<String>,
    pub result: Option<IntentResult>,
    pub escrow_id: Option<EscrowId>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Intent {
    /// Move to a new status, stamping `updated_at`
    pub fn transition(&mut self, status: IntentStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}

/// What the assigned provider reports when it finishes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionReport {
    pub output: serde_json::Value,
    pub execution_time_ms: u64,
    pub proof_ref: Option<String>,
    pub attestation_ref: Option<String>,
}
