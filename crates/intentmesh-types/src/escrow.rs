//! Escrow types for IntentMesh
//!
//! Every intent's budget sits in escrow until the outcome is known. Funds
//! leave custody exactly once, through a release, a refund or a slash.

use crate::{EscrowId, IntentId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// State of an escrow
///
/// `Created -> Funded -> {Released | Refunded | Slashed | Disputed}`, and
/// `Disputed -> {Released | Refunded | Slashed}` on external resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EscrowStatus {
    /// Record allocated, funding not yet confirmed
    Created,
    /// Funds are held in custody
    Funded,
    /// Paid out to the recipient (remainder returned to the client)
    Released,
    /// Returned to the client
    Refunded,
    /// Frozen pending external resolution
    Disputed,
    /// Penalty paid out (remainder returned to the client)
    Slashed,
}

impl EscrowStatus {
    /// Check if this is a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Released | Self::Refunded | Self::Slashed)
    }

    /// Check if funds are still held
    pub fn is_locked(&self) -> bool {
        matches!(self, Self::Funded | Self::Disputed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Funded => "FUNDED",
            Self::Released => "RELEASED",
            Self::Refunded => "REFUNDED",
            Self::Disputed => "DISPUTED",
            Self::Slashed => "SLASHED",
        }
    }
}

impl fmt::Display for EscrowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why funds left custody
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowTransferKind {
    Release,
    Refund,
    Slash,
}

/// One payment out of custody, with the rail's reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowTransfer {
    pub kind: EscrowTransferKind,
    pub recipient: String,
    pub amount: Decimal,
    pub reference: String,
    pub at: DateTime<Utc>,
}

/// A release or slash whose primary leg went through but whose remainder
/// refund did not. Retrying the same operation only sends the remainder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingSettlement {
    pub primary: EscrowTransfer,
    pub reason: String,
}

/// Custody record for one intent's funds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Escrow {
    pub id: EscrowId,
    pub intent_id: IntentId,
    pub client_address: String,
    /// Amount originally escrowed
    pub amount: Decimal,
    pub currency: String,
    pub status: EscrowStatus,
    /// Rail reference of the funding transfer
    pub funding_reference: Option<String>,
    /// Every transfer out of custody, in order
    pub transfers: Vec<EscrowTransfer>,
    pub pending: Option<PendingSettlement>,
    /// Reason given for the last transition
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub funded_at: Option<DateTime<Utc>>,
    pub disputed_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Escrow {
    fn total(&self, kind: EscrowTransferKind) -> Decimal {
        let mut total: Decimal = self
            .transfers
            .iter()
            .filter(|t| t.kind == kind)
            .map(|t| t.amount)
            .sum();
        if let Some(pending) = &self.pending {
            if pending.primary.kind == kind {
                total += pending.primary.amount;
            }
        }
        total
    }

    pub fn released_total(&self) -> Decimal {
        self.total(EscrowTransferKind::Release)
    }

    pub fn refunded_total(&self) -> Decimal {
        self.total(EscrowTransferKind::Refund)
    }

    pub fn slashed_total(&self) -> Decimal {
        self.total(EscrowTransferKind::Slash)
    }

    /// Everything that has left custody, including a pending primary leg
    pub fn disbursed_total(&self) -> Decimal {
        self.released_total() + self.refunded_total() + self.slashed_total()
    }

    /// Funds still held
    pub fn remaining(&self) -> Decimal {
        self.amount - self.disbursed_total()
    }

    /// Check that nothing beyond the escrowed amount has been paid out
    pub fn is_conserved(&self) -> bool {
        self.disbursed_total() <= self.amount
    }

    /// Rail reference of the most recent transfer of the given kind
    pub fn last_reference(&self, kind: EscrowTransferKind) -> Option<&str> {
        self.transfers
            .iter()
            .rev()
            .find(|t| t.kind == kind)
            .map(|t| t.reference.as_str())
    }
}

/// External resolution of a disputed escrow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum DisputeResolution {
    /// Pay the recipient; the remainder goes back to the client
    Release { recipient: String, amount: Decimal },
    /// Return everything to the client
    Refund,
    /// Pay a penalty; the remainder goes back to the client
    Slash {
        amount: Decimal,
        penalty_recipient: String,
    },
}
