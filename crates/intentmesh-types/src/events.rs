//! System events for the notification boundary
//!
//! Events are emitted after the state change they describe has been
//! committed. Delivery is best effort: nothing in the core depends on a
//! subscriber receiving them.

use crate::{BidId, EscrowId, IntentId, SessionId, TransactionId};
use crate::{NetDirection, PartyRole};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Why the engine moved on to a backup provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailoverReason {
    /// No report within the failover window
    Timeout,
    /// The provider reported failure
    ProviderFailure,
}

/// System-wide events emitted by the auction, escrow and bilateral ledgers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SystemEvent {
    IntentOpened {
        intent_id: IntentId,
        client_id: String,
        work_type: String,
        max_budget: Decimal,
        currency: String,
        bidding_deadline: DateTime<Utc>,
        timestamp: DateTime<Utc>,
    },

    BidReceived {
        intent_id: IntentId,
        bid_id: BidId,
        provider: String,
        bid_amount: Decimal,
        bid_count: usize,
        timestamp: DateTime<Utc>,
    },

    WinnerSelected {
        intent_id: IntentId,
        bid_id: BidId,
        provider: String,
        score: f64,
        bid_amount: Decimal,
        failover_queue: Vec<String>,
        timestamp: DateTime<Utc>,
    },

    ExecutionProgress {
        intent_id: IntentId,
        provider: String,
        message: Option<String>,
        timestamp: DateTime<Utc>,
    },

    IntentCompleted {
        intent_id: IntentId,
        provider: String,
        amount_settled: Decimal,
        settlement_reference: Option<String>,
        timestamp: DateTime<Utc>,
    },

    IntentFailed {
        intent_id: IntentId,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    IntentCancelled {
        intent_id: IntentId,
        timestamp: DateTime<Utc>,
    },

    IntentDisputed {
        intent_id: IntentId,
        provider: Option<String>,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    FailoverTriggered {
        intent_id: IntentId,
        reason: FailoverReason,
        failed_provider: String,
        new_provider: String,
        attempt: u32,
        timestamp: DateTime<Utc>,
    },

    EscrowFunded {
        escrow_id: EscrowId,
        intent_id: IntentId,
        amount: Decimal,
        reference: String,
        timestamp: DateTime<Utc>,
    },

    EscrowReleased {
        escrow_id: EscrowId,
        intent_id: IntentId,
        recipient: String,
        amount: Decimal,
        remainder_refunded: Decimal,
        timestamp: DateTime<Utc>,
    },

    EscrowRefunded {
        escrow_id: EscrowId,
        intent_id: IntentId,
        amount: Decimal,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    EscrowDisputed {
        escrow_id: EscrowId,
        intent_id: IntentId,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    EscrowSlashed {
        escrow_id: EscrowId,
        intent_id: IntentId,
        penalty_recipient: String,
        amount: Decimal,
        remainder_refunded: Decimal,
        timestamp: DateTime<Utc>,
    },

    SessionCreated {
        session_id: SessionId,
        client_id: String,
        server_id: String,
        timestamp: DateTime<Utc>,
    },

    TransactionRecorded {
        session_id: SessionId,
        transaction_id: TransactionId,
        payer: PartyRole,
        amount: Decimal,
        resource: String,
        net_balance: Decimal,
        timestamp: DateTime<Utc>,
    },

    SessionSettled {
        session_id: SessionId,
        direction: NetDirection,
        amount: Decimal,
        reference: Option<String>,
        transaction_count: usize,
        timestamp: DateTime<Utc>,
    },

    SessionExpired {
        session_id: SessionId,
        timestamp: DateTime<Utc>,
    },
}

/// Broadcast bus for [`SystemEvent`]s.
///
/// Cloning yields another handle to the same channel. Slow subscribers lag
/// and lose events rather than slowing the emitter down.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SystemEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Broadcast an event
    pub fn emit(&self, event: SystemEvent) {
        // No receivers is fine
        let _ = self.sender.send(event);
    }

    /// Subscribe to events emitted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<SystemEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
