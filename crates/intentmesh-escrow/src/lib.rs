//! IntentMesh Escrow - Custody of intent budgets
//!
//! An intent's budget is escrowed before bidding opens and leaves custody
//! exactly once: released to the winning provider (remainder back to the
//! client), refunded to the client, or slashed to a penalty recipient
//! (remainder back to the client). A dispute freezes the escrow until it is
//! resolved into one of those outcomes.

use async_trait::async_trait;
use rust_decimal::Decimal;

pub use intentmesh_types::{
    Account, DisputeResolution, Escrow, EscrowId, EscrowStatus, EscrowTransfer,
    EscrowTransferKind, IntentId, PendingSettlement, Result,
};

pub mod ledger;

pub use ledger::EscrowLedger;

/// Escrow manager trait
#[async_trait]
pub trait EscrowManager: Send + Sync {
    /// Create an escrow for an intent and fund it from the client's account
    async fn create_and_fund(
        &self,
        intent_id: IntentId,
        client: &Account,
        amount: Decimal,
        currency: &str,
    ) -> Result<Escrow>;

    /// Pay `amount` to `recipient`, returning the remainder to the client
    async fn release(
        &self,
        escrow_id: &EscrowId,
        recipient: &str,
        amount: Decimal,
        reason: &str,
    ) -> Result<Escrow>;

    /// Return everything still held to the client
    async fn refund(&self, escrow_id: &EscrowId, reason: &str) -> Result<Escrow>;

    /// Pay a penalty of `amount` to `penalty_recipient`, returning the
    /// remainder to the client
    async fn slash(
        &self,
        escrow_id: &EscrowId,
        amount: Decimal,
        penalty_recipient: &str,
        reason: &str,
    ) -> Result<Escrow>;

    /// Freeze a funded escrow until the dispute is resolved
    async fn dispute(&self, escrow_id: &EscrowId, reason: &str) -> Result<Escrow>;

    /// Apply an external decision to a disputed escrow
    async fn resolve_dispute(
        &self,
        escrow_id: &EscrowId,
        resolution: DisputeResolution,
        reason: &str,
    ) -> Result<Escrow>;

    /// Forget a closed escrow; escrows still holding funds are refused
    async fn evict(&self, escrow_id: &EscrowId) -> Result<Escrow>;

    async fn get(&self, escrow_id: &EscrowId) -> Result<Escrow>;

    async fn get_by_intent(&self, intent_id: &IntentId) -> Result<Escrow>;
}
