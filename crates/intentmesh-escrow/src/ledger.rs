//! In-process escrow ledger
//!
//! Each escrow sits behind its own async mutex. Operations on one escrow are
//! serialized (including across the rail call they make), operations on
//! different escrows never wait on each other.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use intentmesh_settlement::PaymentRail;
use intentmesh_types::{
    EventBus, IntentMeshError, KeyRef, SystemEvent, TransferReceipt, TransferRequest,
};

use crate::{
    Account, DisputeResolution, Escrow, EscrowId, EscrowManager, EscrowStatus, EscrowTransfer,
    EscrowTransferKind, IntentId, PendingSettlement, Result,
};

fn operation_name(kind: EscrowTransferKind) -> &'static str {
    match kind {
        EscrowTransferKind::Release => "release",
        EscrowTransferKind::Refund => "refund",
        EscrowTransferKind::Slash => "slash",
    }
}

fn require_status(escrow: &Escrow, allowed: &[EscrowStatus], operation: &'static str) -> Result<()> {
    if allowed.contains(&escrow.status) {
        Ok(())
    } else {
        Err(IntentMeshError::InvalidEscrowState {
            escrow_id: escrow.id,
            status: escrow.status,
            operation,
        })
    }
}

fn close(escrow: &mut Escrow, status: EscrowStatus, reason: &str) {
    escrow.status = status;
    escrow.reason = Some(reason.to_string());
    escrow.closed_at = Some(Utc::now());
}

/// Escrow ledger backed by a payment rail
pub struct EscrowLedger {
    rail: Arc<dyn PaymentRail>,
    /// Account that holds escrowed funds
    custody: Account,
    events: EventBus,
    escrows: DashMap<EscrowId, Arc<Mutex<Escrow>>>,
    by_intent: DashMap<IntentId, EscrowId>,
}

impl EscrowLedger {
    pub fn new(rail: Arc<dyn PaymentRail>, custody: Account, events: EventBus) -> Self {
        Self {
            rail,
            custody,
            events,
            escrows: DashMap::new(),
            by_intent: DashMap::new(),
        }
    }

    pub fn custody(&self) -> &Account {
        &self.custody
    }

    pub fn len(&self) -> usize {
        self.escrows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.escrows.is_empty()
    }

    /// Snapshot of every escrow
    pub async fn list(&self) -> Vec<Escrow> {
        let records: Vec<_> = self.escrows.iter().map(|e| Arc::clone(e.value())).collect();
        let mut escrows = Vec::with_capacity(records.len());
        for record in records {
            escrows.push(record.lock().await.clone());
        }
        escrows.sort_by_key(|e| e.created_at);
        escrows
    }

    fn record(&self, escrow_id: &EscrowId) -> Result<Arc<Mutex<Escrow>>> {
        self.escrows
            .get(escrow_id)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| IntentMeshError::EscrowNotFound {
                escrow_id: escrow_id.to_string(),
            })
    }

    async fn send(
        &self,
        escrow: &Escrow,
        from: &KeyRef,
        to: &str,
        amount: Decimal,
        purpose: &str,
    ) -> Result<TransferReceipt> {
        let request = TransferRequest {
            from: from.clone(),
            to: to.to_string(),
            amount,
            currency: escrow.currency.clone(),
            memo: format!("{} {}", escrow.id, purpose),
        };
        self.rail.transfer(request).await.map_err(|e| {
            warn!(escrow_id = %escrow.id, %purpose, "Escrow transfer failed: {}", e);
            IntentMeshError::rail(self.rail.name(), e)
        })
    }

    fn leg(kind: EscrowTransferKind, recipient: &str, receipt: &TransferReceipt) -> EscrowTransfer {
        EscrowTransfer {
            kind,
            recipient: recipient.to_string(),
            amount: receipt.amount,
            reference: receipt.reference.clone(),
            at: receipt.settled_at,
        }
    }

    /// Pay `amount` to `recipient` and return the remainder to the client.
    ///
    /// Returns the remainder refunded. If the remainder transfer fails the
    /// primary leg is parked in `escrow.pending`; calling again with the same
    /// arguments only retries the remainder.
    async fn pay_out(
        &self,
        escrow: &mut Escrow,
        kind: EscrowTransferKind,
        recipient: &str,
        amount: Decimal,
        reason: &str,
    ) -> Result<Decimal> {
        if amount <= Decimal::ZERO {
            return Err(IntentMeshError::invalid_input("amount", "must be positive"));
        }

        let primary = match escrow.pending.take() {
            Some(pending) => {
                let same = pending.primary.kind == kind
                    && pending.primary.recipient == recipient
                    && pending.primary.amount == amount;
                if !same {
                    let operation = operation_name(pending.primary.kind);
                    escrow.pending = Some(pending);
                    return Err(IntentMeshError::SettlementPending {
                        escrow_id: escrow.id,
                        operation,
                    });
                }
                info!(escrow_id = %escrow.id, "Resuming pending {}", operation_name(kind));
                pending.primary
            }
            None => {
                let available = escrow.remaining();
                if amount > available {
                    return Err(IntentMeshError::EscrowAmountExceeded {
                        escrow_id: escrow.id,
                        requested: amount,
                        available,
                    });
                }
                let receipt = self
                    .send(escrow, &self.custody.key, recipient, amount, operation_name(kind))
                    .await?;
                Self::leg(kind, recipient, &receipt)
            }
        };

        let remainder = escrow.remaining() - primary.amount;
        let mut refund_leg = None;
        if remainder > Decimal::ZERO {
            let client = escrow.client_address.clone();
            match self
                .send(escrow, &self.custody.key, &client, remainder, "remainder refund")
                .await
            {
                Ok(receipt) => {
                    refund_leg = Some(Self::leg(EscrowTransferKind::Refund, &client, &receipt))
                }
                Err(err) => {
                    escrow.pending = Some(PendingSettlement {
                        primary,
                        reason: reason.to_string(),
                    });
                    return Err(err);
                }
            }
        }

        escrow.transfers.push(primary);
        escrow.transfers.extend(refund_leg);
        Ok(remainder.max(Decimal::ZERO))
    }

    /// Return everything still held to the client
    async fn refund_locked(&self, escrow: &mut Escrow, reason: &str) -> Result<Decimal> {
        if let Some(pending) = &escrow.pending {
            return Err(IntentMeshError::SettlementPending {
                escrow_id: escrow.id,
                operation: operation_name(pending.primary.kind),
            });
        }

        let amount = escrow.remaining();
        if amount > Decimal::ZERO {
            let client = escrow.client_address.clone();
            let receipt = self
                .send(escrow, &self.custody.key, &client, amount, "refund")
                .await?;
            escrow
                .transfers
                .push(Self::leg(EscrowTransferKind::Refund, &client, &receipt));
        }
        close(escrow, EscrowStatus::Refunded, reason);
        Ok(amount)
    }

    async fn release_locked(
        &self,
        escrow: &mut Escrow,
        recipient: &str,
        amount: Decimal,
        reason: &str,
    ) -> Result<Decimal> {
        let remainder = self
            .pay_out(escrow, EscrowTransferKind::Release, recipient, amount, reason)
            .await?;
        close(escrow, EscrowStatus::Released, reason);
        Ok(remainder)
    }

    async fn slash_locked(
        &self,
        escrow: &mut Escrow,
        amount: Decimal,
        penalty_recipient: &str,
        reason: &str,
    ) -> Result<Decimal> {
        let remainder = self
            .pay_out(escrow, EscrowTransferKind::Slash, penalty_recipient, amount, reason)
            .await?;
        close(escrow, EscrowStatus::Slashed, reason);
        Ok(remainder)
    }

    fn emit_released(&self, escrow: &Escrow, recipient: &str, amount: Decimal, remainder: Decimal) {
        info!(escrow_id = %escrow.id, "Escrow released: {} to {} ({} refunded)", amount, recipient, remainder);
        self.events.emit(SystemEvent::EscrowReleased {
            escrow_id: escrow.id,
            intent_id: escrow.intent_id,
            recipient: recipient.to_string(),
            amount,
            remainder_refunded: remainder,
            timestamp: Utc::now(),
        });
    }

    fn emit_refunded(&self, escrow: &Escrow, amount: Decimal, reason: &str) {
        info!(escrow_id = %escrow.id, "Escrow refunded: {} ({})", amount, reason);
        self.events.emit(SystemEvent::EscrowRefunded {
            escrow_id: escrow.id,
            intent_id: escrow.intent_id,
            amount,
            reason: reason.to_string(),
            timestamp: Utc::now(),
        });
    }

    fn emit_slashed(&self, escrow: &Escrow, recipient: &str, amount: Decimal, remainder: Decimal) {
        warn!(escrow_id = %escrow.id, "Escrow slashed: {} to {} ({} refunded)", amount, recipient, remainder);
        self.events.emit(SystemEvent::EscrowSlashed {
            escrow_id: escrow.id,
            intent_id: escrow.intent_id,
            penalty_recipient: recipient.to_string(),
            amount,
            remainder_refunded: remainder,
            timestamp: Utc::now(),
        });
    }
}

#[async_trait]
impl EscrowManager for EscrowLedger {
    async fn create_and_fund(
        &self,
        intent_id: IntentId,
        client: &Account,
        amount: Decimal,
        currency: &str,
    ) -> Result<Escrow> {
        if amount <= Decimal::ZERO {
            return Err(IntentMeshError::invalid_input("amount", "must be positive"));
        }

        let escrow = Escrow {
            id: EscrowId::new(),
            intent_id,
            client_address: client.address.clone(),
            amount,
            currency: currency.to_string(),
            status: EscrowStatus::Created,
            funding_reference: None,
            transfers: Vec::new(),
            pending: None,
            reason: None,
            created_at: Utc::now(),
            funded_at: None,
            disputed_at: None,
            closed_at: None,
        };
        let escrow_id = escrow.id;
        let mut escrow = escrow;

        // Unfunded escrows are never recorded
        let receipt = self
            .send(&escrow, &client.key, &self.custody.address, amount, "fund")
            .await?;

        escrow.status = EscrowStatus::Funded;
        escrow.funding_reference = Some(receipt.reference.clone());
        escrow.funded_at = Some(receipt.settled_at);
        let snapshot = escrow.clone();
        self.escrows.insert(escrow_id, Arc::new(Mutex::new(escrow)));
        self.by_intent.insert(intent_id, escrow_id);

        info!(%escrow_id, %intent_id, "Escrow funded: {} {}", amount, currency);
        self.events.emit(SystemEvent::EscrowFunded {
            escrow_id,
            intent_id,
            amount,
            reference: receipt.reference,
            timestamp: Utc::now(),
        });
        Ok(snapshot)
    }

    async fn release(
        &self,
        escrow_id: &EscrowId,
        recipient: &str,
        amount: Decimal,
        reason: &str,
    ) -> Result<Escrow> {
        let record = self.record(escrow_id)?;
        let mut escrow = record.lock().await;
        require_status(&escrow, &[EscrowStatus::Funded], "release")?;

        let remainder = self.release_locked(&mut escrow, recipient, amount, reason).await?;
        let snapshot = escrow.clone();
        drop(escrow);

        self.emit_released(&snapshot, recipient, amount, remainder);
        Ok(snapshot)
    }

    async fn refund(&self, escrow_id: &EscrowId, reason: &str) -> Result<Escrow> {
        let record = self.record(escrow_id)?;
        let mut escrow = record.lock().await;
        require_status(
            &escrow,
            &[EscrowStatus::Funded, EscrowStatus::Disputed],
            "refund",
        )?;

        let amount = self.refund_locked(&mut escrow, reason).await?;
        let snapshot = escrow.clone();
        drop(escrow);

        self.emit_refunded(&snapshot, amount, reason);
        Ok(snapshot)
    }

    async fn slash(
        &self,
        escrow_id: &EscrowId,
        amount: Decimal,
        penalty_recipient: &str,
        reason: &str,
    ) -> Result<Escrow> {
        let record = self.record(escrow_id)?;
        let mut escrow = record.lock().await;
        require_status(&escrow, &[EscrowStatus::Funded], "slash")?;

        let remainder = self
            .slash_locked(&mut escrow, amount, penalty_recipient, reason)
            .await?;
        let snapshot = escrow.clone();
        drop(escrow);

        self.emit_slashed(&snapshot, penalty_recipient, amount, remainder);
        Ok(snapshot)
    }

    async fn dispute(&self, escrow_id: &EscrowId, reason: &str) -> Result<Escrow> {
        let record = self.record(escrow_id)?;
        let mut escrow = record.lock().await;
        require_status(&escrow, &[EscrowStatus::Funded], "dispute")?;
        if let Some(pending) = &escrow.pending {
            return Err(IntentMeshError::SettlementPending {
                escrow_id: escrow.id,
                operation: operation_name(pending.primary.kind),
            });
        }

        escrow.status = EscrowStatus::Disputed;
        escrow.disputed_at = Some(Utc::now());
        escrow.reason = Some(reason.to_string());
        let snapshot = escrow.clone();
        drop(escrow);

        warn!(%escrow_id, "Escrow disputed: {}", reason);
        self.events.emit(SystemEvent::EscrowDisputed {
            escrow_id: *escrow_id,
            intent_id: snapshot.intent_id,
            reason: reason.to_string(),
            timestamp: Utc::now(),
        });
        Ok(snapshot)
    }

    async fn resolve_dispute(
        &self,
        escrow_id: &EscrowId,
        resolution: DisputeResolution,
        reason: &str,
    ) -> Result<Escrow> {
        let record = self.record(escrow_id)?;
        let mut escrow = record.lock().await;
        require_status(&escrow, &[EscrowStatus::Disputed], "resolve dispute on")?;

        match resolution {
            DisputeResolution::Release { recipient, amount } => {
                let remainder = self.release_locked(&mut escrow, &recipient, amount, reason).await?;
                let snapshot = escrow.clone();
                drop(escrow);
                self.emit_released(&snapshot, &recipient, amount, remainder);
                Ok(snapshot)
            }
            DisputeResolution::Refund => {
                let amount = self.refund_locked(&mut escrow, reason).await?;
                let snapshot = escrow.clone();
                drop(escrow);
                self.emit_refunded(&snapshot, amount, reason);
                Ok(snapshot)
            }
            DisputeResolution::Slash {
                amount,
                penalty_recipient,
            } => {
                let remainder = self
                    .slash_locked(&mut escrow, amount, &penalty_recipient, reason)
                    .await?;
                let snapshot = escrow.clone();
                drop(escrow);
                self.emit_slashed(&snapshot, &penalty_recipient, amount, remainder);
                Ok(snapshot)
            }
        }
    }

    async fn evict(&self, escrow_id: &EscrowId) -> Result<Escrow> {
        let record = self.record(escrow_id)?;
        let escrow = record.lock().await;
        if !escrow.status.is_terminal() {
            return Err(IntentMeshError::InvalidEscrowState {
                escrow_id: escrow.id,
                status: escrow.status,
                operation: "evict",
            });
        }

        self.escrows.remove(escrow_id);
        self.by_intent
            .remove_if(&escrow.intent_id, |_, id| id == escrow_id);
        debug!(%escrow_id, status = %escrow.status, "Escrow evicted");
        Ok(escrow.clone())
    }

    async fn get(&self, escrow_id: &EscrowId) -> Result<Escrow> {
        let record = self.record(escrow_id)?;
        let escrow = record.lock().await;
        Ok(escrow.clone())
    }

    async fn get_by_intent(&self, intent_id: &IntentId) -> Result<Escrow> {
        let escrow_id = self
            .by_intent
            .get(intent_id)
            .map(|e| *e.value())
            .ok_or_else(|| IntentMeshError::EscrowNotFound {
                escrow_id: format!("for {}", intent_id),
            })?;
        self.get(&escrow_id).await
    }
}
