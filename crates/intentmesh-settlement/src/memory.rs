//! In-memory payment rail with real balances

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tracing::{info, warn};

use intentmesh_types::{KeyRef, RailError, TransferReceipt, TransferRequest};

use crate::PaymentRail;

#[derive(Default)]
struct MemoryState {
    /// Signing key -> address it controls
    keys: HashMap<KeyRef, String>,
    balances: HashMap<String, Decimal>,
    history: Vec<(TransferRequest, TransferReceipt)>,
    sequence: u64,
    available: bool,
}

/// Payment rail that keeps balances in memory.
///
/// Transfers are atomic: either both balances change and a receipt is
/// recorded, or nothing changes.
pub struct InMemoryRail {
    name: String,
    state: RwLock<MemoryState>,
}

impl InMemoryRail {
    pub fn new() -> Self {
        Self::with_name("memory")
    }

    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: RwLock::new(MemoryState {
                available: true,
                ..Default::default()
            }),
        }
    }

    /// Allow `key` to sign transfers out of `address`
    pub async fn register_key(&self, key: KeyRef, address: impl Into<String>) {
        self.state.write().await.keys.insert(key, address.into());
    }

    pub async fn set_balance(&self, address: impl Into<String>, balance: Decimal) {
        self.state.write().await.balances.insert(address.into(), balance);
    }

    pub async fn balance(&self, address: &str) -> Decimal {
        self.state
            .read()
            .await
            .balances
            .get(address)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    /// Simulate an outage: while unavailable every transfer fails
    pub async fn set_available(&self, available: bool) {
        self.state.write().await.available = available;
    }

    pub async fn transfer_count(&self) -> usize {
        self.state.read().await.history.len()
    }

    /// All successful transfers, oldest first
    pub async fn transfers(&self) -> Vec<(TransferRequest, TransferReceipt)> {
        self.state.read().await.history.clone()
    }
}

impl Default for InMemoryRail {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PaymentRail for InMemoryRail {
    fn name(&self) -> &str {
        &self.name
    }

    async fn transfer(&self, request: TransferRequest) -> Result<TransferReceipt, RailError> {
        let mut state = self.state.write().await;

        if !state.available {
            warn!(rail = %self.name, to = %request.to, "Transfer refused: rail unavailable");
            return Err(RailError::Unavailable {
                reason: format!("{} rail is offline", self.name),
            });
        }

        if request.amount <= Decimal::ZERO {
            return Err(RailError::InvalidAmount {
                amount: request.amount,
            });
        }

        let from = state
            .keys
            .get(&request.from)
            .cloned()
            .ok_or_else(|| RailError::UnknownKey {
                key: request.from.to_string(),
            })?;

        let available = state.balances.get(&from).copied().unwrap_or(Decimal::ZERO);
        if available < request.amount {
            return Err(RailError::InsufficientBalance {
                address: from,
                requested: request.amount,
                available,
            });
        }

        state.balances.insert(from.clone(), available - request.amount);
        *state.balances.entry(request.to.clone()).or_insert(Decimal::ZERO) += request.amount;

        state.sequence += 1;
        let receipt = TransferReceipt {
            reference: format!("mem_{:08}", state.sequence),
            sequence: Some(state.sequence),
            amount: request.amount,
            settled_at: Utc::now(),
        };
        state.history.push((request.clone(), receipt.clone()));

        info!(
            rail = %self.name,
            reference = %receipt.reference,
            "Transfer executed: {} {} from {} to {}",
            request.amount, request.currency, from, request.to
        );
        Ok(receipt)
    }
}
