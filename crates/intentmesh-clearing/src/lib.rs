//! IntentMesh Clearing - Bilateral sessions with net settlement
//!
//! Two long-lived counterparties record what they owe each other as they go.
//! Recording is pure bookkeeping; a single settle call later moves only the
//! net difference over the payment rail.

use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub use intentmesh_types::{
    BilateralSession, NetDirection, PartyRole, SessionId, SessionSettlement, SessionStatus,
    Transaction, TransactionStatus,
};

pub mod bilateral;
pub mod netting;

pub use bilateral::BilateralLedger;
pub use netting::{compute_net, gross_totals, NetPosition};

/// Bilateral ledger configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BilateralConfig {
    /// Net amounts below this settle without a transfer
    #[serde(default = "default_min_settlement")]
    pub min_settlement_amount: Decimal,

    /// ACTIVE sessions older than this expire
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,

    /// How long SETTLED sessions stay queryable
    #[serde(default = "default_settled_retention")]
    pub settled_retention_secs: u64,

    /// How often the expiry sweeper runs
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Settlement network recorded on new sessions
    #[serde(default = "default_network")]
    pub network: String,

    #[serde(default = "default_currency")]
    pub currency: String,
}

fn default_min_settlement() -> Decimal {
    Decimal::new(1, 4)
}

fn default_session_ttl() -> u64 {
    24 * 60 * 60
}

fn default_settled_retention() -> u64 {
    60 * 60
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_network() -> String {
    "memory".to_string()
}

fn default_currency() -> String {
    intentmesh_types::DEFAULT_CURRENCY.to_string()
}

impl Default for BilateralConfig {
    fn default() -> Self {
        Self {
            min_settlement_amount: default_min_settlement(),
            session_ttl_secs: default_session_ttl(),
            settled_retention_secs: default_settled_retention(),
            sweep_interval_secs: default_sweep_interval(),
            network: default_network(),
            currency: default_currency(),
        }
    }
}

impl BilateralConfig {
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn settled_retention(&self) -> Duration {
        Duration::from_secs(self.settled_retention_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}
