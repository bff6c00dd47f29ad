//! Bilateral session types
//!
//! A bilateral session is a running ledger between two long-lived
//! counterparties. Each recorded payment is an obligation; only the net
//! difference is ever moved over the payment rail.

use crate::{Account, SessionId, TransactionId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which side of the session a party is on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartyRole {
    Client,
    Server,
}

impl PartyRole {
    pub fn counterparty(&self) -> Self {
        match self {
            Self::Client => Self::Server,
            Self::Server => Self::Client,
        }
    }
}

impl fmt::Display for PartyRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Client => f.write_str("client"),
            Self::Server => f.write_str("server"),
        }
    }
}

/// Session lifecycle: `Active -> Settling -> Settled`, or `Active -> Expired`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Active,
    Settling,
    Settled,
    Expired,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Active => "ACTIVE",
            Self::Settling => "SETTLING",
            Self::Settled => "SETTLED",
            Self::Expired => "EXPIRED",
        };
        f.write_str(s)
    }
}

/// Status of a recorded transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Recorded,
    Settled,
    Disputed,
}

/// One recorded payment within a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub session_id: SessionId,
    pub payer: PartyRole,
    pub payee: PartyRole,
    pub amount: Decimal,
    /// What was paid for, e.g. "crypto.price"
    pub resource: String,
    pub description: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub status: TransactionStatus,
}

/// Direction of the single net transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetDirection {
    ServerToClient,
    ClientToServer,
    /// Obligations cancel out exactly
    Flat,
}

impl NetDirection {
    /// The role that pays, if any
    pub fn payer(&self) -> Option<PartyRole> {
        match self {
            Self::ServerToClient => Some(PartyRole::Server),
            Self::ClientToServer => Some(PartyRole::Client),
            Self::Flat => None,
        }
    }
}

/// Record of how a session was cleared
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSettlement {
    pub direction: NetDirection,
    pub amount: Decimal,
    /// Rail reference; `None` when nothing needed to move
    pub reference: Option<String>,
    pub transaction_count: usize,
    pub settled_at: DateTime<Utc>,
}

/// Running ledger between exactly two parties
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BilateralSession {
    pub id: SessionId,
    pub client: Account,
    pub server: Account,
    pub transactions: Vec<Transaction>,
    pub client_paid_total: Decimal,
    pub server_paid_total: Decimal,
    /// Always `server_paid_total - client_paid_total`
    pub net_balance: Decimal,
    pub status: SessionStatus,
    pub currency: String,
    /// Target settlement network/rail
    pub network: String,
    pub settlement: Option<SessionSettlement>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BilateralSession {
    pub fn party(&self, role: PartyRole) -> &Account {
        match role {
            PartyRole::Client => &self.client,
            PartyRole::Server => &self.server,
        }
    }

    pub fn involves(&self, address: &str) -> bool {
        self.client.address == address || self.server.address == address
    }
}
