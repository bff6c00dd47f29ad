//! Payment rail contract types
//!
//! The rail is the only thing that actually moves funds. The core hands it a
//! [`TransferRequest`] and records whatever [`TransferReceipt`] comes back.

use crate::KeyRef;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single transfer instruction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    /// Key of the paying account
    pub from: KeyRef,
    /// Address of the receiving account
    pub to: String,
    pub amount: Decimal,
    pub currency: String,
    pub memo: String,
}

/// Proof that a transfer went through
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferReceipt {
    /// Transaction hash or equivalent
    pub reference: String,
    /// Block or sequence number, when the rail has one
    pub sequence: Option<u64>,
    pub amount: Decimal,
    pub settled_at: DateTime<Utc>,
}

/// Errors reported by a payment rail
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RailError {
    #[error("Unknown signing key {key}")]
    UnknownKey { key: String },

    #[error("Insufficient balance at {address}: requested {requested}, available {available}")]
    InsufficientBalance {
        address: String,
        requested: Decimal,
        available: Decimal,
    },

    #[error("Invalid transfer amount {amount}")]
    InvalidAmount { amount: Decimal },

    #[error("Rail unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Transfer rejected: {reason}")]
    Rejected { reason: String },
}
