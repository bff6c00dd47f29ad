//! Bilateral netting
//!
//! Every recorded payment is an obligation of its payer. Two parties that owe
//! each other only ever need one transfer: the difference, paid by whoever
//! owes more.

use intentmesh_types::{NetDirection, PartyRole, Transaction};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Outcome of netting a session's obligations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetPosition {
    /// `server_paid_total - client_paid_total`
    pub net_balance: Decimal,
    /// Size of the single transfer, `|net_balance|`
    pub amount: Decimal,
    pub direction: NetDirection,
}

/// Net two running totals into one transfer
pub fn compute_net(client_paid_total: Decimal, server_paid_total: Decimal) -> NetPosition {
    let net_balance = server_paid_total - client_paid_total;
    let direction = if net_balance > Decimal::ZERO {
        NetDirection::ServerToClient
    } else if net_balance < Decimal::ZERO {
        NetDirection::ClientToServer
    } else {
        NetDirection::Flat
    };

    NetPosition {
        net_balance,
        amount: net_balance.abs(),
        direction,
    }
}

/// Recompute `(client_paid_total, server_paid_total)` from the transaction log
pub fn gross_totals(transactions: &[Transaction]) -> (Decimal, Decimal) {
    transactions
        .iter()
        .fold((Decimal::ZERO, Decimal::ZERO), |(client, server), tx| match tx.payer {
            PartyRole::Client => (client + tx.amount, server),
            PartyRole::Server => (client, server + tx.amount),
        })
}
