//! Shared liquidity pool with short-lived reservations
//!
//! Borrowers reserve part of a shared balance for the duration of an
//! operation. The reservation is counted the moment it is granted and is
//! handed back when the [`Reservation`] guard is dropped, whichever way the
//! borrower's code exits.

use std::sync::Arc;

use parking_lot::Mutex;
use rust_decimal::Decimal;
use tracing::debug;

use intentmesh_types::{IntentMeshError, Result};

#[derive(Debug, Default)]
struct PoolState {
    total: Decimal,
    reserved: Decimal,
}

/// A shared balance that concurrent borrowers reserve from
#[derive(Debug, Clone, Default)]
pub struct ReservationPool {
    state: Arc<Mutex<PoolState>>,
}

impl ReservationPool {
    pub fn new(total: Decimal) -> Self {
        Self {
            state: Arc::new(Mutex::new(PoolState {
                total,
                reserved: Decimal::ZERO,
            })),
        }
    }

    pub fn deposit(&self, amount: Decimal) {
        self.state.lock().total += amount;
    }

    pub fn total(&self) -> Decimal {
        self.state.lock().total
    }

    /// Unreserved balance
    pub fn available(&self) -> Decimal {
        let state = self.state.lock();
        state.total - state.reserved
    }

    /// Reserve `amount`, failing if it would over-allocate the pool
    pub fn reserve(&self, amount: Decimal) -> Result<Reservation> {
        if amount <= Decimal::ZERO {
            return Err(IntentMeshError::invalid_input("amount", "must be positive"));
        }

        let mut state = self.state.lock();
        let available = state.total - state.reserved;
        if amount > available {
            return Err(IntentMeshError::InsufficientLiquidity {
                requested: amount,
                available,
            });
        }
        state.reserved += amount;
        debug!(%amount, reserved = %state.reserved, "Liquidity reserved");

        Ok(Reservation {
            state: Arc::clone(&self.state),
            amount,
            done: false,
        })
    }
}

/// Guard for reserved liquidity; releases it on drop
#[derive(Debug)]
#[must_use = "dropping a reservation releases it immediately"]
pub struct Reservation {
    state: Arc<Mutex<PoolState>>,
    amount: Decimal,
    done: bool,
}

impl Reservation {
    pub fn amount(&self) -> Decimal {
        self.amount
    }

    /// The reserved funds leave the pool for good
    pub fn consume(mut self) -> Decimal {
        let mut state = self.state.lock();
        state.reserved -= self.amount;
        state.total -= self.amount;
        self.done = true;
        self.amount
    }

    /// Hand the reservation back explicitly
    pub fn release(self) {}
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if !self.done {
            self.state.lock().reserved -= self.amount;
        }
    }
}
