//! IntentMesh Settlement - Payment rail capability and implementations
//!
//! Escrow and bilateral settlement both move funds through a single
//! contract: [`PaymentRail::transfer`]. The rail is chosen once, when the
//! system is assembled:
//!
//! - [`InMemoryRail`] keeps real balances in memory and refuses overdrafts
//! - [`SimulatedRail`] moves nothing and fabricates references after a delay
//!
//! Neither implementation retries. A failed transfer is reported to the
//! caller, which keeps its record in the pre-call state.
//!
//! [`ReservationPool`] stands apart from the rails: it tracks a shared
//! balance that concurrent borrowers reserve from, and is handed out by the
//! node as its liquidity pool.

use async_trait::async_trait;

pub use intentmesh_types::{RailError, TransferReceipt, TransferRequest};

pub mod memory;
pub mod pool;
pub mod simulated;

pub use memory::InMemoryRail;
pub use pool::{Reservation, ReservationPool};
pub use simulated::SimulatedRail;

/// The external capability that actually moves funds
#[async_trait]
pub trait PaymentRail: Send + Sync {
    /// Short name used in logs and errors
    fn name(&self) -> &str;

    /// Move `request.amount` from the account behind `request.from` to
    /// `request.to`. Called at most once per logical operation.
    async fn transfer(&self, request: TransferRequest) -> Result<TransferReceipt, RailError>;
}
