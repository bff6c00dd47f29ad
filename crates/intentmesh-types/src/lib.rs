//! IntentMesh Types - Canonical domain types for the intent auction and
//! settlement engine
//!
//! This crate has no dependencies on other intentmesh crates. It defines:
//!
//! - Identity types (IntentId, EscrowId, SessionId, Account, ...)
//! - Intents, bids and their lifecycle states
//! - Escrow custody records
//! - Bilateral sessions and their transactions
//! - The payment rail contract types
//! - System events and the event bus
//! - The shared error taxonomy
//!
//! # Flow
//!
//! ```text
//! Intent (escrow funded) → Bids → Ranking → Assignment ⇄ Failover → Release | Refund
//! ```

pub mod identity;
pub mod intent;
pub mod bid;
pub mod escrow;
pub mod session;
pub mod transfer;
pub mod events;
pub mod error;

pub use identity::*;
pub use intent::*;
pub use bid::*;
pub use escrow::*;
pub use session::*;
pub use transfer::*;
pub use events::*;
pub use error::*;

/// Currency used when none is configured
pub const DEFAULT_CURRENCY: &str = "USDC";
