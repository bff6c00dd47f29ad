//! IntentMesh Auction - Intent lifecycle, bid scoring and failover
//!
//! A client intent is escrowed, opened to bidding for a fixed window, and
//! awarded to the best-scoring provider. The runners-up form a failover
//! queue that takes over when the assigned provider goes silent or fails.
//!
//! ```text
//! CREATED → OPEN → ASSIGNED ⇄ EXECUTING → COMPLETED
//!            │        │ (failover)
//!            │        └──────────────→ FAILED | DISPUTED
//!            └→ CANCELLED | FAILED (no bids)
//! ```

pub mod config;
pub mod engine;
pub mod scoring;

pub use config::{AuctionConfig, ScoringWeights};
pub use engine::{AuctionEngine, BidSubmission, CreateIntentRequest, IntentView, SweepReport};
pub use scoring::{check_requirements, rank_bids, score_bid, Disqualification, Ranking};
