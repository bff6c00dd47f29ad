//! Auction configuration

use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Weights applied to the score components
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringWeights {
    #[serde(default = "default_price_weight")]
    pub price: f64,
    #[serde(default = "default_reputation_weight")]
    pub reputation: f64,
    #[serde(default = "default_speed_weight")]
    pub speed: f64,
    /// Multiplier for TEE-attested providers
    #[serde(default = "default_tee_bonus")]
    pub tee_bonus: f64,
}

fn default_price_weight() -> f64 {
    0.4
}

fn default_reputation_weight() -> f64 {
    0.4
}

fn default_speed_weight() -> f64 {
    0.1
}

fn default_tee_bonus() -> f64 {
    1.2
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            price: default_price_weight(),
            reputation: default_reputation_weight(),
            speed: default_speed_weight(),
            tee_bonus: default_tee_bonus(),
        }
    }
}

/// Auction engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuctionConfig {
    /// Smallest accepted intent budget
    #[serde(default = "default_min_budget")]
    pub min_budget: Decimal,

    /// Largest accepted intent budget
    #[serde(default = "default_max_budget")]
    pub max_budget: Decimal,

    /// Smallest accepted bid
    #[serde(default = "default_min_bid")]
    pub min_bid_amount: Decimal,

    /// Reference latency for the speed score when an intent sets none
    #[serde(default = "default_max_latency")]
    pub default_max_latency_ms: u64,

    /// Silence tolerated from the assigned provider before failing over
    #[serde(default = "default_failover_window")]
    pub failover_window_ms: u64,

    /// Promotions allowed after the initial assignment
    #[serde(default = "default_max_failover_attempts")]
    pub max_failover_attempts: u32,

    /// How long terminal intents stay queryable
    #[serde(default = "default_retention")]
    pub terminal_retention_secs: u64,

    #[serde(default = "default_max_tracked")]
    pub max_tracked_intents: usize,

    #[serde(default = "default_gc_interval")]
    pub gc_interval_secs: u64,

    #[serde(default)]
    pub weights: ScoringWeights,
}

fn default_min_budget() -> Decimal {
    Decimal::new(1, 4)
}

fn default_max_budget() -> Decimal {
    Decimal::from(10_000)
}

fn default_min_bid() -> Decimal {
    Decimal::new(1, 4)
}

fn default_max_latency() -> u64 {
    5_000
}

fn default_failover_window() -> u64 {
    2_000
}

fn default_max_failover_attempts() -> u32 {
    3
}

fn default_retention() -> u64 {
    10 * 60
}

fn default_max_tracked() -> usize {
    10_000
}

fn default_gc_interval() -> u64 {
    30
}

impl Default for AuctionConfig {
    fn default() -> Self {
        Self {
            min_budget: default_min_budget(),
            max_budget: default_max_budget(),
            min_bid_amount: default_min_bid(),
            default_max_latency_ms: default_max_latency(),
            failover_window_ms: default_failover_window(),
            max_failover_attempts: default_max_failover_attempts(),
            terminal_retention_secs: default_retention(),
            max_tracked_intents: default_max_tracked(),
            gc_interval_secs: default_gc_interval(),
            weights: ScoringWeights::default(),
        }
    }
}

impl AuctionConfig {
    pub fn failover_window(&self) -> Duration {
        Duration::from_millis(self.failover_window_ms)
    }

    pub fn terminal_retention(&self) -> Duration {
        Duration::from_secs(self.terminal_retention_secs)
    }

    pub fn gc_interval(&self) -> Duration {
        Duration::from_secs(self.gc_interval_secs.max(1))
    }
}
