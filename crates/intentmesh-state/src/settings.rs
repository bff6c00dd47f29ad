//! Settings
//!
//! Layered configuration for an IntentMesh node. Sources, lowest priority
//! first: built-in defaults, an optional TOML file, then environment
//! variables prefixed `INTENTMESH__` with `__` between nesting levels.
//!
//! ```bash
//! INTENTMESH__AUCTION__FAILOVER_WINDOW_MS=5000 \
//! INTENTMESH__RAIL__KIND=simulated intentmesh config
//! ```

use std::time::Duration;

use config::builder::DefaultState;
use config::{ConfigBuilder, Environment, File};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use intentmesh_auction::AuctionConfig;
use intentmesh_clearing::BilateralConfig;
use intentmesh_types::{Account, KeyRef, DEFAULT_CURRENCY};

/// Environment variable prefix
pub const ENV_PREFIX: &str = "INTENTMESH";

/// Configuration errors
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {field} - {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl SettingsError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Node settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub auction: AuctionConfig,

    #[serde(default)]
    pub escrow: EscrowConfig,

    #[serde(default)]
    pub bilateral: BilateralConfig,

    #[serde(default)]
    pub rail: RailConfig,

    #[serde(default)]
    pub liquidity: LiquidityConfig,

    #[serde(default)]
    pub events: EventsConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Escrow custody account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscrowConfig {
    #[serde(default = "default_custody_id")]
    pub custody_id: String,

    /// Address escrowed funds are held at
    #[serde(default = "default_custody_address")]
    pub custody_address: String,

    /// Rail key that signs payouts from custody
    #[serde(default = "default_custody_key")]
    pub custody_key: String,

    #[serde(default = "default_currency")]
    pub currency: String,
}

impl Default for EscrowConfig {
    fn default() -> Self {
        Self {
            custody_id: default_custody_id(),
            custody_address: default_custody_address(),
            custody_key: default_custody_key(),
            currency: default_currency(),
        }
    }
}

impl EscrowConfig {
    pub fn custody_account(&self) -> Account {
        Account::new(
            self.custody_id.clone(),
            self.custody_address.clone(),
            KeyRef::new(self.custody_key.clone()),
        )
    }
}

/// Which payment rail backs the node
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RailKind {
    /// Real balances kept in memory
    #[default]
    Memory,
    /// Demo mode: no funds move, references are fabricated
    Simulated,
}

/// Payment rail settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RailConfig {
    #[serde(default)]
    pub kind: RailKind,

    /// Per-transfer latency of the simulated rail
    #[serde(default = "default_rail_latency")]
    pub latency_ms: u64,
}

impl Default for RailConfig {
    fn default() -> Self {
        Self {
            kind: RailKind::default(),
            latency_ms: default_rail_latency(),
        }
    }
}

impl RailConfig {
    pub fn latency(&self) -> Duration {
        Duration::from_millis(self.latency_ms)
    }
}

/// Shared liquidity pool borrowers reserve from
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LiquidityConfig {
    /// Opening balance of the pool
    #[serde(default)]
    pub pool_size: Decimal,
}

/// Event bus settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Events buffered per subscriber before the slowest starts losing them
    #[serde(default = "default_event_capacity")]
    pub capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            capacity: default_event_capacity(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// =============================================================================
// Default Functions
// =============================================================================

fn default_custody_id() -> String {
    "escrow".to_string()
}

fn default_custody_address() -> String {
    "intentmesh-escrow".to_string()
}

fn default_custody_key() -> String {
    "escrow-custody".to_string()
}

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

fn default_rail_latency() -> u64 {
    50
}

fn default_event_capacity() -> usize {
    1024
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

// =============================================================================
// Configuration Loading
// =============================================================================

impl Settings {
    /// Load settings from an optional TOML file and the environment
    pub fn load(config_path: Option<&str>) -> Result<Self, SettingsError> {
        let mut builder = config::Config::builder();
        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }
        Self::from_builder(builder, Self::environment())
    }

    fn environment() -> Environment {
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true)
    }

    fn from_builder(
        builder: ConfigBuilder<DefaultState>,
        environment: Environment,
    ) -> Result<Self, SettingsError> {
        let settings: Settings = builder.add_source(environment).build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<(), SettingsError> {
        let auction = &self.auction;
        if auction.min_budget <= Decimal::ZERO {
            return Err(SettingsError::invalid("auction.min_budget", "must be positive"));
        }
        if auction.min_budget > auction.max_budget {
            return Err(SettingsError::invalid(
                "auction.min_budget",
                format!("{} exceeds max_budget {}", auction.min_budget, auction.max_budget),
            ));
        }
        if auction.min_bid_amount <= Decimal::ZERO || auction.min_bid_amount > auction.max_budget {
            return Err(SettingsError::invalid(
                "auction.min_bid_amount",
                "must be positive and within max_budget",
            ));
        }
        if auction.failover_window_ms == 0 {
            return Err(SettingsError::invalid("auction.failover_window_ms", "must be positive"));
        }
        if auction.default_max_latency_ms == 0 {
            return Err(SettingsError::invalid("auction.default_max_latency_ms", "must be positive"));
        }
        if auction.max_tracked_intents == 0 {
            return Err(SettingsError::invalid("auction.max_tracked_intents", "must be positive"));
        }

        let weights = &auction.weights;
        let components = [weights.price, weights.reputation, weights.speed];
        if components.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(SettingsError::invalid("auction.weights", "weights must be non-negative"));
        }
        if !weights.tee_bonus.is_finite() || weights.tee_bonus < 1.0 {
            return Err(SettingsError::invalid("auction.weights.tee_bonus", "must be at least 1"));
        }

        if self.escrow.custody_address.trim().is_empty() {
            return Err(SettingsError::invalid("escrow.custody_address", "must not be empty"));
        }
        if self.escrow.custody_key.trim().is_empty() {
            return Err(SettingsError::invalid("escrow.custody_key", "must not be empty"));
        }
        if self.bilateral.min_settlement_amount < Decimal::ZERO {
            return Err(SettingsError::invalid(
                "bilateral.min_settlement_amount",
                "must not be negative",
            ));
        }
        if self.liquidity.pool_size < Decimal::ZERO {
            return Err(SettingsError::invalid("liquidity.pool_size", "must not be negative"));
        }
        if self.events.capacity == 0 {
            return Err(SettingsError::invalid("events.capacity", "must be positive"));
        }
        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            return Err(SettingsError::invalid(
                "logging.format",
                format!("unknown format {:?}, expected pretty or json", self.logging.format),
            ));
        }
        Ok(())
    }
}
