//! IntentMesh State - Composition root
//!
//! Builds one node from [`Settings`]: the event bus, the configured payment
//! rail, the escrow ledger, the bilateral ledger and the auction engine,
//! all sharing the same bus, plus the liquidity pool borrowers reserve from.
//!
//! ```text
//!   clients ──▶ AuctionEngine ──▶ EscrowLedger ──┐
//!                                                ├──▶ PaymentRail
//!   sessions ─▶ BilateralLedger ─────────────────┘
//! ```

pub mod settings;

use std::sync::Arc;

use rust_decimal::Decimal;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::info;

use intentmesh_auction::AuctionEngine;
use intentmesh_clearing::BilateralLedger;
use intentmesh_escrow::EscrowLedger;
use intentmesh_settlement::{InMemoryRail, PaymentRail, ReservationPool, SimulatedRail};
use intentmesh_types::{Account, EventBus, SystemEvent};

pub use settings::{
    EscrowConfig, EventsConfig, LiquidityConfig, LoggingConfig, RailConfig, RailKind, Settings,
    SettingsError,
};

/// Everything one IntentMesh node runs on
pub struct SystemState {
    pub settings: Settings,
    pub events: EventBus,
    pub rail: Arc<dyn PaymentRail>,
    /// Set when the rail keeps real balances
    memory_rail: Option<Arc<InMemoryRail>>,
    pub escrow: Arc<EscrowLedger>,
    pub bilateral: Arc<BilateralLedger>,
    pub engine: AuctionEngine,
    pub liquidity: ReservationPool,
}

impl SystemState {
    /// Validate `settings` and wire up a node
    pub async fn from_settings(settings: &Settings) -> Result<Self, SettingsError> {
        settings.validate()?;

        let events = EventBus::new(settings.events.capacity);
        let custody = settings.escrow.custody_account();

        let memory_rail = match settings.rail.kind {
            RailKind::Memory => {
                let rail = Arc::new(InMemoryRail::new());
                rail.register_key(custody.key.clone(), custody.address.clone()).await;
                Some(rail)
            }
            RailKind::Simulated => None,
        };
        let rail: Arc<dyn PaymentRail> = match &memory_rail {
            Some(rail) => rail.clone(),
            None => Arc::new(SimulatedRail::new(settings.rail.latency())),
        };

        let escrow = Arc::new(EscrowLedger::new(rail.clone(), custody, events.clone()));
        let bilateral = Arc::new(BilateralLedger::new(
            rail.clone(),
            settings.bilateral.clone(),
            events.clone(),
        ));
        let engine = AuctionEngine::new(settings.auction.clone(), escrow.clone(), events.clone());
        let liquidity = ReservationPool::new(settings.liquidity.pool_size);

        info!(rail = rail.name(), pool = %settings.liquidity.pool_size, "IntentMesh node initialised");
        Ok(Self {
            settings: settings.clone(),
            events,
            rail,
            memory_rail,
            escrow,
            bilateral,
            engine,
            liquidity,
        })
    }

    /// Subscribe to system events
    pub fn subscribe(&self) -> broadcast::Receiver<SystemEvent> {
        self.events.subscribe()
    }

    /// Make `account` usable on the rail with an opening balance.
    ///
    /// The simulated rail has no accounts, so this only does something on
    /// the in-memory rail.
    pub async fn provision_account(&self, account: &Account, balance: Decimal) {
        if let Some(rail) = &self.memory_rail {
            rail.register_key(account.key.clone(), account.address.clone()).await;
            rail.set_balance(account.address.clone(), balance).await;
        }
    }

    /// Current balance at `address`, if the rail keeps balances
    pub async fn balance(&self, address: &str) -> Option<Decimal> {
        match &self.memory_rail {
            Some(rail) => Some(rail.balance(address).await),
            None => None,
        }
    }

    /// Start the intent garbage collector and the session expiry sweeper
    pub fn spawn_background_tasks(&self) -> Vec<JoinHandle<()>> {
        vec![
            self.engine.spawn_sweeper(),
            self.bilateral.spawn_expiry_sweeper(),
        ]
    }
}
