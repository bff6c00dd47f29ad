//! IntentMesh CLI
//!
//! Runs a local IntentMesh node in-process. Settings come from built-in
//! defaults, an optional TOML file and `INTENTMESH__*` environment variables.
//!
//! # Quick Start
//!
//! ```bash
//! # Show the effective settings
//! intentmesh config
//!
//! # Three providers bid for an inference job, the winner goes silent
//! intentmesh demo auction --failover
//!
//! # Two parties net their payments into one transfer
//! INTENTMESH__RAIL__KIND=simulated intentmesh demo bilateral
//! ```

use clap::{Parser, Subcommand};
use colored::*;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;
mod display;

use commands::{config, demo};
use intentmesh_state::{LoggingConfig, Settings};

/// IntentMesh CLI - intent auctions with escrow and bilateral settlement
#[derive(Parser)]
#[command(name = "intentmesh")]
#[command(version)]
#[command(about = "Intent auctions with escrowed budgets, failover and bilateral net settlement", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long, global = true, env = "INTENTMESH_CONFIG")]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the effective settings as JSON
    Config,

    /// Run demo scenarios against a local node
    Demo {
        #[command(subcommand)]
        demo_type: DemoCommands,
    },
}

#[derive(Subcommand)]
enum DemoCommands {
    /// Three-bid auction through to settlement
    Auction {
        /// Length of the bidding window
        #[arg(long, default_value = "1000")]
        bidding_ms: u64,

        /// Let the winner go silent so the runner-up takes over
        #[arg(long)]
        failover: bool,
    },

    /// Record payments both ways in a session and settle the net
    Bilateral,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;

    // Config output stays clean JSON, so logging starts after it
    let Commands::Demo { demo_type } = cli.command else {
        return config::show(&settings);
    };

    init_logging(&settings.logging)?;
    tracing::debug!(version = env!("CARGO_PKG_VERSION"), "Starting intentmesh");
    print_banner();

    match demo_type {
        DemoCommands::Auction { bidding_ms, failover } => {
            demo::run_auction_demo(&settings, bidding_ms, failover).await?;
        }
        DemoCommands::Bilateral => {
            demo::run_bilateral_demo(&settings).await?;
        }
    }

    Ok(())
}

/// Initialize logging
fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level));

    let subscriber = tracing_subscriber::registry().with(env_filter);

    match config.format.as_str() {
        "json" => subscriber
            .with(fmt::layer().json().with_target(true))
            .try_init()?,
        _ => subscriber
            .with(fmt::layer().pretty().with_target(true))
            .try_init()?,
    }

    Ok(())
}

fn print_banner() {
    println!();
    println!("{}", "╔══════════════════════════════════════════════════╗".bright_cyan());
    println!(
        "{}{}{}",
        "║  ".bright_cyan(),
        "IntentMesh".bright_white().bold(),
        " - intent auctions and net settlement ║".bright_cyan()
    );
    println!("{}", "╚══════════════════════════════════════════════════╝".bright_cyan());
    println!();
}
