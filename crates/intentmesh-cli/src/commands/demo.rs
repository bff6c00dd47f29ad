//! Demo commands - drive a local node end to end

use std::time::Duration;

use colored::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::broadcast::{self, error::TryRecvError};

use intentmesh_auction::{BidSubmission, CreateIntentRequest};
use intentmesh_escrow::EscrowManager;
use intentmesh_state::{Settings, SystemState};
use intentmesh_types::{
    Account, CompletionReport, IntentRequirements, KeyRef, ProviderSnapshot, SystemEvent,
};

use crate::display;

/// Print every event received since the last call
fn flush(events: &mut broadcast::Receiver<SystemEvent>) {
    loop {
        match events.try_recv() {
            Ok(event) => display::event(&event),
            Err(TryRecvError::Lagged(missed)) => {
                display::warning(&format!("{} events dropped", missed));
            }
            Err(_) => break,
        }
    }
}

async fn show_balance(state: &SystemState, label: &str, address: &str) {
    if let Some(balance) = state.balance(address).await {
        display::kv(label, &balance.to_string());
    }
}

/// Three providers compete for an inference job; optionally the winner
/// goes silent and the runner-up takes over.
pub async fn run_auction_demo(settings: &Settings, bidding_ms: u64, failover: bool) -> anyhow::Result<()> {
    println!("{}", "Intent auction: bid, assign, execute, settle".bright_white().bold());

    let state = SystemState::from_settings(settings).await?;
    let mut events = state.subscribe();

    display::section("Step 1: Accounts");
    let client = Account::new("client-agent", "0xc11e47", KeyRef::new("client-key"));
    state.provision_account(&client, dec!(10)).await;
    display::success(&format!("Client {} on the {} rail", client.id, state.rail.name()));
    show_balance(&state, "Client balance", &client.address).await;

    display::section("Step 2: Open intent");
    let intent = state
        .engine
        .create_intent(CreateIntentRequest {
            client: client.clone(),
            work_type: "inference".to_string(),
            parameters: serde_json::json!({ "model": "llama-70b", "prompt": "Summarise the report" }),
            requirements: IntentRequirements::default(),
            max_budget: dec!(0.02),
            currency: Some(settings.escrow.currency.clone()),
            bidding_duration: Duration::from_millis(bidding_ms),
            execution_duration: Duration::from_secs(30),
        })
        .await?;
    flush(&mut events);
    display::success(&format!("Intent {} open for {} ms", intent.id, bidding_ms));

    display::section("Step 3: Bids");
    let offers: [(&str, Decimal, f64, bool, u64); 3] = [
        ("provider-a", dec!(0.015), 4.0, false, 3000),
        ("provider-b", dec!(0.010), 4.5, false, 5000),
        ("provider-c", dec!(0.018), 4.9, true, 500),
    ];
    for (provider, amount, reputation, tee, time_ms) in offers {
        state
            .engine
            .submit_bid(
                &intent.id,
                BidSubmission {
                    provider: provider.to_string(),
                    provider_address: format!("0x{}", provider),
                    bid_amount: amount,
                    estimated_time_ms: time_ms,
                    confidence: 90,
                    snapshot: ProviderSnapshot {
                        reputation,
                        tee_attested: tee,
                        capabilities: vec!["inference".to_string()],
                    },
                },
            )
            .await?;
    }
    flush(&mut events);

    display::section("Step 4: Winner selection");
    tokio::time::sleep(Duration::from_millis(bidding_ms + 100)).await;
    let view = state.engine.get_intent(&intent.id).await?;
    flush(&mut events);
    for bid in &view.bids {
        display::kv(
            &bid.provider,
            &format!(
                "{} score {} rank {}",
                bid.status,
                bid.score.map(|s| format!("{:.2}", s)).unwrap_or_else(|| "-".to_string()),
                bid.rank.map(|r| r.to_string()).unwrap_or_else(|| "-".to_string())
            ),
        );
    }

    if failover {
        display::section("Step 5: Failover");
        let window = settings.auction.failover_window();
        display::warning(&format!(
            "Winner stays silent for {} ms",
            window.as_millis()
        ));
        tokio::time::sleep(window + Duration::from_millis(200)).await;
        flush(&mut events);
    }

    display::section("Step 6: Execution");
    let view = state.engine.get_intent(&intent.id).await?;
    let Some(provider) = view.intent.assigned_provider.clone() else {
        anyhow::bail!("intent {} ended {} without an assignment", intent.id, view.intent.status);
    };
    state
        .engine
        .report_progress(&intent.id, &provider, Some("model loaded".to_string()))
        .await?;
    let completed = state
        .engine
        .report_completion(
            &intent.id,
            &provider,
            CompletionReport {
                output: serde_json::json!({ "summary": "Revenue grew 12% quarter on quarter" }),
                execution_time_ms: 420,
                proof_ref: None,
                attestation_ref: None,
            },
        )
        .await?;
    flush(&mut events);
    display::success(&format!("Intent {} by {}", completed.status, provider));

    display::section("Summary");
    let escrow = state.escrow.get_by_intent(&intent.id).await?;
    display::kv("Escrow", &escrow.status.to_string());
    display::kv("Released", &escrow.released_total().to_string());
    display::kv("Refunded", &escrow.refunded_total().to_string());
    show_balance(&state, "Client balance", &client.address).await;
    show_balance(&state, &format!("{} balance", provider), &format!("0x{}", provider)).await;
    if let Some(result) = &completed.result {
        display::kv(
            "Settlement",
            result.settlement_reference.as_deref().unwrap_or("-"),
        );
    }
    Ok(())
}

/// An agent and an API bill each other, then settle the difference once
pub async fn run_bilateral_demo(settings: &Settings) -> anyhow::Result<()> {
    println!("{}", "Bilateral session: many payments, one transfer".bright_white().bold());

    let state = SystemState::from_settings(settings).await?;
    let mut events = state.subscribe();

    display::section("Step 1: Open session");
    let client = Account::new("trading-agent", "0xa9e47", KeyRef::new("agent-key"));
    let server = Account::new("price-api", "0xa91", KeyRef::new("api-key"));
    state.provision_account(&client, dec!(1)).await;
    state.provision_account(&server, dec!(1)).await;
    let session = state.bilateral.create_session(client.clone(), server.clone())?;
    flush(&mut events);

    display::section("Step 2: Record payments");
    for _ in 0..3 {
        state
            .bilateral
            .record_client_payment(&session.id, dec!(0.003), "crypto.price", None)
            .await?;
    }
    state
        .bilateral
        .record_server_payment(
            &session.id,
            dec!(0.01),
            "data.provided",
            Some("signal batch".to_string()),
        )
        .await?;
    flush(&mut events);
    display::info("No funds have moved yet");

    display::section("Step 3: Settle");
    let settled = state.bilateral.settle(&session.id).await?;
    flush(&mut events);
    if let Some(settlement) = &settled.settlement {
        display::kv("Direction", &format!("{:?}", settlement.direction));
        display::kv("Amount", &settlement.amount.to_string());
        display::kv("Transactions", &settlement.transaction_count.to_string());
        display::kv("Reference", settlement.reference.as_deref().unwrap_or("-"));
    }
    show_balance(&state, "Client balance", &client.address).await;
    show_balance(&state, "Server balance", &server.address).await;
    display::success(&format!("Session {}", settled.status));
    Ok(())
}
