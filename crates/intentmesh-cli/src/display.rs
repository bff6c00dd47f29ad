//! Display utilities for the CLI

use colored::*;

use intentmesh_types::SystemEvent;

/// Print a section header
pub fn section(title: &str) {
    println!();
    println!("{}", "━".repeat(60).bright_black());
    println!(" {}", title.bright_white().bold());
    println!("{}", "━".repeat(60).bright_black());
}

/// Print a success message
pub fn success(message: &str) {
    println!("  {} {}", "✓".bright_green(), message);
}

/// Print an info message
pub fn info(message: &str) {
    println!("  {} {}", "→".bright_blue(), message);
}

/// Print a warning message
pub fn warning(message: &str) {
    println!("  {} {}", "⚠".yellow(), message.yellow());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("      {}: {}", key, value.bright_cyan());
}

/// Print one system event as a single line
pub fn event(event: &SystemEvent) {
    let line = match event {
        SystemEvent::IntentOpened { intent_id, work_type, max_budget, currency, .. } => {
            format!("IntentOpened       {} {} budget {} {}", intent_id, work_type, max_budget, currency)
        }
        SystemEvent::BidReceived { provider, bid_amount, bid_count, .. } => {
            format!("BidReceived        {} bids {} (#{})", provider, bid_amount, bid_count)
        }
        SystemEvent::WinnerSelected { provider, score, failover_queue, .. } => {
            format!(
                "WinnerSelected     {} score {:.2}, backups [{}]",
                provider,
                score,
                failover_queue.join(", ")
            )
        }
        SystemEvent::ExecutionProgress { provider, message, .. } => format!(
            "ExecutionProgress  {} {}",
            provider,
            message.as_deref().unwrap_or("")
        ),
        SystemEvent::IntentCompleted { provider, amount_settled, .. } => {
            format!("IntentCompleted    {} paid {}", provider, amount_settled)
        }
        SystemEvent::IntentFailed { reason, .. } => format!("IntentFailed       {}", reason),
        SystemEvent::IntentCancelled { intent_id, .. } => format!("IntentCancelled    {}", intent_id),
        SystemEvent::IntentDisputed { reason, .. } => format!("IntentDisputed     {}", reason),
        SystemEvent::FailoverTriggered { reason, failed_provider, new_provider, attempt, .. } => {
            format!(
                "FailoverTriggered  {} -> {} ({:?}, attempt {})",
                failed_provider, new_provider, reason, attempt
            )
        }
        SystemEvent::EscrowFunded { escrow_id, amount, .. } => {
            format!("EscrowFunded       {} holds {}", escrow_id, amount)
        }
        SystemEvent::EscrowReleased { recipient, amount, remainder_refunded, .. } => format!(
            "EscrowReleased     {} to {}, {} back to client",
            amount, recipient, remainder_refunded
        ),
        SystemEvent::EscrowRefunded { amount, reason, .. } => {
            format!("EscrowRefunded     {} ({})", amount, reason)
        }
        SystemEvent::EscrowDisputed { reason, .. } => format!("EscrowDisputed     {}", reason),
        SystemEvent::EscrowSlashed { penalty_recipient, amount, .. } => {
            format!("EscrowSlashed      {} to {}", amount, penalty_recipient)
        }
        SystemEvent::SessionCreated { session_id, client_id, server_id, .. } => {
            format!("SessionCreated     {} {} <-> {}", session_id, client_id, server_id)
        }
        SystemEvent::TransactionRecorded { payer, amount, resource, net_balance, .. } => format!(
            "TransactionRecorded {} paid {} for {}, net {}",
            payer, amount, resource, net_balance
        ),
        SystemEvent::SessionSettled { direction, amount, transaction_count, .. } => format!(
            "SessionSettled     {:?} {} over {} transactions",
            direction, amount, transaction_count
        ),
        SystemEvent::SessionExpired { session_id, .. } => format!("SessionExpired     {}", session_id),
    };
    println!("  {} {}", "◆".bright_magenta(), line.bright_black());
}
