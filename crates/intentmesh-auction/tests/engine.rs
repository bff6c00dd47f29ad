use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use intentmesh_auction::{AuctionConfig, AuctionEngine, BidSubmission, CreateIntentRequest};
use intentmesh_escrow::{EscrowLedger, EscrowManager};
use intentmesh_settlement::{InMemoryRail, PaymentRail};
use intentmesh_types::{
    Account, BidStatus, CompletionReport, DisputeResolution, ErrorKind, EscrowStatus, EventBus,
    FailoverReason, IntentId, IntentMeshError, IntentRequirements, IntentStatus, KeyRef,
    ProviderSnapshot, RailError, SystemEvent, TransferReceipt, TransferRequest,
};

const CLIENT_ADDR: &str = "client-addr";
const CUSTODY_ADDR: &str = "custody-addr";

/// In-memory rail that refuses transfers to blocked addresses
struct GatedRail {
    inner: Arc<InMemoryRail>,
    blocked: Mutex<HashSet<String>>,
}

impl GatedRail {
    fn block(&self, address: &str) {
        self.blocked.lock().unwrap().insert(address.to_string());
    }

    fn unblock(&self, address: &str) {
        self.blocked.lock().unwrap().remove(address);
    }
}

#[async_trait]
impl PaymentRail for GatedRail {
    fn name(&self) -> &str {
        "gated"
    }

    async fn transfer(&self, request: TransferRequest) -> Result<TransferReceipt, RailError> {
        if self.blocked.lock().unwrap().contains(&request.to) {
            return Err(RailError::Rejected {
                reason: format!("{} blocked", request.to),
            });
        }
        self.inner.transfer(request).await
    }
}

struct Harness {
    engine: AuctionEngine,
    escrow: Arc<EscrowLedger>,
    rail: Arc<InMemoryRail>,
    gate: Arc<GatedRail>,
    events: EventBus,
}

async fn harness(config: AuctionConfig) -> Harness {
    let rail = Arc::new(InMemoryRail::new());
    rail.register_key(KeyRef::new("client-key"), CLIENT_ADDR).await;
    rail.register_key(KeyRef::new("custody-key"), CUSTODY_ADDR).await;
    rail.set_balance(CLIENT_ADDR, dec!(10)).await;
    let gate = Arc::new(GatedRail {
        inner: rail.clone(),
        blocked: Mutex::new(HashSet::new()),
    });

    let events = EventBus::new(256);
    let custody = Account::new("escrow", CUSTODY_ADDR, KeyRef::new("custody-key"));
    let escrow = Arc::new(EscrowLedger::new(gate.clone(), custody, events.clone()));
    let engine = AuctionEngine::new(config, escrow.clone(), events.clone());

    Harness {
        engine,
        escrow,
        rail,
        gate,
        events,
    }
}

fn client() -> Account {
    Account::new("client-1", CLIENT_ADDR, KeyRef::new("client-key"))
}

fn request(max_budget: Decimal) -> CreateIntentRequest {
    CreateIntentRequest {
        client: client(),
        work_type: "inference".to_string(),
        parameters: serde_json::json!({ "model": "llama-70b", "prompt": "hello" }),
        requirements: IntentRequirements::default(),
        max_budget,
        currency: None,
        bidding_duration: Duration::from_secs(1),
        execution_duration: Duration::from_secs(30),
    }
}

fn bid(provider: &str, amount: Decimal, reputation: f64, tee: bool, time_ms: u64) -> BidSubmission {
    BidSubmission {
        provider: provider.to_string(),
        provider_address: format!("{}-addr", provider),
        bid_amount: amount,
        estimated_time_ms: time_ms,
        confidence: 90,
        snapshot: ProviderSnapshot {
            reputation,
            tee_attested: tee,
            capabilities: vec!["inference".to_string()],
        },
    }
}

/// Open an intent with the three reference bids and let bidding close
async fn assigned_intent(h: &Harness) -> IntentId {
    let intent = h.engine.create_intent(request(dec!(0.02))).await.unwrap();
    h.engine.submit_bid(&intent.id, bid("provider-a", dec!(0.015), 4.0, false, 3000)).await.unwrap();
    h.engine.submit_bid(&intent.id, bid("provider-b", dec!(0.010), 4.5, false, 5000)).await.unwrap();
    h.engine.submit_bid(&intent.id, bid("provider-c", dec!(0.018), 4.9, true, 500)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1100)).await;
    intent.id
}

fn drain(rx: &mut tokio::sync::broadcast::Receiver<SystemEvent>) -> Vec<SystemEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test(start_paused = true)]
async fn tee_bid_wins_and_runners_up_queue_in_score_order() {
    let h = harness(AuctionConfig::default()).await;
    let mut rx = h.events.subscribe();
    let intent_id = assigned_intent(&h).await;

    let view = h.engine.get_intent(&intent_id).await.unwrap();
    assert_eq!(view.intent.status, IntentStatus::Assigned);
    assert_eq!(view.intent.assigned_provider.as_deref(), Some("provider-c"));
    assert_eq!(view.intent.failover_queue, vec!["provider-b", "provider-a"]);

    let accepted: Vec<_> = view.bids.iter().filter(|b| b.status == BidStatus::Accepted).collect();
    assert_eq!(accepted.len(), 1);
    assert_eq!(accepted[0].rank, Some(1));
    assert!(view
        .bids
        .iter()
        .filter(|b| b.provider != "provider-c")
        .all(|b| b.status == BidStatus::Failover));

    let events = drain(&mut rx);
    assert!(matches!(events[0], SystemEvent::EscrowFunded { .. }));
    assert!(matches!(events[1], SystemEvent::IntentOpened { .. }));
    assert!(matches!(
        events.last(),
        Some(SystemEvent::WinnerSelected { provider, .. }) if provider == "provider-c"
    ));
}

#[tokio::test(start_paused = true)]
async fn completion_releases_bid_and_refunds_remainder() {
    let h = harness(AuctionConfig::default()).await;
    let intent_id = assigned_intent(&h).await;

    let intent = h
        .engine
        .report_progress(&intent_id, "provider-c", Some("loading model".to_string()))
        .await
        .unwrap();
    assert_eq!(intent.status, IntentStatus::Executing);

    let report = CompletionReport {
        output: serde_json::json!({ "text": "hi" }),
        execution_time_ms: 420,
        proof_ref: Some("proof-1".to_string()),
        attestation_ref: None,
    };
    let intent = h.engine.report_completion(&intent_id, "provider-c", report).await.unwrap();
    assert_eq!(intent.status, IntentStatus::Completed);

    let result = intent.result.unwrap();
    assert_eq!(result.amount_settled, dec!(0.018));
    assert!(result.settlement_reference.is_some());

    assert_eq!(h.rail.balance("provider-c-addr").await, dec!(0.018));
    assert_eq!(h.rail.balance(CLIENT_ADDR).await, dec!(9.982));
    assert_eq!(h.rail.balance(CUSTODY_ADDR).await, dec!(0));

    let escrow = h.escrow.get_by_intent(&intent_id).await.unwrap();
    assert_eq!(escrow.status, EscrowStatus::Released);

    let view = h.engine.get_intent(&intent_id).await.unwrap();
    for bid in &view.bids {
        let expected = if bid.provider == "provider-c" {
            BidStatus::Executed
        } else {
            BidStatus::Rejected
        };
        assert_eq!(bid.status, expected);
    }
}

#[tokio::test(start_paused = true)]
async fn completion_cancels_failover_timer() {
    let h = harness(AuctionConfig::default()).await;
    let intent_id = assigned_intent(&h).await;
    let mut rx = h.events.subscribe();

    h.engine
        .report_completion(&intent_id, "provider-c", CompletionReport::default())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(10)).await;

    let view = h.engine.get_intent(&intent_id).await.unwrap();
    assert_eq!(view.intent.status, IntentStatus::Completed);
    assert!(!drain(&mut rx)
        .iter()
        .any(|e| matches!(e, SystemEvent::FailoverTriggered { .. } | SystemEvent::IntentFailed { .. })));
}

#[tokio::test(start_paused = true)]
async fn silent_providers_fail_over_then_refund() {
    let h = harness(AuctionConfig::default()).await;
    let mut rx = h.events.subscribe();

    let intent = h.engine.create_intent(request(dec!(0.02))).await.unwrap();
    h.engine.submit_bid(&intent.id, bid("fast", dec!(0.01), 4.8, false, 500)).await.unwrap();
    h.engine.submit_bid(&intent.id, bid("slow", dec!(0.015), 3.0, false, 4000)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert_eq!(
        h.engine.get_intent(&intent.id).await.unwrap().intent.assigned_provider.as_deref(),
        Some("fast")
    );

    // First window elapses without a word from the winner
    tokio::time::sleep(Duration::from_millis(2100)).await;
    let view = h.engine.get_intent(&intent.id).await.unwrap();
    assert_eq!(view.intent.status, IntentStatus::Assigned);
    assert_eq!(view.intent.assigned_provider.as_deref(), Some("slow"));
    assert!(view.intent.failover_queue.is_empty());
    assert_eq!(view.bids[0].status, BidStatus::Failed);
    assert_eq!(view.bids[1].status, BidStatus::Accepted);

    let failover = drain(&mut rx)
        .into_iter()
        .find_map(|e| match e {
            SystemEvent::FailoverTriggered { reason, failed_provider, new_provider, attempt, .. } => {
                Some((reason, failed_provider, new_provider, attempt))
            }
            _ => None,
        })
        .unwrap();
    assert_eq!(
        failover,
        (FailoverReason::Timeout, "fast".to_string(), "slow".to_string(), 1)
    );

    // The backup stays silent too and the queue is empty
    tokio::time::sleep(Duration::from_millis(2100)).await;
    let view = h.engine.get_intent(&intent.id).await.unwrap();
    assert_eq!(view.intent.status, IntentStatus::Failed);
    assert!(!view.refund_outstanding);
    assert!(view.bids.iter().all(|b| b.status == BidStatus::Failed));

    let escrow = h.escrow.get_by_intent(&intent.id).await.unwrap();
    assert_eq!(escrow.status, EscrowStatus::Refunded);
    assert_eq!(escrow.refunded_total(), dec!(0.02));
    assert_eq!(h.rail.balance(CLIENT_ADDR).await, dec!(10));
}

#[tokio::test(start_paused = true)]
async fn progress_restarts_failover_window() {
    let h = harness(AuctionConfig::default()).await;
    let intent_id = assigned_intent(&h).await;

    tokio::time::sleep(Duration::from_millis(1500)).await;
    h.engine.report_progress(&intent_id, "provider-c", None).await.unwrap();

    // Past the original window, inside the restarted one
    tokio::time::sleep(Duration::from_millis(1500)).await;
    let view = h.engine.get_intent(&intent_id).await.unwrap();
    assert_eq!(view.intent.status, IntentStatus::Executing);
    assert_eq!(view.intent.assigned_provider.as_deref(), Some("provider-c"));

    tokio::time::sleep(Duration::from_millis(1000)).await;
    let view = h.engine.get_intent(&intent_id).await.unwrap();
    assert_eq!(view.intent.status, IntentStatus::Assigned);
    assert_eq!(view.intent.assigned_provider.as_deref(), Some("provider-b"));
}

#[tokio::test(start_paused = true)]
async fn reported_failures_walk_the_queue_without_revisiting() {
    let h = harness(AuctionConfig::default()).await;
    let intent_id = assigned_intent(&h).await;

    let intent = h.engine.report_failure(&intent_id, "provider-c", "out of memory").await.unwrap();
    assert_eq!(intent.assigned_provider.as_deref(), Some("provider-b"));
    assert_eq!(intent.failover_queue, vec!["provider-a"]);

    // A provider that already failed cannot act on the intent any more
    let err = h
        .engine
        .report_completion(&intent_id, "provider-c", CompletionReport::default())
        .await
        .unwrap_err();
    assert!(matches!(err, IntentMeshError::NotAssignedProvider { .. }));

    let intent = h.engine.report_failure(&intent_id, "provider-b", "crashed").await.unwrap();
    assert_eq!(intent.assigned_provider.as_deref(), Some("provider-a"));
    assert!(intent.failover_queue.is_empty());

    let intent = h.engine.report_failure(&intent_id, "provider-a", "crashed").await.unwrap();
    assert_eq!(intent.status, IntentStatus::Failed);
    assert_eq!(intent.failure_reason.as_deref(), Some("failover queue exhausted"));
    assert_eq!(
        h.escrow.get_by_intent(&intent_id).await.unwrap().status,
        EscrowStatus::Refunded
    );
}

#[tokio::test(start_paused = true)]
async fn failover_attempts_are_capped() {
    let config = AuctionConfig {
        max_failover_attempts: 1,
        ..Default::default()
    };
    let h = harness(config).await;
    let intent_id = assigned_intent(&h).await;

    h.engine.report_failure(&intent_id, "provider-c", "oom").await.unwrap();
    let intent = h.engine.report_failure(&intent_id, "provider-b", "oom").await.unwrap();
    assert_eq!(intent.status, IntentStatus::Failed);
    assert_eq!(intent.failure_reason.as_deref(), Some("failover attempts exhausted"));

    let view = h.engine.get_intent(&intent_id).await.unwrap();
    let a = view.bids.iter().find(|b| b.provider == "provider-a").unwrap();
    assert_eq!(a.status, BidStatus::Rejected);
}

#[tokio::test(start_paused = true)]
async fn execution_deadline_fails_intent() {
    let config = AuctionConfig {
        failover_window_ms: 60_000,
        ..Default::default()
    };
    let h = harness(config).await;
    let mut req = request(dec!(0.02));
    req.execution_duration = Duration::from_secs(3);
    let intent = h.engine.create_intent(req).await.unwrap();
    h.engine.submit_bid(&intent.id, bid("solo", dec!(0.01), 4.0, false, 1000)).await.unwrap();

    tokio::time::sleep(Duration::from_millis(1100)).await;
    h.engine.report_progress(&intent.id, "solo", None).await.unwrap();

    tokio::time::sleep(Duration::from_secs(3)).await;
    let view = h.engine.get_intent(&intent.id).await.unwrap();
    assert_eq!(view.intent.status, IntentStatus::Failed);
    assert_eq!(view.intent.failure_reason.as_deref(), Some("execution deadline passed"));
    assert_eq!(view.intent.assigned_provider.as_deref(), Some("solo"));
    assert_eq!(h.rail.balance(CLIENT_ADDR).await, dec!(10));
}

#[tokio::test(start_paused = true)]
async fn late_bid_is_rejected_and_not_counted() {
    let h = harness(AuctionConfig::default()).await;
    let intent = h.engine.create_intent(request(dec!(0.02))).await.unwrap();
    h.engine.submit_bid(&intent.id, bid("early", dec!(0.01), 4.0, false, 1000)).await.unwrap();

    tokio::time::sleep(Duration::from_millis(1500)).await;
    let err = h
        .engine
        .submit_bid(&intent.id, bid("late", dec!(0.005), 5.0, true, 100))
        .await
        .unwrap_err();
    assert!(matches!(err, IntentMeshError::BiddingClosed { .. }));
    assert_eq!(err.kind(), ErrorKind::StateConflict);

    let view = h.engine.get_intent(&intent.id).await.unwrap();
    assert_eq!(view.bids.len(), 1);
    assert_eq!(view.intent.assigned_provider.as_deref(), Some("early"));
}

#[tokio::test(start_paused = true)]
async fn close_bidding_is_idempotent_and_waits_for_deadline() {
    let h = harness(AuctionConfig::default()).await;
    let intent = h.engine.create_intent(request(dec!(0.02))).await.unwrap();
    h.engine.submit_bid(&intent.id, bid("only", dec!(0.01), 4.0, false, 1000)).await.unwrap();

    let early = h.engine.close_bidding(&intent.id).await.unwrap();
    assert_eq!(early.status, IntentStatus::Open);

    tokio::time::sleep(Duration::from_millis(1100)).await;
    let first = h.engine.close_bidding(&intent.id).await.unwrap();
    let second = h.engine.close_bidding(&intent.id).await.unwrap();
    assert_eq!(first.status, IntentStatus::Assigned);
    assert_eq!(first, second);
}

#[tokio::test(start_paused = true)]
async fn no_valid_bids_fails_and_refunds() {
    let h = harness(AuctionConfig::default()).await;
    let mut req = request(dec!(0.5));
    req.requirements.require_tee = true;
    let intent = h.engine.create_intent(req).await.unwrap();
    h.engine.submit_bid(&intent.id, bid("plain", dec!(0.1), 5.0, false, 100)).await.unwrap();

    tokio::time::sleep(Duration::from_millis(1100)).await;
    let view = h.engine.get_intent(&intent.id).await.unwrap();
    assert_eq!(view.intent.status, IntentStatus::Failed);
    assert_eq!(view.intent.assigned_provider, None);
    assert_eq!(view.bids[0].status, BidStatus::Rejected);
    assert_eq!(view.bids[0].score, None);
    assert_eq!(h.rail.balance(CLIENT_ADDR).await, dec!(10));
}

#[tokio::test(start_paused = true)]
async fn cancel_refunds_open_intent_only() {
    let h = harness(AuctionConfig::default()).await;
    let intent = h.engine.create_intent(request(dec!(0.3))).await.unwrap();
    h.engine.submit_bid(&intent.id, bid("p", dec!(0.1), 4.0, false, 100)).await.unwrap();

    let err = h.engine.cancel_intent(&intent.id, "someone-else").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let cancelled = h.engine.cancel_intent(&intent.id, "client-1").await.unwrap();
    assert_eq!(cancelled.status, IntentStatus::Cancelled);
    assert_eq!(h.rail.balance(CLIENT_ADDR).await, dec!(10));

    // The bidding timer must not resurrect a cancelled intent
    tokio::time::sleep(Duration::from_secs(5)).await;
    let view = h.engine.get_intent(&intent.id).await.unwrap();
    assert_eq!(view.intent.status, IntentStatus::Cancelled);
    assert_eq!(view.bids[0].status, BidStatus::Rejected);

    let assigned = assigned_intent(&h).await;
    let err = h.engine.cancel_intent(&assigned, "client-1").await.unwrap_err();
    assert!(matches!(
        err,
        IntentMeshError::InvalidIntentState { status: IntentStatus::Assigned, .. }
    ));
}

#[tokio::test(start_paused = true)]
async fn cancel_with_rail_down_keeps_intent_open() {
    let h = harness(AuctionConfig::default()).await;
    let intent = h.engine.create_intent(request(dec!(0.3))).await.unwrap();

    h.rail.set_available(false).await;
    let err = h.engine.cancel_intent(&intent.id, "client-1").await.unwrap_err();
    assert!(err.is_retriable());
    assert_eq!(
        h.engine.get_intent(&intent.id).await.unwrap().intent.status,
        IntentStatus::Open
    );

    h.rail.set_available(true).await;
    h.engine.cancel_intent(&intent.id, "client-1").await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn rejects_invalid_requests() {
    let h = harness(AuctionConfig::default()).await;

    let err = h.engine.create_intent(request(dec!(0))).await.unwrap_err();
    assert!(matches!(err, IntentMeshError::AmountOutOfRange { .. }));

    let mut req = request(dec!(0.02));
    req.bidding_duration = Duration::ZERO;
    assert_eq!(h.engine.create_intent(req).await.unwrap_err().kind(), ErrorKind::Validation);

    let mut req = request(dec!(0.02));
    req.requirements.excluded_providers = vec!["banned".to_string()];
    let intent = h.engine.create_intent(req).await.unwrap();

    let err = h
        .engine
        .submit_bid(&intent.id, bid("greedy", dec!(0.03), 4.0, false, 100))
        .await
        .unwrap_err();
    assert!(matches!(err, IntentMeshError::AmountOutOfRange { .. }));

    let err = h
        .engine
        .submit_bid(&intent.id, bid("banned", dec!(0.01), 4.0, false, 100))
        .await
        .unwrap_err();
    assert!(matches!(err, IntentMeshError::ProviderExcluded { .. }));

    let err = h
        .engine
        .submit_bid(&intent.id, bid("liar", dec!(0.01), 7.5, false, 100))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    h.engine.submit_bid(&intent.id, bid("twice", dec!(0.01), 4.0, false, 100)).await.unwrap();
    let err = h
        .engine
        .submit_bid(&intent.id, bid("twice", dec!(0.009), 4.0, false, 100))
        .await
        .unwrap_err();
    assert!(matches!(err, IntentMeshError::DuplicateBid { .. }));

    assert_eq!(h.engine.get_intent(&intent.id).await.unwrap().bids.len(), 1);
    assert_eq!(
        h.engine.get_intent(&IntentId::new()).await.unwrap_err().kind(),
        ErrorKind::NotFound
    );
}

#[tokio::test(start_paused = true)]
async fn unfunded_intent_is_never_opened() {
    let h = harness(AuctionConfig::default()).await;
    let err = h.engine.create_intent(request(dec!(50))).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::External);
    assert_eq!(h.engine.tracked(), 0);
    assert!(h.engine.list_intents(None).await.is_empty());
    assert!(h.escrow.is_empty());
}

#[tokio::test(start_paused = true)]
async fn dispute_freezes_until_resolved() {
    let h = harness(AuctionConfig::default()).await;
    let intent_id = assigned_intent(&h).await;

    let intent = h.engine.dispute_intent(&intent_id, "wrong model used").await.unwrap();
    assert_eq!(intent.status, IntentStatus::Disputed);
    assert_eq!(
        h.escrow.get_by_intent(&intent_id).await.unwrap().status,
        EscrowStatus::Disputed
    );

    let err = h
        .engine
        .report_completion(&intent_id, "provider-c", CompletionReport::default())
        .await
        .unwrap_err();
    assert!(matches!(err, IntentMeshError::InvalidIntentState { .. }));

    // Disputed intents stay until resolved, timers are gone
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(h.engine.sweep().await.evicted, 0);
    assert_eq!(
        h.engine.get_intent(&intent_id).await.unwrap().intent.status,
        IntentStatus::Disputed
    );

    let escrow = h
        .engine
        .resolve_dispute(&intent_id, DisputeResolution::Refund, "arbiter refund")
        .await
        .unwrap();
    assert_eq!(escrow.status, EscrowStatus::Refunded);
    assert_eq!(h.rail.balance(CLIENT_ADDR).await, dec!(10));

    let err = h
        .engine
        .resolve_dispute(&intent_id, DisputeResolution::Refund, "again")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StateConflict);
}

#[tokio::test(start_paused = true)]
async fn sweep_retries_failed_refunds() {
    let h = harness(AuctionConfig::default()).await;
    let intent = h.engine.create_intent(request(dec!(0.4))).await.unwrap();

    h.rail.set_available(false).await;
    tokio::time::sleep(Duration::from_millis(1100)).await;
    let view = h.engine.get_intent(&intent.id).await.unwrap();
    assert_eq!(view.intent.status, IntentStatus::Failed);
    assert!(view.refund_outstanding);

    // Still down: nothing recovered, nothing evicted
    tokio::time::sleep(Duration::from_secs(3600)).await;
    let report = h.engine.sweep().await;
    assert_eq!(report.refunds_retried, 1);
    assert_eq!(report.refunds_recovered, 0);
    assert_eq!(report.evicted, 0);

    h.rail.set_available(true).await;
    let report = h.engine.sweep().await;
    assert_eq!(report.refunds_recovered, 1);
    assert_eq!(h.rail.balance(CLIENT_ADDR).await, dec!(10));
    assert_eq!(
        h.escrow.get_by_intent(&intent.id).await.unwrap().status,
        EscrowStatus::Refunded
    );
}

#[tokio::test(start_paused = true)]
async fn terminal_intents_are_evicted_after_retention() {
    let config = AuctionConfig {
        terminal_retention_secs: 60,
        ..Default::default()
    };
    let h = harness(config).await;
    let done = h.engine.create_intent(request(dec!(0.1))).await.unwrap();
    h.engine.cancel_intent(&done.id, "client-1").await.unwrap();
    let mut req = request(dec!(0.1));
    req.bidding_duration = Duration::from_secs(3600);
    let live = h.engine.create_intent(req).await.unwrap();

    assert_eq!(h.engine.sweep().await.evicted, 0);

    tokio::time::sleep(Duration::from_secs(61)).await;
    let report = h.engine.sweep().await;
    assert_eq!(report.evicted, 1);
    assert!(h.engine.get_intent(&done.id).await.is_err());
    assert!(h.engine.get_intent(&live.id).await.is_ok());

    // The closed escrow goes with its intent, the live one stays
    assert_eq!(h.escrow.get_by_intent(&done.id).await.unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(h.escrow.len(), 1);
    assert_eq!(
        h.escrow.get_by_intent(&live.id).await.unwrap().status,
        EscrowStatus::Funded
    );
}

#[tokio::test(start_paused = true)]
async fn capacity_cap_evicts_terminal_before_rejecting() {
    let config = AuctionConfig {
        max_tracked_intents: 1,
        ..Default::default()
    };
    let h = harness(config).await;
    let first = h.engine.create_intent(request(dec!(0.1))).await.unwrap();

    let err = h.engine.create_intent(request(dec!(0.1))).await.unwrap_err();
    assert!(matches!(err, IntentMeshError::CapacityExceeded { limit: 1 }));
    assert_eq!(err.kind(), ErrorKind::Capacity);

    h.engine.cancel_intent(&first.id, "client-1").await.unwrap();
    let second = h.engine.create_intent(request(dec!(0.1))).await.unwrap();
    assert_eq!(h.engine.tracked(), 1);
    assert!(h.engine.get_intent(&second.id).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn lists_intents_by_status() {
    let h = harness(AuctionConfig::default()).await;
    let open = h.engine.create_intent(request(dec!(0.1))).await.unwrap();
    let cancelled = h.engine.create_intent(request(dec!(0.1))).await.unwrap();
    h.engine.cancel_intent(&cancelled.id, "client-1").await.unwrap();

    assert_eq!(h.engine.list_intents(None).await.len(), 2);
    let only_open = h.engine.list_intents(Some(IntentStatus::Open)).await;
    assert_eq!(only_open.len(), 1);
    assert_eq!(only_open[0].id, open.id);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_bids_are_all_admitted_once() {
    let h = harness(AuctionConfig::default()).await;
    let mut req = request(dec!(1));
    req.bidding_duration = Duration::from_secs(60);
    let intent = h.engine.create_intent(req).await.unwrap();

    let tasks: Vec<_> = (0..20)
        .map(|i| {
            let engine = h.engine.clone();
            let id = intent.id;
            tokio::spawn(async move {
                engine
                    .submit_bid(&id, bid(&format!("provider-{}", i % 10), dec!(0.5), 4.0, false, 100))
                    .await
            })
        })
        .collect();

    let mut accepted = 0;
    for task in tasks {
        if task.await.unwrap().is_ok() {
            accepted += 1;
        }
    }
    assert_eq!(accepted, 10);
    assert_eq!(h.engine.get_intent(&intent.id).await.unwrap().bids.len(), 10);
}

#[tokio::test(start_paused = true)]
async fn paid_provider_keeps_intent_until_release_completes() {
    let h = harness(AuctionConfig::default()).await;
    let intent_id = assigned_intent(&h).await;
    let mut rx = h.events.subscribe();

    // Provider leg goes through, the client's remainder does not
    h.gate.block(CLIENT_ADDR);
    let err = h
        .engine
        .report_completion(&intent_id, "provider-c", CompletionReport::default())
        .await
        .unwrap_err();
    assert!(err.is_retriable());
    assert_eq!(h.rail.balance("provider-c-addr").await, dec!(0.018));

    let view = h.engine.get_intent(&intent_id).await.unwrap();
    assert_eq!(view.intent.status, IntentStatus::Assigned);
    assert_eq!(view.intent.assigned_provider.as_deref(), Some("provider-c"));
    assert!(view.release_outstanding);

    // Neither the failover window nor the execution deadline moves it on
    tokio::time::sleep(Duration::from_secs(60)).await;
    let view = h.engine.get_intent(&intent_id).await.unwrap();
    assert_eq!(view.intent.status, IntentStatus::Assigned);
    assert_eq!(view.intent.assigned_provider.as_deref(), Some("provider-c"));
    assert!(!drain(&mut rx)
        .iter()
        .any(|e| matches!(e, SystemEvent::FailoverTriggered { .. } | SystemEvent::IntentFailed { .. })));

    let err = h
        .engine
        .report_failure(&intent_id, "provider-c", "changed my mind")
        .await
        .unwrap_err();
    assert!(matches!(err, IntentMeshError::SettlementPending { .. }));
    let err = h.engine.report_progress(&intent_id, "provider-c", None).await.unwrap_err();
    assert!(matches!(err, IntentMeshError::SettlementPending { .. }));
    assert!(h.engine.dispute_intent(&intent_id, "too late").await.is_err());

    let report = h.engine.sweep().await;
    assert_eq!(report.releases_retried, 1);
    assert_eq!(report.releases_recovered, 0);
    assert_eq!(report.evicted, 0);

    h.gate.unblock(CLIENT_ADDR);
    let report = h.engine.sweep().await;
    assert_eq!(report.releases_recovered, 1);

    let view = h.engine.get_intent(&intent_id).await.unwrap();
    assert_eq!(view.intent.status, IntentStatus::Completed);
    assert!(!view.release_outstanding);
    assert_eq!(view.intent.result.unwrap().amount_settled, dec!(0.018));

    let escrow = h.escrow.get_by_intent(&intent_id).await.unwrap();
    assert_eq!(escrow.status, EscrowStatus::Released);
    assert_eq!(escrow.released_total(), dec!(0.018));
    assert_eq!(escrow.refunded_total(), dec!(0.002));
    assert_eq!(h.rail.balance("provider-c-addr").await, dec!(0.018));
    assert_eq!(h.rail.balance(CLIENT_ADDR).await, dec!(9.982));
    assert_eq!(h.rail.balance(CUSTODY_ADDR).await, dec!(0));
}

#[tokio::test(start_paused = true)]
async fn repeated_completion_finishes_outstanding_release() {
    let h = harness(AuctionConfig::default()).await;
    let intent_id = assigned_intent(&h).await;

    h.gate.block(CLIENT_ADDR);
    let first = CompletionReport {
        output: serde_json::json!({ "text": "first" }),
        execution_time_ms: 300,
        ..Default::default()
    };
    assert!(h.engine.report_completion(&intent_id, "provider-c", first).await.is_err());

    h.gate.unblock(CLIENT_ADDR);
    let second = CompletionReport {
        output: serde_json::json!({ "text": "second" }),
        ..Default::default()
    };
    let intent = h
        .engine
        .report_completion(&intent_id, "provider-c", second)
        .await
        .unwrap();
    assert_eq!(intent.status, IntentStatus::Completed);

    // The delivery that was paid for is the one kept
    let result = intent.result.unwrap();
    assert_eq!(result.output, serde_json::json!({ "text": "first" }));
    assert_eq!(result.execution_time_ms, 300);
    assert_eq!(h.rail.balance("provider-c-addr").await, dec!(0.018));
    assert_eq!(h.rail.balance(CLIENT_ADDR).await, dec!(9.982));
}

#[tokio::test(start_paused = true)]
async fn refund_lost_at_exhaustion_is_recovered_by_sweep() {
    let h = harness(AuctionConfig::default()).await;
    let intent = h.engine.create_intent(request(dec!(0.02))).await.unwrap();
    h.engine.submit_bid(&intent.id, bid("solo", dec!(0.01), 4.0, false, 1000)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1100)).await;

    h.rail.set_available(false).await;
    tokio::time::sleep(Duration::from_millis(2100)).await;

    let view = h.engine.get_intent(&intent.id).await.unwrap();
    assert_eq!(view.intent.status, IntentStatus::Failed);
    assert_eq!(view.intent.failure_reason.as_deref(), Some("failover queue exhausted"));
    assert!(view.refund_outstanding);
    let escrow = h.escrow.get_by_intent(&intent.id).await.unwrap();
    assert_eq!(escrow.status, EscrowStatus::Funded);
    assert_eq!(h.rail.balance(CUSTODY_ADDR).await, dec!(0.02));
    assert_eq!(h.rail.balance(CLIENT_ADDR).await, dec!(9.98));

    h.rail.set_available(true).await;
    let report = h.engine.sweep().await;
    assert_eq!(report.refunds_recovered, 1);

    let escrow = h.escrow.get_by_intent(&intent.id).await.unwrap();
    assert_eq!(escrow.status, EscrowStatus::Refunded);
    assert_eq!(escrow.refunded_total(), dec!(0.02));
    assert_eq!(h.rail.balance(CUSTODY_ADDR).await, dec!(0));
    assert_eq!(h.rail.balance(CLIENT_ADDR).await, dec!(10));
    assert_eq!(h.rail.balance("solo-addr").await, dec!(0));
}

#[tokio::test(start_paused = true)]
async fn oversized_durations_are_rejected() {
    let h = harness(AuctionConfig::default()).await;

    let mut req = request(dec!(0.02));
    req.bidding_duration = Duration::from_secs(400_000 * 365 * 24 * 60 * 60);
    let err = h.engine.create_intent(req).await.unwrap_err();
    assert!(matches!(err, IntentMeshError::InvalidInput { .. }));

    let mut req = request(dec!(0.02));
    req.execution_duration = Duration::MAX;
    assert_eq!(h.engine.create_intent(req).await.unwrap_err().kind(), ErrorKind::Validation);

    assert_eq!(h.engine.tracked(), 0);
    assert!(h.escrow.is_empty());
    assert_eq!(h.rail.balance(CLIENT_ADDR).await, dec!(10));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_creations_respect_capacity() {
    let config = AuctionConfig {
        max_tracked_intents: 5,
        ..Default::default()
    };
    let h = harness(config).await;

    let tasks: Vec<_> = (0..20)
        .map(|_| {
            let engine = h.engine.clone();
            tokio::spawn(async move {
                let mut req = request(dec!(0.1));
                req.bidding_duration = Duration::from_secs(60);
                engine.create_intent(req).await
            })
        })
        .collect();

    let mut opened = 0;
    let mut rejected = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => opened += 1,
            Err(IntentMeshError::CapacityExceeded { limit: 5 }) => rejected += 1,
            Err(e) => panic!("unexpected error: {}", e),
        }
    }
    assert_eq!(opened, 5);
    assert_eq!(rejected, 15);
    assert_eq!(h.engine.tracked(), 5);
    assert_eq!(h.escrow.len(), 5);
}
