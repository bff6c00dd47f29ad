//! Intent auction engine
//!
//! Owns the intent lifecycle: bidding window, winner selection, failover on
//! silence or failure, completion and the escrow instructions that follow
//! from each outcome.
//!
//! Each intent sits behind its own async mutex; every mutation of an intent,
//! including the escrow call it triggers, happens under that lock. Timers run
//! as spawned tasks that hold only a weak reference to the engine and
//! re-check the intent when they fire.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use intentmesh_escrow::EscrowManager;
use intentmesh_types::{
    Account, Bid, BidId, BidStatus, CompletionReport, DisputeResolution, Escrow,
    EscrowTransferKind, EventBus, FailoverReason, Intent, IntentId, IntentMeshError,
    IntentRequirements, IntentResult, IntentStatus, ProviderSnapshot, Result, SystemEvent,
    DEFAULT_CURRENCY,
};

use crate::config::AuctionConfig;
use crate::scoring::{rank_bids, MAX_REPUTATION};

/// A client's request to open an intent
#[derive(Debug, Clone)]
pub struct CreateIntentRequest {
    /// Client paying for the work; the budget is escrowed from this account
    pub client: Account,
    pub work_type: String,
    pub parameters: serde_json::Value,
    pub requirements: IntentRequirements,
    pub max_budget: Decimal,
    /// Defaults to USDC
    pub currency: Option<String>,
    /// Length of the bidding window
    pub bidding_duration: Duration,
    /// Time allowed for execution once bidding closes
    pub execution_duration: Duration,
}

/// A provider's offer
#[derive(Debug, Clone)]
pub struct BidSubmission {
    pub provider: String,
    /// Where the provider is paid
    pub provider_address: String,
    pub bid_amount: Decimal,
    pub estimated_time_ms: u64,
    /// 0-100
    pub confidence: u8,
    /// Reputation, attestation and capabilities as of submission
    pub snapshot: ProviderSnapshot,
}

/// An intent together with its bids
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentView {
    pub intent: Intent,
    pub bids: Vec<Bid>,
    /// An automatic refund failed and is waiting for the next sweep
    pub refund_outstanding: bool,
    /// The provider was paid but the client's remainder is still in custody;
    /// the release is retried until it completes
    pub release_outstanding: bool,
}

/// Outcome of one [`AuctionEngine::sweep`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub evicted: usize,
    pub refunds_retried: usize,
    pub refunds_recovered: usize,
    pub releases_retried: usize,
    pub releases_recovered: usize,
}

struct IntentRecord {
    intent: Intent,
    bids: Vec<Bid>,
    bidding_deadline: Instant,
    execution_deadline: Instant,
    /// Index of the ACCEPTED bid
    accepted: Option<usize>,
    /// Indexes of FAILOVER bids, best first
    failover: VecDeque<usize>,
    failed_providers: HashSet<String>,
    /// Promotions since the initial assignment
    attempts: u32,
    /// Bumped whenever the failover timer is re-armed; older timers are stale
    epoch: u64,
    bidding_timer: Option<JoinHandle<()>>,
    failover_timer: Option<JoinHandle<()>>,
    deadline_timer: Option<JoinHandle<()>>,
    refund_outstanding: bool,
    /// Completion whose escrow release stopped after paying the provider
    unsettled: Option<CompletionReport>,
    /// When the intent became eligible for eviction
    terminal_at: Option<Instant>,
}

impl IntentRecord {
    fn view(&self) -> IntentView {
        IntentView {
            intent: self.intent.clone(),
            bids: self.bids.clone(),
            refund_outstanding: self.refund_outstanding,
            release_outstanding: self.unsettled.is_some(),
        }
    }

    fn cancel_timers(&mut self) {
        for timer in [
            self.bidding_timer.take(),
            self.failover_timer.take(),
            self.deadline_timer.take(),
        ]
        .into_iter()
        .flatten()
        {
            timer.abort();
        }
    }

    /// Refuse anything but finishing the release once the provider is paid
    fn require_settled(&self) -> Result<()> {
        match (&self.unsettled, self.intent.escrow_id) {
            (Some(_), Some(escrow_id)) => Err(IntentMeshError::SettlementPending {
                escrow_id,
                operation: "release",
            }),
            _ => Ok(()),
        }
    }

    fn provider_of(&self, index: usize) -> &str {
        &self.bids[index].provider
    }

    fn sync_failover_queue(&mut self) {
        self.intent.failover_queue = self
            .failover
            .iter()
            .map(|&i| self.bids[i].provider.clone())
            .collect();
    }

    /// Reject every bid still waiting in the failover queue
    fn retire_failover(&mut self) {
        while let Some(index) = self.failover.pop_front() {
            self.bids[index].status = BidStatus::Rejected;
        }
        self.intent.failover_queue.clear();
    }

    fn require_assigned(&self, provider: &str, operation: &'static str) -> Result<usize> {
        if !self.intent.status.is_in_execution() {
            return Err(IntentMeshError::InvalidIntentState {
                intent_id: self.intent.id,
                status: self.intent.status,
                operation,
            });
        }
        match self.accepted {
            Some(index) if self.bids[index].provider == provider => Ok(index),
            _ => Err(IntentMeshError::NotAssignedProvider {
                intent_id: self.intent.id,
                provider: provider.to_string(),
                assigned: self.intent.assigned_provider.clone(),
            }),
        }
    }
}

struct EngineInner {
    config: AuctionConfig,
    escrow: Arc<dyn EscrowManager>,
    events: EventBus,
    intents: DashMap<IntentId, Arc<Mutex<IntentRecord>>>,
    /// Tracked intents plus creations in flight
    slots: AtomicUsize,
}

/// Capacity slot held by an intent being created; given back on drop
/// unless committed
struct Slot<'a> {
    slots: &'a AtomicUsize,
    committed: bool,
}

impl Slot<'_> {
    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for Slot<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.slots.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

/// Intent auction engine.
///
/// Cloning yields another handle to the same engine.
#[derive(Clone)]
pub struct AuctionEngine {
    inner: Arc<EngineInner>,
}

impl AuctionEngine {
    pub fn new(config: AuctionConfig, escrow: Arc<dyn EscrowManager>, events: EventBus) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                config,
                escrow,
                events,
                intents: DashMap::new(),
                slots: AtomicUsize::new(0),
            }),
        }
    }

    pub fn config(&self) -> &AuctionConfig {
        &self.inner.config
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    /// Number of intents currently tracked
    pub fn tracked(&self) -> usize {
        self.inner.intents.len()
    }

    fn record(&self, intent_id: &IntentId) -> Result<Arc<Mutex<IntentRecord>>> {
        self.inner
            .intents
            .get(intent_id)
            .map(|r| Arc::clone(r.value()))
            .ok_or(IntentMeshError::IntentNotFound {
                intent_id: *intent_id,
            })
    }

    fn reserve_slot(&self) -> Option<Slot<'_>> {
        let limit = self.inner.config.max_tracked_intents;
        self.inner
            .slots
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < limit).then_some(n + 1))
            .ok()
            .map(|_| Slot {
                slots: &self.inner.slots,
                committed: false,
            })
    }

    fn weak(&self) -> Weak<EngineInner> {
        Arc::downgrade(&self.inner)
    }

    fn from_weak(weak: &Weak<EngineInner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    // ========================================================================
    // Intent creation and bidding
    // ========================================================================

    /// Escrow the budget and open bidding.
    ///
    /// If the escrow cannot be funded nothing is tracked and the error is
    /// returned.
    pub async fn create_intent(&self, request: CreateIntentRequest) -> Result<Intent> {
        let config = &self.inner.config;
        if request.max_budget < config.min_budget || request.max_budget > config.max_budget {
            return Err(IntentMeshError::AmountOutOfRange {
                field: "max_budget".to_string(),
                amount: request.max_budget,
                min: config.min_budget,
                max: config.max_budget,
            });
        }
        if request.bidding_duration.is_zero() {
            return Err(IntentMeshError::invalid_input("bidding_duration", "must be positive"));
        }
        if request.execution_duration.is_zero() {
            return Err(IntentMeshError::invalid_input("execution_duration", "must be positive"));
        }
        if request.work_type.trim().is_empty() {
            return Err(IntentMeshError::invalid_input("work_type", "must not be empty"));
        }
        if let Some(min) = request.requirements.min_reputation {
            if !(0.0..=MAX_REPUTATION).contains(&min) {
                return Err(IntentMeshError::invalid_input(
                    "requirements.min_reputation",
                    "must be between 0 and 5",
                ));
            }
        }
        let too_long = |field: &str| IntentMeshError::invalid_input(field, "too long");
        let bidding = chrono::Duration::from_std(request.bidding_duration)
            .map_err(|_| too_long("bidding_duration"))?;
        let execution = chrono::Duration::from_std(request.execution_duration)
            .map_err(|_| too_long("execution_duration"))?;

        let now = Utc::now();
        let started = Instant::now();
        let bidding_deadline_at = now
            .checked_add_signed(bidding)
            .ok_or_else(|| too_long("bidding_duration"))?;
        let execution_deadline_at = bidding_deadline_at
            .checked_add_signed(execution)
            .ok_or_else(|| too_long("execution_duration"))?;
        let bidding_deadline = started
            .checked_add(request.bidding_duration)
            .ok_or_else(|| too_long("bidding_duration"))?;
        let execution_deadline = bidding_deadline
            .checked_add(request.execution_duration)
            .ok_or_else(|| too_long("execution_duration"))?;

        let slot = match self.reserve_slot() {
            Some(slot) => slot,
            None => {
                self.sweep().await;
                self.reserve_slot().ok_or_else(|| {
                    warn!(limit = config.max_tracked_intents, "Rejecting intent: capacity reached");
                    IntentMeshError::CapacityExceeded {
                        limit: config.max_tracked_intents,
                    }
                })?
            }
        };

        let currency = request
            .currency
            .unwrap_or_else(|| DEFAULT_CURRENCY.to_string());
        let mut intent = Intent {
            id: IntentId::new(),
            client_id: request.client.id.clone(),
            client_address: request.client.address.clone(),
            work_type: request.work_type,
            parameters: request.parameters,
            requirements: request.requirements,
            max_budget: request.max_budget,
            currency,
            bidding_deadline: bidding_deadline_at,
            execution_deadline: execution_deadline_at,
            status: IntentStatus::Created,
            assigned_provider: None,
            failover_queue: Vec::new(),
            result: None,
            escrow_id: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        };
        let intent_id = intent.id;

        let escrow = self
            .inner
            .escrow
            .create_and_fund(intent_id, &request.client, intent.max_budget, &intent.currency)
            .await
            .map_err(|e| {
                warn!(%intent_id, "Intent not opened, escrow funding failed: {}", e);
                e
            })?;

        intent.escrow_id = Some(escrow.id);
        intent.transition(IntentStatus::Open);

        let record = Arc::new(Mutex::new(IntentRecord {
            intent: intent.clone(),
            bids: Vec::new(),
            bidding_deadline,
            execution_deadline,
            accepted: None,
            failover: VecDeque::new(),
            failed_providers: HashSet::new(),
            attempts: 0,
            epoch: 0,
            bidding_timer: None,
            failover_timer: None,
            deadline_timer: None,
            refund_outstanding: false,
            unsettled: None,
            terminal_at: None,
        }));
        self.inner.intents.insert(intent_id, Arc::clone(&record));
        slot.commit();

        {
            let mut rec = record.lock().await;
            rec.bidding_timer = Some(self.spawn_bidding_timer(intent_id, bidding_deadline));
        }

        info!(
            %intent_id,
            client = %intent.client_id,
            work_type = %intent.work_type,
            "Intent opened with budget {} {}",
            intent.max_budget, intent.currency
        );
        self.inner.events.emit(SystemEvent::IntentOpened {
            intent_id,
            client_id: intent.client_id.clone(),
            work_type: intent.work_type.clone(),
            max_budget: intent.max_budget,
            currency: intent.currency.clone(),
            bidding_deadline: intent.bidding_deadline,
            timestamp: Utc::now(),
        });
        Ok(intent)
    }

    /// Add a provider's bid to an open intent
    pub async fn submit_bid(&self, intent_id: &IntentId, submission: BidSubmission) -> Result<Bid> {
        if submission.provider.trim().is_empty() {
            return Err(IntentMeshError::invalid_input("provider", "must not be empty"));
        }
        if submission.confidence > 100 {
            return Err(IntentMeshError::invalid_input("confidence", "must be between 0 and 100"));
        }
        let reputation = submission.snapshot.reputation;
        if !reputation.is_finite() || !(0.0..=MAX_REPUTATION).contains(&reputation) {
            return Err(IntentMeshError::invalid_input(
                "snapshot.reputation",
                "must be between 0 and 5",
            ));
        }

        let record = self.record(intent_id)?;
        let mut rec = record.lock().await;

        if rec.intent.status != IntentStatus::Open {
            return Err(IntentMeshError::BiddingClosed {
                intent_id: *intent_id,
                status: rec.intent.status,
            });
        }
        if Instant::now() >= rec.bidding_deadline {
            // The window is over even if the timer has not run yet
            self.close_bidding_locked(&mut rec).await;
            warn!(%intent_id, provider = %submission.provider, "Late bid rejected");
            return Err(IntentMeshError::BiddingClosed {
                intent_id: *intent_id,
                status: rec.intent.status,
            });
        }

        let min_bid = self.inner.config.min_bid_amount;
        if submission.bid_amount < min_bid || submission.bid_amount > rec.intent.max_budget {
            return Err(IntentMeshError::AmountOutOfRange {
                field: "bid_amount".to_string(),
                amount: submission.bid_amount,
                min: min_bid,
                max: rec.intent.max_budget,
            });
        }
        if rec.intent.requirements.excludes(&submission.provider) {
            return Err(IntentMeshError::ProviderExcluded {
                intent_id: *intent_id,
                provider: submission.provider,
            });
        }
        if rec.bids.iter().any(|b| b.provider == submission.provider) {
            return Err(IntentMeshError::DuplicateBid {
                intent_id: *intent_id,
                provider: submission.provider,
            });
        }

        let bid = Bid {
            id: BidId::new(),
            intent_id: *intent_id,
            provider: submission.provider,
            provider_address: submission.provider_address,
            bid_amount: submission.bid_amount,
            estimated_time_ms: submission.estimated_time_ms,
            confidence: submission.confidence,
            snapshot: submission.snapshot,
            score: None,
            rank: None,
            submitted_at: Utc::now(),
            expires_at: rec.intent.bidding_deadline,
            status: BidStatus::Pending,
        };
        rec.bids.push(bid.clone());
        let bid_count = rec.bids.len();
        drop(rec);

        debug!(%intent_id, provider = %bid.provider, amount = %bid.bid_amount, bid_count, "Bid received");
        self.inner.events.emit(SystemEvent::BidReceived {
            intent_id: *intent_id,
            bid_id: bid.id,
            provider: bid.provider.clone(),
            bid_amount: bid.bid_amount,
            bid_count,
            timestamp: Utc::now(),
        });
        Ok(bid)
    }

    /// Close bidding if the window is over. Does nothing otherwise.
    pub async fn close_bidding(&self, intent_id: &IntentId) -> Result<Intent> {
        let record = self.record(intent_id)?;
        let mut rec = record.lock().await;
        if rec.intent.status == IntentStatus::Open && Instant::now() >= rec.bidding_deadline {
            self.close_bidding_locked(&mut rec).await;
        }
        Ok(rec.intent.clone())
    }

    async fn close_bidding_locked(&self, rec: &mut IntentRecord) {
        if let Some(timer) = rec.bidding_timer.take() {
            timer.abort();
        }
        let intent_id = rec.intent.id;
        let config = &self.inner.config;
        let ranking = rank_bids(&rec.intent, &rec.bids, &config.weights, config.default_max_latency_ms);

        for (index, reason) in &ranking.rejected {
            debug!(%intent_id, provider = %rec.bids[*index].provider, %reason, "Bid disqualified");
            rec.bids[*index].status = BidStatus::Rejected;
        }
        for (rank, (index, score)) in ranking.ranked.iter().enumerate() {
            rec.bids[*index].score = Some(*score);
            rec.bids[*index].rank = Some(rank as u32 + 1);
        }

        let Some(&(winner, score)) = ranking.ranked.first() else {
            info!(%intent_id, bids = rec.bids.len(), "Bidding closed without a valid bid");
            self.fail_locked(rec, "no valid bids").await;
            return;
        };

        rec.bids[winner].status = BidStatus::Accepted;
        rec.accepted = Some(winner);
        rec.failover = ranking.ranked[1..].iter().map(|(i, _)| *i).collect();
        for &index in &rec.failover {
            rec.bids[index].status = BidStatus::Failover;
        }
        rec.sync_failover_queue();
        rec.intent.assigned_provider = Some(rec.provider_of(winner).to_string());
        rec.intent.transition(IntentStatus::Assigned);

        self.arm_failover_timer(rec);
        let deadline = rec.execution_deadline;
        rec.deadline_timer = Some(self.spawn_deadline_timer(intent_id, deadline));

        let bid = &rec.bids[winner];
        info!(%intent_id, provider = %bid.provider, score, "Winner selected, {} in failover queue", rec.failover.len());
        self.inner.events.emit(SystemEvent::WinnerSelected {
            intent_id,
            bid_id: bid.id,
            provider: bid.provider.clone(),
            score,
            bid_amount: bid.bid_amount,
            failover_queue: rec.intent.failover_queue.clone(),
            timestamp: Utc::now(),
        });
    }

    // ========================================================================
    // Execution
    // ========================================================================

    /// Assigned provider reports it is working; restarts the failover window
    pub async fn report_progress(
        &self,
        intent_id: &IntentId,
        provider: &str,
        message: Option<String>,
    ) -> Result<Intent> {
        let record = self.record(intent_id)?;
        let mut rec = record.lock().await;
        rec.require_assigned(provider, "report progress on")?;
        rec.require_settled()?;

        if rec.intent.status == IntentStatus::Assigned {
            rec.intent.transition(IntentStatus::Executing);
        } else {
            rec.intent.updated_at = Utc::now();
        }
        self.arm_failover_timer(&mut rec);
        let intent = rec.intent.clone();
        drop(rec);

        debug!(%intent_id, %provider, "Execution progress");
        self.inner.events.emit(SystemEvent::ExecutionProgress {
            intent_id: *intent_id,
            provider: provider.to_string(),
            message,
            timestamp: Utc::now(),
        });
        Ok(intent)
    }

    /// Assigned provider delivers; pays the bid and refunds the rest.
    ///
    /// If the escrow release fails before the provider is paid, the intent
    /// is left as it was and the provider may report again. If it fails
    /// after the provider is paid, the intent stays with that provider, its
    /// timers stop, and the release is retried by later reports and by
    /// [`Self::sweep`] until the client's remainder is back.
    pub async fn report_completion(
        &self,
        intent_id: &IntentId,
        provider: &str,
        report: CompletionReport,
    ) -> Result<Intent> {
        let record = self.record(intent_id)?;
        let mut rec = record.lock().await;
        rec.require_assigned(provider, "complete")?;

        let report = match rec.unsettled.take() {
            // The provider is already paid; only the settlement is left
            Some(first) => first,
            None => {
                if Instant::now() >= rec.execution_deadline {
                    self.fail_locked(&mut rec, "execution deadline passed").await;
                    return Err(IntentMeshError::InvalidIntentState {
                        intent_id: *intent_id,
                        status: rec.intent.status,
                        operation: "complete",
                    });
                }
                report
            }
        };
        self.settle_completion_locked(&mut rec, report).await
    }

    /// Release the accepted bid from escrow and close the intent as completed
    async fn settle_completion_locked(
        &self,
        rec: &mut IntentRecord,
        report: CompletionReport,
    ) -> Result<Intent> {
        let intent_id = rec.intent.id;
        let index = rec
            .accepted
            .ok_or_else(|| IntentMeshError::internal(format!("intent {} has no accepted bid", intent_id)))?;
        let escrow_id = rec
            .intent
            .escrow_id
            .ok_or_else(|| IntentMeshError::internal(format!("intent {} has no escrow", intent_id)))?;
        let provider = rec.provider_of(index).to_string();
        let amount = rec.bids[index].bid_amount;
        let recipient = rec.bids[index].provider_address.clone();

        let released = self
            .inner
            .escrow
            .release(&escrow_id, &recipient, amount, "intent completed")
            .await;
        let escrow = match released {
            Ok(escrow) => escrow,
            Err(e) => {
                let paid = matches!(
                    self.inner.escrow.get(&escrow_id).await,
                    Ok(escrow) if escrow.pending.is_some()
                );
                if paid {
                    rec.cancel_timers();
                    rec.unsettled = Some(report);
                    error!(%intent_id, %provider, "Provider paid, remainder refund outstanding: {}", e);
                } else {
                    warn!(%intent_id, %provider, "Completion not settled: {}", e);
                }
                return Err(e);
            }
        };

        rec.unsettled = None;
        rec.cancel_timers();
        rec.bids[index].status = BidStatus::Executed;
        rec.retire_failover();
        let settlement_reference = escrow
            .last_reference(EscrowTransferKind::Release)
            .map(str::to_string);
        rec.intent.result = Some(IntentResult {
            output: report.output,
            provider: provider.clone(),
            execution_time_ms: report.execution_time_ms,
            proof_ref: report.proof_ref,
            attestation_ref: report.attestation_ref,
            settlement_reference: settlement_reference.clone(),
            amount_settled: amount,
            completed_at: Utc::now(),
        });
        rec.intent.transition(IntentStatus::Completed);
        rec.terminal_at = Some(Instant::now());

        info!(%intent_id, %provider, "Intent completed, {} settled", amount);
        self.inner.events.emit(SystemEvent::IntentCompleted {
            intent_id,
            provider,
            amount_settled: amount,
            settlement_reference,
            timestamp: Utc::now(),
        });
        Ok(rec.intent.clone())
    }

    /// Assigned provider gives up; the next candidate takes over
    pub async fn report_failure(&self, intent_id: &IntentId, provider: &str, reason: &str) -> Result<Intent> {
        let record = self.record(intent_id)?;
        let mut rec = record.lock().await;
        rec.require_assigned(provider, "report failure on")?;
        rec.require_settled()?;

        warn!(%intent_id, %provider, %reason, "Provider reported failure");
        self.failover_locked(&mut rec, FailoverReason::ProviderFailure).await;
        Ok(rec.intent.clone())
    }

    /// Hand the work to the next candidate, or fail the intent if there is
    /// none left
    async fn failover_locked(&self, rec: &mut IntentRecord, reason: FailoverReason) {
        let intent_id = rec.intent.id;
        let failed_provider = match rec.accepted.take() {
            Some(index) => {
                rec.bids[index].status = BidStatus::Failed;
                let provider = rec.provider_of(index).to_string();
                rec.failed_providers.insert(provider.clone());
                provider
            }
            None => String::new(),
        };

        if Instant::now() >= rec.execution_deadline {
            self.fail_locked(rec, "execution deadline passed").await;
            return;
        }
        if rec.attempts >= self.inner.config.max_failover_attempts {
            self.fail_locked(rec, "failover attempts exhausted").await;
            return;
        }

        let next = loop {
            match rec.failover.pop_front() {
                Some(index) if rec.failed_providers.contains(rec.provider_of(index)) => {
                    rec.bids[index].status = BidStatus::Rejected;
                }
                other => break other,
            }
        };
        let Some(next) = next else {
            self.fail_locked(rec, "failover queue exhausted").await;
            return;
        };

        rec.attempts += 1;
        rec.bids[next].status = BidStatus::Accepted;
        rec.accepted = Some(next);
        let new_provider = rec.provider_of(next).to_string();
        rec.intent.assigned_provider = Some(new_provider.clone());
        rec.sync_failover_queue();
        rec.intent.transition(IntentStatus::Assigned);
        self.arm_failover_timer(rec);

        warn!(
            %intent_id,
            ?reason,
            %failed_provider,
            %new_provider,
            attempt = rec.attempts,
            "Failover triggered"
        );
        self.inner.events.emit(SystemEvent::FailoverTriggered {
            intent_id,
            reason,
            failed_provider,
            new_provider,
            attempt: rec.attempts,
            timestamp: Utc::now(),
        });
    }

    /// Terminal failure: everything escrowed goes back to the client
    async fn fail_locked(&self, rec: &mut IntentRecord, reason: &str) {
        let intent_id = rec.intent.id;
        rec.cancel_timers();
        if let Some(index) = rec.accepted {
            rec.bids[index].status = BidStatus::Failed;
        }
        rec.retire_failover();
        rec.intent.failure_reason = Some(reason.to_string());
        rec.intent.transition(IntentStatus::Failed);
        rec.terminal_at = Some(Instant::now());

        if let Some(escrow_id) = rec.intent.escrow_id {
            if let Err(e) = self.inner.escrow.refund(&escrow_id, reason).await {
                error!(%intent_id, %escrow_id, "Automatic refund failed, will retry on sweep: {}", e);
                rec.refund_outstanding = true;
            }
        }

        warn!(%intent_id, %reason, "Intent failed");
        self.inner.events.emit(SystemEvent::IntentFailed {
            intent_id,
            reason: reason.to_string(),
            timestamp: Utc::now(),
        });
    }

    // ========================================================================
    // Cancellation and disputes
    // ========================================================================

    /// Client withdraws an intent that has not been assigned yet
    pub async fn cancel_intent(&self, intent_id: &IntentId, client_id: &str) -> Result<Intent> {
        let record = self.record(intent_id)?;
        let mut rec = record.lock().await;

        if rec.intent.client_id != client_id {
            return Err(IntentMeshError::invalid_input(
                "client_id",
                format!("{} does not own intent {}", client_id, intent_id),
            ));
        }
        if !matches!(rec.intent.status, IntentStatus::Created | IntentStatus::Open) {
            return Err(IntentMeshError::InvalidIntentState {
                intent_id: *intent_id,
                status: rec.intent.status,
                operation: "cancel",
            });
        }

        if let Some(escrow_id) = rec.intent.escrow_id {
            self.inner
                .escrow
                .refund(&escrow_id, "intent cancelled")
                .await?;
        }

        rec.cancel_timers();
        for bid in rec.bids.iter_mut().filter(|b| b.status == BidStatus::Pending) {
            bid.status = BidStatus::Rejected;
        }
        rec.intent.transition(IntentStatus::Cancelled);
        rec.terminal_at = Some(Instant::now());
        let intent = rec.intent.clone();
        drop(rec);

        info!(%intent_id, "Intent cancelled");
        self.inner.events.emit(SystemEvent::IntentCancelled {
            intent_id: *intent_id,
            timestamp: Utc::now(),
        });
        Ok(intent)
    }

    /// Freeze an intent in execution and its escrow until an external
    /// decision arrives
    pub async fn dispute_intent(&self, intent_id: &IntentId, reason: &str) -> Result<Intent> {
        let record = self.record(intent_id)?;
        let mut rec = record.lock().await;

        if !rec.intent.status.is_in_execution() {
            return Err(IntentMeshError::InvalidIntentState {
                intent_id: *intent_id,
                status: rec.intent.status,
                operation: "dispute",
            });
        }
        if let Some(escrow_id) = rec.intent.escrow_id {
            self.inner.escrow.dispute(&escrow_id, reason).await?;
        }

        rec.cancel_timers();
        rec.intent.failure_reason = Some(reason.to_string());
        rec.intent.transition(IntentStatus::Disputed);
        let intent = rec.intent.clone();
        drop(rec);

        warn!(%intent_id, %reason, "Intent disputed");
        self.inner.events.emit(SystemEvent::IntentDisputed {
            intent_id: *intent_id,
            provider: intent.assigned_provider.clone(),
            reason: reason.to_string(),
            timestamp: Utc::now(),
        });
        Ok(intent)
    }

    /// Apply an external decision to a disputed intent's escrow
    pub async fn resolve_dispute(
        &self,
        intent_id: &IntentId,
        resolution: DisputeResolution,
        reason: &str,
    ) -> Result<Escrow> {
        let record = self.record(intent_id)?;
        let mut rec = record.lock().await;

        if rec.intent.status != IntentStatus::Disputed || rec.terminal_at.is_some() {
            return Err(IntentMeshError::InvalidIntentState {
                intent_id: *intent_id,
                status: rec.intent.status,
                operation: "resolve dispute on",
            });
        }
        let escrow_id = rec
            .intent
            .escrow_id
            .ok_or_else(|| IntentMeshError::internal(format!("intent {} has no escrow", intent_id)))?;

        let escrow = self
            .inner
            .escrow
            .resolve_dispute(&escrow_id, resolution, reason)
            .await?;
        rec.intent.updated_at = Utc::now();
        rec.terminal_at = Some(Instant::now());

        info!(%intent_id, escrow_status = %escrow.status, "Dispute resolved");
        Ok(escrow)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub async fn get_intent(&self, intent_id: &IntentId) -> Result<IntentView> {
        let record = self.record(intent_id)?;
        let rec = record.lock().await;
        Ok(rec.view())
    }

    /// Tracked intents, oldest first
    pub async fn list_intents(&self, status: Option<IntentStatus>) -> Vec<Intent> {
        let records: Vec<_> = self
            .inner
            .intents
            .iter()
            .map(|r| Arc::clone(r.value()))
            .collect();

        let mut intents = Vec::with_capacity(records.len());
        for record in records {
            let rec = record.lock().await;
            if status.map_or(true, |s| rec.intent.status == s) {
                intents.push(rec.intent.clone());
            }
        }
        intents.sort_by_key(|i| i.created_at);
        intents
    }

    // ========================================================================
    // Garbage collection
    // ========================================================================

    /// Retry outstanding settlements and evict terminal intents.
    ///
    /// Intents past the retention window are evicted together with their
    /// escrow. If the engine is still at capacity after that, the oldest
    /// terminal intents go too. Intents that are still live, or whose refund
    /// or release is outstanding, are never evicted.
    pub async fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();
        let retention = self.inner.config.terminal_retention();
        let now = Instant::now();

        let records: Vec<_> = self
            .inner
            .intents
            .iter()
            .map(|r| (*r.key(), Arc::clone(r.value())))
            .collect();

        let mut evictable = Vec::new();
        for (intent_id, record) in records {
            let mut rec = record.lock().await;

            if let Some(completion) = rec.unsettled.take() {
                report.releases_retried += 1;
                match self.settle_completion_locked(&mut rec, completion).await {
                    Ok(_) => {
                        info!(%intent_id, "Outstanding release completed");
                        report.releases_recovered += 1;
                    }
                    Err(e) => {
                        error!(%intent_id, "Release retry failed: {}", e);
                    }
                }
            }

            if rec.refund_outstanding {
                report.refunds_retried += 1;
                if let Some(escrow_id) = rec.intent.escrow_id {
                    let reason = rec
                        .intent
                        .failure_reason
                        .clone()
                        .unwrap_or_else(|| "intent failed".to_string());
                    match self.inner.escrow.refund(&escrow_id, &reason).await {
                        Ok(_) => {
                            info!(%intent_id, %escrow_id, "Outstanding refund completed");
                            rec.refund_outstanding = false;
                            report.refunds_recovered += 1;
                        }
                        Err(e) => {
                            error!(%intent_id, %escrow_id, "Refund retry failed: {}", e);
                        }
                    }
                }
            }

            if !rec.refund_outstanding {
                if let Some(terminal_at) = rec.terminal_at {
                    evictable.push((intent_id, rec.intent.escrow_id, terminal_at));
                }
            }
        }

        evictable.sort_by_key(|(_, _, at)| *at);
        let limit = self.inner.config.max_tracked_intents;
        let mut remaining = self.inner.slots.load(Ordering::Acquire);
        for (intent_id, escrow_id, terminal_at) in evictable {
            let expired = now.saturating_duration_since(terminal_at) >= retention;
            if !expired && remaining < limit {
                continue;
            }
            if let Some(escrow_id) = escrow_id {
                match self.inner.escrow.evict(&escrow_id).await {
                    Ok(_) | Err(IntentMeshError::EscrowNotFound { .. }) => {}
                    Err(e) => {
                        error!(%intent_id, %escrow_id, "Intent kept, escrow not evictable: {}", e);
                        continue;
                    }
                }
            }
            if self.inner.intents.remove(&intent_id).is_some() {
                self.inner.slots.fetch_sub(1, Ordering::AcqRel);
                remaining = remaining.saturating_sub(1);
                report.evicted += 1;
            }
        }

        if report.evicted > 0 || report.refunds_retried > 0 || report.releases_retried > 0 {
            debug!(
                evicted = report.evicted,
                refunds_retried = report.refunds_retried,
                refunds_recovered = report.refunds_recovered,
                releases_retried = report.releases_retried,
                releases_recovered = report.releases_recovered,
                "Sweep finished"
            );
        }
        report
    }

    /// Run [`Self::sweep`] every GC interval until the engine is dropped
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        let engine = self.weak();
        let period = self.inner.config.gc_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(engine) = Self::from_weak(&engine) else {
                    break;
                };
                engine.sweep().await;
            }
        })
    }

    // ========================================================================
    // Timers
    // ========================================================================

    fn spawn_bidding_timer(&self, intent_id: IntentId, at: Instant) -> JoinHandle<()> {
        let engine = self.weak();
        debug!(%intent_id, "Bidding timer armed");
        tokio::spawn(async move {
            tokio::time::sleep_until(at).await;
            if let Some(engine) = Self::from_weak(&engine) {
                engine.on_bidding_deadline(intent_id).await;
            }
        })
    }

    fn spawn_deadline_timer(&self, intent_id: IntentId, at: Instant) -> JoinHandle<()> {
        let engine = self.weak();
        tokio::spawn(async move {
            tokio::time::sleep_until(at).await;
            if let Some(engine) = Self::from_weak(&engine) {
                engine.on_execution_deadline(intent_id).await;
            }
        })
    }

    /// Restart the failover window from now
    fn arm_failover_timer(&self, rec: &mut IntentRecord) {
        if let Some(timer) = rec.failover_timer.take() {
            timer.abort();
        }
        rec.epoch += 1;
        let epoch = rec.epoch;
        let intent_id = rec.intent.id;
        let at = Instant::now() + self.inner.config.failover_window();
        let engine = self.weak();

        debug!(%intent_id, epoch, "Failover timer armed");
        rec.failover_timer = Some(tokio::spawn(async move {
            tokio::time::sleep_until(at).await;
            if let Some(engine) = Self::from_weak(&engine) {
                engine.on_failover_timeout(intent_id, epoch).await;
            }
        }));
    }

    // Timer callbacks detach their own handle before acting so that the
    // cleanup paths never abort the task they are running in.

    async fn on_bidding_deadline(&self, intent_id: IntentId) {
        let Ok(record) = self.record(&intent_id) else {
            return;
        };
        let mut rec = record.lock().await;
        rec.bidding_timer = None;
        if rec.intent.status == IntentStatus::Open {
            self.close_bidding_locked(&mut rec).await;
        }
    }

    async fn on_failover_timeout(&self, intent_id: IntentId, epoch: u64) {
        let Ok(record) = self.record(&intent_id) else {
            return;
        };
        let mut rec = record.lock().await;
        if rec.epoch != epoch || !rec.intent.status.is_in_execution() || rec.unsettled.is_some() {
            debug!(%intent_id, epoch, "Stale failover timer ignored");
            return;
        }
        rec.failover_timer = None;
        self.failover_locked(&mut rec, FailoverReason::Timeout).await;
    }

    async fn on_execution_deadline(&self, intent_id: IntentId) {
        let Ok(record) = self.record(&intent_id) else {
            return;
        };
        let mut rec = record.lock().await;
        rec.deadline_timer = None;
        if rec.intent.status.is_in_execution() && rec.unsettled.is_none() {
            self.fail_locked(&mut rec, "execution deadline passed").await;
        }
    }
}
