//! Bilateral session ledger

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use intentmesh_settlement::PaymentRail;
use intentmesh_types::{
    Account, EventBus, IntentMeshError, Result, SystemEvent, TransferRequest,
};

use crate::netting::{compute_net, gross_totals};
use crate::{
    BilateralConfig, BilateralSession, PartyRole, SessionId, SessionSettlement, SessionStatus,
    Transaction, TransactionStatus,
};

fn invalid_state(session: &BilateralSession, operation: &'static str) -> IntentMeshError {
    IntentMeshError::InvalidSessionState {
        session_id: session.id,
        status: session.status,
        operation,
    }
}

/// Ledger of bilateral sessions.
///
/// Sessions are locked individually. Settlement drops the session's lock for
/// the duration of the rail call; the SETTLING status keeps every other
/// mutation of that session out in the meantime.
pub struct BilateralLedger {
    rail: Arc<dyn PaymentRail>,
    config: BilateralConfig,
    events: EventBus,
    sessions: DashMap<SessionId, Arc<Mutex<BilateralSession>>>,
    /// Participant address -> sessions it takes part in
    by_participant: DashMap<String, Vec<SessionId>>,
}

impl BilateralLedger {
    pub fn new(rail: Arc<dyn PaymentRail>, config: BilateralConfig, events: EventBus) -> Self {
        Self {
            rail,
            config,
            events,
            sessions: DashMap::new(),
            by_participant: DashMap::new(),
        }
    }

    pub fn config(&self) -> &BilateralConfig {
        &self.config
    }

    fn record(&self, session_id: &SessionId) -> Result<Arc<Mutex<BilateralSession>>> {
        self.sessions
            .get(session_id)
            .map(|s| Arc::clone(s.value()))
            .ok_or(IntentMeshError::SessionNotFound {
                session_id: *session_id,
            })
    }

    /// Open a session between a client and a server
    pub fn create_session(&self, client: Account, server: Account) -> Result<BilateralSession> {
        if client.address == server.address {
            return Err(IntentMeshError::invalid_input(
                "server",
                "must have a different address than the client",
            ));
        }

        let now = Utc::now();
        let session = BilateralSession {
            id: SessionId::new(),
            client,
            server,
            transactions: Vec::new(),
            client_paid_total: Decimal::ZERO,
            server_paid_total: Decimal::ZERO,
            net_balance: Decimal::ZERO,
            status: SessionStatus::Active,
            currency: self.config.currency.clone(),
            network: self.config.network.clone(),
            settlement: None,
            created_at: now,
            updated_at: now,
        };

        let session_id = session.id;
        for address in [&session.client.address, &session.server.address] {
            self.by_participant
                .entry(address.clone())
                .or_default()
                .push(session_id);
        }
        self.sessions
            .insert(session_id, Arc::new(Mutex::new(session.clone())));

        info!(%session_id, client = %session.client.id, server = %session.server.id, "Bilateral session created");
        self.events.emit(SystemEvent::SessionCreated {
            session_id,
            client_id: session.client.id.clone(),
            server_id: session.server.id.clone(),
            timestamp: now,
        });
        Ok(session)
    }

    /// Record that `payer` owes its counterparty `amount` for `resource`.
    ///
    /// No funds move here.
    pub async fn record_payment(
        &self,
        session_id: &SessionId,
        payer: PartyRole,
        amount: Decimal,
        resource: &str,
        description: Option<String>,
    ) -> Result<Transaction> {
        if amount <= Decimal::ZERO {
            return Err(IntentMeshError::invalid_input("amount", "must be positive"));
        }
        if resource.trim().is_empty() {
            return Err(IntentMeshError::invalid_input("resource", "must not be empty"));
        }

        let record = self.record(session_id)?;
        let mut session = record.lock().await;
        if session.status != SessionStatus::Active {
            return Err(invalid_state(&session, "record payment on"));
        }

        let now = Utc::now();
        let tx = Transaction {
            id: intentmesh_types::TransactionId::new(),
            session_id: *session_id,
            payer,
            payee: payer.counterparty(),
            amount,
            resource: resource.to_string(),
            description,
            timestamp: now,
            status: TransactionStatus::Recorded,
        };

        match payer {
            PartyRole::Client => session.client_paid_total += amount,
            PartyRole::Server => session.server_paid_total += amount,
        }
        session.net_balance = session.server_paid_total - session.client_paid_total;
        session.transactions.push(tx.clone());
        session.updated_at = now;
        let net_balance = session.net_balance;
        drop(session);

        debug!(%session_id, %payer, %amount, %resource, %net_balance, "Payment recorded");
        self.events.emit(SystemEvent::TransactionRecorded {
            session_id: *session_id,
            transaction_id: tx.id,
            payer,
            amount,
            resource: tx.resource.clone(),
            net_balance,
            timestamp: now,
        });
        Ok(tx)
    }

    pub async fn record_client_payment(
        &self,
        session_id: &SessionId,
        amount: Decimal,
        resource: &str,
        description: Option<String>,
    ) -> Result<Transaction> {
        self.record_payment(session_id, PartyRole::Client, amount, resource, description)
            .await
    }

    pub async fn record_server_payment(
        &self,
        session_id: &SessionId,
        amount: Decimal,
        resource: &str,
        description: Option<String>,
    ) -> Result<Transaction> {
        self.record_payment(session_id, PartyRole::Server, amount, resource, description)
            .await
    }

    /// Clear the session with at most one rail transfer.
    ///
    /// Net amounts below the configured minimum close the session without a
    /// transfer. A rail failure puts the session back in the status it had
    /// before the call.
    pub async fn settle(&self, session_id: &SessionId) -> Result<BilateralSession> {
        let record = self.record(session_id)?;

        let (request, previous, direction, transaction_count) = {
            let mut session = record.lock().await;
            if !matches!(session.status, SessionStatus::Active | SessionStatus::Expired) {
                return Err(invalid_state(&session, "settle"));
            }

            let (client_total, server_total) = gross_totals(&session.transactions);
            if client_total != session.client_paid_total || server_total != session.server_paid_total {
                return Err(IntentMeshError::internal(format!(
                    "session {} totals disagree with its transaction log",
                    session_id
                )));
            }

            let position = compute_net(session.client_paid_total, session.server_paid_total);
            let transaction_count = session.transactions.len();

            let payer = match position.direction.payer() {
                Some(payer) if position.amount >= self.config.min_settlement_amount => payer,
                _ => {
                    info!(%session_id, amount = %position.amount, "Net amount below minimum, settling without transfer");
                    Self::mark_settled(
                        &mut session,
                        SessionSettlement {
                            direction: position.direction,
                            amount: position.amount,
                            reference: None,
                            transaction_count,
                            settled_at: Utc::now(),
                        },
                    );
                    let snapshot = session.clone();
                    drop(session);
                    self.emit_settled(&snapshot);
                    return Ok(snapshot);
                }
            };

            let request = TransferRequest {
                from: session.party(payer).key.clone(),
                to: session.party(payer.counterparty()).address.clone(),
                amount: position.amount,
                currency: session.currency.clone(),
                memo: format!("{} net settlement ({} transactions)", session_id, transaction_count),
            };
            let previous = session.status;
            session.status = SessionStatus::Settling;
            session.updated_at = Utc::now();
            (request, previous, position.direction, transaction_count)
        };

        let amount = request.amount;
        let result = self.rail.transfer(request).await;

        let mut session = record.lock().await;
        let receipt = match result {
            Ok(receipt) => receipt,
            Err(e) => {
                session.status = previous;
                session.updated_at = Utc::now();
                warn!(%session_id, "Settlement transfer failed, session reverted to {}: {}", previous, e);
                return Err(IntentMeshError::rail(self.rail.name(), e));
            }
        };

        Self::mark_settled(
            &mut session,
            SessionSettlement {
                direction,
                amount,
                reference: Some(receipt.reference.clone()),
                transaction_count,
                settled_at: receipt.settled_at,
            },
        );
        let snapshot = session.clone();
        drop(session);

        info!(%session_id, reference = %receipt.reference, "Session settled: {} {:?}", amount, direction);
        self.emit_settled(&snapshot);
        Ok(snapshot)
    }

    fn mark_settled(session: &mut BilateralSession, settlement: SessionSettlement) {
        for tx in &mut session.transactions {
            tx.status = TransactionStatus::Settled;
        }
        session.status = SessionStatus::Settled;
        session.updated_at = settlement.settled_at;
        session.settlement = Some(settlement);
    }

    fn emit_settled(&self, session: &BilateralSession) {
        if let Some(settlement) = &session.settlement {
            self.events.emit(SystemEvent::SessionSettled {
                session_id: session.id,
                direction: settlement.direction,
                amount: settlement.amount,
                reference: settlement.reference.clone(),
                transaction_count: settlement.transaction_count,
                timestamp: Utc::now(),
            });
        }
    }

    /// Expire an ACTIVE session now, whatever its age
    pub async fn expire(&self, session_id: &SessionId) -> Result<BilateralSession> {
        let record = self.record(session_id)?;
        let mut session = record.lock().await;
        if session.status != SessionStatus::Active {
            return Err(invalid_state(&session, "expire"));
        }
        session.status = SessionStatus::Expired;
        session.updated_at = Utc::now();
        let snapshot = session.clone();
        drop(session);

        info!(%session_id, "Session expired");
        self.events.emit(SystemEvent::SessionExpired {
            session_id: *session_id,
            timestamp: Utc::now(),
        });
        Ok(snapshot)
    }

    /// Expire every ACTIVE session created more than the TTL before `now`
    pub async fn expire_stale_at(&self, now: DateTime<Utc>) -> Vec<SessionId> {
        let ttl = ChronoDuration::seconds(self.config.session_ttl_secs as i64);
        let records: Vec<_> = self.sessions.iter().map(|s| Arc::clone(s.value())).collect();

        let mut expired = Vec::new();
        for record in records {
            let mut session = record.lock().await;
            if session.status == SessionStatus::Active && now - session.created_at >= ttl {
                session.status = SessionStatus::Expired;
                session.updated_at = now;
                expired.push(session.id);
            }
        }

        for session_id in &expired {
            info!(%session_id, "Session expired after TTL");
            self.events.emit(SystemEvent::SessionExpired {
                session_id: *session_id,
                timestamp: now,
            });
        }
        expired
    }

    pub async fn expire_stale(&self) -> Vec<SessionId> {
        self.expire_stale_at(Utc::now()).await
    }

    /// Drop sessions that settled more than the retention window before `now`
    pub async fn evict_settled_at(&self, now: DateTime<Utc>) -> Vec<SessionId> {
        let retention = ChronoDuration::seconds(self.config.settled_retention_secs as i64);
        let records: Vec<_> = self
            .sessions
            .iter()
            .map(|s| (*s.key(), Arc::clone(s.value())))
            .collect();

        let mut evicted = Vec::new();
        for (session_id, record) in records {
            let session = record.lock().await;
            if session.status != SessionStatus::Settled || now - session.updated_at < retention {
                continue;
            }
            self.sessions.remove(&session_id);
            for address in [&session.client.address, &session.server.address] {
                if let Some(mut ids) = self.by_participant.get_mut(address) {
                    ids.retain(|id| *id != session_id);
                }
                self.by_participant.remove_if(address, |_, ids| ids.is_empty());
            }
            evicted.push(session_id);
        }

        if !evicted.is_empty() {
            debug!(count = evicted.len(), "Settled sessions evicted");
        }
        evicted
    }

    pub async fn evict_settled(&self) -> Vec<SessionId> {
        self.evict_settled_at(Utc::now()).await
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Run [`Self::expire_stale`] and [`Self::evict_settled`] periodically
    /// until the ledger is dropped
    pub fn spawn_expiry_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let ledger = Arc::downgrade(self);
        let period = self.config.sweep_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(ledger) = ledger.upgrade() else {
                    break;
                };
                let expired = ledger.expire_stale().await;
                if !expired.is_empty() {
                    debug!(count = expired.len(), "Expiry sweep finished");
                }
                ledger.evict_settled().await;
            }
        })
    }

    pub async fn get_session(&self, session_id: &SessionId) -> Result<BilateralSession> {
        let record = self.record(session_id)?;
        let session = record.lock().await;
        Ok(session.clone())
    }

    /// Sessions, optionally only those `participant` takes part in, oldest first
    pub async fn list_sessions(&self, participant: Option<&str>) -> Vec<BilateralSession> {
        let records: Vec<_> = match participant {
            Some(address) => self
                .by_participant
                .get(address)
                .map(|ids| ids.value().clone())
                .unwrap_or_default()
                .iter()
                .filter_map(|id| self.sessions.get(id).map(|s| Arc::clone(s.value())))
                .collect(),
            None => self.sessions.iter().map(|s| Arc::clone(s.value())).collect(),
        };

        let mut sessions = Vec::with_capacity(records.len());
        for record in records {
            sessions.push(record.lock().await.clone());
        }
        sessions.sort_by_key(|s| s.created_at);
        sessions
    }
}
