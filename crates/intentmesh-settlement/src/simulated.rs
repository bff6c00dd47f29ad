//! Simulated payment rail for demo mode

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::debug;

use intentmesh_types::{RailError, TransferReceipt, TransferRequest};

use crate::PaymentRail;

/// Pseudo block height the simulation starts from
const GENESIS_SEQUENCE: u64 = 1_000_000;

/// Rail that never moves funds.
///
/// Each transfer waits for the configured latency and returns a fabricated
/// transaction hash and an increasing pseudo block number.
pub struct SimulatedRail {
    latency: Duration,
    sequence: AtomicU64,
}

impl SimulatedRail {
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            sequence: AtomicU64::new(GENESIS_SEQUENCE),
        }
    }

    fn fabricate_reference(request: &TransferRequest, sequence: u64) -> String {
        let mut hasher = Sha256::new();
        hasher.update(request.from.as_str().as_bytes());
        hasher.update(request.to.as_bytes());
        hasher.update(request.amount.to_string().as_bytes());
        hasher.update(request.memo.as_bytes());
        hasher.update(sequence.to_be_bytes());
        format!("0x{}", hex::encode(hasher.finalize()))
    }
}

impl Default for SimulatedRail {
    fn default() -> Self {
        Self::new(Duration::from_millis(50))
    }
}

#[async_trait]
impl PaymentRail for SimulatedRail {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn transfer(&self, request: TransferRequest) -> Result<TransferReceipt, RailError> {
        if request.amount.is_sign_negative() || request.amount.is_zero() {
            return Err(RailError::InvalidAmount {
                amount: request.amount,
            });
        }

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let reference = Self::fabricate_reference(&request, sequence);
        debug!(%reference, sequence, to = %request.to, "Simulated transfer of {}", request.amount);

        Ok(TransferReceipt {
            reference,
            sequence: Some(sequence),
            amount: request.amount,
            settled_at: Utc::now(),
        })
    }
}
