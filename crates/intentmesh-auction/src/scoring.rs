//! Bid scoring and ranking
//!
//! Everything here is a pure function of the bid, its intent and the weights,
//! so a ranking can always be reproduced from the stored records.

use std::cmp::Ordering;
use std::fmt;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use intentmesh_types::{Bid, BidStatus, Intent, IntentRequirements};

use crate::config::ScoringWeights;

/// Highest reputation a provider can hold
pub const MAX_REPUTATION: f64 = 5.0;

/// Hard requirement a bid failed
#[derive(Debug, Clone, PartialEq)]
pub enum Disqualification {
    ReputationTooLow { required: f64, actual: f64 },
    TeeRequired,
    Excluded,
    NotAllowed,
    MissingCapability(String),
}

impl fmt::Display for Disqualification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReputationTooLow { required, actual } => {
                write!(f, "reputation {} below required {}", actual, required)
            }
            Self::TeeRequired => f.write_str("TEE attestation required"),
            Self::Excluded => f.write_str("provider excluded"),
            Self::NotAllowed => f.write_str("provider not on allow-list"),
            Self::MissingCapability(c) => write!(f, "missing capability {}", c),
        }
    }
}

/// Check a bid against the intent's hard requirements
pub fn check_requirements(bid: &Bid, requirements: &IntentRequirements) -> Result<(), Disqualification> {
    if requirements.excludes(&bid.provider) {
        return Err(Disqualification::Excluded);
    }
    if !requirements.allowed_providers.is_empty()
        && !requirements.allowed_providers.iter().any(|p| p == &bid.provider)
    {
        return Err(Disqualification::NotAllowed);
    }
    if let Some(required) = requirements.min_reputation {
        if bid.snapshot.reputation < required {
            return Err(Disqualification::ReputationTooLow {
                required,
                actual: bid.snapshot.reputation,
            });
        }
    }
    if requirements.require_tee && !bid.snapshot.tee_attested {
        return Err(Disqualification::TeeRequired);
    }
    if let Some(missing) = requirements
        .required_capabilities
        .iter()
        .find(|c| !bid.snapshot.has_capability(c))
    {
        return Err(Disqualification::MissingCapability(missing.clone()));
    }
    Ok(())
}

/// Score a bid that passed [`check_requirements`]
pub fn score_bid(bid: &Bid, intent: &Intent, weights: &ScoringWeights, default_latency_ms: u64) -> f64 {
    let price_ratio = if intent.max_budget > Decimal::ZERO {
        (bid.bid_amount / intent.max_budget).to_f64().unwrap_or(1.0)
    } else {
        1.0
    };
    let price_score = (1.0 - price_ratio) * 100.0;

    let reputation_score = bid.snapshot.reputation / MAX_REPUTATION * 100.0;

    let reference_latency = intent
        .requirements
        .max_latency_ms
        .unwrap_or(default_latency_ms)
        .max(1) as f64;
    let speed_score = (1.0 - bid.estimated_time_ms as f64 / reference_latency).max(0.0) * 100.0;

    let base = price_score * weights.price
        + reputation_score * weights.reputation
        + speed_score * weights.speed;

    if bid.snapshot.tee_attested {
        base * weights.tee_bonus
    } else {
        base
    }
}

/// Result of ranking an intent's pending bids
#[derive(Debug, Clone, Default)]
pub struct Ranking {
    /// `(bid index, score)`, best first
    pub ranked: Vec<(usize, f64)>,
    /// `(bid index, reason)` for bids that failed a hard requirement
    pub rejected: Vec<(usize, Disqualification)>,
}

/// Filter, score and order the pending bids of an intent.
///
/// Higher score wins; equal scores go to the earlier submission.
pub fn rank_bids(intent: &Intent, bids: &[Bid], weights: &ScoringWeights, default_latency_ms: u64) -> Ranking {
    let mut ranking = Ranking::default();

    for (index, bid) in bids.iter().enumerate() {
        if bid.status != BidStatus::Pending {
            continue;
        }
        match check_requirements(bid, &intent.requirements) {
            Ok(()) => ranking
                .ranked
                .push((index, score_bid(bid, intent, weights, default_latency_ms))),
            Err(reason) => ranking.rejected.push((index, reason)),
        }
    }

    ranking.ranked.sort_by(|(a, score_a), (b, score_b)| {
        score_b
            .partial_cmp(score_a)
            .unwrap_or(Ordering::Equal)
            .then_with(|| bids[*a].submitted_at.cmp(&bids[*b].submitted_at))
    });
    ranking
}
