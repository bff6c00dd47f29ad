//! Error types for IntentMesh
//!
//! Every rejection leaves the affected record exactly as it was. Callers get a
//! structured error they can act on, never a panic.

use crate::{EscrowId, EscrowStatus, IntentId, IntentStatus, RailError, SessionId, SessionStatus};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for IntentMesh operations
pub type Result<T> = std::result::Result<T, IntentMeshError>;

/// Broad class of an error, used by callers to decide how to react
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed or out-of-bounds input
    Validation,
    /// Unknown id
    NotFound,
    /// Operation not valid for the record's current status
    StateConflict,
    /// The payment rail failed; the record is unchanged
    External,
    /// A bounded resource is full
    Capacity,
    Internal,
}

/// IntentMesh error types
#[derive(Debug, Clone, Error)]
pub enum IntentMeshError {
    // ========================================================================
    // Validation Errors
    // ========================================================================

    /// Invalid input
    #[error("Invalid input: {field} - {reason}")]
    InvalidInput { field: String, reason: String },

    /// Amount outside its permitted range
    #[error("{field} {amount} outside permitted range [{min}, {max}]")]
    AmountOutOfRange {
        field: String,
        amount: Decimal,
        min: Decimal,
        max: Decimal,
    },

    /// Provider is on the intent's exclusion list
    #[error("Provider {provider} is excluded from intent {intent_id}")]
    ProviderExcluded { intent_id: IntentId, provider: String },

    /// Requested payout exceeds funds held
    #[error("Escrow {escrow_id} holds {available}, cannot pay out {requested}")]
    EscrowAmountExceeded {
        escrow_id: EscrowId,
        requested: Decimal,
        available: Decimal,
    },

    // ========================================================================
    // Not Found Errors
    // ========================================================================

    #[error("Intent {intent_id} not found")]
    IntentNotFound { intent_id: IntentId },

    #[error("Escrow {escrow_id} not found")]
    EscrowNotFound { escrow_id: String },

    #[error("Session {session_id} not found")]
    SessionNotFound { session_id: SessionId },

    // ========================================================================
    // State Conflict Errors
    // ========================================================================

    /// Bid arrived after the bidding window closed
    #[error("Bidding on intent {intent_id} is closed (status: {status})")]
    BiddingClosed {
        intent_id: IntentId,
        status: IntentStatus,
    },

    /// Provider already has a bid on this intent
    #[error("Provider {provider} already bid on intent {intent_id}")]
    DuplicateBid { intent_id: IntentId, provider: String },

    /// Operation not valid for the intent's status
    #[error("Cannot {operation} intent {intent_id} in status {status}")]
    InvalidIntentState {
        intent_id: IntentId,
        status: IntentStatus,
        operation: &'static str,
    },

    /// Caller is not the provider currently holding the work
    #[error("Provider {provider} is not assigned to intent {intent_id} (assigned: {assigned:?})")]
    NotAssignedProvider {
        intent_id: IntentId,
        provider: String,
        assigned: Option<String>,
    },

    /// Operation not valid for the escrow's status
    #[error("Cannot {operation} escrow {escrow_id} in status {status}")]
    InvalidEscrowState {
        escrow_id: EscrowId,
        status: EscrowStatus,
        operation: &'static str,
    },

    /// A partially completed release or slash must be finished first
    #[error("Escrow {escrow_id} has a pending {operation} that must be completed first")]
    SettlementPending {
        escrow_id: EscrowId,
        operation: &'static str,
    },

    /// Operation not valid for the session's status
    #[error("Cannot {operation} session {session_id} in status {status}")]
    InvalidSessionState {
        session_id: SessionId,
        status: SessionStatus,
        operation: &'static str,
    },

    // ========================================================================
    // External Dependency Errors
    // ========================================================================

    /// The payment rail refused or failed the transfer
    #[error("Payment rail {rail} transfer failed: {source}")]
    RailTransferFailed {
        rail: String,
        #[source]
        source: RailError,
    },

    // ========================================================================
    // Capacity Errors
    // ========================================================================

    /// Too many intents tracked
    #[error("Intent capacity reached: {limit} tracked intents")]
    CapacityExceeded { limit: usize },

    /// Reservation pool cannot cover the request
    #[error("Insufficient liquidity: requested {requested}, available {available}")]
    InsufficientLiquidity {
        requested: Decimal,
        available: Decimal,
    },

    // ========================================================================
    // General Errors
    // ========================================================================

    /// Internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl IntentMeshError {
    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Create an invalid input error
    pub fn invalid_input(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Wrap a rail failure
    pub fn rail(rail: impl Into<String>, source: RailError) -> Self {
        Self::RailTransferFailed {
            rail: rail.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput { .. }
            | Self::AmountOutOfRange { .. }
            | Self::ProviderExcluded { .. }
            | Self::EscrowAmountExceeded { .. } => ErrorKind::Validation,
            Self::IntentNotFound { .. }
            | Self::EscrowNotFound { .. }
            | Self::SessionNotFound { .. } => ErrorKind::NotFound,
            Self::BiddingClosed { .. }
            | Self::DuplicateBid { .. }
            | Self::InvalidIntentState { .. }
            | Self::NotAssignedProvider { .. }
            | Self::InvalidEscrowState { .. }
            | Self::SettlementPending { .. }
            | Self::InvalidSessionState { .. } => ErrorKind::StateConflict,
            Self::RailTransferFailed { .. } => ErrorKind::External,
            Self::CapacityExceeded { .. } | Self::InsufficientLiquidity { .. } => {
                ErrorKind::Capacity
            }
            Self::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Check if retrying the same call can succeed.
    ///
    /// Only rail failures qualify: the record was left in its pre-call state,
    /// so a retry can never double-pay.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::RailTransferFailed { .. })
    }

    /// Get an error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidInput { .. } => "INVALID_INPUT",
            Self::AmountOutOfRange { .. } => "AMOUNT_OUT_OF_RANGE",
            Self::ProviderExcluded { .. } => "PROVIDER_EXCLUDED",
            Self::EscrowAmountExceeded { .. } => "ESCROW_AMOUNT_EXCEEDED",
            Self::IntentNotFound { .. } => "INTENT_NOT_FOUND",
            Self::EscrowNotFound { .. } => "ESCROW_NOT_FOUND",
            Self::SessionNotFound { .. } => "SESSION_NOT_FOUND",
            Self::BiddingClosed { .. } => "BIDDING_CLOSED",
            Self::DuplicateBid { .. } => "DUPLICATE_BID",
            Self::InvalidIntentState { .. } => "INTENT_INVALID_STATE",
            Self::NotAssignedProvider { .. } => "NOT_ASSIGNED_PROVIDER",
            Self::InvalidEscrowState { .. } => "ESCROW_INVALID_STATE",
            Self::SettlementPending { .. } => "ESCROW_SETTLEMENT_PENDING",
            Self::InvalidSessionState { .. } => "SESSION_INVALID_STATE",
            Self::RailTransferFailed { .. } => "RAIL_TRANSFER_FAILED",
            Self::CapacityExceeded { .. } => "CAPACITY_EXCEEDED",
            Self::InsufficientLiquidity { .. } => "INSUFFICIENT_LIQUIDITY",
            Self::Internal { .. } => "INTERNAL_ERROR",
        }
    }
}

/// Structured error handed to the transport layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub kind: ErrorKind,
    pub code: String,
    pub message: String,
}

impl From<&IntentMeshError> for ErrorResponse {
    fn from(err: &IntentMeshError) -> Self {
        Self {
            kind: err.kind(),
            code: err.error_code().to_string(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_error_codes() {
        let err = IntentMeshError::BiddingClosed {
            intent_id: IntentId::new(),
            status: IntentStatus::Assigned,
        };
        assert_eq!(err.error_code(), "BIDDING_CLOSED");
        assert_eq!(err.kind(), ErrorKind::StateConflict);
        assert!(err.to_string().contains("ASSIGNED"));
    }

    #[test]
    fn test_retriable_errors() {
        let rail = IntentMeshError::rail(
            "memory",
            RailError::Unavailable {
                reason: "down".to_string(),
            },
        );
        assert!(rail.is_retriable());
        assert_eq!(rail.kind(), ErrorKind::External);

        let exceeded = IntentMeshError::EscrowAmountExceeded {
            escrow_id: EscrowId::new(),
            requested: dec!(2),
            available: dec!(1),
        };
        assert!(!exceeded.is_retriable());
        assert_eq!(exceeded.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_error_response() {
        let err = IntentMeshError::invalid_input("max_budget", "must be positive");
        let response = ErrorResponse::from(&err);
        assert_eq!(response.code, "INVALID_INPUT");
        assert_eq!(response.kind, ErrorKind::Validation);
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["kind"], "validation");
    }
}
