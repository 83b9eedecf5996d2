//! Error types for the vault orchestrator

use crate::coordination::StepId;
use crate::session::Ability;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Pre-flight failures. A flow never starts when planning fails.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlanningError {
    #[error("No asset or target chain selected")]
    NothingSelected,

    #[error("Amount must be greater than zero")]
    ZeroAmount,

    #[error("Chain {chain_id} is not configured")]
    UnknownChain { chain_id: u64 },

    #[error("Insufficient {symbol} balance on chain {chain_id}: have {have}, need {need}")]
    InsufficientBalance {
        chain_id: u64,
        symbol: String,
        have: String,
        need: String,
    },
}

/// Relay wallet funding failures. Raised before any step is marked processing.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FundingError {
    #[error("Funding transfer to relay wallet failed: {0}")]
    TransferFailed(String),

    #[error("Relay wallet balance unavailable on chain {chain_id}: {message}")]
    BalanceUnavailable { chain_id: u64, message: String },

    #[error("Relay wallet funding not verified after {attempts} attempts")]
    VerificationFailed { attempts: u32 },
}

/// A failure reported by an external execution service.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ServiceError {
    #[error("rejected: {0}")]
    Rejected(String),

    #[error("reverted: {0}")]
    Reverted(String),

    #[error("transport: {0}")]
    Transport(String),
}

/// A failed Asset Movement Operation, always tied to the step that ran it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OperationError {
    #[error("Precheck for {step} failed: {source}")]
    Precheck { step: StepId, source: ServiceError },

    #[error("Execution of {step} failed: {source}")]
    Execution { step: StepId, source: ServiceError },

    #[error("{step} {phase} did not finish within {secs}s")]
    Timeout {
        step: StepId,
        phase: &'static str,
        secs: u64,
    },

    #[error("{step} is missing required input: {what}")]
    MissingInput { step: StepId, what: String },
}

impl OperationError {
    /// The step whose operation raised this error
    pub fn step(&self) -> StepId {
        match self {
            OperationError::Precheck { step, .. }
            | OperationError::Execution { step, .. }
            | OperationError::Timeout { step, .. }
            | OperationError::MissingInput { step, .. } => *step,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AuthorizationError {
    #[error("No session credential present")]
    MissingCredential,

    #[error("Session credential expired at {expired_at}")]
    Expired { expired_at: DateTime<Utc> },

    #[error("Session credential is malformed: {0}")]
    MalformedCredential(String),

    #[error("Delegated signer is not permitted to use the {0} ability")]
    AbilityNotPermitted(Ability),
}

/// Main error type for the orchestrator
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Planning(#[from] PlanningError),

    #[error(transparent)]
    Funding(#[from] FundingError),

    #[error(transparent)]
    Operation(#[from] OperationError),

    #[error(transparent)]
    Authorization(#[from] AuthorizationError),

    #[error("Relay wallet {address} is already executing a flow")]
    RelayWalletBusy { address: String },

    #[error("Chain connection error for chain {chain_id}: {message}")]
    ChainConnection { chain_id: u64, message: String },

    #[error("Chain {chain_id} not found")]
    ChainNotFound { chain_id: u64 },

    #[error("Invalid transition of {step} from {from} to {to}")]
    InvalidStateTransition {
        step: StepId,
        from: String,
        to: String,
    },

    #[error("Wallet error: {0}")]
    Wallet(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl OrchestratorError {
    /// Check if error should trigger an alert
    pub fn should_alert(&self) -> bool {
        matches!(
            self,
            OrchestratorError::Funding(_) | OrchestratorError::Wallet(_)
        )
    }
}

/// Result type for orchestrator operations
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_error_reports_its_step() {
        let err = OperationError::Precheck {
            step: StepId::Swap,
            source: ServiceError::Rejected("slippage".into()),
        };
        assert_eq!(err.step(), StepId::Swap);
        assert_eq!(
            err.to_string(),
            "Precheck for swap-token failed: rejected: slippage"
        );
    }

    #[test]
    fn funding_failures_alert() {
        let err: OrchestratorError = FundingError::VerificationFailed { attempts: 10 }.into();
        assert!(err.should_alert());
        let err: OrchestratorError = PlanningError::NothingSelected.into();
        assert!(!err.should_alert());
    }
}
