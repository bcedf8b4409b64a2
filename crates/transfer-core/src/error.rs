use std::time::Duration;

use sol_tx::TxError;
use thiserror::Error;

use crate::orchestrator::TransferState;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("Transaction error: {0}")]
    Transaction(#[from] TxError),

    #[error("RPC node unavailable: {0}")]
    RpcUnavailable(String),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Invalid RPC response: {0}")]
    InvalidResponse(String),

    #[error("Blockhash expired: {0}")]
    BlockhashExpired(String),

    /// The node already holds a transaction with this signature.
    #[error("Transaction already processed: {0}")]
    AlreadyProcessed(String),

    #[error("Preflight rejected: {reason}")]
    PreflightRejected { reason: String },

    #[error("Insufficient token balance: {available} available, {required} required")]
    InsufficientBalance { available: u64, required: u64 },

    #[error("On-chain execution failed: {code}")]
    OnChainError { code: String },

    #[error("Transaction not confirmed within {0:?}")]
    ConfirmationTimeout(Duration),

    #[error("Remote signer failed: {0}")]
    Signer(String),

    #[error("Remote signer did not answer within {0:?}")]
    SignerTimeout(Duration),

    #[error("Invalid state transition: {from:?} -> {to:?}")]
    InvalidStateTransition {
        from: TransferState,
        to: TransferState,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl TransferError {
    /// Faults worth one more attempt against the same node with fresh state.
    pub fn is_transient(&self) -> bool {
        matches!(self, TransferError::RpcUnavailable(_))
    }

    /// Whether the attempt died because its blockhash aged out; only these
    /// failures are safe to rebuild and re-sign automatically.
    pub fn is_blockhash_expired(&self) -> bool {
        matches!(self, TransferError::BlockhashExpired(_))
    }
}
