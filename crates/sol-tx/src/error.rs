use thiserror::Error;

/// Errors raised while deriving addresses, encoding instructions and
/// assembling or signing Solana transactions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TxError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("no bump seed in 0..=255 yields an off-curve address")]
    DerivationExhausted,

    #[error("transaction has no instructions")]
    EmptyInstructionSet,

    #[error("signature verification failed for {address}")]
    SignatureVerificationFailed { address: String },

    #[error("{address} is not a signer of this transaction")]
    UnknownSigner { address: String },

    #[error("transaction is missing signatures from: {}", missing.join(", "))]
    IncompleteSignatures { missing: Vec<String> },

    #[error("invalid hex: {0}")]
    InvalidHex(String),

    #[error("invalid token account: {0}")]
    InvalidTokenAccount(String),

    #[error("serialization error: {0}")]
    SerializationError(String),
}
