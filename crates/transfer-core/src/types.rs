use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sol_tx::{Address, TxError};

/// Commitment levels, ordered from weakest to strongest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Commitment {
    Processed,
    Confirmed,
    Finalized,
}

impl Commitment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Commitment::Processed => "processed",
            Commitment::Confirmed => "confirmed",
            Commitment::Finalized => "finalized",
        }
    }

    /// Whether a transaction at `self` satisfies a request for `required`.
    pub fn satisfies(&self, required: Commitment) -> bool {
        *self >= required
    }
}

impl fmt::Display for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Commitment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "processed" => Ok(Commitment::Processed),
            "confirmed" => Ok(Commitment::Confirmed),
            "finalized" => Ok(Commitment::Finalized),
            other => Err(format!("unknown commitment level: {other}")),
        }
    }
}

/// The two parties that sign a sponsored transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignerRole {
    /// The token owner authorising the transfer.
    User,
    /// The fee payer co-signing and paying rent/fees.
    Sponsor,
}

impl fmt::Display for SignerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignerRole::User => f.write_str("user"),
            SignerRole::Sponsor => f.write_str("sponsor"),
        }
    }
}

/// One user-initiated transfer of `amount` smallest units of `mint` from
/// `source_owner` to `dest_owner`, with `fee_payer` sponsoring fees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferRequest {
    pub source_owner: Address,
    pub dest_owner: Address,
    pub mint: Address,
    pub fee_payer: Address,
    amount: u64,
}

impl TransferRequest {
    pub fn new(
        source_owner: Address,
        dest_owner: Address,
        mint: Address,
        fee_payer: Address,
        amount: u64,
    ) -> Result<Self, TxError> {
        if amount == 0 {
            return Err(TxError::InvalidAmount(
                "transfer amount must be > 0".into(),
            ));
        }
        Ok(Self {
            source_owner,
            dest_owner,
            mint,
            fee_payer,
            amount,
        })
    }

    /// Amount in the mint's smallest unit; always non-zero.
    pub fn amount(&self) -> u64 {
        self.amount
    }
}
