//! Read-only view of SPL token account data.

use crate::address::{address_to_string, Address};
use crate::error::TxError;

/// Size of an SPL Token account (`spl_token::state::Account::LEN`).
pub const TOKEN_ACCOUNT_LEN: usize = 165;

/// The fields of a token account this workspace cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenAccountState {
    pub mint: Address,
    pub owner: Address,
    pub amount: u64,
}

impl TokenAccountState {
    /// Parse raw account data: mint `[0..32]`, owner `[32..64]`, amount
    /// `[64..72]` little-endian.
    pub fn parse(data: &[u8]) -> Result<Self, TxError> {
        if data.len() < TOKEN_ACCOUNT_LEN {
            return Err(TxError::InvalidTokenAccount(format!(
                "expected at least {TOKEN_ACCOUNT_LEN} bytes, got {}",
                data.len()
            )));
        }

        let mut mint = [0u8; 32];
        mint.copy_from_slice(&data[0..32]);
        let mut owner = [0u8; 32];
        owner.copy_from_slice(&data[32..64]);
        let mut amount = [0u8; 8];
        amount.copy_from_slice(&data[64..72]);

        Ok(Self {
            mint,
            owner,
            amount: u64::from_le_bytes(amount),
        })
    }

    /// Check the account holds `mint` on behalf of `owner`.
    pub fn ensure_holds(&self, mint: &Address, owner: &Address) -> Result<(), TxError> {
        if &self.mint != mint {
            return Err(TxError::InvalidTokenAccount(format!(
                "account holds mint {}, expected {}",
                address_to_string(&self.mint),
                address_to_string(mint)
            )));
        }
        if &self.owner != owner {
            return Err(TxError::InvalidTokenAccount(format!(
                "account is owned by {}, expected {}",
                address_to_string(&self.owner),
                address_to_string(owner)
            )));
        }
        Ok(())
    }

    /// Encode into a minimal account image: the three fields at their
    /// offsets, the rest zeroed (state byte at offset 108 set to initialized).
    pub fn to_account_data(&self) -> Vec<u8> {
        let mut data = vec![0u8; TOKEN_ACCOUNT_LEN];
        data[0..32].copy_from_slice(&self.mint);
        data[32..64].copy_from_slice(&self.owner);
        data[64..72].copy_from_slice(&self.amount.to_le_bytes());
        data[108] = 1;
        data
    }
}
