//! SPL Token instructions and associated token account derivation.
//!
//! Implements the two instructions a sponsored transfer needs (the Associated
//! Token Account program's `Create` and the Token program's `Transfer`) plus
//! program derived address search, without pulling in `solana-sdk` or the
//! `spl-token` crates.

use sha2::{Digest, Sha256};

use crate::address::{is_on_curve, Address};
use crate::error::TxError;
use crate::transaction::{AccountMeta, Instruction, SYSTEM_PROGRAM_ID};

// ---------------------------------------------------------------------------
// Well-known program IDs
// ---------------------------------------------------------------------------

/// SPL Token Program ID: `TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA`
pub const TOKEN_PROGRAM_ID: Address = [
    0x06, 0xdd, 0xf6, 0xe1, 0xd7, 0x65, 0xa1, 0x93, 0xd9, 0xcb, 0xe1, 0x46, 0xce, 0xeb, 0x79,
    0xac, 0x1c, 0xb4, 0x85, 0xed, 0x5f, 0x5b, 0x37, 0x91, 0x3a, 0x8c, 0xf5, 0x85, 0x7e, 0xff,
    0x00, 0xa9,
];

/// Associated Token Account Program ID: `ATokenGPvbdGVxr1b2hvZbsiqW5xWH25efTNsLJA8knL`
pub const ASSOCIATED_TOKEN_PROGRAM_ID: Address = [
    0x8c, 0x97, 0x25, 0x8f, 0x4e, 0x24, 0x89, 0xf1, 0xbb, 0x3d, 0x10, 0x29, 0x14, 0x8e, 0x0d,
    0x83, 0x0b, 0x5a, 0x13, 0x99, 0xda, 0xff, 0x10, 0x84, 0x04, 0x8e, 0x7b, 0xd8, 0xdb, 0xe9,
    0xf8, 0x59,
];

/// Rent sysvar: `SysvarRent111111111111111111111111111111111`
pub const RENT_SYSVAR_ID: Address = [
    0x06, 0xa7, 0xd5, 0x17, 0x19, 0x2c, 0x5c, 0x51, 0x21, 0x8c, 0xc9, 0x4c, 0x3d, 0x4a, 0xf1,
    0x7f, 0x58, 0xda, 0xee, 0x08, 0x9b, 0xa1, 0xfd, 0x44, 0xe3, 0xdb, 0xd9, 0x8a, 0x00, 0x00,
    0x00, 0x00,
];

/// Token program instruction index for `Transfer`.
const TOKEN_TRANSFER_OPCODE: u8 = 3;

/// The string appended to PDA derivation: "ProgramDerivedAddress".
const PDA_MARKER: &[u8] = b"ProgramDerivedAddress";

/// The set of programs a sponsored token transfer touches.
///
/// Defaults to the mainnet/devnet deployments; tests and forks may swap in
/// their own ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramIds {
    pub token_program: Address,
    pub associated_token_program: Address,
    pub system_program: Address,
    pub rent_sysvar: Address,
}

impl Default for ProgramIds {
    fn default() -> Self {
        Self {
            token_program: TOKEN_PROGRAM_ID,
            associated_token_program: ASSOCIATED_TOKEN_PROGRAM_ID,
            system_program: SYSTEM_PROGRAM_ID,
            rent_sysvar: RENT_SYSVAR_ID,
        }
    }
}

// ---------------------------------------------------------------------------
// SPL Token Transfer
// ---------------------------------------------------------------------------

/// Build an SPL Token `Transfer` instruction.
///
/// `amount` is in the token's smallest unit (for a 6-decimal token,
/// `amount = 10_000` moves 0.01 tokens).
///
/// # Wire format
///
/// Opcode 3 followed by the u64 LE amount, 9 bytes in total.
pub fn build_spl_transfer(
    source: &Address,
    destination: &Address,
    owner: &Address,
    amount: u64,
    token_program: &Address,
) -> Result<Instruction, TxError> {
    if amount == 0 {
        return Err(TxError::InvalidAmount(
            "SPL transfer amount must be > 0".into(),
        ));
    }

    let mut data = Vec::with_capacity(9);
    data.push(TOKEN_TRANSFER_OPCODE);
    data.extend_from_slice(&amount.to_le_bytes());

    Ok(Instruction {
        program_id: *token_program,
        accounts: vec![
            AccountMeta::writable(*source),
            AccountMeta::writable(*destination),
            AccountMeta::readonly_signer(*owner),
        ],
        data,
    })
}

/// Build the Associated Token Account program's `Create` instruction.
///
/// `payer` funds the rent of the new account and therefore signs. The
/// instruction carries no data; the program infers everything from the
/// account list.
#[allow(clippy::too_many_arguments)]
pub fn build_create_associated_token_account(
    payer: &Address,
    associated_account: &Address,
    owner: &Address,
    mint: &Address,
    token_program: &Address,
    system_program: &Address,
    rent_sysvar: &Address,
    associated_token_program: &Address,
) -> Instruction {
    Instruction {
        program_id: *associated_token_program,
        accounts: vec![
            AccountMeta::writable_signer(*payer),
            AccountMeta::writable(*associated_account),
            AccountMeta::readonly(*owner),
            AccountMeta::readonly(*mint),
            AccountMeta::readonly(*system_program),
            AccountMeta::readonly(*token_program),
            AccountMeta::readonly(*rent_sysvar),
        ],
        data: Vec::new(),
    }
}

// ---------------------------------------------------------------------------
// Associated Token Account (PDA) derivation
// ---------------------------------------------------------------------------

/// Derive the token account address owned by `owner` for `mint`.
///
/// Seeds are `[owner, token_program, mint]` under `associated_token_program`.
pub fn derive_account(
    owner: &Address,
    mint: &Address,
    token_program: &Address,
    associated_token_program: &Address,
) -> Result<Address, TxError> {
    find_program_address(
        &[owner.as_ref(), token_program.as_ref(), mint.as_ref()],
        associated_token_program,
    )
    .map(|(address, _bump)| address)
}

/// [`derive_account`] against the canonical Token and ATA programs.
pub fn derive_associated_token_address(
    owner: &Address,
    mint: &Address,
) -> Result<Address, TxError> {
    derive_account(owner, mint, &TOKEN_PROGRAM_ID, &ASSOCIATED_TOKEN_PROGRAM_ID)
}

/// Find a valid Program Derived Address (PDA) for the given seeds and program.
///
/// Iterates bump seeds from 255 down to 0, computing
/// `SHA-256(seed_0 || seed_1 || ... || bump || program_id || "ProgramDerivedAddress")`
/// and returning the first result that is NOT a valid Ed25519 point.
pub fn find_program_address(
    seeds: &[&[u8]],
    program_id: &Address,
) -> Result<(Address, u8), TxError> {
    for bump in (0u8..=255).rev() {
        if let Some(address) = try_create_program_address(seeds, bump, program_id) {
            return Ok((address, bump));
        }
    }

    Err(TxError::DerivationExhausted)
}

/// Returns `Some(address)` if the hash is off the Ed25519 curve, `None` if
/// it falls on the curve and the next bump must be tried.
fn try_create_program_address(
    seeds: &[&[u8]],
    bump: u8,
    program_id: &Address,
) -> Option<Address> {
    let mut hasher = Sha256::new();

    for seed in seeds {
        hasher.update(seed);
    }
    hasher.update([bump]);
    hasher.update(program_id);
    hasher.update(PDA_MARKER);

    let hash: Address = hasher.finalize().into();

    if is_on_curve(&hash) {
        return None;
    }

    Some(hash)
}

// ---------------------------------------------------------------------------
// Amount scaling
// ---------------------------------------------------------------------------

/// Convert a decimal token amount (`"0.01"`) into smallest units.
///
/// Digits beyond `decimals` are truncated, never rounded up. Zero, negative
/// and malformed amounts are rejected, as is anything that overflows u64.
pub fn ui_amount_to_base_units(amount: &str, decimals: u8) -> Result<u64, TxError> {
    let amount = amount.trim();
    let (whole, fraction) = match amount.split_once('.') {
        Some((w, f)) => (w, f),
        None => (amount, ""),
    };

    let is_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if (whole.is_empty() && fraction.is_empty()) || !is_digits(whole) || !is_digits(fraction) {
        return Err(TxError::InvalidAmount(format!("not a decimal amount: {amount:?}")));
    }

    let decimals = decimals as usize;
    let mut fraction_digits: String = fraction.chars().take(decimals).collect();
    while fraction_digits.len() < decimals {
        fraction_digits.push('0');
    }

    let overflow = || TxError::InvalidAmount(format!("{amount} overflows u64 base units"));
    let scale = 10u64
        .checked_pow(decimals as u32)
        .ok_or_else(overflow)?;
    let whole_units = if whole.is_empty() {
        0
    } else {
        whole.parse::<u64>().map_err(|_| overflow())?
    };
    let fraction_units = if fraction_digits.is_empty() {
        0
    } else {
        fraction_digits.parse::<u64>().map_err(|_| overflow())?
    };

    let units = whole_units
        .checked_mul(scale)
        .and_then(|v| v.checked_add(fraction_units))
        .ok_or_else(overflow)?;

    if units == 0 {
        return Err(TxError::InvalidAmount(format!(
            "{amount} is zero at {decimals} decimals"
        )));
    }

    Ok(units)
}

/// Render smallest units as a decimal string with exactly `decimals` places.
pub fn base_units_to_ui_amount(units: u64, decimals: u8) -> String {
    if decimals == 0 {
        return units.to_string();
    }
    let digits = format!("{:0>width$}", units, width = decimals as usize + 1);
    let (whole, fraction) = digits.split_at(digits.len() - decimals as usize);
    format!("{whole}.{fraction}")
}
