//! Solana transaction construction for sponsored token transfers.
//!
//! This crate handles associated token account derivation, SPL instruction
//! encoding, manual transaction wire format serialization and the combination
//! of signatures from independent signers, all without pulling in
//! `solana-sdk`.
//!
//! Nothing here signs: keys live with remote signers. We only build the
//! message they sign and verify what they return, using `ed25519-dalek` for
//! verification and `bs58` for Base58 encoding.

pub mod address;
pub mod codec;
pub mod error;
pub mod signatures;
pub mod spl_token;
pub mod token_account;
pub mod transaction;

pub use address::{address_to_string, is_on_curve, is_valid_address, parse_address, Address};
pub use error::TxError;
pub use signatures::{combine, SignatureEntry, SignedTransaction};
pub use spl_token::{
    base_units_to_ui_amount, build_create_associated_token_account, build_spl_transfer,
    derive_account, derive_associated_token_address, find_program_address,
    ui_amount_to_base_units, ProgramIds, ASSOCIATED_TOKEN_PROGRAM_ID, RENT_SYSVAR_ID,
    TOKEN_PROGRAM_ID,
};
pub use token_account::{TokenAccountState, TOKEN_ACCOUNT_LEN};
pub use transaction::{
    compile_transaction, decode_compact_u16, decode_message, encode_compact_u16,
    serialize_message, AccountMeta, CompiledInstruction, Instruction, UnsignedTransaction,
    SYSTEM_PROGRAM_ID,
};
