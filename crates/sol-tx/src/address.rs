//! Solana address encoding.
//!
//! A Solana address is the Base58 encoding of a raw 32-byte value: either an
//! Ed25519 public key or a program derived address. Inside this workspace
//! addresses always travel as `[u8; 32]`; Base58 only appears at the edges
//! (configuration, logs, error messages, RPC parameters).

use crate::error::TxError;

/// A raw 32-byte account or program address.
pub type Address = [u8; 32];

/// Decode a Base58 address string to its 32-byte representation.
pub fn parse_address(address: &str) -> Result<Address, TxError> {
    let bytes = bs58::decode(address.trim())
        .into_vec()
        .map_err(|e| TxError::InvalidAddress(format!("base58 decode failed: {e}")))?;

    let arr: Address = bytes.try_into().map_err(|v: Vec<u8>| {
        TxError::InvalidAddress(format!("expected 32 bytes, got {}", v.len()))
    })?;

    Ok(arr)
}

/// Encode 32 bytes as a Base58 address string.
pub fn address_to_string(bytes: &Address) -> String {
    bs58::encode(bytes).into_string()
}

/// Whether `address` is a well-formed Base58 Solana address.
pub fn is_valid_address(address: &str) -> bool {
    parse_address(address).is_ok()
}

/// Whether the 32 bytes decompress to a point on the Ed25519 curve.
///
/// Keys that can sign are always on the curve; program derived addresses
/// are required to be off it.
pub fn is_on_curve(bytes: &Address) -> bool {
    curve25519_dalek::edwards::CompressedEdwardsY(*bytes)
        .decompress()
        .is_some()
}
