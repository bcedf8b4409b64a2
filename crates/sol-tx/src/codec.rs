//! Hex codec shared by every boundary that exchanges bytes as text.
//!
//! The remote signer receives the serialized message as `0x`-prefixed hex and
//! answers with a hex signature, which may or may not carry the prefix.

use crate::error::TxError;

/// Encode bytes as lowercase hex with a `0x` prefix.
pub fn encode_hex_prefixed(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// Decode a hex string (optionally `0x`/`0X`-prefixed) of any length.
pub fn decode_hex(input: &str) -> Result<Vec<u8>, TxError> {
    let trimmed = input.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    hex::decode(digits).map_err(|e| TxError::InvalidHex(e.to_string()))
}

/// Decode a hex string into exactly `N` bytes.
pub fn decode_hex_array<const N: usize>(input: &str) -> Result<[u8; N], TxError> {
    let bytes = decode_hex(input)?;
    bytes.try_into().map_err(|v: Vec<u8>| {
        TxError::InvalidHex(format!("expected {N} bytes, got {}", v.len()))
    })
}
