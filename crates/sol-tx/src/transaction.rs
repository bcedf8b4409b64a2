//! Manual Solana transaction wire format.
//!
//! We build Solana transactions entirely by hand, with no `solana-sdk`
//! dependency. The wire format is a compact binary layout:
//!
//! ```text
//! Transaction:
//!   num_signatures          compact-u16
//!   signatures              64 bytes * num_signatures
//!   message:
//!     num_required_sigs     u8
//!     num_readonly_signed   u8
//!     num_readonly_unsigned u8
//!     num_accounts          compact-u16
//!     account_keys          32 bytes * num_accounts
//!     recent_blockhash      32 bytes
//!     num_instructions      compact-u16
//!     instructions[]        (see below)
//!
//! Instruction:
//!   program_id_index        u8
//!   num_accounts            compact-u16
//!   account_indices         u8 * num_accounts
//!   data_len                compact-u16
//!   data                    u8 * data_len
//! ```
//!
//! Signatures live in [`crate::signatures`]; this module only deals with the
//! message every signer signs.

use crate::address::Address;
use crate::error::TxError;

// ---------------------------------------------------------------------------
// Solana System Program
// ---------------------------------------------------------------------------

/// The Solana System Program public key: 32 zero bytes.
/// Base58: `11111111111111111111111111111111`
pub const SYSTEM_PROGRAM_ID: Address = [0u8; 32];

/// Account indices in a compiled instruction are single bytes.
const MAX_ACCOUNT_KEYS: usize = 256;

// ---------------------------------------------------------------------------
// Compact-u16 encoding
// ---------------------------------------------------------------------------

/// Encode a `u16` value in Solana's compact-u16 format.
///
/// - Values 0..0x7f       -> 1 byte
/// - Values 0x80..0x3fff  -> 2 bytes
/// - Values 0x4000..      -> 3 bytes
pub fn encode_compact_u16(value: u16) -> Vec<u8> {
    let mut val = value as u32;
    let mut out = Vec::with_capacity(3);

    loop {
        let mut byte = (val & 0x7f) as u8;
        val >>= 7;
        if val > 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if val == 0 {
            break;
        }
    }

    out
}

/// Decode a compact-u16 value from a byte slice.
///
/// Returns `(value, bytes_consumed)`. Only the canonical (shortest)
/// encoding is accepted: a trailing zero byte after a continuation is an
/// alias, and the third byte may carry at most the top two bits.
pub fn decode_compact_u16(data: &[u8]) -> Result<(u16, usize), TxError> {
    let mut value: u32 = 0;

    for consumed in 1..=3usize {
        let byte = *data.get(consumed - 1).ok_or_else(|| {
            TxError::SerializationError(
                "unexpected end of data while decoding compact-u16".into(),
            )
        })?;

        if consumed > 1 && byte == 0 {
            return Err(TxError::SerializationError(
                "non-canonical compact-u16 encoding".into(),
            ));
        }
        if consumed == 3 && byte > 0x03 {
            return Err(TxError::SerializationError(
                "compact-u16 value overflow".into(),
            ));
        }

        value |= ((byte & 0x7f) as u32) << (7 * (consumed - 1));
        if byte & 0x80 == 0 {
            return Ok((value as u16, consumed));
        }
    }

    Err(TxError::SerializationError(
        "compact-u16 longer than 3 bytes".into(),
    ))
}

fn compact_len(len: usize, what: &str) -> Result<Vec<u8>, TxError> {
    let len = u16::try_from(len)
        .map_err(|_| TxError::SerializationError(format!("too many {what}: {len}")))?;
    Ok(encode_compact_u16(len))
}

// ---------------------------------------------------------------------------
// Data structures
// ---------------------------------------------------------------------------

/// A single account reference in a Solana instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountMeta {
    pub pubkey: Address,
    pub is_signer: bool,
    pub is_writable: bool,
}

impl AccountMeta {
    pub fn writable_signer(pubkey: Address) -> Self {
        Self { pubkey, is_signer: true, is_writable: true }
    }

    pub fn readonly_signer(pubkey: Address) -> Self {
        Self { pubkey, is_signer: true, is_writable: false }
    }

    pub fn writable(pubkey: Address) -> Self {
        Self { pubkey, is_signer: false, is_writable: true }
    }

    pub fn readonly(pubkey: Address) -> Self {
        Self { pubkey, is_signer: false, is_writable: false }
    }
}

/// A Solana instruction (before it is compiled into a transaction).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub program_id: Address,
    pub accounts: Vec<AccountMeta>,
    pub data: Vec<u8>,
}

/// An unsigned Solana transaction, bound to one recent blockhash.
///
/// Held in compiled form: the account-key table is already deduplicated and
/// ordered, so the message bytes are fixed the moment this value exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedTransaction {
    /// All account keys referenced by this transaction, in canonical order:
    ///   1. writable signers (fee payer first)
    ///   2. read-only signers
    ///   3. writable non-signers
    ///   4. read-only non-signers
    pub account_keys: Vec<Address>,

    /// Number of required signatures (first N accounts are signers).
    pub num_required_signatures: u8,
    /// How many of the signing accounts are read-only.
    pub num_readonly_signed: u8,
    /// How many of the non-signing accounts are read-only.
    pub num_readonly_unsigned: u8,

    pub recent_blockhash: [u8; 32],

    /// Compiled instructions (account references replaced with indices).
    pub compiled_instructions: Vec<CompiledInstruction>,
}

/// A compiled instruction where account references are replaced by u8 indices
/// into the transaction's `account_keys` array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledInstruction {
    pub program_id_index: u8,
    pub account_indices: Vec<u8>,
    pub data: Vec<u8>,
}

impl UnsignedTransaction {
    /// The account that pays the fee; always the first signer.
    pub fn fee_payer(&self) -> &Address {
        &self.account_keys[0]
    }

    /// Signer slots in signature order.
    pub fn signers(&self) -> &[Address] {
        &self.account_keys[..self.num_required_signatures as usize]
    }

    /// Position of `address` among the signer slots.
    pub fn signer_index(&self, address: &Address) -> Option<usize> {
        self.signers().iter().position(|k| k == address)
    }

    pub fn instruction_count(&self) -> usize {
        self.compiled_instructions.len()
    }

    /// Resolve the program id of the compiled instruction at `index`.
    pub fn program_of(&self, index: usize) -> Option<&Address> {
        let ix = self.compiled_instructions.get(index)?;
        self.account_keys.get(ix.program_id_index as usize)
    }

    /// Serialize the message: the exact bytes every signer signs.
    pub fn serialize_message(&self) -> Result<Vec<u8>, TxError> {
        serialize_message(self)
    }
}

// ---------------------------------------------------------------------------
// Transaction building
// ---------------------------------------------------------------------------

/// Compile instructions into an unsigned transaction paid for by `fee_payer`.
///
/// The fee payer is always the first signer and is placed at index 0 in the
/// account keys. Other signers follow in the order they first appear across
/// the instructions, writable signers ahead of read-only ones.
pub fn compile_transaction(
    instructions: &[Instruction],
    fee_payer: &Address,
    recent_blockhash: &[u8; 32],
) -> Result<UnsignedTransaction, TxError> {
    if instructions.is_empty() {
        return Err(TxError::EmptyInstructionSet);
    }

    // Instruction account lists are tiny, so a Vec with linear lookup keeps
    // first-appearance order without an extra index structure.
    struct AccountEntry {
        pubkey: Address,
        is_signer: bool,
        is_writable: bool,
    }

    let mut entries: Vec<AccountEntry> = Vec::new();

    let mut upsert = |pubkey: Address, signer: bool, writable: bool| {
        if let Some(entry) = entries.iter_mut().find(|e| e.pubkey == pubkey) {
            entry.is_signer |= signer;
            entry.is_writable |= writable;
        } else {
            entries.push(AccountEntry {
                pubkey,
                is_signer: signer,
                is_writable: writable,
            });
        }
    };

    // Fee payer is always signer + writable.
    upsert(*fee_payer, true, true);

    for ix in instructions {
        for meta in &ix.accounts {
            upsert(meta.pubkey, meta.is_signer, meta.is_writable);
        }
        // Program IDs are non-signer, read-only accounts.
        upsert(ix.program_id, false, false);
    }

    if entries.len() > MAX_ACCOUNT_KEYS {
        return Err(TxError::SerializationError(format!(
            "{} account keys exceed the {MAX_ACCOUNT_KEYS} addressable by u8 indices",
            entries.len()
        )));
    }

    // `sort_by_key` is stable: within a category insertion order survives,
    // and the fee payer (inserted first, writable signer) stays at index 0.
    entries.sort_by_key(|e| match (e.is_signer, e.is_writable) {
        (true, true) => 0u8,
        (true, false) => 1,
        (false, true) => 2,
        (false, false) => 3,
    });

    let count = |pred: fn(&AccountEntry) -> bool, what: &str| -> Result<u8, TxError> {
        let n = entries.iter().filter(|e| pred(e)).count();
        u8::try_from(n)
            .map_err(|_| TxError::SerializationError(format!("{n} {what} exceed a u8 header count")))
    };
    let num_required_signatures = count(|e| e.is_signer, "signers")?;
    let num_readonly_signed = count(|e| e.is_signer && !e.is_writable, "read-only signers")?;
    let num_readonly_unsigned =
        count(|e| !e.is_signer && !e.is_writable, "read-only accounts")?;

    let account_keys: Vec<Address> = entries.iter().map(|e| e.pubkey).collect();

    let index_of = |key: &Address| -> Result<u8, TxError> {
        account_keys
            .iter()
            .position(|k| k == key)
            .map(|i| i as u8)
            .ok_or_else(|| TxError::SerializationError("account not in account keys".into()))
    };

    let mut compiled = Vec::with_capacity(instructions.len());
    for ix in instructions {
        let account_indices = ix
            .accounts
            .iter()
            .map(|meta| index_of(&meta.pubkey))
            .collect::<Result<Vec<u8>, TxError>>()?;

        compiled.push(CompiledInstruction {
            program_id_index: index_of(&ix.program_id)?,
            account_indices,
            data: ix.data.clone(),
        });
    }

    Ok(UnsignedTransaction {
        account_keys,
        num_required_signatures,
        num_readonly_signed,
        num_readonly_unsigned,
        recent_blockhash: *recent_blockhash,
        compiled_instructions: compiled,
    })
}

/// Serialize the transaction message (the bytes that get signed).
pub fn serialize_message(tx: &UnsignedTransaction) -> Result<Vec<u8>, TxError> {
    let mut buf = Vec::with_capacity(256);

    buf.push(tx.num_required_signatures);
    buf.push(tx.num_readonly_signed);
    buf.push(tx.num_readonly_unsigned);

    buf.extend_from_slice(&compact_len(tx.account_keys.len(), "account keys")?);
    for key in &tx.account_keys {
        buf.extend_from_slice(key);
    }

    buf.extend_from_slice(&tx.recent_blockhash);

    buf.extend_from_slice(&compact_len(tx.compiled_instructions.len(), "instructions")?);
    for ix in &tx.compiled_instructions {
        buf.push(ix.program_id_index);

        buf.extend_from_slice(&compact_len(ix.account_indices.len(), "instruction accounts")?);
        buf.extend_from_slice(&ix.account_indices);

        buf.extend_from_slice(&compact_len(ix.data.len(), "instruction data bytes")?);
        buf.extend_from_slice(&ix.data);
    }

    Ok(buf)
}

// ---------------------------------------------------------------------------
// Message decoding
// ---------------------------------------------------------------------------

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize, what: &str) -> Result<&'a [u8], TxError> {
        let end = self.pos.checked_add(len).filter(|end| *end <= self.data.len());
        let end = end.ok_or_else(|| {
            TxError::SerializationError(format!("message truncated while reading {what}"))
        })?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn byte(&mut self, what: &str) -> Result<u8, TxError> {
        Ok(self.take(1, what)?[0])
    }

    fn compact(&mut self) -> Result<usize, TxError> {
        let (value, used) = decode_compact_u16(&self.data[self.pos..])?;
        self.pos += used;
        Ok(value as usize)
    }

    fn array32(&mut self, what: &str) -> Result<[u8; 32], TxError> {
        let mut out = [0u8; 32];
        out.copy_from_slice(self.take(32, what)?);
        Ok(out)
    }
}

/// Parse a serialized legacy message back into an [`UnsignedTransaction`].
///
/// The inverse of [`serialize_message`]; trailing bytes are rejected so that
/// `serialize_message(decode_message(b)) == b` whenever decoding succeeds.
pub fn decode_message(bytes: &[u8]) -> Result<UnsignedTransaction, TxError> {
    let mut r = Reader { data: bytes, pos: 0 };

    let num_required_signatures = r.byte("header")?;
    let num_readonly_signed = r.byte("header")?;
    let num_readonly_unsigned = r.byte("header")?;

    let num_accounts = r.compact()?;
    let mut account_keys = Vec::with_capacity(num_accounts);
    for _ in 0..num_accounts {
        account_keys.push(r.array32("account keys")?);
    }

    if num_required_signatures == 0 || num_required_signatures as usize > account_keys.len() {
        return Err(TxError::SerializationError(format!(
            "{num_required_signatures} required signatures for {} account keys",
            account_keys.len()
        )));
    }

    let recent_blockhash = r.array32("recent blockhash")?;

    let num_instructions = r.compact()?;
    let mut compiled_instructions = Vec::with_capacity(num_instructions);
    for _ in 0..num_instructions {
        let program_id_index = r.byte("program id index")?;
        let n = r.compact()?;
        let account_indices = r.take(n, "account indices")?.to_vec();
        let n = r.compact()?;
        let data = r.take(n, "instruction data")?.to_vec();

        let out_of_range = std::iter::once(&program_id_index)
            .chain(account_indices.iter())
            .any(|i| *i as usize >= account_keys.len());
        if out_of_range {
            return Err(TxError::SerializationError(
                "instruction references an account index out of range".into(),
            ));
        }

        compiled_instructions.push(CompiledInstruction {
            program_id_index,
            account_indices,
            data,
        });
    }

    if r.pos != bytes.len() {
        return Err(TxError::SerializationError(format!(
            "{} trailing bytes after message",
            bytes.len() - r.pos
        )));
    }

    Ok(UnsignedTransaction {
        account_keys,
        num_required_signatures,
        num_readonly_signed,
        num_readonly_unsigned,
        recent_blockhash,
        compiled_instructions,
    })
}
