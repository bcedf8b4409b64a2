//! Combining independently produced signatures into one signed transaction.
//!
//! A sponsored transfer has two signers that never share keys: the token
//! owner and the fee payer. Each signs the same serialized message somewhere
//! else and hands back 64 bytes. This module checks every returned signature
//! against the message before it is placed into the signer's slot, so a
//! transaction can only become fully signed from signatures that verify.

use ed25519_dalek::{Signature, VerifyingKey};

use crate::address::{address_to_string, Address};
use crate::codec::decode_hex_array;
use crate::error::TxError;
use crate::transaction::{decode_compact_u16, decode_message, encode_compact_u16, UnsignedTransaction};

/// A signature returned by one signer, not yet checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignatureEntry {
    pub signer: Address,
    pub signature: [u8; 64],
}

impl SignatureEntry {
    pub fn new(signer: Address, signature: [u8; 64]) -> Self {
        Self { signer, signature }
    }

    /// Build an entry from a hex signature (`0x` prefix optional).
    pub fn from_hex(signer: Address, signature_hex: &str) -> Result<Self, TxError> {
        Ok(Self {
            signer,
            signature: decode_hex_array::<64>(signature_hex)?,
        })
    }

    /// Check this signature over `message` with `signer` as the key.
    pub fn verify(&self, message: &[u8]) -> Result<(), TxError> {
        let failed = || TxError::SignatureVerificationFailed {
            address: address_to_string(&self.signer),
        };

        let key = VerifyingKey::from_bytes(&self.signer).map_err(|_| failed())?;
        let signature = Signature::from_bytes(&self.signature);
        key.verify_strict(message, &signature).map_err(|_| failed())
    }
}

/// A transaction together with one signature slot per required signer.
///
/// Slots may be empty: a partially signed transaction is a valid state that
/// waits for the remaining signers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    transaction: UnsignedTransaction,
    message: Vec<u8>,
    slots: Vec<Option<[u8; 64]>>,
}

impl SignedTransaction {
    /// Start from an unsigned transaction with every slot empty.
    pub fn new(transaction: UnsignedTransaction) -> Result<Self, TxError> {
        let message = transaction.serialize_message()?;
        let slots = vec![None; transaction.signers().len()];
        Ok(Self {
            transaction,
            message,
            slots,
        })
    }

    pub fn transaction(&self) -> &UnsignedTransaction {
        &self.transaction
    }

    /// The serialized message every signature covers.
    pub fn message(&self) -> &[u8] {
        &self.message
    }

    pub fn is_fully_signed(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    /// Signers whose slot is still empty, in slot order.
    pub fn missing_signers(&self) -> Vec<Address> {
        self.transaction
            .signers()
            .iter()
            .zip(&self.slots)
            .filter(|(_, slot)| slot.is_none())
            .map(|(signer, _)| *signer)
            .collect()
    }

    /// Verify and place `signatures`, returning the updated state.
    ///
    /// Every entry is checked before any slot is written, so on error `self`
    /// is dropped unchanged from the caller's point of view. Placing an
    /// entry into an already-filled slot overwrites it, which makes repeated
    /// combination with the same entries a no-op.
    pub fn combine(mut self, signatures: &[SignatureEntry]) -> Result<Self, TxError> {
        let mut placements = Vec::with_capacity(signatures.len());
        for entry in signatures {
            entry.verify(&self.message)?;
            let index = self.transaction.signer_index(&entry.signer).ok_or_else(|| {
                TxError::UnknownSigner {
                    address: address_to_string(&entry.signer),
                }
            })?;
            placements.push((index, entry.signature));
        }

        for (index, signature) in placements {
            self.slots[index] = Some(signature);
        }
        Ok(self)
    }

    /// Serialize to the wire format accepted by `sendTransaction`.
    pub fn to_wire(&self) -> Result<Vec<u8>, TxError> {
        if !self.is_fully_signed() {
            return Err(TxError::IncompleteSignatures {
                missing: self.missing_signers().iter().map(address_to_string).collect(),
            });
        }

        let mut wire = Vec::with_capacity(3 + 64 * self.slots.len() + self.message.len());
        wire.extend_from_slice(&encode_compact_u16(self.slots.len() as u16));
        for signature in self.slots.iter().flatten() {
            wire.extend_from_slice(signature);
        }
        wire.extend_from_slice(&self.message);
        Ok(wire)
    }

    /// Parse wire bytes, verifying every non-zero signature.
    ///
    /// All-zero signatures are treated as empty slots, which is how partially
    /// signed transactions are conventionally exchanged.
    pub fn from_wire(raw: &[u8]) -> Result<Self, TxError> {
        let (num_sigs, prefix_len) = decode_compact_u16(raw)?;
        let sigs_end = prefix_len + num_sigs as usize * 64;
        if sigs_end > raw.len() {
            return Err(TxError::SerializationError(
                "transaction too short: signature slots exceed length".into(),
            ));
        }

        let transaction = decode_message(&raw[sigs_end..])?;
        if transaction.signers().len() != num_sigs as usize {
            return Err(TxError::SerializationError(format!(
                "{num_sigs} signatures for {} required signers",
                transaction.signers().len()
            )));
        }

        let entries: Vec<SignatureEntry> = raw[prefix_len..sigs_end]
            .chunks_exact(64)
            .zip(transaction.signers())
            .filter(|(sig, _)| sig.iter().any(|b| *b != 0))
            .map(|(sig, signer)| {
                let mut signature = [0u8; 64];
                signature.copy_from_slice(sig);
                SignatureEntry::new(*signer, signature)
            })
            .collect();

        Self::new(transaction)?.combine(&entries)
    }

    /// The transaction id: the fee payer's signature, Base58 encoded.
    pub fn transaction_id(&self) -> Option<String> {
        self.slots
            .first()
            .copied()
            .flatten()
            .map(|sig| bs58::encode(sig).into_string())
    }
}

/// Verify and place `signatures` into a fresh signed transaction.
///
/// The result may still be partially signed; check
/// [`SignedTransaction::is_fully_signed`] and supply the rest through
/// [`SignedTransaction::combine`].
pub fn combine(
    transaction: UnsignedTransaction,
    signatures: &[SignatureEntry],
) -> Result<SignedTransaction, TxError> {
    SignedTransaction::new(transaction)?.combine(signatures)
}
