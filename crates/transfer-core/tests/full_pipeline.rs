//! Cross-crate integration tests exercising the full pipeline:
//! request -> derive accounts -> assemble -> remote signatures -> combine ->
//! submit -> confirm.
//!
//! The RPC node is an in-memory chain that decodes the wire bytes it is
//! given, verifies every signature and applies the token instructions, so
//! balances after a transfer prove the bytes were right.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ed25519_dalek::{Signer, SigningKey};
use sol_tx::codec::decode_hex;
use sol_tx::{
    derive_associated_token_address, parse_address, ui_amount_to_base_units, Address,
    SignedTransaction, TokenAccountState, ASSOCIATED_TOKEN_PROGRAM_ID, TOKEN_PROGRAM_ID,
};
use transfer_core::*;

const USDC_DEVNET: &str = "4zMMC9srt5Ri5X14GAgXhaHii3GnPAEERYPJgZJDncDU";
const BLOCKHASH_VALIDITY: u64 = 150;

// ─── Simulated chain ───────────────────────────────────────────────

#[derive(Default)]
struct ChainState {
    token_accounts: HashMap<Address, TokenAccountState>,
    block_height: u64,
    issued_blockhashes: HashMap<[u8; 32], u64>,
    landed: Vec<String>,
    /// Every wire transaction received, accepted or not.
    received: Vec<Vec<u8>>,
    /// Upcoming sends rejected as if their blockhash had aged out.
    expire_next: usize,
    /// When false, landed transactions never report a confirmation.
    confirms: bool,
}

struct SimulatedChain {
    state: Mutex<ChainState>,
}

impl SimulatedChain {
    fn new() -> Self {
        Self {
            state: Mutex::new(ChainState {
                block_height: 1_000,
                confirms: true,
                ..ChainState::default()
            }),
        }
    }

    fn fund(&self, owner: &Address, mint: &Address, amount: u64) {
        let account = derive_associated_token_address(owner, mint).unwrap();
        self.state.lock().unwrap().token_accounts.insert(
            account,
            TokenAccountState {
                mint: *mint,
                owner: *owner,
                amount,
            },
        );
    }

    fn balance(&self, owner: &Address, mint: &Address) -> Option<u64> {
        let account = derive_associated_token_address(owner, mint).unwrap();
        self.state
            .lock()
            .unwrap()
            .token_accounts
            .get(&account)
            .map(|a| a.amount)
    }

    fn received(&self) -> Vec<SignedTransaction> {
        self.state
            .lock()
            .unwrap()
            .received
            .iter()
            .map(|wire| SignedTransaction::from_wire(wire).unwrap())
            .collect()
    }

    fn landed_count(&self) -> usize {
        self.state.lock().unwrap().landed.len()
    }

    /// Execute `signed` against a copy of the accounts and commit only if
    /// every instruction succeeds.
    fn execute(state: &mut ChainState, signed: &SignedTransaction) -> Result<(), String> {
        let tx = signed.transaction();
        let mut accounts = state.token_accounts.clone();

        for ix in &tx.compiled_instructions {
            let key = |i: usize| tx.account_keys[ix.account_indices[i] as usize];
            let program = tx.account_keys[ix.program_id_index as usize];

            if program == ASSOCIATED_TOKEN_PROGRAM_ID {
                let (payer, account, owner, mint) = (key(0), key(1), key(2), key(3));
                if tx.signer_index(&payer).is_none() {
                    return Err("create: payer did not sign".into());
                }
                if derive_associated_token_address(&owner, &mint).unwrap() != account {
                    return Err("create: address mismatch".into());
                }
                if accounts.contains_key(&account) {
                    return Err("create: account already in use".into());
                }
                accounts.insert(account, TokenAccountState { mint, owner, amount: 0 });
            } else if program == TOKEN_PROGRAM_ID {
                if ix.data.len() != 9 || ix.data[0] != 3 {
                    return Err("token: unsupported instruction".into());
                }
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&ix.data[1..9]);
                let amount = u64::from_le_bytes(raw);
                let (source, destination, owner) = (key(0), key(1), key(2));

                if tx.signer_index(&owner).is_none() {
                    return Err("token: owner did not sign".into());
                }
                let from = accounts.get(&source).copied().ok_or("token: missing source")?;
                let to = accounts
                    .get(&destination)
                    .copied()
                    .ok_or("token: invalid account data for instruction")?;
                if from.owner != owner {
                    return Err("token: owner does not match".into());
                }
                if from.mint != to.mint {
                    return Err("token: mint mismatch".into());
                }
                if from.amount < amount {
                    return Err("token: insufficient funds".into());
                }
                accounts.insert(source, TokenAccountState { amount: from.amount - amount, ..from });
                accounts.insert(destination, TokenAccountState { amount: to.amount + amount, ..to });
            } else {
                return Err("unknown program".into());
            }
        }

        state.token_accounts = accounts;
        Ok(())
    }
}

#[async_trait]
impl RpcNode for SimulatedChain {
    async fn get_latest_blockhash(
        &self,
        _commitment: Commitment,
    ) -> Result<LatestBlockhash, TransferError> {
        let mut state = self.state.lock().unwrap();
        state.block_height += 1;
        let mut blockhash = [0u8; 32];
        blockhash[..8].copy_from_slice(&state.block_height.to_le_bytes());
        let last_valid_block_height = state.block_height + BLOCKHASH_VALIDITY;
        state
            .issued_blockhashes
            .insert(blockhash, last_valid_block_height);
        Ok(LatestBlockhash {
            blockhash,
            last_valid_block_height,
        })
    }

    async fn get_block_height(&self, _commitment: Commitment) -> Result<u64, TransferError> {
        Ok(self.state.lock().unwrap().block_height)
    }

    async fn get_account_info(
        &self,
        address: &Address,
        _commitment: Commitment,
    ) -> Result<Option<AccountInfo>, TransferError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .token_accounts
            .get(address)
            .map(|account| AccountInfo {
                lamports: 2_039_280,
                owner: TOKEN_PROGRAM_ID,
                data: account.to_account_data(),
            }))
    }

    async fn send_transaction(
        &self,
        wire: &[u8],
        _preflight_commitment: Commitment,
    ) -> Result<String, TransferError> {
        let mut state = self.state.lock().unwrap();
        state.received.push(wire.to_vec());

        let signed = SignedTransaction::from_wire(wire).map_err(|e| {
            TransferError::PreflightRejected {
                reason: e.to_string(),
            }
        })?;
        if !signed.is_fully_signed() {
            return Err(TransferError::PreflightRejected {
                reason: "missing signatures".into(),
            });
        }

        let blockhash = signed.transaction().recent_blockhash;
        let valid = state
            .issued_blockhashes
            .get(&blockhash)
            .is_some_and(|last| *last >= state.block_height);
        if state.expire_next > 0 || !valid {
            state.expire_next = state.expire_next.saturating_sub(1);
            state.block_height += BLOCKHASH_VALIDITY + 1;
            return Err(TransferError::BlockhashExpired(
                "Transaction simulation failed: Blockhash not found".into(),
            ));
        }

        Self::execute(&mut state, &signed)
            .map_err(|reason| TransferError::PreflightRejected { reason })?;

        let id = signed
            .transaction_id()
            .ok_or_else(|| TransferError::InvalidResponse("no fee payer signature".into()))?;
        state.landed.push(id.clone());
        Ok(id)
    }

    async fn get_signature_status(
        &self,
        signature: &str,
    ) -> Result<Option<SignatureStatus>, TransferError> {
        let state = self.state.lock().unwrap();
        if !state.confirms || !state.landed.iter().any(|id| id == signature) {
            return Ok(None);
        }
        Ok(Some(SignatureStatus {
            slot: state.block_height,
            confirmation_status: Some(Commitment::Confirmed),
            err: None,
        }))
    }
}

// ─── Remote signers ────────────────────────────────────────────────

struct KeySigner {
    key: SigningKey,
    requests: Mutex<Vec<String>>,
}

impl KeySigner {
    fn new(seed: u8) -> Self {
        Self {
            key: SigningKey::from_bytes(&[seed; 32]),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn address(&self) -> Address {
        self.key.verifying_key().to_bytes()
    }

    fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl RemoteSigner for KeySigner {
    async fn sign(&self, message_hex: &str, _reason: &str) -> SignResult {
        self.requests.lock().unwrap().push(message_hex.to_string());
        match decode_hex(message_hex) {
            Ok(message) => SignResult::Success {
                signature: self.key.sign(&message).to_bytes(),
            },
            Err(e) => SignResult::Error {
                message: e.to_string(),
            },
        }
    }
}

struct Declining;

#[async_trait]
impl RemoteSigner for Declining {
    async fn sign(&self, _message_hex: &str, _reason: &str) -> SignResult {
        SignResult::Cancelled
    }
}

// ─── Fixture ───────────────────────────────────────────────────────

struct Fixture {
    chain: Arc<SimulatedChain>,
    user: Arc<KeySigner>,
    sponsor: Arc<KeySigner>,
    recipient: Address,
    mint: Address,
}

impl Fixture {
    fn new() -> Self {
        transfer_core::logging::init_test_tracing();
        Self {
            chain: Arc::new(SimulatedChain::new()),
            user: Arc::new(KeySigner::new(0x21)),
            sponsor: Arc::new(KeySigner::new(0x37)),
            recipient: [0x11; 32],
            mint: parse_address(USDC_DEVNET).unwrap(),
        }
    }

    fn settings() -> TransferSettings {
        TransferSettings {
            confirmation_timeout: Duration::from_millis(300),
            poll_interval: Duration::from_millis(10),
            signer_timeout: Duration::from_secs(5),
            ..TransferSettings::default()
        }
    }

    fn orchestrator_with_user(&self, user: Arc<dyn RemoteSigner>) -> TransferOrchestrator {
        TransferOrchestrator::new(TransferContext::new(
            self.chain.clone(),
            user,
            self.sponsor.clone(),
            Self::settings(),
        ))
    }

    fn orchestrator(&self) -> TransferOrchestrator {
        self.orchestrator_with_user(self.user.clone())
    }

    fn request(&self, ui_amount: &str) -> TransferRequest {
        TransferRequest::new(
            self.user.address(),
            self.recipient,
            self.mint,
            self.sponsor.address(),
            ui_amount_to_base_units(ui_amount, 6).unwrap(),
        )
        .unwrap()
    }
}

// ─── Transfers ─────────────────────────────────────────────────────

#[tokio::test]
async fn transfer_creates_missing_destination() {
    let f = Fixture::new();
    f.chain.fund(&f.user.address(), &f.mint, 1_000_000);

    let report = f.orchestrator().run(&f.request("0.01")).await;

    match &report.outcome {
        TransferOutcome::Confirmed {
            created_destination,
            ..
        } => assert!(created_destination),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(f.chain.balance(&f.user.address(), &f.mint), Some(990_000));
    assert_eq!(f.chain.balance(&f.recipient, &f.mint), Some(10_000));

    let sent = f.chain.received();
    assert_eq!(sent.len(), 1);
    let tx = sent[0].transaction();
    assert_eq!(tx.instruction_count(), 2);
    assert_eq!(tx.program_of(0), Some(&ASSOCIATED_TOKEN_PROGRAM_ID));
    assert_eq!(tx.program_of(1), Some(&TOKEN_PROGRAM_ID));
    assert_eq!(tx.fee_payer(), &f.sponsor.address());
    assert_eq!(tx.signers(), &[f.sponsor.address(), f.user.address()]);
}

#[tokio::test]
async fn transfer_to_existing_destination() {
    let f = Fixture::new();
    f.chain.fund(&f.user.address(), &f.mint, 1_000_000);
    f.chain.fund(&f.recipient, &f.mint, 0);

    let report = f.orchestrator().run(&f.request("0.01")).await;

    match &report.outcome {
        TransferOutcome::Confirmed {
            transaction_id,
            created_destination,
        } => {
            assert!(!created_destination);
            assert_eq!(
                Some(transaction_id.clone()),
                f.chain.received()[0].transaction_id()
            );
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(f.chain.received()[0].transaction().instruction_count(), 1);
    assert_eq!(f.chain.balance(&f.user.address(), &f.mint), Some(990_000));
    assert_eq!(f.chain.balance(&f.recipient, &f.mint), Some(10_000));
}

#[tokio::test]
async fn both_signers_see_identical_message() {
    let f = Fixture::new();
    f.chain.fund(&f.user.address(), &f.mint, 1_000_000);

    f.orchestrator().run(&f.request("0.01")).await;

    let user_requests = f.user.requests.lock().unwrap().clone();
    let sponsor_requests = f.sponsor.requests.lock().unwrap().clone();
    assert_eq!(user_requests.len(), 1);
    assert_eq!(user_requests, sponsor_requests);
    assert!(user_requests[0].starts_with("0x"));
}

// ─── Failures ──────────────────────────────────────────────────────

#[tokio::test]
async fn user_cancellation_broadcasts_nothing() {
    let f = Fixture::new();
    f.chain.fund(&f.user.address(), &f.mint, 1_000_000);

    let report = f
        .orchestrator_with_user(Arc::new(Declining))
        .run_with_blockhash_retry(&f.request("0.01"), 3)
        .await;

    assert!(matches!(
        report.outcome,
        TransferOutcome::Cancelled {
            role: SignerRole::User
        }
    ));
    assert_eq!(report.attempts, 1);
    assert!(f.chain.received().is_empty());
    assert_eq!(f.chain.balance(&f.user.address(), &f.mint), Some(1_000_000));
    assert_eq!(f.chain.balance(&f.recipient, &f.mint), None);
}

#[tokio::test]
async fn insufficient_balance_is_rejected_before_signing() {
    let f = Fixture::new();
    f.chain.fund(&f.user.address(), &f.mint, 5_000);

    let report = f.orchestrator().run(&f.request("0.01")).await;

    assert!(matches!(
        report.outcome,
        TransferOutcome::Failed {
            error: TransferError::InsufficientBalance {
                available: 5_000,
                required: 10_000
            }
        }
    ));
    assert_eq!(report.history, vec![TransferState::Building, TransferState::Failed]);
    assert_eq!(f.user.request_count(), 0);
    assert_eq!(f.sponsor.request_count(), 0);
    assert!(f.chain.received().is_empty());
    assert_eq!(f.chain.balance(&f.user.address(), &f.mint), Some(5_000));
}

#[tokio::test]
async fn expired_blockhash_rebuilds_and_re_signs() {
    let f = Fixture::new();
    f.chain.fund(&f.user.address(), &f.mint, 1_000_000);
    f.chain.state.lock().unwrap().expire_next = 1;

    let report = f
        .orchestrator()
        .run_with_blockhash_retry(&f.request("0.01"), 3)
        .await;

    assert!(report.outcome.is_confirmed());
    assert_eq!(report.attempts, 2);
    assert_eq!(f.user.request_count(), 2);
    assert_eq!(f.sponsor.request_count(), 2);

    let sent = f.chain.received();
    assert_eq!(sent.len(), 2);
    assert_ne!(
        sent[0].transaction().recent_blockhash,
        sent[1].transaction().recent_blockhash
    );
    assert_ne!(sent[0].transaction_id(), sent[1].transaction_id());

    // Only the second attempt moved funds.
    assert_eq!(f.chain.landed_count(), 1);
    assert_eq!(f.chain.balance(&f.user.address(), &f.mint), Some(990_000));
    assert_eq!(f.chain.balance(&f.recipient, &f.mint), Some(10_000));
}

#[tokio::test]
async fn confirmation_timeout_is_not_resubmitted() {
    let f = Fixture::new();
    f.chain.fund(&f.user.address(), &f.mint, 1_000_000);
    f.chain.state.lock().unwrap().confirms = false;

    let report = f
        .orchestrator()
        .run_with_blockhash_retry(&f.request("0.01"), 3)
        .await;

    assert!(matches!(
        report.outcome,
        TransferOutcome::Failed {
            error: TransferError::ConfirmationTimeout(_)
        }
    ));
    assert_eq!(report.attempts, 1);
    assert_eq!(f.chain.received().len(), 1);
    assert_eq!(
        report.history,
        vec![
            TransferState::Building,
            TransferState::AwaitingUserSignature,
            TransferState::AwaitingSponsorSignature,
            TransferState::ReadyToSubmit,
            TransferState::Submitted,
            TransferState::Failed,
        ]
    );
}

#[tokio::test]
async fn self_sponsored_transfer_needs_one_signature() {
    let f = Fixture::new();
    f.chain.fund(&f.user.address(), &f.mint, 1_000_000);
    let request = TransferRequest::new(
        f.user.address(),
        f.recipient,
        f.mint,
        f.user.address(),
        10_000,
    )
    .unwrap();

    let report = f.orchestrator().run(&request).await;

    assert!(report.outcome.is_confirmed());
    assert_eq!(f.sponsor.request_count(), 0);
    assert_eq!(f.chain.received()[0].transaction().signers(), &[f.user.address()]);
}
