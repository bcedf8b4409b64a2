//! Sponsored SPL token transfers.
//!
//! A token owner authorises a transfer while a separate sponsor account pays
//! the network fee (and the rent for the recipient's token account when it
//! has to be created). Neither key is held here: both parties sign remotely
//! and this crate assembles, combines, submits and confirms.

pub mod assembler;
pub mod config;
pub mod context;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod rpc;
pub mod signer;
pub mod submission;
pub mod types;

use std::sync::Arc;

pub use assembler::{AssembledTransfer, TransactionAssembler};
pub use config::TransferConfig;
pub use context::{TransferContext, TransferSettings};
pub use error::TransferError;
pub use orchestrator::{
    StateMachine, TransferOrchestrator, TransferOutcome, TransferReport, TransferState,
};
pub use rpc::{AccountInfo, JsonRpcClient, LatestBlockhash, RpcNode, SignatureStatus};
pub use signer::{HttpRemoteSigner, RemoteSigner, SignResult};
pub use submission::SubmissionClient;
pub use types::{Commitment, SignerRole, TransferRequest};

use sol_tx::Address;

/// Default number of attempts when the blockhash keeps expiring.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

// ─── Entry point ─────────────────────────────────────────────────────

/// Move the configured amount from `source_owner` to `dest_owner`.
///
/// The sponsor signs through the configured HTTP signer and, unless
/// `SPONSOR_ADDRESS` names it, is that signer's developer wallet.
/// `user_signer` reaches the token owner.
pub async fn send_sponsored_transfer(
    config: &TransferConfig,
    source_owner: Address,
    dest_owner: Address,
    user_signer: Arc<dyn RemoteSigner>,
) -> Result<TransferReport, TransferError> {
    let sponsor_signer = Arc::new(config.sponsor_signer()?);
    let fee_payer = config.resolve_sponsor(&sponsor_signer).await?;
    let request = config.request(source_owner, dest_owner, fee_payer)?;

    let ctx = TransferContext::from_config(config, user_signer, sponsor_signer)?;
    let orchestrator = TransferOrchestrator::new(ctx);
    Ok(orchestrator
        .run_with_blockhash_retry(&request, DEFAULT_MAX_ATTEMPTS)
        .await)
}
