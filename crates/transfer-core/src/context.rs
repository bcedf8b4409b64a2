//! Handles shared by every transfer: the RPC node, both signers, and the
//! timing settings.

use std::sync::Arc;
use std::time::Duration;

use sol_tx::ProgramIds;

use crate::config::TransferConfig;
use crate::error::TransferError;
use crate::rpc::{JsonRpcClient, RpcNode};
use crate::signer::RemoteSigner;
use crate::types::Commitment;

/// Shown by the signing service alongside each request.
pub const USER_SIGN_REASON: &str = "USDC transfer";
pub const SPONSOR_SIGN_REASON: &str = "Developer gas sponsorship for USDC transfer";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferSettings {
    /// Commitment used for blockhash, account lookups, preflight and
    /// confirmation.
    pub commitment: Commitment,
    pub confirmation_timeout: Duration,
    pub poll_interval: Duration,
    /// Upper bound on each remote signature request.
    pub signer_timeout: Duration,
    pub programs: ProgramIds,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            commitment: Commitment::Confirmed,
            confirmation_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(500),
            signer_timeout: Duration::from_secs(120),
            programs: ProgramIds::default(),
        }
    }
}

/// Everything a transfer talks to. Cheap to clone; clones share handles.
#[derive(Clone)]
pub struct TransferContext {
    pub rpc: Arc<dyn RpcNode>,
    pub user_signer: Arc<dyn RemoteSigner>,
    pub sponsor_signer: Arc<dyn RemoteSigner>,
    pub settings: TransferSettings,
}

impl TransferContext {
    pub fn new(
        rpc: Arc<dyn RpcNode>,
        user_signer: Arc<dyn RemoteSigner>,
        sponsor_signer: Arc<dyn RemoteSigner>,
        settings: TransferSettings,
    ) -> Self {
        Self {
            rpc,
            user_signer,
            sponsor_signer,
            settings,
        }
    }

    /// Wire the JSON-RPC node from `config` to the given signers.
    ///
    /// The user's signer depends on how the embedding application reaches
    /// the token owner, so it is passed in.
    pub fn from_config(
        config: &TransferConfig,
        user_signer: Arc<dyn RemoteSigner>,
        sponsor_signer: Arc<dyn RemoteSigner>,
    ) -> Result<Self, TransferError> {
        let rpc = JsonRpcClient::new(config.rpc_url.clone(), config.rpc_timeout)?;
        Ok(Self::new(
            Arc::new(rpc),
            user_signer,
            sponsor_signer,
            config.settings(),
        ))
    }
}
