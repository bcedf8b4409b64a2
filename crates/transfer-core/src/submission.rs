//! Broadcast and confirmation.

use std::sync::Arc;
use std::time::Duration;

use sol_tx::SignedTransaction;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::error::TransferError;
use crate::rpc::{classify_execution_error, RpcNode};
use crate::types::Commitment;

pub struct SubmissionClient {
    rpc: Arc<dyn RpcNode>,
    preflight_commitment: Commitment,
    poll_interval: Duration,
}

impl SubmissionClient {
    pub fn new(
        rpc: Arc<dyn RpcNode>,
        preflight_commitment: Commitment,
        poll_interval: Duration,
    ) -> Self {
        Self {
            rpc,
            preflight_commitment,
            poll_interval,
        }
    }

    /// Fail with `BlockhashExpired` once the chain has moved past the
    /// blockhash's last valid height.
    pub async fn check_blockhash_valid(
        &self,
        last_valid_block_height: u64,
    ) -> Result<(), TransferError> {
        let height = self.rpc.get_block_height(self.preflight_commitment).await?;
        if height > last_valid_block_height {
            return Err(TransferError::BlockhashExpired(format!(
                "block height {height} exceeds last valid height {last_valid_block_height}"
            )));
        }
        Ok(())
    }

    /// Broadcast with preflight simulation and return the transaction id.
    pub async fn submit(&self, signed: &SignedTransaction) -> Result<String, TransferError> {
        let wire = signed.to_wire()?;
        debug!(wire_len = wire.len(), "broadcasting transaction");

        let id = match self
            .rpc
            .send_transaction(&wire, self.preflight_commitment)
            .await
        {
            Ok(id) => id,
            // Our own earlier broadcast landed; its id is the fee-payer signature.
            Err(TransferError::AlreadyProcessed(detail)) => {
                let id = signed.transaction_id().ok_or_else(|| {
                    TransferError::InvalidResponse(format!(
                        "already processed but fee payer slot is empty: {detail}"
                    ))
                })?;
                info!(transaction_id = %id, %detail, "transaction already processed by node");
                return Ok(id);
            }
            Err(e) => return Err(e),
        };

        if let Some(expected) = signed.transaction_id() {
            if expected != id {
                warn!(%expected, returned = %id, "node returned unexpected transaction id");
            }
        }
        info!(transaction_id = %id, "transaction submitted");
        Ok(id)
    }

    /// Poll until `id` reaches `commitment`, the chain reports an execution
    /// error, or `timeout` elapses. Never re-broadcasts.
    pub async fn await_confirmation(
        &self,
        id: &str,
        commitment: Commitment,
        timeout: Duration,
    ) -> Result<(), TransferError> {
        let deadline = Instant::now() + timeout;

        loop {
            match self.rpc.get_signature_status(id).await {
                Ok(Some(status)) => {
                    if let Some(err) = &status.err {
                        warn!(transaction_id = %id, %err, "transaction failed on chain");
                        return Err(classify_execution_error(err));
                    }
                    if status
                        .confirmation_status
                        .is_some_and(|reached| reached.satisfies(commitment))
                    {
                        info!(transaction_id = %id, slot = status.slot, %commitment, "transaction confirmed");
                        return Ok(());
                    }
                    debug!(transaction_id = %id, status = ?status.confirmation_status, "not yet confirmed");
                }
                Ok(None) => debug!(transaction_id = %id, "transaction not yet visible"),
                // A flaky node must not abort a transaction that may already
                // have landed; keep polling until the deadline.
                Err(e) if e.is_transient() => {
                    warn!(transaction_id = %id, error = %e, "status poll failed");
                }
                Err(e) => return Err(e),
            }

            if Instant::now() + self.poll_interval > deadline {
                return Err(TransferError::ConfirmationTimeout(timeout));
            }
            sleep(self.poll_interval).await;
        }
    }
}
