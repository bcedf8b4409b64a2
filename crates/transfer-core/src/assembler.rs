//! Turns a [`TransferRequest`] into an unsigned transaction, creating the
//! recipient's token account first when it does not exist yet.

use std::sync::Arc;

use sol_tx::{
    address_to_string, build_create_associated_token_account, build_spl_transfer,
    compile_transaction, derive_account, Address, ProgramIds, UnsignedTransaction,
};
use tracing::{debug, info};

use crate::error::TransferError;
use crate::rpc::{fetch_token_account, RpcNode};
use crate::types::{Commitment, TransferRequest};

/// An unsigned transfer and the accounts it touches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledTransfer {
    pub transaction: UnsignedTransaction,
    pub source_account: Address,
    pub destination_account: Address,
    /// Whether a create-account instruction precedes the transfer.
    pub created_destination: bool,
}

pub struct TransactionAssembler {
    rpc: Arc<dyn RpcNode>,
    programs: ProgramIds,
    commitment: Commitment,
}

impl TransactionAssembler {
    pub fn new(rpc: Arc<dyn RpcNode>, programs: ProgramIds, commitment: Commitment) -> Self {
        Self {
            rpc,
            programs,
            commitment,
        }
    }

    /// Build the transaction for `request` bound to `blockhash`.
    ///
    /// The source token account must exist, hold the request's mint for the
    /// source owner and cover the amount. The fee payer pays both the fee and, when needed, the rent for the
    /// recipient's new token account.
    pub async fn build(
        &self,
        request: &TransferRequest,
        blockhash: &[u8; 32],
    ) -> Result<AssembledTransfer, TransferError> {
        let p = &self.programs;
        let source_account = derive_account(
            &request.source_owner,
            &request.mint,
            &p.token_program,
            &p.associated_token_program,
        )?;
        let destination_account = derive_account(
            &request.dest_owner,
            &request.mint,
            &p.token_program,
            &p.associated_token_program,
        )?;

        let source = fetch_token_account(self.rpc.as_ref(), &source_account, self.commitment)
            .await?
            .ok_or(TransferError::InsufficientBalance {
                available: 0,
                required: request.amount(),
            })?;
        source.ensure_holds(&request.mint, &request.source_owner)?;
        if source.amount < request.amount() {
            return Err(TransferError::InsufficientBalance {
                available: source.amount,
                required: request.amount(),
            });
        }

        let destination =
            fetch_token_account(self.rpc.as_ref(), &destination_account, self.commitment).await?;
        if let Some(existing) = &destination {
            existing.ensure_holds(&request.mint, &request.dest_owner)?;
        }
        let destination_exists = destination.is_some();
        debug!(
            source = %address_to_string(&source_account),
            balance = source.amount,
            destination = %address_to_string(&destination_account),
            destination_exists,
            "resolved token accounts"
        );

        let mut instructions = Vec::with_capacity(2);
        if !destination_exists {
            info!(
                destination = %address_to_string(&destination_account),
                payer = %address_to_string(&request.fee_payer),
                "destination token account missing, adding create instruction"
            );
            instructions.push(build_create_associated_token_account(
                &request.fee_payer,
                &destination_account,
                &request.dest_owner,
                &request.mint,
                &p.token_program,
                &p.system_program,
                &p.rent_sysvar,
                &p.associated_token_program,
            ));
        }
        instructions.push(build_spl_transfer(
            &source_account,
            &destination_account,
            &request.source_owner,
            request.amount(),
            &p.token_program,
        )?);

        let transaction = compile_transaction(&instructions, &request.fee_payer, blockhash)?;

        Ok(AssembledTransfer {
            transaction,
            source_account,
            destination_account,
            created_destination: !destination_exists,
        })
    }
}
