//! Drives one sponsored transfer from assembly to confirmation.
//!
//! ```text
//! Building -> AwaitingUserSignature -> AwaitingSponsorSignature -> ReadyToSubmit
//!          -> Submitted -> Confirmed
//! ```
//!
//! Any non-terminal state may move to `Failed`. A failed attempt is never
//! resumed: its blockhash and signatures are dropped, and a retry starts
//! again from `Building`.

use std::fmt;

use sol_tx::codec::encode_hex_prefixed;
use sol_tx::{address_to_string, SignatureEntry, SignedTransaction};
use tracing::{debug, info, warn};

use crate::assembler::TransactionAssembler;
use crate::context::{TransferContext, SPONSOR_SIGN_REASON, USER_SIGN_REASON};
use crate::error::TransferError;
use crate::signer::{RemoteSigner, SignResult};
use crate::submission::SubmissionClient;
use crate::types::{SignerRole, TransferRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferState {
    Building,
    AwaitingUserSignature,
    AwaitingSponsorSignature,
    ReadyToSubmit,
    Submitted,
    Confirmed,
    Failed,
}

impl TransferState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TransferState::Confirmed | TransferState::Failed)
    }

    pub fn can_transition_to(self, next: TransferState) -> bool {
        use TransferState::*;
        match (self, next) {
            (from, Failed) => !from.is_terminal(),
            (Building, AwaitingUserSignature | AwaitingSponsorSignature) => true,
            (AwaitingUserSignature, AwaitingSponsorSignature | ReadyToSubmit) => true,
            (AwaitingSponsorSignature, AwaitingUserSignature | ReadyToSubmit) => true,
            (ReadyToSubmit, Submitted) => true,
            (Submitted, Confirmed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Records every state an attempt passes through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateMachine {
    state: TransferState,
    history: Vec<TransferState>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            state: TransferState::Building,
            history: vec![TransferState::Building],
        }
    }

    pub fn state(&self) -> TransferState {
        self.state
    }

    pub fn history(&self) -> &[TransferState] {
        &self.history
    }

    pub fn advance(&mut self, next: TransferState) -> Result<(), TransferError> {
        if !self.state.can_transition_to(next) {
            return Err(TransferError::InvalidStateTransition {
                from: self.state,
                to: next,
            });
        }
        debug!(from = %self.state, to = %next, "transfer state change");
        self.state = next;
        self.history.push(next);
        Ok(())
    }

    /// Move to `Failed` unless already terminal.
    pub fn fail(&mut self) {
        if !self.state.is_terminal() {
            warn!(from = %self.state, "transfer failed");
            self.state = TransferState::Failed;
            self.history.push(TransferState::Failed);
        }
    }
}

#[derive(Debug)]
pub enum TransferOutcome {
    Confirmed {
        transaction_id: String,
        created_destination: bool,
    },
    /// A signer declined; nothing was broadcast.
    Cancelled { role: SignerRole },
    Failed { error: TransferError },
}

impl TransferOutcome {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, TransferOutcome::Confirmed { .. })
    }

    fn is_blockhash_expired(&self) -> bool {
        matches!(self, TransferOutcome::Failed { error } if error.is_blockhash_expired())
    }
}

#[derive(Debug)]
pub struct TransferReport {
    pub outcome: TransferOutcome,
    /// States visited, across all attempts; each attempt starts at `Building`.
    pub history: Vec<TransferState>,
    pub attempts: u32,
}

pub struct TransferOrchestrator {
    ctx: TransferContext,
    assembler: TransactionAssembler,
    submission: SubmissionClient,
}

impl TransferOrchestrator {
    pub fn new(ctx: TransferContext) -> Self {
        let settings = ctx.settings;
        let assembler =
            TransactionAssembler::new(ctx.rpc.clone(), settings.programs, settings.commitment);
        let submission =
            SubmissionClient::new(ctx.rpc.clone(), settings.commitment, settings.poll_interval);
        Self {
            ctx,
            assembler,
            submission,
        }
    }

    /// Run a single attempt.
    pub async fn run(&self, request: &TransferRequest) -> TransferReport {
        let mut machine = StateMachine::new();
        let outcome = match self.attempt(request, &mut machine).await {
            Ok(outcome) => outcome,
            Err(error) => {
                warn!(%error, "transfer attempt failed");
                machine.fail();
                TransferOutcome::Failed { error }
            }
        };
        TransferReport {
            outcome,
            history: machine.history,
            attempts: 1,
        }
    }

    /// Run up to `max_attempts` attempts, starting over with a fresh
    /// blockhash only when the previous attempt's blockhash expired.
    pub async fn run_with_blockhash_retry(
        &self,
        request: &TransferRequest,
        max_attempts: u32,
    ) -> TransferReport {
        let max_attempts = max_attempts.max(1);
        let mut history = Vec::new();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let report = self.run(request).await;
            history.extend(report.history);

            if report.outcome.is_blockhash_expired() && attempt < max_attempts {
                info!(attempt, max_attempts, "blockhash expired, rebuilding transfer");
                continue;
            }

            return TransferReport {
                outcome: report.outcome,
                history,
                attempts: attempt,
            };
        }
    }

    async fn attempt(
        &self,
        request: &TransferRequest,
        machine: &mut StateMachine,
    ) -> Result<TransferOutcome, TransferError> {
        let settings = &self.ctx.settings;

        let latest = self.ctx.rpc.get_latest_blockhash(settings.commitment).await?;
        let assembled = self.assembler.build(request, &latest.blockhash).await?;
        info!(
            source = %address_to_string(&assembled.source_account),
            destination = %address_to_string(&assembled.destination_account),
            amount = request.amount(),
            instructions = assembled.transaction.instruction_count(),
            last_valid_block_height = latest.last_valid_block_height,
            "transfer assembled"
        );

        let mut signed = SignedTransaction::new(assembled.transaction)?;
        let message_hex = encode_hex_prefixed(signed.message());
        machine.advance(TransferState::AwaitingUserSignature)?;

        // Both signers are asked at once. The first decline ends the attempt
        // and drops the other request.
        let user = self.collect_signature(SignerRole::User, &message_hex);
        let signatures = if request.fee_payer == request.source_owner {
            user.await.map(|signature| (signature, None))
        } else {
            let sponsor = self.collect_signature(SignerRole::Sponsor, &message_hex);
            tokio::try_join!(user, async { sponsor.await.map(Some) })
        };
        let (user_signature, sponsor_signature) = match signatures {
            Ok(pair) => pair,
            Err(Decline::Cancelled(role)) => return Ok(self.cancelled(role, machine)),
            Err(Decline::Failed(error)) => return Err(error),
        };

        signed = signed.combine(&[SignatureEntry::new(request.source_owner, user_signature)])?;
        if let Some(sponsor_signature) = sponsor_signature {
            machine.advance(TransferState::AwaitingSponsorSignature)?;
            signed =
                signed.combine(&[SignatureEntry::new(request.fee_payer, sponsor_signature)])?;
        }

        // Surfaces the missing signers as an error.
        signed.to_wire()?;
        machine.advance(TransferState::ReadyToSubmit)?;

        self.submission
            .check_blockhash_valid(latest.last_valid_block_height)
            .await?;
        let transaction_id = self.submission.submit(&signed).await?;
        machine.advance(TransferState::Submitted)?;

        self.submission
            .await_confirmation(
                &transaction_id,
                settings.commitment,
                settings.confirmation_timeout,
            )
            .await?;
        machine.advance(TransferState::Confirmed)?;

        Ok(TransferOutcome::Confirmed {
            transaction_id,
            created_destination: assembled.created_destination,
        })
    }

    async fn request_signature(
        &self,
        role: SignerRole,
        message_hex: &str,
    ) -> Result<SignResult, TransferError> {
        let (signer, reason): (&dyn RemoteSigner, &str) = match role {
            SignerRole::User => (self.ctx.user_signer.as_ref(), USER_SIGN_REASON),
            SignerRole::Sponsor => (self.ctx.sponsor_signer.as_ref(), SPONSOR_SIGN_REASON),
        };
        let timeout = self.ctx.settings.signer_timeout;

        debug!(%role, "requesting signature");
        match tokio::time::timeout(timeout, signer.sign(message_hex, reason)).await {
            Ok(result) => {
                debug!(%role, success = matches!(result, SignResult::Success { .. }), "signer answered");
                Ok(result)
            }
            Err(_) => Err(TransferError::SignerTimeout(timeout)),
        }
    }

    async fn collect_signature(
        &self,
        role: SignerRole,
        message_hex: &str,
    ) -> Result<[u8; 64], Decline> {
        match self.request_signature(role, message_hex).await {
            Ok(SignResult::Success { signature }) => Ok(signature),
            Ok(SignResult::Cancelled) => Err(Decline::Cancelled(role)),
            Ok(SignResult::Error { message }) => {
                Err(Decline::Failed(signer_error(role, message)))
            }
            Err(error) => Err(Decline::Failed(error)),
        }
    }

    fn cancelled(&self, role: SignerRole, machine: &mut StateMachine) -> TransferOutcome {
        info!(%role, "signer cancelled, transfer abandoned");
        machine.fail();
        TransferOutcome::Cancelled { role }
    }
}

/// Why a signer did not hand back a signature.
enum Decline {
    Cancelled(SignerRole),
    Failed(TransferError),
}

fn signer_error(role: SignerRole, message: String) -> TransferError {
    TransferError::Signer(format!("{role}: {message}"))
}
