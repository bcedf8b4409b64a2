//! Environment-driven configuration.
//!
//! | variable | default |
//! |----------|---------|
//! | `SOLANA_RPC_URL` | `https://api.devnet.solana.com` |
//! | `SIGNER_API_URL` | `https://api.metakeep.xyz` |
//! | `SIGNER_API_KEY` | required |
//! | `SPONSOR_ADDRESS` | looked up from the signer's developer wallet |
//! | `TOKEN_MINT` | devnet USDC |
//! | `TOKEN_DECIMALS` | `6` |
//! | `TRANSFER_AMOUNT` | `0.01` |
//! | `CONFIRMATION_COMMITMENT` | `confirmed` |
//! | `CONFIRMATION_TIMEOUT_SECS` | `30` |
//! | `POLL_INTERVAL_MS` | `500` |
//! | `SIGNER_TIMEOUT_SECS` | `120` |
//! | `RPC_TIMEOUT_SECS` | `10` |

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use sol_tx::{address_to_string, parse_address, ui_amount_to_base_units, Address};
use tracing::debug;

use crate::context::TransferSettings;
use crate::error::TransferError;
use crate::signer::HttpRemoteSigner;
use crate::types::{Commitment, TransferRequest};

pub const DEFAULT_RPC_URL: &str = "https://api.devnet.solana.com";
pub const DEFAULT_SIGNER_API_URL: &str = "https://api.metakeep.xyz";
/// USDC on devnet.
pub const DEFAULT_TOKEN_MINT: &str = "4zMMC9srt5Ri5X14GAgXhaHii3GnPAEERYPJgZJDncDU";

pub struct TransferConfig {
    pub rpc_url: String,
    pub signer_api_url: String,
    pub signer_api_key: SecretString,
    /// Fee payer for every transfer. When unset, the signing service's
    /// developer wallet is used.
    pub sponsor: Option<Address>,
    pub mint: Address,
    pub decimals: u8,
    /// Transfer amount in the mint's smallest unit.
    pub amount: u64,
    pub commitment: Commitment,
    pub confirmation_timeout: Duration,
    pub poll_interval: Duration,
    pub signer_timeout: Duration,
    pub rpc_timeout: Duration,
}

impl fmt::Debug for TransferConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferConfig")
            .field("rpc_url", &self.rpc_url)
            .field("signer_api_url", &self.signer_api_url)
            .field("signer_api_key", &"[REDACTED]")
            .field("sponsor", &self.sponsor.as_ref().map(address_to_string))
            .field("mint", &address_to_string(&self.mint))
            .field("decimals", &self.decimals)
            .field("amount", &self.amount)
            .field("commitment", &self.commitment)
            .field("confirmation_timeout", &self.confirmation_timeout)
            .field("poll_interval", &self.poll_interval)
            .field("signer_timeout", &self.signer_timeout)
            .field("rpc_timeout", &self.rpc_timeout)
            .finish()
    }
}

impl TransferConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, TransferError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load through `lookup`, which returns `None` for unset variables.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, TransferError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| -> String {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| default.to_string())
        };
        let required = |key: &str| -> Result<String, TransferError> {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| TransferError::Config(format!("{key} is not set")))
        };

        let address = |key: &str, value: &str| -> Result<Address, TransferError> {
            parse_address(value).map_err(|e| TransferError::Config(format!("{key}: {e}")))
        };

        let poll_interval = Duration::from_millis(parse_var(
            "POLL_INTERVAL_MS",
            &var("POLL_INTERVAL_MS", "500"),
        )?);
        if poll_interval.is_zero() {
            return Err(TransferError::Config(
                "POLL_INTERVAL_MS must be greater than zero".into(),
            ));
        }

        let decimals: u8 = parse_var("TOKEN_DECIMALS", &var("TOKEN_DECIMALS", "6"))?;
        let amount = ui_amount_to_base_units(&var("TRANSFER_AMOUNT", "0.01"), decimals)
            .map_err(|e| TransferError::Config(format!("TRANSFER_AMOUNT: {e}")))?;

        Ok(Self {
            rpc_url: var("SOLANA_RPC_URL", DEFAULT_RPC_URL),
            signer_api_url: var("SIGNER_API_URL", DEFAULT_SIGNER_API_URL),
            signer_api_key: SecretString::from(required("SIGNER_API_KEY")?),
            sponsor: lookup("SPONSOR_ADDRESS")
                .filter(|v| !v.trim().is_empty())
                .map(|v| address("SPONSOR_ADDRESS", &v))
                .transpose()?,
            mint: address("TOKEN_MINT", &var("TOKEN_MINT", DEFAULT_TOKEN_MINT))?,
            decimals,
            amount,
            commitment: parse_var(
                "CONFIRMATION_COMMITMENT",
                &var("CONFIRMATION_COMMITMENT", "confirmed"),
            )?,
            confirmation_timeout: Duration::from_secs(parse_var(
                "CONFIRMATION_TIMEOUT_SECS",
                &var("CONFIRMATION_TIMEOUT_SECS", "30"),
            )?),
            poll_interval,
            signer_timeout: Duration::from_secs(parse_var(
                "SIGNER_TIMEOUT_SECS",
                &var("SIGNER_TIMEOUT_SECS", "120"),
            )?),
            rpc_timeout: Duration::from_secs(parse_var(
                "RPC_TIMEOUT_SECS",
                &var("RPC_TIMEOUT_SECS", "10"),
            )?),
        })
    }

    /// Timing and commitment knobs for the orchestrator.
    pub fn settings(&self) -> TransferSettings {
        TransferSettings {
            commitment: self.commitment,
            confirmation_timeout: self.confirmation_timeout,
            poll_interval: self.poll_interval,
            signer_timeout: self.signer_timeout,
            ..TransferSettings::default()
        }
    }

    /// HTTP client for the configured signing service.
    pub fn sponsor_signer(&self) -> Result<HttpRemoteSigner, TransferError> {
        HttpRemoteSigner::new(
            &self.signer_api_url,
            SecretString::from(self.signer_api_key.expose_secret().to_owned()),
            self.signer_timeout,
        )
    }

    /// The configured sponsor, or else the developer wallet `signer` signs for.
    pub async fn resolve_sponsor(
        &self,
        signer: &HttpRemoteSigner,
    ) -> Result<Address, TransferError> {
        match self.sponsor {
            Some(sponsor) => Ok(sponsor),
            None => {
                debug!("SPONSOR_ADDRESS unset, asking the signer for its developer wallet");
                signer.developer_wallet().await
            }
        }
    }

    /// A request moving the configured amount of the configured mint from
    /// `source_owner` to `dest_owner`, paid for by `fee_payer`.
    pub fn request(
        &self,
        source_owner: Address,
        dest_owner: Address,
        fee_payer: Address,
    ) -> Result<TransferRequest, TransferError> {
        Ok(TransferRequest::new(
            source_owner,
            dest_owner,
            self.mint,
            fee_payer,
            self.amount,
        )?)
    }
}

fn parse_var<T>(key: &str, value: &str) -> Result<T, TransferError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| TransferError::Config(format!("{key}: {e}")))
}
