//! Remote signer client.
//!
//! Keys never live in this process. Each party (token owner, sponsor) is
//! represented by a [`RemoteSigner`] that receives the serialized message as
//! `0x`-prefixed hex and answers with a tagged [`SignResult`].

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sol_tx::codec::decode_hex_array;
use sol_tx::{parse_address, Address};
use tracing::{debug, info, warn};

use crate::error::TransferError;

/// Path of the transaction signing endpoint, relative to the signer base URL.
pub const SIGN_TRANSACTION_PATH: &str = "/v2/app/sign/transaction";
/// Path of the developer wallet lookup, relative to the signer base URL.
pub const DEVELOPER_WALLET_PATH: &str = "/v3/getDeveloperWallet";
/// Identifier of the developer wallet that sponsors transfers.
const DEVELOPER_WALLET_ID: &str = "master";

/// Outcome of one signing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignResult {
    Success { signature: [u8; 64] },
    /// The signer (or the human behind it) declined.
    Cancelled,
    Error { message: String },
}

#[async_trait]
#[cfg_attr(test, automock)]
pub trait RemoteSigner: Send + Sync {
    /// Ask for a signature over `message_hex`; `reason` is shown to whoever
    /// approves the request.
    async fn sign(&self, message_hex: &str, reason: &str) -> SignResult;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SignRequest<'a> {
    transaction_object: TransactionObject<'a>,
    reason: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TransactionObject<'a> {
    serialized_transaction_message: &'a str,
}

#[derive(Debug, Deserialize)]
struct SignResponse {
    status: String,
    #[serde(default)]
    signature: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl SignResponse {
    fn into_result(self) -> SignResult {
        match self.status.as_str() {
            "SUCCESS" => match self.signature.as_deref().map(decode_hex_array::<64>) {
                Some(Ok(signature)) => SignResult::Success { signature },
                Some(Err(e)) => SignResult::Error {
                    message: format!("malformed signature: {e}"),
                },
                None => SignResult::Error {
                    message: "SUCCESS response without a signature".into(),
                },
            },
            "CANCELLED" | "USER_CANCELLED" | "REJECTED" => SignResult::Cancelled,
            other => SignResult::Error {
                message: match self.message {
                    Some(m) => format!("{other}: {m}"),
                    None => other.to_string(),
                },
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct DeveloperWalletRequest<'a> {
    id: &'a str,
}

#[derive(Debug, Deserialize)]
struct DeveloperWalletResponse {
    status: String,
    #[serde(default)]
    wallet: Option<WalletAddresses>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WalletAddresses {
    #[serde(default)]
    sol_address: Option<String>,
}

impl DeveloperWalletResponse {
    fn into_address(self) -> Result<Address, TransferError> {
        let fail = |detail: String| TransferError::Signer(format!("developer wallet lookup: {detail}"));

        if self.status != "SUCCESS" {
            return Err(fail(match self.message {
                Some(m) => format!("{}: {m}", self.status),
                None => self.status,
            }));
        }
        let encoded = self
            .wallet
            .and_then(|w| w.sol_address)
            .ok_or_else(|| fail("response carries no Solana address".into()))?;
        parse_address(&encoded).map_err(|e| fail(e.to_string()))
    }
}

/// [`RemoteSigner`] backed by an HTTP signing service authenticated with an
/// API key.
pub struct HttpRemoteSigner {
    http: reqwest::Client,
    endpoint: String,
    wallet_endpoint: String,
    api_key: SecretString,
}

impl fmt::Debug for HttpRemoteSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpRemoteSigner")
            .field("endpoint", &self.endpoint)
            .field("wallet_endpoint", &self.wallet_endpoint)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

impl HttpRemoteSigner {
    pub fn new(
        base_url: &str,
        api_key: SecretString,
        timeout: Duration,
    ) -> Result<Self, TransferError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransferError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::with_client(http, base_url, api_key))
    }

    pub fn with_client(http: reqwest::Client, base_url: &str, api_key: SecretString) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            http,
            endpoint: format!("{base}{SIGN_TRANSACTION_PATH}"),
            wallet_endpoint: format!("{base}{DEVELOPER_WALLET_PATH}"),
            api_key,
        }
    }

    /// Address of the developer wallet this API key signs for.
    ///
    /// Any failure is returned as is; there is no fallback address.
    pub async fn developer_wallet(&self) -> Result<Address, TransferError> {
        debug!(endpoint = %self.wallet_endpoint, "looking up developer wallet");

        let response = self
            .http
            .post(&self.wallet_endpoint)
            .header("x-api-key", self.api_key.expose_secret())
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&DeveloperWalletRequest {
                id: DEVELOPER_WALLET_ID,
            })
            .send()
            .await
            .map_err(|e| TransferError::Signer(format!("developer wallet lookup: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(TransferError::Signer(format!(
                "developer wallet lookup: HTTP {status}: {text}"
            )));
        }

        let parsed: DeveloperWalletResponse = response.json().await.map_err(|e| {
            TransferError::Signer(format!("developer wallet lookup: invalid response: {e}"))
        })?;
        let address = parsed.into_address()?;
        info!(developer_wallet = %sol_tx::address_to_string(&address), "developer wallet resolved");
        Ok(address)
    }

    async fn request(&self, message_hex: &str, reason: &str) -> Result<SignResult, String> {
        let body = SignRequest {
            transaction_object: TransactionObject {
                serialized_transaction_message: message_hex,
            },
            reason,
        };

        let response = self
            .http
            .post(&self.endpoint)
            .header("x-api-key", self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(format!("HTTP {status}: {text}"));
        }

        let parsed: SignResponse = response
            .json()
            .await
            .map_err(|e| format!("invalid response: {e}"))?;
        Ok(parsed.into_result())
    }
}

#[async_trait]
impl RemoteSigner for HttpRemoteSigner {
    async fn sign(&self, message_hex: &str, reason: &str) -> SignResult {
        debug!(
            endpoint = %self.endpoint,
            message_len = message_hex.len(),
            "requesting remote signature"
        );
        match self.request(message_hex, reason).await {
            Ok(result) => result,
            Err(message) => {
                warn!(endpoint = %self.endpoint, %message, "remote signer failed");
                SignResult::Error { message }
            }
        }
    }
}
