//! Solana JSON-RPC client.
//!
//! [`RpcNode`] abstracts the handful of node methods a sponsored transfer
//! needs; [`JsonRpcClient`] implements it over HTTP with `reqwest`. The client
//! holds no per-transfer state, so one handle can serve any number of
//! concurrent transfers.
//!
//! Transient faults (connection errors, HTTP 429/5xx, node-unhealthy errors)
//! get exactly one retry. Everything else is classified and returned.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
#[cfg(test)]
use mockall::automock;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use sol_tx::{address_to_string, parse_address, Address, TokenAccountState};
use tracing::{debug, warn};

use crate::error::TransferError;
use crate::types::Commitment;

/// JSON-RPC error code for a transaction rejected during preflight simulation.
const SEND_TRANSACTION_PREFLIGHT_FAILURE: i64 = -32002;
/// JSON-RPC error code reported by a node that is behind or unhealthy.
const NODE_UNHEALTHY: i64 = -32005;
/// JSON-RPC error code for a duplicate of a transaction the node already has.
const ALREADY_PROCESSED: i64 = -32009;

/// A recent blockhash and the last block height at which it is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatestBlockhash {
    pub blockhash: [u8; 32],
    pub last_valid_block_height: u64,
}

/// An account as returned by `getAccountInfo`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountInfo {
    pub lamports: u64,
    pub owner: Address,
    pub data: Vec<u8>,
}

/// Status of a submitted transaction as reported by `getSignatureStatuses`.
#[derive(Debug, Clone, PartialEq)]
pub struct SignatureStatus {
    pub slot: u64,
    pub confirmation_status: Option<Commitment>,
    /// Execution error, if the transaction landed but failed.
    pub err: Option<Value>,
}

/// The RPC node methods consumed by a sponsored transfer.
#[async_trait]
#[cfg_attr(test, automock)]
pub trait RpcNode: Send + Sync {
    async fn get_latest_blockhash(
        &self,
        commitment: Commitment,
    ) -> Result<LatestBlockhash, TransferError>;

    async fn get_block_height(&self, commitment: Commitment) -> Result<u64, TransferError>;

    /// `Ok(None)` when no account exists at `address`.
    async fn get_account_info(
        &self,
        address: &Address,
        commitment: Commitment,
    ) -> Result<Option<AccountInfo>, TransferError>;

    /// Broadcast wire bytes with preflight simulation; returns the
    /// transaction id (Base58 fee-payer signature).
    async fn send_transaction(
        &self,
        wire: &[u8],
        preflight_commitment: Commitment,
    ) -> Result<String, TransferError>;

    /// `Ok(None)` while the node has not seen the transaction.
    async fn get_signature_status(
        &self,
        signature: &str,
    ) -> Result<Option<SignatureStatus>, TransferError>;
}

/// Fetch and parse the token account at `address`, `Ok(None)` if absent.
pub async fn fetch_token_account(
    rpc: &dyn RpcNode,
    address: &Address,
    commitment: Commitment,
) -> Result<Option<TokenAccountState>, TransferError> {
    match rpc.get_account_info(address, commitment).await? {
        Some(info) => Ok(Some(TokenAccountState::parse(&info.data)?)),
        None => Ok(None),
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RpcEnvelope<T> {
    result: Option<T>,
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct WithContext<T> {
    value: T,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BlockhashValue {
    blockhash: String,
    last_valid_block_height: u64,
}

#[derive(Debug, Deserialize)]
struct AccountValue {
    lamports: u64,
    owner: String,
    /// `[base64_data, "base64"]`
    data: (String, String),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusValue {
    slot: u64,
    #[serde(default)]
    confirmation_status: Option<Commitment>,
    #[serde(default)]
    err: Option<Value>,
}

// ---------------------------------------------------------------------------
// Error classification
// ---------------------------------------------------------------------------

/// Case- and space-insensitive substring match, so "Blockhash not found"
/// and "BlockhashNotFound" are treated alike.
fn mentions(haystack: &str, needle: &str) -> bool {
    let normalize = |s: &str| s.to_lowercase().replace([' ', '_'], "");
    normalize(haystack).contains(&normalize(needle))
}

fn classify_rpc_error(method: &str, error: RpcErrorObject) -> TransferError {
    if error.code == NODE_UNHEALTHY {
        return TransferError::RpcUnavailable(format!("{method}: {}", error.message));
    }

    let detail = error
        .data
        .as_ref()
        .and_then(|d| d.get("err"))
        .map(|e| e.to_string());
    let full = match &detail {
        Some(d) => format!("{} ({d})", error.message),
        None => error.message.clone(),
    };

    if mentions(&full, "blockhash not found") {
        return TransferError::BlockhashExpired(full);
    }

    // A resend of a transaction that already landed, typically after the
    // first response was lost.
    if error.code == ALREADY_PROCESSED
        || mentions(&full, "already processed")
        || mentions(&full, "already been processed")
    {
        return TransferError::AlreadyProcessed(full);
    }

    if method == "sendTransaction" || error.code == SEND_TRANSACTION_PREFLIGHT_FAILURE {
        return TransferError::PreflightRejected { reason: full };
    }

    TransferError::Rpc {
        code: error.code,
        message: error.message,
    }
}

/// Map a transaction execution error reported by the chain.
pub(crate) fn classify_execution_error(err: &Value) -> TransferError {
    let code = match err {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    if mentions(&code, "BlockhashNotFound") {
        TransferError::BlockhashExpired(code)
    } else {
        TransferError::OnChainError { code }
    }
}

// ---------------------------------------------------------------------------
// HTTP client
// ---------------------------------------------------------------------------

/// JSON-RPC 2.0 over HTTP.
#[derive(Debug, Clone)]
pub struct JsonRpcClient {
    http: reqwest::Client,
    url: String,
}

impl JsonRpcClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, TransferError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransferError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::with_client(http, url))
    }

    /// Share an existing `reqwest::Client` (connection pool) with this node.
    pub fn with_client(http: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
        }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T, TransferError> {
        match self.call_once(method, &params).await {
            Err(e) if e.is_transient() => {
                warn!(method, error = %e, "transient RPC failure, retrying once");
                self.call_once(method, &params).await
            }
            other => other,
        }
    }

    async fn call_once<T: DeserializeOwned>(
        &self,
        method: &str,
        params: &Value,
    ) -> Result<T, TransferError> {
        debug!(method, url = %self.url, "RPC request");

        let request = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let response = self
            .http
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| TransferError::RpcUnavailable(format!("{method}: {e}")))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(TransferError::RpcUnavailable(format!(
                "{method}: HTTP {status}"
            )));
        }
        if !status.is_success() {
            return Err(TransferError::InvalidResponse(format!(
                "{method}: HTTP {status}"
            )));
        }

        let envelope: RpcEnvelope<T> = response
            .json()
            .await
            .map_err(|e| TransferError::InvalidResponse(format!("{method}: {e}")))?;

        if let Some(error) = envelope.error {
            return Err(classify_rpc_error(method, error));
        }

        envelope
            .result
            .ok_or_else(|| TransferError::InvalidResponse(format!("{method}: missing result")))
    }
}

#[async_trait]
impl RpcNode for JsonRpcClient {
    async fn get_latest_blockhash(
        &self,
        commitment: Commitment,
    ) -> Result<LatestBlockhash, TransferError> {
        let response: WithContext<BlockhashValue> = self
            .call(
                "getLatestBlockhash",
                json!([{ "commitment": commitment.as_str() }]),
            )
            .await?;

        let blockhash = parse_address(&response.value.blockhash).map_err(|e| {
            TransferError::InvalidResponse(format!("getLatestBlockhash: {e}"))
        })?;

        Ok(LatestBlockhash {
            blockhash,
            last_valid_block_height: response.value.last_valid_block_height,
        })
    }

    async fn get_block_height(&self, commitment: Commitment) -> Result<u64, TransferError> {
        self.call(
            "getBlockHeight",
            json!([{ "commitment": commitment.as_str() }]),
        )
        .await
    }

    async fn get_account_info(
        &self,
        address: &Address,
        commitment: Commitment,
    ) -> Result<Option<AccountInfo>, TransferError> {
        let response: WithContext<Option<AccountValue>> = self
            .call(
                "getAccountInfo",
                json!([
                    address_to_string(address),
                    { "encoding": "base64", "commitment": commitment.as_str() }
                ]),
            )
            .await?;

        let Some(account) = response.value else {
            return Ok(None);
        };

        let (encoded, encoding) = account.data;
        if encoding != "base64" {
            return Err(TransferError::InvalidResponse(format!(
                "getAccountInfo: unexpected data encoding {encoding:?}"
            )));
        }
        let data = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| TransferError::InvalidResponse(format!("getAccountInfo: {e}")))?;
        let owner = parse_address(&account.owner)
            .map_err(|e| TransferError::InvalidResponse(format!("getAccountInfo: {e}")))?;

        Ok(Some(AccountInfo {
            lamports: account.lamports,
            owner,
            data,
        }))
    }

    async fn send_transaction(
        &self,
        wire: &[u8],
        preflight_commitment: Commitment,
    ) -> Result<String, TransferError> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(wire);
        self.call(
            "sendTransaction",
            json!([
                encoded,
                {
                    "encoding": "base64",
                    "skipPreflight": false,
                    "preflightCommitment": preflight_commitment.as_str(),
                }
            ]),
        )
        .await
    }

    async fn get_signature_status(
        &self,
        signature: &str,
    ) -> Result<Option<SignatureStatus>, TransferError> {
        let response: WithContext<Vec<Option<StatusValue>>> = self
            .call(
                "getSignatureStatuses",
                json!([[signature], { "searchTransactionHistory": false }]),
            )
            .await?;

        Ok(response
            .value
            .into_iter()
            .next()
            .flatten()
            .map(|s| SignatureStatus {
                slot: s.slot,
                confirmation_status: s.confirmation_status,
                err: s.err,
            }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client(server: &MockServer) -> JsonRpcClient {
        JsonRpcClient::new(format!("{}/", server.uri()), Duration::from_secs(5)).unwrap()
    }

    fn rpc_ok(result: Value) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({ "jsonrpc": "2.0", "id": 1, "result": result }))
    }

    fn rpc_err(code: i64, message: &str, data: Value) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": { "code": code, "message": message, "data": data }
        }))
    }

    // -- Classification -------------------------------------------------------

    #[test]
    fn mentions_ignores_case_and_spacing() {
        assert!(mentions("Transaction simulation failed: Blockhash not found", "blockhash not found"));
        assert!(mentions("\"BlockhashNotFound\"", "blockhash not found"));
        assert!(!mentions("insufficient funds", "blockhash not found"));
    }

    #[test]
    fn execution_error_classification() {
        assert!(classify_execution_error(&json!("BlockhashNotFound")).is_blockhash_expired());
        match classify_execution_error(&json!({ "InstructionError": [0, { "Custom": 1 }] })) {
            TransferError::OnChainError { code } => assert!(code.contains("Custom")),
            other => panic!("unexpected {other:?}"),
        }
    }

    // -- HTTP -------------------------------------------------------------------

    #[tokio::test]
    async fn latest_blockhash_is_decoded() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .and(body_partial_json(json!({ "method": "getLatestBlockhash" })))
            .respond_with(rpc_ok(json!({
                "context": { "slot": 1 },
                "value": {
                    "blockhash": "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA",
                    "lastValidBlockHeight": 3090
                }
            })))
            .mount(&server)
            .await;

        let latest = client(&server).await.get_latest_blockhash(Commitment::Confirmed).await.unwrap();
        assert_eq!(latest.blockhash, sol_tx::TOKEN_PROGRAM_ID);
        assert_eq!(latest.last_valid_block_height, 3090);
    }

    #[tokio::test]
    async fn missing_account_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "method": "getAccountInfo" })))
            .respond_with(rpc_ok(json!({ "context": { "slot": 1 }, "value": null })))
            .mount(&server)
            .await;

        let info = client(&server)
            .await
            .get_account_info(&[7; 32], Commitment::Confirmed)
            .await
            .unwrap();
        assert!(info.is_none());
    }

    #[tokio::test]
    async fn token_account_is_parsed() {
        let state = TokenAccountState {
            mint: [1; 32],
            owner: [2; 32],
            amount: 1_000_000,
        };
        let encoded = base64::engine::general_purpose::STANDARD.encode(state.to_account_data());

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "method": "getAccountInfo" })))
            .respond_with(rpc_ok(json!({
                "context": { "slot": 1 },
                "value": {
                    "lamports": 2039280,
                    "owner": "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA",
                    "data": [encoded, "base64"],
                    "executable": false,
                    "rentEpoch": 0
                }
            })))
            .mount(&server)
            .await;

        let rpc = client(&server).await;
        let parsed = fetch_token_account(&rpc, &[9; 32], Commitment::Confirmed)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(parsed, state);
    }

    #[tokio::test]
    async fn server_error_is_retried_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .expect(2)
            .mount(&server)
            .await;

        let err = client(&server)
            .await
            .get_block_height(Commitment::Confirmed)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::RpcUnavailable(_)));
    }

    #[tokio::test]
    async fn transient_failure_then_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(rpc_ok(json!(4242)))
            .mount(&server)
            .await;

        let height = client(&server).await.get_block_height(Commitment::Confirmed).await.unwrap();
        assert_eq!(height, 4242);
    }

    #[tokio::test]
    async fn permanent_rpc_error_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(rpc_err(-32602, "Invalid params", Value::Null))
            .expect(1)
            .mount(&server)
            .await;

        let err = client(&server)
            .await
            .get_block_height(Commitment::Confirmed)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Rpc { code: -32602, .. }));
    }

    #[tokio::test]
    async fn preflight_failure_is_classified() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "method": "sendTransaction" })))
            .respond_with(rpc_err(
                -32002,
                "Transaction simulation failed: Error processing Instruction 0: custom program error: 0x1",
                json!({ "err": { "InstructionError": [0, { "Custom": 1 }] }, "logs": [] }),
            ))
            .mount(&server)
            .await;

        let err = client(&server)
            .await
            .send_transaction(&[1, 2, 3], Commitment::Confirmed)
            .await
            .unwrap_err();
        match err {
            TransferError::PreflightRejected { reason } => {
                assert!(reason.contains("custom program error"));
                assert!(reason.contains("Custom"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn preflight_blockhash_not_found_is_expiry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(rpc_err(
                -32002,
                "Transaction simulation failed: Blockhash not found",
                json!({ "err": "BlockhashNotFound", "logs": [] }),
            ))
            .mount(&server)
            .await;

        let err = client(&server)
            .await
            .send_transaction(&[1, 2, 3], Commitment::Confirmed)
            .await
            .unwrap_err();
        assert!(err.is_blockhash_expired());
    }

    #[tokio::test]
    async fn resend_after_lost_response_is_already_processed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(rpc_err(
                -32002,
                "Transaction simulation failed: This transaction has already been processed",
                json!({ "err": "AlreadyProcessed", "logs": [] }),
            ))
            .mount(&server)
            .await;

        let err = client(&server)
            .await
            .send_transaction(&[1, 2, 3], Commitment::Confirmed)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::AlreadyProcessed(_)), "{err:?}");
    }

    #[tokio::test]
    async fn duplicate_error_code_is_already_processed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(rpc_err(-32009, "duplicate transaction", Value::Null))
            .mount(&server)
            .await;

        let err = client(&server)
            .await
            .send_transaction(&[1, 2, 3], Commitment::Confirmed)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::AlreadyProcessed(_)));
    }

    #[tokio::test]
    async fn send_transaction_posts_base64() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "method": "sendTransaction",
                "params": ["AQID", { "encoding": "base64", "skipPreflight": false }]
            })))
            .respond_with(rpc_ok(json!("5txid")))
            .mount(&server)
            .await;

        let id = client(&server)
            .await
            .send_transaction(&[1, 2, 3], Commitment::Confirmed)
            .await
            .unwrap();
        assert_eq!(id, "5txid");
    }

    #[tokio::test]
    async fn signature_status_is_decoded() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "method": "getSignatureStatuses" })))
            .respond_with(rpc_ok(json!({
                "context": { "slot": 82 },
                "value": [{
                    "slot": 72,
                    "confirmations": 10,
                    "err": null,
                    "confirmationStatus": "confirmed"
                }]
            })))
            .mount(&server)
            .await;

        let status = client(&server).await.get_signature_status("5txid").await.unwrap().unwrap();
        assert_eq!(status.slot, 72);
        assert_eq!(status.confirmation_status, Some(Commitment::Confirmed));
        assert!(status.err.is_none());
    }

    #[tokio::test]
    async fn unknown_signature_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(rpc_ok(json!({ "context": { "slot": 82 }, "value": [null] })))
            .mount(&server)
            .await;

        assert!(client(&server).await.get_signature_status("5txid").await.unwrap().is_none());
    }
}
