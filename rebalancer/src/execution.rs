// Execution collaborator boundary: named operations with JSON arguments,
// returning an envelope of JSON-encoded payloads that are validated into
// typed records before anything downstream touches them

use async_trait::async_trait;
use ethers::types::H256;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::RebalanceError;

pub const OP_GET_POSITION: &str = "get_position";
pub const OP_GET_BALANCES: &str = "get_balances";
pub const OP_GET_ALLOWANCE: &str = "get_allowance";
pub const OP_WITHDRAW: &str = "withdraw_liquidity";
pub const OP_SWAP: &str = "swap_tokens";
pub const OP_SUPPLY: &str = "supply_liquidity";

/// Result envelope of one collaborator call: one or more JSON-encoded
/// payload strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallEnvelope {
    pub payloads: Vec<String>,
}

#[async_trait]
pub trait ExecutionClient: Send + Sync {
    async fn call(
        &self,
        operation: &str,
        args: serde_json::Value,
    ) -> Result<CallEnvelope, RebalanceError>;
}

/// Decodes the first payload of an envelope into a typed record. A missing
/// or malformed payload is a parse error, never a silent pass-through.
pub fn decode_payload<T: DeserializeOwned>(envelope: &CallEnvelope) -> Result<T, RebalanceError> {
    let payload = envelope
        .payloads
        .first()
        .ok_or_else(|| RebalanceError::ParseError("empty payload envelope".into()))?;
    serde_json::from_str(payload)
        .map_err(|e| RebalanceError::ParseError(format!("payload did not match contract: {}", e)))
}

pub fn parse_tx_hash(raw: &str) -> Result<H256, RebalanceError> {
    raw.parse::<H256>()
        .map_err(|_| RebalanceError::ParseError(format!("'{}' is not a transaction hash", raw)))
}

/// Wallet balances in human token units, as reported by the collaborator.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct BalanceSnapshot {
    pub balance0: f64,
    pub balance1: f64,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct AllowanceSnapshot {
    pub allowance0: f64,
    pub allowance1: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WithdrawReceipt {
    pub success: bool,
    pub tx_hash: Option<String>,
    pub amount0: f64,
    pub amount1: f64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SwapReceipt {
    pub success: bool,
    pub tx_hash: Option<String>,
    pub amount_in: f64,
    pub amount_out: f64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SupplyReceipt {
    pub success: bool,
    pub tx_hash: Option<String>,
    /// Minted position id, decoded best-effort by the collaborator; absent
    /// is acceptable and reported as "unknown", not an error.
    pub position_id: Option<String>,
    pub amount0: f64,
    pub amount1: f64,
    pub error: Option<String>,
}

/// HTTP transport for the execution collaborator.
pub struct HttpExecutionClient {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpExecutionClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl ExecutionClient for HttpExecutionClient {
    async fn call(
        &self,
        operation: &str,
        args: serde_json::Value,
    ) -> Result<CallEnvelope, RebalanceError> {
        let body = serde_json::json!({
            "operation": operation,
            "arguments": args,
        });

        let envelope: CallEnvelope = self
            .http
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(envelope)
    }
}
