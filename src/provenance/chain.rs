//! Chain-backed ledger
//!
//! Anchors record hashes as transaction calldata over Ethereum-style
//! JSON-RPC. Confirmation arrives later through the transaction receipt.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

use super::backend::{BackendError, LedgerBackend, ProofStatus};
use crate::config::ChainConfig;

pub const CHAIN_BACKEND_ID: &str = "chain";

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

impl RpcError {
    /// JSON-RPC reserves -32000..=-32099 for server-side conditions, which
    /// node implementations use for busy pools and nonce races.
    fn into_backend_error(self) -> BackendError {
        let detail = format!("RPC error {}: {}", self.code, self.message);
        if (-32099..=-32000).contains(&self.code) {
            BackendError::Transient(detail)
        } else {
            BackendError::Rejected(detail)
        }
    }
}

#[derive(Debug)]
pub struct ChainLedger {
    rpc_url: String,
    from_address: String,
    http_client: Client,
    next_id: AtomicU64,
}

impl ChainLedger {
    pub fn new(config: &ChainConfig) -> Self {
        Self {
            rpc_url: config.rpc_url.clone(),
            from_address: config.from_address.clone(),
            http_client: Client::new(),
            next_id: AtomicU64::new(1),
        }
    }

    async fn rpc(&self, method: &str, params: Value) -> Result<Option<Value>, BackendError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
            "method": method,
            "params": params,
        });

        let response: RpcResponse = self
            .http_client
            .post(&self.rpc_url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(error) = response.error {
            return Err(error.into_backend_error());
        }
        Ok(response.result.filter(|v| !v.is_null()))
    }
}

/// `sha256:<hex>` becomes `0x<hex>` calldata.
fn calldata_for(record_hash: &str) -> Result<String, BackendError> {
    let hex_part = record_hash.strip_prefix("sha256:").unwrap_or(record_hash);
    if hex_part.is_empty() || hex::decode(hex_part).is_err() {
        return Err(BackendError::Rejected(format!(
            "record hash is not hex: {}",
            record_hash
        )));
    }
    Ok(format!("0x{}", hex_part))
}

#[async_trait]
impl LedgerBackend for ChainLedger {
    fn backend_id(&self) -> &str {
        CHAIN_BACKEND_ID
    }

    fn is_synchronous(&self) -> bool {
        false
    }

    async fn submit_proof(&self, record_hash: &str) -> Result<String, BackendError> {
        let data = calldata_for(record_hash)?;
        let result = self
            .rpc(
                "eth_sendTransaction",
                json!([{
                    "from": self.from_address,
                    "to": self.from_address,
                    "value": "0x0",
                    "data": data,
                }]),
            )
            .await?;

        let tx_hash = result
            .as_ref()
            .and_then(Value::as_str)
            .ok_or_else(|| BackendError::Transient("eth_sendTransaction returned no hash".to_string()))?
            .to_string();
        info!("Submitted proof {} in transaction {}", record_hash, tx_hash);
        Ok(tx_hash)
    }

    async fn poll_status(&self, handle: &str) -> Result<ProofStatus, BackendError> {
        let receipt = self
            .rpc("eth_getTransactionReceipt", json!([handle]))
            .await?;

        let status = match receipt {
            None => ProofStatus::Pending,
            Some(receipt) => match receipt.get("status").and_then(Value::as_str) {
                Some("0x1") => ProofStatus::Confirmed,
                Some("0x0") => ProofStatus::Failed,
                _ => ProofStatus::Pending,
            },
        };
        debug!("Transaction {} status {:?}", handle, status);
        Ok(status)
    }
}
