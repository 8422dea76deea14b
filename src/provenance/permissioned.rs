//! Permissioned-ledger backend
//!
//! Talks to a Fabric-style gateway REST API. A submission is endorsed by
//! peers before it is ordered; too few endorsements is a transient failure.
//! Commit status is polled afterwards.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use super::backend::{BackendError, LedgerBackend, ProofStatus};
use crate::config::FabricConfig;

pub const PERMISSIONED_BACKEND_ID: &str = "permissioned";
const ANCHOR_FUNCTION: &str = "AnchorProof";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub transaction_id: String,
    #[serde(default)]
    pub endorsements: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionStatusResponse {
    pub status: String,
}

#[derive(Debug)]
pub struct PermissionedLedger {
    gateway_url: String,
    channel: String,
    chaincode: String,
    min_endorsements: u32,
    http_client: Client,
}

impl PermissionedLedger {
    pub fn new(config: &FabricConfig) -> Self {
        Self {
            gateway_url: config.gateway_url.trim_end_matches('/').to_string(),
            channel: config.channel.clone(),
            chaincode: config.chaincode.clone(),
            min_endorsements: config.min_endorsements,
            http_client: Client::new(),
        }
    }

    fn submit_url(&self) -> String {
        format!(
            "{}/channels/{}/chaincodes/{}/transactions",
            self.gateway_url, self.channel, self.chaincode
        )
    }

    fn status_url(&self, transaction_id: &str) -> String {
        format!(
            "{}/channels/{}/transactions/{}",
            self.gateway_url, self.channel, transaction_id
        )
    }
}

#[async_trait]
impl LedgerBackend for PermissionedLedger {
    fn backend_id(&self) -> &str {
        PERMISSIONED_BACKEND_ID
    }

    fn is_synchronous(&self) -> bool {
        false
    }

    async fn submit_proof(&self, record_hash: &str) -> Result<String, BackendError> {
        let response: SubmitResponse = self
            .http_client
            .post(self.submit_url())
            .json(&json!({
                "function": ANCHOR_FUNCTION,
                "args": [record_hash],
            }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if response.endorsements < self.min_endorsements {
            warn!(
                "Transaction {} endorsed by {} of {} required peers",
                response.transaction_id, response.endorsements, self.min_endorsements
            );
            return Err(BackendError::Transient(format!(
                "endorsement policy not satisfied ({}/{})",
                response.endorsements, self.min_endorsements
            )));
        }

        info!(
            "Submitted proof {} as transaction {} on channel {}",
            record_hash, response.transaction_id, self.channel
        );
        Ok(response.transaction_id)
    }

    async fn poll_status(&self, handle: &str) -> Result<ProofStatus, BackendError> {
        let response = self.http_client.get(self.status_url(handle)).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            // Not yet visible to the queried peer.
            return Ok(ProofStatus::Pending);
        }

        let body: TransactionStatusResponse = response.error_for_status()?.json().await?;
        let status = match body.status.to_ascii_uppercase().as_str() {
            "COMMITTED" | "VALID" => ProofStatus::Confirmed,
            "INVALID" | "REJECTED" | "ENDORSEMENT_POLICY_FAILURE" | "MVCC_READ_CONFLICT" => {
                ProofStatus::Failed
            }
            _ => ProofStatus::Pending,
        };
        debug!("Transaction {} status {} -> {:?}", handle, body.status, status);
        Ok(status)
    }
}
