//! Simulated ledger
//!
//! An in-process, hash-chained block log. Every submission becomes a block
//! and is confirmed on return.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use super::backend::{BackendError, LedgerBackend, ProofStatus};
use crate::crypto::{proof_digest, GENESIS_HASH};

pub const SIMULATION_BACKEND_ID: &str = "simulation";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulatedBlock {
    pub index: u64,
    pub timestamp: DateTime<Utc>,
    pub record_hash: String,
    pub prev_hash: String,
    pub hash: String,
}

impl SimulatedBlock {
    fn new(index: u64, record_hash: String, prev_hash: String) -> Self {
        let timestamp = Utc::now();
        let hash = Self::compute_hash(index, &timestamp, &record_hash, &prev_hash);
        Self {
            index,
            timestamp,
            record_hash,
            prev_hash,
            hash,
        }
    }

    fn compute_hash(index: u64, timestamp: &DateTime<Utc>, record_hash: &str, prev_hash: &str) -> String {
        proof_digest(
            format!(
                "index:{}|timestamp:{}|record:{}|prev:{}",
                index,
                timestamp.to_rfc3339(),
                record_hash,
                prev_hash
            )
            .as_bytes(),
        )
    }

    pub fn verify_hash(&self) -> bool {
        self.hash == Self::compute_hash(self.index, &self.timestamp, &self.record_hash, &self.prev_hash)
    }
}

#[derive(Debug)]
pub struct SimulationLedger {
    blocks: RwLock<Vec<SimulatedBlock>>,
}

impl Default for SimulationLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulationLedger {
    pub fn new() -> Self {
        let genesis = SimulatedBlock::new(0, "genesis".to_string(), GENESIS_HASH.to_string());
        Self {
            blocks: RwLock::new(vec![genesis]),
        }
    }

    pub async fn blocks(&self) -> Vec<SimulatedBlock> {
        self.blocks.read().await.clone()
    }

    pub async fn height(&self) -> u64 {
        self.blocks.read().await.len() as u64 - 1
    }

    /// Recheck every block hash and link.
    pub async fn verify_chain(&self) -> bool {
        let blocks = self.blocks.read().await;
        blocks.iter().all(SimulatedBlock::verify_hash)
            && blocks.windows(2).all(|pair| pair[1].prev_hash == pair[0].hash)
    }
}

#[async_trait]
impl LedgerBackend for SimulationLedger {
    fn backend_id(&self) -> &str {
        SIMULATION_BACKEND_ID
    }

    fn is_synchronous(&self) -> bool {
        true
    }

    async fn submit_proof(&self, record_hash: &str) -> Result<String, BackendError> {
        let mut blocks = self.blocks.write().await;
        let prev = blocks
            .last()
            .map(|b| (b.index, b.hash.clone()))
            .unwrap_or((0, GENESIS_HASH.to_string()));
        let block = SimulatedBlock::new(prev.0 + 1, record_hash.to_string(), prev.1);
        debug!("Simulated block {} anchors {}", block.index, record_hash);
        let handle = block.hash.clone();
        blocks.push(block);
        Ok(handle)
    }

    async fn poll_status(&self, handle: &str) -> Result<ProofStatus, BackendError> {
        let blocks = self.blocks.read().await;
        if blocks.iter().any(|b| b.hash == handle) {
            Ok(ProofStatus::Confirmed)
        } else {
            Ok(ProofStatus::Failed)
        }
    }
}
