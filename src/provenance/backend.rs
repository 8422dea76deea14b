//! Ledger backend capability
//!
//! A backend receives content hashes and reports whether they were
//! committed. It never sees raw citizen data.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProofStatus {
    Pending,
    Confirmed,
    Failed,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Worth retrying: network errors, timeouts, overloaded nodes,
    /// missing endorsements.
    #[error("Transient ledger failure: {0}")]
    Transient(String),

    #[error("Ledger rejected request: {0}")]
    Rejected(String),
}

impl BackendError {
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Transient(_))
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) if status.is_client_error() && status.as_u16() != 429 => {
                BackendError::Rejected(format!("HTTP {}: {}", status, err))
            }
            _ => BackendError::Transient(format!("HTTP error: {}", err)),
        }
    }
}

#[async_trait]
pub trait LedgerBackend: Send + Sync + Debug {
    fn backend_id(&self) -> &str;

    /// True when `submit_proof` returning means the proof is committed.
    fn is_synchronous(&self) -> bool;

    /// Submit a record hash, returning the backend's reference to it.
    async fn submit_proof(&self, record_hash: &str) -> Result<String, BackendError>;

    async fn poll_status(&self, handle: &str) -> Result<ProofStatus, BackendError>;
}
