//! Storage abstraction
//!
//! The engine persists identities, grants, audit entries and proof records
//! through a small key/value contract over JSON documents: get, put, delete
//! and ordered list-by-prefix. Transactional guarantees belong to the implementation.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;

use crate::error::ConsentError;

/// Storage backend trait
///
/// Implementations must be thread-safe and return `list_by_prefix` results in
/// ascending key order.
#[async_trait]
pub trait Storage: Send + Sync + Debug {
    async fn get(&self, key: &str) -> Result<Option<String>, ConsentError>;

    async fn put(&self, key: &str, value: String) -> Result<(), ConsentError>;

    async fn list_by_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, ConsentError>;

    /// Removing a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), ConsentError>;
}

/// Reject ids that cannot be used as a single key segment.
///
/// Keys are `/`-separated and listed by prefix, so an id containing `/`
/// would land inside another id's key range.
pub fn validate_key_id(kind: &str, id: &str) -> Result<(), ConsentError> {
    if id.trim().is_empty() {
        return Err(ConsentError::ValidationError(format!("{} is required", kind)));
    }
    if id.contains('/') || id.chars().any(char::is_control) {
        return Err(ConsentError::ValidationError(format!(
            "{} must not contain '/' or control characters: {:?}",
            kind, id
        )));
    }
    Ok(())
}

pub async fn read_json<T: DeserializeOwned>(
    storage: &dyn Storage,
    key: &str,
) -> Result<Option<T>, ConsentError> {
    match storage.get(key).await? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

pub async fn write_json<T: Serialize>(
    storage: &dyn Storage,
    key: &str,
    value: &T,
) -> Result<(), ConsentError> {
    let raw = serde_json::to_string(value)?;
    storage.put(key, raw).await
}

pub async fn scan_json<T: DeserializeOwned>(
    storage: &dyn Storage,
    prefix: &str,
) -> Result<Vec<T>, ConsentError> {
    storage
        .list_by_prefix(prefix)
        .await?
        .into_iter()
        .map(|(_, raw)| serde_json::from_str(&raw).map_err(ConsentError::from))
        .collect()
}

/// Key layout shared by every component.
pub mod keys {
    pub fn identity(uid_hash: &str) -> String {
        format!("identity/{}", uid_hash)
    }

    pub fn citizen(citizen_id: &str) -> String {
        format!("citizen/{}", citizen_id)
    }

    pub fn grants_of_pair(citizen_id: &str, requester_id: &str) -> String {
        format!("grant/{}/{}/", citizen_id, requester_id)
    }

    pub fn grants_of_citizen(citizen_id: &str) -> String {
        format!("grant/{}/", citizen_id)
    }

    pub fn grant(citizen_id: &str, requester_id: &str, grant_id: &str) -> String {
        format!("grant/{}/{}/{}", citizen_id, requester_id, grant_id)
    }

    pub fn audit_prefix(citizen_id: &str) -> String {
        format!("audit/{}/", citizen_id)
    }

    /// Zero padded so lexical order equals sequence order.
    pub fn audit_entry(citizen_id: &str, sequence: u64) -> String {
        format!("audit/{}/{:020}", citizen_id, sequence)
    }

    pub fn proof(proof_id: &str) -> String {
        format!("proof/{}", proof_id)
    }

    pub const PROOF_PREFIX: &str = "proof/";

    /// Index of proofs awaiting confirmation, scanned by the poller.
    pub fn pending_proof(proof_id: &str) -> String {
        format!("proof-pending/{}", proof_id)
    }

    pub const PENDING_PROOF_PREFIX: &str = "proof-pending/";

    pub fn record(module: &str, citizen_id: &str, record_id: &str) -> String {
        format!("record/{}/{}/{}", module, citizen_id, record_id)
    }

    pub fn records_of(module: &str, citizen_id: &str) -> String {
        format!("record/{}/{}/", module, citizen_id)
    }
}
