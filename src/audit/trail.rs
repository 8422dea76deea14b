//! Audit Trail
//!
//! Append-only, per-citizen hash chains persisted through the storage
//! contract. Appends for one citizen are serialized; citizens never contend.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::audit::entry::{AuditEntry, AuditEntryType};
use crate::audit::merkle::{audit_merkle_root, generate_merkle_proof, MerkleProof};
use crate::audit::verify::{verify_chain, ChainVerification};
use crate::crypto::GENESIS_HASH;
use crate::error::ConsentError;
use crate::locks::KeyedLocks;
use crate::storage::{keys, read_json, scan_json, validate_key_id, write_json, Storage};

/// Filter for [`AuditTrail::query`]. Pass the previous page's `next_cursor`
/// as `after_sequence` to resume.
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    pub entry_types: Option<Vec<AuditEntryType>>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub after_sequence: Option<u64>,
    pub limit: Option<usize>,
}

impl AuditQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn of_types(mut self, types: &[AuditEntryType]) -> Self {
        self.entry_types = Some(types.to_vec());
        self
    }

    pub fn after(mut self, sequence: u64) -> Self {
        self.after_sequence = Some(sequence);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn between(mut self, since: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self.until = Some(until);
        self
    }

    fn matches(&self, entry: &AuditEntry) -> bool {
        if let Some(after) = self.after_sequence {
            if entry.sequence_number <= after {
                return false;
            }
        }
        if let Some(types) = &self.entry_types {
            if !types.contains(&entry.entry_type) {
                return false;
            }
        }
        if let Some(since) = self.since {
            if entry.timestamp < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if entry.timestamp > until {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone)]
pub struct AuditPage {
    pub entries: Vec<AuditEntry>,
    /// Sequence to resume after, when more matching entries remain.
    pub next_cursor: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditCheckpoint {
    pub citizen_id: String,
    pub head_sequence: u64,
    pub head_hash: String,
    pub merkle_root: String,
}

#[derive(Debug)]
pub struct AuditTrail {
    storage: Arc<dyn Storage>,
    locks: KeyedLocks,
    heads: DashMap<String, (u64, String)>,
}

impl AuditTrail {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            locks: KeyedLocks::new(),
            heads: DashMap::new(),
        }
    }

    /// Current (sequence, hash) head for a citizen; caller holds the citizen lock.
    async fn head(&self, citizen_id: &str) -> Result<(u64, String), ConsentError> {
        if let Some(head) = self.heads.get(citizen_id) {
            return Ok(head.value().clone());
        }

        let head = match self.entries(citizen_id).await?.pop() {
            Some(last) => (last.sequence_number, last.entry_hash),
            None => (0, GENESIS_HASH.to_string()),
        };
        self.heads.insert(citizen_id.to_string(), head.clone());
        Ok(head)
    }

    /// Append an entry, assigning the next gap-free sequence for the citizen.
    pub async fn append(
        &self,
        citizen_id: &str,
        entry_type: AuditEntryType,
        actor_id: &str,
        payload: serde_json::Value,
    ) -> Result<AuditEntry, ConsentError> {
        validate_key_id("Citizen id", citizen_id)?;
        let _guard = self.locks.lock(citizen_id).await;
        let (sequence, prev_hash) = self.head(citizen_id).await?;

        let entry = AuditEntry::new(
            citizen_id.to_string(),
            sequence + 1,
            entry_type,
            actor_id.to_string(),
            payload,
            prev_hash,
            Utc::now(),
        );

        write_json(
            self.storage.as_ref(),
            &keys::audit_entry(citizen_id, entry.sequence_number),
            &entry,
        )
        .await?;
        self.heads.insert(
            citizen_id.to_string(),
            (entry.sequence_number, entry.entry_hash.clone()),
        );

        debug!("Appended audit entry for {}: {}", citizen_id, entry.summary());
        Ok(entry)
    }

    /// The citizen's chain in sequence order. Records under the citizen's
    /// prefix that belong to another citizen are not part of it.
    pub async fn entries(&self, citizen_id: &str) -> Result<Vec<AuditEntry>, ConsentError> {
        validate_key_id("Citizen id", citizen_id)?;
        let mut entries: Vec<AuditEntry> =
            scan_json(self.storage.as_ref(), &keys::audit_prefix(citizen_id)).await?;
        entries.retain(|e| e.citizen_id == citizen_id);
        Ok(entries)
    }

    pub async fn entry(&self, citizen_id: &str, sequence: u64) -> Result<AuditEntry, ConsentError> {
        validate_key_id("Citizen id", citizen_id)?;
        read_json::<AuditEntry>(self.storage.as_ref(), &keys::audit_entry(citizen_id, sequence))
            .await?
            .filter(|e| e.citizen_id == citizen_id)
            .ok_or_else(|| {
                ConsentError::NotFound(format!(
                    "Audit entry {} for citizen {}",
                    sequence, citizen_id
                ))
            })
    }

    /// Ascending by sequence.
    pub async fn query(&self, citizen_id: &str, filter: &AuditQuery) -> Result<AuditPage, ConsentError> {
        let mut matching = self
            .entries(citizen_id)
            .await?
            .into_iter()
            .filter(|entry| filter.matches(entry));

        let mut entries = Vec::new();
        let mut more = false;
        for entry in matching.by_ref() {
            if filter.limit.is_some_and(|limit| entries.len() >= limit) {
                more = true;
                break;
            }
            entries.push(entry);
        }

        let next_cursor = if more {
            entries.last().map(|e| e.sequence_number)
        } else {
            None
        };
        Ok(AuditPage {
            entries,
            next_cursor,
        })
    }

    pub async fn verify(&self, citizen_id: &str) -> Result<ChainVerification, ConsentError> {
        let entries = self.entries(citizen_id).await?;
        let result = verify_chain(&entries);
        match &result {
            ChainVerification::Intact { entries, .. } => {
                info!("Audit chain for {} intact ({} entries)", citizen_id, entries)
            }
            ChainVerification::Broken { at_sequence, reason } => error!(
                "AUDIT INTEGRITY VIOLATION for {} at sequence {}: {}",
                citizen_id, at_sequence, reason
            ),
        }
        Ok(result)
    }

    /// Like [`verify`](Self::verify) but a broken chain is an error.
    pub async fn verify_or_fail(&self, citizen_id: &str) -> Result<usize, ConsentError> {
        match self.verify(citizen_id).await? {
            ChainVerification::Intact { entries, .. } => Ok(entries),
            ChainVerification::Broken { at_sequence, .. } => Err(ConsentError::AuditIntegrityViolation {
                citizen_id: citizen_id.to_string(),
                sequence: at_sequence,
            }),
        }
    }

    /// Merkle checkpoint of the citizen's chain; refuses broken chains.
    pub async fn checkpoint(&self, citizen_id: &str) -> Result<AuditCheckpoint, ConsentError> {
        let entries = self.entries(citizen_id).await?;
        if let ChainVerification::Broken { at_sequence, .. } = verify_chain(&entries) {
            return Err(ConsentError::AuditIntegrityViolation {
                citizen_id: citizen_id.to_string(),
                sequence: at_sequence,
            });
        }
        let last = entries.last().ok_or_else(|| {
            ConsentError::NotFound(format!("No audit entries for citizen {}", citizen_id))
        })?;
        let merkle_root = audit_merkle_root(&entries).ok_or_else(|| {
            ConsentError::NotFound(format!("No audit entries for citizen {}", citizen_id))
        })?;

        Ok(AuditCheckpoint {
            citizen_id: citizen_id.to_string(),
            head_sequence: last.sequence_number,
            head_hash: last.entry_hash.clone(),
            merkle_root,
        })
    }

    /// Proof that the entry at `sequence` is under the citizen's current
    /// checkpoint root.
    pub async fn inclusion_proof(
        &self,
        citizen_id: &str,
        sequence: u64,
    ) -> Result<MerkleProof, ConsentError> {
        let entries = self.entries(citizen_id).await?;
        let leaves: Vec<String> = entries.iter().map(|e| e.entry_hash.clone()).collect();
        entries
            .iter()
            .position(|e| e.sequence_number == sequence)
            .and_then(|index| generate_merkle_proof(&leaves, index))
            .ok_or_else(|| {
                ConsentError::NotFound(format!(
                    "Audit entry {} for citizen {}",
                    sequence, citizen_id
                ))
            })
    }
}
