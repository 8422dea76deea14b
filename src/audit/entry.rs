//! Audit Entry
//!
//! Defines the structure for tamper-evident audit entries with
//! per-citizen cryptographic hash chains.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::crypto::proof_digest;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEntryType {
    GrantIssued,
    GrantRevoked,
    AccessDecision,
    ProofAccessDecision,
    RecordWritten,
    RecordRead,
    ProofSubmitted,
    ProofDegraded,
    DomainEvent,
}

impl AuditEntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEntryType::GrantIssued => "grant_issued",
            AuditEntryType::GrantRevoked => "grant_revoked",
            AuditEntryType::AccessDecision => "access_decision",
            AuditEntryType::ProofAccessDecision => "proof_access_decision",
            AuditEntryType::RecordWritten => "record_written",
            AuditEntryType::RecordRead => "record_read",
            AuditEntryType::ProofSubmitted => "proof_submitted",
            AuditEntryType::ProofDegraded => "proof_degraded",
            AuditEntryType::DomainEvent => "domain_event",
        }
    }
}

impl fmt::Display for AuditEntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audit entry with cryptographic hash chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub citizen_id: String,
    pub sequence_number: u64,
    pub entry_type: AuditEntryType,
    pub actor_id: String,
    pub timestamp: DateTime<Utc>,
    /// Non-sensitive summary of the event; never raw citizen data.
    pub payload: serde_json::Value,
    pub payload_hash: String,
    pub prev_hash: String,
    pub entry_hash: String,
}

impl AuditEntry {
    pub fn new(
        citizen_id: String,
        sequence_number: u64,
        entry_type: AuditEntryType,
        actor_id: String,
        payload: serde_json::Value,
        prev_hash: String,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let payload_hash = Self::calculate_payload_hash(&payload);
        let mut entry = Self {
            citizen_id,
            sequence_number,
            entry_type,
            actor_id,
            timestamp,
            payload,
            payload_hash,
            prev_hash,
            entry_hash: String::new(),
        };
        entry.entry_hash = entry.calculate_hash();
        entry
    }

    /// Create canonical string representation for hashing
    pub fn canonical_string(&self) -> String {
        format!(
            "citizen_id:{}|sequence:{}|entry_type:{}|actor_id:{}|timestamp:{}|payload_hash:{}|prev_hash:{}",
            self.citizen_id,
            self.sequence_number,
            self.entry_type,
            self.actor_id,
            self.timestamp.to_rfc3339(),
            self.payload_hash,
            self.prev_hash
        )
    }

    pub fn calculate_hash(&self) -> String {
        proof_digest(self.canonical_string().as_bytes())
    }

    /// serde_json maps are ordered, so the encoding is canonical.
    pub fn calculate_payload_hash(payload: &serde_json::Value) -> String {
        proof_digest(payload.to_string().as_bytes())
    }

    pub fn verify_hash(&self) -> bool {
        self.entry_hash == self.calculate_hash()
    }

    pub fn verify_payload(&self) -> bool {
        self.payload_hash == Self::calculate_payload_hash(&self.payload)
    }

    pub fn summary(&self) -> String {
        format!(
            "#{} {} by {} ({})",
            self.sequence_number, self.entry_type, self.actor_id, self.entry_hash
        )
    }
}
