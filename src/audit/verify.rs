//! Audit Chain Verification
//!
//! Recomputes a citizen's hash chain end to end and reports the first
//! sequence number at which it no longer holds.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::audit::entry::AuditEntry;
use crate::crypto::GENESIS_HASH;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ChainVerification {
    Intact { entries: usize, head_hash: String },
    Broken { at_sequence: u64, reason: String },
}

impl ChainVerification {
    pub fn is_intact(&self) -> bool {
        matches!(self, ChainVerification::Intact { .. })
    }

    pub fn broken_at(&self) -> Option<u64> {
        match self {
            ChainVerification::Broken { at_sequence, .. } => Some(*at_sequence),
            ChainVerification::Intact { .. } => None,
        }
    }

    pub fn summary(&self) -> String {
        match self {
            ChainVerification::Intact { entries, head_hash } => {
                format!("Audit chain intact ({} entries, head {})", entries, head_hash)
            }
            ChainVerification::Broken { at_sequence, reason } => {
                format!("Audit chain broken at sequence {}: {}", at_sequence, reason)
            }
        }
    }
}

/// Verify a single citizen's entries, which must be in ascending sequence order.
pub fn verify_chain(entries: &[AuditEntry]) -> ChainVerification {
    let mut expected_sequence = 1u64;
    let mut prev_hash = GENESIS_HASH.to_string();
    let citizen_id = entries.first().map(|e| e.citizen_id.clone());

    for entry in entries {
        let at_sequence = entry.sequence_number;

        if entry.sequence_number != expected_sequence {
            return ChainVerification::Broken {
                at_sequence: expected_sequence,
                reason: format!(
                    "expected sequence {}, found {}",
                    expected_sequence, entry.sequence_number
                ),
            };
        }

        if Some(&entry.citizen_id) != citizen_id.as_ref() {
            return ChainVerification::Broken {
                at_sequence,
                reason: format!("entry belongs to citizen {}", entry.citizen_id),
            };
        }

        if !entry.verify_payload() {
            return ChainVerification::Broken {
                at_sequence,
                reason: "payload hash does not match payload".to_string(),
            };
        }

        if !entry.verify_hash() {
            return ChainVerification::Broken {
                at_sequence,
                reason: "entry hash does not match entry contents".to_string(),
            };
        }

        if entry.prev_hash != prev_hash {
            return ChainVerification::Broken {
                at_sequence,
                reason: format!("expected prev_hash {}, got {}", prev_hash, entry.prev_hash),
            };
        }

        debug!("Verified audit entry {}", entry.summary());
        prev_hash = entry.entry_hash.clone();
        expected_sequence += 1;
    }

    info!("Audit chain verification successful: {} entries", entries.len());
    ChainVerification::Intact {
        entries: entries.len(),
        head_hash: prev_hash,
    }
}

/// Sequence numbers of entries whose own hashes no longer match their contents.
pub fn find_tampered_entries(entries: &[AuditEntry]) -> Vec<u64> {
    entries
        .iter()
        .filter(|entry| !entry.verify_payload() || !entry.verify_hash())
        .map(|entry| entry.sequence_number)
        .collect()
}
