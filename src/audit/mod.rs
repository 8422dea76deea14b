//! Audit Trail System
//!
//! Tamper-evident, per-citizen audit chains with Merkle checkpoints
//! that can be anchored to a ledger backend.

pub mod entry;
pub mod merkle;
pub mod trail;
pub mod verify;

pub use entry::{AuditEntry, AuditEntryType};
pub use merkle::{audit_merkle_root, generate_merkle_proof, merkle_root, MerkleProof};
pub use trail::{AuditCheckpoint, AuditPage, AuditQuery, AuditTrail};
pub use verify::{find_tampered_entries, verify_chain, ChainVerification};
