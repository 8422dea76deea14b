//! Crypto Engine
//!
//! Field-level authenticated encryption, purpose-specific hashing and the
//! zero-knowledge proof placeholder. Nothing else in the crate touches key
//! material or digest primitives directly.

pub mod engine;
pub mod zk;

pub use engine::{CryptoEngine, FieldDigest, HashPurpose};
pub use zk::{verify_zk_proof_stub, ZkProof};

use sha2::{Digest, Sha256};

/// All-zero digest used as the predecessor of the first entry in a chain.
pub const GENESIS_HASH: &str =
    "sha256:0000000000000000000000000000000000000000000000000000000000000000";

/// Fast, collision-resistant, publicly recomputable digest.
pub fn proof_digest(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proof_digest_format() {
        let digest = proof_digest(b"record");
        assert!(digest.starts_with("sha256:"));
        assert_eq!(digest.len(), 71);
        assert_eq!(digest, proof_digest(b"record"));
        assert_ne!(digest, proof_digest(b"record2"));
    }
}
