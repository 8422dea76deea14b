//! Zero-knowledge proof stub
//!
//! NOT a zero-knowledge proof and NOT cryptographically sound. The value is a
//! deterministic digest with the same external shape a real proof will have,
//! so callers holding a `ZkProof` do not change when a proving system lands.

use serde::{Deserialize, Serialize};

use super::proof_digest;

pub const STUB_PROOF_SYSTEM: &str = "stub-v1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZkProof {
    pub claim: String,
    pub commitment: String,
    pub proof: String,
    pub public_inputs: Vec<String>,
    pub proof_system: String,
    /// Always false for the stub.
    pub sound: bool,
}

fn stub_proof_value(claim: &str, commitment: &str) -> String {
    proof_digest(format!("zk-stub|{}|{}", claim, commitment).as_bytes())
}

pub(crate) fn generate(claim: &str, private_data: &[u8]) -> ZkProof {
    let mut committed = b"zk-commitment|".to_vec();
    committed.extend_from_slice(private_data);
    let commitment = proof_digest(&committed);
    let proof = stub_proof_value(claim, &commitment);

    ZkProof {
        claim: claim.to_string(),
        public_inputs: vec![claim.to_string(), commitment.clone()],
        commitment,
        proof,
        proof_system: STUB_PROOF_SYSTEM.to_string(),
        sound: false,
    }
}

/// Structural check of a stub proof against the claim it should prove.
pub fn verify_zk_proof_stub(proof: &ZkProof, claim: &str) -> bool {
    proof.claim == claim
        && proof.proof_system == STUB_PROOF_SYSTEM
        && proof.public_inputs == [claim.to_string(), proof.commitment.clone()]
        && proof.proof == stub_proof_value(claim, &proof.commitment)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stub_is_deterministic() {
        let a = generate("age_over_18", b"1990-04-01");
        let b = generate("age_over_18", b"1990-04-01");
        assert_eq!(a, b);
        assert!(!a.sound);
        assert_eq!(a.proof_system, "stub-v1");
    }

    #[test]
    fn test_verify_stub() {
        let proof = generate("income_above", b"1200000");
        assert!(verify_zk_proof_stub(&proof, "income_above"));
        assert!(!verify_zk_proof_stub(&proof, "is_citizen"));

        let mut forged = proof.clone();
        forged.commitment = "sha256:00".to_string();
        assert!(!verify_zk_proof_stub(&forged, "income_above"));
    }

    #[test]
    fn test_private_data_not_exposed() {
        let proof = generate("is_citizen", b"123456789012");
        let rendered = serde_json::to_string(&proof).unwrap();
        assert!(!rendered.contains("123456789012"));
    }
}
