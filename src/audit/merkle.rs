//! Merkle Tree for Audit Checkpoints
//!
//! Condenses a citizen's audit chain into one root so a checkpoint can be
//! anchored to a ledger backend with a single submission.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::audit::entry::AuditEntry;
use crate::crypto::proof_digest;

// Leaves and interior nodes hash under different tags, so no interior
// node can be presented as a leaf.
const LEAF_TAG: &str = "leaf:";
const NODE_TAG: &str = "node:";

fn leaf_node(hash: &str) -> String {
    proof_digest(format!("{}{}", LEAF_TAG, hash).as_bytes())
}

fn combine(left: &str, right: &str) -> String {
    proof_digest(format!("{}{}|{}", NODE_TAG, left, right).as_bytes())
}

/// Next tree level; an odd trailing node is paired with itself.
fn next_level(level: &[String]) -> Vec<String> {
    level
        .chunks(2)
        .map(|pair| match pair {
            [left, right] => combine(left, right),
            [single] => combine(single, single),
            _ => unreachable!("chunks(2) yields one or two items"),
        })
        .collect()
}

/// Merkle root over the given leaf hashes, `None` when there are no leaves.
pub fn merkle_root(leaves: &[String]) -> Option<String> {
    if leaves.is_empty() {
        return None;
    }
    let mut level: Vec<String> = leaves.iter().map(|l| leaf_node(l)).collect();
    while level.len() > 1 {
        level = next_level(&level);
    }
    level.pop()
}

pub fn audit_merkle_root(entries: &[AuditEntry]) -> Option<String> {
    let leaves: Vec<String> = entries.iter().map(|e| e.entry_hash.clone()).collect();
    let root = merkle_root(&leaves);
    debug!("Merkle root over {} audit entries: {:?}", entries.len(), root);
    root
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

/// Inclusion proof: sibling node hashes from leaf to root, with the side each
/// sits on. `leaf_hash` is the untagged leaf as passed to [`merkle_root`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    pub leaf_hash: String,
    pub steps: Vec<(Side, String)>,
    pub root_hash: String,
}

impl MerkleProof {
    pub fn verify(&self) -> bool {
        let computed = self
            .steps
            .iter()
            .fold(leaf_node(&self.leaf_hash), |current, (side, sibling)| match side {
                Side::Left => combine(sibling, &current),
                Side::Right => combine(&current, sibling),
            });
        computed == self.root_hash
    }
}

pub fn generate_merkle_proof(leaves: &[String], index: usize) -> Option<MerkleProof> {
    if index >= leaves.len() {
        return None;
    }

    let mut steps = Vec::new();
    let mut level: Vec<String> = leaves.iter().map(|l| leaf_node(l)).collect();
    let mut position = index;

    while level.len() > 1 {
        let sibling_index = if position % 2 == 0 { position + 1 } else { position - 1 };
        // Odd trailing node is its own sibling.
        let sibling = level.get(sibling_index).unwrap_or(&level[position]).clone();
        let side = if position % 2 == 0 { Side::Right } else { Side::Left };
        steps.push((side, sibling));

        level = next_level(&level);
        position /= 2;
    }

    Some(MerkleProof {
        leaf_hash: leaves[index].clone(),
        steps,
        root_hash: level.pop()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaves(n: usize) -> Vec<String> {
        (0..n).map(|i| proof_digest(format!("leaf-{}", i).as_bytes())).collect()
    }

    #[test]
    fn test_single_leaf_root() {
        let l = leaves(1);
        assert_eq!(merkle_root(&l), Some(leaf_node(&l[0])));
        assert_ne!(merkle_root(&l), Some(l[0].clone()));
        assert_eq!(merkle_root(&[]), None);
    }

    #[test]
    fn test_interior_node_is_not_a_leaf() {
        let l = leaves(4);
        let root = merkle_root(&l).unwrap();
        // The two interior nodes of a four-leaf tree, offered as leaves.
        let lower: Vec<String> = vec![
            combine(&leaf_node(&l[0]), &leaf_node(&l[1])),
            combine(&leaf_node(&l[2]), &leaf_node(&l[3])),
        ];
        assert_eq!(combine(&lower[0], &lower[1]), root);
        assert_ne!(merkle_root(&lower).unwrap(), root);

        let untagged = proof_digest(format!("{}{}", l[0], l[1]).as_bytes());
        assert_ne!(merkle_root(&l[..2]).unwrap(), untagged);
    }

    #[test]
    fn test_root_changes_with_any_leaf() {
        let original = leaves(5);
        let root = merkle_root(&original).unwrap();
        for i in 0..5 {
            let mut changed = original.clone();
            changed[i] = proof_digest(b"other");
            assert_ne!(merkle_root(&changed).unwrap(), root);
        }
    }

    #[test]
    fn test_inclusion_proofs_verify_for_every_leaf() {
        for size in [1usize, 2, 3, 5, 8] {
            let l = leaves(size);
            let root = merkle_root(&l).unwrap();
            for i in 0..size {
                let proof = generate_merkle_proof(&l, i).unwrap();
                assert_eq!(proof.root_hash, root);
                assert!(proof.verify(), "leaf {} of {}", i, size);
            }
        }
        assert!(generate_merkle_proof(&leaves(3), 3).is_none());
    }

    #[test]
    fn test_forged_proof_fails() {
        let l = leaves(4);
        let mut proof = generate_merkle_proof(&l, 2).unwrap();
        proof.leaf_hash = proof_digest(b"forged");
        assert!(!proof.verify());
    }
}
