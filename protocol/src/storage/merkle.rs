//! # Merkle Artifact
//!
//! A binary Merkle tree over one transaction batch. The root digest seals
//! the batch into a block header and also names the persisted artifact, so
//! any node can fetch or verify a batch's tree by its root alone.
//!
//! ```text
//! level 2:              root
//!                     /      \
//! level 1:        h(ab)      c        <- odd node promoted unchanged
//!                 /   \      |
//! level 0:      a      b     c        <- hex(BLAKE3(tx))
//! ```
//!
//! The whole level structure is stored, not just the root. Artifacts are
//! encoded with bincode.

use serde::{Deserialize, Serialize};

use crate::crypto::hash::{blake3_hex, merkle_parent};

/// Binary Merkle tree kept level by level, leaves first.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleTree {
    levels: Vec<Vec<String>>,
}

impl MerkleTree {
    /// Builds the tree over `transactions` in order.
    ///
    /// An empty batch yields a single-node tree whose root is the digest of
    /// the empty string.
    pub fn build(transactions: &[String]) -> Self {
        if transactions.is_empty() {
            return Self {
                levels: vec![vec![blake3_hex(b"")]],
            };
        }

        let mut levels = vec![transactions
            .iter()
            .map(|tx| blake3_hex(tx.as_bytes()))
            .collect::<Vec<_>>()];

        while let Some(level) = levels.last().filter(|level| level.len() > 1) {
            let next = Self::parent_level(level);
            levels.push(next);
        }

        Self { levels }
    }

    fn parent_level(level: &[String]) -> Vec<String> {
        level
            .chunks(2)
            .map(|pair| match pair {
                [left, right] => merkle_parent(left, right),
                _ => pair[0].clone(),
            })
            .collect()
    }

    /// Root digest of the tree.
    pub fn root(&self) -> &str {
        self.levels
            .last()
            .and_then(|level| level.first())
            .map(String::as_str)
            .unwrap_or_default()
    }

    /// Leaf digests, one per transaction.
    pub fn leaves(&self) -> &[String] {
        self.levels.first().map(Vec::as_slice).unwrap_or_default()
    }

    /// Number of levels including leaves and root.
    fn depth(&self) -> usize {
        self.levels.len()
    }

    /// Recomputes every parent from the leaves and checks the stored levels.
    pub fn verify(&self) -> bool {
        let Some(leaves) = self.levels.first() else {
            return false;
        };
        let mut expected = leaves.clone();
        for stored in &self.levels[1..] {
            expected = Self::parent_level(&expected);
            if &expected != stored {
                return false;
            }
        }
        self.levels.last().map_or(false, |top| top.len() == 1)
    }

    /// True when the leaves match `transactions` exactly and in order.
    pub fn matches(&self, transactions: &[String]) -> bool {
        if transactions.is_empty() {
            return self.depth() == 1 && self.root() == blake3_hex(b"");
        }
        self.leaves().len() == transactions.len()
            && self
                .leaves()
                .iter()
                .zip(transactions)
                .all(|(leaf, tx)| *leaf == blake3_hex(tx.as_bytes()))
    }

    /// Bincode encoding used for the on-disk artifact.
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Decodes an artifact produced by [`MerkleTree::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn txs(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn empty_batch_root_is_digest_of_nothing() {
        let tree = MerkleTree::build(&[]);
        assert_eq!(tree.root(), blake3_hex(b""));
        assert!(tree.verify());
        assert!(tree.matches(&[]));
    }

    #[test]
    fn single_leaf_is_root() {
        let tree = MerkleTree::build(&txs(&["only"]));
        assert_eq!(tree.root(), blake3_hex(b"only"));
        assert_eq!(tree.depth(), 1);
    }

    #[test]
    fn two_leaves_hash_concatenated_hex() {
        let tree = MerkleTree::build(&txs(&["a", "b"]));
        let expected = merkle_parent(&blake3_hex(b"a"), &blake3_hex(b"b"));
        assert_eq!(tree.root(), expected);
    }

    #[test]
    fn odd_node_is_promoted_unchanged() {
        let tree = MerkleTree::build(&txs(&["a", "b", "c"]));
        let ab = merkle_parent(&blake3_hex(b"a"), &blake3_hex(b"b"));
        let c = blake3_hex(b"c");
        assert_eq!(tree.levels[1], vec![ab.clone(), c.clone()]);
        assert_eq!(tree.root(), merkle_parent(&ab, &c));
        assert!(tree.verify());
    }

    #[test]
    fn order_changes_root() {
        let forward = MerkleTree::build(&txs(&["a", "b"]));
        let backward = MerkleTree::build(&txs(&["b", "a"]));
        assert_ne!(forward.root(), backward.root());
    }

    #[test]
    fn tampered_level_fails_verification() {
        let mut tree = MerkleTree::build(&txs(&["a", "b", "c", "d"]));
        tree.levels[1][0] = blake3_hex(b"forged");
        assert!(!tree.verify());
    }

    #[test]
    fn artifact_bytes_decode_to_same_tree() {
        let tree = MerkleTree::build(&txs(&["w", "x", "y", "z"]));
        let decoded = MerkleTree::from_bytes(&tree.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, tree);
        assert!(decoded.matches(&txs(&["w", "x", "y", "z"])));
        assert!(!decoded.matches(&txs(&["w", "x", "y"])));
    }
}
