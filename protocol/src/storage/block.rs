//! # Block Structure
//!
//! A block seals one batch of credential transactions with a proof of work.
//!
//! ## Block Layout
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │  previous_hash: String   (tip it extends)   │
//! │  merkle_root:   String   (batch digest)     │
//! │  nonce:         Option<u64>                 │
//! │  current_hash:  Option<String>              │
//! ├─────────────────────────────────────────────┤
//! │  transactions: Vec<String>                  │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## Hash Computation
//!
//! `current_hash = pow_hash(previous_hash ++ merkle_root, nonce)`. The
//! transactions enter the hash only through `merkle_root`, which
//! [`Block::is_valid`] recomputes, so editing any field after sealing is
//! detected.
//!
//! A freshly assembled block is unsealed: `nonce` and `current_hash` stay
//! `None` until [`Block::set_nonce`] accepts a proof.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::hash::{meets_difficulty, pow_hash};
use crate::storage::files::{FileStore, StoreError};
use crate::storage::merkle::MerkleTree;

/// Errors raised while sealing a block.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BlockError {
    /// The proof does not carry the required zero prefix.
    #[error("nonce {nonce} does not satisfy difficulty {difficulty} (hash {hash})")]
    InvalidNonce {
        nonce: u64,
        difficulty: u32,
        hash: String,
    },
}

// ---------------------------------------------------------------------------
// Block
// ---------------------------------------------------------------------------

/// A batch of transactions linked to its predecessor by hash.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub previous_hash: String,
    pub merkle_root: String,
    pub transactions: Vec<String>,
    pub nonce: Option<u64>,
    pub current_hash: Option<String>,
}

impl Block {
    /// Unsealed block over `transactions`, extending `previous_hash`.
    ///
    /// Computes the Merkle root but does not persist the artifact; see
    /// [`Block::assemble`] for the variant that does.
    pub fn new(previous_hash: impl Into<String>, transactions: Vec<String>) -> Self {
        let tree = MerkleTree::build(&transactions);
        Self::from_tree(previous_hash.into(), transactions, &tree)
    }

    /// Unsealed block whose Merkle artifact is written to `store` first.
    pub fn assemble(
        previous_hash: impl Into<String>,
        transactions: Vec<String>,
        store: &FileStore,
    ) -> Result<Self, StoreError> {
        let tree = MerkleTree::build(&transactions);
        store.save_merkle_tree(&tree)?;
        Ok(Self::from_tree(previous_hash.into(), transactions, &tree))
    }

    fn from_tree(previous_hash: String, transactions: Vec<String>, tree: &MerkleTree) -> Self {
        Self {
            previous_hash,
            merkle_root: tree.root().to_string(),
            transactions,
            nonce: None,
            current_hash: None,
        }
    }

    /// The string the proof of work is computed over.
    pub fn miner_data(&self) -> String {
        format!("{}{}", self.previous_hash, self.merkle_root)
    }

    /// Hash this block would have with `nonce`.
    pub fn hash_with(&self, nonce: u64) -> String {
        pow_hash(&self.miner_data(), nonce)
    }

    /// Seals the block if `nonce` satisfies `difficulty`.
    ///
    /// On failure the block is left untouched.
    pub fn set_nonce(&mut self, nonce: u64, difficulty: u32) -> Result<(), BlockError> {
        let hash = self.hash_with(nonce);
        if !meets_difficulty(&hash, difficulty) {
            return Err(BlockError::InvalidNonce {
                nonce,
                difficulty,
                hash,
            });
        }
        self.nonce = Some(nonce);
        self.current_hash = Some(hash);
        Ok(())
    }

    pub fn is_sealed(&self) -> bool {
        self.nonce.is_some() && self.current_hash.is_some()
    }

    /// Sealed hash, or an empty string for an unsealed block.
    pub fn hash(&self) -> &str {
        self.current_hash.as_deref().unwrap_or_default()
    }

    /// Recomputes the Merkle root and the block hash from stored fields.
    ///
    /// Unsealed blocks are never valid.
    pub fn is_valid(&self) -> bool {
        let (Some(nonce), Some(current)) = (self.nonce, self.current_hash.as_deref()) else {
            return false;
        };
        MerkleTree::build(&self.transactions).root() == self.merkle_root
            && self.hash_with(nonce) == current
    }

    /// True when the sealed hash carries `difficulty` leading zeros.
    pub fn meets_difficulty(&self, difficulty: u32) -> bool {
        self.current_hash
            .as_deref()
            .map_or(false, |hash| meets_difficulty(hash, difficulty))
    }
}

/// Blocks compare on their header only: two blocks with the same nonce,
/// link, root and hash are the same block.
impl PartialEq for Block {
    fn eq(&self, other: &Self) -> bool {
        self.nonce == other.nonce
            && self.previous_hash == other.previous_hash
            && self.merkle_root == other.merkle_root
            && self.current_hash == other.current_hash
    }
}

impl Eq for Block {}
