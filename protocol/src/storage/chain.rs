//! # Chain
//!
//! Ordered, append-only sequence of sealed blocks with persistence to a
//! single file.
//!
//! `Chain` itself is a plain value. Concurrent access goes through the
//! node's [`Snapshot`](crate::network::snapshot::Snapshot) container, which
//! runs each tip check and append as one step under its write lock.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::EMPTY_CHAIN_TIP;
use crate::storage::block::Block;
use crate::storage::files::write_atomically;

/// Errors raised by chain mutation and persistence.
#[derive(Debug, Error)]
pub enum ChainError {
    /// An equal block is already in the chain.
    #[error("duplicate block {0}")]
    DuplicateBlock(String),

    /// The block fails its own validity check.
    #[error("invalid block: {0}")]
    InvalidBlock(String),

    /// The block does not extend the current tip.
    #[error("block extends {found}, but the tip is {expected}")]
    ChainMismatch { expected: String, found: String },

    /// Reading or writing the chain file failed.
    #[error("chain file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The chain file does not decode.
    #[error("chain file {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },
}

// ---------------------------------------------------------------------------
// Chain
// ---------------------------------------------------------------------------

/// Ordered chain of sealed blocks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chain {
    blocks: Vec<Block>,
}

impl Chain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `block` after checking duplicates, validity and linkage,
    /// in that order.
    pub fn add(&mut self, block: Block) -> Result<(), ChainError> {
        if self.blocks.contains(&block) {
            return Err(ChainError::DuplicateBlock(block.hash().to_string()));
        }
        if !block.is_valid() {
            return Err(ChainError::InvalidBlock(format!(
                "hash or merkle root does not match contents of block {}",
                block.hash()
            )));
        }
        let tip = self.tip_hash();
        if block.previous_hash != tip {
            return Err(ChainError::ChainMismatch {
                expected: tip,
                found: block.previous_hash,
            });
        }
        self.blocks.push(block);
        Ok(())
    }

    /// Returns the latest block, if any.
    pub fn tip(&self) -> Option<&Block> {
        self.blocks.last()
    }

    /// Hash the next block must extend. The empty chain reports the
    /// fixed sentinel.
    pub fn tip_hash(&self) -> String {
        self.tip()
            .map(|b| b.hash().to_string())
            .unwrap_or_else(|| EMPTY_CHAIN_TIP.to_string())
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn contains(&self, block: &Block) -> bool {
        self.blocks.contains(block)
    }

    /// Every block valid and every adjacent pair linked, with the first
    /// block extending the sentinel.
    pub fn is_valid(&self) -> bool {
        let mut expected = EMPTY_CHAIN_TIP.to_string();
        for block in &self.blocks {
            if !block.is_valid() || block.previous_hash != expected {
                return false;
            }
            expected = block.hash().to_string();
        }
        true
    }

    /// True when every block's hash carries `difficulty` leading zeros.
    pub fn meets_difficulty(&self, difficulty: u32) -> bool {
        self.blocks.iter().all(|b| b.meets_difficulty(difficulty))
    }

    /// All transactions in chain order.
    pub fn transactions(&self) -> Vec<String> {
        self.blocks
            .iter()
            .flat_map(|b| b.transactions.iter().cloned())
            .collect()
    }

    pub fn contains_transaction(&self, tx: &str) -> bool {
        self.blocks
            .iter()
            .any(|b| b.transactions.iter().any(|t| t == tx))
    }

    // -- Persistence ------------------------------------------------------

    /// Writes the whole chain to `path` with bincode.
    pub fn save(&self, path: &Path) -> Result<(), ChainError> {
        let bytes = bincode::serialize(self).map_err(|e| ChainError::Corrupt {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        write_atomically(path, &bytes).map_err(|source| ChainError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Reads a chain written by [`Chain::save`].
    pub fn load(path: &Path) -> Result<Self, ChainError> {
        let bytes = fs::read(path).map_err(|source| ChainError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        bincode::deserialize(&bytes).map_err(|e| ChainError::Corrupt {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Startup variant of [`Chain::load`]: a missing or corrupt file yields
    /// an empty chain and a warning instead of an error.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(chain) => {
                info!(path = %path.display(), blocks = chain.len(), "chain restored");
                chain
            }
            Err(ChainError::Io { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
                info!(path = %path.display(), "no chain file, starting empty");
                Self::default()
            }
            Err(e) => {
                warn!(error = %e, "chain file unreadable, starting empty");
                Self::default()
            }
        }
    }
}
