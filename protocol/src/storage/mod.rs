//! # Storage Module
//!
//! The ledger's data structures and their on-disk layout.
//!
//! ## Architecture
//!
//! ```text
//! merkle.rs: Merkle tree over a transaction batch (the persisted artifact)
//! block.rs : Block structure, sealing and validation
//! chain.rs : Append-only chain with linkage checks and whole-file persistence
//! files.rs : Data directory layout: chain file, mktrees/, users/
//! ```
//!
//! ## Layout
//!
//! ```text
//! <data>/bchain.bc                 whole chain, bincode
//! <data>/mktrees/<root>.mkt        one Merkle tree per sealed batch
//! <data>/users/<name>/<name>.pubk  public key
//!                       .privk     encrypted private key
//!                       .simk      encrypted symmetric key
//!                       .props     encrypted properties
//! ```
//!
//! ## Design Decisions
//!
//! 1. **BLAKE3 for everything.** Block hashes and Merkle nodes are BLAKE3,
//!    hex-encoded. Proof of work counts leading `'0'` hex characters.
//!
//! 2. **Bincode for on-disk serialization.** Compact and deterministic.
//!    JSON is for the RPC wire; bincode is for files.
//!
//! 3. **Write-then-rename.** Every file is written to a temporary sibling
//!    and renamed into place, so a crash never leaves a torn chain file.

pub mod block;
pub mod chain;
pub mod files;
pub mod merkle;

pub use block::{Block, BlockError};
pub use chain::{Chain, ChainError};
pub use files::{FileStore, StoreError, UserFiles};
pub use merkle::MerkleTree;
