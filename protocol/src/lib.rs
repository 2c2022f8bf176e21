// Copyright (c) 2026 RegisTu contributors. MIT License.
// See LICENSE for details.

//! # RegisTu Protocol: Core Library
//!
//! A peer-to-peer ledger for academic credentials. Every node keeps a
//! proof-of-work chain of credential transactions and replicates four
//! things with its peers: pending transactions, the chain itself, the
//! Merkle tree of every sealed batch, and the registered user bundles.
//!
//! ## Architecture
//!
//! - **config**: Protocol constants, file layout names, `NodeConfig`.
//! - **crypto**: BLAKE3 hashing, proof-of-work and Merkle digests.
//! - **storage**: Blocks, the chain, Merkle artifacts and the data directory.
//! - **network**: The node actor, the miner, peers and the JSON-RPC layer.
//!
//! ## Design Philosophy
//!
//! 1. Peers are not trusted. Every block and every adopted chain is
//!    re-validated locally, and artifacts are checked before they are written.
//! 2. A peer that fails is dropped, not retried. The operation that noticed
//!    carries on with the rest of the mesh.
//! 3. Every reconciliation round terminates. Invitations only flow towards
//!    the side holding less.

pub mod config;
pub mod crypto;
pub mod network;
pub mod storage;

pub use config::NodeConfig;
pub use network::{Node, NodeError, NodeEvent, Peer, PeerHandle};
pub use storage::{Block, Chain, UserFiles};
