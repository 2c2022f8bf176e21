//! # Peer Interface
//!
//! The operation set every node exposes to its peers. A [`Node`] implements
//! it directly for in-process meshes; [`RemotePeer`] implements it over
//! HTTP JSON-RPC. Protocol code only ever talks to `PeerHandle`s, so the
//! same relay and reconciliation logic runs over either.
//!
//! ## Peer arguments on the wire
//!
//! Several operations take a peer (`add_node`, the `synchronize_*` family).
//! On the wire a peer is its address. The receiving side turns it back into
//! a handle through its [`PeerConnector`].
//!
//! [`Node`]: crate::network::node::Node
//! [`RemotePeer`]: crate::network::client::RemotePeer

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::network::node::NodeError;
use crate::storage::{Block, Chain, UserFiles};

/// Shared handle on a peer.
pub type PeerHandle = Arc<dyn Peer>;

// ---------------------------------------------------------------------------
// Reconciliation Reports
// ---------------------------------------------------------------------------

/// How a reconciliation round ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    /// Both sides were empty.
    #[default]
    NothingToShare,
    /// Both sides already held the same set.
    AlreadyEqual,
    /// The peer held nothing new; it was asked to pull from us instead.
    PeerInvited,
    /// Items the peer held were pulled into the local set.
    Pulled,
}

/// Result of one reconciliation call.
///
/// `failed` lists ids whose fetch or write failed. A non-empty `failed`
/// means a retry can still make progress.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub outcome: SyncOutcome,
    pub fetched: Vec<String>,
    pub failed: Vec<String>,
}

impl SyncReport {
    pub fn with_outcome(outcome: SyncOutcome) -> Self {
        Self {
            outcome,
            ..Self::default()
        }
    }

    /// True when nothing was missing and nothing failed.
    pub fn is_converged(&self) -> bool {
        self.failed.is_empty()
            && matches!(
                self.outcome,
                SyncOutcome::NothingToShare | SyncOutcome::AlreadyEqual
            )
    }
}

// ---------------------------------------------------------------------------
// Peer Trait
// ---------------------------------------------------------------------------

/// Every operation a node serves to its peers.
#[async_trait]
pub trait Peer: Send + Sync {
    /// Address this handle points at. No I/O.
    fn address(&self) -> &str;

    /// Liveness probe: the address the peer reports for itself.
    async fn get_address(&self) -> Result<String, NodeError>;
    async fn get_network(&self) -> Result<Vec<String>, NodeError>;
    async fn add_node(&self, peer: PeerHandle) -> Result<(), NodeError>;

    async fn add_transaction(&self, transaction: String) -> Result<(), NodeError>;
    async fn get_transactions(&self) -> Result<Vec<String>, NodeError>;
    async fn get_transactions_size(&self) -> Result<usize, NodeError>;
    async fn remove_transactions(&self, transactions: Vec<String>) -> Result<(), NodeError>;
    async fn synchronize_transactions(&self, peer: PeerHandle) -> Result<SyncReport, NodeError>;
    /// One-way merge of `transactions` into the pending set. Returns the
    /// resulting size. Never calls back out.
    async fn offer_transactions(&self, transactions: Vec<String>) -> Result<usize, NodeError>;

    async fn start_mining(&self, data: String, difficulty: u32) -> Result<(), NodeError>;
    async fn stop_mining(&self, nonce: u64) -> Result<(), NodeError>;
    async fn is_mining(&self) -> Result<bool, NodeError>;
    async fn mine(&self, data: String, difficulty: u32) -> Result<u64, NodeError>;

    async fn add_block(&self, block: Block) -> Result<(), NodeError>;
    async fn get_blockchain(&self) -> Result<Chain, NodeError>;
    async fn get_blockchain_size(&self) -> Result<usize, NodeError>;
    async fn get_blockchain_last_hash(&self) -> Result<String, NodeError>;
    async fn get_blockchain_transactions(&self) -> Result<Vec<String>, NodeError>;
    /// Adopts a longer valid chain from any peer. Returns whether the local
    /// chain was replaced.
    async fn synchronize_blockchain(&self) -> Result<bool, NodeError>;

    async fn get_merkle_list(&self) -> Result<BTreeSet<String>, NodeError>;
    async fn get_mkt_file(&self, root: String) -> Result<Vec<u8>, NodeError>;
    async fn synchronize_merkles(&self, peer: PeerHandle) -> Result<SyncReport, NodeError>;

    async fn get_user_list(&self) -> Result<BTreeSet<String>, NodeError>;
    async fn get_user_files(&self, username: String) -> Result<UserFiles, NodeError>;
    async fn synchronize_users(&self, peer: PeerHandle) -> Result<SyncReport, NodeError>;
    async fn register_user(&self, username: String, files: UserFiles) -> Result<(), NodeError>;
}

impl fmt::Debug for dyn Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peer").field("address", &self.address()).finish()
    }
}

// ---------------------------------------------------------------------------
// Connectors
// ---------------------------------------------------------------------------

/// Resolves a peer address received on the wire into a callable handle.
pub trait PeerConnector: Send + Sync {
    fn connect(&self, address: &str) -> Result<PeerHandle, NodeError>;
}

/// In-memory address book. Used to run meshes inside one process and to
/// exercise RPC dispatch without sockets.
#[derive(Default)]
pub struct PeerDirectory {
    peers: RwLock<HashMap<String, PeerHandle>>,
}

impl PeerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `peer` reachable by its address.
    pub fn register(&self, peer: PeerHandle) {
        self.peers.write().insert(peer.address().to_string(), peer);
    }

    pub fn unregister(&self, address: &str) -> Option<PeerHandle> {
        self.peers.write().remove(address)
    }
}

impl PeerConnector for PeerDirectory {
    fn connect(&self, address: &str) -> Result<PeerHandle, NodeError> {
        self.peers
            .read()
            .get(address)
            .cloned()
            .ok_or_else(|| NodeError::PeerUnreachable {
                address: address.to_string(),
                reason: "not in directory".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converged_only_without_gaps() {
        assert!(SyncReport::with_outcome(SyncOutcome::AlreadyEqual).is_converged());
        assert!(SyncReport::default().is_converged());
        assert!(!SyncReport::with_outcome(SyncOutcome::Pulled).is_converged());

        let report = SyncReport {
            outcome: SyncOutcome::AlreadyEqual,
            fetched: vec![],
            failed: vec!["abc".into()],
        };
        assert!(!report.is_converged());
    }

    #[test]
    fn unknown_address_is_unreachable() {
        let directory = PeerDirectory::new();
        match directory.connect("http://nowhere") {
            Err(NodeError::PeerUnreachable { address, .. }) => assert_eq!(address, "http://nowhere"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn outcome_wire_names() {
        assert_eq!(
            serde_json::to_string(&SyncOutcome::PeerInvited).unwrap(),
            "\"peer_invited\""
        );
    }
}
