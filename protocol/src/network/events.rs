//! # Node Events
//!
//! Best-effort notifications fired after each observable state change.
//! Delivered over a `tokio::sync::broadcast` channel: no backpressure, and a
//! subscriber that falls behind skips events rather than slowing the node.
//! The node binary forwards them to websocket clients and metrics.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Observable node activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeEvent {
    /// A peer joined this node's view.
    PeerConnected { address: String },
    /// A peer failed a call and was dropped from the view.
    PeerEvicted { address: String, reason: String },
    /// A new transaction entered the pending set.
    TransactionAdded { transaction: String },
    /// A transaction was offered again and ignored.
    DuplicateTransaction { transaction: String },
    /// Transactions left the pending set (consumed by a block).
    TransactionsRemoved { transactions: Vec<String> },
    /// A transaction sync round finished.
    TransactionsSynced { pending: usize },
    /// The chain grew or was replaced.
    ChainUpdated { length: usize, tip: String },
    /// A proof-of-work search began.
    MiningStarted { data: String, difficulty: u32 },
    /// The local search was stopped with `nonce`.
    MiningStopped { nonce: u64 },
    /// This node found a nonce itself.
    NonceFound { data: String, nonce: u64 },
    /// The known-user set changed.
    UsersUpdated { count: usize },
    /// The known-artifact set changed.
    MerklesUpdated { count: usize },
    /// Free-form informational message.
    Message { title: String, body: String },
    /// A background operation failed.
    Error { context: String, message: String },
}

/// Sending half of the event stream, owned by the node.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<NodeEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Fires `event`. Having no subscribers is not an error.
    pub fn emit(&self, event: NodeEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.sender.subscribe()
    }
}
