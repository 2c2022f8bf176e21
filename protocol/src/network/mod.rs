//! # Network Module
//!
//! The node actor and everything it needs to talk to peers: the cancellable
//! miner, the peer abstraction, reconciliation of transactions, chains,
//! Merkle artifacts and users, and the JSON-RPC wire layer.
//!
//! ## Architecture
//!
//! ```text
//! node.rs     : Node actor: transactions, mining coordination, chain sync
//! reconcile.rs: Two-phase Merkle/user reconciliation over a Catalog
//! miner.rs    : Single-slot cancellable proof-of-work search
//! peer.rs     : Peer trait, sync reports, address connectors
//! snapshot.rs : Copy-on-write state cells
//! events.rs   : Broadcast stream of node activity
//! rpc.rs      : JSON-RPC method and payload definitions
//! dispatch.rs : Request → Node operation (server side)
//! client.rs   : RemotePeer over reqwest (client side)
//! ```
//!
//! ## Design Decisions
//!
//! - Relay and sync logic is written once against `PeerHandle`, so an
//!   in-process mesh and an HTTP mesh run the same code.
//! - Mining runs on a dedicated OS thread. The search is CPU-bound and
//!   would starve the async runtime.
//! - The RPC layer stays transport-agnostic. HTTP serving happens in the
//!   node binary via axum.

pub mod client;
pub mod dispatch;
pub mod events;
pub mod miner;
pub mod node;
pub mod peer;
pub mod reconcile;
pub mod rpc;
pub mod snapshot;

pub use client::{HttpConnector, RemotePeer};
pub use dispatch::{dispatch, parse_request};
pub use events::{EventBus, NodeEvent};
pub use miner::{Miner, MinerError, MiningJob, MiningOutcome, MiningTicket};
pub use node::{Node, NodeError, NodeStatus};
pub use peer::{Peer, PeerConnector, PeerDirectory, PeerHandle, SyncOutcome, SyncReport};
pub use rpc::{RpcError, RpcMethod, RpcRequest, RpcResponse};
pub use snapshot::Snapshot;
