//! # Ledger Node
//!
//! The peer actor. A `Node` owns the local chain, the miner, the pending
//! transaction set, the known-artifact and known-user sets, and its view of
//! peers. Inbound peer calls, mining searches and block assembly tasks all
//! run against it concurrently.
//!
//! ```text
//!              add_transaction ──▶ pending ──(≥ batch)──▶ assembly task
//!                     │                                     │
//!          relay to every peer                   Block::assemble ─▶ mktrees/
//!                                                           │
//!                                              remove_transactions (relay)
//!                                                           │
//!                                              mine ─▶ set_nonce ─▶ add_block
//!                                                                      │
//!                                                    relay to lagging peers
//! ```
//!
//! ## Design Decisions
//!
//! - Every replicated collection lives in a [`Snapshot`]. Relay loops
//!   iterate a snapshot with no lock held; each membership check and the
//!   mutation it guards run inside one `update` closure.
//! - No lock is ever held across an `.await`. Peer calls may re-enter this
//!   node (a relayed transaction comes straight back), so holding one
//!   would deadlock the mesh.
//! - Peer failures never fail the operation that triggered them. An
//!   unreachable peer is evicted from the view; any other error is logged.
//! - Local block sealing is serialized by an async mutex, so two assembly
//!   tasks never build on the same tip.
//! - Merkle and user reconciliation live in `reconcile.rs`.

use std::collections::{BTreeSet, HashSet, VecDeque};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use crate::config::{NodeConfig, ASSEMBLY_RETRY_DELAY, MAX_DIFFICULTY, MAX_SEAL_ATTEMPTS};
use crate::network::client::HttpConnector;
use crate::network::events::{EventBus, NodeEvent};
use crate::network::miner::{Miner, MinerError, MiningOutcome, MiningTicket};
use crate::network::peer::{Peer, PeerConnector, PeerHandle, SyncOutcome, SyncReport};
use crate::network::snapshot::Snapshot;
use crate::storage::{Block, BlockError, Chain, ChainError, FileStore, StoreError, UserFiles};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors returned by node operations, locally or from a peer.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Block(#[from] BlockError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Miner(#[from] MinerError),

    /// The transport could not reach the peer or could not decode its reply.
    #[error("peer {address} unreachable: {reason}")]
    PeerUnreachable { address: String, reason: String },

    /// The peer answered with an error.
    #[error("peer {address} returned error {code}: {message}")]
    Remote {
        address: String,
        code: i32,
        message: String,
    },

    /// Malformed request parameters or an unencodable result.
    #[error("codec error: {0}")]
    Codec(String),

    /// The outbound HTTP client could not be built.
    #[error("transport setup failed: {0}")]
    Transport(String),

    /// The node is being dropped and cannot hand out a handle to itself.
    #[error("node is shutting down")]
    ShuttingDown,
}

impl NodeError {
    /// True for transport failures, which evict the peer.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, NodeError::PeerUnreachable { .. })
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Point-in-time summary served by `/status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub address: String,
    pub chain_length: usize,
    pub tip: String,
    pub pending: usize,
    pub peers: Vec<String>,
    pub mining: bool,
    pub difficulty: u32,
    pub known_merkles: usize,
    pub known_users: usize,
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// A ledger node.
pub struct Node {
    config: NodeConfig,
    store: FileStore,
    miner: Miner,
    chain: Snapshot<Chain>,
    pending: Snapshot<Vec<String>>,
    peers: Snapshot<Vec<PeerHandle>>,
    merkles: Snapshot<BTreeSet<String>>,
    users: Snapshot<BTreeSet<String>>,
    events: EventBus,
    connector: Arc<dyn PeerConnector>,
    sealing: Mutex<()>,
    this: Weak<Node>,
}

impl Node {
    /// Opens a node that reaches peers over HTTP JSON-RPC.
    pub fn open(config: NodeConfig) -> Result<Arc<Self>, NodeError> {
        let connector = Arc::new(HttpConnector::new(config.rpc_timeout)?);
        Self::with_connector(config, connector)
    }

    /// Opens a node with a custom way of resolving peer addresses.
    ///
    /// Restores the chain, known artifacts and known users from
    /// `config.data_dir`. A missing or unreadable chain file starts an empty
    /// chain; an unreadable directory listing starts an empty known-set.
    pub fn with_connector(
        config: NodeConfig,
        connector: Arc<dyn PeerConnector>,
    ) -> Result<Arc<Self>, NodeError> {
        let store = FileStore::open(&config.data_dir)?;
        let chain = Chain::load_or_default(&store.chain_path());
        let merkles = store.list_merkle_roots().unwrap_or_else(|e| {
            warn!(error = %e, "could not list merkle artifacts");
            BTreeSet::new()
        });
        let users = store.list_users().unwrap_or_else(|e| {
            warn!(error = %e, "could not list users");
            BTreeSet::new()
        });

        info!(
            address = %config.address,
            blocks = chain.len(),
            merkles = merkles.len(),
            users = users.len(),
            difficulty = config.difficulty,
            "node opened"
        );

        Ok(Arc::new_cyclic(|this| Self {
            events: EventBus::new(config.event_capacity),
            config,
            store,
            miner: Miner::new(),
            chain: Snapshot::new(chain),
            pending: Snapshot::new(Vec::new()),
            peers: Snapshot::new(Vec::new()),
            merkles: Snapshot::new(merkles),
            users: Snapshot::new(users),
            connector,
            sealing: Mutex::new(()),
            this: this.clone(),
        }))
    }

    // -- Accessors ----------------------------------------------------------

    pub fn address(&self) -> &str {
        &self.config.address
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.events.subscribe()
    }

    /// Resolves an address received on the wire into a peer handle.
    pub fn connect(&self, address: &str) -> Result<PeerHandle, NodeError> {
        self.connector.connect(address)
    }

    /// Addresses of every known peer.
    pub fn network(&self) -> Vec<String> {
        self.peers.load().iter().map(|p| p.address().to_string()).collect()
    }

    /// Pending transactions, oldest first.
    pub fn transactions(&self) -> Vec<String> {
        self.pending.load().to_vec()
    }

    pub fn transactions_size(&self) -> usize {
        self.pending.load().len()
    }

    pub fn is_mining(&self) -> bool {
        self.miner.is_mining()
    }

    /// Snapshot of the local chain.
    pub fn blockchain(&self) -> Arc<Chain> {
        self.chain.load()
    }

    pub fn blockchain_size(&self) -> usize {
        self.chain.load().len()
    }

    pub fn blockchain_last_hash(&self) -> String {
        self.chain.load().tip_hash()
    }

    pub fn blockchain_transactions(&self) -> Vec<String> {
        self.chain.load().transactions()
    }

    pub fn merkle_list(&self) -> BTreeSet<String> {
        (*self.merkles.load()).clone()
    }

    pub fn mkt_file(&self, root: &str) -> Result<Vec<u8>, NodeError> {
        Ok(self.store.read_merkle_file(root)?)
    }

    pub fn user_list(&self) -> BTreeSet<String> {
        (*self.users.load()).clone()
    }

    pub fn user_files(&self, username: &str) -> Result<UserFiles, NodeError> {
        Ok(self.store.read_user_files(username)?)
    }

    pub fn status(&self) -> NodeStatus {
        let chain = self.chain.load();
        NodeStatus {
            address: self.config.address.clone(),
            chain_length: chain.len(),
            tip: chain.tip_hash(),
            pending: self.transactions_size(),
            peers: self.network(),
            mining: self.is_mining(),
            difficulty: self.config.difficulty,
            known_merkles: self.merkles.load().len(),
            known_users: self.users.load().len(),
        }
    }

    pub(crate) fn store(&self) -> &FileStore {
        &self.store
    }

    pub(crate) fn known_merkles(&self) -> &Snapshot<BTreeSet<String>> {
        &self.merkles
    }

    pub(crate) fn known_users(&self) -> &Snapshot<BTreeSet<String>> {
        &self.users
    }

    pub(crate) fn emit(&self, event: NodeEvent) {
        self.events.emit(event);
    }

    /// This node as a peer handle, for reciprocal registration and
    /// invitations.
    pub(crate) fn handle(&self) -> Result<PeerHandle, NodeError> {
        self.this
            .upgrade()
            .map(|node| node as PeerHandle)
            .ok_or(NodeError::ShuttingDown)
    }

    fn peer_snapshot(&self) -> Arc<Vec<PeerHandle>> {
        self.peers.load()
    }

    // -- Peer failure handling ----------------------------------------------

    fn evict(&self, address: &str, reason: &str) {
        let removed = self.peers.update(|peers| {
            let before = peers.len();
            peers.retain(|p| p.address() != address);
            before != peers.len()
        });
        if removed {
            warn!(peer = %address, reason = %reason, "peer evicted");
            self.emit(NodeEvent::PeerEvicted {
                address: address.to_string(),
                reason: reason.to_string(),
            });
        }
    }

    /// Absorbs a failed peer call: evicts on transport failure, logs
    /// anything else.
    pub(crate) fn absorb(&self, peer: &PeerHandle, operation: &str, error: NodeError) {
        match &error {
            NodeError::PeerUnreachable { reason, .. } => self.evict(peer.address(), reason),
            _ => warn!(peer = %peer.address(), operation, error = %error, "peer call failed"),
        }
    }

    fn report(&self, context: &str, error: &NodeError) {
        warn!(context, error = %error, "operation failed");
        self.emit(NodeEvent::Error {
            context: context.to_string(),
            message: error.to_string(),
        });
    }

    // -- Membership ----------------------------------------------------------

    /// Links `peer` into this node's view and reconciles with it.
    ///
    /// Idempotent: a peer already in the view (or this node itself) is
    /// ignored. Before inserting, every known peer is probed from the end of
    /// the view and the unresponsive ones are evicted.
    pub async fn add_node(&self, peer: PeerHandle) -> Result<(), NodeError> {
        let reported = peer.get_address().await?;
        if peer.address() == self.config.address || reported == self.config.address {
            return Ok(());
        }

        self.prune_unreachable().await;

        let inserted = self.peers.update(|peers| {
            if peers.iter().any(|p| p.address() == peer.address()) {
                false
            } else {
                peers.push(Arc::clone(&peer));
                true
            }
        });
        if !inserted {
            debug!(peer = %peer.address(), "peer already known");
            return Ok(());
        }

        info!(peer = %peer.address(), "peer connected");
        self.emit(NodeEvent::PeerConnected {
            address: peer.address().to_string(),
        });

        let me = self.handle()?;
        if let Err(e) = peer.add_node(Arc::clone(&me)).await {
            self.absorb(&peer, "add_node", e);
        }
        for other in self.peer_snapshot().iter() {
            if other.address() == peer.address() {
                continue;
            }
            if let Err(e) = other.add_node(Arc::clone(&peer)).await {
                self.absorb(other, "add_node", e);
            }
        }

        if let Err(e) = self.synchronize_transactions(Arc::clone(&peer)).await {
            self.report("synchronize_transactions", &e);
        }
        if let Err(e) = self.synchronize_blockchain().await {
            self.report("synchronize_blockchain", &e);
        }
        if let Err(e) = self.synchronize_users(Arc::clone(&peer)).await {
            self.report("synchronize_users", &e);
        }
        if let Err(e) = self.synchronize_merkles(peer).await {
            self.report("synchronize_merkles", &e);
        }
        Ok(())
    }

    async fn prune_unreachable(&self) {
        let peers = self.peer_snapshot();
        for peer in peers.iter().rev() {
            if let Err(e) = peer.get_address().await {
                self.absorb(peer, "get_address", e);
            }
        }
    }

    // -- Transactions ---------------------------------------------------------

    /// Adds `transaction` to the pending set and floods it to every peer.
    ///
    /// A transaction already pending or already sealed in the chain is a
    /// duplicate: reported as an event, not relayed. Reaching the batch
    /// threshold spawns block assembly over the oldest pending items.
    pub async fn add_transaction(&self, transaction: String) -> Result<(), NodeError> {
        let inserted = self.pending.update(|pending| {
            if pending.contains(&transaction) || self.chain.load().contains_transaction(&transaction) {
                None
            } else {
                pending.push(transaction.clone());
                Some(pending.len())
            }
        });

        let Some(pending) = inserted else {
            debug!(tx = %transaction, "duplicate transaction");
            self.emit(NodeEvent::DuplicateTransaction { transaction });
            return Ok(());
        };

        info!(tx = %transaction, pending, "transaction added");
        self.emit(NodeEvent::TransactionAdded {
            transaction: transaction.clone(),
        });
        self.schedule_block_assembly();

        for peer in self.peer_snapshot().iter() {
            if let Err(e) = peer.add_transaction(transaction.clone()).await {
                self.absorb(peer, "add_transaction", e);
            }
        }
        Ok(())
    }

    /// Drops `transactions` from the pending set and tells every peer that
    /// still holds any of them to do the same.
    pub async fn remove_transactions(&self, transactions: Vec<String>) -> Result<(), NodeError> {
        let removed = self.pending.update(|pending| {
            let before = pending.len();
            pending.retain(|tx| !transactions.contains(tx));
            before - pending.len()
        });
        debug!(removed, requested = transactions.len(), "transactions removed");
        self.emit(NodeEvent::TransactionsRemoved {
            transactions: transactions.clone(),
        });

        for peer in self.peer_snapshot().iter() {
            let theirs = match peer.get_transactions().await {
                Ok(theirs) => theirs,
                Err(e) => {
                    self.absorb(peer, "get_transactions", e);
                    continue;
                }
            };
            if theirs.iter().any(|tx| transactions.contains(tx)) {
                if let Err(e) = peer.remove_transactions(transactions.clone()).await {
                    self.absorb(peer, "remove_transactions", e);
                }
            }
        }
        Ok(())
    }

    /// Appends every unseen item of `incoming` to the pending set, keeping
    /// its order. Returns the items actually added.
    fn merge_pending(&self, incoming: Vec<String>) -> Vec<String> {
        let chain = self.chain.load();
        self.pending.update(|pending| {
            let mut gained = Vec::new();
            for tx in incoming {
                if !pending.contains(&tx) && !chain.contains_transaction(&tx) {
                    pending.push(tx.clone());
                    gained.push(tx);
                }
            }
            gained
        })
    }

    /// One-way merge used by transaction anti-entropy. Never calls out.
    pub fn offer_transactions(&self, transactions: Vec<String>) -> usize {
        let gained = self.merge_pending(transactions);
        let size = self.transactions_size();
        if !gained.is_empty() {
            debug!(gained = gained.len(), pending = size, "transactions offered");
            self.emit(NodeEvent::TransactionsSynced { pending: size });
        }
        size
    }

    /// Transaction anti-entropy starting from `peer`.
    ///
    /// Works through a queue of peers, each visited at most once: pull and
    /// merge its pending set, push ours back if it lacks anything, and when
    /// the local set grew, queue every other peer whose set is smaller than
    /// ours. Peer failures are recorded in the report, never returned.
    pub async fn synchronize_transactions(&self, peer: PeerHandle) -> Result<SyncReport, NodeError> {
        let mut visited = HashSet::from([self.config.address.clone()]);
        let mut queue = VecDeque::from([peer]);
        let mut report = SyncReport::default();
        let mut pushed = false;
        let mut saw_items = false;

        while let Some(peer) = queue.pop_front() {
            if !visited.insert(peer.address().to_string()) {
                continue;
            }

            let theirs = match peer.get_transactions().await {
                Ok(theirs) => theirs,
                Err(e) => {
                    report.failed.push(peer.address().to_string());
                    self.absorb(&peer, "get_transactions", e);
                    continue;
                }
            };
            saw_items |= !theirs.is_empty();
            let their_set: HashSet<&String> = theirs.iter().collect();

            let gained = self.merge_pending(theirs.clone());
            let local = self.pending.load();
            saw_items |= !local.is_empty();

            if local.iter().any(|tx| !their_set.contains(tx)) {
                match peer.offer_transactions(local.to_vec()).await {
                    Ok(_) => pushed = true,
                    Err(e) => self.absorb(&peer, "offer_transactions", e),
                }
            }

            if gained.is_empty() {
                continue;
            }
            report.fetched.extend(gained);

            for other in self.peer_snapshot().iter() {
                if visited.contains(other.address())
                    || queue.iter().any(|q: &PeerHandle| q.address() == other.address())
                {
                    continue;
                }
                match other.get_transactions_size().await {
                    Ok(size) if size < local.len() => queue.push_back(Arc::clone(other)),
                    Ok(_) => {}
                    Err(e) => self.absorb(other, "get_transactions_size", e),
                }
            }
        }

        report.outcome = if !report.fetched.is_empty() {
            SyncOutcome::Pulled
        } else if pushed {
            SyncOutcome::PeerInvited
        } else if saw_items {
            SyncOutcome::AlreadyEqual
        } else {
            SyncOutcome::NothingToShare
        };

        let pending = self.transactions_size();
        debug!(outcome = ?report.outcome, fetched = report.fetched.len(), pending, "transactions synchronized");
        self.emit(NodeEvent::TransactionsSynced { pending });

        // Only the node that pulled assembles; the peers it pushed to get
        // the removal and the block from it.
        if !report.fetched.is_empty() {
            self.schedule_block_assembly();
        }
        Ok(report)
    }

    // -- Block assembly --------------------------------------------------------

    /// Drains the oldest `batch_size` pending items into a background
    /// assembly task once the threshold is reached.
    fn schedule_block_assembly(&self) {
        let batch_size = self.config.batch_size;
        let batch = self.pending.update(|pending| {
            (pending.len() >= batch_size).then(|| pending.drain(..batch_size).collect::<Vec<_>>())
        });
        let Some(batch) = batch else {
            return;
        };
        let Some(node) = self.this.upgrade() else {
            return;
        };

        info!(size = batch.len(), "batch ready, assembling block");
        tokio::spawn(async move {
            node.run_assembly(batch).await;
        });
    }

    async fn run_assembly(&self, batch: Vec<String>) {
        match self.assemble_block(batch.clone()).await {
            Ok(None) => debug!("batch was sealed elsewhere"),
            Ok(Some(block)) if self.chain.load().contains(&block) => {
                debug!(hash = %block.hash(), "assembled block is in the chain");
            }
            Ok(Some(block)) => {
                warn!(hash = %block.hash(), "assembled block lost the race for the tip");
                self.restore_batch(batch).await;
            }
            Err(e) => {
                self.report("block assembly", &e);
                self.restore_batch(batch).await;
            }
        }
    }

    /// Puts a batch that failed to seal back in play: the items return to
    /// the front of the pending set, go back to peers that were told to
    /// drop them, and assembly is tried again after a pause.
    async fn restore_batch(&self, batch: Vec<String>) {
        let restored = self.requeue(batch);
        if restored.is_empty() {
            return;
        }

        let pending = self.transactions_size();
        self.emit(NodeEvent::TransactionsSynced { pending });
        for peer in self.peer_snapshot().iter() {
            if let Err(e) = peer.offer_transactions(restored.clone()).await {
                self.absorb(peer, "offer_transactions", e);
            }
        }

        tokio::time::sleep(ASSEMBLY_RETRY_DELAY).await;
        self.schedule_block_assembly();
    }

    /// Builds, seals and appends a block over `batch` on the current tip.
    ///
    /// Items sealed by a block that arrived meanwhile are dropped from the
    /// batch; `None` means nothing was left to seal.
    async fn assemble_block(&self, batch: Vec<String>) -> Result<Option<Block>, NodeError> {
        let _sealing = self.sealing.lock().await;

        let chain = self.chain.load();
        let previous = chain.tip_hash();
        let batch: Vec<String> = batch
            .into_iter()
            .filter(|tx| !chain.contains_transaction(tx))
            .collect();
        drop(chain);
        if batch.is_empty() {
            return Ok(None);
        }

        let mut block = Block::assemble(previous, batch.clone(), &self.store)?;
        let root = block.merkle_root.clone();
        let count = self.merkles.update(|known| {
            known.insert(root);
            known.len()
        });
        self.emit(NodeEvent::MerklesUpdated { count });

        self.remove_transactions(batch).await?;

        let difficulty = self.config.difficulty;
        let mut attempt = 1;
        loop {
            let sealed = match self.mine(block.miner_data(), difficulty).await {
                Ok(nonce) => block.set_nonce(nonce, difficulty).map_err(NodeError::from),
                Err(e) => Err(e),
            };
            match sealed {
                Ok(()) => break,
                Err(e) if attempt < MAX_SEAL_ATTEMPTS => {
                    warn!(attempt, error = %e, "sealing failed, searching again");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }

        info!(hash = %block.hash(), nonce = ?block.nonce, "block sealed");
        self.add_block(block.clone()).await?;
        Ok(Some(block))
    }

    /// Returns `batch` to the front of the pending set, skipping items that
    /// reappeared or got sealed meanwhile.
    /// Returns the items actually restored.
    fn requeue(&self, batch: Vec<String>) -> Vec<String> {
        let chain = self.chain.load();
        let restored = self.pending.update(|pending| {
            let missing: Vec<String> = batch
                .into_iter()
                .filter(|tx| !pending.contains(tx) && !chain.contains_transaction(tx))
                .collect();
            pending.splice(0..0, missing.iter().cloned());
            missing
        });
        if !restored.is_empty() {
            info!(restored = restored.len(), "batch returned to pending set");
        }
        restored
    }

    // -- Mining coordination -----------------------------------------------------

    /// Starts (or joins) the local search and relays the start to every
    /// peer not already mining.
    pub async fn start_mining(&self, data: String, difficulty: u32) -> Result<(), NodeError> {
        self.begin_mining(data, difficulty).await;
        Ok(())
    }

    async fn begin_mining(&self, data: String, difficulty: u32) -> MiningTicket {
        let difficulty = difficulty.min(MAX_DIFFICULTY);
        let ticket = self.miner.start_mining(data.clone(), difficulty);
        if !ticket.is_fresh() {
            return ticket;
        }

        debug!(difficulty, "mining started");
        self.emit(NodeEvent::MiningStarted {
            data: data.clone(),
            difficulty,
        });
        for peer in self.peer_snapshot().iter() {
            match peer.is_mining().await {
                Ok(true) => {}
                Ok(false) => {
                    if let Err(e) = peer.start_mining(data.clone(), difficulty).await {
                        self.absorb(peer, "start_mining", e);
                    }
                }
                Err(e) => self.absorb(peer, "is_mining", e),
            }
        }
        ticket
    }

    /// Stops the local search, adopting `nonce` if it solves the job, and
    /// relays the stop to every peer still mining.
    pub async fn stop_mining(&self, nonce: u64) -> Result<(), NodeError> {
        if let Some(outcome) = self.miner.stop_mining(nonce) {
            debug!(nonce, ?outcome, "mining stopped");
            self.emit(NodeEvent::MiningStopped { nonce });
        }
        self.relay_stop(nonce).await;
        Ok(())
    }

    async fn relay_stop(&self, nonce: u64) {
        for peer in self.peer_snapshot().iter() {
            match peer.is_mining().await {
                Ok(true) => {
                    if let Err(e) = peer.stop_mining(nonce).await {
                        self.absorb(peer, "stop_mining", e);
                    }
                }
                Ok(false) => {}
                Err(e) => self.absorb(peer, "is_mining", e),
            }
        }
    }

    /// Mines `data` network-wide and waits for the nonce.
    ///
    /// When this node finds the nonce itself, every peer still searching is
    /// stopped with it.
    pub async fn mine(&self, data: String, difficulty: u32) -> Result<u64, NodeError> {
        let difficulty = difficulty.min(MAX_DIFFICULTY);
        let ticket = self.begin_mining(data.clone(), difficulty).await;
        match ticket.outcome().await {
            MiningOutcome::Found(nonce) => {
                info!(nonce, difficulty, "nonce found");
                self.emit(NodeEvent::NonceFound { data, nonce });
                self.relay_stop(nonce).await;
                Ok(nonce)
            }
            MiningOutcome::Adopted(nonce) => Ok(nonce),
            MiningOutcome::Interrupted => Err(MinerError::InterruptedWait { data, difficulty }.into()),
        }
    }

    // -- Chain propagation ----------------------------------------------------------

    /// Accepts a sealed block, appends it when it extends the tip, and
    /// relays it to peers that lag behind.
    ///
    /// Afterwards, if the block is not this node's tip, the chain is
    /// resynchronized from peers.
    pub async fn add_block(&self, block: Block) -> Result<(), NodeError> {
        let difficulty = self.config.difficulty;
        if !block.is_valid() {
            return Err(ChainError::InvalidBlock(format!(
                "block {} does not match its contents",
                block.hash()
            ))
            .into());
        }
        if !block.meets_difficulty(difficulty) {
            return Err(ChainError::InvalidBlock(format!(
                "block {} does not meet difficulty {difficulty}",
                block.hash()
            ))
            .into());
        }

        let chain_path = self.store.chain_path();
        let appended = self.chain.update(|chain| -> Result<bool, ChainError> {
            if chain.tip_hash() != block.previous_hash {
                return Ok(false);
            }
            chain.add(block.clone())?;
            if let Err(e) = chain.save(&chain_path) {
                warn!(error = %e, "failed to persist chain");
            }
            Ok(true)
        })?;

        let hash = block.hash().to_string();
        if appended {
            let length = self.blockchain_size();
            info!(hash = %hash, length, "block appended");
            self.emit(NodeEvent::ChainUpdated {
                length,
                tip: hash.clone(),
            });
            self.prune_sealed_pending();
        }

        let local_len = self.blockchain_size();
        for peer in self.peer_snapshot().iter() {
            let tip = match peer.get_blockchain_last_hash().await {
                Ok(tip) => tip,
                Err(e) => {
                    self.absorb(peer, "get_blockchain_last_hash", e);
                    continue;
                }
            };
            if tip == hash {
                continue;
            }
            let lagging = if tip == block.previous_hash {
                true
            } else {
                match peer.get_blockchain_size().await {
                    Ok(size) => size < local_len,
                    Err(e) => {
                        self.absorb(peer, "get_blockchain_size", e);
                        continue;
                    }
                }
            };
            if lagging {
                if let Err(e) = peer.add_block(block.clone()).await {
                    self.absorb(peer, "add_block", e);
                }
            }
        }

        if self.blockchain_last_hash() != hash {
            debug!(hash = %hash, "block is not our tip, resynchronizing");
            self.synchronize_blockchain().await?;
        }
        Ok(())
    }

    /// Adopts the chain of any peer that is longer and fully valid.
    ///
    /// Returns whether the local chain was replaced.
    pub async fn synchronize_blockchain(&self) -> Result<bool, NodeError> {
        let difficulty = self.config.difficulty;
        let chain_path = self.store.chain_path();
        let mut replaced = false;

        for peer in self.peer_snapshot().iter() {
            let size = match peer.get_blockchain_size().await {
                Ok(size) => size,
                Err(e) => {
                    self.absorb(peer, "get_blockchain_size", e);
                    continue;
                }
            };
            if size <= self.blockchain_size() {
                continue;
            }

            let candidate = match peer.get_blockchain().await {
                Ok(chain) => chain,
                Err(e) => {
                    self.absorb(peer, "get_blockchain", e);
                    continue;
                }
            };
            if !candidate.is_valid() || !candidate.meets_difficulty(difficulty) {
                warn!(peer = %peer.address(), "peer offered an invalid chain");
                continue;
            }

            let mut candidate = Some(candidate);
            let adopted = self.chain.update(|chain| {
                let Some(longer) = candidate.take().filter(|c| c.len() > chain.len()) else {
                    return None;
                };
                *chain = longer;
                if let Err(e) = chain.save(&chain_path) {
                    warn!(error = %e, "failed to persist chain");
                }
                Some((chain.len(), chain.tip_hash()))
            });

            if let Some((length, tip)) = adopted {
                info!(peer = %peer.address(), length, "adopted longer chain");
                self.emit(NodeEvent::ChainUpdated { length, tip });
                self.prune_sealed_pending();
                replaced = true;
            }
        }
        Ok(replaced)
    }

    /// Drops pending items that are now sealed in the chain.
    fn prune_sealed_pending(&self) {
        let chain = self.chain.load();
        let sealed = self.pending.update(|pending| {
            let (sealed, keep): (Vec<String>, Vec<String>) = pending
                .drain(..)
                .partition(|tx| chain.contains_transaction(tx));
            *pending = keep;
            sealed
        });
        if !sealed.is_empty() {
            debug!(count = sealed.len(), "pruned sealed transactions from pending set");
            self.emit(NodeEvent::TransactionsRemoved {
                transactions: sealed,
            });
        }
    }

    // -- Users ------------------------------------------------------------------

    /// Stores a user bundle produced by the credential layer and invites
    /// every peer to pull it.
    pub async fn register_user(&self, username: String, files: UserFiles) -> Result<(), NodeError> {
        self.store.write_user_files(&username, &files)?;
        let count = self.users.update(|users| {
            users.insert(username.clone());
            users.len()
        });
        info!(username = %username, "user registered");
        self.emit(NodeEvent::UsersUpdated { count });

        let me = self.handle()?;
        for peer in self.peer_snapshot().iter() {
            if let Err(e) = peer.synchronize_users(Arc::clone(&me)).await {
                self.absorb(peer, "synchronize_users", e);
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Peer implementation (in-process)
// ---------------------------------------------------------------------------

#[async_trait]
impl Peer for Node {
    fn address(&self) -> &str {
        &self.config.address
    }

    async fn get_address(&self) -> Result<String, NodeError> {
        Ok(self.config.address.clone())
    }

    async fn get_network(&self) -> Result<Vec<String>, NodeError> {
        Ok(self.network())
    }

    async fn add_node(&self, peer: PeerHandle) -> Result<(), NodeError> {
        Node::add_node(self, peer).await
    }

    async fn add_transaction(&self, transaction: String) -> Result<(), NodeError> {
        Node::add_transaction(self, transaction).await
    }

    async fn get_transactions(&self) -> Result<Vec<String>, NodeError> {
        Ok(self.transactions())
    }

    async fn get_transactions_size(&self) -> Result<usize, NodeError> {
        Ok(self.transactions_size())
    }

    async fn remove_transactions(&self, transactions: Vec<String>) -> Result<(), NodeError> {
        Node::remove_transactions(self, transactions).await
    }

    async fn synchronize_transactions(&self, peer: PeerHandle) -> Result<SyncReport, NodeError> {
        Node::synchronize_transactions(self, peer).await
    }

    async fn offer_transactions(&self, transactions: Vec<String>) -> Result<usize, NodeError> {
        Ok(Node::offer_transactions(self, transactions))
    }

    async fn start_mining(&self, data: String, difficulty: u32) -> Result<(), NodeError> {
        Node::start_mining(self, data, difficulty).await
    }

    async fn stop_mining(&self, nonce: u64) -> Result<(), NodeError> {
        Node::stop_mining(self, nonce).await
    }

    async fn is_mining(&self) -> Result<bool, NodeError> {
        Ok(Node::is_mining(self))
    }

    async fn mine(&self, data: String, difficulty: u32) -> Result<u64, NodeError> {
        Node::mine(self, data, difficulty).await
    }

    async fn add_block(&self, block: Block) -> Result<(), NodeError> {
        Node::add_block(self, block).await
    }

    async fn get_blockchain(&self) -> Result<Chain, NodeError> {
        Ok((*self.blockchain()).clone())
    }

    async fn get_blockchain_size(&self) -> Result<usize, NodeError> {
        Ok(self.blockchain_size())
    }

    async fn get_blockchain_last_hash(&self) -> Result<String, NodeError> {
        Ok(self.blockchain_last_hash())
    }

    async fn get_blockchain_transactions(&self) -> Result<Vec<String>, NodeError> {
        Ok(self.blockchain_transactions())
    }

    async fn synchronize_blockchain(&self) -> Result<bool, NodeError> {
        Node::synchronize_blockchain(self).await
    }

    async fn get_merkle_list(&self) -> Result<BTreeSet<String>, NodeError> {
        Ok(self.merkle_list())
    }

    async fn get_mkt_file(&self, root: String) -> Result<Vec<u8>, NodeError> {
        self.mkt_file(&root)
    }

    async fn synchronize_merkles(&self, peer: PeerHandle) -> Result<SyncReport, NodeError> {
        Node::synchronize_merkles(self, peer).await
    }

    async fn get_user_list(&self) -> Result<BTreeSet<String>, NodeError> {
        Ok(self.user_list())
    }

    async fn get_user_files(&self, username: String) -> Result<UserFiles, NodeError> {
        self.user_files(&username)
    }

    async fn synchronize_users(&self, peer: PeerHandle) -> Result<SyncReport, NodeError> {
        Node::synchronize_users(self, peer).await
    }

    async fn register_user(&self, username: String, files: UserFiles) -> Result<(), NodeError> {
        Node::register_user(self, username, files).await
    }
}
