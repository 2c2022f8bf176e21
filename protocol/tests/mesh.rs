//! In-process mesh tests.
//!
//! Every node gets its own temporary data directory. Nodes find each other
//! through a shared `PeerDirectory`, so the full relay and reconciliation
//! paths run exactly as they would over HTTP, minus the sockets.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use registu_protocol::config::{NodeConfig, EMPTY_CHAIN_TIP, MAX_SEAL_ATTEMPTS};
use registu_protocol::crypto::{meets_difficulty, pow_hash};
use registu_protocol::network::{
    Node, NodeError, NodeEvent, Peer, PeerDirectory, PeerHandle, SyncOutcome, SyncReport,
};
use registu_protocol::storage::{Block, Chain, UserFiles};

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

struct Mesh {
    dir: tempfile::TempDir,
    directory: Arc<PeerDirectory>,
}

impl Mesh {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("temp dir"),
            directory: Arc::new(PeerDirectory::new()),
        }
    }

    fn node(&self, name: &str) -> Arc<Node> {
        self.node_with(name, 1, 4)
    }

    fn node_with(&self, name: &str, difficulty: u32, batch_size: usize) -> Arc<Node> {
        let config = NodeConfig::new(format!("mem://{name}"), self.dir.path().join(name))
            .with_difficulty(difficulty)
            .with_batch_size(batch_size);
        let node = Node::with_connector(config, Arc::clone(&self.directory) as _).expect("open node");
        self.directory.register(Arc::clone(&node) as PeerHandle);
        node
    }
}

fn handle(node: &Arc<Node>) -> PeerHandle {
    Arc::clone(node) as PeerHandle
}

async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    let waited = tokio::time::timeout(Duration::from_secs(20), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {what}");
}

async fn submit(node: &Node, txs: &[&str]) {
    for tx in txs {
        node.add_transaction(tx.to_string()).await.unwrap();
    }
}

/// A node seen through a handle that counts how often its pending set is
/// pulled.
struct Tally {
    node: Arc<Node>,
    pulls: AtomicUsize,
}

impl Tally {
    fn new(node: &Arc<Node>) -> Arc<Self> {
        Arc::new(Self {
            node: Arc::clone(node),
            pulls: AtomicUsize::new(0),
        })
    }

    fn take_pulls(&self) -> usize {
        self.pulls.swap(0, Ordering::SeqCst)
    }
}

#[async_trait]
impl Peer for Tally {
    fn address(&self) -> &str {
        self.node.address()
    }
    async fn get_address(&self) -> Result<String, NodeError> {
        self.node.get_address().await
    }
    async fn get_network(&self) -> Result<Vec<String>, NodeError> {
        self.node.get_network().await
    }
    async fn add_node(&self, peer: PeerHandle) -> Result<(), NodeError> {
        Node::add_node(&self.node, peer).await
    }
    async fn add_transaction(&self, transaction: String) -> Result<(), NodeError> {
        Node::add_transaction(&self.node, transaction).await
    }
    async fn get_transactions(&self) -> Result<Vec<String>, NodeError> {
        self.pulls.fetch_add(1, Ordering::SeqCst);
        self.node.get_transactions().await
    }
    async fn get_transactions_size(&self) -> Result<usize, NodeError> {
        self.node.get_transactions_size().await
    }
    async fn remove_transactions(&self, transactions: Vec<String>) -> Result<(), NodeError> {
        Node::remove_transactions(&self.node, transactions).await
    }
    async fn synchronize_transactions(&self, peer: PeerHandle) -> Result<SyncReport, NodeError> {
        Node::synchronize_transactions(&self.node, peer).await
    }
    async fn offer_transactions(&self, transactions: Vec<String>) -> Result<usize, NodeError> {
        Ok(Node::offer_transactions(&self.node, transactions))
    }
    async fn start_mining(&self, data: String, difficulty: u32) -> Result<(), NodeError> {
        Node::start_mining(&self.node, data, difficulty).await
    }
    async fn stop_mining(&self, nonce: u64) -> Result<(), NodeError> {
        Node::stop_mining(&self.node, nonce).await
    }
    async fn is_mining(&self) -> Result<bool, NodeError> {
        Ok(Node::is_mining(&self.node))
    }
    async fn mine(&self, data: String, difficulty: u32) -> Result<u64, NodeError> {
        Node::mine(&self.node, data, difficulty).await
    }
    async fn add_block(&self, block: Block) -> Result<(), NodeError> {
        Node::add_block(&self.node, block).await
    }
    async fn get_blockchain(&self) -> Result<Chain, NodeError> {
        self.node.get_blockchain().await
    }
    async fn get_blockchain_size(&self) -> Result<usize, NodeError> {
        self.node.get_blockchain_size().await
    }
    async fn get_blockchain_last_hash(&self) -> Result<String, NodeError> {
        self.node.get_blockchain_last_hash().await
    }
    async fn get_blockchain_transactions(&self) -> Result<Vec<String>, NodeError> {
        self.node.get_blockchain_transactions().await
    }
    async fn synchronize_blockchain(&self) -> Result<bool, NodeError> {
        Node::synchronize_blockchain(&self.node).await
    }
    async fn get_merkle_list(&self) -> Result<BTreeSet<String>, NodeError> {
        self.node.get_merkle_list().await
    }
    async fn get_mkt_file(&self, root: String) -> Result<Vec<u8>, NodeError> {
        self.node.get_mkt_file(root).await
    }
    async fn synchronize_merkles(&self, peer: PeerHandle) -> Result<SyncReport, NodeError> {
        Node::synchronize_merkles(&self.node, peer).await
    }
    async fn get_user_list(&self) -> Result<BTreeSet<String>, NodeError> {
        self.node.get_user_list().await
    }
    async fn get_user_files(&self, username: String) -> Result<UserFiles, NodeError> {
        self.node.get_user_files(username).await
    }
    async fn synchronize_users(&self, peer: PeerHandle) -> Result<SyncReport, NodeError> {
        Node::synchronize_users(&self.node, peer).await
    }
    async fn register_user(&self, username: String, files: UserFiles) -> Result<(), NodeError> {
        Node::register_user(&self.node, username, files).await
    }
}

fn sorted(mut items: Vec<String>) -> Vec<String> {
    items.sort();
    items
}

fn user(tag: u8) -> UserFiles {
    UserFiles {
        public_key: vec![tag; 32],
        private_key: vec![tag; 48],
        symmetric_key: vec![tag; 16],
        props: format!("{{\"tag\":{tag}}}").into_bytes(),
    }
}

// ---------------------------------------------------------------------------
// Single Node
// ---------------------------------------------------------------------------

#[tokio::test]
async fn full_batch_becomes_first_block() {
    let mesh = Mesh::new();
    let node = mesh.node("solo");

    submit(&node, &["diploma-1", "diploma-2", "diploma-3", "diploma-4"]).await;
    eventually("first block", || node.blockchain_size() == 1).await;

    let chain = node.blockchain();
    let block = &chain.blocks()[0];
    assert_eq!(block.previous_hash, EMPTY_CHAIN_TIP);
    assert_eq!(
        block.transactions,
        vec!["diploma-1", "diploma-2", "diploma-3", "diploma-4"]
    );
    assert!(block.is_valid());
    assert!(chain.is_valid());
    assert!(node.transactions().is_empty());
    assert_eq!(node.blockchain_transactions(), block.transactions);
}

#[tokio::test]
async fn partial_batch_stays_pending() {
    let mesh = Mesh::new();
    let node = mesh.node("solo");

    submit(&node, &["a", "b", "c"]).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(node.blockchain_size(), 0);
    assert_eq!(node.transactions(), vec!["a", "b", "c"]);
}

// ---------------------------------------------------------------------------
// Two or More Nodes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn linking_is_reciprocal() {
    let mesh = Mesh::new();
    let (a, b) = (mesh.node("a"), mesh.node("b"));

    a.add_node(handle(&b)).await.unwrap();
    a.add_node(handle(&b)).await.unwrap();

    assert_eq!(a.network(), vec!["mem://b"]);
    assert_eq!(b.network(), vec!["mem://a"]);
}

#[tokio::test]
async fn joining_node_learns_of_the_whole_mesh() {
    let mesh = Mesh::new();
    let (a, b, c) = (mesh.node("a"), mesh.node("b"), mesh.node("c"));

    a.add_node(handle(&b)).await.unwrap();
    c.add_node(handle(&a)).await.unwrap();

    let mut network = c.network();
    network.sort();
    assert_eq!(network, vec!["mem://a", "mem://b"]);
    assert!(b.network().contains(&"mem://c".to_string()));
}

#[tokio::test]
async fn transactions_flood_synchronously() {
    let mesh = Mesh::new();
    let (a, b) = (mesh.node("a"), mesh.node("b"));
    a.add_node(handle(&b)).await.unwrap();

    a.add_transaction("transcript-7".into()).await.unwrap();

    assert_eq!(b.transactions(), vec!["transcript-7"]);
}

#[tokio::test]
async fn pending_sets_merge_on_link() {
    let mesh = Mesh::new();
    let (a, b) = (mesh.node("a"), mesh.node("b"));
    submit(&a, &["x"]).await;
    submit(&b, &["y"]).await;

    a.add_node(handle(&b)).await.unwrap();

    let mut left = a.transactions();
    let mut right = b.transactions();
    left.sort();
    right.sort();
    assert_eq!(left, vec!["x", "y"]);
    assert_eq!(left, right);
}

#[tokio::test]
async fn smaller_peers_are_brought_up_in_one_round() {
    let mesh = Mesh::new();
    let (a, b, c) = (mesh.node("a"), mesh.node("b"), mesh.node("c"));
    let (tb, tc) = (Tally::new(&b), Tally::new(&c));
    a.add_node(Arc::clone(&tb) as PeerHandle).await.unwrap();
    a.add_node(Arc::clone(&tc) as PeerHandle).await.unwrap();
    tb.take_pulls();
    tc.take_pulls();

    b.offer_transactions(vec!["k1".into(), "k2".into(), "k3".into()]);
    c.offer_transactions(vec!["k1".into()]);

    let report = a.synchronize_transactions(Arc::clone(&tb) as PeerHandle).await.unwrap();

    assert_eq!(report.outcome, SyncOutcome::Pulled);
    assert_eq!(report.fetched, vec!["k1", "k2", "k3"]);
    assert_eq!(a.transactions(), vec!["k1", "k2", "k3"]);
    assert_eq!(sorted(c.transactions()), vec!["k1", "k2", "k3"]);
    assert_eq!(tb.take_pulls(), 1);
    assert_eq!(tc.take_pulls(), 1);
}

#[tokio::test]
async fn merged_pending_sets_reaching_the_batch_are_sealed() {
    let mesh = Mesh::new();
    let (a, b) = (mesh.node("a"), mesh.node("b"));
    submit(&a, &["a1", "a2"]).await;
    submit(&b, &["b1", "b2"]).await;

    a.add_node(handle(&b)).await.unwrap();

    for node in [&a, &b] {
        eventually("merged batch sealed", || node.blockchain_size() == 1).await;
    }
    eventually("pending drained on both", || {
        a.transactions().is_empty() && b.transactions().is_empty()
    })
    .await;
    assert_eq!(a.blockchain_last_hash(), b.blockchain_last_hash());
    assert_eq!(
        sorted(a.blockchain_transactions()),
        vec!["a1", "a2", "b1", "b2"]
    );
}

#[tokio::test]
async fn interrupted_batch_returns_to_peers_and_is_sealed() {
    let mesh = Mesh::new();
    let a = mesh.node_with("a", 4, 4);
    let b = mesh.node_with("b", 4, 100);
    a.add_node(handle(&b)).await.unwrap();
    let mut a_events = a.subscribe();
    let mut b_events = b.subscribe();

    let stopper = {
        let a = Arc::clone(&a);
        tokio::spawn(async move {
            let mut stops = 0;
            while stops < MAX_SEAL_ATTEMPTS {
                match a_events.recv().await {
                    Ok(NodeEvent::MiningStarted { .. }) => {
                        a.stop_mining(0).await.unwrap();
                        stops += 1;
                    }
                    Ok(_) => {}
                    Err(_) => break,
                }
            }
            stops
        })
    };

    submit(&a, &["t1", "t2", "t3", "t4"]).await;
    assert_eq!(stopper.await.unwrap(), MAX_SEAL_ATTEMPTS);

    for node in [&a, &b] {
        eventually("retried batch sealed", || node.blockchain_size() == 1).await;
    }
    eventually("pending drained on both", || {
        a.transactions().is_empty() && b.transactions().is_empty()
    })
    .await;
    assert_eq!(
        a.blockchain().blocks()[0].transactions,
        vec!["t1", "t2", "t3", "t4"]
    );

    let mut returned_to_b = false;
    while let Ok(event) = b_events.try_recv() {
        returned_to_b |= matches!(event, NodeEvent::TransactionsSynced { pending: 4 });
    }
    assert!(returned_to_b);
}

#[tokio::test]
async fn mesh_converges_on_one_block() {
    let mesh = Mesh::new();
    let (a, b, c) = (mesh.node("a"), mesh.node("b"), mesh.node("c"));
    a.add_node(handle(&b)).await.unwrap();
    a.add_node(handle(&c)).await.unwrap();

    submit(&a, &["t1", "t2", "t3", "t4"]).await;

    for node in [&a, &b, &c] {
        eventually("block on every node", || node.blockchain_size() == 1).await;
    }
    eventually("pending drained everywhere", || {
        [&a, &b, &c].iter().all(|n| n.transactions().is_empty())
    })
    .await;

    let tip = a.blockchain_last_hash();
    assert_eq!(b.blockchain_last_hash(), tip);
    assert_eq!(c.blockchain_last_hash(), tip);
    assert_eq!(a.merkle_list(), b.merkle_list());
}

#[tokio::test]
async fn longer_chain_is_adopted_once() {
    let mesh = Mesh::new();
    let (a, b) = (mesh.node("a"), mesh.node("b"));

    submit(&a, &["1", "2", "3", "4"]).await;
    eventually("first block", || a.blockchain_size() == 1).await;
    submit(&a, &["5", "6", "7", "8"]).await;
    eventually("second block", || a.blockchain_size() == 2).await;

    b.add_node(handle(&a)).await.unwrap();

    assert_eq!(b.blockchain_size(), 2);
    assert_eq!(b.blockchain_last_hash(), a.blockchain_last_hash());
    assert!(!b.synchronize_blockchain().await.unwrap());
    assert_eq!(b.blockchain_transactions().len(), 8);
}

#[tokio::test]
async fn mined_nonce_is_shared() {
    let mesh = Mesh::new();
    let (a, b) = (mesh.node("a"), mesh.node("b"));
    a.add_node(handle(&b)).await.unwrap();

    let nonce = a.mine("shared-job".into(), 3).await.unwrap();
    assert!(meets_difficulty(&pow_hash("shared-job", nonce), 3));

    eventually("peer search settles", || !b.is_mining()).await;
    assert_eq!(b.mine("shared-job".into(), 3).await.unwrap(), nonce);
}

#[tokio::test]
async fn artifacts_and_users_reach_a_fixed_point() {
    let mesh = Mesh::new();
    let (a, b) = (mesh.node("a"), mesh.node("b"));

    a.register_user("alice".into(), user(1)).await.unwrap();
    submit(&a, &["r1", "r2", "r3", "r4"]).await;
    eventually("block", || a.blockchain_size() == 1).await;
    b.register_user("bob".into(), user(2)).await.unwrap();

    b.add_node(handle(&a)).await.unwrap();

    assert_eq!(a.user_list(), b.user_list());
    assert_eq!(a.user_list().len(), 2);
    assert_eq!(a.merkle_list(), b.merkle_list());
    assert_eq!(b.user_files("alice").unwrap(), user(1));
    assert_eq!(a.user_files("bob").unwrap(), user(2));

    let users = a.synchronize_users(handle(&b)).await.unwrap();
    let merkles = b.synchronize_merkles(handle(&a)).await.unwrap();
    assert_eq!(users.outcome, SyncOutcome::AlreadyEqual);
    assert!(merkles.is_converged());
}

#[tokio::test]
async fn registered_user_is_pushed_to_peers() {
    let mesh = Mesh::new();
    let (a, b) = (mesh.node("a"), mesh.node("b"));
    a.add_node(handle(&b)).await.unwrap();

    a.register_user("carol".into(), user(3)).await.unwrap();

    assert!(b.user_list().contains("carol"));
    assert_eq!(b.get_user_files("carol".into()).await.unwrap(), user(3));
}

#[tokio::test]
async fn restarted_node_catches_up() {
    let mesh = Mesh::new();
    let a = mesh.node("a");
    submit(&a, &["p", "q", "r", "s"]).await;
    eventually("block", || a.blockchain_size() == 1).await;

    let b = mesh.node("b");
    b.add_node(handle(&a)).await.unwrap();
    assert_eq!(b.blockchain_size(), 1);
    drop(b);
    mesh.directory.unregister("mem://b");

    let b = mesh.node("b");
    assert_eq!(b.blockchain_size(), 1);
    assert_eq!(b.merkle_list(), a.merkle_list());
}
