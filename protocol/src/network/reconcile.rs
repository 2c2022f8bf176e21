//! # Artifact Reconciliation
//!
//! Merkle artifacts and user bundles replicate the same way: compare the
//! id sets, then either invite the peer to pull from us or pull the ids we
//! lack. [`Catalog`] captures what differs between the two; the two-phase
//! routine in [`Node::reconcile`] is shared.
//!
//! Invitations only flow towards the side holding less, and every pull
//! strictly grows the puller's finite set, so a chain of invitations always
//! ends.

use std::collections::BTreeSet;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::network::events::NodeEvent;
use crate::network::node::{Node, NodeError};
use crate::network::peer::{PeerHandle, SyncOutcome, SyncReport};
use crate::network::snapshot::Snapshot;
use crate::storage::{FileStore, UserFiles};

/// One replicated collection of content-addressed items.
#[async_trait]
pub(crate) trait Catalog: Send + Sync {
    type Item: Send;

    fn kind(&self) -> &'static str;

    /// Local known-id set.
    fn known<'a>(&self, node: &'a Node) -> &'a Snapshot<BTreeSet<String>>;

    async fn remote_ids(&self, peer: &PeerHandle) -> Result<BTreeSet<String>, NodeError>;

    async fn fetch(&self, peer: &PeerHandle, id: &str) -> Result<Self::Item, NodeError>;

    fn persist(&self, store: &FileStore, id: &str, item: Self::Item) -> Result<(), NodeError>;

    /// Asks `peer` to pull from `me`.
    async fn invite(&self, peer: &PeerHandle, me: PeerHandle) -> Result<SyncReport, NodeError>;

    fn updated(&self, count: usize) -> NodeEvent;
}

/// Merkle tree artifacts, keyed by root digest.
pub(crate) struct MerkleCatalog;

#[async_trait]
impl Catalog for MerkleCatalog {
    type Item = Vec<u8>;

    fn kind(&self) -> &'static str {
        "merkle"
    }

    fn known<'a>(&self, node: &'a Node) -> &'a Snapshot<BTreeSet<String>> {
        node.known_merkles()
    }

    async fn remote_ids(&self, peer: &PeerHandle) -> Result<BTreeSet<String>, NodeError> {
        peer.get_merkle_list().await
    }

    async fn fetch(&self, peer: &PeerHandle, id: &str) -> Result<Vec<u8>, NodeError> {
        peer.get_mkt_file(id.to_string()).await
    }

    fn persist(&self, store: &FileStore, id: &str, bytes: Vec<u8>) -> Result<(), NodeError> {
        Ok(store.write_merkle_file(id, &bytes)?)
    }

    async fn invite(&self, peer: &PeerHandle, me: PeerHandle) -> Result<SyncReport, NodeError> {
        peer.synchronize_merkles(me).await
    }

    fn updated(&self, count: usize) -> NodeEvent {
        NodeEvent::MerklesUpdated { count }
    }
}

/// User credential bundles, keyed by username.
pub(crate) struct UserCatalog;

#[async_trait]
impl Catalog for UserCatalog {
    type Item = UserFiles;

    fn kind(&self) -> &'static str {
        "user"
    }

    fn known<'a>(&self, node: &'a Node) -> &'a Snapshot<BTreeSet<String>> {
        node.known_users()
    }

    async fn remote_ids(&self, peer: &PeerHandle) -> Result<BTreeSet<String>, NodeError> {
        peer.get_user_list().await
    }

    async fn fetch(&self, peer: &PeerHandle, id: &str) -> Result<UserFiles, NodeError> {
        peer.get_user_files(id.to_string()).await
    }

    fn persist(&self, store: &FileStore, id: &str, files: UserFiles) -> Result<(), NodeError> {
        Ok(store.write_user_files(id, &files)?)
    }

    async fn invite(&self, peer: &PeerHandle, me: PeerHandle) -> Result<SyncReport, NodeError> {
        peer.synchronize_users(me).await
    }

    fn updated(&self, count: usize) -> NodeEvent {
        NodeEvent::UsersUpdated { count }
    }
}

impl Node {
    /// Reconciles the Merkle artifacts with `peer`.
    pub async fn synchronize_merkles(&self, peer: PeerHandle) -> Result<SyncReport, NodeError> {
        self.reconcile(&MerkleCatalog, peer).await
    }

    /// Reconciles the user bundles with `peer`.
    pub async fn synchronize_users(&self, peer: PeerHandle) -> Result<SyncReport, NodeError> {
        self.reconcile(&UserCatalog, peer).await
    }

    async fn reconcile<C: Catalog>(&self, catalog: &C, peer: PeerHandle) -> Result<SyncReport, NodeError> {
        let kind = catalog.kind();
        let remote = catalog.remote_ids(&peer).await?;
        let local = catalog.known(self).load();

        // Phase 1: decide who pulls.
        if remote.is_empty() && local.is_empty() {
            return Ok(SyncReport::with_outcome(SyncOutcome::NothingToShare));
        }
        if remote.is_subset(&local) {
            if remote.len() == local.len() {
                debug!(kind, peer = %peer.address(), "already reconciled");
                return Ok(SyncReport::with_outcome(SyncOutcome::AlreadyEqual));
            }
            debug!(kind, peer = %peer.address(), "peer lags, inviting it to pull");
            if let Err(e) = catalog.invite(&peer, self.handle()?).await {
                self.absorb(&peer, "invite", e);
            }
            return Ok(SyncReport::with_outcome(SyncOutcome::PeerInvited));
        }

        // Phase 2: pull what we lack.
        let mut report = SyncReport::with_outcome(SyncOutcome::Pulled);
        for id in remote.difference(&local) {
            let item = match catalog.fetch(&peer, id).await {
                Ok(item) => item,
                Err(e) => {
                    warn!(kind, id = %id, peer = %peer.address(), error = %e, "fetch failed");
                    report.failed.push(id.clone());
                    continue;
                }
            };
            if let Err(e) = catalog.persist(self.store(), id, item) {
                warn!(kind, id = %id, error = %e, "persist failed");
                report.failed.push(id.clone());
                continue;
            }
            catalog.known(self).update(|known| known.insert(id.clone()));
            report.fetched.push(id.clone());
        }

        let count = catalog.known(self).load().len();
        info!(
            kind,
            peer = %peer.address(),
            fetched = report.fetched.len(),
            failed = report.failed.len(),
            "reconciled"
        );
        self.emit(catalog.updated(count));
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeConfig;
    use crate::network::peer::{Peer, PeerDirectory};
    use crate::storage::MerkleTree;
    use std::sync::Arc;

    fn open(dir: &tempfile::TempDir, name: &str) -> Arc<Node> {
        let config = NodeConfig::new(format!("mem://{name}"), dir.path().join(name));
        Node::with_connector(config, Arc::new(PeerDirectory::new())).unwrap()
    }

    fn bundle(tag: u8) -> UserFiles {
        UserFiles {
            public_key: vec![tag; 4],
            private_key: vec![tag; 8],
            symmetric_key: vec![tag; 2],
            props: vec![tag],
        }
    }

    #[tokio::test]
    async fn empty_sides_have_nothing_to_share() {
        let dir = tempfile::tempdir().unwrap();
        let (a, b) = (open(&dir, "a"), open(&dir, "b"));
        let report = a.synchronize_users(b as PeerHandle).await.unwrap();
        assert_eq!(report.outcome, SyncOutcome::NothingToShare);
    }

    #[tokio::test]
    async fn pulls_missing_users_and_persists_them() {
        let dir = tempfile::tempdir().unwrap();
        let (a, b) = (open(&dir, "a"), open(&dir, "b"));
        b.store().write_user_files("bob", &bundle(2)).unwrap();
        b.known_users().update(|u| u.insert("bob".to_string()));

        let report = a.synchronize_users(Arc::clone(&b) as PeerHandle).await.unwrap();
        assert_eq!(report.outcome, SyncOutcome::Pulled);
        assert_eq!(report.fetched, vec!["bob"]);
        assert_eq!(a.user_files("bob").unwrap(), bundle(2));
        assert!(a.user_list().contains("bob"));
    }

    #[tokio::test]
    async fn lagging_peer_is_invited_and_catches_up() {
        let dir = tempfile::tempdir().unwrap();
        let (a, b) = (open(&dir, "a"), open(&dir, "b"));
        let tree = MerkleTree::build(&["x".to_string(), "y".to_string()]);
        a.store().save_merkle_tree(&tree).unwrap();
        a.known_merkles().update(|m| m.insert(tree.root().to_string()));

        let report = a.synchronize_merkles(Arc::clone(&b) as PeerHandle).await.unwrap();
        assert_eq!(report.outcome, SyncOutcome::PeerInvited);
        assert_eq!(b.merkle_list(), a.merkle_list());
        assert_eq!(
            b.get_mkt_file(tree.root().to_string()).await.unwrap(),
            a.mkt_file(tree.root()).unwrap()
        );

        let again = a.synchronize_merkles(b as PeerHandle).await.unwrap();
        assert_eq!(again.outcome, SyncOutcome::AlreadyEqual);
    }

    #[tokio::test]
    async fn unreadable_artifact_is_reported_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let (a, b) = (open(&dir, "a"), open(&dir, "b"));
        let good = MerkleTree::build(&["good".to_string()]);
        b.store().save_merkle_tree(&good).unwrap();
        let ghost = crate::crypto::blake3_hex(b"ghost");
        b.known_merkles().update(|m| {
            m.insert(good.root().to_string());
            m.insert(ghost.clone());
        });

        let report = a.synchronize_merkles(b as PeerHandle).await.unwrap();
        assert_eq!(report.fetched, vec![good.root().to_string()]);
        assert_eq!(report.failed, vec![ghost]);
        assert!(!report.is_converged());
        assert_eq!(a.merkle_list().len(), 1);
    }
}
