//! # HTTP Peer Client
//!
//! [`RemotePeer`] implements [`Peer`] by posting JSON-RPC 2.0 requests to
//! `<address>/rpc`. Anything that goes wrong below the RPC layer (connect,
//! timeout, an undecodable reply) is a `PeerUnreachable`, which callers
//! treat as grounds for eviction. An error object in the reply is a
//! `Remote` error carrying the peer's code.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tracing::trace;

use crate::network::node::NodeError;
use crate::network::peer::{Peer, PeerConnector, PeerHandle, SyncReport};
use crate::network::rpc::{
    BlockParams, MiningParams, NonceParams, PeerParams, RegisterUserParams, RootParams, RpcMethod,
    RpcRequest, RpcResponse, TransactionParams, TransactionsParams, UsernameParams,
};
use crate::storage::{Block, Chain, UserFiles};

fn build_client(timeout: Duration) -> Result<reqwest::Client, NodeError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| NodeError::Transport(e.to_string()))
}

/// A peer reached over HTTP.
#[derive(Debug)]
pub struct RemotePeer {
    address: String,
    endpoint: String,
    client: reqwest::Client,
    next_id: AtomicU64,
}

impl RemotePeer {
    pub fn new(address: impl Into<String>, timeout: Duration) -> Result<Self, NodeError> {
        Ok(Self::with_client(address, build_client(timeout)?))
    }

    /// Shares `client`'s connection pool.
    pub fn with_client(address: impl Into<String>, client: reqwest::Client) -> Self {
        let address = address.into().trim_end_matches('/').to_string();
        Self {
            endpoint: format!("{address}/rpc"),
            address,
            client,
            next_id: AtomicU64::new(1),
        }
    }

    fn unreachable(&self, reason: impl ToString) -> NodeError {
        NodeError::PeerUnreachable {
            address: self.address.clone(),
            reason: reason.to_string(),
        }
    }

    async fn call<P, R>(&self, method: RpcMethod, params: &P) -> Result<R, NodeError>
    where
        P: Serialize + Sync + ?Sized,
        R: DeserializeOwned,
    {
        let params = serde_json::to_value(params).map_err(|e| NodeError::Codec(e.to_string()))?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = RpcRequest::new(json!(id), method, params);
        trace!(peer = %self.address, ?method, id, "rpc call");

        let response: RpcResponse = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.unreachable(e))?
            .json()
            .await
            .map_err(|e| self.unreachable(e))?;

        if let Some(error) = response.error {
            return Err(NodeError::Remote {
                address: self.address.clone(),
                code: error.code,
                message: error.message,
            });
        }
        serde_json::from_value(response.result.unwrap_or_default())
            .map_err(|e| self.unreachable(format!("undecodable result: {e}")))
    }

    async fn call_bare<R: DeserializeOwned>(&self, method: RpcMethod) -> Result<R, NodeError> {
        self.call(method, &serde_json::Value::Null).await
    }

    fn peer_param(peer: &PeerHandle) -> PeerParams {
        PeerParams {
            peer: peer.address().to_string(),
        }
    }
}

#[async_trait]
impl Peer for RemotePeer {
    fn address(&self) -> &str {
        &self.address
    }

    async fn get_address(&self) -> Result<String, NodeError> {
        self.call_bare(RpcMethod::GetAddress).await
    }

    async fn get_network(&self) -> Result<Vec<String>, NodeError> {
        self.call_bare(RpcMethod::GetNetwork).await
    }

    async fn add_node(&self, peer: PeerHandle) -> Result<(), NodeError> {
        self.call(RpcMethod::AddNode, &Self::peer_param(&peer)).await
    }

    async fn add_transaction(&self, transaction: String) -> Result<(), NodeError> {
        self.call(RpcMethod::AddTransaction, &TransactionParams { transaction }).await
    }

    async fn get_transactions(&self) -> Result<Vec<String>, NodeError> {
        self.call_bare(RpcMethod::GetTransactions).await
    }

    async fn get_transactions_size(&self) -> Result<usize, NodeError> {
        self.call_bare(RpcMethod::GetTransactionsSize).await
    }

    async fn remove_transactions(&self, transactions: Vec<String>) -> Result<(), NodeError> {
        self.call(RpcMethod::RemoveTransactions, &TransactionsParams { transactions })
            .await
    }

    async fn synchronize_transactions(&self, peer: PeerHandle) -> Result<SyncReport, NodeError> {
        self.call(RpcMethod::SynchronizeTransactions, &Self::peer_param(&peer))
            .await
    }

    async fn offer_transactions(&self, transactions: Vec<String>) -> Result<usize, NodeError> {
        self.call(RpcMethod::OfferTransactions, &TransactionsParams { transactions })
            .await
    }

    async fn start_mining(&self, data: String, difficulty: u32) -> Result<(), NodeError> {
        self.call(RpcMethod::StartMining, &MiningParams { data, difficulty })
            .await
    }

    async fn stop_mining(&self, nonce: u64) -> Result<(), NodeError> {
        self.call(RpcMethod::StopMining, &NonceParams { nonce }).await
    }

    async fn is_mining(&self) -> Result<bool, NodeError> {
        self.call_bare(RpcMethod::IsMining).await
    }

    async fn mine(&self, data: String, difficulty: u32) -> Result<u64, NodeError> {
        self.call(RpcMethod::Mine, &MiningParams { data, difficulty }).await
    }

    async fn add_block(&self, block: Block) -> Result<(), NodeError> {
        self.call(RpcMethod::AddBlock, &BlockParams { block }).await
    }

    async fn get_blockchain(&self) -> Result<Chain, NodeError> {
        self.call_bare(RpcMethod::GetBlockchain).await
    }

    async fn get_blockchain_size(&self) -> Result<usize, NodeError> {
        self.call_bare(RpcMethod::GetBlockchainSize).await
    }

    async fn get_blockchain_last_hash(&self) -> Result<String, NodeError> {
        self.call_bare(RpcMethod::GetBlockchainLastHash).await
    }

    async fn get_blockchain_transactions(&self) -> Result<Vec<String>, NodeError> {
        self.call_bare(RpcMethod::GetBlockchainTransactions).await
    }

    async fn synchronize_blockchain(&self) -> Result<bool, NodeError> {
        self.call_bare(RpcMethod::SynchronizeBlockchain).await
    }

    async fn get_merkle_list(&self) -> Result<BTreeSet<String>, NodeError> {
        self.call_bare(RpcMethod::GetMerkleList).await
    }

    async fn get_mkt_file(&self, root: String) -> Result<Vec<u8>, NodeError> {
        let encoded: String = self.call(RpcMethod::GetMktFile, &RootParams { root }).await?;
        hex::decode(&encoded).map_err(|e| self.unreachable(format!("artifact is not hex: {e}")))
    }

    async fn synchronize_merkles(&self, peer: PeerHandle) -> Result<SyncReport, NodeError> {
        self.call(RpcMethod::SynchronizeMerkles, &Self::peer_param(&peer))
            .await
    }

    async fn get_user_list(&self) -> Result<BTreeSet<String>, NodeError> {
        self.call_bare(RpcMethod::GetUserList).await
    }

    async fn get_user_files(&self, username: String) -> Result<UserFiles, NodeError> {
        self.call(RpcMethod::GetUserFiles, &UsernameParams { username })
            .await
    }

    async fn synchronize_users(&self, peer: PeerHandle) -> Result<SyncReport, NodeError> {
        self.call(RpcMethod::SynchronizeUsers, &Self::peer_param(&peer))
            .await
    }

    async fn register_user(&self, username: String, files: UserFiles) -> Result<(), NodeError> {
        self.call(RpcMethod::RegisterUser, &RegisterUserParams { username, files })
            .await
    }
}

/// Connects to peers over HTTP, sharing one connection pool.
#[derive(Debug, Clone)]
pub struct HttpConnector {
    client: reqwest::Client,
}

impl HttpConnector {
    pub fn new(timeout: Duration) -> Result<Self, NodeError> {
        Ok(Self {
            client: build_client(timeout)?,
        })
    }
}

impl PeerConnector for HttpConnector {
    fn connect(&self, address: &str) -> Result<PeerHandle, NodeError> {
        if !(address.starts_with("http://") || address.starts_with("https://")) {
            return Err(NodeError::PeerUnreachable {
                address: address.to_string(),
                reason: "address must be an http(s) URL".to_string(),
            });
        }
        Ok(Arc::new(RemotePeer::with_client(address, self.client.clone())))
    }
}
