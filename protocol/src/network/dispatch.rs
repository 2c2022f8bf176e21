//! # RPC Dispatch
//!
//! Server side of the peer API: decodes a JSON-RPC request, runs the
//! matching [`Node`] operation and encodes the reply. Transport-agnostic;
//! the node binary mounts it behind `POST /rpc`.
//!
//! Peer arguments arrive as addresses and are resolved through the node's
//! connector before the operation runs.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::network::node::{Node, NodeError};
use crate::network::peer::PeerHandle;
use crate::network::rpc::{
    BlockParams, MiningParams, NonceParams, PeerParams, RegisterUserParams, RootParams, RpcError,
    RpcMethod, RpcRequest, RpcResponse, TransactionParams, TransactionsParams, UsernameParams,
};

/// Decodes a raw JSON body into a request, or the error response to send
/// back when that is impossible.
pub fn parse_request(body: Value) -> Result<RpcRequest, RpcResponse> {
    let id = body.get("id").cloned().unwrap_or(Value::Null);
    let Some(method) = body.get("method").and_then(Value::as_str).map(str::to_owned) else {
        return Err(RpcResponse::error(
            id,
            RpcError::invalid_request("missing method"),
        ));
    };
    if body.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
        return Err(RpcResponse::error(
            id,
            RpcError::invalid_request("jsonrpc must be \"2.0\""),
        ));
    }
    serde_json::from_value(body).map_err(|_| RpcResponse::error(id, RpcError::method_not_found(method)))
}

/// Runs `request` against `node`.
pub async fn dispatch(node: &Node, request: RpcRequest) -> RpcResponse {
    let RpcRequest { id, method, params, .. } = request;
    debug!(?method, "rpc request");
    match invoke(node, method, params).await {
        Ok(result) => RpcResponse::success(id, result),
        Err(e) => {
            debug!(?method, error = %e, "rpc request failed");
            RpcResponse::error(id, RpcError::from(&e))
        }
    }
}

fn decode<P: DeserializeOwned>(params: Value) -> Result<P, NodeError> {
    serde_json::from_value(params).map_err(|e| NodeError::Codec(e.to_string()))
}

fn encode<R: Serialize>(result: R) -> Result<Value, NodeError> {
    serde_json::to_value(result).map_err(|e| NodeError::Codec(e.to_string()))
}

fn resolve(node: &Node, params: Value) -> Result<PeerHandle, NodeError> {
    let PeerParams { peer } = decode(params)?;
    node.connect(&peer)
}

async fn invoke(node: &Node, method: RpcMethod, params: Value) -> Result<Value, NodeError> {
    match method {
        RpcMethod::GetAddress => encode(node.address()),
        RpcMethod::GetNetwork => encode(node.network()),
        RpcMethod::AddNode => encode(node.add_node(resolve(node, params)?).await?),

        RpcMethod::AddTransaction => {
            let TransactionParams { transaction } = decode(params)?;
            encode(node.add_transaction(transaction).await?)
        }
        RpcMethod::GetTransactions => encode(node.transactions()),
        RpcMethod::GetTransactionsSize => encode(node.transactions_size()),
        RpcMethod::RemoveTransactions => {
            let TransactionsParams { transactions } = decode(params)?;
            encode(node.remove_transactions(transactions).await?)
        }
        RpcMethod::SynchronizeTransactions => {
            encode(node.synchronize_transactions(resolve(node, params)?).await?)
        }
        RpcMethod::OfferTransactions => {
            let TransactionsParams { transactions } = decode(params)?;
            encode(node.offer_transactions(transactions))
        }

        RpcMethod::StartMining => {
            let MiningParams { data, difficulty } = decode(params)?;
            encode(node.start_mining(data, difficulty).await?)
        }
        RpcMethod::StopMining => {
            let NonceParams { nonce } = decode(params)?;
            encode(node.stop_mining(nonce).await?)
        }
        RpcMethod::IsMining => encode(node.is_mining()),
        RpcMethod::Mine => {
            let MiningParams { data, difficulty } = decode(params)?;
            encode(node.mine(data, difficulty).await?)
        }

        RpcMethod::AddBlock => {
            let BlockParams { block } = decode(params)?;
            encode(node.add_block(block).await?)
        }
        RpcMethod::GetBlockchain => encode(&*node.blockchain()),
        RpcMethod::GetBlockchainSize => encode(node.blockchain_size()),
        RpcMethod::GetBlockchainLastHash => encode(node.blockchain_last_hash()),
        RpcMethod::GetBlockchainTransactions => encode(node.blockchain_transactions()),
        RpcMethod::SynchronizeBlockchain => encode(node.synchronize_blockchain().await?),

        RpcMethod::GetMerkleList => encode(node.merkle_list()),
        RpcMethod::GetMktFile => {
            let RootParams { root } = decode(params)?;
            encode(hex::encode(node.mkt_file(&root)?))
        }
        RpcMethod::SynchronizeMerkles => {
            encode(node.synchronize_merkles(resolve(node, params)?).await?)
        }

        RpcMethod::GetUserList => encode(node.user_list()),
        RpcMethod::GetUserFiles => {
            let UsernameParams { username } = decode(params)?;
            encode(node.user_files(&username)?)
        }
        RpcMethod::SynchronizeUsers => encode(node.synchronize_users(resolve(node, params)?).await?),
        RpcMethod::RegisterUser => {
            let RegisterUserParams { username, files } = decode(params)?;
            encode(node.register_user(username, files).await?)
        }
    }
}
