//! # JSON-RPC API Definitions
//!
//! Wire types for the peer API. This module defines the request/response
//! envelopes, the method enumeration and the parameter payloads. The server
//! side is [`dispatch`](crate::network::dispatch), the client side is
//! [`RemotePeer`](crate::network::client::RemotePeer), and the HTTP listener
//! lives in the node binary (axum).
//!
//! The API follows JSON-RPC 2.0 with method names prefixed `registu_`.
//!
//! ## Method Index
//!
//! | Method                               | Params                  |
//! |--------------------------------------|-------------------------|
//! | `registu_getAddress`                 | none                    |
//! | `registu_getNetwork`                 | none                    |
//! | `registu_addNode`                    | `PeerParams`            |
//! | `registu_addTransaction`             | `TransactionParams`     |
//! | `registu_getTransactions`            | none                    |
//! | `registu_getTransactionsSize`        | none                    |
//! | `registu_removeTransactions`         | `TransactionsParams`    |
//! | `registu_synchronizeTransactions`    | `PeerParams`            |
//! | `registu_offerTransactions`          | `TransactionsParams`    |
//! | `registu_startMining`                | `MiningParams`          |
//! | `registu_stopMining`                 | `NonceParams`           |
//! | `registu_isMining`                   | none                    |
//! | `registu_mine`                       | `MiningParams`          |
//! | `registu_addBlock`                   | `BlockParams`           |
//! | `registu_getBlockchain`              | none                    |
//! | `registu_getBlockchainSize`          | none                    |
//! | `registu_getBlockchainLastHash`      | none                    |
//! | `registu_getBlockchainTransactions`  | none                    |
//! | `registu_synchronizeBlockchain`      | none                    |
//! | `registu_getMerkleList`              | none                    |
//! | `registu_getMktFile`                 | `RootParams`            |
//! | `registu_synchronizeMerkles`         | `PeerParams`            |
//! | `registu_getUserList`                | none                    |
//! | `registu_getUserFiles`               | `UsernameParams`        |
//! | `registu_synchronizeUsers`           | `PeerParams`            |
//! | `registu_registerUser`               | `RegisterUserParams`    |

use serde::{Deserialize, Serialize};

use crate::network::miner::MinerError;
use crate::network::node::NodeError;
use crate::storage::{Block, BlockError, ChainError, StoreError, UserFiles};

// ---------------------------------------------------------------------------
// RPC Method Enumeration
// ---------------------------------------------------------------------------

/// Supported JSON-RPC methods. The wire name is the `serde` rename.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RpcMethod {
    #[serde(rename = "registu_getAddress")]
    GetAddress,
    #[serde(rename = "registu_getNetwork")]
    GetNetwork,
    #[serde(rename = "registu_addNode")]
    AddNode,
    #[serde(rename = "registu_addTransaction")]
    AddTransaction,
    #[serde(rename = "registu_getTransactions")]
    GetTransactions,
    #[serde(rename = "registu_getTransactionsSize")]
    GetTransactionsSize,
    #[serde(rename = "registu_removeTransactions")]
    RemoveTransactions,
    #[serde(rename = "registu_synchronizeTransactions")]
    SynchronizeTransactions,
    #[serde(rename = "registu_offerTransactions")]
    OfferTransactions,
    #[serde(rename = "registu_startMining")]
    StartMining,
    #[serde(rename = "registu_stopMining")]
    StopMining,
    #[serde(rename = "registu_isMining")]
    IsMining,
    /// Blocks until the nonce is known. Clients need a generous timeout.
    #[serde(rename = "registu_mine")]
    Mine,
    #[serde(rename = "registu_addBlock")]
    AddBlock,
    #[serde(rename = "registu_getBlockchain")]
    GetBlockchain,
    #[serde(rename = "registu_getBlockchainSize")]
    GetBlockchainSize,
    #[serde(rename = "registu_getBlockchainLastHash")]
    GetBlockchainLastHash,
    #[serde(rename = "registu_getBlockchainTransactions")]
    GetBlockchainTransactions,
    #[serde(rename = "registu_synchronizeBlockchain")]
    SynchronizeBlockchain,
    #[serde(rename = "registu_getMerkleList")]
    GetMerkleList,
    #[serde(rename = "registu_getMktFile")]
    GetMktFile,
    #[serde(rename = "registu_synchronizeMerkles")]
    SynchronizeMerkles,
    #[serde(rename = "registu_getUserList")]
    GetUserList,
    #[serde(rename = "registu_getUserFiles")]
    GetUserFiles,
    #[serde(rename = "registu_synchronizeUsers")]
    SynchronizeUsers,
    #[serde(rename = "registu_registerUser")]
    RegisterUser,
}

impl RpcMethod {
    pub const ALL: [RpcMethod; 26] = [
        RpcMethod::GetAddress,
        RpcMethod::GetNetwork,
        RpcMethod::AddNode,
        RpcMethod::AddTransaction,
        RpcMethod::GetTransactions,
        RpcMethod::GetTransactionsSize,
        RpcMethod::RemoveTransactions,
        RpcMethod::SynchronizeTransactions,
        RpcMethod::OfferTransactions,
        RpcMethod::StartMining,
        RpcMethod::StopMining,
        RpcMethod::IsMining,
        RpcMethod::Mine,
        RpcMethod::AddBlock,
        RpcMethod::GetBlockchain,
        RpcMethod::GetBlockchainSize,
        RpcMethod::GetBlockchainLastHash,
        RpcMethod::GetBlockchainTransactions,
        RpcMethod::SynchronizeBlockchain,
        RpcMethod::GetMerkleList,
        RpcMethod::GetMktFile,
        RpcMethod::SynchronizeMerkles,
        RpcMethod::GetUserList,
        RpcMethod::GetUserFiles,
        RpcMethod::SynchronizeUsers,
        RpcMethod::RegisterUser,
    ];
}

// ---------------------------------------------------------------------------
// RPC Request / Response
// ---------------------------------------------------------------------------

/// A JSON-RPC 2.0 request.
///
/// `params` is kept as an opaque JSON value; each method handler decodes
/// its own payload type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Always "2.0".
    pub jsonrpc: String,
    /// Echoed back in the response.
    pub id: serde_json::Value,
    pub method: RpcMethod,
    #[serde(default)]
    pub params: serde_json::Value,
}

impl RpcRequest {
    pub fn new(id: serde_json::Value, method: RpcMethod, params: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            method,
            params,
        }
    }
}

/// A JSON-RPC 2.0 response. Exactly one of `result` or `error` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub id: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    pub fn success(id: serde_json::Value, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: serde_json::Value, error: RpcError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

// ---------------------------------------------------------------------------
// RPC Errors
// ---------------------------------------------------------------------------

pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;

pub const INVALID_BLOCK: i32 = -32001;
pub const DUPLICATE_BLOCK: i32 = -32002;
pub const CHAIN_MISMATCH: i32 = -32003;
pub const INVALID_NONCE: i32 = -32004;
pub const STORAGE_ERROR: i32 = -32005;
pub const INTERRUPTED_WAIT: i32 = -32006;
pub const PEER_UNREACHABLE: i32 = -32007;
pub const NOT_FOUND: i32 = -32008;

/// JSON-RPC 2.0 error object.
///
/// Standard codes sit in `-32700..=-32600`. Application codes start at
/// `-32001`, one per [`NodeError`] kind a peer needs to tell apart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl RpcError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn parse_error(msg: impl Into<String>) -> Self {
        Self::new(PARSE_ERROR, msg)
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::new(INVALID_REQUEST, msg)
    }

    pub fn method_not_found(method: impl Into<String>) -> Self {
        Self::new(METHOD_NOT_FOUND, format!("method not found: {}", method.into()))
    }

    pub fn invalid_params(msg: impl Into<String>) -> Self {
        Self::new(INVALID_PARAMS, msg)
    }

    pub fn internal_error(msg: impl Into<String>) -> Self {
        Self::new(INTERNAL_ERROR, msg)
    }
}

impl From<&NodeError> for RpcError {
    fn from(error: &NodeError) -> Self {
        let code = match error {
            NodeError::Chain(ChainError::InvalidBlock(_)) => INVALID_BLOCK,
            NodeError::Chain(ChainError::DuplicateBlock(_)) => DUPLICATE_BLOCK,
            NodeError::Chain(ChainError::ChainMismatch { .. }) => CHAIN_MISMATCH,
            NodeError::Chain(_) => STORAGE_ERROR,
            NodeError::Block(BlockError::InvalidNonce { .. }) => INVALID_NONCE,
            NodeError::Store(StoreError::InvalidName(_)) => INVALID_PARAMS,
            NodeError::Store(e) if e.is_not_found() => NOT_FOUND,
            NodeError::Store(_) => STORAGE_ERROR,
            NodeError::Miner(MinerError::InterruptedWait { .. }) => INTERRUPTED_WAIT,
            NodeError::PeerUnreachable { .. } => PEER_UNREACHABLE,
            NodeError::Remote { code, .. } => *code,
            NodeError::Codec(_) => INVALID_PARAMS,
            NodeError::Transport(_) | NodeError::ShuttingDown => INTERNAL_ERROR,
        };
        Self::new(code, error.to_string())
    }
}

// ---------------------------------------------------------------------------
// Parameter Payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionParams {
    pub transaction: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionsParams {
    pub transactions: Vec<String>,
}

/// A peer argument: the address the receiver should connect back to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerParams {
    pub peer: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MiningParams {
    pub data: String,
    pub difficulty: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NonceParams {
    pub nonce: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockParams {
    pub block: Block,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootParams {
    pub root: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsernameParams {
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterUserParams {
    pub username: String,
    pub files: UserFiles,
}
