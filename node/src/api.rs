//! # REST + WebSocket API
//!
//! Builds the axum router that exposes the node's HTTP interface. Peers
//! talk to each other exclusively through `/rpc`; the other routes are for
//! operators and UI clients.
//!
//! ## Endpoints
//!
//! | Method | Path      | Description                            |
//! |--------|-----------|----------------------------------------|
//! | GET    | `/health` | Liveness probe                         |
//! | GET    | `/status` | Node status summary                    |
//! | POST   | `/rpc`    | JSON-RPC 2.0 peer API                  |
//! | GET    | `/ws`     | WebSocket stream of node events        |

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{Method, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use registu_protocol::network::{dispatch, parse_request, Node, NodeStatus, RpcResponse};

use crate::metrics::SharedMetrics;

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared application state available to all request handlers.
///
/// Cheap to clone: everything behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// The node's reported version string.
    pub version: String,
    pub node: Arc<Node>,
    pub metrics: SharedMetrics,
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Builds the full axum [`Router`] with all API routes, CORS, and tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/rpc", post(rpc_handler))
        .route("/ws", get(ws_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Response Types
// ---------------------------------------------------------------------------

/// Response payload for `GET /status`.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    /// Node software version.
    pub version: String,
    #[serde(flatten)]
    pub node: NodeStatus,
    /// RFC 3339 timestamp of the response.
    pub timestamp: String,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /health`: returns 200 if the node is alive.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

/// `GET /status`: returns node status summary.
async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(StatusResponse {
        version: state.version.clone(),
        node: state.node.status(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// `POST /rpc`: JSON-RPC 2.0 gateway.
///
/// Unknown methods return -32601 and a missing or wrong `jsonrpc` field
/// returns -32600. Application errors carry the codes defined in
/// `registu_protocol::network::rpc`.
async fn rpc_handler(
    State(state): State<AppState>,
    Json(body): Json<serde_json::Value>,
) -> Json<RpcResponse> {
    let started = Instant::now();
    let response = match parse_request(body) {
        Ok(request) => dispatch(&state.node, request).await,
        Err(response) => response,
    };
    state
        .metrics
        .rpc_latency_seconds
        .observe(started.elapsed().as_secs_f64());
    Json(response)
}

/// `GET /ws`: upgrades to a WebSocket that pushes every node event as a
/// JSON text frame. Client messages are ignored.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state))
}

/// Forwards node events until the client disconnects or the node goes away.
async fn handle_ws_connection(socket: WebSocket, state: AppState) {
    let mut events = state.node.subscribe();
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(event) => {
                        let payload = match serde_json::to_string(&event) {
                            Ok(s) => s,
                            Err(e) => {
                                tracing::warn!("failed to serialize ws event: {}", e);
                                continue;
                            }
                        };
                        if sender.send(Message::Text(payload.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("ws subscriber lagged by {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            msg = receiver.next() => {
                match msg {
                    Some(Ok(_)) => {}
                    _ => break,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use registu_protocol::config::NodeConfig;
    use registu_protocol::network::{Peer, PeerHandle, RemotePeer};
    use std::time::Duration;
    use tower::ServiceExt;

    fn test_app_state(dir: &tempfile::TempDir, address: &str) -> AppState {
        let config = NodeConfig::new(address, dir.path())
            .with_difficulty(1)
            .with_rpc_timeout(Duration::from_secs(10));
        AppState {
            version: "0.1.0-test".into(),
            node: Node::open(config).unwrap(),
            metrics: Arc::new(crate::metrics::NodeMetrics::new().unwrap()),
        }
    }

    async fn get(router: &Router, path: &str) -> (StatusCode, Vec<u8>) {
        let req = Request::builder().uri(path).body(Body::empty()).unwrap();
        let resp = router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let body = resp.into_body().collect().await.unwrap().to_bytes().to_vec();
        (status, body)
    }

    async fn post_json(router: &Router, path: &str, body: serde_json::Value) -> (StatusCode, Vec<u8>) {
        let req = Request::builder()
            .method("POST")
            .uri(path)
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap();
        let resp = router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let body = resp.into_body().collect().await.unwrap().to_bytes().to_vec();
        (status, body)
    }

    /// Serves a fresh node on an ephemeral port and returns its state.
    async fn serve(dir: &tempfile::TempDir) -> AppState {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = format!("http://{}", listener.local_addr().unwrap());
        let state = test_app_state(dir, &address);
        let router = create_router(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        state
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let dir = tempfile::tempdir().unwrap();
        let router = create_router(test_app_state(&dir, "http://127.0.0.1:1"));
        let (status, body) = get(&router, "/health").await;

        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn status_reflects_node_state() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_app_state(&dir, "http://127.0.0.1:1");
        state.node.add_transaction("diploma".into()).await.unwrap();
        let router = create_router(state);

        let (status, body) = get(&router, "/status").await;
        assert_eq!(status, StatusCode::OK);
        let resp: StatusResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(resp.version, "0.1.0-test");
        assert_eq!(resp.node.pending, 1);
        assert_eq!(resp.node.chain_length, 0);
        assert_eq!(resp.node.tip, registu_protocol::config::EMPTY_CHAIN_TIP);
    }

    #[tokio::test]
    async fn rpc_adds_and_lists_transactions() {
        let dir = tempfile::tempdir().unwrap();
        let router = create_router(test_app_state(&dir, "http://127.0.0.1:1"));

        let add = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "registu_addTransaction",
            "params": { "transaction": "transcript" }
        });
        let (status, _) = post_json(&router, "/rpc", add).await;
        assert_eq!(status, StatusCode::OK);

        let list = serde_json::json!({ "jsonrpc": "2.0", "id": 2, "method": "registu_getTransactions" });
        let (_, body) = post_json(&router, "/rpc", list).await;
        let resp: RpcResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(resp.id, serde_json::json!(2));
        assert_eq!(resp.result, Some(serde_json::json!(["transcript"])));
    }

    #[tokio::test]
    async fn rpc_unknown_method_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let router = create_router(test_app_state(&dir, "http://127.0.0.1:1"));
        let req = serde_json::json!({ "jsonrpc": "2.0", "id": 3, "method": "registu_teleport" });

        let (status, body) = post_json(&router, "/rpc", req).await;
        assert_eq!(status, StatusCode::OK);
        let resp: RpcResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(resp.error.unwrap().code, -32601);
    }

    #[tokio::test]
    async fn rpc_invalid_version_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let router = create_router(test_app_state(&dir, "http://127.0.0.1:1"));
        let req = serde_json::json!({ "jsonrpc": "1.0", "id": 4, "method": "registu_isMining" });

        let (_, body) = post_json(&router, "/rpc", req).await;
        let resp: RpcResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(resp.error.unwrap().code, -32600);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn remote_peer_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let state = serve(&dir).await;
        let peer = RemotePeer::new(state.node.address(), Duration::from_secs(10)).unwrap();

        assert_eq!(peer.get_address().await.unwrap(), state.node.address());
        peer.add_transaction("credential-1".into()).await.unwrap();
        assert_eq!(peer.get_transactions().await.unwrap(), vec!["credential-1"]);
        assert_eq!(peer.get_blockchain_size().await.unwrap(), 0);
        assert!(!peer.is_mining().await.unwrap());

        let missing = peer.get_user_files("nobody".into()).await.unwrap_err();
        assert!(matches!(
            missing,
            registu_protocol::NodeError::Remote { code: -32008, .. }
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn two_nodes_link_over_http() {
        let (dir_a, dir_b) = (tempfile::tempdir().unwrap(), tempfile::tempdir().unwrap());
        let a = serve(&dir_a).await;
        let b = serve(&dir_b).await;

        let remote_b: PeerHandle = a.node.connect(b.node.address()).unwrap();
        a.node.add_node(remote_b).await.unwrap();
        assert_eq!(a.node.network(), vec![b.node.address().to_string()]);
        assert_eq!(b.node.network(), vec![a.node.address().to_string()]);

        for tx in ["t1", "t2", "t3", "t4"] {
            a.node.add_transaction(tx.into()).await.unwrap();
        }
        tokio::time::timeout(Duration::from_secs(30), async {
            while a.node.blockchain_size() < 1 || b.node.blockchain_size() < 1 {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(a.node.blockchain_last_hash(), b.node.blockchain_last_hash());
    }
}
