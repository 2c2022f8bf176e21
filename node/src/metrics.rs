//! # Prometheus Metrics
//!
//! Operational metrics for the ledger node, scraped at `/metrics` on the
//! metrics port. Gauges are refreshed from the node's event stream, so the
//! protocol crate never depends on Prometheus.
//!
//! All metrics live in a dedicated [`prometheus::Registry`] with the
//! `registu` prefix.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Registry, TextEncoder,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use registu_protocol::network::{Node, NodeEvent, NodeStatus};

/// Holds all Prometheus metric handles for the node.
#[derive(Clone)]
pub struct NodeMetrics {
    registry: Registry,
    /// Blocks in the local chain.
    pub chain_length: IntGauge,
    /// Chain updates observed (appends and adoptions).
    pub blocks_appended_total: IntCounter,
    pub pending_transactions: IntGauge,
    pub known_peers: IntGauge,
    /// 1 while a proof-of-work search runs.
    pub mining: IntGauge,
    /// Nonces this node found itself.
    pub nonces_found_total: IntCounter,
    pub peers_evicted_total: IntCounter,
    pub known_users: IntGauge,
    pub known_merkles: IntGauge,
    /// Wall time spent serving one JSON-RPC request.
    pub rpc_latency_seconds: Histogram,
}

fn register<M>(registry: &Registry, metric: M) -> Result<M, prometheus::Error>
where
    M: prometheus::core::Collector + Clone + 'static,
{
    registry.register(Box::new(metric.clone()))?;
    Ok(metric)
}

impl NodeMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("registu".into()), None)?;

        let gauge = |name: &str, help: &str| register(&registry, IntGauge::new(name, help)?);
        let counter = |name: &str, help: &str| register(&registry, IntCounter::new(name, help)?);

        Ok(Self {
            chain_length: gauge("chain_length", "Number of blocks in the local chain")?,
            blocks_appended_total: counter(
                "blocks_appended_total",
                "Chain updates observed, appends and adoptions",
            )?,
            pending_transactions: gauge("pending_transactions", "Transactions waiting for a block")?,
            known_peers: gauge("known_peers", "Peers in this node's view")?,
            mining: gauge("mining", "1 while a proof-of-work search is running")?,
            nonces_found_total: counter("nonces_found_total", "Nonces found by this node")?,
            peers_evicted_total: counter("peers_evicted_total", "Peers dropped after a failed call")?,
            known_users: gauge("known_users", "Registered users known to this node")?,
            known_merkles: gauge("known_merkles", "Merkle artifacts stored by this node")?,
            rpc_latency_seconds: register(
                &registry,
                Histogram::with_opts(
                    HistogramOpts::new("rpc_latency_seconds", "JSON-RPC request latency in seconds")
                        .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0]),
                )?,
            )?,
            registry,
        })
    }

    /// Sets every gauge from a status snapshot.
    pub fn refresh(&self, status: &NodeStatus) {
        self.chain_length.set(status.chain_length as i64);
        self.pending_transactions.set(status.pending as i64);
        self.known_peers.set(status.peers.len() as i64);
        self.mining.set(i64::from(status.mining));
        self.known_users.set(status.known_users as i64);
        self.known_merkles.set(status.known_merkles as i64);
    }

    /// Bumps the counters an event stands for.
    pub fn observe(&self, event: &NodeEvent) {
        match event {
            NodeEvent::ChainUpdated { .. } => self.blocks_appended_total.inc(),
            NodeEvent::NonceFound { .. } => self.nonces_found_total.inc(),
            NodeEvent::PeerEvicted { .. } => self.peers_evicted_total.inc(),
            _ => {}
        }
    }

    /// Encodes all registered metrics into the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Shared metrics state passed to axum handlers.
pub type SharedMetrics = Arc<NodeMetrics>;

/// Keeps `metrics` in step with `node` until the event stream closes.
pub fn spawn_event_feed(node: Arc<Node>, metrics: SharedMetrics) -> JoinHandle<()> {
    let mut events = node.subscribe();
    metrics.refresh(&node.status());
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => metrics.observe(&event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::debug!(skipped = n, "metrics feed lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
            metrics.refresh(&node.status());
        }
    })
}

/// Axum handler that renders `/metrics` in Prometheus text format.
pub async fn metrics_handler(
    axum::extract::State(metrics): axum::extract::State<SharedMetrics>,
) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}
