// Copyright (c) 2026 RegisTu contributors. MIT License.
// See LICENSE for details.

//! # RegisTu Ledger Node
//!
//! Entry point for the `registu-node` binary. Parses CLI arguments,
//! initializes logging and metrics, opens the node and serves the
//! HTTP/WS API.
//!
//! The binary supports four subcommands:
//!
//! - `run`    : start the node
//! - `status` : query a running node over JSON-RPC
//! - `submit` : add a transaction through a running node
//! - `version`: print build version information

mod api;
mod cli;
mod logging;
mod metrics;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

use registu_protocol::config::{NodeConfig, PROTOCOL_VERSION};
use registu_protocol::network::{Node, Peer, RemotePeer};

use cli::{Commands, RegistuNodeCli};
use metrics::NodeMetrics;

/// Timeout for the one-shot `status` and `submit` calls.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = RegistuNodeCli::parse();

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::Status(args) => query_status(args).await,
        Commands::Submit(args) => submit_transaction(args).await,
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Starts the node: API server, metrics endpoint and bootstrap links.
async fn run_node(args: cli::RunArgs) -> Result<()> {
    logging::init_logging(logging::DEFAULT_FILTER, args.log_format);

    let address = args
        .address
        .clone()
        .unwrap_or_else(|| format!("http://127.0.0.1:{}", args.listen.port()));

    tracing::info!(
        address = %address,
        listen = %args.listen,
        metrics_port = args.metrics_port,
        data_dir = %args.data_dir.display(),
        difficulty = args.difficulty,
        batch_size = args.batch_size,
        "starting registu-node"
    );

    let config = NodeConfig::new(address, args.data_dir.clone())
        .with_difficulty(args.difficulty)
        .with_batch_size(args.batch_size)
        .with_rpc_timeout(Duration::from_secs(args.rpc_timeout_secs));
    let node = Node::open(config)
        .with_context(|| format!("failed to open node at {}", args.data_dir.display()))?;

    // --- Metrics ---
    let node_metrics = Arc::new(NodeMetrics::new().context("failed to create metrics registry")?);
    let metrics_feed = metrics::spawn_event_feed(Arc::clone(&node), Arc::clone(&node_metrics));

    // --- API server ---
    let app_state = api::AppState {
        version: format!("{} (protocol {})", env!("CARGO_PKG_VERSION"), PROTOCOL_VERSION),
        node: Arc::clone(&node),
        metrics: Arc::clone(&node_metrics),
    };
    let api_router = api::create_router(app_state);
    let api_listener = tokio::net::TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("failed to bind RPC listener on {}", args.listen))?;
    tracing::info!("RPC/API server listening on {}", args.listen);

    // --- Metrics server ---
    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&node_metrics));
    let metrics_addr = SocketAddr::new(args.listen.ip(), args.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", metrics_addr))?;
    tracing::info!("Metrics server listening on {}", metrics_addr);

    // --- Bootstrap peers ---
    let bootstrap = tokio::spawn(link_peers(Arc::clone(&node), args.peers.clone()));

    // --- Serve ---
    tokio::select! {
        res = axum::serve(api_listener, api_router) => {
            if let Err(e) = res {
                tracing::error!("API server error: {}", e);
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!("Metrics server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received, draining connections");
        }
    }

    bootstrap.abort();
    metrics_feed.abort();
    tracing::info!("registu-node stopped");
    Ok(())
}

/// Links every configured peer in turn. A peer that cannot be reached is
/// logged and skipped.
async fn link_peers(node: Arc<Node>, peers: Vec<String>) {
    for address in peers {
        let linked = match node.connect(&address) {
            Ok(peer) => node.add_node(peer).await,
            Err(e) => Err(e),
        };
        match linked {
            Ok(()) => tracing::info!(peer = %address, "linked bootstrap peer"),
            Err(e) => tracing::warn!(peer = %address, error = %e, "failed to link bootstrap peer"),
        }
    }
}

/// Queries a running node over JSON-RPC and prints a JSON summary.
async fn query_status(args: cli::StatusArgs) -> Result<()> {
    let peer = RemotePeer::new(&args.rpc_url, CLIENT_TIMEOUT)?;
    let status = json!({
        "address": peer.get_address().await.context("node did not answer")?,
        "chain_length": peer.get_blockchain_size().await?,
        "tip": peer.get_blockchain_last_hash().await?,
        "pending": peer.get_transactions_size().await?,
        "mining": peer.is_mining().await?,
        "peers": peer.get_network().await?,
        "known_merkles": peer.get_merkle_list().await?.len(),
        "known_users": peer.get_user_list().await?.len(),
    });
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

/// Adds one transaction through a running node.
async fn submit_transaction(args: cli::SubmitArgs) -> Result<()> {
    let peer = RemotePeer::new(&args.rpc_url, CLIENT_TIMEOUT)?;
    peer.add_transaction(args.transaction.clone())
        .await
        .with_context(|| format!("failed to submit transaction to {}", args.rpc_url))?;
    let pending = peer.get_transactions_size().await?;
    println!("submitted {} ({} pending)", args.transaction, pending);
    Ok(())
}

/// Prints version information to stdout.
fn print_version() {
    println!("registu-node {}", env!("CARGO_PKG_VERSION"));
    println!("protocol     {}", PROTOCOL_VERSION);
    println!("rustc        {}", rustc_version());
}

/// Returns the Rust compiler version used to build this binary.
fn rustc_version() -> &'static str {
    option_env!("RUSTC_VERSION").unwrap_or("unknown")
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported. A handler that cannot
/// be installed never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
