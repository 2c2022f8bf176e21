//! # CLI Interface
//!
//! Defines the command-line argument structure for `registu-node` using
//! `clap` derive. Supports four subcommands: `run`, `status`, `submit`
//! and `version`. Every flag can also come from a `REGISTU_*` variable.

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

use registu_protocol::config::{
    DEFAULT_BATCH_SIZE, DEFAULT_DIFFICULTY, DEFAULT_METRICS_PORT, DEFAULT_RPC_TIMEOUT,
};

use crate::logging::LogFormat;

/// RegisTu credential ledger node.
///
/// Keeps a proof-of-work chain of credential transactions, replicates it
/// with its peers, serves the JSON-RPC peer API and exposes Prometheus
/// metrics.
#[derive(Parser, Debug)]
#[command(
    name = "registu-node",
    about = "RegisTu credential ledger node",
    version,
    propagate_version = true
)]
pub struct RegistuNodeCli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the node.
    Run(RunArgs),
    /// Query the status of a running node over its RPC endpoint.
    Status(StatusArgs),
    /// Submit a transaction through a running node.
    Submit(SubmitArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Data directory holding the chain file, Merkle artifacts and users.
    ///
    /// Created on first run if it does not exist.
    #[arg(long, short = 'd', env = "REGISTU_DATA_DIR", default_value = "./registu-data")]
    pub data_dir: PathBuf,

    /// Socket address for the JSON-RPC, REST and WebSocket API.
    #[arg(long, env = "REGISTU_LISTEN", default_value = "0.0.0.0:9741")]
    pub listen: SocketAddr,

    /// Address peers use to reach this node.
    ///
    /// Defaults to `http://127.0.0.1:<listen port>`, which only works for
    /// peers on the same host.
    #[arg(long, env = "REGISTU_ADDRESS")]
    pub address: Option<String>,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "REGISTU_METRICS_PORT", default_value_t = DEFAULT_METRICS_PORT)]
    pub metrics_port: u16,

    /// Peer to link with on startup. Repeatable.
    #[arg(long = "peer", env = "REGISTU_PEERS", value_delimiter = ',')]
    pub peers: Vec<String>,

    /// Leading zero hex digits a block hash must carry.
    #[arg(long, env = "REGISTU_DIFFICULTY", default_value_t = DEFAULT_DIFFICULTY)]
    pub difficulty: u32,

    /// Pending transactions that trigger block assembly.
    #[arg(long, env = "REGISTU_BATCH_SIZE", default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,

    /// Timeout for outbound peer calls, in seconds.
    #[arg(long, env = "REGISTU_RPC_TIMEOUT_SECS", default_value_t = DEFAULT_RPC_TIMEOUT.as_secs())]
    pub rpc_timeout_secs: u64,

    /// Log output format.
    #[arg(long, env = "REGISTU_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

/// Arguments for the `status` subcommand.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// RPC endpoint of the running node.
    #[arg(long, env = "REGISTU_RPC_URL", default_value = "http://127.0.0.1:9741")]
    pub rpc_url: String,
}

/// Arguments for the `submit` subcommand.
#[derive(Parser, Debug)]
pub struct SubmitArgs {
    /// RPC endpoint of the running node.
    #[arg(long, env = "REGISTU_RPC_URL", default_value = "http://127.0.0.1:9741")]
    pub rpc_url: String,

    /// Transaction payload, as produced by the credential layer.
    pub transaction: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli_structure() {
        RegistuNodeCli::command().debug_assert();
    }

    #[test]
    fn run_defaults() {
        let cli = RegistuNodeCli::try_parse_from(["registu-node", "run"]).unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.listen.port(), 9741);
        assert_eq!(args.difficulty, DEFAULT_DIFFICULTY);
        assert_eq!(args.batch_size, DEFAULT_BATCH_SIZE);
        assert!(args.peers.is_empty());
        assert_eq!(args.log_format, LogFormat::Pretty);
    }

    #[test]
    fn peers_repeat() {
        let cli = RegistuNodeCli::try_parse_from([
            "registu-node",
            "run",
            "--peer",
            "http://10.0.0.1:9741",
            "--peer",
            "http://10.0.0.2:9741",
            "--log-format",
            "json",
        ])
        .unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.peers.len(), 2);
        assert_eq!(args.log_format, LogFormat::Json);
    }
}
