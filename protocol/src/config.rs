//! # Protocol Configuration & Constants
//!
//! Every network-wide constant lives here. Nodes that disagree on any of
//! the values in the "Consensus Parameters" section cannot validate each
//! other's blocks, so treat them as part of the wire format.
//!
//! Per-node knobs (listen address, data directory, batch threshold) are
//! grouped in [`NodeConfig`], which the node binary fills from the CLI.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Protocol Version
// ---------------------------------------------------------------------------

/// Human-readable protocol version reported by `/status` and `version`.
pub const PROTOCOL_VERSION: &str = "0.1.0";

/// Prefix for every JSON-RPC method name on the wire.
pub const RPC_METHOD_PREFIX: &str = "registu_";

// ---------------------------------------------------------------------------
// Consensus Parameters
// ---------------------------------------------------------------------------

/// Required count of leading `'0'` characters in a block hash.
pub const DEFAULT_DIFFICULTY: u32 = 4;

/// Pending transactions consumed by one block.
pub const DEFAULT_BATCH_SIZE: usize = 4;

/// Tip hash of the empty chain. Stands in for the implicit genesis
/// predecessor, so the first block's `previous_hash` equals this value.
pub const EMPTY_CHAIN_TIP: &str = "00000000";

/// Upper bound on difficulty: a hex-encoded 256-bit digest has 64 characters.
pub const MAX_DIFFICULTY: u32 = 64;

/// How many proof-of-work searches a block assembly task runs before it
/// gives up and returns its batch to the pending set.
pub const MAX_SEAL_ATTEMPTS: u32 = 3;

/// Pause before a returned batch is assembled again.
pub const ASSEMBLY_RETRY_DELAY: Duration = Duration::from_millis(250);

// ---------------------------------------------------------------------------
// Persisted Layout
// ---------------------------------------------------------------------------

/// Whole-chain serialization, relative to the data directory.
pub const CHAIN_FILE_NAME: &str = "bchain.bc";

/// Directory holding one Merkle artifact per sealed batch.
pub const MERKLE_DIR_NAME: &str = "mktrees";

/// Extension of a Merkle artifact file (`<root>.mkt`).
pub const MERKLE_FILE_EXTENSION: &str = "mkt";

/// Directory holding one sub-directory per known user.
pub const USERS_DIR_NAME: &str = "users";

/// Extensions of the four files that make up a user bundle
/// (`users/<name>/<name>.<ext>`).
pub const USER_PUBLIC_KEY_EXTENSION: &str = "pubk";
pub const USER_PRIVATE_KEY_EXTENSION: &str = "privk";
pub const USER_SYMMETRIC_KEY_EXTENSION: &str = "simk";
pub const USER_PROPS_EXTENSION: &str = "props";

// ---------------------------------------------------------------------------
// Networking
// ---------------------------------------------------------------------------

/// Default port for the HTTP JSON-RPC and websocket API.
pub const DEFAULT_RPC_PORT: u16 = 9741;

/// Default port for the Prometheus metrics endpoint.
pub const DEFAULT_METRICS_PORT: u16 = 9742;

/// Per-call timeout for outbound peer RPCs. Generous because `mine`
/// blocks until a nonce is found.
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(120);

/// Broadcast channel capacity for node events. Slow subscribers lag and
/// skip events rather than stall the node.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// Node Configuration
// ---------------------------------------------------------------------------

/// Runtime configuration for a single node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Address peers use to reach this node, e.g. `http://10.0.0.5:9741`.
    /// Doubles as the node's identity in peer views.
    pub address: String,
    /// Root of the persisted layout (chain file, artifacts, users).
    pub data_dir: PathBuf,
    /// Leading-zero requirement for sealed blocks.
    pub difficulty: u32,
    /// Pending-set size that triggers block assembly.
    pub batch_size: usize,
    /// Timeout applied to every outbound peer call.
    #[serde(with = "duration_millis")]
    pub rpc_timeout: Duration,
    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
}

impl NodeConfig {
    /// Configuration with protocol defaults for everything but identity
    /// and storage location.
    pub fn new(address: impl Into<String>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            address: address.into(),
            data_dir: data_dir.into(),
            difficulty: DEFAULT_DIFFICULTY,
            batch_size: DEFAULT_BATCH_SIZE,
            rpc_timeout: DEFAULT_RPC_TIMEOUT,
            event_capacity: EVENT_CHANNEL_CAPACITY,
        }
    }

    /// Overrides the difficulty, clamped to what a digest can satisfy.
    pub fn with_difficulty(mut self, difficulty: u32) -> Self {
        self.difficulty = difficulty.min(MAX_DIFFICULTY);
        self
    }

    /// Overrides the batch threshold. Zero is bumped to one.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_rpc_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout = timeout;
        self
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

// ---------------------------------------------------------------------------
// Compile-time Sanity Checks
// ---------------------------------------------------------------------------
