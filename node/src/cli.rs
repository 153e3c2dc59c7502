//! # CLI Interface
//!
//! Defines the command-line argument structure for `shipsync-node` using
//! `clap` derive. Three long-running roles (`bridge`, `receiver`, `shipper`)
//! and a handful of one-shot tools (`ship`, `query`, `status`, `reconcile`,
//! `keygen`, `version`).
//!
//! Every flag a deployment would set has a `SHIPSYNC_*` environment fallback.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use shipsync_protocol::config;
use shipsync_protocol::crypto::SignatureAlgorithm;
use shipsync_protocol::transaction::ShipmentStatus;

/// ShipSync relay node.
///
/// Relays signed shipment payloads from shipper to receiver, verifying every
/// hop against a trusted sender registry, and keeps a durable audit trail of
/// what happened to each one.
#[derive(Parser, Debug)]
#[command(
    name = "shipsync-node",
    about = "ShipSync payload relay node",
    version,
    propagate_version = true
)]
pub struct ShipSyncCli {
    /// Log output format.
    #[arg(long, global = true, env = "SHIPSYNC_LOG_FORMAT", value_enum, default_value_t = LogFormatArg::Pretty)]
    pub log_format: LogFormatArg,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormatArg {
    Pretty,
    Json,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a bridge: verify, store, forward to the next hop.
    Bridge(BridgeArgs),
    /// Run a receiver: verify, store, call the ERP, complete.
    Receiver(ReceiverArgs),
    /// Run the shipper's completion listener.
    Shipper(ShipperArgs),
    /// Sign a shipment payload and submit it.
    Ship(ShipArgs),
    /// Ask a node where a transaction stands.
    Query(QueryArgs),
    /// Sign and send a shipment status update.
    Status(StatusArgs),
    /// Retry forwarding for transactions held for reconciliation.
    ///
    /// Opens the store directly, so the node that owns it must be stopped.
    Reconcile(ReconcileArgs),
    /// Generate a signing key and print its registry entry.
    Keygen(KeygenArgs),
    /// Print version information and exit.
    Version,
}

// ---------------------------------------------------------------------------
// Long-running roles
// ---------------------------------------------------------------------------

/// Settings shared by every listening role.
#[derive(Args, Debug, Clone)]
pub struct NodeArgs {
    /// This node's identity, recorded as the actor on its audit entries.
    #[arg(long, env = "SHIPSYNC_NODE_ID")]
    pub node_id: String,

    /// Address for the relay listener.
    #[arg(long, env = "SHIPSYNC_LISTEN")]
    pub listen: Option<String>,

    /// Directory for the transaction store. Created if missing.
    #[arg(long, short = 'd', env = "SHIPSYNC_DATA_DIR", default_value = "./shipsync-data")]
    pub data_dir: PathBuf,

    /// Trusted sender registry (JSON).
    #[arg(long, env = "SHIPSYNC_REGISTRY", default_value = "trusted_senders.json")]
    pub registry: PathBuf,

    /// Port for the read-only HTTP API.
    #[arg(long, env = "SHIPSYNC_API_PORT", default_value_t = config::DEFAULT_API_PORT)]
    pub api_port: u16,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "SHIPSYNC_METRICS_PORT", default_value_t = config::DEFAULT_METRICS_PORT)]
    pub metrics_port: u16,

    #[command(flatten)]
    pub key: NodeKeyArgs,

    #[command(flatten)]
    pub tuning: TuningArgs,
}

/// The node's own key. Completion notices are signed with it, so the
/// originator's registry must list its public half under the node id.
#[derive(Args, Debug, Clone)]
pub struct NodeKeyArgs {
    /// File holding the node's hex-encoded secret key.
    #[arg(long, env = "SHIPSYNC_SIGNING_KEY")]
    pub signing_key: Option<PathBuf>,

    #[arg(long, env = "SHIPSYNC_SIGNING_ALGORITHM", default_value_t = SignatureAlgorithm::Es256k)]
    pub signing_algorithm: SignatureAlgorithm,
}

/// Timeouts, retry policy, frame limit.
#[derive(Args, Debug, Clone)]
pub struct TuningArgs {
    /// Attempts per outbound send before giving up.
    #[arg(long, env = "SHIPSYNC_MAX_ATTEMPTS", default_value_t = config::FORWARD_MAX_ATTEMPTS)]
    pub max_attempts: u32,

    /// First backoff delay in milliseconds; doubles per attempt.
    #[arg(long, env = "SHIPSYNC_BASE_DELAY_MS", default_value_t = config::FORWARD_BASE_DELAY.as_millis() as u64)]
    pub base_delay_ms: u64,

    /// Per-connection read/write deadline in seconds.
    #[arg(long, env = "SHIPSYNC_IO_TIMEOUT_SECS", default_value_t = config::CONNECTION_TIMEOUT.as_secs())]
    pub io_timeout_secs: u64,

    /// Outbound connect deadline in seconds.
    #[arg(long, env = "SHIPSYNC_CONNECT_TIMEOUT_SECS", default_value_t = config::CONNECT_TIMEOUT.as_secs())]
    pub connect_timeout_secs: u64,

    /// How long a submitter waits for the forwarding outcome, in seconds.
    #[arg(long, env = "SHIPSYNC_ACK_WAIT_SECS", default_value_t = config::ACK_WAIT.as_secs())]
    pub ack_wait_secs: u64,

    /// Largest accepted frame body in bytes.
    #[arg(long, env = "SHIPSYNC_MAX_FRAME_BYTES", default_value_t = config::MAX_FRAME_BYTES)]
    pub max_frame_bytes: usize,
}

#[derive(Args, Debug)]
pub struct BridgeArgs {
    #[command(flatten)]
    pub node: NodeArgs,

    /// `host:port` of the next hop.
    #[arg(long, env = "SHIPSYNC_NEXT_HOP")]
    pub next_hop: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ErpMode {
    /// No ERP calls.
    None,
    /// Log each call and succeed.
    Mock,
}

#[derive(Args, Debug)]
pub struct ReceiverArgs {
    #[command(flatten)]
    pub node: NodeArgs,

    /// ERP integration to drive on completion.
    #[arg(long, env = "SHIPSYNC_ERP", value_enum, default_value_t = ErpMode::Mock)]
    pub erp: ErpMode,

    /// Hold a transaction for reconciliation if any ERP call fails.
    #[arg(long, env = "SHIPSYNC_ERP_REQUIRED")]
    pub erp_required: bool,
}

#[derive(Args, Debug)]
pub struct ShipperArgs {
    #[command(flatten)]
    pub node: NodeArgs,
}

// ---------------------------------------------------------------------------
// One-shot tools
// ---------------------------------------------------------------------------

/// Who is signing and with what.
#[derive(Args, Debug, Clone)]
pub struct SignerArgs {
    /// Sender id as listed in the receiving side's registry.
    #[arg(long, env = "SHIPSYNC_SENDER_ID")]
    pub sender_id: String,

    /// File holding the hex-encoded secret key.
    #[arg(long, env = "SHIPSYNC_KEY_FILE")]
    pub key_file: PathBuf,

    #[arg(long, env = "SHIPSYNC_ALGORITHM", default_value_t = SignatureAlgorithm::Es256k)]
    pub algorithm: SignatureAlgorithm,
}

#[derive(Args, Debug)]
pub struct ShipArgs {
    /// Bridge address.
    #[arg(long, env = "SHIPSYNC_BRIDGE", default_value_t = format!("127.0.0.1:{}", config::DEFAULT_BRIDGE_PORT))]
    pub to: String,

    /// Shipment payload (JSON).
    #[arg(long)]
    pub payload: PathBuf,

    /// Transaction id. Generated when omitted.
    #[arg(long)]
    pub transaction_id: Option<String>,

    /// Include the public key in the envelope's security block.
    #[arg(long)]
    pub embed_public_key: bool,

    #[command(flatten)]
    pub signer: SignerArgs,

    #[arg(long, env = "SHIPSYNC_MAX_ATTEMPTS", default_value_t = config::FORWARD_MAX_ATTEMPTS)]
    pub max_attempts: u32,
}

#[derive(Args, Debug)]
pub struct QueryArgs {
    /// Node address.
    #[arg(long, default_value_t = format!("127.0.0.1:{}", config::DEFAULT_BRIDGE_PORT))]
    pub addr: String,

    pub transaction_id: String,
}

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Node address.
    #[arg(long, default_value_t = format!("127.0.0.1:{}", config::DEFAULT_RECEIVER_PORT))]
    pub addr: String,

    pub transaction_id: String,

    /// New status, e.g. `DELIVERED`.
    pub status: ShipmentStatus,

    #[arg(long)]
    pub location: Option<String>,

    #[arg(long)]
    pub notes: Option<String>,

    #[command(flatten)]
    pub signer: SignerArgs,
}

#[derive(Args, Debug)]
pub struct ReconcileArgs {
    #[arg(long, short = 'd', env = "SHIPSYNC_DATA_DIR", default_value = "./shipsync-data")]
    pub data_dir: PathBuf,

    #[arg(long, env = "SHIPSYNC_REGISTRY", default_value = "trusted_senders.json")]
    pub registry: PathBuf,

    #[arg(long, env = "SHIPSYNC_NODE_ID")]
    pub node_id: String,

    /// Next hop for a bridge store. Omit for a receiver store.
    #[arg(long, env = "SHIPSYNC_NEXT_HOP")]
    pub next_hop: Option<String>,

    /// Only this transaction. Default: every held transaction.
    pub transaction_id: Option<String>,

    #[command(flatten)]
    pub key: NodeKeyArgs,

    #[command(flatten)]
    pub tuning: TuningArgs,
}

#[derive(Args, Debug)]
pub struct KeygenArgs {
    #[arg(long, default_value_t = SignatureAlgorithm::Es256k)]
    pub algorithm: SignatureAlgorithm,

    /// Where to write the secret key. Must not exist.
    #[arg(long)]
    pub out: PathBuf,

    /// Sender id for the printed registry entry.
    #[arg(long)]
    pub sender_id: String,

    /// Display name for the printed registry entry.
    #[arg(long, default_value = "")]
    pub name: String,

    /// Where this sender listens for completion notices.
    #[arg(long)]
    pub notify_addr: Option<String>,
}
