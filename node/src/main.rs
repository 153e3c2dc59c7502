// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # ShipSync Relay Node
//!
//! Entry point for the `shipsync-node` binary. Parses CLI arguments,
//! initializes logging and metrics, and either runs one of the relay roles
//! or performs a one-shot task against a running node.
//!
//! Long-running roles:
//!
//! - `bridge`   — verify, store, forward to the next hop
//! - `receiver` — verify, store, drive the ERP, complete
//! - `shipper`  — listen for completion notices
//!
//! One-shot tools: `ship`, `query`, `status`, `reconcile`, `keygen`,
//! `version`.

mod api;
mod cli;
mod logging;
mod metrics;

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;

use shipsync_protocol::config::{self as proto_config, SHIPMENT_ID_PREFIX};
use shipsync_protocol::crypto::{SignatureAlgorithm, SignerKeypair};
use shipsync_protocol::relay::{
    MockErp, RelayClient, RelayConfig, RelayEngine, RelayListener, RelayRole, RetryPolicy,
};
use shipsync_protocol::storage::TransactionStore;
use shipsync_protocol::transaction::{
    generate_transaction_id, sign_status_update, EnvelopeBuilder, ShipmentPayload,
};
use shipsync_protocol::trust::{TrustRegistry, TrustedSender};
use shipsync_protocol::wire::{FrameCodec, RelayMessage, RelayResponse};

use cli::{Commands, ErpMode, ShipSyncCli, TuningArgs};
use metrics::NodeMetrics;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = ShipSyncCli::parse();
    logging::init_logging(logging::DEFAULT_FILTER, cli.log_format.into());

    match cli.command {
        Commands::Bridge(args) => {
            let role = RelayRole::Bridge {
                next_hop: args.next_hop,
            };
            run_node(args.node, role, "bridge", None, false).await
        }
        Commands::Receiver(args) => {
            run_node(args.node, RelayRole::Receiver, "receiver", Some(args.erp), args.erp_required)
                .await
        }
        // The shipper's listener only ever sees completion notices, which the
        // receiver-side engine acknowledges without forwarding anywhere.
        Commands::Shipper(args) => {
            run_node(args.node, RelayRole::Receiver, "shipper", None, false).await
        }
        Commands::Ship(args) => ship(args).await,
        Commands::Query(args) => query(args).await,
        Commands::Status(args) => send_status(args).await,
        Commands::Reconcile(args) => reconcile(args).await,
        Commands::Keygen(args) => keygen(args),
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// Long-running roles
// ---------------------------------------------------------------------------

fn relay_config(node_id: &str, role: RelayRole, tuning: &TuningArgs) -> RelayConfig {
    let mut config = RelayConfig::new(node_id, role)
        .with_retry(RetryPolicy::new(
            tuning.max_attempts,
            Duration::from_millis(tuning.base_delay_ms),
        ))
        .with_timeouts(
            Duration::from_secs(tuning.io_timeout_secs),
            Duration::from_secs(tuning.connect_timeout_secs),
            Duration::from_secs(tuning.ack_wait_secs),
        );
    config.max_frame_bytes = tuning.max_frame_bytes;
    config
}

fn load_registry(path: &Path) -> Result<Arc<TrustRegistry>> {
    let registry = TrustRegistry::load(path)
        .with_context(|| format!("failed to load trust registry from {}", path.display()))?;
    if registry.is_empty() {
        tracing::warn!(path = %path.display(), "trust registry is empty; every submission will be refused");
    }
    Ok(Arc::new(registry))
}

fn open_store(data_dir: &Path) -> Result<TransactionStore> {
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;
    let store = TransactionStore::open(data_dir)
        .with_context(|| format!("failed to open transaction store at {}", data_dir.display()))?;
    tracing::info!(path = %data_dir.display(), transactions = store.count(), "transaction store opened");
    Ok(store)
}

/// Runs a relay listener plus the API and metrics servers until a
/// shutdown signal arrives.
async fn run_node(
    args: cli::NodeArgs,
    role: RelayRole,
    role_name: &str,
    erp: Option<ErpMode>,
    erp_required: bool,
) -> Result<()> {
    let listen = args.listen.clone().unwrap_or_else(|| {
        let port = match role_name {
            "bridge" => proto_config::DEFAULT_BRIDGE_PORT,
            "shipper" => proto_config::DEFAULT_COMPLETION_PORT,
            _ => proto_config::DEFAULT_RECEIVER_PORT,
        };
        format!("0.0.0.0:{port}")
    });

    tracing::info!(
        node_id = %args.node_id,
        role = role_name,
        listen = %listen,
        api_port = args.api_port,
        metrics_port = args.metrics_port,
        data_dir = %args.data_dir.display(),
        "starting shipsync-node"
    );

    let registry = load_registry(&args.registry)?;
    let store = open_store(&args.data_dir)?;

    let node_metrics = Arc::new(NodeMetrics::new().context("failed to register metrics")?);

    let mut config = relay_config(&args.node_id, role, &args.tuning);
    config.erp_required = erp_required;

    let mut engine = RelayEngine::new(config, store.clone(), registry)
        .with_observer(node_metrics.clone());
    if erp == Some(ErpMode::Mock) {
        engine = engine.with_erp(Arc::new(MockErp::new()));
    }
    engine = with_node_key(engine, &args.key)?;

    // Nothing is being relayed yet, so anything short of COMPLETED was cut
    // off by the previous run.
    let interrupted = engine
        .recover_interrupted()
        .context("failed to recover interrupted relays")?;
    let held = store
        .list_needing_reconciliation()
        .context("failed to scan for held transactions")?;
    if !held.is_empty() {
        tracing::warn!(
            count = held.len(),
            interrupted = interrupted.len(),
            "transactions held for reconciliation; run `shipsync-node reconcile` after stopping this node"
        );
    }

    // --- Relay listener ---
    let listener = RelayListener::bind(&listen, engine)
        .await
        .with_context(|| format!("failed to bind relay listener on {listen}"))?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let relay_task = tokio::spawn(listener.run(shutdown_rx));

    // --- API server ---
    let app_state = api::AppState {
        version: format!(
            "{} (protocol {})",
            env!("CARGO_PKG_VERSION"),
            proto_config::PROTOCOL_VERSION,
        ),
        node_id: args.node_id.clone(),
        role: role_name.to_string(),
        store,
        metrics: Arc::clone(&node_metrics),
        started_at: chrono::Utc::now(),
    };
    let api_router = api::create_router(app_state);
    let api_addr = format!("0.0.0.0:{}", args.api_port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind API listener on {api_addr}"))?;
    tracing::info!("API server listening on {}", api_addr);

    // --- Metrics server ---
    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&node_metrics));
    let metrics_addr = format!("0.0.0.0:{}", args.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {metrics_addr}"))?;
    tracing::info!("Metrics server listening on {}", metrics_addr);

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

    let _ = shutdown_tx.send(true);
    if let Err(e) = relay_task.await {
        tracing::error!("relay listener task failed: {}", e);
    }
    tracing::info!("shipsync-node stopped");
    Ok(())
}

// ---------------------------------------------------------------------------
// One-shot tools
// ---------------------------------------------------------------------------

fn read_keypair(path: &Path, algorithm: SignatureAlgorithm) -> Result<SignerKeypair> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read key file {}", path.display()))?;
    SignerKeypair::from_hex(algorithm, text.trim())
        .with_context(|| format!("{} does not hold a valid {algorithm} secret key", path.display()))
}

fn with_node_key(engine: RelayEngine, key: &cli::NodeKeyArgs) -> Result<RelayEngine> {
    match &key.signing_key {
        Some(path) => {
            let keypair = read_keypair(path, key.signing_algorithm)?;
            tracing::info!(key_path = %path.display(), algorithm = %key.signing_algorithm, "completion notices will be signed");
            Ok(engine.with_signer(keypair))
        }
        None => {
            tracing::warn!("no signing key; originators will not be notified of completion");
            Ok(engine)
        }
    }
}

fn load_payload(path: &Path) -> Result<ShipmentPayload> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read payload {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("{} is not a valid shipment payload", path.display()))
}

fn one_shot_client() -> RelayClient {
    RelayClient::new(
        FrameCodec::default(),
        proto_config::CONNECT_TIMEOUT,
        proto_config::CONNECTION_TIMEOUT,
    )
}

fn print_response(response: &RelayResponse) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(response)?);
    if !response.is_ack() {
        bail!("node answered NACK: {}", response.message);
    }
    Ok(())
}

/// Signs a payload and submits it, retrying on transient failures.
async fn ship(args: cli::ShipArgs) -> Result<()> {
    let keypair = read_keypair(&args.signer.key_file, args.signer.algorithm)?;
    let payload = load_payload(&args.payload)?;
    let transaction_id = args
        .transaction_id
        .unwrap_or_else(|| generate_transaction_id(SHIPMENT_ID_PREFIX));

    let envelope = EnvelopeBuilder::new(payload)
        .transaction_id(&transaction_id)
        .signer_id(&args.signer.sender_id)
        .embed_public_key(args.embed_public_key)
        .sign(&keypair)
        .context("failed to sign envelope")?;
    tracing::info!(tx_id = %transaction_id, to = %args.to, "submitting shipment");

    let policy = RetryPolicy::new(args.max_attempts, proto_config::FORWARD_BASE_DELAY);
    let response = one_shot_client()
        .submit_with_retry(&args.to, &RelayMessage::Submit { envelope }, &policy)
        .await
        .with_context(|| format!("submission of {transaction_id} to {} failed", args.to))?;
    print_response(&response)
}

async fn query(args: cli::QueryArgs) -> Result<()> {
    let message = RelayMessage::StatusQuery {
        transaction_id: args.transaction_id,
    };
    let response = one_shot_client()
        .send(&args.addr, &message)
        .await
        .with_context(|| format!("query to {} failed", args.addr))?;
    print_response(&response)
}

async fn send_status(args: cli::StatusArgs) -> Result<()> {
    let keypair = read_keypair(&args.signer.key_file, args.signer.algorithm)?;
    let update = sign_status_update(
        &args.transaction_id,
        args.status,
        &args.signer.sender_id,
        args.location,
        args.notes,
        &keypair,
    )
    .context("failed to sign status update")?;
    let response = one_shot_client()
        .send(&args.addr, &RelayMessage::StatusUpdate { update })
        .await
        .with_context(|| format!("status update to {} failed", args.addr))?;
    print_response(&response)
}

/// Retries held transactions against the store directly. The node that owns
/// the data directory must be stopped first; sled holds an exclusive lock.
async fn reconcile(args: cli::ReconcileArgs) -> Result<()> {
    let registry = load_registry(&args.registry)?;
    let store = open_store(&args.data_dir)?;

    let role = match args.next_hop {
        Some(next_hop) => RelayRole::Bridge { next_hop },
        None => RelayRole::Receiver,
    };
    let is_receiver = role == RelayRole::Receiver;
    let mut engine = RelayEngine::new(relay_config(&args.node_id, role, &args.tuning), store.clone(), registry);
    if is_receiver {
        engine = engine.with_erp(Arc::new(MockErp::new()));
    }
    engine = with_node_key(engine, &args.key)?;
    engine
        .recover_interrupted()
        .context("failed to recover interrupted relays")?;

    let ids: Vec<String> = match args.transaction_id {
        Some(id) => vec![id],
        None => store
            .list_needing_reconciliation()?
            .into_iter()
            .map(|r| r.transaction_id)
            .collect(),
    };
    if ids.is_empty() {
        println!("nothing held for reconciliation");
        return Ok(());
    }

    let mut failed = 0usize;
    for id in &ids {
        match engine.retry_forward(id).await {
            Ok(resp) => println!("{id}: {} ({})", resp.stage.map(|s| s.to_string()).unwrap_or_default(), resp.message),
            Err(e) => {
                failed += 1;
                tracing::warn!(tx_id = %id, error = %e, "reconciliation attempt failed");
                println!("{id}: still held ({e})");
            }
        }
    }

    if failed > 0 {
        bail!("{failed} of {} transactions still held", ids.len());
    }
    Ok(())
}

/// Generates a keypair, writes the secret, and prints the matching
/// registry entry for the receiving side.
fn keygen(args: cli::KeygenArgs) -> Result<()> {
    if args.out.exists() {
        bail!("refusing to overwrite existing key file {}", args.out.display());
    }

    let keypair = SignerKeypair::generate(args.algorithm);
    std::fs::write(&args.out, keypair.secret_key_hex())
        .with_context(|| format!("failed to write key to {}", args.out.display()))?;

    // Restrict permissions on Unix.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&args.out, std::fs::Permissions::from_mode(0o600))?;
    }

    let entry = TrustedSender {
        sender_id: args.sender_id,
        name: args.name,
        algorithm: args.algorithm.as_str().to_string(),
        public_key: keypair.public_key().to_hex(),
        onboarded: chrono::Utc::now().date_naive(),
        notify_addr: args.notify_addr,
    };
    tracing::info!(key_path = %args.out.display(), algorithm = %args.algorithm, "signing key generated");
    println!("{}", serde_json::to_string_pretty(&entry)?);
    Ok(())
}

/// Prints version information to stdout.
fn print_version() {
    println!("shipsync-node {}", env!("CARGO_PKG_VERSION"));
    println!("protocol      {} {}", proto_config::PROTOCOL_NAME, proto_config::PROTOCOL_VERSION);
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
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
