//! Stake node
//!
//! Runs the synchronized-checkpoint service: restores the persisted
//! sync-checkpoint, serves the checkpoint RPC and periodically promotes
//! pending checkpoints. A node configured with the master key also issues
//! checkpoints automatically.

use clap::Parser;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use stake_core::checkpoint::{CheckpointManager, CheckpointMode};
use stake_core::config::NodeConfig;
use stake_core::consensus::{ChainParams, Network};
use stake_core::minting::ShutdownSignal;
use stake_core::p2p::PeerManager;
use stake_core::rpc::{start_rpc_server, RpcState};
use stake_core::storage::{BlockIndex, ChainIndex, CheckpointDb};

const MAX_PEERS: usize = 125;

#[derive(Debug, Parser)]
#[command(name = "stake-node", version, about = "Proof-of-stake checkpoint node")]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Network to join (mainnet, testnet)
    #[arg(long)]
    network: Option<Network>,

    /// Checkpoint enforcement (strict, advisory, permissive)
    #[arg(long)]
    checkpoint_mode: Option<CheckpointMode>,

    #[arg(long)]
    data_dir: Option<PathBuf>,

    #[arg(long)]
    rpc_port: Option<u16>,

    /// Log filter, e.g. "stake_core=debug"
    #[arg(long)]
    log_filter: Option<String>,
}

impl Args {
    fn into_config(self) -> Result<NodeConfig, stake_core::config::ConfigError> {
        let mut config = match &self.config {
            Some(path) => NodeConfig::from_file(path)?,
            None => NodeConfig::default(),
        };

        if let Some(network) = self.network {
            config.network = network;
        }
        if let Some(mode) = self.checkpoint_mode {
            config.checkpoint_mode = mode;
        }
        if let Some(dir) = self.data_dir {
            config.data_dir = dir;
        }
        if let Some(port) = self.rpc_port {
            config.rpc_port = port;
        }
        if let Some(filter) = self.log_filter {
            config.log_filter = filter;
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Args::parse().into_config()?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(network = %config.network, mode = %config.checkpoint_mode, "starting stake node");

    let params = Arc::new(ChainParams::for_network(config.network)?);
    let db = CheckpointDb::open(config.db_path())?;

    let chain = Arc::new(Mutex::new(BlockIndex::new(
        params.genesis_hash,
        params.genesis_time,
    )));
    let checkpoints = Arc::new(CheckpointManager::new(
        params.clone(),
        db,
        config.checkpoint_mode,
    ));

    let sync = checkpoints.load_sync_checkpoint(&*chain.lock())?;
    info!(
        hash = %sync,
        hardened = params.hardened_checkpoints.len(),
        estimate = checkpoints.total_blocks_estimate(),
        "checkpoint state restored"
    );

    if let Some(key) = &config.checkpoint_key {
        checkpoints.set_checkpoint_key(key)?;
        info!("running as checkpoint master");
    }

    let peer_manager = Arc::new(Mutex::new(PeerManager::new(MAX_PEERS)));

    let rpc_state = Arc::new(RpcState {
        checkpoints: checkpoints.clone(),
        chain: chain.clone(),
        peer_manager: peer_manager.clone(),
    });
    let rpc_port = config.rpc_port;
    tokio::spawn(async move {
        if let Err(e) = start_rpc_server(rpc_state, rpc_port).await {
            error!(error = %e, "RPC server stopped");
        }
    });

    let shutdown = ShutdownSignal::new();
    let sync_shutdown = shutdown.clone();
    let interval = Duration::from_secs(config.sync_interval_secs);

    let sync_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        while !sync_shutdown.is_triggered() {
            ticker.tick().await;

            let mut chain = chain.lock();
            let mut peers = peer_manager.lock();

            match checkpoints.accept_pending_sync_checkpoint(&mut *chain, peers.connected_peers_mut()) {
                Ok(true) => info!(hash = %checkpoints.sync_checkpoint(), "pending checkpoint promoted"),
                Ok(false) => {}
                Err(e) => warn!(error = %e, "pending checkpoint not promoted"),
            }

            for peer in peers.connected_peers_mut() {
                checkpoints.ask_for_pending_sync_checkpoint(&*chain, peer);
            }

            if checkpoints.has_checkpoint_key() {
                match checkpoints.auto_send_sync_checkpoint(&mut *chain, peers.connected_peers_mut()) {
                    Ok(Some(hash)) => info!(%hash, "auto checkpoint sent"),
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, "auto checkpoint failed"),
                }
            }

            let relayed = checkpoints.relay_sync_checkpoint(peers.connected_peers_mut());
            debug!(
                relayed,
                height = chain.best().height,
                peers = peers.connected_count(),
                mature = checkpoints.is_mature_sync_checkpoint(&*chain),
                "checkpoint sync tick"
            );
        }
    });

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("shutdown signal received, stopping node");
            shutdown.trigger();
        }
        result = sync_task => {
            if let Err(e) = result {
                error!(error = %e, "checkpoint sync task failed");
            }
        }
    }

    Ok(())
}
