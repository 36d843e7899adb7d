//! CLI entry point. Parses the tunable knobs (spec §6), wires up a single
//! replica via [`bft_node::Node`], and drives its view timer in a plain
//! run-to-completion loop — there is no network transport here (spec §1
//! non-goal), so this binary is a standalone demonstration of the core's
//! liveness and safety machinery rather than a deployable multi-node node.

use anyhow::{Context, Result};
use bft_consensus::Effect;
use bft_fork_registry::ForkRegistry;
use bft_node::{load_or_create_keypair, Node, NodeConfig};
use bft_types::{BftNode, ValidatorSet};
use clap::Parser;
use primitive_types::U256;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "bft-node", about = "HotStuff-style BFT ledger node core")]
struct Cli {
    /// Directory the sled-backed engine store lives in.
    #[arg(long, default_value = "./bft-node-data")]
    data_dir: PathBuf,

    /// Path to this replica's persisted secp256k1 identity; created on first run.
    #[arg(long, default_value = "./bft-node-data/identity.key")]
    keyfile: PathBuf,

    /// Base pacemaker timeout in milliseconds before exponential backoff.
    #[arg(long, default_value_t = 3000)]
    pacemaker_timeout_ms: u64,

    /// Exponential-backoff rate applied per consecutive timeout.
    #[arg(long, default_value_t = 1.1)]
    pacemaker_rate: f64,

    /// Cap on the exponent the backoff schedule will climb to.
    #[arg(long, default_value_t = 0)]
    pacemaker_max_exp: u32,

    /// How long to wait for a ledger-level sync response before retrying a
    /// different candidate.
    #[arg(long, default_value_t = 5_000)]
    sync_patience_ms: u64,

    /// Commands requested per ledger-level sync batch.
    #[arg(long, default_value_t = 256)]
    sync_batch_size: u32,

    /// Maximum number of unconfirmed commands the mempool will hold.
    #[arg(long, default_value_t = 1024)]
    mempool_max_size: usize,

    /// Round count after which a proposal closes its epoch.
    #[arg(long, default_value_t = 100)]
    epoch_max_rounds: u64,

    /// Number of view timers to drive before exiting. Absent real peers this
    /// replica is the sole validator, so every view it leads commits
    /// immediately; this bounds the demonstration run.
    #[arg(long, default_value_t = 5)]
    rounds: u32,
}

impl From<&Cli> for NodeConfig {
    fn from(cli: &Cli) -> Self {
        Self {
            pacemaker_base_ms: cli.pacemaker_timeout_ms,
            pacemaker_rate: cli.pacemaker_rate,
            pacemaker_max_exp: cli.pacemaker_max_exp,
            sync_patience_ms: cli.sync_patience_ms,
            sync_batch_size: cli.sync_batch_size,
            mempool_max_size: cli.mempool_max_size,
            epoch_max_rounds: cli.epoch_max_rounds,
            data_dir: cli.data_dir.clone(),
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = NodeConfig::from(&cli);

    let keypair = load_or_create_keypair(&cli.keyfile).context("loading node identity")?;
    let node_id = BftNode(keypair.public());

    // No peer discovery or network transport (spec §1 non-goal): the
    // validator set this demonstration starts from is this replica alone.
    let validators = ValidatorSet::new(vec![(node_id, U256::from(100u32))]);
    let fork_registry = ForkRegistry::new(vec![]);

    info!(?node_id, data_dir = ?config.data_dir, "starting node");
    let mut node = Node::genesis(&config, keypair, validators, fork_registry).context("constructing node")?;

    for round in 0..cli.rounds {
        let view = node.current_view();
        info!(?view, round, "driving view timer");
        let effects = node.on_view_timer_fired().context("handling view timer")?;
        for effect in effects {
            log_effect(&effect);
        }
        std::thread::sleep(Duration::from_millis(50));
    }

    if let Some(proof) = node.get_ledger_proof(None) {
        info!(state_version = proof.header.state_version, epoch = ?proof.header.epoch, "final ledger proof");
    }

    Ok(())
}

fn log_effect(effect: &Effect) {
    match effect {
        Effect::SendVote { to, vote } => info!(?to, view = ?vote.vote_data.voted_header.view, "would send vote"),
        Effect::SendProposal { view, vertex, .. } => info!(?view, has_command = vertex.command.is_some(), "would broadcast proposal"),
        Effect::SendSyncRequest(action) => info!(to = ?action.to, state_version = action.state_version, "would request sync"),
        Effect::BroadcastTimeout(vote) => info!(view = ?vote.vote_data.voted_header.view, "would broadcast timeout"),
        Effect::SendSyncResponse { to, commands, .. } => info!(?to, count = commands.len(), "would send sync response"),
        Effect::None => {}
    }
}
