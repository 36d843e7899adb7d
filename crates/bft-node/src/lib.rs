//! The construction root (spec §9 redesign guidance): wires every subsystem
//! together by value into a single `Node` and exposes the narrow query
//! surface (Supplement B) the binary's CLI drives. There is no dependency
//! injection framework here, deliberately — one function builds the whole
//! graph and a reader can trace every wire by eye.

use bft_consensus::{BFTEventProcessor, Dispatcher, DispatchError, EpochManager, Event, Effect, SubmitError};
use bft_crypto::BftKeyPair;
use bft_fork_registry::ForkRegistry;
use bft_ledger::Ledger;
use bft_pacemaker::{Pacemaker, TimeoutConfig};
use bft_storage::SledEngineStore;
use bft_sync::SyncConfig;
use bft_types::{BftNode, Epoch, LedgerHeader, TxnId, ValidatorSet, Vertex, View};
use bft_vertex_store::VertexStore;
use std::path::Path;
use thiserror::Error;

/// The CLI-tunable knobs this core exposes (spec §6). `clap` parses these in
/// `main`; this struct is the plain value the rest of the crate consumes, so
/// tests can build one without going through argv.
#[derive(Clone, Debug)]
pub struct NodeConfig {
    pub pacemaker_base_ms: u64,
    pub pacemaker_rate: f64,
    pub pacemaker_max_exp: u32,
    pub sync_patience_ms: u64,
    pub sync_batch_size: u32,
    pub mempool_max_size: usize,
    /// Round count after which a proposal closes its epoch (spec §4.6).
    pub epoch_max_rounds: u64,
    pub data_dir: std::path::PathBuf,
}

impl Default for NodeConfig {
    fn default() -> Self {
        let defaults = TimeoutConfig::default();
        let sync = SyncConfig::default();
        Self {
            pacemaker_base_ms: defaults.base_ms,
            pacemaker_rate: defaults.rate,
            pacemaker_max_exp: defaults.max_exp,
            sync_patience_ms: sync.patience_ms,
            sync_batch_size: sync.batch_size,
            mempool_max_size: 1024,
            epoch_max_rounds: 100,
            data_dir: std::path::PathBuf::from("./bft-node-data"),
        }
    }
}

impl NodeConfig {
    fn timeout_config(&self) -> TimeoutConfig {
        TimeoutConfig { base_ms: self.pacemaker_base_ms, rate: self.pacemaker_rate, max_exp: self.pacemaker_max_exp }
    }

    fn sync_config(&self) -> SyncConfig {
        SyncConfig { patience_ms: self.sync_patience_ms, batch_size: self.sync_batch_size }
    }
}

#[derive(Error, Debug)]
pub enum NodeError {
    #[error(transparent)]
    Storage(#[from] bft_storage::StorageError),
}

/// One replica's full in-process state: a keypair, the genesis validator
/// set it starts from, and the `Dispatcher` everything else routes through.
/// This core never opens a socket itself (spec §1 non-goal) — a caller
/// drives it by feeding `Event`s in and carrying out the returned `Effect`s.
pub struct Node {
    keypair: BftKeyPair,
    dispatcher: Dispatcher,
}

impl Node {
    /// Builds a fresh genesis node: opens the sled store at `config.data_dir`,
    /// seeds the vertex store and ledger at epoch/view zero, and wires the
    /// processor, epoch manager, sync service and mempool into a `Dispatcher`.
    pub fn genesis(config: &NodeConfig, keypair: BftKeyPair, validators: ValidatorSet, fork_registry: ForkRegistry) -> Result<Self, NodeError> {
        let node = BftNode(keypair.public());
        let (root_vertex, root_qc) = Vertex::genesis_pair(node);

        let store = SledEngineStore::open(&config.data_dir)?;
        let ledger = Ledger::new(Box::new(store), LedgerHeader::genesis());
        let vertex_store = VertexStore::new(root_vertex, root_qc);
        let pacemaker = Pacemaker::new(Epoch::GENESIS, View::GENESIS, config.timeout_config());

        let processor = BFTEventProcessor::new(keypair.clone(), validators, pacemaker, vertex_store, ledger);
        let epoch_manager = EpochManager::new(fork_registry);
        let dispatcher = Dispatcher::new(processor, epoch_manager, config.sync_config(), config.mempool_max_size, config.epoch_max_rounds);

        Ok(Self { keypair, dispatcher })
    }

    /// Reopens a node against an existing sled store at `config.data_dir`,
    /// rebuilding the in-epoch chain from the supplied root vertex/QC (the
    /// caller's own persisted vertex store snapshot — this core keeps no
    /// on-disk vertex log of its own, spec §1 non-goal).
    pub fn reopen(
        config: &NodeConfig,
        keypair: BftKeyPair,
        validators: ValidatorSet,
        fork_registry: ForkRegistry,
        root_vertex: Vertex,
        root_qc: bft_types::QuorumCertificate,
        ledger_header: LedgerHeader,
        current_view: View,
    ) -> Result<Self, NodeError> {
        let store = SledEngineStore::open(&config.data_dir)?;
        let ledger = Ledger::new(Box::new(store), ledger_header.clone());
        let vertex_store = VertexStore::new(root_vertex, root_qc);
        let pacemaker = Pacemaker::new(ledger_header.epoch, current_view, config.timeout_config());

        let processor = BFTEventProcessor::new(keypair.clone(), validators, pacemaker, vertex_store, ledger);
        let epoch_manager = EpochManager::new(fork_registry);
        let dispatcher = Dispatcher::new(processor, epoch_manager, config.sync_config(), config.mempool_max_size, config.epoch_max_rounds);

        Ok(Self { keypair, dispatcher })
    }

    pub fn node_id(&self) -> BftNode {
        BftNode(self.keypair.public())
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn dispatcher_mut(&mut self) -> &mut Dispatcher {
        &mut self.dispatcher
    }

    /// Supplement B: the latest (or a specific) committed ledger proof.
    pub fn get_ledger_proof(&self, state_version: Option<u64>) -> Option<bft_ledger::LedgerProof> {
        self.dispatcher.get_ledger_proof(state_version)
    }

    /// Supplement B: the currently active validator set.
    pub fn get_validators(&self) -> &ValidatorSet {
        self.dispatcher.get_validators()
    }

    /// Supplement B: submits a raw command to this replica's mempool.
    pub fn submit_command(&mut self, bytes: Vec<u8>) -> Result<TxnId, SubmitError> {
        self.dispatcher.submit_command(bytes)
    }

    pub fn current_view(&self) -> View {
        self.dispatcher.processor().current_view()
    }

    /// Drives this replica's own view timer: if it fires and this node leads
    /// the view, proposes; if it fires and no leadership is held, returns the
    /// broadcastable timeout vote instead.
    pub fn on_view_timer_fired(&mut self) -> Result<Vec<Effect>, DispatchError> {
        let view = self.current_view();
        if self.dispatcher.processor().is_leader_for(view) {
            return Ok(self.dispatcher_mut().propose_if_leader(view));
        }
        self.dispatcher_mut().handle(Event::LocalTimeout { view })
    }

    pub fn handle(&mut self, event: Event) -> Result<Vec<Effect>, DispatchError> {
        self.dispatcher_mut().handle(event)
    }
}

/// Convenience for tests and the binary: generates a fresh keypair whose
/// public key isn't expected to already be a validator member.
pub fn generate_keypair() -> BftKeyPair {
    BftKeyPair::generate(&mut rand::rngs::OsRng)
}

/// Loads (or, if absent, creates and persists) this node's long-lived
/// identity keypair at `path` as a single flat secret file rather than a
/// keystore.
pub fn load_or_create_keypair(path: &Path) -> std::io::Result<BftKeyPair> {
    if let Ok(bytes) = std::fs::read(path) {
        if let Ok(array) = <[u8; 32]>::try_from(bytes.as_slice()) {
            if let Ok(kp) = BftKeyPair::from_secret_bytes(&array) {
                return Ok(kp);
            }
        }
    }
    let keypair = generate_keypair();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, keypair.to_secret_bytes())?;
    Ok(keypair)
}

#[cfg(test)]
mod tests {
    use super::*;
    use primitive_types::U256;

    #[test]
    fn genesis_node_starts_at_view_zero_with_no_committed_state() {
        let dir = tempfile::tempdir().unwrap();
        let config = NodeConfig { data_dir: dir.path().to_path_buf(), ..NodeConfig::default() };
        let keypair = generate_keypair();
        let node_id = BftNode(keypair.public());
        let validators = ValidatorSet::new(vec![(node_id, U256::from(100u32))]);
        let fork_registry = ForkRegistry::new(vec![]);

        let node = Node::genesis(&config, keypair, validators, fork_registry).unwrap();
        assert_eq!(node.current_view(), View::GENESIS);
        assert_eq!(node.get_ledger_proof(None).unwrap().header.state_version, 0);
    }

    #[test]
    fn submitted_command_is_queryable_via_its_id() {
        let dir = tempfile::tempdir().unwrap();
        let config = NodeConfig { data_dir: dir.path().to_path_buf(), ..NodeConfig::default() };
        let keypair = generate_keypair();
        let node_id = BftNode(keypair.public());
        let validators = ValidatorSet::new(vec![(node_id, U256::from(100u32))]);
        let fork_registry = ForkRegistry::new(vec![]);
        let mut node = Node::genesis(&config, keypair, validators, fork_registry).unwrap();

        let id = node.submit_command(b"hello".to_vec()).unwrap();
        assert_eq!(id, bft_types::Command::new(b"hello".to_vec()).id());
    }
}
