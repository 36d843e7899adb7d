//! Shared network-simulation harness for the integration tests in this
//! directory: builds a handful of independent `Dispatcher`s, each with its
//! own keypair and sled store, and drives proposal/vote traffic between them
//! the way a real transport would.
//!
//! Not every test file exercises every helper here, so dead-code warnings
//! from the ones it doesn't are expected and suppressed.
#![allow(dead_code)]

use bft_consensus::{BFTEventProcessor, Dispatcher, Effect, EpochManager, Event};
use bft_crypto::BftKeyPair;
use bft_fork_registry::{ForkConfig, ForkRegistry};
use bft_ledger::Ledger;
use bft_pacemaker::{Pacemaker, TimeoutConfig};
use bft_storage::{EngineStore, SledEngineStore};
use bft_sync::SyncConfig;
use bft_types::{BftNode, Epoch, LedgerHeader, ValidatorSet, Vertex, View};
use bft_vertex_store::VertexStore;
use primitive_types::U256;
use rand::rngs::OsRng;

/// A replica's full in-process stack, kept as loose parts so a test driver
/// can reach in and simulate the network between them. The tempdir is held
/// alongside the dispatcher so its sled store stays alive for the test.
pub struct Replica {
    pub dispatcher: Dispatcher,
    _dir: tempfile::TempDir,
}

pub fn build_replica(validators: ValidatorSet, epoch_max_rounds: u64, forks: Vec<ForkConfig>) -> Replica {
    let mut rng = OsRng;
    let keypair = BftKeyPair::generate(&mut rng);
    let node = BftNode(keypair.public());
    let (root_vertex, root_qc) = Vertex::genesis_pair(node);

    let dir = tempfile::tempdir().unwrap();
    let store = SledEngineStore::open(dir.path()).unwrap();
    let ledger = Ledger::new(Box::new(store), LedgerHeader::genesis());
    let vertex_store = VertexStore::new(root_vertex, root_qc);
    let pacemaker = Pacemaker::new(Epoch::GENESIS, View::GENESIS, TimeoutConfig::default());

    let processor = BFTEventProcessor::new(keypair, validators, pacemaker, vertex_store, ledger);
    let epoch_manager = EpochManager::new(ForkRegistry::new(forks));
    let dispatcher = Dispatcher::new(processor, epoch_manager, SyncConfig::default(), 1024, epoch_max_rounds);
    Replica { dispatcher, _dir: dir }
}

/// Builds `n` replicas rooted at their own genesis vertex/QC pairs (the
/// proposer identity embedded in each doesn't affect the QC's validity, since
/// `QuorumCertificate::genesis` always carries an empty signature set) over a
/// shared validator set of equal power.
pub fn build_network(n: usize, epoch_max_rounds: u64, forks: Vec<ForkConfig>) -> (Vec<BftKeyPair>, ValidatorSet, Vec<Replica>) {
    let mut rng = OsRng;
    let keypairs: Vec<_> = (0..n).map(|_| BftKeyPair::generate(&mut rng)).collect();
    let members: Vec<_> = keypairs.iter().map(|k| (BftNode(k.public()), U256::from(100u32))).collect();
    let validators = ValidatorSet::new(members);
    let replicas = (0..n).map(|_| build_replica(validators.clone(), epoch_max_rounds, forks.clone())).collect();
    (keypairs, validators, replicas)
}

/// `Effect` carries no `Debug` impl (it's a foreign type here, so the orphan
/// rule rules one out anyway) — this gives panic messages a label instead.
pub fn effect_label(effect: &Effect) -> &'static str {
    match effect {
        Effect::SendVote { .. } => "SendVote",
        Effect::SendProposal { .. } => "SendProposal",
        Effect::SendSyncRequest(_) => "SendSyncRequest",
        Effect::BroadcastTimeout(_) => "BroadcastTimeout",
        Effect::SendSyncResponse { .. } => "SendSyncResponse",
        Effect::None => "None",
    }
}

/// Drives one view: the elected leader builds a proposal against its own
/// high QC, every replica votes on it, and every vote is delivered to the
/// next leader (who is who the votes are addressed to) until a QC forms.
pub fn drive_view(replicas: &mut [Replica], keypairs: &[BftKeyPair], validators: &ValidatorSet, view: View) {
    let leader = Pacemaker::elect_leader(Epoch::GENESIS, view, validators);
    let leader_idx = keypairs.iter().position(|k| BftNode(k.public()) == leader).unwrap();

    let effects = replicas[leader_idx].dispatcher.propose_if_leader(view);
    let (proposal_view, qc, vertex) = match effects.into_iter().next().unwrap() {
        Effect::SendProposal { view, qc, vertex } => (view, qc, vertex),
        other => panic!("expected a proposal from the elected leader, got {}", effect_label(&other)),
    };

    for replica in replicas.iter_mut() {
        let outcome = replica
            .dispatcher
            .handle(Event::Proposal { view: proposal_view, qc: qc.clone(), vertex: vertex.clone() })
            .expect("every honest replica accepts the leader's proposal");
        match outcome.into_iter().next().unwrap() {
            Effect::SendVote { vote, .. } => {
                let to = Pacemaker::elect_leader(Epoch::GENESIS, view.next(), validators);
                let to_idx = keypairs.iter().position(|k| BftNode(k.public()) == to).unwrap();
                replicas[to_idx].dispatcher.handle(Event::Vote(vote)).unwrap();
            }
            other => panic!("expected a vote in response to a valid proposal, got {}", effect_label(&other)),
        }
    }
}

/// Writes a `ValidatorSystemMetadata` fork-vote substate directly into
/// `store`, mirroring how a validator's own vote transaction would land
/// there; `idx` only needs to vary the storage key across calls.
pub fn seed_fork_vote(store: &dyn EngineStore, idx: u8, validator: bft_crypto::BftPublicKey, vote_hash: [u8; 32]) {
    use bft_constraint_machine::particle::ValidatorSystemMetadataParticle;
    use bft_constraint_machine::Particle;

    let particle = Particle::ValidatorSystemMetadata(ValidatorSystemMetadataParticle {
        validator: *validator.as_bytes(),
        vote_hash,
    });
    let substate = particle.to_substate();
    let mut txn = store.begin_transaction();
    let mut key = b"s:".to_vec();
    key.extend_from_slice(&[idx; 32]);
    key.extend_from_slice(&0u32.to_be_bytes());
    txn.put(key, substate.encode());
    txn.commit().unwrap();
}
