//! The single explicit construction root and run-to-completion event loop
//! (spec §5, §9 redesign guidance): one `Dispatcher` owns every subsystem by
//! value, and `handle` maps one `Event` to zero or more `Effect`s to send.
//! There are no suspension points within a call to `handle` — each event runs
//! to completion before the next is dispatched.

use crate::epoch_manager::{EpochBoundary, EpochManager};
use crate::mempool::{Mempool, MempoolError};
use crate::processor::{BFTEventProcessor, CommitResult, ProcessorError, VoteOutcome};
use bft_constraint_machine::EpochUpdateReducer;
use bft_ledger::{EpochTransition, LedgerProof};
use bft_sync::{SyncConfig, SyncError, SyncRequestAction, SyncService};
use bft_types::{BftNode, Command, LedgerHeader, QuorumCertificate, TimeoutCertificate, TxnId, ValidatorSet, Vertex, View, Vote};
use thiserror::Error;
use tracing::{info, warn};

/// The tagged union of everything that can drive the core forward (spec §9:
/// "a single run-to-completion event loop consuming a tagged union of
/// events"). `Timeout` is an already-formed `TimeoutCertificate` observed
/// from a peer; `LocalTimeout` is this replica's own view timer firing.
pub enum Event {
    Proposal { view: View, qc: QuorumCertificate, vertex: Vertex },
    Vote(Vote),
    Timeout(TimeoutCertificate),
    LocalTimeout { view: View },
    SyncRequest { from: BftNode, state_version: u64 },
    SyncResponse { commands: Vec<Command>, proof: LedgerProof },
}

/// An outbound action the caller (the network layer, out of scope here per
/// §1) should carry out. `SendSyncResponse` is a deliberate addition beyond
/// the five effects literally named in §9's redesign guidance: the guidance's
/// list covers a replica driving its own proposal/vote/sync traffic, but
/// never names what a replica should emit when it is the one being asked for
/// a sync batch (`Event::SyncRequest`) — without this variant there would be
/// no way to answer that event at all.
pub enum Effect {
    SendVote { to: BftNode, vote: Vote },
    SendProposal { view: View, qc: QuorumCertificate, vertex: Vertex },
    SendSyncRequest(SyncRequestAction),
    BroadcastTimeout(Vote),
    SendSyncResponse { to: BftNode, commands: Vec<Command>, proof: LedgerProof },
    None,
}

#[derive(Error, Debug)]
pub enum SubmitError {
    #[error(transparent)]
    Mempool(#[from] MempoolError),
}

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error(transparent)]
    Processor(#[from] ProcessorError),
    #[error(transparent)]
    Sync(#[from] SyncError),
}

pub struct Dispatcher {
    processor: BFTEventProcessor,
    epoch_manager: EpochManager,
    sync: SyncService,
    mempool: Mempool,
    candidates: Vec<BftNode>,
    /// Round count (within the epoch-relative `View` counter) after which a
    /// proposal closes its epoch. Every honest replica evaluates the same
    /// threshold against the same parent header, so the decision to end an
    /// epoch is never taken on the proposer's word alone (spec §4.6).
    epoch_max_rounds: u64,
}

impl Dispatcher {
    pub fn new(
        processor: BFTEventProcessor,
        epoch_manager: EpochManager,
        sync_config: SyncConfig,
        mempool_max_size: usize,
        epoch_max_rounds: u64,
    ) -> Self {
        let current = processor.ledger().header().clone();
        let candidates = processor.validators().members().iter().map(|(n, _)| *n).collect();
        Self {
            processor,
            epoch_manager,
            sync: SyncService::new(sync_config, current),
            mempool: Mempool::new(mempool_max_size),
            candidates,
            epoch_max_rounds,
        }
    }

    pub fn processor(&self) -> &BFTEventProcessor {
        &self.processor
    }

    pub fn sync(&self) -> &SyncService {
        &self.sync
    }

    /// Supplement B query: the committed proof at `state_version`, or the
    /// latest one if `None`. This core only ever retains its single latest
    /// proof, so any version short of it returns `None` — historical proof
    /// lookup belongs to an archival layer out of scope here.
    pub fn get_ledger_proof(&self, state_version: Option<u64>) -> Option<LedgerProof> {
        let proof = self.processor.ledger().proof();
        match state_version {
            Some(v) if v != proof.header.state_version => None,
            _ => Some(proof),
        }
    }

    pub fn get_validators(&self) -> &ValidatorSet {
        self.processor.validators()
    }

    /// Supplement B query: hands `bytes` to the mempool as a new command,
    /// returning the id a leader's proposal will later reference.
    pub fn submit_command(&mut self, bytes: Vec<u8>) -> Result<TxnId, SubmitError> {
        let command = Command::new(bytes);
        let id = command.id();
        self.mempool.submit(command)?;
        Ok(id)
    }

    /// The single dispatch function per event kind (spec §9): routes `event`
    /// to the processor/sync service and returns whatever outbound effects
    /// follow.
    pub fn handle(&mut self, event: Event) -> Result<Vec<Effect>, DispatchError> {
        match event {
            Event::Proposal { view, qc, vertex } => self.handle_proposal(view, qc, vertex),
            Event::Vote(vote) => self.handle_vote(vote),
            Event::Timeout(tc) => {
                self.processor.on_external_timeout_certificate(tc);
                Ok(vec![Effect::None])
            }
            Event::LocalTimeout { view } => Ok(match self.processor.on_local_timeout(view) {
                Some(vote) => vec![Effect::BroadcastTimeout(vote)],
                None => vec![Effect::None],
            }),
            Event::SyncRequest { from, state_version } => Ok(self.handle_sync_request(from, state_version)),
            Event::SyncResponse { commands, proof } => self.handle_sync_response(commands, proof),
        }
    }

    fn handle_proposal(&mut self, view: View, qc: QuorumCertificate, vertex: Vertex) -> Result<Vec<Effect>, DispatchError> {
        let epoch_transition = self.pending_epoch_transition(&vertex);
        // A vote is always addressed to next view's leader, since that's who
        // assembles the QC (spec §4.1) — usually the same leader that just
        // proposed, but not always (a leader may propose once and then lose
        // the next view's election).
        let to = self.processor.next_leader(view.next());
        match self.processor.on_proposal(view, qc, vertex, epoch_transition) {
            Ok(vote) => Ok(vec![Effect::SendVote { to, vote }]),
            Err(err) => {
                warn!(?err, "proposal rejected");
                Err(err.into())
            }
        }
    }

    fn handle_vote(&mut self, vote: Vote) -> Result<Vec<Effect>, DispatchError> {
        match self.processor.on_vote(vote) {
            Ok(VoteOutcome::Accumulated) => Ok(vec![Effect::None]),
            Ok(VoteOutcome::QcFormed(qc)) => self.apply_qc(qc),
            Ok(VoteOutcome::TcFormed(tc)) => {
                self.processor.on_external_timeout_certificate(tc);
                Ok(vec![Effect::None])
            }
            Err(ProcessorError::VoteRejected(_)) => Ok(vec![Effect::None]),
            Err(err) => Err(err.into()),
        }
    }

    fn apply_qc(&mut self, qc: QuorumCertificate) -> Result<Vec<Effect>, DispatchError> {
        let result = self.processor.observe_qc(qc)?;
        if let Some(CommitResult { proof, .. }) = result {
            self.sync.on_version_update(proof.header.clone());
            self.check_epoch_boundary(&proof.header);
        }
        Ok(vec![Effect::None])
    }

    /// After every commit, checks whether the just-committed header closes
    /// its epoch and, if so, reseeds the processor for the new one (spec
    /// §4.6).
    fn check_epoch_boundary(&mut self, committed: &LedgerHeader) {
        let proposer = self.processor.node();
        let store = self.processor.ledger().store();
        match self.epoch_manager.evaluate_boundary(committed, store, proposer) {
            Ok(Some(EpochBoundary { epoch, validators, root_vertex, root_qc, activated_rules })) => {
                if let Some(rules) = &activated_rules {
                    info!(?rules, "fork activated at epoch boundary");
                }
                self.candidates = validators.members().iter().map(|(n, _)| *n).collect();
                self.processor.reset_for_epoch(epoch, validators, root_vertex, root_qc);
            }
            Ok(None) => {}
            Err(err) => warn!(?err, "epoch boundary evaluation failed"),
        }
    }

    /// Decides, independently of the proposer, whether `vertex` should close
    /// its epoch: every replica looks up the same parent `LedgerHeader` via
    /// `ledger_header_of` and compares the same `epoch_max_rounds` threshold
    /// against `vertex.view`, so no one has to trust the leader's say-so.
    /// When the threshold is crossed, drives `EpochUpdateReducer::run` over
    /// the currently active validator set to produce the next one — the
    /// same deterministic computation every replica reaches on its own.
    fn pending_epoch_transition(&self, vertex: &Vertex) -> Option<EpochTransition> {
        let parent_header = self.processor.ledger_header_of(&vertex.parent_id)?;
        if parent_header.is_end_of_epoch || vertex.view.0 < self.epoch_max_rounds {
            return None;
        }
        let next_epoch = parent_header.epoch.next();
        match EpochUpdateReducer::run(self.processor.validators(), next_epoch.0) {
            Ok((next_validator_set, _particles)) => Some(EpochTransition { next_validator_set }),
            Err(err) => {
                warn!(?err, "epoch update reducer failed, carrying the epoch forward");
                None
            }
        }
    }

    fn handle_sync_request(&mut self, from: BftNode, state_version: u64) -> Vec<Effect> {
        let header = self.processor.ledger().header();
        if header.state_version <= state_version {
            return vec![Effect::None];
        }
        let proof = self.processor.ledger().proof();
        // This core only retains the latest proof and no historical command
        // log (spec §1 non-goal: archival replay); a real peer-serving node
        // would page through its committed command history here.
        vec![Effect::SendSyncResponse { to: from, commands: Vec::new(), proof }]
    }

    fn handle_sync_response(&mut self, commands: Vec<Command>, proof: LedgerProof) -> Result<Vec<Effect>, DispatchError> {
        self.sync.on_sync_response(commands, proof, self.processor.ledger_mut())?;
        Ok(vec![Effect::None])
    }

    /// Observed a header claimed ahead of this replica's own (e.g. in a
    /// proposal's ledger header, or a peer's advertised proof): hands it to
    /// the sync service, which decides whether it's actually ahead and, if
    /// so, returns the batch request to send.
    pub fn on_observed_header(&mut self, observed: LedgerHeader) -> Option<Effect> {
        self.sync
            .on_local_sync_request(observed, &self.candidates)
            .map(Effect::SendSyncRequest)
    }

    pub fn on_sync_timeout(&mut self) -> Result<Option<Effect>, DispatchError> {
        Ok(self.sync.on_sync_timeout(&self.candidates)?.map(Effect::SendSyncRequest))
    }

    /// Called when `view`'s timer arms (spec §4.1): if this replica is the
    /// elected leader, pulls at most one command off the mempool and builds
    /// the vertex to broadcast. A leader with an empty mempool still
    /// proposes an empty vertex — liveness doesn't wait on traffic.
    pub fn propose_if_leader(&mut self, view: View) -> Vec<Effect> {
        if !self.processor.is_leader_for(view) {
            return vec![Effect::None];
        }
        let command = self.mempool.take(1).into_iter().next();
        let (qc, vertex) = self.processor.propose(view, command.clone());
        if command.is_some() {
            info!(?view, "proposing with a pending command");
        }
        vec![Effect::SendProposal { view, qc, vertex }]
    }
}
