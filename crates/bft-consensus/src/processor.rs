//! `BFTEventProcessor`: the per-replica HotStuff-style state machine (spec
//! §4.1-§4.3). Reacts to proposals, votes and local timeouts; accumulates
//! votes into QCs/TCs; applies the 3-chain commit rule; never touches the
//! network or the clock itself — those belong to the dispatcher.

use crate::evidence::{ByzantineEvidence, EvidenceLog};
use bft_crypto::{AggregateSignature, BftKeyPair};
use bft_ledger::{EpochTransition, Ledger, LedgerError, LedgerProof};
use bft_pacemaker::Pacemaker;
use bft_types::{
    timeout_digest, BftHeader, BftNode, Command, Epoch, LedgerHeader, QuorumCertificate,
    TimeoutCertificate, ValidatorSet, Vertex, VertexId, View, Vote, VoteData,
};
use bft_vertex_store::{VertexStore, VertexStoreError};
use primitive_types::U256;
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum ProcessorError {
    #[error(transparent)]
    VertexStore(#[from] VertexStoreError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("proposal's QC does not verify against the active validator set")]
    InvalidQc,
    #[error("vote rejected: {0:?}")]
    VoteRejected(RejectionKind),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RejectionKind {
    /// Signature does not verify, or the signer is not in the active set.
    InvalidAuthor,
    /// A second vote identical to one already recorded for this author/view.
    DuplicateVote,
    /// A vote that does not fit the current protocol state: a proposal from
    /// the wrong leader, a vote for a view already passed, a vote whose
    /// parent is below the locked view.
    UnexpectedVote,
}

pub enum VoteOutcome {
    Accumulated,
    QcFormed(QuorumCertificate),
    TcFormed(TimeoutCertificate),
}

pub struct CommitResult {
    pub chain: Vec<Vertex>,
    pub proof: LedgerProof,
}

struct QcBucket {
    vote_data: VoteData,
    signatures: AggregateSignature,
    voters_seen: HashSet<BftNode>,
}

struct TcBucket {
    epoch: Epoch,
    view: View,
    highest_qcs: HashMap<BftNode, QuorumCertificate>,
    signatures: AggregateSignature,
    voters_seen: HashSet<BftNode>,
}

pub struct BFTEventProcessor {
    keypair: BftKeyPair,
    node: BftNode,
    validators: ValidatorSet,
    pacemaker: Pacemaker,
    vertex_store: VertexStore,
    ledger: Ledger,
    /// Ledger header every inserted-but-not-yet-committed vertex would
    /// produce (spec §4.4): `VertexStore` only models the BFT chain, not the
    /// ledger state each link of it prepares, so the processor keeps this
    /// side table to hand `Ledger.prepare` the right parent on the next
    /// proposal without re-deriving the whole prefix.
    prepared_headers: HashMap<VertexId, LedgerHeader>,
    locked_view: View,
    last_voted_view: View,
    qc_buckets: HashMap<VertexId, QcBucket>,
    tc_buckets: HashMap<View, TcBucket>,
    seen_votes: HashMap<(View, BftNode), VoteData>,
    evidence: EvidenceLog,
}

impl BFTEventProcessor {
    pub fn new(keypair: BftKeyPair, validators: ValidatorSet, pacemaker: Pacemaker, vertex_store: VertexStore, ledger: Ledger) -> Self {
        let node = BftNode(keypair.public());
        let root_id = vertex_store.root_id();
        let mut prepared_headers = HashMap::new();
        prepared_headers.insert(root_id, ledger.header().clone());
        Self {
            keypair,
            node,
            validators,
            pacemaker,
            vertex_store,
            ledger,
            prepared_headers,
            locked_view: View::GENESIS,
            last_voted_view: View::GENESIS,
            qc_buckets: HashMap::new(),
            tc_buckets: HashMap::new(),
            seen_votes: HashMap::new(),
            evidence: EvidenceLog::new(),
        }
    }

    pub fn node(&self) -> BftNode {
        self.node
    }

    pub fn validators(&self) -> &ValidatorSet {
        &self.validators
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Mutable access for `bft-sync`'s ledger-level catch-up (spec §4.7),
    /// which applies a peer's already-ordered command batch directly via
    /// `Ledger::commit_commands` — bypassing the BFT chain entirely, since a
    /// replica that's epochs behind has no vertex chain to replay through.
    pub fn ledger_mut(&mut self) -> &mut Ledger {
        &mut self.ledger
    }

    /// The leader this replica expects for `view` (spec §4.1); callers
    /// outside this crate use it to address an outbound vote.
    pub fn next_leader(&self, view: View) -> BftNode {
        self.pacemaker.next_leader(view, &self.validators)
    }

    pub fn vertex_store(&self) -> &VertexStore {
        &self.vertex_store
    }

    pub fn evidence(&self) -> &EvidenceLog {
        &self.evidence
    }

    pub fn current_view(&self) -> View {
        self.pacemaker.current_view()
    }

    pub fn timeout_duration(&self) -> std::time::Duration {
        self.pacemaker.timeout_duration()
    }

    pub fn is_leader_for(&self, view: View) -> bool {
        self.pacemaker.next_leader(view, &self.validators) == self.node
    }

    pub fn ledger_header_of(&self, id: &VertexId) -> Option<LedgerHeader> {
        self.prepared_headers.get(id).cloned()
    }

    /// Builds the vertex this node, as leader of `view`, should broadcast:
    /// justified by the current high QC, carrying at most one command (the
    /// vertex model is single-command, spec §3).
    pub fn propose(&self, view: View, command: Option<Command>) -> (QuorumCertificate, Vertex) {
        let high_qc = self.vertex_store.high_qc().clone();
        let parent_id = high_qc.vote_data.voted_header.vertex_id;
        let vertex = Vertex::new(high_qc.clone(), view, command, self.node, parent_id);
        (high_qc, vertex)
    }

    /// Processes an incoming proposal (spec §4.1): verifies the justifying
    /// QC, runs it through `Ledger.prepare` and the vertex store, then
    /// either returns this replica's vote or rejects it under the voting
    /// safety rule (never vote twice for a view; never vote below the
    /// locked view).
    pub fn on_proposal(
        &mut self,
        view: View,
        qc: QuorumCertificate,
        vertex: Vertex,
        epoch_transition: Option<EpochTransition>,
    ) -> Result<Vote, ProcessorError> {
        qc.verify(&self.validators).map_err(|_| ProcessorError::InvalidQc)?;
        self.observe_qc_inner(qc)?;

        let expected_leader = self.pacemaker.next_leader(view, &self.validators);
        if vertex.proposer != expected_leader {
            return Err(ProcessorError::VoteRejected(RejectionKind::InvalidAuthor));
        }
        if vertex.view <= self.last_voted_view {
            return Err(ProcessorError::VoteRejected(RejectionKind::UnexpectedVote));
        }

        let parent_id = vertex.parent_id;
        let parent_view = self.vertex_store.get(&parent_id).map(|v| v.view).ok_or(VertexStoreError::MissingParent(parent_id))?;
        if parent_view < self.locked_view {
            return Err(ProcessorError::VoteRejected(RejectionKind::UnexpectedVote));
        }

        let parent_header = self
            .prepared_headers
            .get(&parent_id)
            .cloned()
            .ok_or(VertexStoreError::MissingParent(parent_id))?;

        let ledger_header = self.ledger.prepare(&parent_header, &vertex, epoch_transition)?;
        let committed_header = self.compute_committed_header(&vertex);

        let bft_header = self.vertex_store.insert_vertex(vertex.clone(), ledger_header.clone())?;
        self.prepared_headers.insert(bft_header.vertex_id, ledger_header);

        self.last_voted_view = vertex.view;

        let vote_data = VoteData {
            voted_header: bft_header,
            parent_header: BftHeader { view: parent_view, vertex_id: parent_id, ledger_header: parent_header },
            committed_header,
        };
        let digest = vote_data.digest();
        let signature = self.keypair.sign(&digest);
        debug!(view = ?vertex.view, "voted for proposal");
        Ok(Vote { vote_data, timeout_signature: None, high_qc: None, voter: self.node, signature })
    }

    /// Three-chain commit rule (spec §4.1): `vertex` at view `v` commits its
    /// grandparent iff `parent.view + 1 == v` and `grandparent.view + 1 ==
    /// parent.view` — a direct, unbroken chain of three consecutive views.
    fn compute_committed_header(&self, vertex: &Vertex) -> Option<BftHeader> {
        let parent = self.vertex_store.get(&vertex.parent_id)?;
        if parent.view.next() != vertex.view {
            return None;
        }
        let grandparent_id = parent.parent_id;
        let grandparent = self.vertex_store.get(&grandparent_id)?;
        if grandparent.view.next() != parent.view {
            return None;
        }
        let grandparent_ledger = self.prepared_headers.get(&grandparent_id)?.clone();
        Some(BftHeader { view: grandparent.view, vertex_id: grandparent_id, ledger_header: grandparent_ledger })
    }

    /// Records a QC in the vertex store/pacemaker and, if it carries a
    /// 3-chain commit, applies it to the ledger. Public wrapper around
    /// `observe_qc_inner` for QCs arriving other than embedded in a proposal
    /// (e.g. reconstructed locally after this replica's own vote completed
    /// a quorum).
    pub fn observe_qc(&mut self, qc: QuorumCertificate) -> Result<Option<CommitResult>, ProcessorError> {
        self.observe_qc_inner(qc)
    }

    fn observe_qc_inner(&mut self, qc: QuorumCertificate) -> Result<Option<CommitResult>, ProcessorError> {
        self.vertex_store.add_qc(qc.clone());
        self.pacemaker.process_qc(&qc);

        let locked_candidate = self.vertex_store.high_committed_qc().vote_data.parent_header.view;
        if locked_candidate > self.locked_view {
            self.locked_view = locked_candidate;
        }

        let Some(committed) = qc.committed_header() else {
            return Ok(None);
        };
        if committed.view <= self.vertex_store.root().view {
            // Already committed by state version: a no-op (spec testable
            // property — committing an already-committed proof is a no-op).
            return Ok(None);
        }
        let chain = self.vertex_store.commit(committed)?;
        let proof = self.ledger.commit(&chain, committed.ledger_header.clone(), qc.signatures.clone())?;
        info!(state_version = proof.header.state_version, epoch = ?proof.header.epoch, "advanced via 3-chain commit");
        Ok(Some(CommitResult { chain, proof }))
    }

    /// Processes an incoming vote (spec §4.1/§4.3): rejects unknown signers
    /// and malformed signatures, records equivocation as `ByzantineEvidence`
    /// when a second, differing vote arrives from an author already seen at
    /// that view, then accumulates into the relevant QC or TC bucket.
    pub fn on_vote(&mut self, vote: Vote) -> Result<VoteOutcome, ProcessorError> {
        if vote.verify().is_err() {
            return Err(ProcessorError::VoteRejected(RejectionKind::InvalidAuthor));
        }
        if !self.validators.contains(&vote.voter) {
            return Err(ProcessorError::VoteRejected(RejectionKind::InvalidAuthor));
        }

        let view = vote.vote_data.voted_header.view;
        let key = (view, vote.voter);
        if let Some(prior) = self.seen_votes.get(&key) {
            if *prior != vote.vote_data {
                self.evidence.record(ByzantineEvidence::DoubleVote {
                    author: vote.voter,
                    view,
                    first: prior.clone(),
                    second: vote.vote_data.clone(),
                });
            }
            return Err(ProcessorError::VoteRejected(RejectionKind::DuplicateVote));
        }
        self.seen_votes.insert(key, vote.vote_data.clone());

        if vote.is_timeout() {
            self.accumulate_timeout_vote(vote)
        } else {
            self.accumulate_vote(vote)
        }
    }

    fn accumulate_vote(&mut self, vote: Vote) -> Result<VoteOutcome, ProcessorError> {
        let vertex_id = vote.vote_data.voted_header.vertex_id;
        let bucket = self.qc_buckets.entry(vertex_id).or_insert_with(|| QcBucket {
            vote_data: vote.vote_data.clone(),
            signatures: AggregateSignature::new(),
            voters_seen: HashSet::new(),
        });
        if bucket.vote_data != vote.vote_data {
            let view = vote.vote_data.voted_header.view;
            let first = bucket.vote_data.clone();
            self.evidence.record(ByzantineEvidence::ConflictingQc { view, first, second: vote.vote_data.clone() });
            return Err(ProcessorError::VoteRejected(RejectionKind::UnexpectedVote));
        }
        bucket.signatures.add(*vote.voter.key(), vote.signature);
        bucket.voters_seen.insert(vote.voter);

        let power = power_of_signers(&self.validators, &bucket.signatures);
        if self.validators.has_quorum(power) {
            let qc = QuorumCertificate { vote_data: bucket.vote_data.clone(), signatures: bucket.signatures.clone() };
            self.qc_buckets.remove(&vertex_id);
            return Ok(VoteOutcome::QcFormed(qc));
        }
        Ok(VoteOutcome::Accumulated)
    }

    fn accumulate_timeout_vote(&mut self, vote: Vote) -> Result<VoteOutcome, ProcessorError> {
        let view = vote.vote_data.voted_header.view;
        let epoch = vote.vote_data.voted_header.ledger_header.epoch;
        let timeout_signature = vote.timeout_signature.ok_or(ProcessorError::VoteRejected(RejectionKind::UnexpectedVote))?;

        let bucket = self.tc_buckets.entry(view).or_insert_with(|| TcBucket {
            epoch,
            view,
            highest_qcs: HashMap::new(),
            signatures: AggregateSignature::new(),
            voters_seen: HashSet::new(),
        });
        bucket.signatures.add(*vote.voter.key(), timeout_signature);
        bucket.voters_seen.insert(vote.voter);
        if let Some(high_qc) = vote.high_qc {
            bucket.highest_qcs.insert(vote.voter, high_qc);
        }

        let power = power_of_signers(&self.validators, &bucket.signatures);
        if self.validators.has_quorum(power) {
            let tc = TimeoutCertificate {
                epoch: bucket.epoch,
                view: bucket.view,
                highest_qcs: bucket.highest_qcs.clone(),
                signatures: bucket.signatures.clone(),
            };
            self.tc_buckets.remove(&view);
            return Ok(VoteOutcome::TcFormed(tc));
        }
        Ok(VoteOutcome::Accumulated)
    }

    /// A view timer fired locally (spec §4.1/§5): advances the pacemaker's
    /// backoff and, unless the firing was stale, returns this replica's
    /// timeout vote to broadcast.
    pub fn on_local_timeout(&mut self, fired_for_view: View) -> Option<Vote> {
        let high_qc = self.vertex_store.high_qc().clone();
        let event = self.pacemaker.on_view_timeout(fired_for_view, high_qc.clone())?;
        let epoch = self.ledger.header().epoch;

        let voted_header = BftHeader {
            view: event.view,
            vertex_id: VertexId([0u8; 32]),
            ledger_header: self.ledger.header().clone(),
        };
        let vote_data = VoteData { voted_header, parent_header: high_qc.vote_data.voted_header.clone(), committed_header: None };
        let digest = vote_data.digest();
        let signature = self.keypair.sign(&digest);
        let timeout_digest_value = timeout_digest(epoch, event.view);
        let timeout_signature = self.keypair.sign(&timeout_digest_value);

        warn!(view = ?event.view, "local view timeout, broadcasting timeout vote");
        Some(Vote { vote_data, timeout_signature: Some(timeout_signature), high_qc: Some(high_qc), voter: self.node, signature })
    }

    /// A `TimeoutCertificate` arrived (formed by this replica's own
    /// accumulation, or relayed by a peer): advances the pacemaker past it
    /// and folds its highest QC into the vertex store the same way any other
    /// observed QC would be.
    pub fn on_external_timeout_certificate(&mut self, tc: TimeoutCertificate) {
        self.pacemaker.process_tc(&tc);
        if let Some(qc) = tc.highest_qc().cloned() {
            self.vertex_store.add_qc(qc);
        }
    }

    /// Applies vertices recovered via the vertex-level sync path (spec §4.2
    /// `GetVerticesResponse`) — short, in-epoch catch-up bridging a gap in
    /// the tree, as opposed to `bft-sync`'s ledger-level, epoch-spanning
    /// recovery. Vertices whose parent is not yet known are skipped rather
    /// than erroring: the batch may not be contiguous with what this replica
    /// already has.
    pub fn on_sync_response(&mut self, vertices: Vec<Vertex>) -> Result<(), ProcessorError> {
        for vertex in vertices {
            if self.vertex_store.contains(&vertex.id()) {
                continue;
            }
            let parent_header = match self.prepared_headers.get(&vertex.parent_id) {
                Some(h) => h.clone(),
                None => {
                    warn!(parent_id = ?vertex.parent_id, "sync vertex parent unknown, skipping");
                    continue;
                }
            };
            let qc = vertex.qc.clone();
            let ledger_header = self.ledger.prepare(&parent_header, &vertex, None)?;
            let bft_header = self.vertex_store.insert_vertex(vertex, ledger_header.clone())?;
            self.prepared_headers.insert(bft_header.vertex_id, ledger_header);
            self.vertex_store.add_qc(qc);
        }
        Ok(())
    }

    /// Re-seeds every piece of epoch-scoped state for a fresh epoch (spec
    /// §4.6): the validator set, the vertex store (rooted at a fresh
    /// synthetic genesis, since `View` is epoch-relative), and the
    /// pacemaker's view clock. The keypair, node identity and evidence log
    /// persist across epochs.
    pub fn reset_for_epoch(&mut self, epoch: Epoch, validators: ValidatorSet, root_vertex: Vertex, root_qc: QuorumCertificate) {
        self.validators = validators;
        let root_id = root_vertex.id();
        self.vertex_store = VertexStore::new(root_vertex, root_qc);
        self.pacemaker.start_epoch(epoch, View::GENESIS);
        self.prepared_headers.clear();
        self.prepared_headers.insert(root_id, self.ledger.header().clone());
        self.locked_view = View::GENESIS;
        self.last_voted_view = View::GENESIS;
        self.qc_buckets.clear();
        self.tc_buckets.clear();
        self.seen_votes.clear();
        info!(?epoch, "processor reset for new epoch");
    }
}

fn power_of_signers(validators: &ValidatorSet, signatures: &AggregateSignature) -> U256 {
    signatures
        .signers()
        .fold(U256::zero(), |acc, pk| acc + validators.power_of(&BftNode(*pk)).unwrap_or_default())
}
