//! Scenario: view 1's leader never proposes. Three of the four validators
//! time out and broadcast timeout votes, which quorum into a
//! `TimeoutCertificate`; the receiving replica's pacemaker must advance past
//! the stalled view without a proposal ever reaching it. Exercises
//! `Dispatcher::handle(Event::Vote)`'s `VoteOutcome::TcFormed` branch, not
//! just the processor in isolation.

#[path = "support/mod.rs"]
mod support;

use bft_consensus::Event;
use bft_types::{timeout_digest, BftHeader, BftNode, Epoch, LedgerHeader, VertexId, View, Vote, VoteData};

#[test]
fn timeout_votes_advance_the_view_with_no_proposal() {
    let (keypairs, _validators, mut replicas) = support::build_network(4, u64::MAX, vec![]);
    let receiver = &mut replicas[0];
    let stalled_view = receiver.dispatcher.processor().current_view();
    assert_eq!(stalled_view, View::GENESIS);

    let high_qc = receiver.dispatcher.processor().vertex_store().high_qc().clone();
    for kp in keypairs.iter().take(3) {
        let voter = BftNode(kp.public());
        let voted_header = BftHeader { view: stalled_view, vertex_id: VertexId([0; 32]), ledger_header: LedgerHeader::genesis() };
        let vote_data = VoteData { voted_header, parent_header: high_qc.vote_data.voted_header.clone(), committed_header: None };
        let signature = kp.sign(&vote_data.digest());
        let timeout_signature = kp.sign(&timeout_digest(Epoch::GENESIS, stalled_view));
        let vote = Vote { vote_data, timeout_signature: Some(timeout_signature), high_qc: Some(high_qc.clone()), voter, signature };
        receiver.dispatcher.handle(Event::Vote(vote)).unwrap();
    }

    assert_eq!(receiver.dispatcher.processor().current_view(), stalled_view.next());
}
