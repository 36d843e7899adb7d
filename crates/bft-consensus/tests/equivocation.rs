//! Scenario: a validator signs two different votes for the same view. The
//! dispatcher must reject the second without panicking or forming a QC from
//! mismatched vote data, and durably record the equivocation as evidence.
//! Exercises `Dispatcher::handle(Event::Vote)`'s rejection path end to end,
//! not just `BFTEventProcessor::on_vote` directly.

#[path = "support/mod.rs"]
mod support;

use bft_consensus::{Effect, Event};
use bft_types::{BftHeader, BftNode, LedgerHeader, VertexId, View, Vote, VoteData};

#[test]
fn a_second_conflicting_vote_is_rejected_and_recorded() {
    let (keypairs, _validators, mut replicas) = support::build_network(4, u64::MAX, vec![]);
    let receiver = &mut replicas[0];
    let view = View(1);
    let high_qc = receiver.dispatcher.processor().vertex_store().high_qc().clone();

    let equivocator = &keypairs[0];
    let voter = BftNode(equivocator.public());

    let header_a = BftHeader { view, vertex_id: VertexId([1; 32]), ledger_header: LedgerHeader::genesis() };
    let vote_data_a = VoteData { voted_header: header_a, parent_header: high_qc.vote_data.voted_header.clone(), committed_header: None };
    let signature_a = equivocator.sign(&vote_data_a.digest());
    let vote_a = Vote { vote_data: vote_data_a, timeout_signature: None, high_qc: None, voter, signature: signature_a };
    let effects_a = receiver.dispatcher.handle(Event::Vote(vote_a)).unwrap();
    assert!(matches!(effects_a.as_slice(), [Effect::None]));

    let header_b = BftHeader { view, vertex_id: VertexId([2; 32]), ledger_header: LedgerHeader::genesis() };
    let vote_data_b = VoteData { voted_header: header_b, parent_header: high_qc.vote_data.voted_header.clone(), committed_header: None };
    let signature_b = equivocator.sign(&vote_data_b.digest());
    let vote_b = Vote { vote_data: vote_data_b, timeout_signature: None, high_qc: None, voter, signature: signature_b };
    let effects_b = receiver.dispatcher.handle(Event::Vote(vote_b)).unwrap();
    assert!(matches!(effects_b.as_slice(), [Effect::None]));

    let evidence = receiver.dispatcher.processor().evidence().entries();
    assert_eq!(evidence.len(), 1);
    assert_eq!(evidence[0].author(), Some(&voter));
    assert_eq!(evidence[0].view(), view);
}
