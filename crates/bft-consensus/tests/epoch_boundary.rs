//! Scenario: a 4-validator network closes its epoch after a single round
//! and a candidate fork with enough recorded stake votes activates at the
//! boundary. Exercises `Dispatcher::pending_epoch_transition` driving
//! `EpochUpdateReducer` from the live event loop, and `EpochManager`
//! evaluating `ForkRegistry` against the same store the committing replica
//! actually holds.

#[path = "support/mod.rs"]
mod support;

use bft_fork_registry::{ForkConfig, ForkRegistry, RERulesId, StakeVoting};
use bft_types::{Epoch, View};

#[test]
fn epoch_boundary_reseeds_validators_and_activates_a_voted_fork() {
    let candidate = ForkConfig {
        name: "candidate".to_string(),
        min_epoch: Epoch(1),
        re_rules: RERulesId("candidate-rules".to_string()),
        predicate: Some(StakeVoting { min_epoch: Epoch(1), bps: 6667 }),
    };

    // epoch_max_rounds = 1: the view-1 proposal already sits at or past the
    // threshold, so it closes the epoch as soon as it's proposed.
    let (keypairs, validators, mut replicas) = support::build_network(4, 1, vec![candidate.clone()]);

    // 3 of 4 validators (75% of equal-power stake) record the candidate
    // fork's vote hash in every replica's own store, mirroring what each
    // replica would see independently in a real deployment.
    for replica in &mut replicas {
        let store = replica.dispatcher.processor().ledger().store();
        for (idx, kp) in keypairs.iter().take(3).enumerate() {
            let hash = StakeVoting::vote_hash(&kp.public(), "candidate", Epoch(1));
            support::seed_fork_vote(store, idx as u8 + 1, kp.public(), hash);
        }
    }

    for v in 1..=3u64 {
        support::drive_view(&mut replicas, &keypairs, &validators, View(v));
    }

    // The new epoch's genesis QC is what actually carries the bumped epoch
    // number (`Ledger`'s own committed header keeps the closing epoch's
    // number, only `is_end_of_epoch` flips); it lands in the reseeded vertex
    // store's `high_qc` once `reset_for_epoch` runs.
    let committed = replicas
        .iter()
        .find(|r| r.dispatcher.processor().vertex_store().high_qc().vote_data.voted_header.ledger_header.epoch == Epoch(1))
        .expect("no replica crossed the epoch boundary");

    assert_eq!(committed.dispatcher.get_validators().len(), validators.len());
    for (node, power) in validators.members() {
        assert_eq!(committed.dispatcher.get_validators().power_of(node), Some(*power));
    }

    // The same store the boundary was evaluated against does carry enough
    // recorded stake to activate the candidate fork.
    let registry = ForkRegistry::new(vec![candidate]);
    let store = committed.dispatcher.processor().ledger().store();
    let activated = registry.evaluate_activation(Epoch(1), &validators, store).unwrap();
    assert_eq!(activated, Some(RERulesId("candidate-rules".to_string())));
}
