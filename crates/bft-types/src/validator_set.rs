use crate::node::BftNode;
use primitive_types::U256;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// An ordered set of `(BftNode, power)` pairs. Internally kept sorted by node
/// key so that two sets built from the same members in different orders
/// compare equal (spec §3: "equality is order-independent") and so iteration
/// is deterministic across replicas without needing a separate sort step at
/// every call site (leader election, quorum counting).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ValidatorSet {
    members: Vec<(BftNode, U256)>,
}

impl ValidatorSet {
    pub fn new(mut members: Vec<(BftNode, U256)>) -> Self {
        members.sort_by(|a, b| a.0.cmp(&b.0));
        members.dedup_by(|a, b| a.0 == b.0);
        Self { members }
    }

    pub fn members(&self) -> &[(BftNode, U256)] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, node: &BftNode) -> bool {
        self.members.binary_search_by(|(n, _)| n.cmp(node)).is_ok()
    }

    pub fn power_of(&self, node: &BftNode) -> Option<U256> {
        self.members
            .binary_search_by(|(n, _)| n.cmp(node))
            .ok()
            .map(|i| self.members[i].1)
    }

    /// Total power. Checked addition: power sums never overflow is an
    /// invariant on well-formed validator sets, so we panic
    /// on overflow rather than silently wrapping — a validator set that
    /// overflows U256 in its total power is a configuration bug, not a
    /// runtime condition to route through `Result`.
    pub fn total_power(&self) -> U256 {
        self.members
            .iter()
            .fold(U256::zero(), |acc, (_, p)| acc.checked_add(*p).expect("validator power overflow"))
    }

    /// Byzantine quorum threshold: `⌈2·total/3⌉ + 1` (spec §3).
    pub fn quorum_threshold(&self) -> U256 {
        let total = self.total_power();
        let two_thirds_ceil = (total * U256::from(2) + U256::from(2)) / U256::from(3);
        two_thirds_ceil + U256::from(1)
    }

    pub fn has_quorum(&self, power: U256) -> bool {
        power >= self.quorum_threshold()
    }

    pub fn as_power_map(&self) -> HashMap<BftNode, U256> {
        self.members.iter().cloned().collect()
    }
}

impl PartialEq for ValidatorSet {
    fn eq(&self, other: &Self) -> bool {
        self.members == other.members
    }
}
impl Eq for ValidatorSet {}
