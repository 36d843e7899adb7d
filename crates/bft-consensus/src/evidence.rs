//! Byzantine evidence recording (supplement C). The processor does not slash
//! or otherwise punish equivocating validators — there is no staking
//! mechanism wired up here — it only recognises a second, conflicting vote
//! from an author already seen at the same view and keeps a durable record of
//! it so an operator or a higher-level policy can act on it later.

use bft_types::{BftNode, View, VoteData};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ByzantineEvidence {
    /// Two distinct `VoteData` signed by the same author for the same view.
    DoubleVote { author: BftNode, view: View, first: VoteData, second: VoteData },
    /// Two QCs for the same view whose vote data disagree — observed rather
    /// than signed by a single author, but still proof of a fork attempt.
    ConflictingQc { view: View, first: VoteData, second: VoteData },
}

impl ByzantineEvidence {
    pub fn author(&self) -> Option<&BftNode> {
        match self {
            ByzantineEvidence::DoubleVote { author, .. } => Some(author),
            ByzantineEvidence::ConflictingQc { .. } => None,
        }
    }

    pub fn view(&self) -> View {
        match self {
            ByzantineEvidence::DoubleVote { view, .. } => *view,
            ByzantineEvidence::ConflictingQc { view, .. } => *view,
        }
    }
}

/// An append-only record of observed evidence, queryable by view or author.
/// Never mutated or pruned: evidence is kept for the life of the process
/// (spec supplement C: "recorded, not acted on").
#[derive(Default)]
pub struct EvidenceLog {
    entries: Vec<ByzantineEvidence>,
}

impl EvidenceLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, evidence: ByzantineEvidence) {
        tracing::warn!(?evidence, "byzantine evidence recorded");
        self.entries.push(evidence);
    }

    pub fn entries(&self) -> &[ByzantineEvidence] {
        &self.entries
    }

    pub fn for_author(&self, author: &BftNode) -> impl Iterator<Item = &ByzantineEvidence> {
        self.entries.iter().filter(move |e| e.author() == Some(author))
    }
}
