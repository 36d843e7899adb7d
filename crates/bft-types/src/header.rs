use crate::validator_set::ValidatorSet;
use crate::vertex::VertexId;
use crate::view::{Epoch, View};
use serde::{Deserialize, Serialize};

/// `(epoch, view, stateVersion, accumulatorHash, isEndOfEpoch, nextValidatorSet?, timestamp)`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerHeader {
    pub epoch: Epoch,
    pub view: View,
    pub state_version: u64,
    pub accumulator_hash: [u8; 32],
    pub is_end_of_epoch: bool,
    pub next_validator_set: Option<ValidatorSet>,
    pub timestamp: i64,
}

impl LedgerHeader {
    pub fn genesis() -> Self {
        Self {
            epoch: Epoch::GENESIS,
            view: View::GENESIS,
            state_version: 0,
            accumulator_hash: [0u8; 32],
            is_end_of_epoch: false,
            next_validator_set: None,
            timestamp: 0,
        }
    }
}

/// `(view, vertexId, ledgerHeader)` — what a QC/vote actually certifies.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BftHeader {
    pub view: View,
    pub vertex_id: VertexId,
    pub ledger_header: LedgerHeader,
}

impl BftHeader {
    pub fn genesis() -> Self {
        Self {
            view: View::GENESIS,
            vertex_id: VertexId([0u8; 32]),
            ledger_header: LedgerHeader::genesis(),
        }
    }
}
