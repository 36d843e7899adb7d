//! Epoch boundary handling (spec §4.6): detects a committed header that
//! closes an epoch, evaluates candidate fork activation against the
//! pre-boundary store, and builds the fresh synthetic genesis a new epoch's
//! vertex store and pacemaker must be reseeded with. `View` is epoch-relative,
//! so every epoch starts its own chain rather than continuing the old one's.

use bft_fork_registry::{ForkRegistry, ForkRegistryError, RERulesId};
use bft_storage::EngineStore;
use bft_types::{BftNode, Epoch, LedgerHeader, QuorumCertificate, ValidatorSet, Vertex};
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum EpochManagerError {
    #[error(transparent)]
    ForkRegistry(#[from] ForkRegistryError),
}

/// Everything the dispatcher needs to reseed epoch-scoped state once a
/// boundary is crossed: the new validator set and a self-consistent
/// genesis vertex/QC pair rooted in the just-committed ledger state.
pub struct EpochBoundary {
    pub epoch: Epoch,
    pub validators: ValidatorSet,
    pub root_vertex: Vertex,
    pub root_qc: QuorumCertificate,
    pub activated_rules: Option<RERulesId>,
}

pub struct EpochManager {
    fork_registry: ForkRegistry,
}

impl EpochManager {
    pub fn new(fork_registry: ForkRegistry) -> Self {
        Self { fork_registry }
    }

    pub fn fork_registry(&self) -> &ForkRegistry {
        &self.fork_registry
    }

    /// Returns `Some(EpochBoundary)` iff `committed` closes its epoch (spec
    /// `LedgerHeader.isEndOfEpoch && nextValidatorSet.is_some()`). The new
    /// epoch's genesis ledger header continues `committed`'s state version
    /// and accumulator rather than resetting them — only `epoch` advances
    /// and `view` resets to `View::GENESIS`.
    pub fn evaluate_boundary(
        &self,
        committed: &LedgerHeader,
        store: &dyn EngineStore,
        proposer: BftNode,
    ) -> Result<Option<EpochBoundary>, EpochManagerError> {
        if !committed.is_end_of_epoch {
            return Ok(None);
        }
        let Some(next_validators) = committed.next_validator_set.clone() else {
            return Ok(None);
        };

        let next_epoch = committed.epoch.next();
        let activated_rules = self.fork_registry.evaluate_activation(next_epoch, &next_validators, store)?;

        let genesis_ledger_header = LedgerHeader {
            epoch: next_epoch,
            view: bft_types::View::GENESIS,
            state_version: committed.state_version,
            accumulator_hash: committed.accumulator_hash,
            is_end_of_epoch: false,
            next_validator_set: None,
            timestamp: committed.timestamp,
        };
        let (root_vertex, root_qc) = Vertex::genesis_pair_with_header(proposer, genesis_ledger_header);

        info!(epoch = ?next_epoch, validators = next_validators.members().len(), "epoch boundary crossed");

        Ok(Some(EpochBoundary {
            epoch: next_epoch,
            validators: next_validators,
            root_vertex,
            root_qc,
            activated_rules,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bft_crypto::BftKeyPair;
    use bft_storage::SledEngineStore;
    use primitive_types::U256;
    use rand::rngs::OsRng;

    fn node() -> BftNode {
        let mut rng = OsRng;
        BftNode(BftKeyPair::generate(&mut rng).public())
    }

    #[test]
    fn non_boundary_header_yields_no_transition() {
        let manager = EpochManager::new(ForkRegistry::new(vec![]));
        let dir = tempfile::tempdir().unwrap();
        let store = SledEngineStore::open(dir.path()).unwrap();
        let header = LedgerHeader::genesis();
        let result = manager.evaluate_boundary(&header, &store, node()).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn boundary_header_reseeds_epoch_and_carries_state_version() {
        let manager = EpochManager::new(ForkRegistry::new(vec![]));
        let dir = tempfile::tempdir().unwrap();
        let store = SledEngineStore::open(dir.path()).unwrap();
        let next_validators = ValidatorSet::new(vec![(node(), U256::from(100))]);
        let header = LedgerHeader {
            epoch: Epoch::GENESIS,
            view: bft_types::View(7),
            state_version: 42,
            accumulator_hash: [9u8; 32],
            is_end_of_epoch: true,
            next_validator_set: Some(next_validators),
            timestamp: 1000,
        };
        let proposer = node();
        let boundary = manager.evaluate_boundary(&header, &store, proposer).unwrap().unwrap();
        assert_eq!(boundary.epoch, Epoch(1));
        assert_eq!(boundary.root_vertex.qc.vote_data.voted_header.ledger_header.state_version, 42);
        assert_eq!(boundary.root_vertex.qc.vote_data.voted_header.ledger_header.accumulator_hash, [9u8; 32]);
        assert_eq!(boundary.root_vertex.qc.vote_data.voted_header.vertex_id, boundary.root_vertex.id());
    }
}
