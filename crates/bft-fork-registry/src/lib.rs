//! Fork registry and candidate-fork voting (spec §4.6): an ordered list of
//! `ForkConfig`s, each with a fixed `minEpoch` and an optional stake-weighted
//! predicate. At most one fork activates per epoch boundary.

use bft_constraint_machine::{Particle, Substate, SubstateTypeId};
use bft_crypto::{double_sha256, BftPublicKey};
use bft_storage::{EngineStore, StorageError};
use bft_types::{BftNode, Epoch, ValidatorSet};
use primitive_types::U256;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum ForkRegistryError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("malformed validator key in ValidatorSystemMetadata substate")]
    MalformedValidatorKey,
    #[error("power sum overflowed")]
    PowerOverflow,
}

/// Identity of an active ruleset. `RERules` itself is an implementation
/// detail of the constraint machine's transition procedure table (out of
/// scope here, §1 non-goals); what the registry and the rest of the node
/// actually need is a stable name to compare against and log.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RERulesId(pub String);

impl RERulesId {
    pub fn base() -> Self {
        Self("base".to_string())
    }
}

/// `stakeVoting(minEpoch, bps)`: true once validators holding at least
/// `bps` basis points of total power have recorded the fork's vote hash in
/// their `ValidatorSystemMetadata` substate.
#[derive(Clone, Debug)]
pub struct StakeVoting {
    pub min_epoch: Epoch,
    pub bps: u16,
}

impl StakeVoting {
    /// `H(validatorKey || forkName || minEpoch)` — the hash a validator
    /// writes into its `ValidatorSystemMetadata` substate to record a vote.
    pub fn vote_hash(validator: &BftPublicKey, fork_name: &str, min_epoch: Epoch) -> [u8; 32] {
        let mut buf = Vec::with_capacity(33 + fork_name.len() + 8);
        buf.extend_from_slice(validator.as_bytes());
        buf.extend_from_slice(fork_name.as_bytes());
        buf.extend_from_slice(&min_epoch.0.to_be_bytes());
        double_sha256(&buf)
    }

    pub fn evaluate(
        &self,
        fork_name: &str,
        validators: &ValidatorSet,
        store: &dyn EngineStore,
    ) -> Result<bool, ForkRegistryError> {
        let mut matched_power = U256::zero();
        let mut cursor = store.open_indexed_cursor(b"s:");
        while let Some((_, value)) = cursor.next() {
            let substate = match Substate::decode(&value) {
                Ok(s) => s,
                Err(_) => continue,
            };
            if substate.type_id != SubstateTypeId::ValidatorSystemMetadata {
                continue;
            }
            let particle = match Particle::parse(&substate) {
                Ok(p) => p,
                Err(_) => continue,
            };
            let Particle::ValidatorSystemMetadata(meta) = particle else { continue };
            let key = BftPublicKey::from_bytes(meta.validator).map_err(|_| ForkRegistryError::MalformedValidatorKey)?;
            let expected = Self::vote_hash(&key, fork_name, self.min_epoch);
            if meta.vote_hash != expected {
                continue;
            }
            let node = BftNode(key);
            if let Some(power) = validators.power_of(&node) {
                matched_power = matched_power.checked_add(power).ok_or(ForkRegistryError::PowerOverflow)?;
            }
        }

        let total = validators.total_power();
        let lhs = matched_power.checked_mul(U256::from(10_000u32)).ok_or(ForkRegistryError::PowerOverflow)?;
        let rhs = total.checked_mul(U256::from(self.bps)).ok_or(ForkRegistryError::PowerOverflow)?;
        Ok(lhs >= rhs)
    }
}

#[derive(Clone, Debug)]
pub struct ForkConfig {
    pub name: String,
    pub min_epoch: Epoch,
    pub re_rules: RERulesId,
    pub predicate: Option<StakeVoting>,
}

/// Ordered by `minEpoch`; candidates are evaluated in that order and the
/// first one whose epoch has arrived and whose predicate holds (a scheduled
/// fork has no predicate and always holds once its epoch arrives) activates.
pub struct ForkRegistry {
    forks: Vec<ForkConfig>,
}

impl ForkRegistry {
    pub fn new(mut forks: Vec<ForkConfig>) -> Self {
        forks.sort_by_key(|f| f.min_epoch);
        Self { forks }
    }

    pub fn forks(&self) -> &[ForkConfig] {
        &self.forks
    }

    /// Evaluates candidates in `minEpoch` order against the pre-boundary
    /// substate set, returning at most one activation (spec I-invariant:
    /// "at most one fork activates per boundary").
    pub fn evaluate_activation(
        &self,
        current_epoch: Epoch,
        validators: &ValidatorSet,
        store: &dyn EngineStore,
    ) -> Result<Option<RERulesId>, ForkRegistryError> {
        for fork in &self.forks {
            if current_epoch < fork.min_epoch {
                continue;
            }
            let activates = match &fork.predicate {
                None => true,
                Some(predicate) => predicate.evaluate(&fork.name, validators, store)?,
            };
            if activates {
                info!(fork = %fork.name, epoch = ?current_epoch, "fork activated");
                return Ok(Some(fork.re_rules.clone()));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bft_constraint_machine::particle::ValidatorSystemMetadataParticle;
    use bft_storage::{EngineStore as _, SledEngineStore};
    use bft_types::BftNode;
    use bft_crypto::BftKeyPair;
    use rand::rngs::OsRng;

    fn seed_vote(store: &SledEngineStore, idx: u8, validator: BftPublicKey, vote_hash: [u8; 32]) {
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

    #[test]
    fn scheduled_fork_activates_once_epoch_arrives() {
        let registry = ForkRegistry::new(vec![ForkConfig {
            name: "scheduled".into(),
            min_epoch: Epoch(5),
            re_rules: RERulesId("v2".into()),
            predicate: None,
        }]);
        let dir = tempfile::tempdir().unwrap();
        let store = SledEngineStore::open(dir.path()).unwrap();
        let validators = ValidatorSet::new(vec![]);

        assert!(registry.evaluate_activation(Epoch(4), &validators, &store).unwrap().is_none());
        let activated = registry.evaluate_activation(Epoch(5), &validators, &store).unwrap();
        assert_eq!(activated, Some(RERulesId("v2".into())));
    }

    #[test]
    fn candidate_fork_needs_supermajority_votes() {
        let mut rng = OsRng;
        let a = BftKeyPair::generate(&mut rng).public();
        let b = BftKeyPair::generate(&mut rng).public();
        let c = BftKeyPair::generate(&mut rng).public();
        let validators = ValidatorSet::new(vec![
            (BftNode(a), U256::from(34u32)),
            (BftNode(b), U256::from(33u32)),
            (BftNode(c), U256::from(33u32)),
        ]);

        let registry = ForkRegistry::new(vec![ForkConfig {
            name: "candidate".into(),
            min_epoch: Epoch(10),
            re_rules: RERulesId("candidate-rules".into()),
            predicate: Some(StakeVoting { min_epoch: Epoch(10), bps: 6667 }),
        }]);

        let dir = tempfile::tempdir().unwrap();
        let store = SledEngineStore::open(dir.path()).unwrap();

        // Only validator `a` (34%) has voted: below the 66.67% threshold.
        let hash = StakeVoting::vote_hash(&a, "candidate", Epoch(10));
        seed_vote(&store, 1, a, hash);
        assert!(registry.evaluate_activation(Epoch(10), &validators, &store).unwrap().is_none());

        // `a` and `b` together hold 67%, clearing the threshold.
        let hash_b = StakeVoting::vote_hash(&b, "candidate", Epoch(10));
        seed_vote(&store, 2, b, hash_b);
        let activated = registry.evaluate_activation(Epoch(10), &validators, &store).unwrap();
        assert_eq!(activated, Some(RERulesId("candidate-rules".into())));
    }
}
