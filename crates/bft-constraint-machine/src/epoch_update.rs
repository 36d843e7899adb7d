//! Builds the epoch-update instruction stream and folds it through the
//! reducer state chain (spec §4.6): rewards, unstaking, staking, rake,
//! owner and registered-flag updates, then the next `ValidatorSet` and a
//! fresh round-zero `RoundData`.

use crate::machine::CmError;
use crate::particle::{EpochDataParticle, Particle, RoundDataParticle, ValidatorStakeDataParticle};
use crate::reducer::{ReducerState, ValidatorStakeLedger};
use bft_types::{BftNode, ValidatorSet};
use primitive_types::U256;
use std::collections::BTreeMap;

/// Drives one step of the reducer chain. Each call consumes the current
/// `ReducerState` and the particles gathered for that step, and returns the
/// next state. The chain is linear and every step but the last requires
/// `PermissionLevel::System` (enforced by the caller before invoking this).
pub struct EpochUpdateReducer;

impl EpochUpdateReducer {
    pub fn start(current: &ValidatorSet) -> ReducerState {
        let mut ledger = ValidatorStakeLedger::default();
        for (node, power) in current.members() {
            ledger.stake_by_validator.insert(*node, *power);
        }
        ReducerState::RewardingValidators(ledger)
    }

    pub fn apply_rewards(
        state: ReducerState,
        rewards: &BTreeMap<BftNode, U256>,
    ) -> Result<ReducerState, CmError> {
        let mut ledger = match state {
            ReducerState::RewardingValidators(l) => l,
            _ => return Err(CmError::MissingTransitionProcedure),
        };
        for (node, amount) in rewards {
            let entry = ledger.stake_by_validator.entry(*node).or_insert(U256::zero());
            *entry = entry.checked_add(*amount).ok_or(CmError::UnequalInputOutput)?;
        }
        Ok(ReducerState::Unstaking(ledger))
    }

    pub fn apply_unstaking(
        state: ReducerState,
        unstaked: &BTreeMap<BftNode, U256>,
    ) -> Result<ReducerState, CmError> {
        let mut ledger = match state {
            ReducerState::Unstaking(l) => l,
            _ => return Err(CmError::MissingTransitionProcedure),
        };
        for (node, amount) in unstaked {
            let entry = ledger.stake_by_validator.entry(*node).or_insert(U256::zero());
            *entry = entry.checked_sub(*amount).ok_or(CmError::UnequalInputOutput)?;
        }
        Ok(ReducerState::Staking(ledger))
    }

    pub fn apply_staking(
        state: ReducerState,
        staked: &BTreeMap<BftNode, U256>,
    ) -> Result<ReducerState, CmError> {
        let mut ledger = match state {
            ReducerState::Staking(l) => l,
            _ => return Err(CmError::MissingTransitionProcedure),
        };
        for (node, amount) in staked {
            let entry = ledger.stake_by_validator.entry(*node).or_insert(U256::zero());
            *entry = entry.checked_add(*amount).ok_or(CmError::UnequalInputOutput)?;
        }
        Ok(ReducerState::Rake(ledger))
    }

    /// Rake deduction is expressed in basis points out of 10,000.
    pub fn apply_rake(state: ReducerState, rake_bps: &BTreeMap<BftNode, u16>) -> Result<ReducerState, CmError> {
        let mut ledger = match state {
            ReducerState::Rake(l) => l,
            _ => return Err(CmError::MissingTransitionProcedure),
        };
        for (node, bps) in rake_bps {
            if let Some(stake) = ledger.stake_by_validator.get_mut(node) {
                let deduction = *stake * U256::from(*bps) / U256::from(10_000u32);
                *stake = stake.checked_sub(deduction).ok_or(CmError::UnequalInputOutput)?;
            }
        }
        Ok(ReducerState::Owner(ledger))
    }

    pub fn apply_owner_updates(state: ReducerState) -> Result<ReducerState, CmError> {
        match state {
            ReducerState::Owner(ledger) => Ok(ReducerState::Registered(ledger)),
            _ => Err(CmError::MissingTransitionProcedure),
        }
    }

    pub fn apply_registered_updates(
        state: ReducerState,
        deregistered: &[BftNode],
    ) -> Result<ReducerState, CmError> {
        let mut ledger = match state {
            ReducerState::Registered(l) => l,
            _ => return Err(CmError::MissingTransitionProcedure),
        };
        for node in deregistered {
            ledger.stake_by_validator.remove(node);
        }
        Ok(ReducerState::UpdatingValidatorStakes(ledger))
    }

    pub fn write_back_stakes(state: ReducerState) -> Result<(ReducerState, Vec<Particle>), CmError> {
        let ledger = match &state {
            ReducerState::UpdatingValidatorStakes(l) => l.clone(),
            _ => return Err(CmError::MissingTransitionProcedure),
        };
        let particles = ledger
            .stake_by_validator
            .keys()
            .map(|node| {
                Particle::ValidatorStakeData(ValidatorStakeDataParticle {
                    validator: *node.key().as_bytes(),
                    total_stake: ledger.stake_by_validator[node].as_u128(),
                })
            })
            .collect();
        Ok((ReducerState::CreatingNextValidatorSet(ledger), particles))
    }

    pub fn create_next_validator_set(state: ReducerState) -> Result<ReducerState, CmError> {
        let ledger = match state {
            ReducerState::CreatingNextValidatorSet(l) => l,
            _ => return Err(CmError::MissingTransitionProcedure),
        };
        let entries: Vec<(BftNode, U256)> = ledger
            .stake_by_validator
            .into_iter()
            .filter(|(_, power)| !power.is_zero())
            .collect();
        if entries.is_empty() {
            return Err(CmError::UnequalInputOutput);
        }
        let next = ValidatorSet::new(entries);
        Ok(ReducerState::StartingEpochRound(next))
    }

    /// Terminal step: resets `RoundData` to round zero and bumps `EpochData`.
    pub fn finish(state: ReducerState, next_epoch: u64) -> Result<(ValidatorSet, Vec<Particle>), CmError> {
        let validator_set = match state {
            ReducerState::StartingEpochRound(vs) => vs,
            _ => return Err(CmError::MissingTransitionProcedure),
        };
        let particles = vec![
            Particle::RoundData(RoundDataParticle { view: 0 }),
            Particle::EpochData(EpochDataParticle { epoch: next_epoch }),
        ];
        Ok((validator_set, particles))
    }

    /// Drives the full reducer chain in one call: every replica that
    /// observes the same `current` validator set and the same `next_epoch`
    /// computes the same `next_validator_set`, which is what lets the
    /// epoch-update transition be verified independently rather than taken
    /// on the proposer's word. With no reward/unstake/stake/rake deltas fed
    /// in yet (nothing upstream produces those from live transactions in
    /// this core), the chain degenerates to "carry the current stakes
    /// forward unchanged" — still the real reducer, just an identity pass
    /// until a staking transaction type exists to feed it non-empty deltas.
    pub fn run(current: &ValidatorSet, next_epoch: u64) -> Result<(ValidatorSet, Vec<Particle>), CmError> {
        let state = Self::start(current);
        let state = Self::apply_rewards(state, &BTreeMap::new())?;
        let state = Self::apply_unstaking(state, &BTreeMap::new())?;
        let state = Self::apply_staking(state, &BTreeMap::new())?;
        let state = Self::apply_rake(state, &BTreeMap::new())?;
        let state = Self::apply_owner_updates(state)?;
        let state = Self::apply_registered_updates(state, &[])?;
        let (state, mut particles) = Self::write_back_stakes(state)?;
        let state = Self::create_next_validator_set(state)?;
        let (next_validators, final_particles) = Self::finish(state, next_epoch)?;
        particles.extend(final_particles);
        Ok((next_validators, particles))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bft_crypto::BftKeyPair;
    use rand::rngs::OsRng;

    fn sample_validator_set() -> ValidatorSet {
        let mut rng = OsRng;
        let a = BftKeyPair::generate(&mut rng).public();
        let b = BftKeyPair::generate(&mut rng).public();
        ValidatorSet::new(vec![(BftNode(a), U256::from(100u32)), (BftNode(b), U256::from(50u32))])
    }

    #[test]
    fn reducer_chain_runs_end_to_end() {
        let vs = sample_validator_set();
        let state = EpochUpdateReducer::start(&vs);
        let state = EpochUpdateReducer::apply_rewards(state, &BTreeMap::new()).unwrap();
        let state = EpochUpdateReducer::apply_unstaking(state, &BTreeMap::new()).unwrap();
        let state = EpochUpdateReducer::apply_staking(state, &BTreeMap::new()).unwrap();
        let state = EpochUpdateReducer::apply_rake(state, &BTreeMap::new()).unwrap();
        let state = EpochUpdateReducer::apply_owner_updates(state).unwrap();
        let state = EpochUpdateReducer::apply_registered_updates(state, &[]).unwrap();
        let (state, particles) = EpochUpdateReducer::write_back_stakes(state).unwrap();
        assert_eq!(particles.len(), 2);
        let state = EpochUpdateReducer::create_next_validator_set(state).unwrap();
        let (next_vs, final_particles) = EpochUpdateReducer::finish(state, 7).unwrap();
        assert_eq!(next_vs.len(), 2);
        assert_eq!(final_particles.len(), 2);
    }

    #[test]
    fn run_carries_stakes_forward_with_no_deltas() {
        let vs = sample_validator_set();
        let (next_vs, particles) = EpochUpdateReducer::run(&vs, 1).unwrap();
        assert_eq!(next_vs.len(), vs.len());
        for (node, power) in vs.members() {
            assert_eq!(next_vs.power_of(node), Some(*power));
        }
        assert_eq!(particles.len(), vs.len() + 2);
    }

    #[test]
    fn wrong_order_is_rejected() {
        let vs = sample_validator_set();
        let state = EpochUpdateReducer::start(&vs);
        let err = EpochUpdateReducer::apply_staking(state, &BTreeMap::new()).unwrap_err();
        assert_eq!(err, CmError::MissingTransitionProcedure);
    }
}
