//! Reducer state chain for the epoch-update transaction (spec §4.6). A
//! plain token transfer needs no reducer at all; the epoch-update
//! transaction threads a single value through a fixed sequence of named
//! states, each produced and consumed by exactly one transition procedure.

use bft_types::{BftNode, ValidatorSet};
use primitive_types::U256;
use std::collections::BTreeMap;

/// Per-validator bookkeeping accumulated while folding the validator set for
/// the next epoch.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValidatorStakeLedger {
    pub stake_by_validator: BTreeMap<BftNode, U256>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReducerState {
    /// No reducer needed: a plain transfer or a single-particle update.
    None,
    /// Distributing block rewards to validators proportional to power.
    RewardingValidators(ValidatorStakeLedger),
    /// Moving matured unstaking requests back into liquid tokens.
    Unstaking(ValidatorStakeLedger),
    /// Folding new stake deposits into validator stake data.
    Staking(ValidatorStakeLedger),
    /// Deducting the validator's configured rake (fee) from rewards.
    Rake(ValidatorStakeLedger),
    /// Applying pending owner-address changes.
    Owner(ValidatorStakeLedger),
    /// Applying pending registered/unregistered flag changes.
    Registered(ValidatorStakeLedger),
    /// Writing back the updated `ValidatorStakeData` substates.
    UpdatingValidatorStakes(ValidatorStakeLedger),
    /// Building the next epoch's `ValidatorSet` from accumulated stakes.
    CreatingNextValidatorSet(ValidatorStakeLedger),
    /// Final state: next validator set is fixed, round data resets to 0.
    StartingEpochRound(ValidatorSet),
}

impl ReducerState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ReducerState::None | ReducerState::StartingEpochRound(_))
    }
}
