//! The constraint machine itself (spec §4.5): validates one transaction's
//! instruction stream in two passes. The stateless pass only looks at the
//! stream's shape; the stateful pass walks it against the store, threading
//! local UP particles, remote spin checks and the reducer state chain.

use crate::instruction::REInstruction;
use crate::permission::PermissionLevel;
use crate::store::{CMStore, CMStoreError};
use crate::substate::{Substate, SubstateId, SubstateTypeId};
use bft_crypto::{double_sha256, verify, BftPublicKey, BftSignature, CryptoError};
use bft_types::TxnId;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CmError {
    #[error("substate spin conflict: already down, or down of a substate never up")]
    SpinConflict,
    #[error("no transition procedure registered for this input/output/reducer combination")]
    MissingTransitionProcedure,
    #[error("signer's permission level does not satisfy the transition procedure's requirement")]
    InvalidExecutionPermission,
    #[error("signature does not verify over the instruction stream digest")]
    IncorrectSignature,
    #[error("local instruction index does not reference a live local UP")]
    LocalNonexistent,
    #[error("remote substate read failed: not present in the store")]
    ReadFailure,
    #[error("unrecognised instruction shape")]
    UnknownOp,
    #[error("instruction stream has unequal local UP and local DOWN counts for a grouped update")]
    UnequalInputOutput,
}

impl From<CMStoreError> for CmError {
    fn from(_: CMStoreError) -> Self {
        CmError::ReadFailure
    }
}

/// `(inputType, outputType)` -> minimum permission level. `None` stands for
/// "no particle of that side" (pure creation or pure destruction).
fn transition_procedure(
    input: Option<SubstateTypeId>,
    output: Option<SubstateTypeId>,
) -> Option<PermissionLevel> {
    use SubstateTypeId::*;
    match (input, output) {
        // Plain transfer: tokens down, tokens up.
        (Some(Tokens), Some(Tokens)) => Some(PermissionLevel::User),
        // Staking: tokens down, prepared-stake up.
        (Some(Tokens), Some(PreparedStake)) => Some(PermissionLevel::User),
        // Unstaking request: prepared/validator stake down, exitting-stake up.
        (Some(PreparedStake), Some(ExittingStake)) => Some(PermissionLevel::User),
        (Some(ValidatorStakeData), Some(ExittingStake)) => Some(PermissionLevel::User),
        // Exit matured, tokens return to the owner.
        (Some(ExittingStake), Some(Tokens)) => Some(PermissionLevel::User),
        // Validator self-registration / owner / metadata updates.
        (Some(ValidatorRegisteredCopy), Some(ValidatorRegisteredCopy)) => Some(PermissionLevel::User),
        (Some(ValidatorOwnerCopy), Some(ValidatorOwnerCopy)) => Some(PermissionLevel::User),
        (Some(ValidatorSystemMetadata), Some(ValidatorSystemMetadata)) => Some(PermissionLevel::User),
        // Round/epoch data and validator bookkeeping only move under system authority.
        (Some(RoundData), Some(RoundData)) => Some(PermissionLevel::System),
        (Some(EpochData), Some(EpochData)) => Some(PermissionLevel::System),
        (Some(ValidatorBftData), Some(ValidatorBftData)) => Some(PermissionLevel::System),
        (Some(ValidatorStakeData), Some(ValidatorStakeData)) => Some(PermissionLevel::System),
        (Some(PreparedStake), Some(ValidatorStakeData)) => Some(PermissionLevel::System),
        // Pure creation (genesis mint, virtual round/epoch bootstrapping).
        (None, Some(Tokens)) => Some(PermissionLevel::System),
        (None, Some(RoundData)) => Some(PermissionLevel::System),
        (None, Some(EpochData)) => Some(PermissionLevel::System),
        _ => None,
    }
}

#[derive(Default)]
struct LocalUp {
    substate: Substate,
    consumed: bool,
}

/// Result of a successful `verify`: the net particle movement, useful to the
/// caller (e.g. the ledger) for bookkeeping without re-parsing the stream.
pub struct VerifiedTransaction {
    pub signer: BftPublicKey,
    pub ups: Vec<(u32, Substate)>,
    pub has_message: bool,
}

pub struct ConstraintMachine;

impl ConstraintMachine {
    /// Verifies `instructions` was authored by `signer` at `permission`
    /// against `store`, applying every UP/DOWN it contains as a side effect
    /// once the whole stream checks out. On any error, the store is left
    /// untouched by the caller discarding the transaction (no partial
    /// application: this function itself does not roll back writes already
    /// issued to `store`, so callers must run it against a store they are
    /// prepared to discard on error, e.g. a transaction not yet committed).
    pub fn verify(
        instructions: &[REInstruction],
        signer: BftPublicKey,
        permission: PermissionLevel,
        store: &mut dyn CMStore,
    ) -> Result<VerifiedTransaction, CmError> {
        Self::check_shape(instructions)?;

        let body = &instructions[..instructions.len() - 2]; // drop END, SIG
        let end_and_before = &instructions[..instructions.len() - 1]; // drop SIG only

        let mut locals: Vec<LocalUp> = Vec::new();
        let mut has_message = false;
        let mut input_types: Vec<SubstateTypeId> = Vec::new();
        let mut output_types: Vec<SubstateTypeId> = Vec::new();
        let mut ups_out: Vec<(u32, Substate)> = Vec::new();

        for instr in body {
            match instr {
                REInstruction::Up(substate) => {
                    output_types.push(substate.type_id);
                    let idx = locals.len() as u32;
                    ups_out.push((idx, substate.clone()));
                    locals.push(LocalUp { substate: substate.clone(), consumed: false });
                }
                REInstruction::VirtualDown(substate) => {
                    let hash = substate.canonical_hash();
                    if store.is_virtual_down(&hash)? {
                        return Err(CmError::SpinConflict);
                    }
                    input_types.push(substate.type_id);
                    store.spin_virtual_down(hash);
                }
                REInstruction::Down(id) => {
                    if store.is_down(id)? {
                        return Err(CmError::SpinConflict);
                    }
                    let substate = store.get_up_substate(id)?.ok_or(CmError::SpinConflict)?;
                    input_types.push(substate.type_id);
                    store.spin_down(id);
                }
                REInstruction::LocalDown(idx) => {
                    let entry = locals.get_mut(*idx as usize).ok_or(CmError::LocalNonexistent)?;
                    if entry.consumed {
                        return Err(CmError::LocalNonexistent);
                    }
                    input_types.push(entry.substate.type_id);
                    entry.consumed = true;
                    ups_out.retain(|(i, _)| i != idx);
                }
                REInstruction::Read(id) => {
                    store.get_up_substate(id)?.ok_or(CmError::ReadFailure)?;
                }
                REInstruction::LocalRead(idx) => {
                    let entry = locals.get(*idx as usize).ok_or(CmError::LocalNonexistent)?;
                    if entry.consumed {
                        return Err(CmError::LocalNonexistent);
                    }
                }
                REInstruction::Msg(_) => {
                    if has_message {
                        return Err(CmError::UnknownOp);
                    }
                    has_message = true;
                }
                REInstruction::End | REInstruction::Sig(_) => unreachable!("stripped above"),
            }
        }

        Self::authorize(&input_types, &output_types, permission)?;

        let sig = match instructions.last() {
            Some(REInstruction::Sig(bytes)) => bytes,
            _ => return Err(CmError::UnknownOp),
        };
        let digest = digest_over(end_and_before);
        let signature = BftSignature::from_bytes(sig[..64].try_into().unwrap());
        verify(&signer, &digest, &signature).map_err(|e| match e {
            CryptoError::InvalidSignature | CryptoError::MalformedSignature => CmError::IncorrectSignature,
            CryptoError::MalformedPublicKey => CmError::IncorrectSignature,
        })?;

        Ok(VerifiedTransaction { signer, ups: ups_out, has_message })
    }

    /// Replays `instructions`' substate spins against `store` without
    /// authorization or signature checks. Used only for commands arriving
    /// through the ledger-level sync path, where there is no per-instruction
    /// `SIG` to recheck against a signer: the peer's quorum-signed
    /// `LedgerProof` is the authorization the whole batch rests on, not a
    /// fresh per-command walk of `authorize`. `txn_id` addresses the UPs this
    /// command produces the same way a freshly-verified one would.
    pub fn apply_spins(txn_id: TxnId, instructions: &[REInstruction], store: &mut dyn CMStore) -> Result<(), CmError> {
        let body = match instructions.last() {
            Some(REInstruction::Sig(_)) => &instructions[..instructions.len() - 1],
            _ => instructions,
        };
        let body = match body.last() {
            Some(REInstruction::End) => &body[..body.len() - 1],
            _ => body,
        };

        let mut next_local: u32 = 0;
        for instr in body {
            match instr {
                REInstruction::Up(substate) => {
                    store.spin_up(SubstateId::Txn(txn_id, next_local), substate.clone());
                    next_local += 1;
                }
                REInstruction::VirtualDown(substate) => {
                    let hash = substate.canonical_hash();
                    if store.is_virtual_down(&hash)? {
                        return Err(CmError::SpinConflict);
                    }
                    store.spin_virtual_down(hash);
                }
                REInstruction::Down(id) => {
                    if store.is_down(id)? {
                        return Err(CmError::SpinConflict);
                    }
                    store.get_up_substate(id)?.ok_or(CmError::SpinConflict)?;
                    store.spin_down(id);
                }
                REInstruction::LocalDown(_) | REInstruction::Read(_) | REInstruction::LocalRead(_) | REInstruction::Msg(_) => {}
                REInstruction::End | REInstruction::Sig(_) => {}
            }
        }
        Ok(())
    }

    fn check_shape(instructions: &[REInstruction]) -> Result<(), CmError> {
        if instructions.len() < 2 {
            return Err(CmError::UnknownOp);
        }
        let n = instructions.len();
        if !matches!(instructions[n - 1], REInstruction::Sig(_)) {
            return Err(CmError::UnknownOp);
        }
        if !matches!(instructions[n - 2], REInstruction::End) {
            return Err(CmError::UnknownOp);
        }
        for instr in &instructions[..n - 2] {
            if matches!(instr, REInstruction::End | REInstruction::Sig(_)) {
                return Err(CmError::UnknownOp);
            }
        }
        Ok(())
    }

    fn authorize(
        input_types: &[SubstateTypeId],
        output_types: &[SubstateTypeId],
        permission: PermissionLevel,
    ) -> Result<(), CmError> {
        if input_types.is_empty() && output_types.is_empty() {
            return Ok(());
        }
        let input = input_types.first().copied();
        let output = output_types.first().copied();
        if input_types.len() > 1 || output_types.len() > 1 {
            // Multi-particle groups (e.g. epoch update) always run at system
            // authority; fine-grained per-pair checks happen inside the
            // epoch-update reducer chain itself.
            return if permission.satisfies(PermissionLevel::System) {
                Ok(())
            } else {
                Err(CmError::InvalidExecutionPermission)
            };
        }
        let required = transition_procedure(input, output).ok_or(CmError::MissingTransitionProcedure)?;
        if !permission.satisfies(required) {
            return Err(CmError::InvalidExecutionPermission);
        }
        Ok(())
    }
}

fn digest_over(instructions: &[REInstruction]) -> [u8; 32] {
    double_sha256(&REInstruction::encode_stream(instructions))
}
