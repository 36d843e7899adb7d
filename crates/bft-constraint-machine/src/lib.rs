//! The constraint machine: deterministic, substate-level validation of a
//! single transaction's instruction stream (spec §4.5-§4.6). No particle
//! moves without a matching transition procedure and sufficient permission;
//! no substate comes up or down twice.

pub mod epoch_update;
pub mod instruction;
pub mod machine;
pub mod particle;
pub mod permission;
pub mod reducer;
pub mod store;
pub mod substate;

pub use epoch_update::EpochUpdateReducer;
pub use instruction::{InstructionCodecError, REInstruction};
pub use machine::{CmError, ConstraintMachine, VerifiedTransaction};
pub use particle::Particle;
pub use permission::PermissionLevel;
pub use reducer::{ReducerState, ValidatorStakeLedger};
pub use store::{CMStore, CMStoreError, TransactionCMStore};
pub use substate::{Substate, SubstateCodecError, SubstateId, SubstateTypeId};
