//! Commitment of the ordered command stream into ledger state (spec §4.4):
//! `prepare` runs a vertex's command against a preview of everything already
//! committed, without touching disk; `commit` makes one already-prepared
//! chain of vertices permanent and advances the accumulator.

use bft_constraint_machine::{CmError, ConstraintMachine, InstructionCodecError, PermissionLevel, REInstruction, SubstateId, TransactionCMStore};
use bft_crypto::{sha256, AggregateSignature};
use bft_types::{Command, LedgerHeader, TxnId, ValidatorSet, Vertex};
use bft_storage::{EngineStore, StorageError};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("instruction stream codec error: {0}")]
    Codec(#[from] InstructionCodecError),
    #[error("constraint machine rejected the command: {0}")]
    ConstraintMachine(#[from] CmError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Fixed validator-set change a vertex effects when it lands on an epoch
/// boundary. Computed by the caller (the epoch manager, spec §4.6) and
/// threaded into `prepare`/`commit` so this crate stays ignorant of the
/// fork-registry and reward-distribution policy that produces it.
#[derive(Clone, Debug)]
pub struct EpochTransition {
    pub next_validator_set: ValidatorSet,
}

/// `{ header, signatures }` — the proof a replica can hand to a peer (or a
/// light client) to show a given `LedgerHeader` is committed (spec §4.4).
/// Mirrors `bft_types::wire::LedgerProofMsg` on the wire; kept distinct so
/// this crate is the source of truth in-process.
#[derive(Clone, Debug)]
pub struct LedgerProof {
    pub header: LedgerHeader,
    pub signatures: AggregateSignature,
}

pub struct Ledger {
    store: Box<dyn EngineStore>,
    last_header: LedgerHeader,
    last_proof_signatures: AggregateSignature,
}

impl Ledger {
    pub fn new(store: Box<dyn EngineStore>, genesis_header: LedgerHeader) -> Self {
        Self {
            store,
            last_header: genesis_header,
            last_proof_signatures: AggregateSignature::new(),
        }
    }

    pub fn header(&self) -> &LedgerHeader {
        &self.last_header
    }

    pub fn proof(&self) -> LedgerProof {
        LedgerProof { header: self.last_header.clone(), signatures: self.last_proof_signatures.clone() }
    }

    /// The backing engine store, for components (the fork registry, the sync
    /// service) that need to read substates directly rather than through a
    /// constraint-machine pass.
    pub fn store(&self) -> &dyn EngineStore {
        self.store.as_ref()
    }

    /// Runs `vertex`'s command against a preview of everything committed so
    /// far under `parent`, without mutating the store (the transaction is
    /// always aborted at the end). Returns the `LedgerHeader` this vertex
    /// would produce if committed.
    pub fn prepare(
        &self,
        parent: &LedgerHeader,
        vertex: &Vertex,
        epoch_transition: Option<EpochTransition>,
    ) -> Result<LedgerHeader, LedgerError> {
        let mut txn = self.store.begin_transaction();
        let mut cm_store = TransactionCMStore::new(&mut *txn);

        let mut state_version = parent.state_version;
        let mut accumulator_hash = parent.accumulator_hash;

        if let Some(command) = &vertex.command {
            let instructions = REInstruction::decode_stream(command.bytes())?;
            let verified = ConstraintMachine::verify(
                &instructions,
                *vertex.proposer.key(),
                PermissionLevel::User,
                &mut cm_store,
            )?;
            debug!(txn_id = ?command.id(), ups = verified.ups.len(), "prepared command against preview state");
            state_version += 1;
            accumulator_hash = chain_accumulator(&accumulator_hash, command.id());
        }
        txn.abort();

        let (is_end_of_epoch, next_validator_set) = match epoch_transition {
            Some(t) => (true, Some(t.next_validator_set)),
            None => (false, None),
        };

        Ok(LedgerHeader {
            epoch: parent.epoch,
            view: vertex.view,
            state_version,
            accumulator_hash,
            is_end_of_epoch,
            next_validator_set,
            timestamp: parent.timestamp,
        })
    }

    /// Applies every vertex in `chain` (oldest first, as returned by
    /// `VertexStore::commit`) permanently, then advances the ledger's
    /// checkpoint to `final_header`/`signatures`.
    pub fn commit(
        &mut self,
        chain: &[Vertex],
        final_header: LedgerHeader,
        signatures: AggregateSignature,
    ) -> Result<LedgerProof, LedgerError> {
        for vertex in chain {
            if let Some(command) = &vertex.command {
                let mut txn = self.store.begin_transaction();
                let mut cm_store = TransactionCMStore::new(&mut *txn);
                let instructions = REInstruction::decode_stream(command.bytes())?;
                let verified = ConstraintMachine::verify(&instructions, *vertex.proposer.key(), PermissionLevel::User, &mut cm_store)?;
                for (idx, substate) in verified.ups {
                    cm_store.spin_up(SubstateId::Txn(command.id(), idx), substate);
                }
                txn.commit()?;
            }
        }
        self.last_header = final_header;
        self.last_proof_signatures = signatures;
        info!(state_version = self.last_header.state_version, epoch = ?self.last_header.epoch, "ledger advanced");
        Ok(self.proof())
    }

    /// Applies a batch of already-ordered commands directly against the
    /// store (spec §4.7 sync path): there is no justifying vertex chain for
    /// the epochs being skipped, only a peer's quorum-signed ledger proof, so
    /// this replays each command's substate spins via
    /// `ConstraintMachine::apply_spins` rather than a full `verify` (there is
    /// no per-command signer available off the wire to re-check against —
    /// the proof's aggregate signature is the authorization here, not a
    /// per-instruction `SIG`; see DESIGN.md).
    pub fn commit_commands(
        &mut self,
        commands: Vec<Command>,
        final_header: LedgerHeader,
        signatures: AggregateSignature,
    ) -> Result<LedgerProof, LedgerError> {
        for command in &commands {
            let mut txn = self.store.begin_transaction();
            let mut cm_store = TransactionCMStore::new(&mut *txn);
            let instructions = REInstruction::decode_stream(command.bytes())?;
            ConstraintMachine::apply_spins(command.id(), &instructions, &mut cm_store)?;
            txn.commit()?;
        }
        self.last_header = final_header;
        self.last_proof_signatures = signatures;
        info!(state_version = self.last_header.state_version, "ledger advanced via sync batch");
        Ok(self.proof())
    }
}

/// `H(prev_accumulator || cmd_id)` (spec I3) — single SHA-256, not double
/// (see DESIGN.md).
fn chain_accumulator(prev: &[u8; 32], cmd_id: TxnId) -> [u8; 32] {
    let mut buf = Vec::with_capacity(64);
    buf.extend_from_slice(prev);
    buf.extend_from_slice(&cmd_id.0);
    sha256(&buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bft_constraint_machine::{Substate, SubstateId, SubstateTypeId};
    use bft_crypto::{double_sha256, BftKeyPair};
    use bft_storage::SledEngineStore;
    use bft_types::{BftNode, Command, QuorumCertificate, View};
    use rand::rngs::OsRng;

    fn tokens_substate(owner: [u8; 32], amount: u128) -> Substate {
        Substate {
            type_id: SubstateTypeId::Tokens,
            body: {
                let mut b = vec![0u8; 32];
                b.extend_from_slice(&owner);
                b.extend_from_slice(&amount.to_be_bytes());
                b
            },
        }
    }

    fn sign_stream(kp: &BftKeyPair, body: Vec<REInstruction>) -> Vec<u8> {
        let unsigned = REInstruction::encode_stream(&body);
        let digest = double_sha256(&unsigned);
        let sig = kp.sign(&digest);
        let mut sig_bytes = [0u8; 65];
        sig_bytes[..64].copy_from_slice(sig.as_bytes());
        let mut full = body;
        full.push(REInstruction::Sig(sig_bytes));
        REInstruction::encode_stream(&full)
    }

    /// Seeds `substate_id` with an UP'd tokens substate before handing the
    /// store to a `Ledger`, so a later `DOWN` + `UP` transfer is a legal
    /// transition procedure (`Tokens -> Tokens`, `PermissionLevel::User`).
    fn seed_store(store: &SledEngineStore, substate_id: SubstateId, substate: &Substate) {
        let mut txn = store.begin_transaction();
        txn.put(substate_id.store_key(), substate.encode());
        txn.commit().unwrap();
    }

    fn transfer_command(kp: &BftKeyPair, substate_id: SubstateId, amount: u128) -> Command {
        let body = vec![
            REInstruction::Down(substate_id),
            REInstruction::Up(tokens_substate([3; 32], amount)),
            REInstruction::End,
        ];
        Command::new(sign_stream(kp, body))
    }

    #[test]
    fn prepare_does_not_mutate_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledEngineStore::open(dir.path()).unwrap();
        let substate_id = SubstateId::Txn(bft_types::TxnId([1u8; 32]), 0);
        seed_store(&store, substate_id, &tokens_substate([1; 32], 10));

        let kp = BftKeyPair::generate(&mut OsRng);
        let proposer = BftNode(kp.public());
        let command = transfer_command(&kp, substate_id, 10);

        let ledger = Ledger::new(Box::new(store), LedgerHeader::genesis());
        let qc = QuorumCertificate::genesis(bft_types::BftHeader::genesis());
        let vertex = Vertex::new(qc, View(1), Some(command), proposer, bft_types::VertexId([0; 32]));

        let header = ledger.prepare(&LedgerHeader::genesis(), &vertex, None).unwrap();
        assert_eq!(header.state_version, 1);
    }

    #[test]
    fn commit_applies_prior_prepare_deterministically() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledEngineStore::open(dir.path()).unwrap();
        let substate_id = SubstateId::Txn(bft_types::TxnId([2u8; 32]), 0);
        seed_store(&store, substate_id, &tokens_substate([2; 32], 20));

        let kp = BftKeyPair::generate(&mut OsRng);
        let proposer = BftNode(kp.public());
        let command = transfer_command(&kp, substate_id, 20);

        let mut ledger = Ledger::new(Box::new(store), LedgerHeader::genesis());
        let qc = QuorumCertificate::genesis(bft_types::BftHeader::genesis());
        let vertex = Vertex::new(qc, View(1), Some(command), proposer, bft_types::VertexId([0; 32]));

        let parent = LedgerHeader::genesis();
        let prepared = ledger.prepare(&parent, &vertex, None).unwrap();
        let proof = ledger.commit(&[vertex], prepared.clone(), AggregateSignature::new()).unwrap();
        assert_eq!(proof.header.state_version, 1);
        assert_eq!(ledger.header().state_version, 1);
    }

    #[test]
    fn down_of_missing_substate_is_rejected_at_commit() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledEngineStore::open(dir.path()).unwrap();
        let mut ledger = Ledger::new(Box::new(store), LedgerHeader::genesis());

        let kp = BftKeyPair::generate(&mut OsRng);
        let proposer = BftNode(kp.public());
        let missing = SubstateId::Txn(bft_types::TxnId([9u8; 32]), 0);
        let command = transfer_command(&kp, missing, 5);

        let qc = QuorumCertificate::genesis(bft_types::BftHeader::genesis());
        let vertex = Vertex::new(qc, View(1), Some(command), proposer, bft_types::VertexId([0; 32]));

        let err = ledger.commit(&[vertex], LedgerHeader::genesis(), AggregateSignature::new()).unwrap_err();
        assert!(matches!(err, LedgerError::ConstraintMachine(CmError::SpinConflict)));
    }
}
