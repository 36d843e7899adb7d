//! State sync (spec §4.7): pulls a lagging replica's ledger forward to a
//! peer's committed proof. This is *ledger-level* sync — batches of already
//! ordered commands plus the proof that commits them, spanning however many
//! epoch boundaries lie between `current` and `target` — as opposed to the
//! in-epoch, vertex-level catch-up `bft_consensus::BFTEventProcessor::on_sync_response`
//! handles for a replica that's merely a few views behind its own epoch's tip.

use bft_ledger::{Ledger, LedgerError, LedgerProof};
use bft_types::{BftNode, Command, LedgerHeader};
use std::collections::HashSet;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("sync response state version {got} is not ahead of current {current}")]
    NotAhead { current: u64, got: u64 },
    #[error("no sync is in progress")]
    NotSyncing,
}

#[derive(Clone, Copy, Debug)]
pub struct SyncConfig {
    pub patience_ms: u64,
    pub batch_size: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self { patience_ms: 5_000, batch_size: 256 }
    }
}

/// An outbound `SyncRequest` the caller (the dispatcher) should send.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncRequestAction {
    pub to: BftNode,
    pub state_version: u64,
    pub batch_size: u32,
}

/// Tracks `current` (the last committed header) and `target` (the highest
/// header this replica has observed, possibly from a peer further ahead) and
/// drives the request/timeout/response cycle that closes the gap between
/// them (spec §4.7).
pub struct SyncService {
    config: SyncConfig,
    current: LedgerHeader,
    target: Option<LedgerHeader>,
    in_flight_peer: Option<BftNode>,
    candidates_tried: HashSet<BftNode>,
}

impl SyncService {
    pub fn new(config: SyncConfig, current: LedgerHeader) -> Self {
        Self {
            config,
            current,
            target: None,
            in_flight_peer: None,
            candidates_tried: HashSet::new(),
        }
    }

    pub fn current(&self) -> &LedgerHeader {
        &self.current
    }

    pub fn target(&self) -> Option<&LedgerHeader> {
        self.target.as_ref()
    }

    pub fn is_syncing(&self) -> bool {
        self.target.is_some()
    }

    pub fn patience_ms(&self) -> u64 {
        self.config.patience_ms
    }

    /// A header claimed to be ahead was observed (e.g. in a peer's proposal
    /// or proof). If it's actually ahead of both `current` and any
    /// in-progress `target`, adopt it as the new target and request a batch
    /// from a freshly-chosen candidate.
    pub fn on_local_sync_request(&mut self, observed: LedgerHeader, candidates: &[BftNode]) -> Option<SyncRequestAction> {
        let ahead_of_current = observed.state_version > self.current.state_version;
        let ahead_of_target = match &self.target {
            Some(t) => observed.state_version > t.state_version,
            None => true,
        };
        if !ahead_of_current || !ahead_of_target {
            return None;
        }
        info!(state_version = observed.state_version, "sync target adopted");
        self.target = Some(observed);
        self.candidates_tried.clear();
        self.request_from(candidates)
    }

    /// Picks the first candidate not yet tried this sync attempt (falling
    /// back to the first candidate overall once every candidate has been
    /// tried), records it as in-flight, and returns the request to send.
    fn request_from(&mut self, candidates: &[BftNode]) -> Option<SyncRequestAction> {
        if candidates.is_empty() {
            warn!("no sync candidates available");
            return None;
        }
        let peer = candidates
            .iter()
            .find(|c| !self.candidates_tried.contains(*c))
            .or_else(|| candidates.first())
            .copied()?;
        self.candidates_tried.insert(peer);
        self.in_flight_peer = Some(peer);
        Some(SyncRequestAction { to: peer, state_version: self.current.state_version, batch_size: self.config.batch_size })
    }

    /// A batch of commands plus the peer's signed proof arrived. Applies them
    /// via `Ledger::commit_commands` and advances `current`; clears `target`
    /// once it's been reached.
    pub fn on_sync_response(&mut self, commands: Vec<Command>, proof: LedgerProof, ledger: &mut Ledger) -> Result<(), SyncError> {
        if proof.header.state_version <= self.current.state_version {
            return Err(SyncError::NotAhead { current: self.current.state_version, got: proof.header.state_version });
        }
        ledger.commit_commands(commands, proof.header.clone(), proof.signatures.clone())?;
        self.current = proof.header;
        self.in_flight_peer = None;
        debug!(state_version = self.current.state_version, "sync batch applied");
        self.maybe_clear_target();
        Ok(())
    }

    /// The in-flight request's patience timer fired with no response: resend
    /// to a different candidate, excluding the peer that just went quiet.
    pub fn on_sync_timeout(&mut self, candidates: &[BftNode]) -> Result<Option<SyncRequestAction>, SyncError> {
        if self.target.is_none() {
            return Err(SyncError::NotSyncing);
        }
        warn!(peer = ?self.in_flight_peer, "sync request timed out, retrying");
        Ok(self.request_from(candidates))
    }

    /// The ledger advanced through the normal consensus commit path (not
    /// sync) — keep `current` in step so a sync attempt doesn't re-request
    /// versions already applied.
    pub fn on_version_update(&mut self, header: LedgerHeader) {
        if header.state_version > self.current.state_version {
            self.current = header;
            self.maybe_clear_target();
        }
    }

    fn maybe_clear_target(&mut self) {
        if let Some(t) = &self.target {
            if self.current.state_version >= t.state_version {
                self.target = None;
                self.candidates_tried.clear();
                self.in_flight_peer = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bft_constraint_machine::{Substate, SubstateId, SubstateTypeId};
    use bft_crypto::{double_sha256, AggregateSignature, BftKeyPair};
    use bft_storage::SledEngineStore;
    use rand::rngs::OsRng;

    fn node() -> BftNode {
        let mut rng = OsRng;
        BftNode(BftKeyPair::generate(&mut rng).public())
    }

    fn up_command(kp: &BftKeyPair) -> Command {
        use bft_constraint_machine::REInstruction;
        let substate = Substate { type_id: SubstateTypeId::Tokens, body: vec![0u8; 48] };
        let body = vec![REInstruction::Up(substate), REInstruction::End];
        let unsigned = REInstruction::encode_stream(&body);
        let digest = double_sha256(&unsigned);
        let sig = kp.sign(&digest);
        let mut sig_bytes = [0u8; 65];
        sig_bytes[..64].copy_from_slice(sig.as_bytes());
        let mut full = body;
        full.push(REInstruction::Sig(sig_bytes));
        Command::new(REInstruction::encode_stream(&full))
    }

    #[test]
    fn local_sync_request_adopts_ahead_target_and_picks_a_candidate() {
        let mut svc = SyncService::new(SyncConfig::default(), LedgerHeader::genesis());
        let peer = node();
        let ahead = LedgerHeader { state_version: 5, ..LedgerHeader::genesis() };
        let action = svc.on_local_sync_request(ahead, &[peer]).unwrap();
        assert_eq!(action.to, peer);
        assert_eq!(action.state_version, 0);
        assert!(svc.is_syncing());
    }

    #[test]
    fn local_sync_request_ignores_headers_not_ahead() {
        let mut svc = SyncService::new(SyncConfig::default(), LedgerHeader::genesis());
        let peer = node();
        assert!(svc.on_local_sync_request(LedgerHeader::genesis(), &[peer]).is_none());
    }

    #[test]
    fn sync_response_applies_commands_and_advances_current() {
        let mut svc = SyncService::new(SyncConfig::default(), LedgerHeader::genesis());
        let dir = tempfile::tempdir().unwrap();
        let store = SledEngineStore::open(dir.path()).unwrap();
        let mut ledger = Ledger::new(Box::new(store), LedgerHeader::genesis());

        let mut rng = OsRng;
        let kp = BftKeyPair::generate(&mut rng);
        let command = up_command(&kp);
        let final_header = LedgerHeader { state_version: 1, ..LedgerHeader::genesis() };
        let proof = LedgerProof { header: final_header.clone(), signatures: AggregateSignature::new() };

        svc.on_sync_response(vec![command.clone()], proof, &mut ledger).unwrap();
        assert_eq!(svc.current().state_version, 1);
        let key = SubstateId::Txn(command.id(), 0).store_key();
        assert!(ledger.store().load_up_particle(&key).unwrap().is_some());
    }

    #[test]
    fn sync_response_rejects_a_header_not_ahead_of_current() {
        let mut svc = SyncService::new(SyncConfig::default(), LedgerHeader::genesis());
        let dir = tempfile::tempdir().unwrap();
        let store = SledEngineStore::open(dir.path()).unwrap();
        let mut ledger = Ledger::new(Box::new(store), LedgerHeader::genesis());
        let proof = LedgerProof { header: LedgerHeader::genesis(), signatures: AggregateSignature::new() };
        let err = svc.on_sync_response(vec![], proof, &mut ledger).unwrap_err();
        assert!(matches!(err, SyncError::NotAhead { .. }));
    }

    #[test]
    fn timeout_retries_a_different_candidate() {
        let mut svc = SyncService::new(SyncConfig::default(), LedgerHeader::genesis());
        let a = node();
        let b = node();
        let ahead = LedgerHeader { state_version: 5, ..LedgerHeader::genesis() };
        let first = svc.on_local_sync_request(ahead, &[a, b]).unwrap();
        let second = svc.on_sync_timeout(&[a, b]).unwrap().unwrap();
        assert_ne!(first.to, second.to);
    }

    #[test]
    fn timeout_without_a_sync_in_progress_errors() {
        let mut svc = SyncService::new(SyncConfig::default(), LedgerHeader::genesis());
        assert!(matches!(svc.on_sync_timeout(&[node()]), Err(SyncError::NotSyncing)));
    }

    #[test]
    fn local_commit_clears_a_reached_target() {
        let mut svc = SyncService::new(SyncConfig::default(), LedgerHeader::genesis());
        let peer = node();
        let ahead = LedgerHeader { state_version: 3, ..LedgerHeader::genesis() };
        svc.on_local_sync_request(ahead, &[peer]).unwrap();
        svc.on_version_update(LedgerHeader { state_version: 3, ..LedgerHeader::genesis() });
        assert!(!svc.is_syncing());
    }
}
