//! The pacemaker: view progression and leader election (spec §4.1).
//!
//! Liveness after GST comes from two properties this module provides: an
//! exponential-backoff timeout schedule that eventually outlasts network
//! delay, and a leader-election rule every honest node computes identically
//! so there is never disagreement about who may propose at a view.

use bft_crypto::double_sha256;
use bft_types::{BftNode, QuorumCertificate, TimeoutCertificate, ValidatorSet, View};
use primitive_types::U256;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Clone, Copy, Debug)]
pub struct TimeoutConfig {
    pub base_ms: u64,
    pub rate: f64,
    pub max_exp: u32,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { base_ms: 3000, rate: 1.1, max_exp: 0 }
    }
}

impl TimeoutConfig {
    /// `timeout(n) = base_ms * rate^min(n, max_exp)`.
    pub fn duration(&self, consecutive_timeouts: u32) -> Duration {
        let exp = consecutive_timeouts.min(self.max_exp);
        let millis = (self.base_ms as f64) * self.rate.powi(exp as i32);
        Duration::from_millis(millis.round() as u64)
    }
}

/// A timeout vote the caller should broadcast, carrying the node's
/// highest-known QC (spec §4.1/§4.3).
#[derive(Debug, Clone)]
pub struct TimeoutEvent {
    pub view: View,
    pub high_qc: QuorumCertificate,
}

pub struct Pacemaker {
    epoch: bft_types::Epoch,
    current_view: View,
    consecutive_timeouts: u32,
    config: TimeoutConfig,
}

impl Pacemaker {
    pub fn new(epoch: bft_types::Epoch, start_view: View, config: TimeoutConfig) -> Self {
        Self {
            epoch,
            current_view: start_view,
            consecutive_timeouts: 0,
            config,
        }
    }

    pub fn current_view(&self) -> View {
        self.current_view
    }

    pub fn timeout_duration(&self) -> Duration {
        self.config.duration(self.consecutive_timeouts)
    }

    /// Called on epoch boundary: resets the view clock and timeout counter
    /// for the new validator set / epoch.
    pub fn start_epoch(&mut self, epoch: bft_types::Epoch, start_view: View) {
        self.epoch = epoch;
        self.current_view = start_view;
        self.consecutive_timeouts = 0;
    }

    /// A view timer fired. `None` if it is stale (the view already moved
    /// on) — callers must tag every scheduled timer with the view it was
    /// armed for and drop firings whose tag no longer matches (spec §5).
    pub fn on_view_timeout(&mut self, fired_for_view: View, high_qc: QuorumCertificate) -> Option<TimeoutEvent> {
        if fired_for_view != self.current_view {
            debug!(?fired_for_view, current = ?self.current_view, "dropping stale timeout firing");
            return None;
        }
        self.consecutive_timeouts += 1;
        info!(view = ?self.current_view, n = self.consecutive_timeouts, "view timed out");
        Some(TimeoutEvent { view: self.current_view, high_qc })
    }

    /// A QC formed or was observed with `view >= current_view`: advance and
    /// reset the timeout backoff (spec §4.1).
    pub fn process_qc(&mut self, qc: &QuorumCertificate) -> bool {
        if qc.view() >= self.current_view {
            self.advance_to(qc.view().next());
            self.consecutive_timeouts = 0;
            true
        } else {
            false
        }
    }

    /// A TC formed or was observed with `view >= current_view`: advance, but
    /// do NOT reset the backoff counter — a TC means the view *failed*, so
    /// the next view inherits one more step of backoff (only a QC, i.e. a
    /// successful round, resets it per spec §4.1: "On successful QC, n
    /// resets to 0").
    pub fn process_tc(&mut self, tc: &TimeoutCertificate) -> bool {
        if tc.view >= self.current_view {
            self.advance_to(tc.view.next());
            true
        } else {
            false
        }
    }

    fn advance_to(&mut self, view: View) {
        if view > self.current_view {
            debug!(from = ?self.current_view, to = ?view, "pacemaker advancing view");
            self.current_view = view;
        }
    }

    /// Deterministic leader election (spec §4.1): draw a pseudorandom value
    /// from `H(epoch || view)`, reduce it modulo total power, and walk the
    /// (key-sorted) validator set accumulating power until the draw falls in
    /// a validator's range. Expected leader share is proportional to stake;
    /// ties are impossible since the draw and the iteration order are both
    /// fully determined by validator-key byte order.
    pub fn next_leader(&self, view: View, validators: &ValidatorSet) -> BftNode {
        Self::elect_leader(self.epoch, view, validators)
    }

    pub fn elect_leader(epoch: bft_types::Epoch, view: View, validators: &ValidatorSet) -> BftNode {
        assert!(!validators.is_empty(), "cannot elect a leader from an empty validator set");
        let total = validators.total_power();
        let mut seed_input = Vec::with_capacity(16);
        seed_input.extend_from_slice(&epoch.0.to_be_bytes());
        seed_input.extend_from_slice(&view.0.to_be_bytes());
        let digest = double_sha256(&seed_input);
        let draw = U256::from_big_endian(&digest) % total;

        let mut cumulative = U256::zero();
        for (node, power) in validators.members() {
            cumulative += *power;
            if draw < cumulative {
                return *node;
            }
        }
        // Unreachable for a well-formed validator set (cumulative == total > draw
        // always holds at the last member), kept as a defined fallback rather
        // than a panic in case of floating accounting drift.
        validators.members().last().unwrap().0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bft_crypto::BftKeyPair;
    use bft_types::{BftHeader, Epoch, VoteData};
    use rand::rngs::OsRng;

    fn node() -> BftNode {
        let mut rng = OsRng;
        BftNode(BftKeyPair::generate(&mut rng).public())
    }

    fn genesis_qc() -> QuorumCertificate {
        QuorumCertificate::genesis(BftHeader::genesis())
    }

    #[test]
    fn timeout_schedule_is_flat_by_default() {
        let cfg = TimeoutConfig::default();
        assert_eq!(cfg.duration(0), Duration::from_millis(3000));
        assert_eq!(cfg.duration(5), Duration::from_millis(3000)); // max_exp=0
    }

    #[test]
    fn timeout_schedule_backs_off_when_configured() {
        let cfg = TimeoutConfig { base_ms: 1000, rate: 2.0, max_exp: 3 };
        assert_eq!(cfg.duration(0), Duration::from_millis(1000));
        assert_eq!(cfg.duration(1), Duration::from_millis(2000));
        assert_eq!(cfg.duration(2), Duration::from_millis(4000));
        assert_eq!(cfg.duration(10), Duration::from_millis(8000)); // capped at max_exp
    }

    #[test]
    fn stale_timeout_firing_is_ignored() {
        let mut pm = Pacemaker::new(Epoch(0), View(5), TimeoutConfig::default());
        assert!(pm.on_view_timeout(View(4), genesis_qc()).is_none());
        assert_eq!(pm.current_view(), View(5));
    }

    #[test]
    fn qc_advances_view_and_resets_backoff() {
        let mut pm = Pacemaker::new(Epoch(0), View(1), TimeoutConfig::default());
        pm.on_view_timeout(View(1), genesis_qc());
        assert_eq!(pm.consecutive_timeouts, 1);

        let header = BftHeader { view: View(1), ..BftHeader::genesis() };
        let qc = QuorumCertificate {
            vote_data: VoteData { voted_header: header.clone(), parent_header: header, committed_header: None },
            signatures: Default::default(),
        };
        assert!(pm.process_qc(&qc));
        assert_eq!(pm.current_view(), View(2));
        assert_eq!(pm.consecutive_timeouts, 0);
    }

    #[test]
    fn leader_election_is_deterministic_across_calls() {
        let validators = ValidatorSet::new(vec![(node(), U256::from(100)), (node(), U256::from(100))]);
        let a = Pacemaker::elect_leader(Epoch(1), View(7), &validators);
        let b = Pacemaker::elect_leader(Epoch(1), View(7), &validators);
        assert_eq!(a, b);
    }

    #[test]
    fn leader_election_respects_proportional_share_over_many_views() {
        let heavy = node();
        let light = node();
        let validators = ValidatorSet::new(vec![(heavy, U256::from(900)), (light, U256::from(100))]);
        let mut heavy_wins = 0;
        for v in 0..1000u64 {
            if Pacemaker::elect_leader(Epoch(0), View(v), &validators) == heavy {
                heavy_wins += 1;
            }
        }
        // Not an exact bound, just a sanity check that the heavier validator
        // wins the overwhelming majority of draws.
        assert!(heavy_wins > 800, "heavy validator only won {heavy_wins}/1000 draws");
    }
}
