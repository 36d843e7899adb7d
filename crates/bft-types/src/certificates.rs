use crate::header::BftHeader;
use crate::node::BftNode;
use crate::view::{Epoch, View};
use bft_crypto::{double_sha256, AggregateSignature, BftSignature};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The payload a vote (and therefore a QC) certifies: the header being
/// voted for, its parent, and — when this vote completes a 3-chain — the
/// header that becomes committed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteData {
    pub voted_header: BftHeader,
    pub parent_header: BftHeader,
    pub committed_header: Option<BftHeader>,
}

impl VoteData {
    /// The digest that gets signed. Hashing the full header (not just the
    /// vertex id) binds the vote to the ledger state the voter believes the
    /// vertex produces, closing the "leader lies about ledger effects"
    /// attack `Ledger.prepare` exists to prevent.
    pub fn digest(&self) -> [u8; 32] {
        let mut buf = Vec::new();
        encode_header(&self.voted_header, &mut buf);
        encode_header(&self.parent_header, &mut buf);
        if let Some(c) = &self.committed_header {
            buf.push(1);
            encode_header(c, &mut buf);
        } else {
            buf.push(0);
        }
        double_sha256(&buf)
    }
}

/// Digest a `TimeoutCertificate` (and each contributing `Vote.timeout_signature`)
/// signs: `H(epoch || view)`, deliberately independent of any QC content so
/// that a TC forms from timeout votes alone.
pub fn timeout_digest(epoch: Epoch, view: View) -> [u8; 32] {
    let mut buf = Vec::new();
    buf.extend_from_slice(&epoch.0.to_be_bytes());
    buf.extend_from_slice(&view.0.to_be_bytes());
    double_sha256(&buf)
}

fn encode_header(h: &BftHeader, buf: &mut Vec<u8>) {
    buf.extend_from_slice(&h.view.0.to_be_bytes());
    buf.extend_from_slice(&h.vertex_id.0);
    buf.extend_from_slice(&h.ledger_header.epoch.0.to_be_bytes());
    buf.extend_from_slice(&h.ledger_header.state_version.to_be_bytes());
    buf.extend_from_slice(&h.ledger_header.accumulator_hash);
    buf.push(h.ledger_header.is_end_of_epoch as u8);
}

/// Proof that a super-majority of validator power voted for `voted_header`.
/// `committed_header` is present exactly when this QC forms a 3-chain commit
/// (spec §3 invariant on `QuorumCertificate`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumCertificate {
    pub vote_data: VoteData,
    pub signatures: AggregateSignature,
}

impl QuorumCertificate {
    pub fn genesis(genesis_header: BftHeader) -> Self {
        Self {
            vote_data: VoteData {
                voted_header: genesis_header.clone(),
                parent_header: genesis_header.clone(),
                committed_header: Some(genesis_header),
            },
            signatures: AggregateSignature::new(),
        }
    }

    pub fn view(&self) -> View {
        self.vote_data.voted_header.view
    }

    pub fn committed_header(&self) -> Option<&BftHeader> {
        self.vote_data.committed_header.as_ref()
    }

    /// A QC whose voted header sits at `View::GENESIS` is the self-signed
    /// root every epoch boots from (`Vertex::genesis_pair`/
    /// `genesis_pair_with_header`) — it carries no signatures by
    /// construction, since there is no prior quorum to have produced one.
    /// Every epoch's first real proposal justifies itself with exactly this
    /// QC, so it is accepted unconditionally rather than checked for
    /// quorum power.
    fn is_genesis(&self) -> bool {
        self.vote_data.voted_header.view == View::GENESIS && self.signatures.signers().next().is_none()
    }

    pub fn verify(&self, validators: &crate::validator_set::ValidatorSet) -> Result<(), CertificateError> {
        if self.is_genesis() {
            return Ok(());
        }
        let digest = self.vote_data.digest();
        self.signatures
            .verify_all(&digest)
            .map_err(CertificateError::Signature)?;
        let mut power = primitive_types::U256::zero();
        for signer in self.signatures.signers() {
            let node = BftNode(*signer);
            let p = validators
                .power_of(&node)
                .ok_or(CertificateError::UnknownSigner)?;
            power = power.checked_add(p).ok_or(CertificateError::PowerOverflow)?;
        }
        if !validators.has_quorum(power) {
            return Err(CertificateError::BelowQuorum);
        }
        Ok(())
    }
}

/// Proof that a super-majority timed out at `view`, carrying the highest QC
/// each signer had seen.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutCertificate {
    pub epoch: Epoch,
    pub view: View,
    pub highest_qcs: HashMap<BftNode, QuorumCertificate>,
    pub signatures: AggregateSignature,
}

impl TimeoutCertificate {
    /// The highest QC observed across every signer of this TC — what the
    /// next leader must carry forward (spec §4.3 timeout path).
    pub fn highest_qc(&self) -> Option<&QuorumCertificate> {
        self.highest_qcs.values().max_by_key(|qc| qc.view())
    }

    fn digest(&self) -> [u8; 32] {
        timeout_digest(self.epoch, self.view)
    }

    pub fn verify(&self, validators: &crate::validator_set::ValidatorSet) -> Result<(), CertificateError> {
        let digest = self.digest();
        self.signatures
            .verify_all(&digest)
            .map_err(CertificateError::Signature)?;
        let mut power = primitive_types::U256::zero();
        for signer in self.signatures.signers() {
            let node = BftNode(*signer);
            let p = validators
                .power_of(&node)
                .ok_or(CertificateError::UnknownSigner)?;
            power = power.checked_add(p).ok_or(CertificateError::PowerOverflow)?;
        }
        if !validators.has_quorum(power) {
            return Err(CertificateError::BelowQuorum);
        }
        Ok(())
    }
}

/// A single validator's vote. `timeout_signature` is present iff the voter
/// is voting during a pacemaker timeout (spec §3); in that case `high_qc`
/// carries the QC the voter had observed as highest at the time it timed
/// out, so the leader can recover the `highestQCs` map a `TimeoutCertificate`
/// requires without a separate round trip.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub vote_data: VoteData,
    pub timeout_signature: Option<BftSignature>,
    pub high_qc: Option<QuorumCertificate>,
    pub voter: BftNode,
    pub signature: BftSignature,
}

impl Vote {
    pub fn is_timeout(&self) -> bool {
        self.timeout_signature.is_some()
    }

    pub fn verify(&self) -> Result<(), CertificateError> {
        let digest = self.vote_data.digest();
        bft_crypto::verify(self.voter.key(), &digest, &self.signature)
            .map_err(CertificateError::Signature)?;
        if let Some(timeout_sig) = &self.timeout_signature {
            let epoch = self.vote_data.voted_header.ledger_header.epoch;
            let view = self.vote_data.voted_header.view;
            let timeout_digest = timeout_digest(epoch, view);
            bft_crypto::verify(self.voter.key(), &timeout_digest, timeout_sig)
                .map_err(CertificateError::Signature)?;
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CertificateError {
    #[error("signature verification failed: {0}")]
    Signature(#[from] bft_crypto::CryptoError),
    #[error("signer is not a member of the validator set")]
    UnknownSigner,
    #[error("signer power sum overflowed")]
    PowerOverflow,
    #[error("signed power is below quorum threshold")]
    BelowQuorum,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validator_set::ValidatorSet;
    use bft_crypto::BftKeyPair;
    use primitive_types::U256;
    use rand::rngs::OsRng;

    #[test]
    fn qc_verifies_with_quorum_signatures() {
        let mut rng = OsRng;
        let kps: Vec<_> = (0..4).map(|_| BftKeyPair::generate(&mut rng)).collect();
        let members: Vec<_> = kps.iter().map(|k| (BftNode(k.public()), U256::from(100))).collect();
        let set = ValidatorSet::new(members);

        let header = BftHeader::genesis();
        let vote_data = VoteData {
            voted_header: header.clone(),
            parent_header: header.clone(),
            committed_header: None,
        };
        let digest = vote_data.digest();

        let mut agg = AggregateSignature::new();
        for kp in kps.iter().take(3) {
            agg.add(kp.public(), kp.sign(&digest));
        }
        let qc = QuorumCertificate { vote_data, signatures: agg };
        qc.verify(&set).expect("3 of 4 is quorum");
    }

    #[test]
    fn genesis_qc_verifies_with_no_signatures() {
        let set = ValidatorSet::new(vec![]);
        let qc = QuorumCertificate::genesis(BftHeader::genesis());
        qc.verify(&set).expect("genesis QC bypasses the quorum check");
    }

    #[test]
    fn non_genesis_qc_with_empty_signatures_is_rejected() {
        let mut rng = OsRng;
        let kps: Vec<_> = (0..4).map(|_| BftKeyPair::generate(&mut rng)).collect();
        let members: Vec<_> = kps.iter().map(|k| (BftNode(k.public()), U256::from(100))).collect();
        let set = ValidatorSet::new(members);

        let mut header = BftHeader::genesis();
        header.view = View(1);
        let vote_data = VoteData { voted_header: header.clone(), parent_header: header, committed_header: None };
        let qc = QuorumCertificate { vote_data, signatures: AggregateSignature::new() };
        assert!(matches!(qc.verify(&set), Err(CertificateError::BelowQuorum)));
    }

    #[test]
    fn qc_fails_below_quorum() {
        let mut rng = OsRng;
        let kps: Vec<_> = (0..4).map(|_| BftKeyPair::generate(&mut rng)).collect();
        let members: Vec<_> = kps.iter().map(|k| (BftNode(k.public()), U256::from(100))).collect();
        let set = ValidatorSet::new(members);

        let header = BftHeader::genesis();
        let vote_data = VoteData {
            voted_header: header.clone(),
            parent_header: header,
            committed_header: None,
        };
        let digest = vote_data.digest();
        let mut agg = AggregateSignature::new();
        agg.add(kps[0].public(), kps[0].sign(&digest));
        let qc = QuorumCertificate { vote_data, signatures: agg };
        assert!(matches!(qc.verify(&set), Err(CertificateError::BelowQuorum)));
    }
}
