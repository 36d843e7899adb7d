use crate::certificates::QuorumCertificate;
use crate::command::Command;
use crate::node::BftNode;
use crate::view::View;
use bft_crypto::double_sha256;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 32-byte vertex id, derived deterministically from the vertex's contents
/// (so two honest proposers who build the same vertex agree on its id
/// without needing to exchange it first).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VertexId(pub [u8; 32]);

impl fmt::Debug for VertexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0[..4] {
            write!(f, "{:02x}", b)?;
        }
        write!(f, "…")
    }
}

/// A block in the BFT chain: a QC on its parent, a view, an optional
/// command, the proposer, and the parent's id. A vertex without a command is
/// "empty" — the timeout-path fallback described in spec §4.3.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vertex {
    pub qc: QuorumCertificate,
    pub view: View,
    pub command: Option<Command>,
    pub proposer: BftNode,
    pub parent_id: VertexId,
}

impl Vertex {
    pub fn genesis(proposer: BftNode, qc: QuorumCertificate) -> Self {
        let parent_id = VertexId([0u8; 32]);
        Self {
            qc,
            view: View::GENESIS,
            command: None,
            proposer,
            parent_id,
        }
    }

    pub fn new(qc: QuorumCertificate, view: View, command: Option<Command>, proposer: BftNode, parent_id: VertexId) -> Self {
        Self { qc, view, command, proposer, parent_id }
    }

    pub fn is_empty(&self) -> bool {
        self.command.is_none()
    }

    /// Builds a self-consistent genesis vertex and its own justifying QC:
    /// `VertexStore::new`'s invariant requires the QC's voted header to
    /// reference the vertex's own id, which a literal `Vertex::genesis` call
    /// paired with `QuorumCertificate::genesis(BftHeader::genesis())` cannot
    /// guarantee up front since the vertex id is content-derived. This
    /// computes the real id first and folds it back into the QC.
    pub fn genesis_pair(proposer: BftNode) -> (Self, QuorumCertificate) {
        Self::genesis_pair_with_header(proposer, crate::header::LedgerHeader::genesis())
    }

    /// Same construction as `genesis_pair`, but for a synthetic genesis that
    /// opens a new epoch rather than the process's very first one: the
    /// caller supplies the continuing `LedgerHeader` (state version and
    /// accumulator carried over, `epoch` already bumped) instead of the
    /// all-zero default.
    pub fn genesis_pair_with_header(proposer: BftNode, ledger_header: crate::header::LedgerHeader) -> (Self, QuorumCertificate) {
        let placeholder_header = crate::header::BftHeader {
            view: View::GENESIS,
            vertex_id: VertexId([0u8; 32]),
            ledger_header: ledger_header.clone(),
        };
        let placeholder = QuorumCertificate::genesis(placeholder_header);
        let vertex = Self::genesis(proposer, placeholder);
        let header = crate::header::BftHeader { view: View::GENESIS, vertex_id: vertex.id(), ledger_header };
        let qc = QuorumCertificate::genesis(header);
        let vertex = Self { qc: qc.clone(), ..vertex };
        (vertex, qc)
    }

    /// Deterministic vertex id: double-SHA-256 over the view, parent id,
    /// proposer key and command id (if any). The QC itself is *not* hashed
    /// in, since a vertex keeps the same identity across the network even if
    /// different subsets of voters contributed to the justifying QC; what
    /// must be unique is the *content* the proposer is proposing.
    pub fn id(&self) -> VertexId {
        let mut buf = Vec::with_capacity(8 + 32 + 33 + 32);
        buf.extend_from_slice(&self.view.0.to_be_bytes());
        buf.extend_from_slice(&self.parent_id.0);
        buf.extend_from_slice(self.proposer.key().as_bytes());
        if let Some(cmd) = &self.command {
            buf.extend_from_slice(&cmd.id().0);
        }
        VertexId(double_sha256(&buf))
    }
}

impl fmt::Debug for Vertex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vertex")
            .field("id", &self.id())
            .field("view", &self.view)
            .field("parent_id", &self.parent_id)
            .field("has_command", &self.command.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificates::QuorumCertificate;
    use crate::header::BftHeader;
    use bft_crypto::BftKeyPair;
    use rand::rngs::OsRng;

    fn node() -> BftNode {
        let mut rng = OsRng;
        BftNode(BftKeyPair::generate(&mut rng).public())
    }

    #[test]
    fn id_is_deterministic_and_content_addressed() {
        let proposer = node();
        let qc = QuorumCertificate::genesis(BftHeader::genesis());
        let v1 = Vertex::new(qc.clone(), View(1), Some(Command::new(b"a".to_vec())), proposer, VertexId([0; 32]));
        let v2 = Vertex::new(qc, View(1), Some(Command::new(b"a".to_vec())), proposer, VertexId([0; 32]));
        assert_eq!(v1.id(), v2.id());
    }

    #[test]
    fn empty_vertex_has_no_command() {
        let qc = QuorumCertificate::genesis(BftHeader::genesis());
        let v = Vertex::new(qc, View(1), None, node(), VertexId([0; 32]));
        assert!(v.is_empty());
    }
}
