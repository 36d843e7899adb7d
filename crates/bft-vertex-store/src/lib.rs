//! The uncommitted vertex tree (spec §4.2). Append-only except for the
//! pruning a commit performs; the root is always the last committed vertex.
//!
//! `insert_vertex` takes the vertex's already-computed [`LedgerHeader`]
//! rather than a `Ledger` handle: a natural reading would have
//! `insert_vertex` run `Ledger.prepare` internally, but `bft-ledger`'s `prepare` is a
//! pure function of the parent chain, and nothing here actually needs to
//! *own* a `Ledger` to call it. The dispatcher in `bft-consensus` calls
//! `Ledger::prepare(parent_chain, vertex)` immediately before
//! `insert_vertex`, which keeps this crate free of a dependency on
//! `bft-ledger` and keeps "prepare, then store" an explicit two-step in the
//! one place (the dispatcher) that already has to reason about ordering.

use bft_types::{BftHeader, LedgerHeader, QuorumCertificate, Vertex, VertexId, View};
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum VertexStoreError {
    #[error("parent vertex {0:?} is not present in the store")]
    MissingParent(VertexId),
    #[error("rebuild root commit QC does not reference the supplied root vertex")]
    InvalidRootCommitQc,
    #[error("commit target view {target:?} is not after the current root view {root:?}")]
    CommitBehindRoot { target: View, root: View },
    #[error("commit target vertex {0:?} is not present in the store")]
    UnknownCommitTarget(VertexId),
}

struct StoredVertex {
    vertex: Vertex,
    children: Vec<VertexId>,
}

pub struct VertexStore {
    root_id: VertexId,
    root_qc: QuorumCertificate,
    vertices: HashMap<VertexId, StoredVertex>,
    high_qc: QuorumCertificate,
    high_committed_qc: QuorumCertificate,
    indirect_parent_insertions: u64,
}

impl VertexStore {
    /// Fresh store rooted at `root_vertex`, whose `root_qc.vote_data.voted_header.vertex_id`
    /// must equal `root_vertex.id()` (spec §4.2 invariant).
    pub fn new(root_vertex: Vertex, root_qc: QuorumCertificate) -> Self {
        let root_id = root_vertex.id();
        assert_eq!(
            root_qc.vote_data.voted_header.vertex_id, root_id,
            "rootQC.proposed.vertexId must equal rootVertex.id()"
        );
        let mut vertices = HashMap::new();
        vertices.insert(root_id, StoredVertex { vertex: root_vertex, children: Vec::new() });
        Self {
            root_id,
            high_qc: root_qc.clone(),
            high_committed_qc: root_qc.clone(),
            root_qc,
            vertices,
            indirect_parent_insertions: 0,
        }
    }

    /// Rebuild from a sync/restart checkpoint. If `root_commit_qc` carries a
    /// committed header, it must reference `root_vertex`; otherwise the root
    /// must be the epoch genesis and `root_qc == root_commit_qc` (spec
    /// §4.2).
    pub fn rebuild(
        root_vertex: Vertex,
        root_qc: QuorumCertificate,
        root_commit_qc: QuorumCertificate,
    ) -> Result<Self, VertexStoreError> {
        let root_id = root_vertex.id();
        match root_commit_qc.committed_header() {
            Some(committed) if committed.vertex_id == root_id => {}
            Some(_) => return Err(VertexStoreError::InvalidRootCommitQc),
            None => {
                if root_vertex.view != View::GENESIS || root_qc != root_commit_qc {
                    return Err(VertexStoreError::InvalidRootCommitQc);
                }
            }
        }
        let mut store = Self::new(root_vertex, root_qc);
        store.high_committed_qc = root_commit_qc;
        Ok(store)
    }

    pub fn root_id(&self) -> VertexId {
        self.root_id
    }

    pub fn root(&self) -> &Vertex {
        &self.vertices[&self.root_id].vertex
    }

    pub fn high_qc(&self) -> &QuorumCertificate {
        &self.high_qc
    }

    pub fn high_committed_qc(&self) -> &QuorumCertificate {
        &self.high_committed_qc
    }

    pub fn indirect_parent_insertions(&self) -> u64 {
        self.indirect_parent_insertions
    }

    pub fn get(&self, id: &VertexId) -> Option<&Vertex> {
        self.vertices.get(id).map(|sv| &sv.vertex)
    }

    pub fn contains(&self, id: &VertexId) -> bool {
        self.vertices.contains_key(id)
    }

    /// Insert a vertex whose ledger effects have already been computed by
    /// `Ledger::prepare` into `ledger_header`. Fails with `MissingParent` if
    /// `vertex.parent_id` is not already present (spec §4.2).
    pub fn insert_vertex(&mut self, vertex: Vertex, ledger_header: LedgerHeader) -> Result<BftHeader, VertexStoreError> {
        let parent_id = vertex.parent_id;
        let parent_view = {
            let parent = self
                .vertices
                .get(&parent_id)
                .ok_or(VertexStoreError::MissingParent(parent_id))?;
            parent.vertex.view
        };
        if vertex.view.0 > parent_view.0 + 1 {
            self.indirect_parent_insertions += 1;
        }

        let vertex_id = vertex.id();
        let header = BftHeader { view: vertex.view, vertex_id, ledger_header };

        self.vertices.insert(vertex_id, StoredVertex { vertex, children: Vec::new() });
        self.vertices.get_mut(&parent_id).unwrap().children.push(vertex_id);

        debug!(?vertex_id, ?parent_id, "vertex inserted");
        Ok(header)
    }

    /// Returns `false` if the QC's voted vertex is unknown; otherwise may
    /// advance `high_qc` / `high_committed_qc` (spec §4.2).
    pub fn add_qc(&mut self, qc: QuorumCertificate) -> bool {
        if !self.vertices.contains_key(&qc.vote_data.voted_header.vertex_id) {
            return false;
        }
        if qc.view() > self.high_qc.view() {
            self.high_qc = qc.clone();
        }
        if let Some(committed) = qc.committed_header() {
            if committed.view > self.high_committed_qc.committed_header().map(|h| h.view).unwrap_or(View::GENESIS) {
                self.high_committed_qc = qc.clone();
            }
        }
        true
    }

    /// Path from the root (exclusive) down to `vertex_id` (inclusive), root
    /// first.
    pub fn get_path_from_root(&self, vertex_id: VertexId) -> Vec<Vertex> {
        let mut path = Vec::new();
        let mut cursor = vertex_id;
        while cursor != self.root_id {
            match self.vertices.get(&cursor) {
                Some(sv) => {
                    path.push(sv.vertex.clone());
                    cursor = sv.vertex.parent_id;
                }
                None => break,
            }
        }
        path.reverse();
        path
    }

    /// Up to `count` vertices walking parent pointers backward from `tip_id`,
    /// tip first — used to answer `GetVerticesRequest` sync queries.
    pub fn get_vertices(&self, tip_id: VertexId, count: usize) -> Vec<Vertex> {
        let mut out = Vec::new();
        let mut cursor = tip_id;
        for _ in 0..count {
            match self.vertices.get(&cursor) {
                Some(sv) => {
                    out.push(sv.vertex.clone());
                    if cursor == self.root_id {
                        break;
                    }
                    cursor = sv.vertex.parent_id;
                }
                None => break,
            }
        }
        out
    }

    /// Commit the vertex at `header.vertex_id`: refuses if its view is at or
    /// behind the current root; otherwise prunes every sibling subtree,
    /// re-roots the store at the committed vertex, and returns the
    /// committed chain (root-exclusive, oldest first) for the ledger to
    /// apply in order (spec §4.2, with the return type widened from a
    /// single `Option<Vertex>` to the full chain since the caller needs
    /// every committed vertex's command, not just the tip, to feed
    /// `Ledger.commit`).
    pub fn commit(&mut self, header: &BftHeader) -> Result<Vec<Vertex>, VertexStoreError> {
        let root_view = self.root().view;
        if header.view <= root_view {
            return Err(VertexStoreError::CommitBehindRoot { target: header.view, root: root_view });
        }
        if !self.vertices.contains_key(&header.vertex_id) {
            return Err(VertexStoreError::UnknownCommitTarget(header.vertex_id));
        }

        let chain = self.get_path_from_root(header.vertex_id);

        // Collect the set of vertices on the committed path so everything
        // else reachable from the old root can be pruned.
        let keep: std::collections::HashSet<VertexId> = chain.iter().map(|v| v.id()).chain(std::iter::once(self.root_id)).collect();
        let all_ids: Vec<VertexId> = self.vertices.keys().copied().collect();
        for id in all_ids {
            if !keep.contains(&id) {
                self.vertices.remove(&id);
            }
        }
        for sv in self.vertices.values_mut() {
            sv.children.retain(|c| keep.contains(c));
        }

        self.root_id = header.vertex_id;
        info!(new_root = ?self.root_id, committed = chain.len(), "vertex store re-rooted after commit");
        Ok(chain)
    }
}
