//! `EngineStore`: the single-writer, transactional key-value abstraction the
//! rest of the node is built against — any backend satisfying single-writer
//! transactional semantics works behind this one trait.
//!
//! The core is single-threaded (spec §5): there is never more than one open
//! write transaction, and reads inside a transaction see a snapshot layered
//! above the last committed state ("preview" reads for `Ledger.prepare`).

mod sled_store;

pub use sled_store::SledEngineStore;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("backing store I/O error: {0}")]
    Io(String),
    #[error("serialization error: {0}")]
    Codec(String),
    #[error("transaction already committed or aborted")]
    TransactionClosed,
}

/// A cursor over keys sharing a prefix, in key order. Used to answer range
/// scans such as "all substates created by this epoch-update transaction".
pub trait IndexedCursor {
    fn next(&mut self) -> Option<(Vec<u8>, Vec<u8>)>;
}

/// One write-transaction against the store. Dropped without `commit` is an
/// abort. Reads observe this transaction's own writes layered on top of the
/// last committed state (read-your-writes), which is exactly the "preview"
/// semantics `Ledger.prepare` needs (spec §4.4): a vertex's constraint-machine
/// run must see the effects of everything already committed *and* nothing
/// else, even though nothing has touched disk yet.
pub trait EngineStoreTransaction {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError>;
    fn put(&mut self, key: Vec<u8>, value: Vec<u8>);
    fn delete(&mut self, key: Vec<u8>);
    fn open_indexed_cursor(&self, prefix: &[u8]) -> Box<dyn IndexedCursor + '_>;
    fn commit(self: Box<Self>) -> Result<(), StorageError>;
    /// Explicit abort (dropping also aborts; this exists for call sites that
    /// want the discard to be visible in the code, matching the contract
    /// named in spec §9: "transactional `commit`/`abort`").
    fn abort(self: Box<Self>) {}
}

pub trait EngineStore: Send + Sync {
    fn begin_transaction(&self) -> Box<dyn EngineStoreTransaction + '_>;
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError>;
    fn open_indexed_cursor(&self, prefix: &[u8]) -> Box<dyn IndexedCursor + '_>;

    /// True iff the virtual substate identified by `canonical_hash` has ever
    /// been spent (spec I5: `VDOWN` succeeds only if never down before).
    fn is_virtual_down(&self, canonical_hash: &[u8; 32]) -> Result<bool, StorageError> {
        Ok(self.get(&virtual_down_key(canonical_hash))?.is_some())
    }

    /// Load the UP substate body for a substate id, if it is currently up.
    fn load_up_particle(&self, substate_key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        self.get(substate_key)
    }
}

pub fn virtual_down_key(canonical_hash: &[u8; 32]) -> Vec<u8> {
    let mut k = b"vdown:".to_vec();
    k.extend_from_slice(canonical_hash);
    k
}
