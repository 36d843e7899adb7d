//! Substate-granular view over a storage transaction (spec §4.5): the
//! constraint machine never touches raw bytes from `EngineStore` directly,
//! it asks "is this substate up/down/virtual-down" and gets back a typed
//! answer.

use crate::substate::{Substate, SubstateId};
use bft_storage::{EngineStoreTransaction, StorageError, virtual_down_key};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CMStoreError {
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Read/write access to substates during a single transaction's execution.
/// Implemented directly over an `EngineStoreTransaction` so reads see the
/// preview state built up by earlier transactions in the same prepared
/// vertex (spec §4.4).
pub trait CMStore {
    fn get_up_substate(&self, id: &SubstateId) -> Result<Option<Substate>, CMStoreError>;
    fn is_down(&self, id: &SubstateId) -> Result<bool, CMStoreError>;
    fn is_virtual_down(&self, canonical_hash: &[u8; 32]) -> Result<bool, CMStoreError>;
    fn spin_up(&mut self, id: SubstateId, substate: Substate);
    fn spin_down(&mut self, id: &SubstateId);
    fn spin_virtual_down(&mut self, canonical_hash: [u8; 32]);
}

/// Adapts any `EngineStoreTransaction` into a `CMStore`. A substate id's
/// store key doubles as its presence marker: a tombstone is written on
/// `spin_down` rather than merely absent, so a later `DOWN` of the same id
/// is distinguishable from "never existed" (spin conflict, spec I5).
pub struct TransactionCMStore<'a> {
    txn: &'a mut (dyn EngineStoreTransaction + 'a),
}

impl<'a> TransactionCMStore<'a> {
    pub fn new(txn: &'a mut (dyn EngineStoreTransaction + 'a)) -> Self {
        Self { txn }
    }
}

fn down_marker_key(id: &SubstateId) -> Vec<u8> {
    let mut k = b"down:".to_vec();
    k.extend_from_slice(&id.store_key());
    k
}

impl<'a> CMStore for TransactionCMStore<'a> {
    fn get_up_substate(&self, id: &SubstateId) -> Result<Option<Substate>, CMStoreError> {
        match self.txn.get(&id.store_key())? {
            Some(bytes) => Ok(Some(Substate::decode(&bytes).map_err(|e| {
                CMStoreError::Storage(StorageError::Codec(e.to_string()))
            })?)),
            None => Ok(None),
        }
    }

    fn is_down(&self, id: &SubstateId) -> Result<bool, CMStoreError> {
        Ok(self.txn.get(&down_marker_key(id))?.is_some())
    }

    fn is_virtual_down(&self, canonical_hash: &[u8; 32]) -> Result<bool, CMStoreError> {
        Ok(self.txn.get(&virtual_down_key(canonical_hash))?.is_some())
    }

    fn spin_up(&mut self, id: SubstateId, substate: Substate) {
        self.txn.put(id.store_key(), substate.encode());
    }

    fn spin_down(&mut self, id: &SubstateId) {
        self.txn.delete(id.store_key());
        self.txn.put(down_marker_key(id), vec![1]);
    }

    fn spin_virtual_down(&mut self, canonical_hash: [u8; 32]) {
        self.txn.put(virtual_down_key(&canonical_hash), vec![1]);
    }
}
