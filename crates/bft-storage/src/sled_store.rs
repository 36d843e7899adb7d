use crate::{EngineStore, EngineStoreTransaction, IndexedCursor, StorageError};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

pub struct SledEngineStore {
    db: sled::Db,
}

impl SledEngineStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let db = sled::open(path).map_err(|e| StorageError::Io(e.to_string()))?;
        Ok(Self { db })
    }
}

impl EngineStore for SledEngineStore {
    fn begin_transaction(&self) -> Box<dyn EngineStoreTransaction + '_> {
        Box::new(SledTransaction {
            db: &self.db,
            writes: BTreeMap::new(),
        })
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        self.db
            .get(key)
            .map(|v| v.map(|ivec| ivec.to_vec()))
            .map_err(|e| StorageError::Io(e.to_string()))
    }

    fn open_indexed_cursor(&self, prefix: &[u8]) -> Box<dyn IndexedCursor + '_> {
        Box::new(SledCursor {
            iter: self.db.scan_prefix(prefix),
        })
    }
}

/// A write-set layered above the committed `sled::Db`. `None` means
/// "deleted in this transaction"; absence from the map means "fall through
/// to the committed store".
struct SledTransaction<'a> {
    db: &'a sled::Db,
    writes: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl<'a> EngineStoreTransaction for SledTransaction<'a> {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        if let Some(local) = self.writes.get(key) {
            return Ok(local.clone());
        }
        self.db
            .get(key)
            .map(|v| v.map(|ivec| ivec.to_vec()))
            .map_err(|e| StorageError::Io(e.to_string()))
    }

    fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.writes.insert(key, Some(value));
    }

    fn delete(&mut self, key: Vec<u8>) {
        self.writes.insert(key, None);
    }

    fn open_indexed_cursor(&self, prefix: &[u8]) -> Box<dyn IndexedCursor + '_> {
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();
        for entry in self.db.scan_prefix(prefix) {
            if let Ok((k, v)) = entry {
                if k.starts_with(prefix) {
                    merged.insert(k.to_vec(), v.to_vec());
                }
            }
        }
        for (k, v) in &self.writes {
            if k.starts_with(prefix) {
                match v {
                    Some(value) => {
                        merged.insert(k.clone(), value.clone());
                    }
                    None => {
                        merged.remove(k);
                    }
                }
            }
        }
        Box::new(MergedCursor {
            entries: merged.into_iter().collect(),
            pos: 0,
        })
    }

    fn commit(self: Box<Self>) -> Result<(), StorageError> {
        let mut batch = sled::Batch::default();
        for (key, value) in self.writes {
            match value {
                Some(v) => batch.insert(key, v),
                None => batch.remove(key),
            }
        }
        self.db
            .apply_batch(batch)
            .map_err(|e| StorageError::Io(e.to_string()))?;
        debug!("engine store transaction committed");
        Ok(())
    }
}

struct SledCursor {
    iter: sled::Iter,
}

impl IndexedCursor for SledCursor {
    fn next(&mut self) -> Option<(Vec<u8>, Vec<u8>)> {
        loop {
            match self.iter.next()? {
                Ok((k, v)) => return Some((k.to_vec(), v.to_vec())),
                Err(_) => continue,
            }
        }
    }
}

struct MergedCursor {
    entries: Vec<(Vec<u8>, Vec<u8>)>,
    pos: usize,
}

impl IndexedCursor for MergedCursor {
    fn next(&mut self) -> Option<(Vec<u8>, Vec<u8>)> {
        let item = self.entries.get(self.pos).cloned();
        self.pos += 1;
        item
    }
}
