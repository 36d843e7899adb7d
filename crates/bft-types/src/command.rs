use bft_crypto::double_sha256;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 32-byte command/transaction id: double-SHA-256 of the command bytes.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TxnId(pub [u8; 32]);

impl fmt::Debug for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0[..4] {
            write!(f, "{:02x}", b)?;
        }
        write!(f, "…")
    }
}

/// An opaque transaction: bytes plus their derived id. The constraint
/// machine is the only component that looks inside `bytes`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    bytes: Vec<u8>,
    id: TxnId,
}

impl Command {
    pub fn new(bytes: Vec<u8>) -> Self {
        let id = TxnId(double_sha256(&bytes));
        Self { bytes, id }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Command({:?}, {} bytes)", self.id, self.bytes.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_is_double_sha256_of_bytes() {
        let cmd = Command::new(b"tx1".to_vec());
        assert_eq!(cmd.id(), TxnId(double_sha256(b"tx1")));
    }

    #[test]
    fn distinct_bytes_give_distinct_ids() {
        let a = Command::new(b"tx1".to_vec());
        let b = Command::new(b"tx2".to_vec());
        assert_ne!(a.id(), b.id());
    }
}
