use bft_crypto::BftPublicKey;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A validator, identified solely by its compressed public key. Equality is
/// key equality (spec §3: "BFTNode: ... Equality = key equality").
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BftNode(pub BftPublicKey);

impl BftNode {
    pub fn key(&self) -> &BftPublicKey {
        &self.0
    }
}

impl fmt::Debug for BftNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BftNode({:?})", self.0)
    }
}

impl From<BftPublicKey> for BftNode {
    fn from(key: BftPublicKey) -> Self {
        Self(key)
    }
}
