//! Substate binary format (spec §6): byte 0 is the type byte, byte 1 is
//! reserved (must be 0), the rest is type-specific body. Hand-written, no
//! reflection — the type byte alone decides how the body is read.

use bft_crypto::double_sha256;
use bft_types::TxnId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum SubstateTypeId {
    Tokens = 1,
    PreparedStake = 2,
    ExittingStake = 3,
    ValidatorBftData = 4,
    ValidatorStakeData = 5,
    ValidatorOwnerCopy = 6,
    ValidatorRegisteredCopy = 7,
    ValidatorSystemMetadata = 8,
    RoundData = 9,
    EpochData = 10,
}

impl SubstateTypeId {
    pub fn from_byte(b: u8) -> Option<Self> {
        Some(match b {
            1 => Self::Tokens,
            2 => Self::PreparedStake,
            3 => Self::ExittingStake,
            4 => Self::ValidatorBftData,
            5 => Self::ValidatorStakeData,
            6 => Self::ValidatorOwnerCopy,
            7 => Self::ValidatorRegisteredCopy,
            8 => Self::ValidatorSystemMetadata,
            9 => Self::RoundData,
            10 => Self::EpochData,
            _ => return None,
        })
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SubstateCodecError {
    #[error("substate body too short")]
    Truncated,
    #[error("reserved byte must be 0, got {0}")]
    ReservedByteSet(u8),
    #[error("unknown substate type byte {0}")]
    UnknownTypeByte(u8),
}

/// Raw on-wire substate: `[typeByte][reserved=0][body...]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Substate {
    pub type_id: SubstateTypeId,
    pub body: Vec<u8>,
}

impl Substate {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(2 + self.body.len());
        out.push(self.type_id as u8);
        out.push(0);
        out.extend_from_slice(&self.body);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, SubstateCodecError> {
        if bytes.len() < 2 {
            return Err(SubstateCodecError::Truncated);
        }
        if bytes[1] != 0 {
            return Err(SubstateCodecError::ReservedByteSet(bytes[1]));
        }
        let type_id = SubstateTypeId::from_byte(bytes[0]).ok_or(SubstateCodecError::UnknownTypeByte(bytes[0]))?;
        Ok(Self { type_id, body: bytes[2..].to_vec() })
    }

    /// The canonical hash used to derive a virtual substate id (spec §3:
    /// "a virtual id derived from a particle's canonical hash").
    pub fn canonical_hash(&self) -> [u8; 32] {
        double_sha256(&self.encode())
    }
}

/// A substate is addressed either by `(txnId, indexWithinTxn)` for substates
/// created by a committed transaction, or by a virtual id derived from a
/// particle's canonical hash for substates that are deemed to exist without
/// ever having been explicitly UP'd (spec §3).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubstateId {
    Txn(TxnId, u32),
    Virtual([u8; 32]),
}

impl SubstateId {
    /// Byte-key used to address this substate inside the `EngineStore`.
    pub fn store_key(&self) -> Vec<u8> {
        match self {
            SubstateId::Txn(txn_id, idx) => {
                let mut k = b"s:".to_vec();
                k.extend_from_slice(&txn_id.0);
                k.extend_from_slice(&idx.to_be_bytes());
                k
            }
            SubstateId::Virtual(hash) => {
                let mut k = b"v:".to_vec();
                k.extend_from_slice(hash);
                k
            }
        }
    }
}
