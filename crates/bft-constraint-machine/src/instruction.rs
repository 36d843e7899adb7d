//! REInstruction framing (spec §6): `[op:u8][len:u16][payload:len bytes]`,
//! except `END` (opcode only, no payload) and `SIG` (opcode plus a fixed
//! 65-byte compact-recoverable signature, no length prefix needed since the
//! length is implicit in the opcode). `SIG` is always the last instruction
//! in a well-formed stream.

use crate::substate::{Substate, SubstateCodecError, SubstateId};
use bft_types::TxnId;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum InstructionCodecError {
    #[error("instruction stream truncated")]
    Truncated,
    #[error("unknown instruction opcode {0}")]
    UnknownOpcode(u8),
    #[error("declared instruction length {declared} exceeds remaining {remaining} bytes")]
    LengthMismatch { declared: usize, remaining: usize },
    #[error("substate codec error: {0}")]
    Substate(#[from] SubstateCodecError),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum REInstruction {
    Up(Substate),
    VirtualDown(Substate),
    Down(SubstateId),
    LocalDown(u32),
    Read(SubstateId),
    LocalRead(u32),
    End,
    Msg(Vec<u8>),
    Sig([u8; 65]),
}

const OP_UP: u8 = 1;
const OP_VDOWN: u8 = 2;
const OP_DOWN: u8 = 3;
const OP_LDOWN: u8 = 4;
const OP_READ: u8 = 5;
const OP_LREAD: u8 = 6;
const OP_END: u8 = 7;
const OP_MSG: u8 = 8;
const OP_SIG: u8 = 9;

fn encode_substate_id(id: &SubstateId) -> Vec<u8> {
    match id {
        SubstateId::Txn(txn_id, idx) => {
            let mut out = vec![0u8];
            out.extend_from_slice(&txn_id.0);
            out.extend_from_slice(&idx.to_be_bytes());
            out
        }
        SubstateId::Virtual(hash) => {
            let mut out = vec![1u8];
            out.extend_from_slice(hash);
            out
        }
    }
}

fn decode_substate_id(bytes: &[u8]) -> Result<SubstateId, InstructionCodecError> {
    if bytes.is_empty() {
        return Err(InstructionCodecError::Truncated);
    }
    match bytes[0] {
        0 => {
            if bytes.len() != 1 + 32 + 4 {
                return Err(InstructionCodecError::Truncated);
            }
            let txn_id = TxnId(bytes[1..33].try_into().unwrap());
            let idx = u32::from_be_bytes(bytes[33..37].try_into().unwrap());
            Ok(SubstateId::Txn(txn_id, idx))
        }
        1 => {
            if bytes.len() != 1 + 32 {
                return Err(InstructionCodecError::Truncated);
            }
            Ok(SubstateId::Virtual(bytes[1..33].try_into().unwrap()))
        }
        other => Err(InstructionCodecError::UnknownOpcode(other)),
    }
}

impl REInstruction {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            REInstruction::End => vec![OP_END],
            REInstruction::Sig(sig) => {
                let mut out = Vec::with_capacity(1 + 65);
                out.push(OP_SIG);
                out.extend_from_slice(sig);
                out
            }
            other => {
                let (op, payload) = match other {
                    REInstruction::Up(s) => (OP_UP, s.encode()),
                    REInstruction::VirtualDown(s) => (OP_VDOWN, s.encode()),
                    REInstruction::Down(id) => (OP_DOWN, encode_substate_id(id)),
                    REInstruction::LocalDown(idx) => (OP_LDOWN, idx.to_be_bytes().to_vec()),
                    REInstruction::Read(id) => (OP_READ, encode_substate_id(id)),
                    REInstruction::LocalRead(idx) => (OP_LREAD, idx.to_be_bytes().to_vec()),
                    REInstruction::Msg(bytes) => (OP_MSG, bytes.clone()),
                    REInstruction::End | REInstruction::Sig(_) => unreachable!(),
                };
                let mut out = Vec::with_capacity(3 + payload.len());
                out.push(op);
                out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
                out.extend_from_slice(&payload);
                out
            }
        }
    }

    /// Decodes one instruction from the front of `bytes`, returning it along
    /// with the number of bytes consumed.
    pub fn decode_one(bytes: &[u8]) -> Result<(Self, usize), InstructionCodecError> {
        let op = *bytes.first().ok_or(InstructionCodecError::Truncated)?;
        if op == OP_END {
            return Ok((REInstruction::End, 1));
        }
        if op == OP_SIG {
            let body = bytes.get(1..66).ok_or(InstructionCodecError::Truncated)?;
            return Ok((REInstruction::Sig(body.try_into().unwrap()), 66));
        }
        let len_bytes = bytes.get(1..3).ok_or(InstructionCodecError::Truncated)?;
        let len = u16::from_be_bytes(len_bytes.try_into().unwrap()) as usize;
        let payload = bytes.get(3..3 + len).ok_or(InstructionCodecError::LengthMismatch {
            declared: len,
            remaining: bytes.len().saturating_sub(3),
        })?;
        let instr = match op {
            OP_UP => REInstruction::Up(Substate::decode(payload)?),
            OP_VDOWN => REInstruction::VirtualDown(Substate::decode(payload)?),
            OP_DOWN => REInstruction::Down(decode_substate_id(payload)?),
            OP_LDOWN => REInstruction::LocalDown(read_u32(payload)?),
            OP_READ => REInstruction::Read(decode_substate_id(payload)?),
            OP_LREAD => REInstruction::LocalRead(read_u32(payload)?),
            OP_MSG => REInstruction::Msg(payload.to_vec()),
            other => return Err(InstructionCodecError::UnknownOpcode(other)),
        };
        Ok((instr, 3 + len))
    }

    pub fn decode_stream(mut bytes: &[u8]) -> Result<Vec<Self>, InstructionCodecError> {
        let mut out = Vec::new();
        while !bytes.is_empty() {
            let (instr, consumed) = Self::decode_one(bytes)?;
            out.push(instr);
            bytes = &bytes[consumed..];
        }
        Ok(out)
    }

    pub fn encode_stream(instructions: &[Self]) -> Vec<u8> {
        instructions.iter().flat_map(|i| i.encode()).collect()
    }
}

fn read_u32(bytes: &[u8]) -> Result<u32, InstructionCodecError> {
    let arr: [u8; 4] = bytes.try_into().map_err(|_| InstructionCodecError::Truncated)?;
    Ok(u32::from_be_bytes(arr))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::substate::SubstateTypeId;

    #[test]
    fn end_and_sig_use_their_fixed_layout() {
        assert_eq!(REInstruction::End.encode(), vec![OP_END]);
        let sig = [7u8; 65];
        let encoded = REInstruction::Sig(sig).encode();
        assert_eq!(encoded.len(), 66);
        assert_eq!(encoded[0], OP_SIG);
    }

    #[test]
    fn instruction_stream_round_trips() {
        let substate = Substate { type_id: SubstateTypeId::Tokens, body: vec![1, 2, 3] };
        let stream = vec![
            REInstruction::Up(substate),
            REInstruction::Down(SubstateId::Txn(TxnId([3u8; 32]), 0)),
            REInstruction::LocalRead(0),
            REInstruction::End,
            REInstruction::Sig([1u8; 65]),
        ];
        let bytes = REInstruction::encode_stream(&stream);
        let decoded = REInstruction::decode_stream(&bytes).unwrap();
        assert_eq!(stream, decoded);
    }

    #[test]
    fn truncated_length_prefix_is_rejected() {
        let bytes = vec![OP_UP, 0, 100]; // declares 100 bytes but none follow
        assert!(matches!(REInstruction::decode_one(&bytes), Err(InstructionCodecError::LengthMismatch { .. })));
    }
}
