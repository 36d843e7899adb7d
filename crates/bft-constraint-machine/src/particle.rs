//! Particles: the deserialised form of a substate body under the active
//! fork's parsing rules (spec §3). Each body is hand-decoded by type byte —
//! no reflection, numeric fields big-endian, exactly as §6 specifies.

use crate::substate::{Substate, SubstateCodecError, SubstateTypeId};

fn read_u64(body: &[u8], at: usize) -> Result<u64, SubstateCodecError> {
    let slice = body.get(at..at + 8).ok_or(SubstateCodecError::Truncated)?;
    Ok(u64::from_be_bytes(slice.try_into().unwrap()))
}

fn read_u128(body: &[u8], at: usize) -> Result<u128, SubstateCodecError> {
    let slice = body.get(at..at + 16).ok_or(SubstateCodecError::Truncated)?;
    Ok(u128::from_be_bytes(slice.try_into().unwrap()))
}

fn read_bytes<const N: usize>(body: &[u8], at: usize) -> Result<[u8; N], SubstateCodecError> {
    let slice = body.get(at..at + N).ok_or(SubstateCodecError::Truncated)?;
    Ok(slice.try_into().unwrap())
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokensParticle {
    pub resource_addr: [u8; 32],
    pub owner: [u8; 32],
    pub amount: u128,
}

impl TokensParticle {
    fn decode(body: &[u8]) -> Result<Self, SubstateCodecError> {
        Ok(Self {
            resource_addr: read_bytes(body, 0)?,
            owner: read_bytes(body, 32)?,
            amount: read_u128(body, 64)?,
        })
    }
    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(80);
        out.extend_from_slice(&self.resource_addr);
        out.extend_from_slice(&self.owner);
        out.extend_from_slice(&self.amount.to_be_bytes());
        out
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreparedStakeParticle {
    pub owner: [u8; 32],
    pub delegate: [u8; 33],
    pub amount: u128,
}

impl PreparedStakeParticle {
    fn decode(body: &[u8]) -> Result<Self, SubstateCodecError> {
        Ok(Self {
            owner: read_bytes(body, 0)?,
            delegate: read_bytes(body, 32)?,
            amount: read_u128(body, 65)?,
        })
    }
    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(81);
        out.extend_from_slice(&self.owner);
        out.extend_from_slice(&self.delegate);
        out.extend_from_slice(&self.amount.to_be_bytes());
        out
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExittingStakeParticle {
    pub owner: [u8; 32],
    pub delegate: [u8; 33],
    pub amount: u128,
    pub epoch_unlocked: u64,
}

impl ExittingStakeParticle {
    fn decode(body: &[u8]) -> Result<Self, SubstateCodecError> {
        Ok(Self {
            owner: read_bytes(body, 0)?,
            delegate: read_bytes(body, 32)?,
            amount: read_u128(body, 65)?,
            epoch_unlocked: read_u64(body, 81)?,
        })
    }
    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(89);
        out.extend_from_slice(&self.owner);
        out.extend_from_slice(&self.delegate);
        out.extend_from_slice(&self.amount.to_be_bytes());
        out.extend_from_slice(&self.epoch_unlocked.to_be_bytes());
        out
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatorBftDataParticle {
    pub validator: [u8; 33],
    pub proposals_completed: u64,
    pub proposals_missed: u64,
}

impl ValidatorBftDataParticle {
    fn decode(body: &[u8]) -> Result<Self, SubstateCodecError> {
        Ok(Self {
            validator: read_bytes(body, 0)?,
            proposals_completed: read_u64(body, 33)?,
            proposals_missed: read_u64(body, 41)?,
        })
    }
    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(49);
        out.extend_from_slice(&self.validator);
        out.extend_from_slice(&self.proposals_completed.to_be_bytes());
        out.extend_from_slice(&self.proposals_missed.to_be_bytes());
        out
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatorStakeDataParticle {
    pub validator: [u8; 33],
    pub total_stake: u128,
}

impl ValidatorStakeDataParticle {
    fn decode(body: &[u8]) -> Result<Self, SubstateCodecError> {
        Ok(Self { validator: read_bytes(body, 0)?, total_stake: read_u128(body, 33)? })
    }
    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(49);
        out.extend_from_slice(&self.validator);
        out.extend_from_slice(&self.total_stake.to_be_bytes());
        out
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatorOwnerCopyParticle {
    pub validator: [u8; 33],
    pub owner: [u8; 32],
}

impl ValidatorOwnerCopyParticle {
    fn decode(body: &[u8]) -> Result<Self, SubstateCodecError> {
        Ok(Self { validator: read_bytes(body, 0)?, owner: read_bytes(body, 33)? })
    }
    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(65);
        out.extend_from_slice(&self.validator);
        out.extend_from_slice(&self.owner);
        out
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatorRegisteredCopyParticle {
    pub validator: [u8; 33],
    pub registered: bool,
}

impl ValidatorRegisteredCopyParticle {
    fn decode(body: &[u8]) -> Result<Self, SubstateCodecError> {
        let validator = read_bytes(body, 0)?;
        let flag = *body.get(33).ok_or(SubstateCodecError::Truncated)?;
        Ok(Self { validator, registered: flag != 0 })
    }
    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(34);
        out.extend_from_slice(&self.validator);
        out.push(self.registered as u8);
        out
    }
}

/// Records a validator's vote for a candidate fork as a hash (spec §4.6:
/// `H(validatorKey || forkName || …)`), alongside arbitrary system metadata.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatorSystemMetadataParticle {
    pub validator: [u8; 33],
    pub vote_hash: [u8; 32],
}

impl ValidatorSystemMetadataParticle {
    fn decode(body: &[u8]) -> Result<Self, SubstateCodecError> {
        Ok(Self { validator: read_bytes(body, 0)?, vote_hash: read_bytes(body, 33)? })
    }
    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(65);
        out.extend_from_slice(&self.validator);
        out.extend_from_slice(&self.vote_hash);
        out
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoundDataParticle {
    pub view: u64,
}

impl RoundDataParticle {
    fn decode(body: &[u8]) -> Result<Self, SubstateCodecError> {
        Ok(Self { view: read_u64(body, 0)? })
    }
    fn encode(&self) -> Vec<u8> {
        self.view.to_be_bytes().to_vec()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EpochDataParticle {
    pub epoch: u64,
}

impl EpochDataParticle {
    fn decode(body: &[u8]) -> Result<Self, SubstateCodecError> {
        Ok(Self { epoch: read_u64(body, 0)? })
    }
    fn encode(&self) -> Vec<u8> {
        self.epoch.to_be_bytes().to_vec()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Particle {
    Tokens(TokensParticle),
    PreparedStake(PreparedStakeParticle),
    ExittingStake(ExittingStakeParticle),
    ValidatorBftData(ValidatorBftDataParticle),
    ValidatorStakeData(ValidatorStakeDataParticle),
    ValidatorOwnerCopy(ValidatorOwnerCopyParticle),
    ValidatorRegisteredCopy(ValidatorRegisteredCopyParticle),
    ValidatorSystemMetadata(ValidatorSystemMetadataParticle),
    RoundData(RoundDataParticle),
    EpochData(EpochDataParticle),
}

impl Particle {
    pub fn parse(substate: &Substate) -> Result<Self, SubstateCodecError> {
        Ok(match substate.type_id {
            SubstateTypeId::Tokens => Particle::Tokens(TokensParticle::decode(&substate.body)?),
            SubstateTypeId::PreparedStake => Particle::PreparedStake(PreparedStakeParticle::decode(&substate.body)?),
            SubstateTypeId::ExittingStake => Particle::ExittingStake(ExittingStakeParticle::decode(&substate.body)?),
            SubstateTypeId::ValidatorBftData => Particle::ValidatorBftData(ValidatorBftDataParticle::decode(&substate.body)?),
            SubstateTypeId::ValidatorStakeData => Particle::ValidatorStakeData(ValidatorStakeDataParticle::decode(&substate.body)?),
            SubstateTypeId::ValidatorOwnerCopy => Particle::ValidatorOwnerCopy(ValidatorOwnerCopyParticle::decode(&substate.body)?),
            SubstateTypeId::ValidatorRegisteredCopy => {
                Particle::ValidatorRegisteredCopy(ValidatorRegisteredCopyParticle::decode(&substate.body)?)
            }
            SubstateTypeId::ValidatorSystemMetadata => {
                Particle::ValidatorSystemMetadata(ValidatorSystemMetadataParticle::decode(&substate.body)?)
            }
            SubstateTypeId::RoundData => Particle::RoundData(RoundDataParticle::decode(&substate.body)?),
            SubstateTypeId::EpochData => Particle::EpochData(EpochDataParticle::decode(&substate.body)?),
        })
    }

    pub fn to_substate(&self) -> Substate {
        let (type_id, body) = match self {
            Particle::Tokens(p) => (SubstateTypeId::Tokens, p.encode()),
            Particle::PreparedStake(p) => (SubstateTypeId::PreparedStake, p.encode()),
            Particle::ExittingStake(p) => (SubstateTypeId::ExittingStake, p.encode()),
            Particle::ValidatorBftData(p) => (SubstateTypeId::ValidatorBftData, p.encode()),
            Particle::ValidatorStakeData(p) => (SubstateTypeId::ValidatorStakeData, p.encode()),
            Particle::ValidatorOwnerCopy(p) => (SubstateTypeId::ValidatorOwnerCopy, p.encode()),
            Particle::ValidatorRegisteredCopy(p) => (SubstateTypeId::ValidatorRegisteredCopy, p.encode()),
            Particle::ValidatorSystemMetadata(p) => (SubstateTypeId::ValidatorSystemMetadata, p.encode()),
            Particle::RoundData(p) => (SubstateTypeId::RoundData, p.encode()),
            Particle::EpochData(p) => (SubstateTypeId::EpochData, p.encode()),
        };
        Substate { type_id, body }
    }

    pub fn type_id(&self) -> SubstateTypeId {
        self.to_substate().type_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_particle_round_trips_through_substate_bytes() {
        let p = Particle::Tokens(TokensParticle { resource_addr: [1; 32], owner: [2; 32], amount: 12345 });
        let substate = p.to_substate();
        let bytes = substate.encode();
        let decoded_substate = Substate::decode(&bytes).unwrap();
        let decoded = Particle::parse(&decoded_substate).unwrap();
        assert_eq!(p, decoded);
    }

    #[test]
    fn validator_registered_copy_round_trips_bool_flag() {
        let p = Particle::ValidatorRegisteredCopy(ValidatorRegisteredCopyParticle { validator: [9; 33], registered: true });
        let bytes = p.to_substate().encode();
        let decoded = Particle::parse(&Substate::decode(&bytes).unwrap()).unwrap();
        assert_eq!(p, decoded);
    }
}
