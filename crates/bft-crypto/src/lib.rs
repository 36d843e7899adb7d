//! Signature and hashing primitives used throughout the consensus core.
//!
//! Primitive *design* is out of scope (see spec §1 non-goals): this crate is a
//! thin, deterministic wrapper around `secp256k1` (ECDSA) and `sha2`
//! (double-SHA-256), plus an aggregate-signature-set type whose on-wire
//! layout is left open (see DESIGN.md, Open Question 3).

use std::cmp::Ordering;
use std::fmt;

use secp256k1::ecdsa::Signature as EcdsaSignature;
use secp256k1::{Message, PublicKey as Secp256k1PublicKey, Secp256k1, SecretKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("malformed public key bytes")]
    MalformedPublicKey,
    #[error("malformed signature bytes")]
    MalformedSignature,
    #[error("signature does not verify")]
    InvalidSignature,
}

/// A compressed secp256k1 public key. Equality and ordering are by the raw
/// key bytes, never by any derived address — two `BftPublicKey`s are the same
/// validator iff their bytes match.
#[derive(Clone, Copy, Serialize, Deserialize)]
pub struct BftPublicKey(#[serde(with = "serde_bytes33")] [u8; 33]);

impl BftPublicKey {
    pub fn from_bytes(bytes: [u8; 33]) -> Result<Self, CryptoError> {
        Secp256k1PublicKey::from_slice(&bytes).map_err(|_| CryptoError::MalformedPublicKey)?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 33] {
        &self.0
    }

    fn to_secp(self) -> Secp256k1PublicKey {
        Secp256k1PublicKey::from_slice(&self.0).expect("validated at construction")
    }
}

impl fmt::Debug for BftPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BftPublicKey({})", hex_encode(&self.0))
    }
}

impl PartialEq for BftPublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}
impl Eq for BftPublicKey {}

impl PartialOrd for BftPublicKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for BftPublicKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}
impl std::hash::Hash for BftPublicKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.hash(state)
    }
}

/// A signing keypair. Produced by `generate()` for tests/tooling; production
/// key material is out of scope (§1: key storage/loading is peripheral).
#[derive(Clone)]
pub struct BftKeyPair {
    secret: SecretKey,
    public: BftPublicKey,
}

impl BftKeyPair {
    pub fn generate<R: rand::Rng + rand::CryptoRng>(rng: &mut R) -> Self {
        let secp = Secp256k1::new();
        let (secret, public) = secp.generate_keypair(rng);
        let bytes = public.serialize();
        Self {
            secret,
            public: BftPublicKey(bytes),
        }
    }

    /// Reconstructs a keypair from a raw 32-byte secret, for a node loading
    /// its persisted identity from disk rather than generating a fresh one.
    pub fn from_secret_bytes(bytes: &[u8; 32]) -> Result<Self, CryptoError> {
        let secret = SecretKey::from_slice(bytes).map_err(|_| CryptoError::MalformedPublicKey)?;
        let secp = Secp256k1::new();
        let public = Secp256k1PublicKey::from_secret_key(&secp, &secret);
        Ok(Self { secret, public: BftPublicKey(public.serialize()) })
    }

    pub fn to_secret_bytes(&self) -> [u8; 32] {
        self.secret.secret_bytes()
    }

    pub fn public(&self) -> BftPublicKey {
        self.public
    }

    /// Sign the hash-to-sign for `digest` (already the output of
    /// [`double_sha256`] or equivalent; this crate never hashes twice).
    pub fn sign(&self, digest: &[u8; 32]) -> BftSignature {
        let secp = Secp256k1::signing_only();
        let message = Message::from_digest_slice(digest).expect("32-byte digest");
        let sig = secp.sign_ecdsa(&message, &self.secret);
        BftSignature(sig.serialize_compact())
    }
}

/// A 64-byte compact ECDSA signature.
#[derive(Clone, Copy, Serialize, Deserialize)]
pub struct BftSignature(#[serde(with = "serde_bytes64")] [u8; 64]);

impl BftSignature {
    pub fn from_bytes(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }
}

impl fmt::Debug for BftSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BftSignature({})", hex_encode(&self.0))
    }
}

pub fn verify(
    signer: &BftPublicKey,
    digest: &[u8; 32],
    signature: &BftSignature,
) -> Result<(), CryptoError> {
    let secp = Secp256k1::verification_only();
    let message = Message::from_digest_slice(digest).map_err(|_| CryptoError::MalformedSignature)?;
    let sig =
        EcdsaSignature::from_compact(&signature.0).map_err(|_| CryptoError::MalformedSignature)?;
    secp.verify_ecdsa(&message, &sig, &signer.to_secp())
        .map_err(|_| CryptoError::InvalidSignature)
}

/// Double-SHA-256, the hash-to-sign used everywhere a "signed digest" is
/// needed (headers, vote data, ledger proofs).
pub fn double_sha256(bytes: &[u8]) -> [u8; 32] {
    let first = Sha256::digest(bytes);
    let second = Sha256::digest(first);
    second.into()
}

/// Single SHA-256, used for chaining the ledger accumulator — a single
/// round, deliberately not the double round `double_sha256` uses for signed
/// digests.
pub fn sha256(bytes: &[u8]) -> [u8; 32] {
    Sha256::digest(bytes).into()
}

/// An aggregate signature set: one (signer, signature) pair per voter,
/// sorted by signer key. Any deterministic, signature-set-equivalent wire
/// layout would do; we choose a sorted explicit list over a bitmap so that
/// the set survives validator-set membership changes without needing a
/// shared index space.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AggregateSignature {
    entries: Vec<(BftPublicKey, BftSignature)>,
}

impl AggregateSignature {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn add(&mut self, signer: BftPublicKey, signature: BftSignature) {
        match self.entries.binary_search_by_key(&signer, |(k, _)| *k) {
            Ok(_) => {}
            Err(pos) => self.entries.insert(pos, (signer, signature)),
        }
    }

    pub fn contains(&self, signer: &BftPublicKey) -> bool {
        self.entries.binary_search_by_key(signer, |(k, _)| *k).is_ok()
    }

    pub fn signers(&self) -> impl Iterator<Item = &BftPublicKey> {
        self.entries.iter().map(|(k, _)| k)
    }

    pub fn entries(&self) -> &[(BftPublicKey, BftSignature)] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Verifies every entry signs `digest` under the supplied key. Callers
    /// are responsible for checking that the signer set meets quorum.
    pub fn verify_all(&self, digest: &[u8; 32]) -> Result<(), CryptoError> {
        for (signer, sig) in &self.entries {
            verify(signer, digest, sig)?;
        }
        Ok(())
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

mod serde_bytes33 {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 33], s: S) -> Result<S::Ok, S::Error> {
        bytes.to_vec().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 33], D::Error> {
        let v = Vec::<u8>::deserialize(d)?;
        v.try_into()
            .map_err(|_| serde::de::Error::custom("expected 33 bytes"))
    }
}

mod serde_bytes64 {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 64], s: S) -> Result<S::Ok, S::Error> {
        bytes.to_vec().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 64], D::Error> {
        let v = Vec::<u8>::deserialize(d)?;
        v.try_into()
            .map_err(|_| serde::de::Error::custom("expected 64 bytes"))
    }
}
