// Copyright (c) 2025 Crest Developers

//! Primitive cryptographic types: digests, block signatures, key pairs and
//! the 26-byte account address format.

use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest as _, Sha256};
use std::fmt;

pub const DIGEST_SIZE: usize = 32;
pub const SIGNATURE_SIZE: usize = 64;
pub const PUBLIC_KEY_SIZE: usize = 32;
pub const SECRET_KEY_SIZE: usize = 32;
pub const ADDRESS_SIZE: usize = 26;

/// Address layout: version byte, chain scheme byte, 20 bytes of public key
/// hash, 4 bytes of checksum.
const ADDRESS_VERSION: u8 = 1;
const ADDRESS_HASH_SIZE: usize = 20;
const ADDRESS_CHECKSUM_SIZE: usize = 4;

/// A 32-byte hash output, used for transaction and asset identifiers.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Digest(pub [u8; DIGEST_SIZE]);

impl Digest {
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        let arr: [u8; DIGEST_SIZE] = data.try_into().ok()?;
        Some(Digest(arr))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", hex::encode(&self.0[0..8]))
    }
}

/// Compute a SHA-256 digest over arbitrary bytes.
pub fn digest(data: &[u8]) -> Digest {
    let mut hasher = Sha256::new();
    hasher.update(data);
    Digest(hasher.finalize().into())
}

/// A 64-byte block or transaction signature. The block signature doubles as
/// the block identity.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockSignature(pub [u8; SIGNATURE_SIZE]);

impl BlockSignature {
    pub const ZERO: BlockSignature = BlockSignature([0u8; SIGNATURE_SIZE]);

    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        let arr: [u8; SIGNATURE_SIZE] = data.try_into().ok()?;
        Some(BlockSignature(arr))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; SIGNATURE_SIZE]
    }
}

impl fmt::Display for BlockSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0[0..8]))
    }
}

impl fmt::Debug for BlockSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockSignature({})", hex::encode(&self.0[0..8]))
    }
}

// serde only derives array impls up to 32 elements, so the 64-byte
// signature serialises as a byte string.
impl Serialize for BlockSignature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.0)
    }
}

struct SignatureVisitor;

impl<'de> Visitor<'de> for SignatureVisitor {
    type Value = BlockSignature;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a 64-byte signature")
    }

    fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Self::Value, E> {
        BlockSignature::from_bytes(v)
            .ok_or_else(|| E::invalid_length(v.len(), &"64 bytes"))
    }

    fn visit_seq<A: de::SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
        let mut buf = [0u8; SIGNATURE_SIZE];
        for (i, slot) in buf.iter_mut().enumerate() {
            *slot = seq
                .next_element()?
                .ok_or_else(|| de::Error::invalid_length(i, &"64 bytes"))?;
        }
        Ok(BlockSignature(buf))
    }
}

impl<'de> Deserialize<'de> for BlockSignature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_bytes(SignatureVisitor)
    }
}

/// An ed25519 public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey(pub [u8; PUBLIC_KEY_SIZE]);

impl PublicKey {
    pub const ZERO: PublicKey = PublicKey([0u8; PUBLIC_KEY_SIZE]);

    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        let arr: [u8; PUBLIC_KEY_SIZE] = data.try_into().ok()?;
        Some(PublicKey(arr))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; PUBLIC_KEY_SIZE]
    }

    /// Verify an ed25519 signature over `message`.
    pub fn verify(&self, message: &[u8], signature: &BlockSignature) -> bool {
        let Ok(vk) = VerifyingKey::from_bytes(&self.0) else {
            return false;
        };
        let sig = ed25519_dalek::Signature::from_bytes(&signature.0);
        vk.verify(message, &sig).is_ok()
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0[0..8]))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", hex::encode(&self.0[0..8]))
    }
}

/// A signing key pair held by the miner.
#[derive(Clone)]
pub struct KeyPair {
    signing: SigningKey,
    public: PublicKey,
}

impl KeyPair {
    pub fn from_seed(seed: [u8; SECRET_KEY_SIZE]) -> Self {
        let signing = SigningKey::from_bytes(&seed);
        let public = PublicKey(signing.verifying_key().to_bytes());
        Self { signing, public }
    }

    pub fn generate<R: rand::RngCore + rand::CryptoRng>(rng: &mut R) -> Self {
        let mut seed = [0u8; SECRET_KEY_SIZE];
        rng.fill_bytes(&mut seed);
        Self::from_seed(seed)
    }

    pub fn public(&self) -> PublicKey {
        self.public
    }

    pub fn sign(&self, message: &[u8]) -> BlockSignature {
        BlockSignature(self.signing.sign(message).to_bytes())
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyPair({})", self.public)
    }
}

/// A 26-byte account address derived from a public key and a chain scheme.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address(pub [u8; ADDRESS_SIZE]);

impl Address {
    pub fn from_public_key(scheme: u8, pk: &PublicKey) -> Self {
        let pk_hash = digest(pk.as_bytes());
        let mut buf = [0u8; ADDRESS_SIZE];
        buf[0] = ADDRESS_VERSION;
        buf[1] = scheme;
        buf[2..2 + ADDRESS_HASH_SIZE].copy_from_slice(&pk_hash.0[..ADDRESS_HASH_SIZE]);
        let checksum = digest(&buf[..2 + ADDRESS_HASH_SIZE]);
        buf[2 + ADDRESS_HASH_SIZE..].copy_from_slice(&checksum.0[..ADDRESS_CHECKSUM_SIZE]);
        Address(buf)
    }

    /// Parse an address from raw bytes, verifying version and checksum.
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        let arr: [u8; ADDRESS_SIZE] = data.try_into().ok()?;
        let addr = Address(arr);
        if addr.is_valid() {
            Some(addr)
        } else {
            None
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_valid(&self) -> bool {
        if self.0[0] != ADDRESS_VERSION {
            return false;
        }
        let checksum = digest(&self.0[..2 + ADDRESS_HASH_SIZE]);
        self.0[2 + ADDRESS_HASH_SIZE..] == checksum.0[..ADDRESS_CHECKSUM_SIZE]
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", hex::encode(&self.0[0..8]))
    }
}
