//! BLS12-381 keys and signatures.
//!
//! Every consensus message is signed with BLS so that votes for the same
//! digest can be aggregated into a single quorum proof. Keys use the
//! "minimal public key" variant (48-byte public keys, 96-byte signatures).

use sbor::prelude::*;
use std::fmt;

/// Ciphersuite tag for all consensus signatures.
const BLS_DST: &[u8] = b"BLS_SIG_BLS12381G2_XMD:SHA-256_SSWU_RO_NUL_";

/// A BLS secret key used to sign consensus messages.
#[derive(Clone)]
pub struct KeyPair(blst::min_pk::SecretKey);

impl KeyPair {
    /// Generate a new random keypair.
    pub fn generate() -> Self {
        let mut ikm = [0u8; 32];
        rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut ikm);
        Self::from_seed(&ikm)
    }

    /// Derive a keypair from a 32-byte seed (for testing/simulation).
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        // key_gen only rejects input key material shorter than 32 bytes.
        let sk = blst::min_pk::SecretKey::key_gen(seed, &[])
            .expect("32 bytes of key material is always accepted");
        KeyPair(sk)
    }

    /// Sign a message.
    pub fn sign(&self, message: &[u8]) -> Signature {
        let sig = self.0.sign(message, BLS_DST, &[]);
        Signature(sig.to_bytes().to_vec())
    }

    /// Get the public key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.0.sk_to_pk().to_bytes().to_vec())
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyPair({:?})", self.public_key())
    }
}

/// A compressed BLS public key.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, BasicSbor)]
#[sbor(transparent)]
pub struct PublicKey(Vec<u8>);

impl PublicKey {
    /// Wrap compressed public key bytes. Validity is checked on use.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        PublicKey(bytes)
    }

    /// Get the compressed key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Verify a signature over `message`.
    ///
    /// Malformed keys or signatures verify as `false`.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        let pk = match blst::min_pk::PublicKey::from_bytes(&self.0) {
            Ok(pk) => pk,
            Err(_) => return false,
        };
        let sig = match blst::min_pk::Signature::from_bytes(&signature.0) {
            Ok(sig) => sig,
            Err(_) => return false,
        };
        sig.verify(true, message, BLS_DST, &[], &pk, true) == blst::BLST_ERROR::BLST_SUCCESS
    }

    /// Aggregate multiple public keys into one.
    ///
    /// Committee keys are assumed to carry a proof of possession, which is what
    /// makes same-message aggregation safe against rogue keys.
    pub fn aggregate(pubkeys: &[PublicKey]) -> Result<Self, AggregateError> {
        if pubkeys.is_empty() {
            return Err(AggregateError::Empty);
        }

        let keys = pubkeys
            .iter()
            .map(|pk| blst::min_pk::PublicKey::from_bytes(&pk.0))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| AggregateError::InvalidEncoding)?;

        let refs: Vec<&blst::min_pk::PublicKey> = keys.iter().collect();
        let agg = blst::min_pk::AggregatePublicKey::aggregate(&refs, true)
            .map_err(|_| AggregateError::AggregationFailed)?;

        Ok(PublicKey(agg.to_public_key().to_bytes().to_vec()))
    }

    /// Verify an aggregated signature made by `pubkeys` over the same `message`.
    pub fn verify_aggregate(pubkeys: &[PublicKey], message: &[u8], signature: &Signature) -> bool {
        match Self::aggregate(pubkeys) {
            Ok(agg) => agg.verify(message, signature),
            Err(_) => false,
        }
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = hex::encode(&self.0);
        if hex.len() < 16 {
            return write!(f, "PublicKey({})", hex);
        }
        write!(f, "PublicKey({}..{})", &hex[..8], &hex[hex.len() - 8..])
    }
}

/// A BLS signature (single or aggregated).
#[derive(Clone, PartialEq, Eq, BasicSbor)]
#[sbor(transparent)]
pub struct Signature(Vec<u8>);

impl Signature {
    /// Length of a compressed signature.
    pub const BYTES: usize = 96;

    /// Create a zero/placeholder signature for unsigned fixtures.
    pub fn zero() -> Self {
        Signature(vec![0u8; Self::BYTES])
    }

    /// Wrap raw signature bytes. Validity is checked on use.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Signature(bytes)
    }

    /// Get signature as byte slice.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Aggregate multiple signatures over the same message.
    pub fn aggregate(signatures: &[Signature]) -> Result<Self, AggregateError> {
        if signatures.is_empty() {
            return Err(AggregateError::Empty);
        }

        let sigs = signatures
            .iter()
            .map(|s| blst::min_pk::Signature::from_bytes(&s.0))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| AggregateError::InvalidEncoding)?;

        let refs: Vec<&blst::min_pk::Signature> = sigs.iter().collect();
        let agg = blst::min_pk::AggregateSignature::aggregate(&refs, true)
            .map_err(|_| AggregateError::AggregationFailed)?;

        Ok(Signature(agg.to_signature().to_bytes().to_vec()))
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = hex::encode(&self.0);
        write!(f, "Signature({}..)", &hex[..hex.len().min(16)])
    }
}

/// Errors that can occur during aggregation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AggregateError {
    /// Empty list provided.
    #[error("Cannot aggregate empty list")]
    Empty,

    /// One of the inputs is not a valid point encoding.
    #[error("Invalid BLS encoding in aggregation input")]
    InvalidEncoding,

    /// Aggregation operation failed.
    #[error("Aggregation failed")]
    AggregationFailed,
}
