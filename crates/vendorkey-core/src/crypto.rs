//! Signing primitive facade
//!
//! The orchestrator never does point arithmetic itself. It asks a
//! [`SigningPrimitives`] implementation for session keys, public points,
//! hash-to-point and point decompression. [`Secp256k1Primitives`] is the
//! bundled implementation over k256.

use base64::{engine::general_purpose::STANDARD, Engine};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use rand::rngs::OsRng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Error, Result};

/// Size of a compressed curve point
pub const POINT_SIZE: usize = 33;

/// Domain separation tag for hash-to-point
const H2P_DST: &[u8] = b"vendorkey-h2p-v1:";

/// Compressed public point (33 bytes)
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicPoint([u8; POINT_SIZE]);

impl PublicPoint {
    pub fn new(bytes: [u8; POINT_SIZE]) -> Self {
        Self(bytes)
    }

    /// Copy from a slice, checking only the length
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; POINT_SIZE] = bytes.try_into().map_err(|_| {
            Error::Crypto(format!(
                "Expected {} point bytes, got {}",
                POINT_SIZE,
                bytes.len()
            ))
        })?;
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; POINT_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let mut bytes = [0u8; POINT_SIZE];
        hex::decode_to_slice(s, &mut bytes).map_err(|e| Error::Crypto(e.to_string()))?;
        Ok(Self(bytes))
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0)
    }
}

impl fmt::Debug for PublicPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicPoint({})", self.to_hex())
    }
}

impl AsRef<[u8]> for PublicPoint {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Serialize for PublicPoint {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for PublicPoint {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Session secret scalar, wiped on drop
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionSecret([u8; 32]);

impl SessionSecret {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for SessionSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionSecret([REDACTED])")
    }
}

/// Ephemeral keypair used to bind one protocol session
#[derive(Debug, Clone)]
pub struct SessionKeypair {
    pub secret: SessionSecret,
    pub public: PublicPoint,
}

/// Curve operations consumed by the coordinators
pub trait SigningPrimitives: Send + Sync {
    /// Generate a fresh session keypair
    fn generate_session_keypair(&self) -> Result<SessionKeypair>;

    /// Derive the public point for a secret scalar
    fn derive_public_point(&self, secret: &SessionSecret) -> Result<PublicPoint>;

    /// Deterministically map arbitrary bytes to a curve point
    fn hash_to_point(&self, data: &[u8]) -> Result<PublicPoint>;

    /// Parse and validate an encoded point, returning its compressed form
    fn decompress_point(&self, bytes: &[u8]) -> Result<PublicPoint>;

    /// The curve's base point, compressed
    fn generator(&self) -> Result<PublicPoint>;

    /// Hash of the generator, published in fresh provider records so
    /// clients can tell the vendor has no verifying key yet
    fn obfuscated_generator(&self) -> Result<PublicPoint> {
        let generator = self.generator()?;
        self.hash_to_point(generator.as_bytes())
    }
}

/// secp256k1 implementation of the primitive facade
#[derive(Debug, Clone, Copy, Default)]
pub struct Secp256k1Primitives;

impl Secp256k1Primitives {
    pub fn new() -> Self {
        Self
    }

    fn compress(public: &k256::PublicKey) -> Result<PublicPoint> {
        PublicPoint::from_slice(public.to_encoded_point(true).as_bytes())
    }
}

impl SigningPrimitives for Secp256k1Primitives {
    fn generate_session_keypair(&self) -> Result<SessionKeypair> {
        let secret = k256::SecretKey::random(&mut OsRng);
        let public = Self::compress(&secret.public_key())?;
        let bytes: [u8; 32] = secret.to_bytes().into();
        Ok(SessionKeypair {
            secret: SessionSecret::new(bytes),
            public,
        })
    }

    fn derive_public_point(&self, secret: &SessionSecret) -> Result<PublicPoint> {
        let secret = k256::SecretKey::from_slice(secret.as_bytes())
            .map_err(|e| Error::Crypto(format!("Invalid session secret: {}", e)))?;
        Self::compress(&secret.public_key())
    }

    fn hash_to_point(&self, data: &[u8]) -> Result<PublicPoint> {
        // Try-and-increment: roughly half of all x coordinates are on the curve
        for counter in 0u32..=255 {
            let mut hasher = Sha256::new();
            hasher.update(H2P_DST);
            hasher.update(counter.to_be_bytes());
            hasher.update(data);
            let digest: [u8; 32] = hasher.finalize().into();

            let mut candidate = [0u8; POINT_SIZE];
            candidate[0] = 0x02;
            candidate[1..].copy_from_slice(&digest);

            if k256::PublicKey::from_sec1_bytes(&candidate).is_ok() {
                return Ok(PublicPoint::new(candidate));
            }
        }

        Err(Error::Crypto("Hash-to-point found no curve point".to_string()))
    }

    fn decompress_point(&self, bytes: &[u8]) -> Result<PublicPoint> {
        let public = k256::PublicKey::from_sec1_bytes(bytes)
            .map_err(|e| Error::Crypto(format!("Invalid curve point: {}", e)))?;
        Self::compress(&public)
    }

    fn generator(&self) -> Result<PublicPoint> {
        PublicPoint::from_slice(k256::AffinePoint::GENERATOR.to_encoded_point(true).as_bytes())
    }
}
