//! Identifier and token newtypes

use base64::{engine::general_purpose::STANDARD, Engine};
use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::crypto::PublicPoint;
use crate::error::{Error, Result};

/// Vendor identifier allocated by the backend for one rotating key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VendorId(String);

impl VendorId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VendorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Verifying key identifier
///
/// Fresh identifiers are random 128-bit integers rendered in decimal, which
/// is the form the key nodes index verifying keys by.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VvkId(String);

impl VvkId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Allocate a fresh random identifier
    pub fn random() -> Self {
        let value: u128 = rand::thread_rng().gen();
        Self(value.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VvkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Rotating public key (VRK), stored as a hex-encoded compressed point
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RotatingKey(String);

impl RotatingKey {
    /// Wrap an already hex-encoded key
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn from_point(point: &PublicPoint) -> Self {
        Self(point.to_hex())
    }

    pub fn as_hex(&self) -> &str {
        &self.0
    }

    /// Decode the compressed point bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        hex::decode(&self.0)
            .map_err(|e| Error::Crypto(format!("Invalid rotating key hex: {}", e)))
    }

    /// True for a non-empty, even-length hex string
    pub fn is_well_formed(&self) -> bool {
        !self.0.is_empty()
            && self.0.len() % 2 == 0
            && self.0.bytes().all(|b| b.is_ascii_hexdigit())
    }

    /// Short display format (first 8 characters)
    pub fn short(&self) -> &str {
        match self.0.char_indices().nth(8) {
            Some((end, _)) => &self.0[..end],
            None => &self.0,
        }
    }
}

impl fmt::Display for RotatingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Backend-issued proof binding a payload to an authorization decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuthorizationProof(String);

impl AuthorizationProof {
    pub fn new(proof: impl Into<String>) -> Self {
        Self(proof.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Signature produced by the threshold signing flow
#[derive(Clone, PartialEq, Eq)]
pub struct Signature(Vec<u8>);

impl Signature {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    pub fn from_hex(s: &str) -> std::result::Result<Self, hex::FromHexError> {
        Ok(Self(hex::decode(s)?))
    }

    /// Base64 form used when storing signatures in identity provider config
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.0)
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", self.to_hex())
    }
}

impl Serialize for Signature {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

impl AsRef<[u8]> for Signature {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_vvk_ids_are_decimal_and_distinct() {
        let a = VvkId::random();
        let b = VvkId::random();
        assert_ne!(a, b);
        assert!(a.as_str().chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_signature_serde_as_hex() {
        let sig = Signature::new(vec![0xde, 0xad, 0xbe, 0xef]);
        let json = serde_json::to_string(&sig).unwrap();
        assert_eq!(json, "\"deadbeef\"");
        let back: Signature = serde_json::from_str(&json).unwrap();
        assert_eq!(back, sig);
    }

    #[test]
    fn test_rotating_key_rejects_bad_hex() {
        let key = RotatingKey::from_hex("zz");
        assert!(matches!(key.to_bytes(), Err(Error::Crypto(_))));
    }

    #[test]
    fn test_rotating_key_short() {
        assert_eq!(RotatingKey::from_hex("02abcdef0123").short(), "02abcdef");
        assert_eq!(RotatingKey::from_hex("02ab").short(), "02ab");
        assert_eq!(RotatingKey::from_hex("aéééééééééé").short(), "aééééééé");
    }

    #[test]
    fn test_rotating_key_well_formed() {
        assert!(RotatingKey::from_hex("02AbCd").is_well_formed());
        assert!(!RotatingKey::from_hex("").is_well_formed());
        assert!(!RotatingKey::from_hex("02a").is_well_formed());
        assert!(!RotatingKey::from_hex("aéééé").is_well_formed());
    }
}
