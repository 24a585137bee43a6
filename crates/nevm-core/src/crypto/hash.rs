use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// A 32-byte hash, stored in wire (little-endian) order
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    pub const ZERO: Hash = Hash([0u8; 32]);
    pub const LEN: usize = 32;

    pub fn new(data: [u8; 32]) -> Self {
        Hash(data)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    pub fn from_slice(slice: &[u8]) -> Option<Self> {
        if slice.len() != Self::LEN {
            return None;
        }
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(slice);
        Some(Hash(bytes))
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        Self::from_slice(&bytes).ok_or(hex::FromHexError::InvalidStringLength)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Hex of the value read as a little-endian 256-bit integer
    /// (most significant byte first), the way uint256 values are displayed.
    pub fn to_uint256_hex(&self) -> String {
        let mut reversed = self.0;
        reversed.reverse();
        hex::encode(reversed)
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.to_hex())
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl From<[u8; 32]> for Hash {
    fn from(bytes: [u8; 32]) -> Self {
        Hash(bytes)
    }
}

/// Single SHA-256
pub fn hash_sha256(data: &[u8]) -> Hash {
    Hash(Sha256::digest(data).into())
}

/// SHA-256 applied twice
pub fn hash_sha256d(data: &[u8]) -> Hash {
    let first = Sha256::digest(data);
    Hash(Sha256::digest(first).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_sha256d_known_vector() {
        // sha256d("") is a well-known constant
        let hash = hash_sha256d(b"");
        assert_eq!(
            hash.to_hex(),
            "5df6e0e2761359d30a8275058e299fcc0381534545f55cf43e41983f5d4c9456"
        );
    }

    #[test]
    fn test_hash_deterministic() {
        let data = b"test data";
        assert_eq!(hash_sha256d(data), hash_sha256d(data));
        assert_ne!(hash_sha256d(data), hash_sha256(data));
    }

    #[test]
    fn test_is_zero() {
        assert!(Hash::ZERO.is_zero());
        assert!(!hash_sha256(b"x").is_zero());
    }

    #[test]
    fn test_uint256_hex_is_reversed() {
        let mut bytes = [0u8; 32];
        bytes[0] = 0x01;
        let hash = Hash::new(bytes);
        assert!(hash.to_hex().starts_with("01"));
        assert!(hash.to_uint256_hex().ends_with("01"));
    }

    #[test]
    fn test_hash_hex_roundtrip() {
        let hash = hash_sha256d(b"test");
        let recovered = Hash::from_hex(&hash.to_hex()).unwrap();
        assert_eq!(hash, recovered);
    }

    #[test]
    fn test_from_slice_wrong_length() {
        assert!(Hash::from_slice(&[0u8; 31]).is_none());
    }
}
