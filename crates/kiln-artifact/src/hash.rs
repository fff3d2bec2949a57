//! Content hashing primitives
//!
//! [`ContentHash`] is the 32-byte Blake3 digest used to address file sets and
//! versions. It renders as lowercase hex everywhere it leaves the process.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// A 32-byte Blake3 content hash
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Wrap raw digest bytes
    #[inline]
    #[must_use]
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Underlying bytes
    #[inline]
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Hash a byte slice
    #[inline]
    #[must_use]
    pub fn compute(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Hash the JSON encoding of a value
    ///
    /// # Errors
    /// Returns error if the value cannot be serialized
    pub fn compute_serializable<T: Serialize>(value: &T) -> Result<Self, HashError> {
        let json = serde_json::to_vec(value)?;
        Ok(Self::compute(&json))
    }

    /// First 16 hex characters, for logs and summaries
    #[inline]
    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

impl Display for ContentHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for ContentHash {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)?;
        let arr: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| HashError::InvalidLength {
                expected: 32,
                actual: bytes.len(),
            })?;
        Ok(Self(arr))
    }
}

impl TryFrom<String> for ContentHash {
    type Error = HashError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ContentHash> for String {
    fn from(hash: ContentHash) -> Self {
        hash.to_string()
    }
}

/// Incremental hasher for framed fields
///
/// Each field is prefixed with its length as a little-endian `u64`, so field
/// boundaries are unambiguous whatever bytes the fields contain.
#[derive(Debug, Default)]
pub struct FieldHasher {
    inner: blake3::Hasher,
}

impl FieldHasher {
    /// Start an empty hasher
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one field
    #[inline]
    pub fn field(&mut self, bytes: &[u8]) -> &mut Self {
        self.inner.update(&(bytes.len() as u64).to_le_bytes());
        self.inner.update(bytes);
        self
    }

    /// Finish and produce the digest
    #[inline]
    #[must_use]
    pub fn finish(&self) -> ContentHash {
        ContentHash(*self.inner.finalize().as_bytes())
    }
}

/// Errors that can occur when working with content hashes
#[derive(Debug, thiserror::Error)]
pub enum HashError {
    /// Invalid hash length
    #[error("invalid hash length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    /// Hex decoding error
    #[error("hex decode error: {0}")]
    HexDecode(#[from] hex::FromHexError),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compute_is_deterministic() {
        assert_eq!(ContentHash::compute(b"game"), ContentHash::compute(b"game"));
        assert_ne!(ContentHash::compute(b"game"), ContentHash::compute(b"gane"));
    }

    #[test]
    fn display_and_parse() {
        let hash = ContentHash::compute(b"index.html");
        let parsed: ContentHash = hash.to_string().parse().unwrap();
        assert_eq!(hash, parsed);
        assert!(hash.to_string().starts_with(&hash.short()));
    }

    #[test]
    fn parse_rejects_wrong_length() {
        let err = "abcd".parse::<ContentHash>().unwrap_err();
        assert!(matches!(err, HashError::InvalidLength { expected: 32, actual: 2 }));
    }

    #[test]
    fn serde_uses_hex_string() {
        let hash = ContentHash::compute(b"x");
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json, format!("\"{hash}\""));
        let back: ContentHash = serde_json::from_str(&json).unwrap();
        assert_eq!(back, hash);
    }

    #[test]
    fn field_hasher_separates_fields() {
        let a = FieldHasher::new().field(b"ab").field(b"c").finish();
        let b = FieldHasher::new().field(b"a").field(b"bc").finish();
        assert_ne!(a, b);
    }

    #[test]
    fn embedded_nul_does_not_shift_boundaries() {
        let a = FieldHasher::new().field(b"a").field(b"x\0b\0y").finish();
        let b = FieldHasher::new().field(b"a").field(b"x").field(b"b").field(b"y").finish();
        assert_ne!(a, b);

        let empty = FieldHasher::new().field(b"").finish();
        assert_ne!(empty, FieldHasher::new().finish());
    }
}
