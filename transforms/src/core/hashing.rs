//! Content hashing for identities and fingerprints.

use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

/// A SHA-256 digest used for invocation identities and file fingerprints.
///
/// Displayed and serialized as lowercase hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HashCode([u8; 32]);

impl HashCode {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Digest of a single byte slice.
    pub fn of(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for HashCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for HashCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HashCode({})", self)
    }
}

impl Serialize for HashCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for HashCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        let bytes = hex::decode(&text).map_err(D::Error::custom)?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| D::Error::custom("expected a 32-byte digest"))?;
        Ok(Self(bytes))
    }
}

/// Incremental writer producing a collision-resistant digest.
///
/// Variable-length fields are length-prefixed so that distinct field
/// sequences cannot collide by concatenation.
pub struct Hasher {
    digest: Sha256,
}

impl Hasher {
    pub fn new() -> Self {
        Self {
            digest: Sha256::new(),
        }
    }

    pub fn put_str(&mut self, value: &str) {
        self.put_bytes(value.as_bytes());
    }

    pub fn put_bytes(&mut self, value: &[u8]) {
        self.digest.update((value.len() as u64).to_le_bytes());
        self.digest.update(value);
    }

    /// Fixed-width, so no length prefix.
    pub fn put_hash(&mut self, hash: &HashCode) {
        self.digest.update(hash.as_bytes());
    }

    pub fn finish(self) -> HashCode {
        HashCode(self.digest.finalize().into())
    }
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_deterministic() {
        let mut a = Hasher::new();
        a.put_str("input");
        a.put_hash(&HashCode::of(b"dep"));
        let mut b = Hasher::new();
        b.put_str("input");
        b.put_hash(&HashCode::of(b"dep"));
        assert_eq!(a.finish(), b.finish());
    }

    #[test]
    fn field_boundaries_do_not_collide() {
        let mut a = Hasher::new();
        a.put_str("ab");
        a.put_str("c");
        let mut b = Hasher::new();
        b.put_str("a");
        b.put_str("bc");
        assert_ne!(a.finish(), b.finish());
    }

    #[test]
    fn display_is_64_hex_chars() {
        let rendered = HashCode::of(b"x").to_string();
        assert_eq!(rendered.len(), 64);
        assert!(rendered.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn serde_round_trips_as_hex() {
        let hash = HashCode::of(b"payload");
        let json = serde_json::to_string(&hash).expect("serialize");
        assert_eq!(json, format!("\"{hash}\""));
        let back: HashCode = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, hash);
    }
}
