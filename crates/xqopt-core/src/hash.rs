//! blake3 digests for plan fingerprints and optimization reports.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::error::Result;

/// A 32-byte blake3 digest. Serialized as lowercase hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self(*blake3::hash(bytes).as_bytes())
    }

    /// Digest of `self` followed by `other`. Order matters.
    pub fn chain(&self, other: &Hash256) -> Self {
        let mut h = blake3::Hasher::new();
        h.update(&self.0);
        h.update(&other.0);
        Self(*h.finalize().as_bytes())
    }

    pub fn to_hex(&self) -> String {
        blake3::Hash::from(self.0).to_hex().to_string()
    }

    /// Leading 12 hex digits, enough for log lines.
    pub fn short(&self) -> String {
        let mut hex = self.to_hex();
        hex.truncate(12);
        hex
    }
}

impl std::fmt::Display for Hash256 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for Hash256 {
    fn serialize<S: Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash256 {
    fn deserialize<D: Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let hex = String::deserialize(d)?;
        let hash = blake3::Hash::from_hex(hex.as_str()).map_err(de::Error::custom)?;
        Ok(Self(*hash.as_bytes()))
    }
}

/// Digest a value through its JSON form. Map-typed fields must iterate in a
/// stable order for the digest to be reproducible.
pub fn digest_of<T: Serialize>(value: &T) -> Result<Hash256> {
    let bytes = serde_json::to_vec(value)?;
    Ok(Hash256::of_bytes(&bytes))
}
