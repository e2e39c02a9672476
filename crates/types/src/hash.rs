//! Keyed Blake3 hashing.
//!
//! Used wherever the simulator needs reproducible pseudo-randomness keyed by
//! a string: orphan fact names, and RNG seeds derived from a certname.

use std::fmt;

/// Blake3 digest of a string key.
///
/// The same key hashes to the same value on every run and platform.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash([u8; 32]);

impl Hash {
    /// Hash the UTF-8 bytes of `key`.
    pub fn of_key(key: &str) -> Self {
        Self(*blake3::hash(key.as_bytes()).as_bytes())
    }

    /// The full digest, usable directly as a 32-byte RNG seed.
    pub fn seed(self) -> [u8; 32] {
        self.0
    }

    /// Lowercase hex of the full digest.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Hex of the first 8 bytes. Short enough for a map key, long enough
    /// that collisions within one document don't happen in practice.
    pub fn short_hex(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.short_hex())
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}
