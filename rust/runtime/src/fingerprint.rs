//! Stable state fingerprints.
//!
//! `std::hash::Hash` is implemented by every runtime component over exactly
//! the fields that affect future behavior. [`Fingerprint`] feeds that stream
//! through SHA-256 so explorers get a collision-resistant, platform-stable
//! digest instead of a 64-bit `DefaultHasher` value.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// SHA-256 digest of a runtime state.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Fingerprint any hashable value.
    #[must_use]
    pub fn of<T: Hash + ?Sized>(value: &T) -> Self {
        let mut hasher = Sha256Hasher::default();
        value.hash(&mut hasher);
        hasher.finish_digest()
    }

    /// Raw digest bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex rendering.
    #[must_use]
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Adapter from `std::hash::Hasher` writes to a SHA-256 stream.
#[derive(Default, Clone)]
struct Sha256Hasher {
    inner: Sha256,
}

impl Sha256Hasher {
    fn finish_digest(self) -> Fingerprint {
        Fingerprint(self.inner.finalize().into())
    }
}

impl Hasher for Sha256Hasher {
    fn write(&mut self, bytes: &[u8]) {
        self.inner.update(bytes);
    }

    // Hasher requires a u64; use the digest prefix.
    fn finish(&self) -> u64 {
        let digest = self.inner.clone().finalize();
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        u64::from_le_bytes(prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equal_values_equal_fingerprints() {
        assert_eq!(Fingerprint::of(&(1u8, "a")), Fingerprint::of(&(1u8, "a")));
        assert_ne!(Fingerprint::of(&(1u8, "a")), Fingerprint::of(&(2u8, "a")));
    }

    #[test]
    fn test_hex_is_64_chars() {
        let fp = Fingerprint::of("state");
        assert_eq!(fp.to_hex().len(), 64);
        assert_eq!(fp.to_string(), fp.to_hex());
    }
}
