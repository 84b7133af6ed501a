//! Domain-separated SHA-256.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// 32 byte SHA-256 digest.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({self})")
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form is enough to tell heads apart in logs
        f.write_str(&hex::encode(&self.0[..6]))
    }
}

/// Hash `data` under a domain `tag`.
///
/// The tag is length-prefixed so `("ab", "c")` and `("a", "bc")` differ.
pub fn hash(tag: &str, data: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update((tag.len() as u64).to_be_bytes());
    hasher.update(tag.as_bytes());
    hasher.update(data);
    Hash(hasher.finalize().into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_separates_domains() {
        assert_ne!(hash("ab", b"c"), hash("a", b"bc"));
        assert_eq!(hash("link", b"x"), hash("link", b"x"));
    }
}
