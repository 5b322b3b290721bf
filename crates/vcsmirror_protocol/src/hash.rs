//! Content hashing for file comparison.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::{self, Read};

/// A SHA-256 content digest (32 bytes).
///
/// File comparison during synchronization is content-addressed: a local
/// file matches the remote record exactly when their digests are equal.
/// Metadata (size, timestamps) is never consulted.
#[derive(Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Creates a hash from raw digest bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Computes the digest of a byte slice.
    pub fn digest(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Self(hasher.finalize().into())
    }

    /// Computes the digest of a stream.
    ///
    /// Reads to EOF in fixed-size chunks so large files are never held
    /// in memory whole.
    pub fn from_reader(mut reader: impl Read) -> io::Result<Self> {
        let mut hasher = Sha256::new();
        let mut buffer = [0u8; 8192];
        loop {
            let n = reader.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
        }
        Ok(Self(hasher.finalize().into()))
    }

    /// Returns the digest as a byte slice.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Renders the digest as lowercase hex.
    pub fn to_hex(&self) -> String {
        const HEX: &[u8] = b"0123456789abcdef";
        let mut out = String::with_capacity(64);
        for &byte in &self.0 {
            out.push(HEX[(byte >> 4) as usize] as char);
            out.push(HEX[(byte & 0xf) as usize] as char);
        }
        out
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self.to_hex())
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_deterministic() {
        let a = ContentHash::digest(b"hello");
        let b = ContentHash::digest(b"hello");
        let c = ContentHash::digest(b"world");

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn reader_matches_slice_digest() {
        let data = vec![0x5Au8; 20_000]; // spans multiple read chunks
        let from_slice = ContentHash::digest(&data);
        let from_reader = ContentHash::from_reader(&data[..]).unwrap();

        assert_eq!(from_slice, from_reader);
    }

    #[test]
    fn hex_rendering() {
        let hash = ContentHash::from_bytes([0xAB; 32]);
        assert_eq!(hash.to_hex().len(), 64);
        assert!(hash.to_hex().starts_with("abab"));
        assert_eq!(hash.to_string(), hash.to_hex());
    }
}
