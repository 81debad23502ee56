//! SHA-256 hashing helpers.
//!
//! Block hashes, transaction ids, merkle nodes and memory DAG seals all use
//! SHA-256 over canonical byte encodings.

use sha2::{Digest, Sha256};

/// SHA-256 digest as raw bytes.
pub fn sha256_raw(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// SHA-256 digest as a lowercase hex string.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256_raw(data))
}

/// The all-zero hash used as the genesis block's previous hash.
pub fn zero_hash() -> String {
    "0".repeat(64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digest() {
        // SHA-256("abc") test vector
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_zero_hash_is_64_chars() {
        assert_eq!(zero_hash().len(), 64);
        assert!(zero_hash().chars().all(|c| c == '0'));
    }
}
