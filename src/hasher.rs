//! Canonical content hashing using Blake3
//!
//! All hashes are computed over RFC 8785 canonical JSON bytes so that the
//! same value produces the same digest on every platform and every run,
//! regardless of map ordering or encoder quirks.

use blake3::Hasher as Blake3Hasher;
use serde::Serialize;

use crate::error::LedgerError;
use crate::types::ContentHash;

/// Fixed tag hashed to derive the chain genesis value
const GENESIS_TAG: &[u8] = b"ddge-ledger-genesis-v1";

/// ContentHasher provides canonical hashing for ledger and artifact content
#[derive(Debug, Clone, Default)]
pub struct ContentHasher {
    // Blake3 is stateless, a new hasher is created per digest
}

impl ContentHasher {
    /// Create a new ContentHasher
    pub fn new() -> Self {
        Self {}
    }

    /// Canonical JSON bytes (RFC 8785) for a serializable value
    pub fn canonical_bytes<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, LedgerError> {
        serde_jcs::to_vec(value).map_err(|e| LedgerError::Canonicalization {
            reason: e.to_string(),
        })
    }

    /// Hash a serializable value over its canonical JSON bytes
    pub fn hash_canonical<T: Serialize>(&self, value: &T) -> Result<ContentHash, LedgerError> {
        let bytes = self.canonical_bytes(value)?;
        Ok(self.hash_bytes(&bytes))
    }

    /// Hash raw bytes
    pub fn hash_bytes(&self, bytes: &[u8]) -> ContentHash {
        let mut hasher = Blake3Hasher::new();
        hasher.update(bytes);
        ContentHash(*hasher.finalize().as_bytes())
    }

    /// Extend a hash chain by one payload
    ///
    /// Computes `H(previous_chain_hash || payload)`, the ledger chain step.
    pub fn extend_chain(&self, previous: &ContentHash, payload: &[u8]) -> ContentHash {
        let mut hasher = Blake3Hasher::new();
        hasher.update(&previous.0);
        hasher.update(payload);
        ContentHash(*hasher.finalize().as_bytes())
    }

    /// The fixed genesis value the first chain hash derives from
    pub fn genesis(&self) -> ContentHash {
        self.hash_bytes(GENESIS_TAG)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_hash_consistency() {
        let hasher = ContentHasher::new();
        let value = json!({"credit_score": 720, "amount": 5000});

        let h1 = hasher.hash_canonical(&value).unwrap();
        let h2 = hasher.hash_canonical(&value).unwrap();

        assert_eq!(h1, h2, "Same value should produce same hash");
    }

    #[test]
    fn test_hash_is_key_order_independent() {
        let hasher = ContentHasher::new();
        let a: serde_json::Value =
            serde_json::from_str(r#"{"amount": 5000, "credit_score": 720}"#).unwrap();
        let b: serde_json::Value =
            serde_json::from_str(r#"{"credit_score": 720, "amount": 5000}"#).unwrap();

        assert_eq!(
            hasher.hash_canonical(&a).unwrap(),
            hasher.hash_canonical(&b).unwrap(),
            "Canonicalization should erase key ordering"
        );
    }

    #[test]
    fn test_hash_different_values() {
        let hasher = ContentHasher::new();
        let h1 = hasher.hash_canonical(&json!({"eligible": true})).unwrap();
        let h2 = hasher.hash_canonical(&json!({"eligible": false})).unwrap();

        assert_ne!(h1, h2);
    }

    #[test]
    fn test_extend_chain_order_matters() {
        let hasher = ContentHasher::new();
        let genesis = hasher.genesis();

        let chain_ab = hasher.extend_chain(&hasher.extend_chain(&genesis, b"a"), b"b");
        let chain_ba = hasher.extend_chain(&hasher.extend_chain(&genesis, b"b"), b"a");

        assert_ne!(chain_ab, chain_ba, "Chain order should matter");
    }

    #[test]
    fn test_genesis_is_fixed() {
        let hasher = ContentHasher::new();
        assert_eq!(hasher.genesis(), hasher.genesis());
        assert_ne!(hasher.genesis(), ContentHash::zero());
    }
}
