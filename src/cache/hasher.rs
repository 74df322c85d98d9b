//! Content fingerprinting.
//!
//! Produces the validator stored alongside each cache entry and emitted to
//! clients as an ETag-equivalent. The validator is always computed over the
//! uncompressed payload.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use sha2::{Digest, Sha256};

/// Compute a deterministic fingerprint of `content`.
///
/// SHA-256, base64-encoded: 44 characters, stable across processes and
/// restarts.
pub fn hash(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    STANDARD.encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_across_calls() {
        assert_eq!(hash(b"payload"), hash(b"payload"));
    }

    #[test]
    fn distinct_content_distinct_hash() {
        assert_ne!(hash(b"payload-a"), hash(b"payload-b"));
    }

    #[test]
    fn fixed_output_length() {
        // 32 digest bytes -> 44 base64 chars, regardless of input size.
        assert_eq!(hash(b"").len(), 44);
        assert_eq!(hash(&[0u8; 4096]).len(), 44);
    }
}
