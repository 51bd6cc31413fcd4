//! Activation code generation, hashing, and verification.
//!
//! Codes are short, high-entropy, human-transcribable strings. Only their
//! SHA-256 digest is persisted; verification recomputes the digest from the
//! submitted plaintext and compares in constant time.

use rand::RngExt;
use sha2::{Digest, Sha256};

use shadowlink_core::types::code::{normalize, CODE_ALPHABET, CODE_LENGTH};

/// Generate a fresh activation code.
///
/// Collisions are not expected in practice, but creation still re-checks
/// against the store's uniqueness constraint and retries on conflict.
pub fn generate() -> String {
    let mut rng = rand::rng();
    (0..CODE_LENGTH)
        .map(|_| {
            let idx = rng.random_range(0..CODE_ALPHABET.len());
            CODE_ALPHABET[idx] as char
        })
        .collect()
}

/// Hex SHA-256 digest of a normalized code.
///
/// Normalization (trim + uppercase) happens here, so whitespace and case
/// variations of the same code hash identically.
pub fn digest(code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize(code).as_bytes());
    hex::encode(hasher.finalize())
}

/// Verify a plaintext code against a stored digest in constant time.
///
/// Fails closed: any malformed input compares unequal.
pub fn verify(plain: &str, stored_digest: &str) -> bool {
    constant_time_eq(digest(plain).as_bytes(), stored_digest.as_bytes())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use shadowlink_core::types::code::looks_like_digest;

    #[test]
    fn test_generated_codes_have_expected_shape() {
        for _ in 0..100 {
            let code = generate();
            assert_eq!(code.len(), CODE_LENGTH);
            assert!(code.bytes().all(|b| CODE_ALPHABET.contains(&b)));
            // A code must never be mistaken for a stored digest.
            assert!(!looks_like_digest(&code));
        }
    }

    #[test]
    fn test_digest_normalizes_input() {
        let code = generate();
        let spaced = format!("  {} ", code.to_lowercase());
        assert_eq!(digest(&code), digest(&spaced));
    }

    #[test]
    fn test_verify_round_trip() {
        let code = generate();
        let stored = digest(&code);
        assert!(verify(&code, &stored));
        assert!(verify(&format!(" {} ", code.to_lowercase()), &stored));

        let other = generate();
        assert!(!verify(&other, &stored));
    }

    #[test]
    fn test_verify_fails_closed_on_malformed_digest() {
        let code = generate();
        assert!(!verify(&code, ""));
        assert!(!verify(&code, "not-a-digest"));
    }
}
