//! Activation-code value rules.
//!
//! An activation code is a fixed-length uppercase alphanumeric string; its
//! stored form is a fixed-length lowercase hex SHA-256 digest. The two are
//! distinguishable by length and charset alone, which lets a single submit
//! field accept either form without ambiguity.

/// Length of a plaintext activation code.
pub const CODE_LENGTH: usize = 16;

/// Length of a hex-encoded SHA-256 code digest.
pub const DIGEST_LENGTH: usize = 64;

/// Alphabet used when generating activation codes.
pub const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// A submitted credential, classified by form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmittedCode {
    /// A stored-form digest (64 hex chars), used directly for lookup.
    Digest(String),
    /// A plaintext code, normalized; must be hashed before lookup.
    Plain(String),
}

impl SubmittedCode {
    /// Classify raw input as a digest or a plaintext code.
    ///
    /// Digest detection is exact: length and hex charset must both match,
    /// so a plaintext code can never be mistaken for a digest.
    pub fn classify(raw: &str) -> Self {
        let trimmed = raw.trim();
        if looks_like_digest(trimmed) {
            Self::Digest(trimmed.to_ascii_lowercase())
        } else {
            Self::Plain(normalize(trimmed))
        }
    }
}

/// Normalize a plaintext code: trim whitespace, fold to uppercase.
///
/// Whitespace and case variations of the same code normalize (and hence
/// hash) identically.
pub fn normalize(raw: &str) -> String {
    raw.trim().to_uppercase()
}

/// Whether the input has the exact shape of a stored code digest.
pub fn looks_like_digest(input: &str) -> bool {
    input.len() == DIGEST_LENGTH && input.bytes().all(|b| b.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("  ab12cd34ef56gh78 "), "AB12CD34EF56GH78");
        assert_eq!(normalize("AB12CD34EF56GH78"), "AB12CD34EF56GH78");
    }

    #[test]
    fn test_digest_detection() {
        let digest = "a".repeat(64);
        assert!(looks_like_digest(&digest));
        assert!(!looks_like_digest(&"a".repeat(63)));
        assert!(!looks_like_digest(&"g".repeat(64)));
        assert!(!looks_like_digest("AB12CD34EF56GH78"));
    }

    #[test]
    fn test_classify() {
        let digest = "0123456789abcdef".repeat(4);
        assert_eq!(
            SubmittedCode::classify(&digest.to_uppercase()),
            SubmittedCode::Digest(digest)
        );
        assert_eq!(
            SubmittedCode::classify(" ab12cd34ef56gh78 "),
            SubmittedCode::Plain("AB12CD34EF56GH78".to_string())
        );
    }
}
