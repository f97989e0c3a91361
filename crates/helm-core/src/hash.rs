//! SHA-256 hashing helpers for prompt hashes and source fingerprints.

use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of `input`.
#[must_use]
pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Short (16 hex char) SHA-256 prefix, for cache keys and log lines.
#[must_use]
pub fn sha256_short(input: &str) -> String {
    let mut full = sha256_hex(input);
    full.truncate(16);
    full
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vector() {
        assert_eq!(
            sha256_hex(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn short_is_prefix() {
        let full = sha256_hex("hello");
        let short = sha256_short("hello");
        assert_eq!(short.len(), 16);
        assert!(full.starts_with(&short));
    }

    #[test]
    fn distinct_inputs_distinct_hashes() {
        assert_ne!(sha256_hex("a"), sha256_hex("b"));
    }
}
