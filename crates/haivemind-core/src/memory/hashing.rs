//! Content normalization and hashing for deduplication.

use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization;

/// Normalize content before hashing: NFC-normalized, trimmed, internal
/// whitespace runs collapsed, lowercased. This is a hashing-only transform -
/// the stored `content` field keeps the caller's original text.
pub fn normalize_content(content: &str) -> String {
    let nfc: String = content.nfc().collect();
    nfc.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// 256-bit SHA-256 digest (hex-encoded) of the normalized content, used to
/// detect duplicate stores before a new row (and embedding) is created.
pub fn content_hash(content: &str) -> String {
    let normalized = normalize_content(content);
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    let digest = hasher.finalize();
    hex_encode(&digest)
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_content_hashes_identically() {
        assert_eq!(content_hash("hello world"), content_hash("hello world"));
    }

    #[test]
    fn whitespace_and_case_are_normalized_away() {
        assert_eq!(content_hash("Hello   World"), content_hash("hello world"));
        assert_eq!(content_hash("  hello world  "), content_hash("hello world"));
    }

    #[test]
    fn different_content_hashes_differently() {
        assert_ne!(content_hash("hello world"), content_hash("goodbye world"));
    }

    #[test]
    fn nfc_equivalent_forms_hash_identically() {
        // "e" + combining acute accent (NFD) vs precomposed "é" (NFC).
        let decomposed = "caf\u{0065}\u{0301}";
        let precomposed = "caf\u{00e9}";
        assert_eq!(content_hash(decomposed), content_hash(precomposed));
    }

    #[test]
    fn hash_is_hex_sha256_length() {
        assert_eq!(content_hash("anything").len(), 64);
    }
}
