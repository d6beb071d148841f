//! SHA-256 helpers used for content hashes and deterministic ids.

use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of the given bytes.
pub fn sha256_hex(bytes: impl AsRef<[u8]>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes.as_ref());
    hex_encode(hasher.finalize())
}

/// Hex-encoded SHA-256 over the canonical JSON of a value.
///
/// `serde_json` maps are ordered by key, so equal values always hash equally.
pub fn canonical_hash(value: &serde_json::Value) -> String {
    sha256_hex(value.to_string())
}

/// Hex-encoded SHA-256 over several parts, separated so `("ab","c")` and `("a","bc")` differ.
pub fn digest_parts<'a>(parts: impl IntoIterator<Item = &'a str>) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update((part.len() as u64).to_be_bytes());
        hasher.update(part.as_bytes());
    }
    hex_encode(hasher.finalize())
}

fn hex_encode(bytes: impl AsRef<[u8]>) -> String {
    bytes.as_ref().iter().map(|b| format!("{:02x}", b)).collect()
}
