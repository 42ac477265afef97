// Content fingerprints for history entries.
// The 64-bit form is the cache key and the cross-reference id stored in
// next_entry_fps. The 32-bit form is only read while migrating old files.

use std::hash::Hasher;

use fxhash::FxHasher32;

/// Separator between key and value. Keys/values are not escaped.
const SEPARATOR: u8 = b'\t';

/// 64-bit fingerprint of `key + '\t' + value`.
pub fn fingerprint(key: &str, value: &str) -> u64 {
    fingerprint_bytes(key.as_bytes(), value.as_bytes())
}

/// Same as [`fingerprint`] over raw bytes, for records not yet validated as text.
pub fn fingerprint_bytes(key: &[u8], value: &[u8]) -> u64 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(key);
    hasher.update(&[SEPARATOR]);
    hasher.update(value);
    let digest = hasher.finalize();
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest.as_bytes()[..8]);
    u64::from_le_bytes(head)
}

/// Pre-migration 32-bit fingerprint. Do not use for new references.
pub fn legacy_fingerprint32(key: &str, value: &str) -> u32 {
    legacy_fingerprint32_bytes(key.as_bytes(), value.as_bytes())
}

pub fn legacy_fingerprint32_bytes(key: &[u8], value: &[u8]) -> u32 {
    let mut joined = Vec::with_capacity(key.len() + 1 + value.len());
    joined.extend_from_slice(key);
    joined.push(SEPARATOR);
    joined.extend_from_slice(value);
    // One raw write, no length prefix. FxHasher32 consumes 4-byte words, so
    // splitting the input across writes would change the result.
    let mut hasher = FxHasher32::default();
    hasher.write(&joined);
    hasher.finish() as u32
}
