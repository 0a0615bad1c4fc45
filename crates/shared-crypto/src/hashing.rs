//! SHA-256 hashing over raw bytes and canonical JSON.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::errors::CryptoError;

/// SHA-256 hash output (256-bit).
pub type Hash = [u8; 32];

/// Hash raw bytes with SHA-256.
pub fn sha256(data: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// SHA-256 as a lowercase hex string (64 chars).
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

/// SHA-256 over the canonical JSON form of a value, hex-encoded.
///
/// Canonical form is RFC 8785: object keys sorted lexicographically, no
/// whitespace. Every hashed serialization in the core (audit events, policy
/// snapshots, permit content, audit packages) goes through this single
/// function so that re-verification reproduces the stored digest.
pub fn canonical_json_sha256<T: Serialize>(value: &T) -> Result<String, CryptoError> {
    let canonical = serde_jcs::to_string(value).map_err(|e| CryptoError::Canonical(e.to_string()))?;
    Ok(sha256_hex(canonical.as_bytes()))
}
