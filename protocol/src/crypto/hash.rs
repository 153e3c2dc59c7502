//! # Hashing Utilities
//!
//! SHA-256, and nothing else. Payload digests and the envelope checksum both
//! use it, and the shipper-side tooling everyone already runs speaks it.

use sha2::{Digest, Sha256};

/// Compute the SHA-256 hash of the input data.
///
/// # Example
///
/// ```
/// use shipsync_protocol::crypto::sha256;
///
/// let hash = sha256(b"ShipSync");
/// assert_eq!(hash.len(), 32);
/// ```
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// SHA-256, lowercase hex. The form digests take in records and audit notes.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}
