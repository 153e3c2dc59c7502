//! # Cryptographic Primitives for ShipSync
//!
//! Every signature a shipper, carrier or receiver produces, and every check
//! the bridge runs against one, flows through here.
//!
//! We deliberately chose boring, well-audited cryptography:
//!
//! - **ECDSA/secp256k1 + SHA-256** (`ES256K`) — the shipper default.
//! - **Ed25519** — for the handheld scanners that only speak it.
//! - **SHA-256** — payload digests and checksums.
//!
//! Plus one thing that isn't cryptography but might as well be: the
//! canonical JSON encoding that defines which bytes get signed.
//!
//! ## A note on "rolling your own crypto"
//!
//! We don't. Everything here is a thin, type-safe wrapper around audited
//! implementations (`k256`, `ed25519-dalek`, `sha2`).

pub mod canonical;
pub mod hash;
pub mod keys;
pub mod signatures;

pub use canonical::{canonical_bytes, canonical_bytes_without, canonical_value_bytes};
pub use hash::{sha256, sha256_hex};
pub use keys::{KeyError, PublicKey, SignatureAlgorithm, SignerKeypair};
pub use signatures::{sign_hex, verify_raw, verify_with_key, SignatureError};
