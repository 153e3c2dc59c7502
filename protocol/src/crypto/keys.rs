//! # Key Management
//!
//! Signing keypairs and public keys for the two schemes ShipSync accepts:
//!
//! - **ES256K** — ECDSA over secp256k1 with SHA-256, RFC 6979 deterministic
//!   nonces, low-S signatures. What shippers sign with by default.
//! - **Ed25519** — for carriers and handheld scanners whose firmware ships
//!   with it.
//!
//! Both produce 64-byte raw signatures, so everything downstream of this
//! module deals in `Vec<u8>` and hex strings and doesn't care which scheme
//! produced them.
//!
//! ## Security considerations
//!
//! - Key generation uses `OsRng`.
//! - Secret key bytes are never logged. `Debug` on [`SignerKeypair`] prints
//!   the algorithm and the public key only.

use ed25519_dalek::{Signer as _, Verifier as _};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::config;

/// Errors that can occur during key operations.
///
/// Deliberately vague about *why* a key failed to parse.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("invalid secret key bytes")]
    InvalidSecretKey,

    #[error("invalid public key bytes")]
    InvalidPublicKey,

    #[error("unsupported signature algorithm: {0}")]
    UnsupportedAlgorithm(String),
}

// ---------------------------------------------------------------------------
// Algorithm
// ---------------------------------------------------------------------------

/// Signature schemes the verifier knows how to check.
///
/// On the wire the algorithm is a plain string (see
/// [`SecurityBlock`](crate::transaction::SecurityBlock)) so that an unknown
/// identifier fails verification instead of failing to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignatureAlgorithm {
    /// ECDSA / secp256k1 / SHA-256.
    #[serde(rename = "ES256K")]
    Es256k,
    /// Ed25519 (RFC 8032).
    #[serde(rename = "Ed25519")]
    Ed25519,
}

impl SignatureAlgorithm {
    /// The wire identifier, e.g. `"ES256K"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            SignatureAlgorithm::Es256k => config::ALGORITHM_ES256K,
            SignatureAlgorithm::Ed25519 => config::ALGORITHM_ED25519,
        }
    }
}

impl fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignatureAlgorithm {
    type Err = KeyError;

    /// Parses the wire identifier. `SHA256withECDSA` is accepted as an alias
    /// because older shipper builds emit it.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ES256K" | "SHA256withECDSA" => Ok(SignatureAlgorithm::Es256k),
            "Ed25519" | "ed25519" => Ok(SignatureAlgorithm::Ed25519),
            other => Err(KeyError::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Keypair
// ---------------------------------------------------------------------------

/// A signing keypair for one of the supported schemes.
///
/// Like the public key, this intentionally does NOT implement `Serialize`.
/// Exporting a secret is an explicit call to [`secret_key_hex`](Self::secret_key_hex).
pub enum SignerKeypair {
    Es256k(k256::ecdsa::SigningKey),
    Ed25519(ed25519_dalek::SigningKey),
}

impl SignerKeypair {
    /// Generate a fresh keypair using the OS cryptographic RNG.
    pub fn generate(algorithm: SignatureAlgorithm) -> Self {
        match algorithm {
            SignatureAlgorithm::Es256k => {
                SignerKeypair::Es256k(k256::ecdsa::SigningKey::random(&mut OsRng))
            }
            SignatureAlgorithm::Ed25519 => {
                SignerKeypair::Ed25519(ed25519_dalek::SigningKey::generate(&mut OsRng))
            }
        }
    }

    /// Reconstruct a keypair from 32 bytes of secret key material.
    ///
    /// For ES256K the bytes must be a non-zero scalar below the curve order.
    pub fn from_bytes(algorithm: SignatureAlgorithm, secret: &[u8; 32]) -> Result<Self, KeyError> {
        match algorithm {
            SignatureAlgorithm::Es256k => k256::ecdsa::SigningKey::from_bytes(secret.into())
                .map(SignerKeypair::Es256k)
                .map_err(|_| KeyError::InvalidSecretKey),
            SignatureAlgorithm::Ed25519 => Ok(SignerKeypair::Ed25519(
                ed25519_dalek::SigningKey::from_bytes(secret),
            )),
        }
    }

    /// Reconstruct a keypair from a hex-encoded secret key.
    ///
    /// Convenience for loading key files written by `shipsync-node keygen`.
    pub fn from_hex(algorithm: SignatureAlgorithm, hex_str: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(hex_str.trim()).map_err(|_| KeyError::InvalidSecretKey)?;
        let secret: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| KeyError::InvalidSecretKey)?;
        Self::from_bytes(algorithm, &secret)
    }

    /// Which scheme this keypair signs with.
    pub fn algorithm(&self) -> SignatureAlgorithm {
        match self {
            SignerKeypair::Es256k(_) => SignatureAlgorithm::Es256k,
            SignerKeypair::Ed25519(_) => SignatureAlgorithm::Ed25519,
        }
    }

    /// The public half, safe to hand to the trust registry.
    pub fn public_key(&self) -> PublicKey {
        match self {
            SignerKeypair::Es256k(sk) => PublicKey {
                algorithm: SignatureAlgorithm::Es256k,
                bytes: sk.verifying_key().to_sec1_bytes().to_vec(),
            },
            SignerKeypair::Ed25519(sk) => PublicKey {
                algorithm: SignatureAlgorithm::Ed25519,
                bytes: sk.verifying_key().to_bytes().to_vec(),
            },
        }
    }

    /// Sign `message`, returning the 64-byte raw signature.
    ///
    /// Both schemes are deterministic: the same key and message always give
    /// the same bytes.
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        match self {
            SignerKeypair::Es256k(sk) => {
                let sig: k256::ecdsa::Signature = sk.sign(message);
                sig.to_bytes().to_vec()
            }
            SignerKeypair::Ed25519(sk) => sk.sign(message).to_bytes().to_vec(),
        }
    }

    /// Export the 32-byte secret as hex. Handle with care.
    pub fn secret_key_hex(&self) -> String {
        match self {
            SignerKeypair::Es256k(sk) => hex::encode(sk.to_bytes()),
            SignerKeypair::Ed25519(sk) => hex::encode(sk.to_bytes()),
        }
    }
}

impl fmt::Debug for SignerKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignerKeypair")
            .field("algorithm", &self.algorithm())
            .field("public_key", &self.public_key().to_hex())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Public key
// ---------------------------------------------------------------------------

/// A public key tagged with its scheme.
///
/// ES256K keys are SEC1-compressed (33 bytes); Ed25519 keys are 32 bytes.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey {
    algorithm: SignatureAlgorithm,
    bytes: Vec<u8>,
}

impl PublicKey {
    /// Parse and validate raw key bytes for the given scheme.
    pub fn from_bytes(algorithm: SignatureAlgorithm, bytes: &[u8]) -> Result<Self, KeyError> {
        match algorithm {
            SignatureAlgorithm::Es256k => {
                k256::ecdsa::VerifyingKey::from_sec1_bytes(bytes)
                    .map_err(|_| KeyError::InvalidPublicKey)?;
            }
            SignatureAlgorithm::Ed25519 => {
                let arr: [u8; 32] = bytes.try_into().map_err(|_| KeyError::InvalidPublicKey)?;
                ed25519_dalek::VerifyingKey::from_bytes(&arr)
                    .map_err(|_| KeyError::InvalidPublicKey)?;
            }
        }
        Ok(Self {
            algorithm,
            bytes: bytes.to_vec(),
        })
    }

    /// Parse a hex-encoded public key.
    pub fn from_hex(algorithm: SignatureAlgorithm, hex_str: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(hex_str.trim()).map_err(|_| KeyError::InvalidPublicKey)?;
        Self::from_bytes(algorithm, &bytes)
    }

    pub fn algorithm(&self) -> SignatureAlgorithm {
        self.algorithm
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }

    /// Verify a raw 64-byte signature over `message`.
    ///
    /// Returns `false` for malformed signatures rather than erroring. A
    /// signature that doesn't parse is just as wrong as one that doesn't
    /// verify, and callers shouldn't be able to tell the difference.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        if signature.len() != config::SIGNATURE_LENGTH {
            return false;
        }
        match self.algorithm {
            SignatureAlgorithm::Es256k => {
                let Ok(vk) = k256::ecdsa::VerifyingKey::from_sec1_bytes(&self.bytes) else {
                    return false;
                };
                let Ok(sig) = k256::ecdsa::Signature::from_slice(signature) else {
                    return false;
                };
                vk.verify(message, &sig).is_ok()
            }
            SignatureAlgorithm::Ed25519 => {
                let Ok(key_bytes) = <[u8; 32]>::try_from(self.bytes.as_slice()) else {
                    return false;
                };
                let Ok(vk) = ed25519_dalek::VerifyingKey::from_bytes(&key_bytes) else {
                    return false;
                };
                let Ok(sig) = ed25519_dalek::Signature::from_slice(signature) else {
                    return false;
                };
                vk.verify(message, &sig).is_ok()
            }
        }
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({}:{})", self.algorithm, self.to_hex())
    }
}
