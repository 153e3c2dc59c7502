//! Signed envelopes and signed status updates.
//!
//! A [`SignedEnvelope`] is what a shipper puts on the wire: the shipment
//! payload plus a [`SecurityBlock`] holding a detached signature. The
//! signature covers the canonical JSON of the whole envelope with exactly
//! one member removed, `security.signature`. Everything else, including
//! the algorithm, signer id and timestamp, is signed.
//!
//! [`StatusUpdate`] follows the same rule with its top-level `signature`
//! member removed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::types::{ShipmentPayload, ShipmentStatus};
use crate::crypto::{canonical_bytes, canonical_bytes_without, sha256_hex};

/// Errors building or signing an envelope.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("invalid transaction id: {0}")]
    InvalidTransactionId(String),
}

/// Detached signature and the metadata needed to check it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityBlock {
    /// Hex-encoded 64-byte signature. Excluded from the signed bytes.
    pub signature: String,
    /// Declared scheme, `ES256K` or `Ed25519`. Kept as a string so an unknown
    /// identifier reaches the verifier and fails there.
    pub algorithm: String,
    /// Claimed sender, looked up in the trust registry.
    pub signer_id: String,
    /// Hex public key the signer says it used. Optional; if present it must
    /// match the registry.
    pub public_key: Option<String>,
    pub signed_at: DateTime<Utc>,
    /// SHA-256 (hex) of the canonical `payload` member.
    pub checksum: String,
}

/// A shipment as it travels between parties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedEnvelope {
    pub transaction_id: String,
    pub status: ShipmentStatus,
    pub created_at: DateTime<Utc>,
    pub payload: ShipmentPayload,
    pub security: SecurityBlock,
}

impl SignedEnvelope {
    /// The exact bytes the signature covers.
    pub fn signable_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        let value = serde_json::to_value(self)?;
        canonical_bytes_without(&value, &["security", "signature"])
    }

    /// SHA-256 of the canonical payload. Two submissions under one id with
    /// the same digest are the same shipment.
    pub fn payload_digest(&self) -> Result<String, serde_json::Error> {
        payload_digest(&self.payload)
    }

    pub fn sender_id(&self) -> &str {
        &self.security.signer_id
    }
}

/// SHA-256 (hex) of a payload's canonical bytes.
pub fn payload_digest(payload: &ShipmentPayload) -> Result<String, serde_json::Error> {
    Ok(sha256_hex(&canonical_bytes(payload)?))
}

/// A carrier or receiver reporting a business status change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub transaction_id: String,
    pub status: ShipmentStatus,
    pub actor: String,
    pub location: Option<String>,
    pub notes: Option<String>,
    pub signer_id: String,
    pub algorithm: String,
    pub signed_at: DateTime<Utc>,
    /// Hex signature over everything else. Excluded from the signed bytes.
    pub signature: String,
}

impl StatusUpdate {
    pub fn signable_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        let value = serde_json::to_value(self)?;
        canonical_bytes_without(&value, &["signature"])
    }
}

/// Transaction ids are opaque but must be non-empty, bounded, and printable.
pub fn validate_transaction_id(id: &str) -> Result<(), EnvelopeError> {
    let ok = !id.is_empty()
        && id.len() <= crate::config::MAX_TRANSACTION_ID_LEN
        && id.chars().all(|c| c.is_ascii_graphic());
    if ok {
        Ok(())
    } else {
        Err(EnvelopeError::InvalidTransactionId(id.chars().take(32).collect()))
    }
}
