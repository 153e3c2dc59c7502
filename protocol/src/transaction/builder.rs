//! Envelope construction via the builder pattern.
//!
//! The [`EnvelopeBuilder`] takes a payload, fills in the id, status and
//! timestamps, and produces a signed [`SignedEnvelope`]. Unlike payloads,
//! envelopes are never handed out unsigned: an unsigned envelope has no use
//! anywhere in the relay, so the builder's terminal method signs.

use chrono::{DateTime, Utc};
use rand::RngCore;

use super::envelope::{payload_digest, validate_transaction_id, EnvelopeError, SecurityBlock, SignedEnvelope};
use super::signing::sign_envelope;
use super::types::{ShipmentPayload, ShipmentStatus};
use crate::crypto::SignerKeypair;

/// Generate a shipper-style transaction id:
/// `PREFIX-YYYYMMDD-HHMMSS-XXXXXXXX` with 4 random bytes in upper hex.
///
/// The random suffix keeps two shipments created in the same second apart.
pub fn generate_transaction_id(prefix: &str) -> String {
    let mut suffix = [0u8; 4];
    rand::thread_rng().fill_bytes(&mut suffix);
    format!(
        "{}-{}-{}",
        prefix,
        Utc::now().format("%Y%m%d-%H%M%S"),
        hex::encode_upper(suffix)
    )
}

/// Fluent builder for signed envelopes.
///
/// ```rust,no_run
/// # use shipsync_protocol::transaction::{EnvelopeBuilder, ShipmentPayload};
/// # use shipsync_protocol::crypto::{SignerKeypair, SignatureAlgorithm};
/// # fn demo(payload: ShipmentPayload) -> Result<(), Box<dyn std::error::Error>> {
/// let keypair = SignerKeypair::generate(SignatureAlgorithm::Es256k);
/// let envelope = EnvelopeBuilder::new(payload)
///     .transaction_id("TXN-1")
///     .signer_id("SHIP-01")
///     .sign(&keypair)?;
/// # Ok(()) }
/// ```
///
/// Defaults: a generated `SHP-` id, status `INITIATED`, `created_at` now,
/// and the public key embedded in the security block.
pub struct EnvelopeBuilder {
    payload: ShipmentPayload,
    transaction_id: Option<String>,
    status: ShipmentStatus,
    created_at: Option<DateTime<Utc>>,
    signer_id: Option<String>,
    embed_public_key: bool,
}

impl EnvelopeBuilder {
    pub fn new(payload: ShipmentPayload) -> Self {
        Self {
            payload,
            transaction_id: None,
            status: ShipmentStatus::Initiated,
            created_at: None,
            signer_id: None,
            embed_public_key: true,
        }
    }

    pub fn transaction_id(mut self, id: &str) -> Self {
        self.transaction_id = Some(id.to_string());
        self
    }

    pub fn status(mut self, status: ShipmentStatus) -> Self {
        self.status = status;
        self
    }

    /// Pin the creation time. Tests use this to get reproducible bytes.
    pub fn created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = Some(at);
        self
    }

    /// The sender id the receiving side will look up in its trust registry.
    pub fn signer_id(mut self, id: &str) -> Self {
        self.signer_id = Some(id.to_string());
        self
    }

    /// Whether to declare the public key in the security block. The
    /// registry is authoritative either way.
    pub fn embed_public_key(mut self, embed: bool) -> Self {
        self.embed_public_key = embed;
        self
    }

    /// Assemble and sign.
    pub fn sign(self, keypair: &SignerKeypair) -> Result<SignedEnvelope, EnvelopeError> {
        let signer_id = self.signer_id.ok_or(EnvelopeError::MissingField("signer_id"))?;
        let transaction_id = self
            .transaction_id
            .unwrap_or_else(|| generate_transaction_id(crate::config::SHIPMENT_ID_PREFIX));
        validate_transaction_id(&transaction_id)?;

        let created_at = self.created_at.unwrap_or_else(Utc::now);
        let checksum = payload_digest(&self.payload)?;

        let mut envelope = SignedEnvelope {
            transaction_id,
            status: self.status,
            created_at,
            payload: self.payload,
            security: SecurityBlock {
                signature: String::new(),
                algorithm: keypair.algorithm().as_str().to_string(),
                signer_id,
                public_key: self.embed_public_key.then(|| keypair.public_key().to_hex()),
                signed_at: created_at,
                checksum,
            },
        };
        sign_envelope(&mut envelope, keypair)?;
        Ok(envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::SignatureAlgorithm;
    use crate::transaction::fixtures::sample_payload;

    #[test]
    fn generated_id_has_expected_shape() {
        let id = generate_transaction_id("SHP");
        let parts: Vec<&str> = id.split('-').collect();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0], "SHP");
        assert_eq!(parts[1].len(), 8);
        assert_eq!(parts[2].len(), 6);
        assert_eq!(parts[3].len(), 8);
        assert!(parts[3].chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
    }

    #[test]
    fn build_requires_signer_id() {
        let kp = SignerKeypair::generate(SignatureAlgorithm::Es256k);
        let err = EnvelopeBuilder::new(sample_payload()).sign(&kp).unwrap_err();
        assert!(matches!(err, EnvelopeError::MissingField("signer_id")));
    }

    #[test]
    fn build_fills_security_block() {
        let kp = SignerKeypair::generate(SignatureAlgorithm::Es256k);
        let env = EnvelopeBuilder::new(sample_payload())
            .transaction_id("TXN-1")
            .signer_id("SHIP-01")
            .sign(&kp)
            .unwrap();

        assert_eq!(env.transaction_id, "TXN-1");
        assert_eq!(env.status, ShipmentStatus::Initiated);
        assert_eq!(env.security.algorithm, "ES256K");
        assert_eq!(env.security.signature.len(), 128);
        assert_eq!(env.security.public_key, Some(kp.public_key().to_hex()));
        assert_eq!(env.security.checksum, env.payload_digest().unwrap());
    }

    #[test]
    fn build_rejects_bad_id() {
        let kp = SignerKeypair::generate(SignatureAlgorithm::Ed25519);
        let err = EnvelopeBuilder::new(sample_payload())
            .transaction_id("")
            .signer_id("SHIP-01")
            .sign(&kp)
            .unwrap_err();
        assert!(matches!(err, EnvelopeError::InvalidTransactionId(_)));
    }

    #[test]
    fn default_id_uses_shipment_prefix() {
        let kp = SignerKeypair::generate(SignatureAlgorithm::Ed25519);
        let env = EnvelopeBuilder::new(sample_payload())
            .signer_id("SHIP-01")
            .embed_public_key(false)
            .sign(&kp)
            .unwrap();
        assert!(env.transaction_id.starts_with("SHP-"));
        assert!(env.security.public_key.is_none());
    }
}
