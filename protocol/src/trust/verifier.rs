//! # Signature Verifier
//!
//! Answers one question: did the sender this message claims to come from
//! actually sign these bytes? The answer is a `bool`. Callers that need a
//! reason get it from the logs, never from the wire.
//!
//! ## Order of checks
//!
//! 1. Claimed sender must be in the registry. If not, return `false` before
//!    touching any key material.
//! 2. Declared algorithm must parse and equal the registry's algorithm for
//!    that sender. A sender can't downgrade itself to a scheme it wasn't
//!    onboarded with.
//! 3. If the message declares a public key, it must be byte-equal to the
//!    registered key.
//! 4. For envelopes, the declared checksum must match the payload.
//! 5. Only then, the actual signature check over canonical bytes.
//!
//! Verification never mutates its input and has no side effects beyond a
//! debug log line, so calling it twice gives the same answer twice.

use serde_json::Value;
use std::sync::Arc;

use super::registry::{TrustRegistry, TrustedKey};
use crate::crypto::{canonical_bytes_without, verify_with_key, SignatureAlgorithm};
use crate::transaction::{SignedEnvelope, StatusUpdate};
use crate::wire::CompletionNotice;

/// Path of the member excluded from an envelope's signed bytes.
pub const ENVELOPE_SIGNATURE_PATH: &[&str] = &["security", "signature"];

/// Path of the member excluded from a status update's signed bytes.
pub const STATUS_UPDATE_SIGNATURE_PATH: &[&str] = &["signature"];

/// Checks detached signatures against the trust registry.
#[derive(Debug, Clone)]
pub struct SignatureVerifier {
    registry: Arc<TrustRegistry>,
}

impl SignatureVerifier {
    pub fn new(registry: Arc<TrustRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &TrustRegistry {
        &self.registry
    }

    /// Verify a payload given as JSON, with the signature passed separately.
    ///
    /// `payload` is canonicalized with `security.signature` removed, so it
    /// may be passed either with or without the signature still in place.
    pub fn verify(
        &self,
        payload: &Value,
        claimed_sender_id: &str,
        signature: &str,
        algorithm: &str,
    ) -> bool {
        let Some(trusted) = self.trusted_for(claimed_sender_id, algorithm) else {
            return false;
        };
        match canonical_bytes_without(payload, ENVELOPE_SIGNATURE_PATH) {
            Ok(bytes) => check(trusted, &bytes, signature),
            Err(e) => {
                tracing::debug!(sender = claimed_sender_id, error = %e, "canonicalization failed");
                false
            }
        }
    }

    /// Verify a decoded envelope end to end.
    pub fn verify_envelope(&self, envelope: &SignedEnvelope) -> bool {
        let sec = &envelope.security;
        let Some(trusted) = self.trusted_for(&sec.signer_id, &sec.algorithm) else {
            return false;
        };

        if let Some(declared) = &sec.public_key {
            if !declared.eq_ignore_ascii_case(&trusted.key.to_hex()) {
                tracing::debug!(
                    sender = %sec.signer_id,
                    tx_id = %envelope.transaction_id,
                    "declared public key does not match registry"
                );
                return false;
            }
        }

        match envelope.payload_digest() {
            Ok(digest) if digest == sec.checksum => {}
            Ok(_) => {
                tracing::debug!(tx_id = %envelope.transaction_id, "checksum mismatch");
                return false;
            }
            Err(_) => return false,
        }

        match envelope.signable_bytes() {
            Ok(bytes) => check(trusted, &bytes, &sec.signature),
            Err(_) => false,
        }
    }

    /// Verify a signed status update.
    pub fn verify_status_update(&self, update: &StatusUpdate) -> bool {
        let Some(trusted) = self.trusted_for(&update.signer_id, &update.algorithm) else {
            return false;
        };
        match update.signable_bytes() {
            Ok(bytes) => check(trusted, &bytes, &update.signature),
            Err(_) => false,
        }
    }

    /// Verify a completion notice against the registry entry of the node
    /// that signed it.
    pub fn verify_completion(&self, notice: &CompletionNotice) -> bool {
        let Some(trusted) = self.trusted_for(&notice.signer_id, &notice.algorithm) else {
            return false;
        };
        match notice.signable_bytes() {
            Ok(bytes) => check(trusted, &bytes, &notice.signature),
            Err(_) => false,
        }
    }

    /// Steps 1 and 2: registry lookup and algorithm agreement.
    fn trusted_for(&self, sender_id: &str, algorithm: &str) -> Option<&TrustedKey> {
        let Some(trusted) = self.registry.get(sender_id) else {
            tracing::debug!(sender = sender_id, "unknown sender");
            return None;
        };
        match algorithm.parse::<SignatureAlgorithm>() {
            Ok(alg) if alg == trusted.algorithm => Some(trusted),
            _ => {
                tracing::debug!(
                    sender = sender_id,
                    declared = algorithm,
                    registered = %trusted.algorithm,
                    "algorithm mismatch or unsupported"
                );
                None
            }
        }
    }
}

fn check(trusted: &TrustedKey, bytes: &[u8], signature: &str) -> bool {
    match verify_with_key(&trusted.key, bytes, signature) {
        Ok(()) => true,
        Err(e) => {
            tracing::debug!(sender = %trusted.sender.sender_id, error = %e, "signature rejected");
            false
        }
    }
}
