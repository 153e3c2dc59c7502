//! Envelope and status-update signing.
//!
//! Signing is separate from building because a status update is signed by
//! a carrier or receiver that never built the envelope. Both paths sign the
//! canonical bytes the verifier will recompute.

use chrono::Utc;

use super::envelope::{EnvelopeError, SignedEnvelope, StatusUpdate};
use super::types::ShipmentStatus;
use crate::crypto::{sign_hex, SignerKeypair};

/// Signs an envelope in place, overwriting `security.signature`.
///
/// The algorithm recorded in the security block must already match the
/// keypair; the builder guarantees that. Callers re-signing a modified
/// envelope should not change the algorithm without changing the key.
pub fn sign_envelope(envelope: &mut SignedEnvelope, keypair: &SignerKeypair) -> Result<(), EnvelopeError> {
    envelope.security.algorithm = keypair.algorithm().as_str().to_string();
    let signable = envelope.signable_bytes()?;
    envelope.security.signature = sign_hex(keypair, &signable);
    Ok(())
}

/// Build and sign a status update in one go.
pub fn sign_status_update(
    transaction_id: &str,
    status: ShipmentStatus,
    signer_id: &str,
    location: Option<String>,
    notes: Option<String>,
    keypair: &SignerKeypair,
) -> Result<StatusUpdate, EnvelopeError> {
    let mut update = StatusUpdate {
        transaction_id: transaction_id.to_string(),
        status,
        actor: signer_id.to_string(),
        location,
        notes,
        signer_id: signer_id.to_string(),
        algorithm: keypair.algorithm().as_str().to_string(),
        signed_at: Utc::now(),
        signature: String::new(),
    };
    let signable = update.signable_bytes()?;
    update.signature = sign_hex(keypair, &signable);
    Ok(update)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
