//! # Digital Signatures
//!
//! Hex-in, hex-out signing and verification. Envelopes carry signatures and
//! keys as hex strings, so this is the layer that turns "some strings off the
//! wire" into a yes or a no.
//!
//! ## Strictness
//!
//! ES256K verification rejects high-S signatures (k256 normalizes on sign and
//! refuses non-normalized on verify). Ed25519 uses dalek's default checks.
//! We don't need to be lenient: every signer in the network runs our code
//! or something that produces canonical signatures.

use thiserror::Error;

use super::keys::{PublicKey, SignatureAlgorithm, SignerKeypair};

/// Errors during signature operations.
///
/// Intentionally vague. The verifier collapses all of these into `false`
/// before anything reaches the network.
#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("signature verification failed")]
    VerificationFailed,

    #[error("invalid signature encoding")]
    InvalidSignatureEncoding,

    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("unsupported signature algorithm: {0}")]
    UnsupportedAlgorithm(String),
}

/// Sign `message` and return the signature hex-encoded.
pub fn sign_hex(keypair: &SignerKeypair, message: &[u8]) -> String {
    hex::encode(keypair.sign(message))
}

/// Verify a hex-encoded signature from its raw wire components.
///
/// `algorithm` is the declared identifier string; anything we don't
/// recognize is an error, not a panic.
pub fn verify_raw(
    algorithm: &str,
    public_key_hex: &str,
    message: &[u8],
    signature_hex: &str,
) -> Result<(), SignatureError> {
    let algorithm: SignatureAlgorithm = algorithm
        .parse()
        .map_err(|_| SignatureError::UnsupportedAlgorithm(algorithm.to_string()))?;
    let public_key = PublicKey::from_hex(algorithm, public_key_hex)
        .map_err(|_| SignatureError::InvalidPublicKey)?;
    verify_with_key(&public_key, message, signature_hex)
}

/// Verify a hex-encoded signature against an already-parsed key.
pub fn verify_with_key(
    public_key: &PublicKey,
    message: &[u8],
    signature_hex: &str,
) -> Result<(), SignatureError> {
    let signature =
        hex::decode(signature_hex.trim()).map_err(|_| SignatureError::InvalidSignatureEncoding)?;
    if public_key.verify(message, &signature) {
        Ok(())
    } else {
        Err(SignatureError::VerificationFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify_hex() {
        let kp = SignerKeypair::generate(SignatureAlgorithm::Es256k);
        let sig = sign_hex(&kp, b"GR-2026-00A1B2");
        assert_eq!(sig.len(), 128);
        verify_raw("ES256K", &kp.public_key().to_hex(), b"GR-2026-00A1B2", &sig).unwrap();
    }

    #[test]
    fn test_wrong_key_fails() {
        let kp1 = SignerKeypair::generate(SignatureAlgorithm::Ed25519);
        let kp2 = SignerKeypair::generate(SignatureAlgorithm::Ed25519);
        let sig = sign_hex(&kp1, b"msg");
        let err = verify_with_key(&kp2.public_key(), b"msg", &sig).unwrap_err();
        assert!(matches!(err, SignatureError::VerificationFailed));
    }

    #[test]
    fn test_non_hex_signature_is_rejected() {
        let kp = SignerKeypair::generate(SignatureAlgorithm::Es256k);
        let err = verify_with_key(&kp.public_key(), b"msg", "not-hex!").unwrap_err();
        assert!(matches!(err, SignatureError::InvalidSignatureEncoding));
    }

    #[test]
    fn test_unknown_algorithm() {
        let kp = SignerKeypair::generate(SignatureAlgorithm::Es256k);
        let sig = sign_hex(&kp, b"msg");
        let err = verify_raw("RS256", &kp.public_key().to_hex(), b"msg", &sig).unwrap_err();
        assert!(matches!(err, SignatureError::UnsupportedAlgorithm(_)));
    }

    #[test]
    fn test_algorithm_mismatch_does_not_verify() {
        // An Ed25519 signature presented as ES256K must not pass, even if the
        // key bytes happen to parse.
        let kp = SignerKeypair::generate(SignatureAlgorithm::Ed25519);
        let sig = sign_hex(&kp, b"msg");
        assert!(verify_raw("ES256K", &kp.public_key().to_hex(), b"msg", &sig).is_err());
    }
}
