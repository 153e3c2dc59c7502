//! # Trust
//!
//! Who we believe, and how we check that a message really came from them.
//! The registry is loaded from disk at startup and never written; the
//! verifier fails closed on anything it doesn't recognize.

pub mod registry;
pub mod verifier;

pub use registry::{TrustError, TrustRegistry, TrustedKey, TrustedSender};
pub use verifier::SignatureVerifier;
