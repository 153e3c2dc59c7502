//! File-backed registry of trusted senders.
//!
//! The registry is a JSON array maintained by whoever onboards partners.
//! We load it once at startup, validate every key, and never write it back.
//!
//! ```json
//! [
//!   {
//!     "sender_id": "SHIP-01",
//!     "name": "Westerville Widgets",
//!     "algorithm": "ES256K",
//!     "public_key": "02ab...",
//!     "onboarded": "2024-01-01",
//!     "notify_addr": "127.0.0.1:65433"
//!   }
//! ]
//! ```

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

use crate::crypto::{PublicKey, SignatureAlgorithm};

/// Errors loading the registry. All of them are startup errors; a node with
/// a broken registry refuses to start rather than trusting nobody quietly.
#[derive(Debug, Error)]
pub enum TrustError {
    #[error("failed to read registry file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse registry: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("sender {sender_id}: unsupported algorithm {algorithm}")]
    UnsupportedAlgorithm { sender_id: String, algorithm: String },

    #[error("sender {0}: invalid public key")]
    InvalidKey(String),

    #[error("sender {0} listed more than once")]
    DuplicateSender(String),
}

/// One registry entry, as written in the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustedSender {
    pub sender_id: String,
    pub name: String,
    pub algorithm: String,
    /// Hex-encoded public key.
    pub public_key: String,
    pub onboarded: NaiveDate,
    /// Where this sender listens for completion notices, if anywhere.
    #[serde(default)]
    pub notify_addr: Option<String>,
}

/// A validated entry: the file record plus its parsed key.
#[derive(Debug, Clone)]
pub struct TrustedKey {
    pub sender: TrustedSender,
    pub algorithm: SignatureAlgorithm,
    pub key: PublicKey,
}

/// Read-only lookup from sender id to trusted key material.
#[derive(Debug, Default)]
pub struct TrustRegistry {
    entries: HashMap<String, TrustedKey>,
}

impl TrustRegistry {
    /// An empty registry. Trusts nobody.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a registry from entries, validating each key.
    pub fn from_senders(senders: Vec<TrustedSender>) -> Result<Self, TrustError> {
        let mut entries = HashMap::with_capacity(senders.len());
        for sender in senders {
            let algorithm: SignatureAlgorithm =
                sender
                    .algorithm
                    .parse()
                    .map_err(|_| TrustError::UnsupportedAlgorithm {
                        sender_id: sender.sender_id.clone(),
                        algorithm: sender.algorithm.clone(),
                    })?;
            let key = PublicKey::from_hex(algorithm, &sender.public_key)
                .map_err(|_| TrustError::InvalidKey(sender.sender_id.clone()))?;
            let id = sender.sender_id.clone();
            let entry = TrustedKey {
                sender,
                algorithm,
                key,
            };
            if entries.insert(id.clone(), entry).is_some() {
                return Err(TrustError::DuplicateSender(id));
            }
        }
        Ok(Self { entries })
    }

    /// Parse a registry from JSON text.
    pub fn from_json(json: &str) -> Result<Self, TrustError> {
        let senders: Vec<TrustedSender> = serde_json::from_str(json)?;
        Self::from_senders(senders)
    }

    /// Load a registry file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, TrustError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let registry = Self::from_json(&text)?;
        tracing::info!(
            path = %path.as_ref().display(),
            senders = registry.len(),
            "trust registry loaded"
        );
        Ok(registry)
    }

    pub fn get(&self, sender_id: &str) -> Option<&TrustedKey> {
        self.entries.get(sender_id)
    }

    pub fn is_trusted(&self, sender_id: &str) -> bool {
        self.entries.contains_key(sender_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn sender_ids(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}
