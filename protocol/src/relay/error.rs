//! Error types for the relay.
//!
//! Every relay operation that can fail returns a [`RelayError`]. Each
//! variant maps onto exactly one wire [`ErrorCode`], and every variant has a
//! wire message that is safe to send to a stranger: framing and signature
//! failures in particular never echo internal detail.

use thiserror::Error;

use crate::storage::StoreError;
use crate::wire::{ErrorCode, FramingError, RelayResponse};

/// Errors that can occur while relaying one transaction.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The inbound frame was malformed, oversized, truncated, or not JSON.
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),

    /// Untrusted sender or cryptographic mismatch. Nothing was persisted.
    #[error("signature rejected for sender {sender_id}")]
    Signature {
        /// Who the message claimed to be from.
        sender_id: String,
    },

    /// Same id already stored with a different payload.
    #[error("transaction {0} conflicts with stored record")]
    StoreConflict(String),

    /// The store failed. Retryable at the caller's discretion.
    #[error("storage error: {0}")]
    StoreIo(String),

    /// Forwarding gave up after the configured attempts.
    #[error("forwarding {transaction_id} failed after {attempts} attempts: {last_error}")]
    ForwardingTimeout {
        transaction_id: String,
        attempts: u32,
        last_error: String,
    },

    #[error("transaction not found: {0}")]
    NotFound(String),

    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    /// A connection-level deadline passed.
    #[error("timed out during {0}")]
    Timeout(&'static str),

    /// An ERP call failed on a node where ERP success is required.
    #[error("ERP call failed: {0}")]
    Erp(String),

    /// Well-formed but meaningless for this node (wrong role, bad id, ...).
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl RelayError {
    pub fn code(&self) -> ErrorCode {
        match self {
            RelayError::Framing(FramingError::Timeout { .. }) => ErrorCode::Timeout,
            RelayError::Framing(_) => ErrorCode::FramingError,
            RelayError::Signature { .. } => ErrorCode::SignatureError,
            RelayError::StoreConflict(_) => ErrorCode::StoreConflict,
            RelayError::StoreIo(_) => ErrorCode::StorageError,
            RelayError::ForwardingTimeout { .. } => ErrorCode::ForwardingFailed,
            RelayError::NotFound(_) => ErrorCode::NotFound,
            RelayError::InvalidTransition(_) => ErrorCode::InvalidTransition,
            RelayError::Timeout(_) => ErrorCode::Timeout,
            RelayError::InvalidRequest(_) => ErrorCode::InvalidRequest,
            RelayError::Erp(_) => ErrorCode::ErpFailed,
        }
    }

    /// The message that goes on the wire.
    pub fn wire_message(&self) -> String {
        match self {
            RelayError::Framing(_) => "malformed frame".to_string(),
            RelayError::Signature { .. } => "invalid signature".to_string(),
            RelayError::StoreConflict(_) => "conflicting payload for transaction id".to_string(),
            RelayError::StoreIo(_) => "storage error".to_string(),
            RelayError::ForwardingTimeout { attempts, .. } => {
                format!("forwarding failed after {attempts} attempts; held for reconciliation")
            }
            RelayError::NotFound(_) => "transaction not found".to_string(),
            RelayError::InvalidTransition(detail) => detail.clone(),
            RelayError::Timeout(op) => format!("timed out during {op}"),
            RelayError::InvalidRequest(detail) => detail.clone(),
            RelayError::Erp(_) => "ERP call failed; held for reconciliation".to_string(),
        }
    }

    /// Turn the error into the NACK the client will see.
    pub fn to_response(&self, transaction_id: Option<String>) -> RelayResponse {
        RelayResponse::nack(self.code(), self.wire_message(), transaction_id)
    }
}

impl From<StoreError> for RelayError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => RelayError::NotFound(id),
            StoreError::Conflict(id) => RelayError::StoreConflict(id),
            StoreError::InvalidTransition { id, from, to } => {
                RelayError::InvalidTransition(format!("{id}: {from} -> {to}"))
            }
            other => RelayError::StoreIo(other.to_string()),
        }
    }
}

pub type RelayResult<T> = Result<T, RelayError>;
