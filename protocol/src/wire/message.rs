//! Wire messages and responses.
//!
//! Every connection carries exactly one [`RelayMessage`] in and one
//! [`RelayResponse`] out. The `type` tag picks the handler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::crypto::{canonical_bytes_without, sign_hex, SignerKeypair};
use crate::storage::RelayStage;
use crate::transaction::{SignedEnvelope, StatusUpdate};

/// Inbound message, one per connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayMessage {
    /// Shipper to bridge: a new signed shipment.
    Submit { envelope: SignedEnvelope },
    /// Bridge to next hop: the same envelope, untouched, plus who relayed it.
    Relay {
        envelope: SignedEnvelope,
        relayed_by: String,
    },
    /// Carrier or receiver reporting a business status change.
    StatusUpdate { update: StatusUpdate },
    /// Anyone asking where a transaction stands.
    StatusQuery { transaction_id: String },
    /// Final hop back to the originator: it's done.
    Completion(CompletionNotice),
}

impl RelayMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            RelayMessage::Submit { .. } => "submit",
            RelayMessage::Relay { .. } => "relay",
            RelayMessage::StatusUpdate { .. } => "status_update",
            RelayMessage::StatusQuery { .. } => "status_query",
            RelayMessage::Completion(_) => "completion",
        }
    }

    pub fn transaction_id(&self) -> &str {
        match self {
            RelayMessage::Submit { envelope } | RelayMessage::Relay { envelope, .. } => {
                &envelope.transaction_id
            }
            RelayMessage::StatusUpdate { update } => &update.transaction_id,
            RelayMessage::StatusQuery { transaction_id } => transaction_id,
            RelayMessage::Completion(notice) => &notice.transaction_id,
        }
    }
}

/// `{transaction_id, status, completion_timestamp}` sent to the originator,
/// signed by the node that completed it.
///
/// The signature covers the canonical JSON of every other field, the same
/// way a [`StatusUpdate`] is signed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionNotice {
    pub transaction_id: String,
    pub status: RelayStage,
    pub completion_timestamp: DateTime<Utc>,
    pub signer_id: String,
    pub algorithm: String,
    pub signature: String,
}

impl CompletionNotice {
    /// A `COMPLETED` notice for `transaction_id`, stamped now and signed.
    pub fn signed(
        transaction_id: &str,
        signer_id: &str,
        keypair: &SignerKeypair,
    ) -> Result<Self, serde_json::Error> {
        let mut notice = Self {
            transaction_id: transaction_id.to_string(),
            status: RelayStage::Completed,
            completion_timestamp: Utc::now(),
            signer_id: signer_id.to_string(),
            algorithm: keypair.algorithm().as_str().to_string(),
            signature: String::new(),
        };
        let signable = notice.signable_bytes()?;
        notice.signature = sign_hex(keypair, &signable);
        Ok(notice)
    }

    pub fn signable_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        let value = serde_json::to_value(self)?;
        canonical_bytes_without(&value, &["signature"])
    }
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResponseStatus {
    Ack,
    Nack,
}

/// Machine-readable reason attached to every NACK.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    FramingError,
    SignatureError,
    StoreConflict,
    StorageError,
    ForwardingFailed,
    NotFound,
    InvalidTransition,
    Timeout,
    InvalidRequest,
    ErpFailed,
}

impl ErrorCode {
    /// Whether resending the same submission later could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::StorageError
                | ErrorCode::ForwardingFailed
                | ErrorCode::Timeout
                | ErrorCode::ErpFailed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::FramingError => "FRAMING_ERROR",
            ErrorCode::SignatureError => "SIGNATURE_ERROR",
            ErrorCode::StoreConflict => "STORE_CONFLICT",
            ErrorCode::StorageError => "STORAGE_ERROR",
            ErrorCode::ForwardingFailed => "FORWARDING_FAILED",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::InvalidTransition => "INVALID_TRANSITION",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::InvalidRequest => "INVALID_REQUEST",
            ErrorCode::ErpFailed => "ERP_FAILED",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The one reply a connection gets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayResponse {
    pub status: ResponseStatus,
    pub code: Option<ErrorCode>,
    pub message: String,
    pub transaction_id: Option<String>,
    pub stage: Option<RelayStage>,
}

impl RelayResponse {
    pub fn ack(transaction_id: impl Into<String>, stage: RelayStage, message: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Ack,
            code: None,
            message: message.into(),
            transaction_id: Some(transaction_id.into()),
            stage: Some(stage),
        }
    }

    pub fn nack(code: ErrorCode, message: impl Into<String>, transaction_id: Option<String>) -> Self {
        Self {
            status: ResponseStatus::Nack,
            code: Some(code),
            message: message.into(),
            transaction_id,
            stage: Some(RelayStage::Failed),
        }
    }

    pub fn is_ack(&self) -> bool {
        self.status == ResponseStatus::Ack
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{verify_with_key, SignatureAlgorithm};
    use serde_json::json;

    #[test]
    fn test_message_tagging() {
        let msg = RelayMessage::StatusQuery {
            transaction_id: "TXN-1".into(),
        };
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(v, json!({"type": "status_query", "transaction_id": "TXN-1"}));
        assert_eq!(msg.kind(), "status_query");
    }

    #[test]
    fn test_completion_flattens_notice() {
        let kp = SignerKeypair::generate(SignatureAlgorithm::Ed25519);
        let notice = CompletionNotice::signed("TXN-1", "RCV-01", &kp).unwrap();
        let msg = RelayMessage::Completion(notice);
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(v["type"], "completion");
        assert_eq!(v["status"], "COMPLETED");
        assert_eq!(v["transaction_id"], "TXN-1");
        assert_eq!(v["signer_id"], "RCV-01");
        assert_eq!(v["algorithm"], "Ed25519");
        let back: RelayMessage = serde_json::from_value(v).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_completion_signature_covers_every_field() {
        let kp = SignerKeypair::generate(SignatureAlgorithm::Es256k);
        let notice = CompletionNotice::signed("TXN-1", "RCV-01", &kp).unwrap();
        let bytes = notice.signable_bytes().unwrap();
        verify_with_key(&kp.public_key(), &bytes, &notice.signature).unwrap();

        let mut moved = notice.clone();
        moved.transaction_id = "TXN-2".into();
        assert_ne!(moved.signable_bytes().unwrap(), bytes);

        let mut resigned = notice.clone();
        resigned.signature = "00".into();
        assert_eq!(resigned.signable_bytes().unwrap(), bytes);
    }

    #[test]
    fn test_unknown_type_fails_to_parse() {
        let v = json!({"type": "teleport", "transaction_id": "TXN-1"});
        assert!(serde_json::from_value::<RelayMessage>(v).is_err());
    }

    #[test]
    fn test_response_shapes() {
        let ack = RelayResponse::ack("TXN-1", RelayStage::Completed, "completed");
        let v = serde_json::to_value(&ack).unwrap();
        assert_eq!(v["status"], "ACK");
        assert_eq!(v["stage"], "COMPLETED");
        assert!(v["code"].is_null());

        let nack = RelayResponse::nack(ErrorCode::SignatureError, "invalid signature", None);
        let v = serde_json::to_value(&nack).unwrap();
        assert_eq!(v["status"], "NACK");
        assert_eq!(v["code"], "SIGNATURE_ERROR");
        assert!(!nack.is_ack());
    }

    #[test]
    fn test_retryable_codes() {
        assert!(ErrorCode::StorageError.is_retryable());
        assert!(ErrorCode::Timeout.is_retryable());
        assert!(!ErrorCode::SignatureError.is_retryable());
        assert!(!ErrorCode::StoreConflict.is_retryable());
    }
}
