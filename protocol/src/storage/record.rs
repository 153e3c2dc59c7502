//! The stored form of a transaction and the relay's progress on it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::transaction::{AuditEntry, ShipmentStatus, SignedEnvelope};

// ---------------------------------------------------------------------------
// RelayStage
// ---------------------------------------------------------------------------

/// How far the relay got with one transaction.
///
/// ```text
/// RECEIVED ──► VALIDATED ──► STORED ──► FORWARDED ──► COMPLETED
///     │            │            │            │
///     └────────────┴────────────┴────────────┴──────► FAILED
/// ```
///
/// `RECEIVED` and `VALIDATED` only ever exist in flight; a record is born
/// at `STORED`. A terminal hop skips `FORWARDED`. A stored record whose
/// forwarding gave up stays `STORED` with its reconciliation flag set, so
/// `FAILED` shows up on the wire and in logs, not on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelayStage {
    Received,
    Validated,
    Stored,
    Forwarded,
    Completed,
    Failed,
}

impl RelayStage {
    fn rank(&self) -> u8 {
        match self {
            Self::Received => 0,
            Self::Validated => 1,
            Self::Stored => 2,
            Self::Forwarded => 3,
            Self::Completed => 4,
            Self::Failed => 5,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Forward only; `FAILED` from anything that isn't already terminal.
    pub fn can_advance_to(&self, next: RelayStage) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "RECEIVED",
            Self::Validated => "VALIDATED",
            Self::Stored => "STORED",
            Self::Forwarded => "FORWARDED",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for RelayStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// TransactionRecord
// ---------------------------------------------------------------------------

/// Everything we know about one transaction. Created on the first valid
/// receipt, mutated only through [`TransactionStore`](super::TransactionStore),
/// never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub transaction_id: String,
    pub sender_id: String,
    pub status: ShipmentStatus,
    pub stage: RelayStage,
    /// The envelope exactly as it verified.
    pub envelope: SignedEnvelope,
    /// SHA-256 of the canonical payload; decides duplicate vs. conflict.
    pub payload_digest: String,
    pub received_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Set when forwarding gave up. Cleared by a successful reconcile.
    pub needs_reconciliation: bool,
    pub erp_receipt_id: Option<String>,
    /// The upstream node that relayed this to us, `None` if the originator
    /// submitted directly. Only a direct recipient notifies the originator.
    pub relayed_by: Option<String>,
    pub audit_trail: Vec<AuditEntry>,
}

impl TransactionRecord {
    /// A fresh record at `STORED` with its first audit entry.
    pub(crate) fn new(
        envelope: SignedEnvelope,
        payload_digest: String,
        relayed_by: Option<String>,
        stored: AuditEntry,
    ) -> Self {
        let now = Utc::now();
        Self {
            transaction_id: envelope.transaction_id.clone(),
            sender_id: envelope.security.signer_id.clone(),
            status: envelope.status,
            stage: RelayStage::Stored,
            envelope,
            payload_digest,
            received_at: now,
            updated_at: now,
            completed_at: None,
            needs_reconciliation: false,
            erp_receipt_id: None,
            relayed_by,
            audit_trail: vec![stored],
        }
    }

    pub fn last_audit(&self) -> Option<&AuditEntry> {
        self.audit_trail.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use RelayStage::*;

    #[test]
    fn test_stage_order() {
        assert!(Received.can_advance_to(Validated));
        assert!(Validated.can_advance_to(Stored));
        assert!(Stored.can_advance_to(Forwarded));
        assert!(Forwarded.can_advance_to(Completed));
        assert!(Stored.can_advance_to(Completed));
    }

    #[test]
    fn test_stage_never_moves_back() {
        assert!(!Forwarded.can_advance_to(Stored));
        assert!(!Stored.can_advance_to(Stored));
        assert!(!Completed.can_advance_to(Forwarded));
    }

    #[test]
    fn test_failed_from_non_terminal_only() {
        for s in [Received, Validated, Stored, Forwarded] {
            assert!(s.can_advance_to(Failed));
        }
        assert!(!Completed.can_advance_to(Failed));
        assert!(!Failed.can_advance_to(Completed));
    }
}
