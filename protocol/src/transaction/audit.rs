//! Audit trail entries.
//!
//! The trail is append-only and its order is the trust record. Nothing in the
//! crate removes or rewrites an entry; the store only ever pushes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Well-known `action` values written by the relay.
pub mod actions {
    pub const STORED: &str = "stored";
    pub const FORWARDED: &str = "forwarded";
    pub const COMPLETED: &str = "completed";
    pub const DUPLICATE_RECEIPT: &str = "duplicate_receipt";
    pub const FORWARD_ATTEMPT_FAILED: &str = "forward_attempt_failed";
    pub const COMPLETION_NOTICE_FAILED: &str = "completion_notice_failed";
    pub const COMPLETION_RECEIVED: &str = "completion_received";
    pub const ERP_CALL_FAILED: &str = "erp_call_failed";
    pub const STATUS_UPDATED: &str = "status_updated";
    pub const RELAY_INTERRUPTED: &str = "relay_interrupted";
}

/// One immutable line in a transaction's audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub action: String,
    /// Who did it: a sender id, a node id, or `erp`.
    pub actor: String,
    pub timestamp: DateTime<Utc>,
    pub location: Option<String>,
    pub notes: Option<String>,
}

impl AuditEntry {
    /// A new entry stamped with the current time.
    pub fn new(action: impl Into<String>, actor: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            actor: actor.into(),
            timestamp: Utc::now(),
            location: None,
            notes: None,
        }
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_sets_optional_fields() {
        let e = AuditEntry::new(actions::STORED, "BRIDGE-01")
            .with_location("Columbus, OH")
            .with_notes("digest 00ff");
        assert_eq!(e.action, "stored");
        assert_eq!(e.location.as_deref(), Some("Columbus, OH"));
        assert_eq!(e.notes.as_deref(), Some("digest 00ff"));
    }

    #[test]
    fn test_bincode_roundtrip() {
        let e = AuditEntry::new(actions::FORWARDED, "BRIDGE-01");
        let bytes = bincode::serialize(&e).unwrap();
        let back: AuditEntry = bincode::deserialize(&bytes).unwrap();
        assert_eq!(e, back);
    }
}
