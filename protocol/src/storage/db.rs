//! # TransactionStore — Persistent Storage Engine
//!
//! The durable record of every transaction this node has accepted, built on
//! sled's embedded key-value store.
//!
//! ## Tree Layout
//!
//! | Tree           | Key                      | Value                       |
//! |----------------|--------------------------|-----------------------------|
//! | `transactions` | `transaction_id` (UTF-8) | `bincode(TransactionRecord)`|
//!
//! ## Concurrency
//!
//! sled itself is happy with concurrent writers, but a read-modify-write of
//! one record is not atomic on its own. Every mutation takes a per-id lock
//! from a `DashMap` first, so two handlers touching `TXN-1` queue up while
//! `TXN-1` and `TXN-2` proceed in parallel. A lock entry is removed as soon
//! as nobody holds it, so the map only ever covers ids being written right
//! now. There is never more than one accepted write in flight per id, and
//! there is no last-writer-wins: a conflicting payload is refused, not
//! overwritten.
//!
//! ## Durability
//!
//! Every mutating call flushes before it returns. When `put` says `Ok`, the
//! record is on disk.

use dashmap::DashMap;
use parking_lot::Mutex;
use sled::{Db, Tree};
use std::path::Path;
use std::sync::Arc;

use super::record::{RelayStage, TransactionRecord};
use crate::transaction::{actions, AuditEntry, ShipmentStatus, SignedEnvelope};

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

/// Errors that can occur during store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("transaction not found: {0}")]
    NotFound(String),

    #[error("transaction {0} already stored with a different payload")]
    Conflict(String),

    #[error("invalid transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: String,
        to: String,
    },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// What `put` did.
#[derive(Debug, Clone, PartialEq)]
pub enum PutOutcome {
    /// First receipt. The record is new at `STORED`.
    Inserted(TransactionRecord),
    /// Same id, same payload. One `duplicate_receipt` entry was appended.
    Duplicate(TransactionRecord),
}

impl PutOutcome {
    pub fn record(&self) -> &TransactionRecord {
        match self {
            PutOutcome::Inserted(r) | PutOutcome::Duplicate(r) => r,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, PutOutcome::Duplicate(_))
    }
}

// ---------------------------------------------------------------------------
// TransactionStore
// ---------------------------------------------------------------------------

/// Durable keyed store of transaction records.
///
/// Cheap to clone; clones share the same sled handle and lock map.
#[derive(Debug, Clone)]
pub struct TransactionStore {
    db: Db,
    transactions: Tree,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl TransactionStore {
    /// Open or create a store at the given filesystem path.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// A store that lives in a temp directory and disappears on drop.
    /// For tests.
    pub fn open_temporary() -> StoreResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> StoreResult<Self> {
        let transactions = db.open_tree("transactions")?;
        Ok(Self {
            db,
            transactions,
            locks: Arc::new(DashMap::new()),
        })
    }

    /// Run `f` holding the lock for `id`. The map entry is dropped again
    /// once no other caller holds or waits on it.
    fn with_lock<T>(&self, id: &str, f: impl FnOnce() -> StoreResult<T>) -> StoreResult<T> {
        let lock = self
            .locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let result = {
            let _guard = lock.lock();
            f()
        };
        drop(lock);
        self.locks.remove_if(id, |_, l| Arc::strong_count(l) == 1);
        result
    }

    fn read(&self, id: &str) -> StoreResult<Option<TransactionRecord>> {
        match self.transactions.get(id.as_bytes())? {
            Some(bytes) => {
                let record = bincode::deserialize(&bytes)
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    fn write(&self, record: &TransactionRecord) -> StoreResult<()> {
        let bytes =
            bincode::serialize(record).map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.transactions
            .insert(record.transaction_id.as_bytes(), bytes)?;
        self.db.flush()?;
        Ok(())
    }

    /// Lock `id`, load it, apply `f`, write it back. `f` returning an error
    /// leaves the stored record untouched.
    fn mutate<F>(&self, id: &str, f: F) -> StoreResult<TransactionRecord>
    where
        F: FnOnce(&mut TransactionRecord) -> StoreResult<()>,
    {
        self.with_lock(id, || {
            let mut record = self
                .read(id)?
                .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
            f(&mut record)?;
            record.updated_at = chrono::Utc::now();
            self.write(&record)?;
            Ok(record)
        })
    }

    // -- Operations ---------------------------------------------------------

    /// Store a verified envelope, keyed by its transaction id.
    ///
    /// `digest` is the envelope's payload digest and `actor` is who is
    /// storing it (written into the `stored` audit entry). `relayed_by` is
    /// only kept on first receipt.
    pub fn put(
        &self,
        envelope: &SignedEnvelope,
        digest: &str,
        actor: &str,
        relayed_by: Option<&str>,
    ) -> StoreResult<PutOutcome> {
        let id = envelope.transaction_id.as_str();
        self.with_lock(id, || {
            if let Some(mut existing) = self.read(id)? {
                if existing.payload_digest != digest {
                    tracing::warn!(tx_id = %id, "conflicting resubmission rejected");
                    return Err(StoreError::Conflict(id.to_string()));
                }
                existing.audit_trail.push(
                    AuditEntry::new(actions::DUPLICATE_RECEIPT, actor)
                        .with_notes(format!("stage {}", existing.stage)),
                );
                existing.updated_at = chrono::Utc::now();
                self.write(&existing)?;
                tracing::info!(tx_id = %id, stage = %existing.stage, "duplicate receipt");
                return Ok(PutOutcome::Duplicate(existing));
            }

            let stored = AuditEntry::new(actions::STORED, actor)
                .with_location(envelope.payload.location.address.clone())
                .with_notes(format!("digest {digest}"));
            let record = TransactionRecord::new(
                envelope.clone(),
                digest.to_string(),
                relayed_by.map(str::to_string),
                stored,
            );
            self.write(&record)?;
            tracing::debug!(tx_id = %id, "record stored");
            Ok(PutOutcome::Inserted(record))
        })
    }

    /// Fetch a record.
    pub fn get(&self, id: &str) -> StoreResult<TransactionRecord> {
        self.read(id)?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    /// Move a record's business status, appending `entry` in the same write.
    pub fn update_status(
        &self,
        id: &str,
        status: ShipmentStatus,
        entry: AuditEntry,
    ) -> StoreResult<TransactionRecord> {
        self.mutate(id, |record| {
            if !record.status.can_transition_to(status) {
                tracing::warn!(tx_id = %id, from = %record.status, to = %status, "status transition refused");
                return Err(StoreError::InvalidTransition {
                    id: id.to_string(),
                    from: record.status.to_string(),
                    to: status.to_string(),
                });
            }
            record.status = status;
            record.audit_trail.push(entry);
            Ok(())
        })
    }

    /// Move a record's relay stage, appending `entry` in the same write.
    pub fn advance_stage(
        &self,
        id: &str,
        stage: RelayStage,
        entry: AuditEntry,
    ) -> StoreResult<TransactionRecord> {
        self.mutate(id, |record| {
            if !record.stage.can_advance_to(stage) {
                tracing::warn!(tx_id = %id, from = %record.stage, to = %stage, "stage transition refused");
                return Err(StoreError::InvalidTransition {
                    id: id.to_string(),
                    from: record.stage.to_string(),
                    to: stage.to_string(),
                });
            }
            record.stage = stage;
            if stage == RelayStage::Completed {
                record.completed_at = Some(entry.timestamp);
                record.needs_reconciliation = false;
            }
            if stage == RelayStage::Forwarded {
                record.needs_reconciliation = false;
            }
            record.audit_trail.push(entry);
            Ok(())
        })
    }

    /// Append an audit entry without changing anything else.
    pub fn append_audit(&self, id: &str, entry: AuditEntry) -> StoreResult<TransactionRecord> {
        self.mutate(id, |record| {
            record.audit_trail.push(entry);
            Ok(())
        })
    }

    /// Set or clear the reconciliation flag.
    pub fn flag_reconciliation(&self, id: &str, flagged: bool) -> StoreResult<TransactionRecord> {
        self.mutate(id, |record| {
            record.needs_reconciliation = flagged;
            Ok(())
        })
    }

    /// Remember the goods receipt the ERP handed back.
    pub fn record_erp_receipt(&self, id: &str, receipt_id: &str) -> StoreResult<TransactionRecord> {
        self.mutate(id, |record| {
            record.erp_receipt_id = Some(receipt_id.to_string());
            Ok(())
        })
    }

    /// All records, optionally filtered by status, oldest first.
    pub fn list(&self, status: Option<ShipmentStatus>) -> StoreResult<Vec<TransactionRecord>> {
        let mut out = Vec::new();
        for item in self.transactions.iter() {
            let (_, bytes) = item?;
            let record: TransactionRecord = bincode::deserialize(&bytes)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            if status.map_or(true, |s| record.status == s) {
                out.push(record);
            }
        }
        out.sort_by(|a, b| a.received_at.cmp(&b.received_at));
        Ok(out)
    }

    /// Records whose forwarding gave up and are waiting on an operator.
    pub fn list_needing_reconciliation(&self) -> StoreResult<Vec<TransactionRecord>> {
        Ok(self
            .list(None)?
            .into_iter()
            .filter(|r| r.needs_reconciliation)
            .collect())
    }

    pub fn contains(&self, id: &str) -> StoreResult<bool> {
        Ok(self.transactions.contains_key(id.as_bytes())?)
    }

    pub fn count(&self) -> usize {
        self.transactions.len()
    }
}
