//! # Storage Module
//!
//! The Transaction Store: a durable keyed record of every transaction this
//! node accepted, its business status, relay stage, and audit trail.
//!
//! ## Architecture
//!
//! ```text
//! record.rs — TransactionRecord and RelayStage
//! db.rs     — sled persistence with per-id locking
//! ```
//!
//! ## Design Decisions
//!
//! 1. **Bincode on disk, JSON on the wire.** Records are compact and
//!    deterministic in sled; the API and the wire stay human-readable.
//!
//! 2. **Lock per id, not per store.** Unrelated transactions never wait on
//!    each other.
//!
//! 3. **Nothing is deleted.** A record outlives every terminal state.

pub mod db;
pub mod record;

pub use db::{PutOutcome, StoreError, StoreResult, TransactionStore};
pub use record::{RelayStage, TransactionRecord};
