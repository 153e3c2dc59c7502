//! Hooks for whoever wants to count what the relay does.
//!
//! The library doesn't know about Prometheus. The node implements
//! [`RelayObserver`] and hands it to the engine; tests use the no-op.

use std::time::Duration;

use crate::wire::RelayResponse;

/// Callbacks fired by the engine and listener. All default to no-ops.
pub trait RelayObserver: Send + Sync {
    /// A connection got its response.
    fn on_response(&self, _kind: &str, _response: &RelayResponse, _elapsed: Duration) {}

    /// A forward attempt to the next hop failed.
    fn on_forward_failed(&self, _transaction_id: &str) {}

    /// A transaction reached `COMPLETED` on this node.
    fn on_completed(&self, _transaction_id: &str) {}

    /// A transaction was left for reconciliation.
    fn on_reconciliation_needed(&self, _transaction_id: &str) {}
}

/// Observes nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl RelayObserver for NoopObserver {}
