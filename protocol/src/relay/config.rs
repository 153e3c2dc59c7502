//! Runtime configuration for one relay node.
//!
//! Defaults come from [`crate::config`]; the node binary overrides them from
//! CLI flags and `SHIPSYNC_*` environment variables.

use std::time::Duration;

use super::forward::RetryPolicy;
use crate::config;

/// Where this node sits in the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayRole {
    /// Stores, then forwards to `next_hop` (a `host:port`).
    Bridge { next_hop: String },
    /// Terminal hop. Stores, runs ERP, completes.
    Receiver,
}

impl RelayRole {
    pub fn next_hop(&self) -> Option<&str> {
        match self {
            RelayRole::Bridge { next_hop } => Some(next_hop),
            RelayRole::Receiver => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            RelayRole::Bridge { .. } => "bridge",
            RelayRole::Receiver => "receiver",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// This node's identity, written as the actor on its audit entries.
    pub node_id: String,
    pub role: RelayRole,
    /// Per-connection read/write deadline.
    pub io_timeout: Duration,
    /// Outbound connect deadline.
    pub connect_timeout: Duration,
    /// How long a submitter waits for the forwarding outcome.
    pub ack_wait: Duration,
    pub max_frame_bytes: usize,
    pub retry: RetryPolicy,
    /// If set, an ERP failure keeps the transaction from completing.
    pub erp_required: bool,
}

impl RelayConfig {
    /// Defaults for the given identity and role.
    pub fn new(node_id: impl Into<String>, role: RelayRole) -> Self {
        Self {
            node_id: node_id.into(),
            role,
            io_timeout: config::CONNECTION_TIMEOUT,
            connect_timeout: config::CONNECT_TIMEOUT,
            ack_wait: config::ACK_WAIT,
            max_frame_bytes: config::MAX_FRAME_BYTES,
            retry: RetryPolicy::default(),
            erp_required: false,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeouts(mut self, io_timeout: Duration, connect_timeout: Duration, ack_wait: Duration) -> Self {
        self.io_timeout = io_timeout;
        self.connect_timeout = connect_timeout;
        self.ack_wait = ack_wait;
        self
    }
}
