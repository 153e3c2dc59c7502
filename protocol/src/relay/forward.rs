//! Forwarding to the next hop, and completion notices back to the origin.
//!
//! Both are outbound sends with bounded exponential backoff. The difference
//! is what happens when the attempts run out: a forward that gives up
//! leaves its record `STORED` and flagged for reconciliation, while a
//! completion notice that gives up just leaves a note in the audit trail.
//! In neither case is the stored record rolled back.

use std::sync::Arc;
use std::time::Duration;

use super::client::{ClientError, RelayClient};
use super::error::{RelayError, RelayResult};
use super::observer::RelayObserver;
use crate::config;
use crate::storage::{RelayStage, TransactionStore};
use crate::transaction::{actions, AuditEntry, SignedEnvelope};
use crate::wire::{CompletionNotice, RelayMessage, RelayResponse};

/// Upper bound on a single backoff sleep.
const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Bounded exponential backoff: `base, 2*base, 4*base, ...`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(config::FORWARD_MAX_ATTEMPTS, config::FORWARD_BASE_DELAY)
    }
}

impl RetryPolicy {
    /// At least one attempt, always.
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Sleep after failed attempt `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exp)
            .min(MAX_BACKOFF)
    }
}

/// Pushes stored envelopes downstream and notices upstream.
#[derive(Clone)]
pub struct Forwarder {
    client: RelayClient,
    policy: RetryPolicy,
    store: TransactionStore,
    node_id: String,
    observer: Arc<dyn RelayObserver>,
}

impl Forwarder {
    pub fn new(
        client: RelayClient,
        policy: RetryPolicy,
        store: TransactionStore,
        node_id: String,
        observer: Arc<dyn RelayObserver>,
    ) -> Self {
        Self {
            client,
            policy,
            store,
            node_id,
            observer,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Relay `envelope` to `next_hop` until it ACKs.
    ///
    /// Each failed attempt is logged and appended to the audit trail. When
    /// the attempts run out, or the next hop refuses for a reason retrying
    /// won't fix, the record is flagged for reconciliation and
    /// [`RelayError::ForwardingTimeout`] is returned.
    pub async fn forward(&self, envelope: &SignedEnvelope, next_hop: &str) -> RelayResult<RelayResponse> {
        let tx_id = envelope.transaction_id.as_str();
        let message = RelayMessage::Relay {
            envelope: envelope.clone(),
            relayed_by: self.node_id.clone(),
        };
        let max = self.policy.max_attempts;

        let result = self
            .client
            .send_with_retry(next_hop, &message, &self.policy, |attempt, e| {
                tracing::warn!(
                    tx_id = %tx_id,
                    stage = %RelayStage::Stored,
                    attempt,
                    max,
                    next_hop,
                    error = %e,
                    "forward attempt failed"
                );
                self.observer.on_forward_failed(tx_id);
                let entry = AuditEntry::new(actions::FORWARD_ATTEMPT_FAILED, self.node_id.as_str())
                    .with_notes(format!("attempt {attempt}/{max} to {next_hop}: {e}"));
                if let Err(store_err) = self.store.append_audit(tx_id, entry) {
                    tracing::error!(tx_id = %tx_id, error = %store_err, "could not record forward failure");
                }
            })
            .await;

        match result {
            Ok(response) => Ok(response),
            Err((attempts, e)) => {
                self.store.flag_reconciliation(tx_id, true)?;
                self.observer.on_reconciliation_needed(tx_id);
                tracing::error!(
                    tx_id = %tx_id,
                    stage = %RelayStage::Failed,
                    attempts,
                    "forwarding gave up; record held for reconciliation"
                );
                Err(RelayError::ForwardingTimeout {
                    transaction_id: tx_id.to_string(),
                    attempts,
                    last_error: e.to_string(),
                })
            }
        }
    }

    /// Tell the originator its transaction completed. Best effort.
    ///
    /// Returns `false` if every attempt failed; the failure is already in the
    /// audit trail by then.
    pub async fn notify_completion(&self, notice: &CompletionNotice, notify_addr: &str) -> bool {
        let transaction_id = notice.transaction_id.as_str();
        let message = RelayMessage::Completion(notice.clone());

        let result = self
            .client
            .send_with_retry(notify_addr, &message, &self.policy, |attempt, e: &ClientError| {
                tracing::debug!(tx_id = transaction_id, attempt, error = %e, "completion notice attempt failed");
            })
            .await;

        match result {
            Ok(_) => {
                tracing::info!(tx_id = transaction_id, notify_addr, "originator notified");
                true
            }
            Err((attempts, e)) => {
                tracing::warn!(tx_id = transaction_id, attempts, error = %e, "completion notice undeliverable");
                let entry = AuditEntry::new(actions::COMPLETION_NOTICE_FAILED, self.node_id.as_str())
                    .with_notes(format!("{attempts} attempts to {notify_addr}: {e}"));
                if let Err(store_err) = self.store.append_audit(transaction_id, entry) {
                    tracing::error!(tx_id = transaction_id, error = %store_err, "could not record notice failure");
                }
                false
            }
        }
    }
}
