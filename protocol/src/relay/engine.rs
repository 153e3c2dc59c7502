//! # RelayEngine — The Per-Transaction State Machine
//!
//! Takes one decoded message and decides what happens to it. For a shipment
//! that means walking the relay stages:
//!
//! ```text
//! RECEIVED ──► VALIDATED ──► STORED ──► FORWARDED ──► COMPLETED
//!                  │            │            │
//!                  ▼            ▼            ▼
//!               NACK      (flagged for reconciliation)
//! ```
//!
//! Nothing is persisted before the signature checks out, and nothing is
//! un-persisted after: once `put` returns, the record exists for good and
//! every later failure is written into its audit trail instead.
//!
//! ## Acknowledgement Timing
//!
//! The store write happens inline. Forwarding and completion run in a
//! spawned task, and the submitter waits for that task up to `ack_wait`.
//! If the outcome is known in time, the response carries it. If not, the
//! response is `ACK` at `STORED` and the task keeps going on its own; the
//! submitter can poll with a `status_query`.
//!
//! A process that dies while that task runs leaves a record short of
//! `COMPLETED` with nothing driving it. [`RelayEngine::recover_interrupted`]
//! runs at startup and flags every such record for reconciliation.
//!
//! ## Roles
//!
//! Bridges and receivers run the same engine. A bridge has a next hop and
//! goes through `FORWARDED`; a receiver has none and goes straight from
//! `STORED` to `COMPLETED`, calling its ERP on the way if it has one.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::time::timeout;

use super::client::RelayClient;
use super::config::RelayConfig;
use super::erp::ErpGateway;
use super::error::{RelayError, RelayResult};
use super::forward::Forwarder;
use super::observer::{NoopObserver, RelayObserver};
use crate::crypto::SignerKeypair;
use crate::storage::{PutOutcome, RelayStage, TransactionRecord, TransactionStore};
use crate::transaction::{actions, validate_transaction_id, AuditEntry, SignedEnvelope, StatusUpdate};
use crate::trust::{SignatureVerifier, TrustRegistry};
use crate::wire::{CompletionNotice, RelayMessage, RelayResponse};

/// Drives transactions through the relay. Cheap to clone; every clone
/// shares the same store, registry and in-flight set.
#[derive(Clone)]
pub struct RelayEngine {
    config: Arc<RelayConfig>,
    store: TransactionStore,
    verifier: SignatureVerifier,
    client: RelayClient,
    erp: Option<Arc<dyn ErpGateway>>,
    observer: Arc<dyn RelayObserver>,
    /// Signs completion notices sent back to originators.
    signer: Option<Arc<SignerKeypair>>,
    /// Ids whose forwarding/completion task is currently running.
    inflight: Arc<DashMap<String, ()>>,
}

/// Holds an id in the in-flight set until dropped.
struct InflightGuard {
    map: Arc<DashMap<String, ()>>,
    id: String,
}

impl InflightGuard {
    fn acquire(map: &Arc<DashMap<String, ()>>, id: &str) -> Option<Self> {
        if map.insert(id.to_string(), ()).is_some() {
            return None;
        }
        Some(Self {
            map: Arc::clone(map),
            id: id.to_string(),
        })
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.map.remove(&self.id);
    }
}

impl RelayEngine {
    pub fn new(config: RelayConfig, store: TransactionStore, registry: Arc<TrustRegistry>) -> Self {
        let client = RelayClient::from_config(&config);
        Self {
            config: Arc::new(config),
            store,
            verifier: SignatureVerifier::new(registry),
            client,
            erp: None,
            observer: Arc::new(NoopObserver),
            signer: None,
            inflight: Arc::new(DashMap::new()),
        }
    }

    /// Call this ERP when a transaction completes on this node.
    pub fn with_erp(mut self, erp: Arc<dyn ErpGateway>) -> Self {
        self.erp = Some(erp);
        self
    }

    /// Sign completion notices with this node's registered key. Without one
    /// the originator is never notified.
    pub fn with_signer(mut self, keypair: SignerKeypair) -> Self {
        self.signer = Some(Arc::new(keypair));
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn RelayObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn store(&self) -> &TransactionStore {
        &self.store
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn observer(&self) -> &Arc<dyn RelayObserver> {
        &self.observer
    }

    fn forwarder(&self) -> Forwarder {
        Forwarder::new(
            self.client.clone(),
            self.config.retry,
            self.store.clone(),
            self.config.node_id.clone(),
            Arc::clone(&self.observer),
        )
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    /// Handle one inbound message and produce the one response it gets.
    pub async fn handle(&self, message: RelayMessage) -> RelayResponse {
        let kind = message.kind();
        let tx_id = message.transaction_id().to_string();

        let result = match message {
            RelayMessage::Submit { envelope } => self.accept(envelope, None).await,
            RelayMessage::Relay {
                envelope,
                relayed_by,
            } => self.accept(envelope, Some(relayed_by)).await,
            RelayMessage::StatusUpdate { update } => self.apply_status_update(update),
            RelayMessage::StatusQuery { transaction_id } => self.query(&transaction_id),
            RelayMessage::Completion(notice) => self.record_completion(notice),
        };

        match result {
            Ok(response) => response,
            Err(e) => {
                match &e {
                    RelayError::StoreIo(_) => tracing::error!(
                        tx_id = %tx_id,
                        stage = %RelayStage::Failed,
                        kind,
                        code = %e.code(),
                        error = %e,
                        "request failed"
                    ),
                    _ => tracing::warn!(
                        tx_id = %tx_id,
                        stage = %RelayStage::Failed,
                        kind,
                        code = %e.code(),
                        error = %e,
                        "request rejected"
                    ),
                }
                e.to_response(Some(tx_id))
            }
        }
    }

    // -----------------------------------------------------------------------
    // Shipments
    // -----------------------------------------------------------------------

    /// Verify, store, then forward/complete with a bounded wait.
    async fn accept(
        &self,
        envelope: SignedEnvelope,
        relayed_by: Option<String>,
    ) -> RelayResult<RelayResponse> {
        let id = envelope.transaction_id.clone();
        validate_transaction_id(&id).map_err(|e| RelayError::InvalidRequest(e.to_string()))?;
        tracing::debug!(tx_id = %id, stage = %RelayStage::Received, relayed_by = ?relayed_by, "envelope received");

        if !self.verifier.verify_envelope(&envelope) {
            return Err(RelayError::Signature {
                sender_id: envelope.sender_id().to_string(),
            });
        }
        tracing::debug!(tx_id = %id, stage = %RelayStage::Validated, sender = envelope.sender_id(), "signature verified");

        let digest = envelope
            .payload_digest()
            .map_err(|e| RelayError::InvalidRequest(e.to_string()))?;
        let outcome = self.store.put(
            &envelope,
            &digest,
            &self.config.node_id,
            relayed_by.as_deref(),
        )?;
        if let PutOutcome::Duplicate(record) = outcome {
            return Ok(RelayResponse::ack(
                id,
                record.stage,
                format!("duplicate; already {}", record.stage),
            ));
        }
        tracing::info!(
            tx_id = %id,
            stage = %RelayStage::Stored,
            sender = envelope.sender_id(),
            role = self.config.role.name(),
            "transaction stored"
        );

        let mut task = tokio::spawn(self.clone().drive_or_hold(id.clone()));
        match timeout(self.config.ack_wait, &mut task).await {
            Ok(Ok(Ok(stage))) => Ok(RelayResponse::ack(id, stage, stage_message(stage))),
            Ok(Ok(Err(e))) => Err(e),
            Ok(Err(join_err)) => {
                tracing::error!(tx_id = %id, stage = %RelayStage::Failed, error = %join_err, "relay task aborted");
                self.store.flag_reconciliation(&id, true)?;
                self.observer.on_reconciliation_needed(&id);
                Ok(RelayResponse::ack(id, RelayStage::Stored, "stored; held for reconciliation"))
            }
            Err(_) => {
                tracing::info!(tx_id = %id, stage = %RelayStage::Stored, "ack wait elapsed; relay continues in background");
                Ok(RelayResponse::ack(id, RelayStage::Stored, "stored; forwarding in progress"))
            }
        }
    }

    /// Take a stored record as far as it can go on this node.
    ///
    /// Runs at most once per id at a time. A second caller gets the current
    /// stage back without doing anything.
    async fn drive(self, id: String) -> RelayResult<RelayStage> {
        let Some(_guard) = InflightGuard::acquire(&self.inflight, &id) else {
            return Ok(self.store.get(&id)?.stage);
        };

        let mut record = self.store.get(&id)?;
        if record.stage == RelayStage::Stored {
            if let Some(next_hop) = self.config.role.next_hop() {
                self.forwarder().forward(&record.envelope, next_hop).await?;
                let entry = AuditEntry::new(actions::FORWARDED, self.config.node_id.as_str())
                    .with_notes(format!("to {next_hop}"));
                record = self.store.advance_stage(&id, RelayStage::Forwarded, entry)?;
                tracing::info!(tx_id = %id, stage = %RelayStage::Forwarded, next_hop, "transaction forwarded");
            }
        }

        if !record.stage.is_terminal() {
            record = self.complete(record).await?;
        }
        Ok(record.stage)
    }

    /// [`Self::drive`], flagging the record if it fails somewhere the
    /// forwarder didn't already.
    async fn drive_or_hold(self, id: String) -> RelayResult<RelayStage> {
        let result = self.clone().drive(id.clone()).await;
        if let Err(e) = &result {
            self.hold_after_failure(&id, e);
        }
        result
    }

    fn hold_after_failure(&self, id: &str, error: &RelayError) {
        let record = match self.store.get(id) {
            Ok(record) => record,
            Err(store_err) => {
                tracing::error!(tx_id = %id, stage = %RelayStage::Failed, error = %error, store_error = %store_err, "relay failed; record unreadable");
                return;
            }
        };
        if record.stage.is_terminal() || record.needs_reconciliation {
            return;
        }
        match self.store.flag_reconciliation(id, true) {
            Ok(_) => {
                self.observer.on_reconciliation_needed(id);
                tracing::error!(tx_id = %id, stage = %record.stage, error = %error, "relay failed; record held for reconciliation");
            }
            Err(store_err) => {
                tracing::error!(tx_id = %id, stage = %RelayStage::Failed, error = %error, store_error = %store_err, "relay failed; could not flag record");
            }
        }
    }

    async fn complete(&self, record: TransactionRecord) -> RelayResult<TransactionRecord> {
        let id = record.transaction_id.clone();
        if let Some(erp) = &self.erp {
            self.run_erp(erp.as_ref(), &record).await?;
        }

        let entry = AuditEntry::new(actions::COMPLETED, self.config.node_id.as_str());
        let record = self.store.advance_stage(&id, RelayStage::Completed, entry)?;
        self.observer.on_completed(&id);
        tracing::info!(tx_id = %id, stage = %RelayStage::Completed, "transaction completed");

        self.notify_originator(&record);
        Ok(record)
    }

    /// Goods receipt, order status, payment. Each failure is audited; only
    /// `erp_required` turns one into an error.
    async fn run_erp(&self, erp: &dyn ErpGateway, record: &TransactionRecord) -> RelayResult<()> {
        let id = record.transaction_id.as_str();
        let payload = &record.envelope.payload;
        let mut failures = Vec::new();

        match erp.create_goods_receipt(id, payload).await {
            Ok(receipt_id) => {
                self.store.record_erp_receipt(id, &receipt_id)?;
                tracing::info!(tx_id = %id, receipt_id = %receipt_id, "goods receipt created");
            }
            Err(e) => failures.push(format!("create_goods_receipt: {e}")),
        }

        let po = payload.erp_identifiers.po_number.as_str();
        if let Err(e) = erp.update_order_status(po, "RECEIVED").await {
            failures.push(format!("update_order_status {po}: {e}"));
        }

        let invoice = &payload.commercial_invoice;
        if let Err(e) = erp
            .release_payment(&invoice.invoice_number, invoice.total_value)
            .await
        {
            failures.push(format!("release_payment {}: {e}", invoice.invoice_number));
        }

        for failure in &failures {
            tracing::warn!(tx_id = %id, error = %failure, "ERP call failed");
            let entry = AuditEntry::new(actions::ERP_CALL_FAILED, "erp").with_notes(failure.clone());
            self.store.append_audit(id, entry)?;
        }

        if self.config.erp_required && !failures.is_empty() {
            self.store.flag_reconciliation(id, true)?;
            self.observer.on_reconciliation_needed(id);
            return Err(RelayError::Erp(failures.join("; ")));
        }
        Ok(())
    }

    /// Only the node the originator submitted to sends the notice.
    fn notify_originator(&self, record: &TransactionRecord) {
        if record.relayed_by.is_some() {
            return;
        }
        let Some(addr) = self
            .verifier
            .registry()
            .get(&record.sender_id)
            .and_then(|trusted| trusted.sender.notify_addr.clone())
        else {
            tracing::debug!(tx_id = %record.transaction_id, sender = %record.sender_id, "originator has no notify address");
            return;
        };

        let id = record.transaction_id.as_str();
        let Some(signer) = &self.signer else {
            tracing::warn!(tx_id = %id, "no signing key; completion notice not sent");
            let entry = AuditEntry::new(actions::COMPLETION_NOTICE_FAILED, self.config.node_id.as_str())
                .with_notes("no signing key configured");
            if let Err(e) = self.store.append_audit(id, entry) {
                tracing::error!(tx_id = %id, error = %e, "could not record notice failure");
            }
            return;
        };
        let notice = match CompletionNotice::signed(id, &self.config.node_id, signer) {
            Ok(notice) => notice,
            Err(e) => {
                tracing::error!(tx_id = %id, error = %e, "could not sign completion notice");
                return;
            }
        };

        let forwarder = self.forwarder();
        tokio::spawn(async move {
            forwarder.notify_completion(&notice, &addr).await;
        });
    }

    /// Operator recovery: re-run forwarding for a record that stopped short
    /// of `COMPLETED`.
    pub async fn retry_forward(&self, id: &str) -> RelayResult<RelayResponse> {
        let record = self.store.get(id)?;
        if record.stage.is_terminal() {
            return Err(RelayError::InvalidRequest(format!(
                "{id} is already {}",
                record.stage
            )));
        }
        if self.inflight.contains_key(id) {
            return Err(RelayError::InvalidRequest(format!(
                "{id} is still being relayed"
            )));
        }

        tracing::info!(tx_id = %id, stage = %record.stage, flagged = record.needs_reconciliation, "retrying held transaction");
        let stage = self.clone().drive_or_hold(id.to_string()).await?;
        Ok(RelayResponse::ack(id, stage, stage_message(stage)))
    }

    /// Flag every record that is short of `COMPLETED`, not flagged and not
    /// being driven by this process. Run before serving, these are exactly
    /// the records a previous process was still relaying when it stopped.
    pub fn recover_interrupted(&self) -> RelayResult<Vec<String>> {
        let mut recovered = Vec::new();
        for record in self.store.list(None)? {
            let id = record.transaction_id.as_str();
            if record.stage.is_terminal()
                || record.needs_reconciliation
                || self.inflight.contains_key(id)
            {
                continue;
            }
            let entry = AuditEntry::new(actions::RELAY_INTERRUPTED, self.config.node_id.as_str())
                .with_notes(format!("left at {}", record.stage));
            self.store.append_audit(id, entry)?;
            self.store.flag_reconciliation(id, true)?;
            self.observer.on_reconciliation_needed(id);
            tracing::warn!(tx_id = %id, stage = %record.stage, "interrupted relay held for reconciliation");
            recovered.push(record.transaction_id);
        }
        Ok(recovered)
    }

    // -----------------------------------------------------------------------
    // Status updates, queries, completion notices
    // -----------------------------------------------------------------------

    fn apply_status_update(&self, update: StatusUpdate) -> RelayResult<RelayResponse> {
        validate_transaction_id(&update.transaction_id)
            .map_err(|e| RelayError::InvalidRequest(e.to_string()))?;
        if !self.verifier.verify_status_update(&update) {
            return Err(RelayError::Signature {
                sender_id: update.signer_id.clone(),
            });
        }

        let mut entry = AuditEntry::new(actions::STATUS_UPDATED, update.actor.as_str())
            .with_notes(match &update.notes {
                Some(notes) => format!("{} by {}: {notes}", update.status, update.signer_id),
                None => format!("{} by {}", update.status, update.signer_id),
            });
        if let Some(location) = &update.location {
            entry = entry.with_location(location.clone());
        }

        let record = self
            .store
            .update_status(&update.transaction_id, update.status, entry)?;
        tracing::info!(
            tx_id = %record.transaction_id,
            stage = %record.stage,
            status = %record.status,
            signer = %update.signer_id,
            "status updated"
        );
        Ok(RelayResponse::ack(
            record.transaction_id,
            record.stage,
            format!("status {}", record.status),
        ))
    }

    fn query(&self, id: &str) -> RelayResult<RelayResponse> {
        let record = self.store.get(id)?;
        let mut message = format!(
            "status {}; {} audit entries",
            record.status,
            record.audit_trail.len()
        );
        if record.needs_reconciliation {
            message.push_str("; needs reconciliation");
        }
        Ok(RelayResponse::ack(id, record.stage, message))
    }

    /// Originator side. A notice signed by a registered node is ACKed and
    /// noted on the record if we have one. Anything else is refused before
    /// the store is touched.
    fn record_completion(&self, notice: CompletionNotice) -> RelayResult<RelayResponse> {
        let id = notice.transaction_id.as_str();
        validate_transaction_id(id).map_err(|e| RelayError::InvalidRequest(e.to_string()))?;
        if !self.verifier.verify_completion(&notice) {
            return Err(RelayError::Signature {
                sender_id: notice.signer_id.clone(),
            });
        }
        tracing::info!(
            tx_id = %id,
            stage = %notice.status,
            completed_at = %notice.completion_timestamp,
            signer = %notice.signer_id,
            "completion notice received"
        );
        if self.store.contains(id)? {
            let entry = AuditEntry::new(actions::COMPLETION_RECEIVED, self.config.node_id.as_str())
                .with_notes(format!(
                    "completed at {} by {}",
                    notice.completion_timestamp, notice.signer_id
                ));
            self.store.append_audit(id, entry)?;
        }
        Ok(RelayResponse::ack(id, notice.status, "completion noted"))
    }
}

fn stage_message(stage: RelayStage) -> &'static str {
    match stage {
        RelayStage::Forwarded => "forwarded",
        RelayStage::Completed => "completed",
        _ => "stored",
    }
}
