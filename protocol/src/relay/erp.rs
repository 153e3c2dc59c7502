//! ERP collaborators.
//!
//! Real ERP integration lives outside this crate. The relay only needs three
//! calls, and none of them is allowed to decide whether a shipment relays:
//! a failure is logged and noted in the audit trail, and the transaction
//! still completes unless the node is configured with `erp_required`.

use async_trait::async_trait;
use chrono::{Datelike, Utc};
use parking_lot::Mutex;
use rand::RngCore;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

use crate::transaction::ShipmentPayload;

#[derive(Debug, Error)]
pub enum ErpError {
    #[error("ERP unavailable: {0}")]
    Unavailable(String),

    #[error("ERP rejected the request: {0}")]
    Rejected(String),
}

/// The three calls the receiving side makes into its ERP.
#[async_trait]
pub trait ErpGateway: Send + Sync {
    /// Post a goods receipt for the delivered payload. Returns the receipt id.
    async fn create_goods_receipt(
        &self,
        transaction_id: &str,
        payload: &ShipmentPayload,
    ) -> Result<String, ErpError>;

    /// Move the purchase order to `status`.
    async fn update_order_status(&self, order_id: &str, status: &str) -> Result<(), ErpError>;

    /// Release payment against an invoice. `amount` is in minor units.
    async fn release_payment(&self, invoice_number: &str, amount: u64) -> Result<(), ErpError>;
}

/// Logs and succeeds. Can be told to fail for tests.
#[derive(Debug, Default)]
pub struct MockErp {
    fail: AtomicBool,
    calls: Mutex<Vec<String>>,
}

impl MockErp {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::SeqCst);
    }

    /// Every call made so far, in order, as `name:arg`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn record(&self, call: String) -> Result<(), ErpError> {
        tracing::info!(call = %call, "mock ERP call");
        self.calls.lock().push(call);
        if self.fail.load(Ordering::SeqCst) {
            Err(ErpError::Unavailable("mock ERP configured to fail".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ErpGateway for MockErp {
    async fn create_goods_receipt(
        &self,
        transaction_id: &str,
        _payload: &ShipmentPayload,
    ) -> Result<String, ErpError> {
        self.record(format!("create_goods_receipt:{transaction_id}"))?;
        let mut suffix = [0u8; 3];
        rand::thread_rng().fill_bytes(&mut suffix);
        Ok(format!("GR-{}-{}", Utc::now().year(), hex::encode_upper(suffix)))
    }

    async fn update_order_status(&self, order_id: &str, status: &str) -> Result<(), ErpError> {
        self.record(format!("update_order_status:{order_id}:{status}"))
    }

    async fn release_payment(&self, invoice_number: &str, amount: u64) -> Result<(), ErpError> {
        self.record(format!("release_payment:{invoice_number}:{amount}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::fixtures::sample_payload;

    #[tokio::test]
    async fn test_mock_receipt_format() {
        let erp = MockErp::new();
        let id = erp
            .create_goods_receipt("TXN-1", &sample_payload())
            .await
            .unwrap();
        let parts: Vec<&str> = id.split('-').collect();
        assert_eq!(parts[0], "GR");
        assert_eq!(parts[1].len(), 4);
        assert_eq!(parts[2].len(), 6);
        assert_eq!(erp.calls(), vec!["create_goods_receipt:TXN-1"]);
    }

    #[tokio::test]
    async fn test_mock_can_fail() {
        let erp = MockErp::new();
        erp.set_failing(true);
        assert!(erp.release_payment("INV-1", 100).await.is_err());
        erp.set_failing(false);
        assert!(erp.release_payment("INV-1", 100).await.is_ok());
        assert_eq!(erp.calls().len(), 2);
    }
}
