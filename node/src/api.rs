//! # Read-only HTTP API
//!
//! Builds the axum router that lets operators browse what a node has stored.
//! Nothing here mutates a record; submissions go over the relay port.
//!
//! ## Endpoints
//!
//! | Method | Path                          | Description                          |
//! |--------|-------------------------------|--------------------------------------|
//! | GET    | `/health`                     | Liveness probe plus store summary    |
//! | GET    | `/transactions`               | Record summaries, oldest first       |
//! | GET    | `/transactions?status=X`      | ...filtered by shipment status       |
//! | GET    | `/transactions?held=true`     | ...only those held for reconciliation|
//! | GET    | `/transactions/:id`           | Full record with envelope and audit  |
//! | GET    | `/metrics`                    | Prometheus text format               |

use axum::{
    extract::{Path, Query, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use shipsync_protocol::storage::{RelayStage, StoreError, TransactionRecord, TransactionStore};
use shipsync_protocol::transaction::ShipmentStatus;

use crate::metrics::{self, SharedMetrics};

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared application state available to all request handlers.
///
/// Cheap to clone: the store and metrics are handles.
#[derive(Clone)]
pub struct AppState {
    /// The node's reported version string.
    pub version: String,
    pub node_id: String,
    /// `bridge`, `receiver`, or `shipper`.
    pub role: String,
    pub store: TransactionStore,
    pub metrics: SharedMetrics,
    pub started_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Builds the full axum [`Router`] with all API routes, CORS, and tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/transactions", get(list_handler))
        .route("/transactions/:id", get(transaction_handler))
        .route("/metrics", get(metrics_route))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Response Types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub node_id: String,
    pub role: String,
    pub transactions: usize,
    pub uptime_secs: i64,
}

/// One row of `/transactions`. The full envelope is only on the detail route.
#[derive(Debug, Serialize, Deserialize)]
pub struct TransactionSummary {
    pub transaction_id: String,
    pub sender_id: String,
    pub status: ShipmentStatus,
    pub stage: RelayStage,
    pub received_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub needs_reconciliation: bool,
    pub erp_receipt_id: Option<String>,
    pub audit_entries: usize,
}

impl From<&TransactionRecord> for TransactionSummary {
    fn from(r: &TransactionRecord) -> Self {
        Self {
            transaction_id: r.transaction_id.clone(),
            sender_id: r.sender_id.clone(),
            status: r.status,
            stage: r.stage,
            received_at: r.received_at,
            updated_at: r.updated_at,
            completed_at: r.completed_at,
            needs_reconciliation: r.needs_reconciliation,
            erp_receipt_id: r.erp_receipt_id.clone(),
            audit_entries: r.audit_trail.len(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub status: Option<String>,
    /// Only records held for reconciliation.
    #[serde(default)]
    pub held: bool,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /health` — 200 if the node is up.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".into(),
        version: state.version.clone(),
        node_id: state.node_id.clone(),
        role: state.role.clone(),
        transactions: state.store.count(),
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
    })
}

/// `GET /transactions` — summaries, oldest first.
async fn list_handler(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Response {
    let status = match params.status.as_deref().map(str::parse::<ShipmentStatus>) {
        None => None,
        Some(Ok(s)) => Some(s),
        Some(Err(e)) => return error(StatusCode::BAD_REQUEST, e),
    };

    match state.store.list(status) {
        Ok(records) => {
            let rows: Vec<TransactionSummary> = records
                .iter()
                .filter(|r| !params.held || r.needs_reconciliation)
                .map(TransactionSummary::from)
                .collect();
            Json(rows).into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "listing transactions failed");
            error(StatusCode::INTERNAL_SERVER_ERROR, "storage error")
        }
    }
}

/// `GET /transactions/:id` — the stored record, envelope and audit trail included.
async fn transaction_handler(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Response {
    match state.store.get(&id) {
        Ok(record) => Json(record).into_response(),
        Err(StoreError::NotFound(_)) => {
            error(StatusCode::NOT_FOUND, format!("transaction not found: {id}"))
        }
        Err(e) => {
            tracing::error!(tx_id = %id, error = %e, "reading transaction failed");
            error(StatusCode::INTERNAL_SERVER_ERROR, "storage error")
        }
    }
}

async fn metrics_route(State(state): State<AppState>) -> Response {
    metrics::render(&state.metrics)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use shipsync_protocol::crypto::{SignatureAlgorithm, SignerKeypair};
    use shipsync_protocol::transaction::{AuditEntry, EnvelopeBuilder, ShipmentPayload};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn test_payload() -> ShipmentPayload {
        serde_json::from_value(serde_json::json!({
            "packing_slip": {"items": [], "total_weight_kg": 0.0, "pallet_count": 1},
            "bill_of_lading": {
                "bol_number": "BOL-1", "carrier": "Buckeye Freight", "transit_type": "truck",
                "origin": "Westerville, OH", "destination": "Columbus, OH",
                "pickup_date": "2024-01-01", "delivery_date": null
            },
            "batch_details": {
                "batch_id": "B-1", "lot_number": "L-1", "manufacture_date": "2023-08-15",
                "expiry_date": null, "serial_numbers": []
            },
            "commercial_invoice": {
                "invoice_number": "INV-1", "total_value": 100, "tax_amount": 7,
                "currency": "USD", "payment_terms": "NET30"
            },
            "erp_identifiers": {
                "shipper": {"system": "SYTELINE", "erp_id": "S-1", "order_number": null},
                "receiver": {"system": "SAP", "erp_id": "R-1", "order_number": null},
                "carrier": {"system": "TMS", "erp_id": "C-1", "order_number": null},
                "po_number": "PO-1"
            },
            "location": {"latitude": 40.1262, "longitude": -82.9291, "address": "Westerville, OH"}
        }))
        .unwrap()
    }

    /// Creates a test AppState backed by a temporary store.
    fn test_app_state() -> AppState {
        AppState {
            version: "0.1.0-test".into(),
            node_id: "BRIDGE-01".into(),
            role: "bridge".into(),
            store: TransactionStore::open_temporary().expect("temp store"),
            metrics: Arc::new(crate::metrics::NodeMetrics::new().unwrap()),
            started_at: Utc::now(),
        }
    }

    fn store_one(state: &AppState, id: &str) {
        let kp = SignerKeypair::generate(SignatureAlgorithm::Es256k);
        let env = EnvelopeBuilder::new(test_payload())
            .transaction_id(id)
            .signer_id("SHIP-01")
            .sign(&kp)
            .unwrap();
        let digest = env.payload_digest().unwrap();
        state.store.put(&env, &digest, "BRIDGE-01", None).unwrap();
    }

    /// Sends a GET request and returns the (status, body_bytes).
    async fn get(router: &Router, path: &str) -> (StatusCode, Vec<u8>) {
        let req = Request::builder().uri(path).body(Body::empty()).unwrap();
        let resp = router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let body = resp
            .into_body()
            .collect()
            .await
            .unwrap()
            .to_bytes()
            .to_vec();
        (status, body)
    }

    #[tokio::test]
    async fn health_reports_store_size() {
        let state = test_app_state();
        store_one(&state, "TXN-1");
        let router = create_router(state);

        let (status, body) = get(&router, "/health").await;
        assert_eq!(status, StatusCode::OK);
        let resp: HealthResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(resp.status, "ok");
        assert_eq!(resp.transactions, 1);
        assert_eq!(resp.role, "bridge");
    }

    #[tokio::test]
    async fn transaction_detail_includes_audit_trail() {
        let state = test_app_state();
        store_one(&state, "TXN-1");
        let router = create_router(state);

        let (status, body) = get(&router, "/transactions/TXN-1").await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["transaction_id"], "TXN-1");
        assert_eq!(json["stage"], "STORED");
        assert_eq!(json["audit_trail"][0]["action"], "stored");
        assert_eq!(json["envelope"]["security"]["signer_id"], "SHIP-01");
    }

    #[tokio::test]
    async fn missing_transaction_is_404() {
        let router = create_router(test_app_state());
        let (status, body) = get(&router, "/transactions/TXN-404").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let err: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert!(err.error.contains("TXN-404"));
    }

    #[tokio::test]
    async fn list_filters_by_status_and_hold() {
        let state = test_app_state();
        store_one(&state, "TXN-1");
        store_one(&state, "TXN-2");
        state
            .store
            .update_status(
                "TXN-2",
                ShipmentStatus::Delivered,
                AuditEntry::new("status_updated", "RCV-01"),
            )
            .unwrap();
        state.store.flag_reconciliation("TXN-1", true).unwrap();
        let router = create_router(state);

        let (_, body) = get(&router, "/transactions").await;
        let rows: Vec<TransactionSummary> = serde_json::from_slice(&body).unwrap();
        assert_eq!(rows.len(), 2);

        let (_, body) = get(&router, "/transactions?status=DELIVERED").await;
        let rows: Vec<TransactionSummary> = serde_json::from_slice(&body).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].transaction_id, "TXN-2");
        assert_eq!(rows[0].audit_entries, 2);

        let (_, body) = get(&router, "/transactions?held=true").await;
        let rows: Vec<TransactionSummary> = serde_json::from_slice(&body).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].transaction_id, "TXN-1");
    }

    #[tokio::test]
    async fn unknown_status_filter_is_400() {
        let router = create_router(test_app_state());
        let (status, _) = get(&router, "/transactions?status=TELEPORTED").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn metrics_are_served() {
        let state = test_app_state();
        state.metrics.completions_total.inc();
        let router = create_router(state);
        let (status, body) = get(&router, "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert!(String::from_utf8(body)
            .unwrap()
            .contains("shipsync_completions_total 1"));
    }
}
