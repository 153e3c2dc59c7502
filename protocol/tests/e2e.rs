//! End-to-end integration tests for ShipSync.
//!
//! These tests run real listeners on loopback and push signed shipments
//! through them with the real client: shipper to bridge, bridge to
//! receiver, receiver back to the originator. They prove that the codec,
//! verifier, store, engine, and forwarding compose the way a deployment
//! would use them.
//!
//! Each test builds its own nodes on ephemeral ports with temporary stores.
//! No shared state, no fixed ports, no test ordering dependencies.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use shipsync_protocol::crypto::{SignatureAlgorithm, SignerKeypair};
use shipsync_protocol::relay::{
    MockErp, RelayClient, RelayConfig, RelayEngine, RelayListener, RelayRole, RetryPolicy,
};
use shipsync_protocol::storage::{RelayStage, TransactionStore};
use shipsync_protocol::transaction::{
    sign_status_update, BatchDetails, BillOfLading, CommercialInvoice, EnvelopeBuilder,
    ErpIdentifiers, ErpParty, GeoLocation, LineItem, PackingSlip, ShipmentPayload,
    ShipmentStatus, SignedEnvelope, TransitType,
};
use shipsync_protocol::trust::{SignatureVerifier, TrustRegistry, TrustedSender};
use shipsync_protocol::wire::{ErrorCode, FrameCodec, RelayMessage, RelayResponse};

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn payload(pallets: u32) -> ShipmentPayload {
    ShipmentPayload {
        packing_slip: PackingSlip::from_items(
            vec![
                LineItem {
                    sku: "A1001".into(),
                    description: "Blue Widget".into(),
                    quantity: 25,
                    unit_weight_kg: 0.5,
                },
                LineItem {
                    sku: "B2002".into(),
                    description: "Red Widget".into(),
                    quantity: 15,
                    unit_weight_kg: 0.7,
                },
            ],
            pallets,
        ),
        bill_of_lading: BillOfLading {
            bol_number: "BOL-998877".into(),
            carrier: "Buckeye Freight".into(),
            transit_type: TransitType::Truck,
            origin: "Westerville, OH".into(),
            destination: "Columbus, OH".into(),
            pickup_date: date(2024, 1, 1),
            delivery_date: None,
        },
        batch_details: BatchDetails {
            batch_id: "BATCH-2308-01".into(),
            lot_number: "LOT-77".into(),
            manufacture_date: date(2023, 8, 15),
            expiry_date: None,
            serial_numbers: vec!["SN-0001".into()],
        },
        commercial_invoice: CommercialInvoice {
            invoice_number: "INV-556677".into(),
            total_value: 1_850_000,
            tax_amount: 129_500,
            currency: "USD".into(),
            payment_terms: "NET30".into(),
        },
        erp_identifiers: ErpIdentifiers {
            shipper: ErpParty {
                system: "SYTELINE".into(),
                erp_id: "SYTELINE-OH-001".into(),
                order_number: Some("SO-1001".into()),
            },
            receiver: ErpParty {
                system: "SAP".into(),
                erp_id: "SAP-OH-009".into(),
                order_number: None,
            },
            carrier: ErpParty {
                system: "TMS".into(),
                erp_id: "CARRIER-42".into(),
                order_number: None,
            },
            po_number: "PO-2024-0042".into(),
        },
        location: GeoLocation {
            latitude: 40.1262,
            longitude: -82.9291,
            address: "Westerville, OH".into(),
        },
    }
}

/// Shipper, bridge and receiver identities plus the registry every node
/// trusts.
struct Parties {
    shipper: SignerKeypair,
    bridge: SignerKeypair,
    receiver: SignerKeypair,
    registry: Arc<TrustRegistry>,
}

fn parties(shipper_notify: Option<String>) -> Parties {
    let shipper = SignerKeypair::generate(SignatureAlgorithm::Es256k);
    let bridge = SignerKeypair::generate(SignatureAlgorithm::Es256k);
    let receiver = SignerKeypair::generate(SignatureAlgorithm::Ed25519);
    let entry = |id: &str, kp: &SignerKeypair, notify: Option<String>| TrustedSender {
        sender_id: id.into(),
        name: id.into(),
        algorithm: kp.algorithm().as_str().into(),
        public_key: kp.public_key().to_hex(),
        onboarded: date(2024, 1, 1),
        notify_addr: notify,
    };
    let registry = TrustRegistry::from_senders(vec![
        entry("SHIP-01", &shipper, shipper_notify),
        entry("BRIDGE-01", &bridge, None),
        entry("RCV-01", &receiver, None),
    ])
    .unwrap();
    Parties {
        shipper,
        bridge,
        receiver,
        registry: Arc::new(registry),
    }
}

fn signed(p: &Parties, id: &str) -> SignedEnvelope {
    EnvelopeBuilder::new(payload(4))
        .transaction_id(id)
        .signer_id("SHIP-01")
        .sign(&p.shipper)
        .unwrap()
}

/// The bridge's key, loaded the way a node loads it from disk.
fn bridge_key(p: &Parties) -> SignerKeypair {
    SignerKeypair::from_hex(SignatureAlgorithm::Es256k, &p.bridge.secret_key_hex()).unwrap()
}

fn fast_config(node_id: &str, role: RelayRole, attempts: u32) -> RelayConfig {
    RelayConfig::new(node_id, role)
        .with_retry(RetryPolicy::new(attempts, Duration::from_millis(5)))
        .with_timeouts(
            Duration::from_secs(5),
            Duration::from_millis(500),
            Duration::from_secs(10),
        )
}

/// A running node: its address, its engine, and the switch that stops it.
struct Node {
    addr: String,
    engine: RelayEngine,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

async fn start_node(engine: RelayEngine) -> Node {
    let listener = RelayListener::bind("127.0.0.1:0", engine.clone())
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let (shutdown, rx) = watch::channel(false);
    let task = tokio::spawn(listener.run(rx));
    Node {
        addr,
        engine,
        shutdown,
        task,
    }
}

fn engine(config: RelayConfig, registry: &Arc<TrustRegistry>) -> RelayEngine {
    RelayEngine::new(
        config,
        TransactionStore::open_temporary().unwrap(),
        Arc::clone(registry),
    )
}

fn client() -> RelayClient {
    RelayClient::new(
        FrameCodec::default(),
        Duration::from_secs(2),
        Duration::from_secs(15),
    )
}

fn audit_actions(engine: &RelayEngine, id: &str) -> Vec<String> {
    engine
        .store()
        .get(id)
        .unwrap()
        .audit_trail
        .into_iter()
        .map(|e| e.action)
        .collect()
}

/// A downstream that drops connections while `up` is false and ACKs
/// everything once it's true. Every message it accepts is sent on `seen`.
async fn switchable_downstream(up: Arc<AtomicBool>) -> (String, mpsc::UnboundedReceiver<RelayMessage>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let codec = FrameCodec::default();
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            if !up.load(Ordering::SeqCst) {
                drop(stream);
                continue;
            }
            let msg: RelayMessage = codec
                .read_frame(&mut stream, Duration::from_secs(5))
                .await
                .unwrap();
            let resp = RelayResponse::ack(msg.transaction_id(), RelayStage::Completed, "completed");
            let _ = tx.send(msg);
            codec
                .write_frame(&mut stream, &resp, Duration::from_secs(5))
                .await
                .unwrap();
        }
    });
    (addr, rx)
}

// ---------------------------------------------------------------------------
// 1. Shipper → Bridge → Receiver → Originator
// ---------------------------------------------------------------------------

#[tokio::test]
async fn full_relay_chain_completes_and_notifies_originator() {
    let (notify_addr, mut notices) = switchable_downstream(Arc::new(AtomicBool::new(true))).await;
    let p = parties(Some(notify_addr));

    let erp = Arc::new(MockErp::new());
    let receiver = start_node(
        engine(fast_config("RECV-01", RelayRole::Receiver, 3), &p.registry).with_erp(erp.clone()),
    )
    .await;
    let bridge = start_node(
        engine(
            fast_config(
                "BRIDGE-01",
                RelayRole::Bridge {
                    next_hop: receiver.addr.clone(),
                },
                3,
            ),
            &p.registry,
        )
        .with_signer(bridge_key(&p)),
    )
    .await;

    let env = signed(&p, "TXN-1");
    let resp = client()
        .send(&bridge.addr, &RelayMessage::Submit { envelope: env.clone() })
        .await
        .unwrap();
    assert!(resp.is_ack(), "{resp:?}");
    assert_eq!(resp.stage, Some(RelayStage::Completed));
    assert_eq!(resp.transaction_id.as_deref(), Some("TXN-1"));

    // Bridge: stored, forwarded, completed.
    assert_eq!(
        audit_actions(&bridge.engine, "TXN-1"),
        vec!["stored", "forwarded", "completed"]
    );

    // Receiver: the same envelope, byte for byte, with provenance.
    let rec = receiver.engine.store().get("TXN-1").unwrap();
    assert_eq!(rec.envelope, env);
    assert_eq!(rec.stage, RelayStage::Completed);
    assert_eq!(rec.relayed_by.as_deref(), Some("BRIDGE-01"));
    assert!(rec.erp_receipt_id.is_some());
    assert_eq!(erp.calls().len(), 3);

    // Originator hears about it exactly once, from the bridge.
    let notice = tokio::time::timeout(Duration::from_secs(5), notices.recv())
        .await
        .unwrap()
        .unwrap();
    match notice {
        RelayMessage::Completion(notice) => {
            assert_eq!(notice.transaction_id, "TXN-1");
            assert_eq!(notice.status, RelayStage::Completed);
            assert_eq!(notice.signer_id, "BRIDGE-01");
            assert!(SignatureVerifier::new(Arc::clone(&p.registry)).verify_completion(&notice));
        }
        other => panic!("expected completion notice, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// 2. Forwarding Failure and Reconciliation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unreachable_next_hop_holds_record_until_reconciled() {
    let p = parties(None);
    let up = Arc::new(AtomicBool::new(false));
    let (downstream, mut seen) = switchable_downstream(Arc::clone(&up)).await;
    let bridge = start_node(engine(
        fast_config(
            "BRIDGE-01",
            RelayRole::Bridge {
                next_hop: downstream,
            },
            3,
        ),
        &p.registry,
    ))
    .await;

    let resp = client()
        .send(&bridge.addr, &RelayMessage::Submit { envelope: signed(&p, "TXN-2") })
        .await
        .unwrap();
    assert!(!resp.is_ack());
    assert_eq!(resp.code, Some(ErrorCode::ForwardingFailed));

    let rec = bridge.engine.store().get("TXN-2").unwrap();
    assert_eq!(rec.stage, RelayStage::Stored);
    assert!(rec.needs_reconciliation);
    let failures: Vec<_> = rec
        .audit_trail
        .iter()
        .filter(|e| e.action == "forward_attempt_failed")
        .collect();
    assert_eq!(failures.len(), 3);
    for (n, entry) in failures.iter().enumerate() {
        let notes = entry.notes.as_deref().unwrap_or_default();
        assert!(
            notes.starts_with(&format!("attempt {}/3 to ", n + 1)),
            "unexpected note {notes:?}"
        );
    }
    assert!(failures
        .windows(2)
        .all(|pair| pair[0].timestamp <= pair[1].timestamp));

    // A status query sees the held record.
    let resp = client()
        .send(
            &bridge.addr,
            &RelayMessage::StatusQuery {
                transaction_id: "TXN-2".into(),
            },
        )
        .await
        .unwrap();
    assert!(resp.is_ack());
    assert_eq!(resp.stage, Some(RelayStage::Stored));
    assert!(resp.message.contains("needs reconciliation"));

    // Downstream comes back; the operator reconciles.
    up.store(true, Ordering::SeqCst);
    let resp = bridge.engine.retry_forward("TXN-2").await.unwrap();
    assert_eq!(resp.stage, Some(RelayStage::Completed));
    assert_eq!(seen.recv().await.unwrap().transaction_id(), "TXN-2");

    let rec = bridge.engine.store().get("TXN-2").unwrap();
    assert!(!rec.needs_reconciliation);
    assert_eq!(rec.audit_trail.last().unwrap().action, "completed");
}

// ---------------------------------------------------------------------------
// 3. Duplicates and Conflicts
// ---------------------------------------------------------------------------

#[tokio::test]
async fn resubmission_is_idempotent_and_conflicts_are_refused() {
    let p = parties(None);
    let node = start_node(engine(fast_config("RECV-01", RelayRole::Receiver, 1), &p.registry)).await;
    let c = client();

    let env = signed(&p, "TXN-3");
    let first = c
        .send(&node.addr, &RelayMessage::Submit { envelope: env.clone() })
        .await
        .unwrap();
    let second = c
        .send(&node.addr, &RelayMessage::Submit { envelope: env })
        .await
        .unwrap();
    assert!(first.is_ack() && second.is_ack());
    assert_eq!(second.stage, first.stage);
    assert_eq!(node.engine.store().count(), 1);

    let other = EnvelopeBuilder::new(payload(9))
        .transaction_id("TXN-3")
        .signer_id("SHIP-01")
        .sign(&p.shipper)
        .unwrap();
    let resp = c
        .send(&node.addr, &RelayMessage::Submit { envelope: other })
        .await
        .unwrap();
    assert_eq!(resp.code, Some(ErrorCode::StoreConflict));

    let rec = node.engine.store().get("TXN-3").unwrap();
    assert_eq!(rec.envelope.payload.packing_slip.pallet_count, 4);
}

// ---------------------------------------------------------------------------
// 4. Signature Failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn untrusted_or_tampered_envelopes_are_never_stored() {
    let p = parties(None);
    let node = start_node(engine(fast_config("RECV-01", RelayRole::Receiver, 1), &p.registry)).await;
    let c = client();

    let stranger = SignerKeypair::generate(SignatureAlgorithm::Es256k);
    let unknown = EnvelopeBuilder::new(payload(4))
        .transaction_id("TXN-4")
        .signer_id("SHIP-99")
        .sign(&stranger)
        .unwrap();
    let resp = c
        .send(&node.addr, &RelayMessage::Submit { envelope: unknown })
        .await
        .unwrap();
    assert_eq!(resp.code, Some(ErrorCode::SignatureError));
    assert_eq!(resp.message, "invalid signature");

    let mut tampered = signed(&p, "TXN-5");
    tampered.payload.location.address = "Somewhere Else".into();
    let resp = c
        .send(&node.addr, &RelayMessage::Submit { envelope: tampered })
        .await
        .unwrap();
    assert_eq!(resp.code, Some(ErrorCode::SignatureError));

    assert_eq!(node.engine.store().count(), 0);
}

// ---------------------------------------------------------------------------
// 5. Framing Errors
// ---------------------------------------------------------------------------

async fn raw_exchange(addr: &str, bytes: &[u8]) -> RelayResponse {
    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    stream.write_all(bytes).await.unwrap();
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await.unwrap();
    let mut body = vec![0u8; u32::from_be_bytes(header) as usize];
    stream.read_exact(&mut body).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn malformed_frames_get_a_framing_nack_and_the_node_keeps_serving() {
    let p = parties(None);
    let node = start_node(engine(fast_config("RECV-01", RelayRole::Receiver, 1), &p.registry)).await;

    let garbage = b"not json at all";
    let mut frame = (garbage.len() as u32).to_be_bytes().to_vec();
    frame.extend_from_slice(garbage);
    let resp = raw_exchange(&node.addr, &frame).await;
    assert_eq!(resp.code, Some(ErrorCode::FramingError));
    assert_eq!(resp.message, "malformed frame");

    let resp = raw_exchange(&node.addr, &u32::MAX.to_be_bytes()).await;
    assert_eq!(resp.code, Some(ErrorCode::FramingError));

    let resp = raw_exchange(&node.addr, &0u32.to_be_bytes()).await;
    assert_eq!(resp.code, Some(ErrorCode::FramingError));

    // Still alive.
    let resp = client()
        .send(&node.addr, &RelayMessage::Submit { envelope: signed(&p, "TXN-6") })
        .await
        .unwrap();
    assert!(resp.is_ack());
    assert_eq!(node.engine.store().count(), 1);
}

// ---------------------------------------------------------------------------
// 6. Concurrency
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_submissions_are_all_stored_once() {
    let p = Arc::new(parties(None));
    let node = start_node(engine(fast_config("RECV-01", RelayRole::Receiver, 1), &p.registry)).await;

    let mut handles = Vec::new();
    for i in 0..20 {
        let addr = node.addr.clone();
        let env = signed(&p, &format!("TXN-C{i:02}"));
        handles.push(tokio::spawn(async move {
            client()
                .send(&addr, &RelayMessage::Submit { envelope: env })
                .await
                .unwrap()
        }));
    }
    // Ten copies of one transaction racing each other.
    let same = signed(&p, "TXN-SAME");
    for _ in 0..10 {
        let addr = node.addr.clone();
        let env = same.clone();
        handles.push(tokio::spawn(async move {
            client()
                .send(&addr, &RelayMessage::Submit { envelope: env })
                .await
                .unwrap()
        }));
    }

    for h in handles {
        let resp = h.await.unwrap();
        assert!(resp.is_ack(), "{resp:?}");
    }
    assert_eq!(node.engine.store().count(), 21);

    let actions = audit_actions(&node.engine, "TXN-SAME");
    assert_eq!(actions.iter().filter(|a| *a == "stored").count(), 1);
    assert_eq!(actions.iter().filter(|a| *a == "duplicate_receipt").count(), 9);
    assert_eq!(actions.iter().filter(|a| *a == "completed").count(), 1);
}

// ---------------------------------------------------------------------------
// 7. Status Updates
// ---------------------------------------------------------------------------

#[tokio::test]
async fn signed_status_updates_move_the_shipment() {
    let p = parties(None);
    let node = start_node(engine(fast_config("RECV-01", RelayRole::Receiver, 1), &p.registry)).await;
    let c = client();
    c.send(&node.addr, &RelayMessage::Submit { envelope: signed(&p, "TXN-7") })
        .await
        .unwrap();

    for status in [ShipmentStatus::InTransit, ShipmentStatus::Delivered] {
        let update = sign_status_update(
            "TXN-7",
            status,
            "RCV-01",
            Some("Columbus, OH".into()),
            None,
            &p.receiver,
        )
        .unwrap();
        let resp = c
            .send(&node.addr, &RelayMessage::StatusUpdate { update })
            .await
            .unwrap();
        assert!(resp.is_ack(), "{resp:?}");
    }

    let rec = node.engine.store().get("TXN-7").unwrap();
    assert_eq!(rec.status, ShipmentStatus::Delivered);
    let updates = rec
        .audit_trail
        .iter()
        .filter(|e| e.action == "status_updated")
        .count();
    assert_eq!(updates, 2);

    let update =
        sign_status_update("TXN-404", ShipmentStatus::Delivered, "RCV-01", None, None, &p.receiver)
            .unwrap();
    let resp = c
        .send(&node.addr, &RelayMessage::StatusUpdate { update })
        .await
        .unwrap();
    assert_eq!(resp.code, Some(ErrorCode::NotFound));
}

// ---------------------------------------------------------------------------
// 8. Persistence and Shutdown
// ---------------------------------------------------------------------------

#[tokio::test]
async fn records_survive_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let p = parties(None);

    {
        let store = TransactionStore::open(dir.path()).unwrap();
        let node = start_node(RelayEngine::new(
            fast_config("RECV-01", RelayRole::Receiver, 1),
            store,
            Arc::clone(&p.registry),
        ))
        .await;
        let resp = client()
            .send(&node.addr, &RelayMessage::Submit { envelope: signed(&p, "TXN-8") })
            .await
            .unwrap();
        assert!(resp.is_ack());

        node.shutdown.send(true).unwrap();
        node.task.await.unwrap();
        assert!(client()
            .send(
                &node.addr,
                &RelayMessage::StatusQuery {
                    transaction_id: "TXN-8".into()
                }
            )
            .await
            .is_err());
    }

    let store = TransactionStore::open(dir.path()).unwrap();
    let rec = store.get("TXN-8").unwrap();
    assert_eq!(rec.stage, RelayStage::Completed);
    assert_eq!(rec.audit_trail.len(), 2);
}
