//! # Transaction Module
//!
//! The shipment data model and everything needed to put one on the wire:
//! payload documents, the signed envelope, business status, audit entries,
//! and the builder/signing helpers shippers and carriers use.
//!
//! ## Architecture
//!
//! ```text
//! types.rs    — ShipmentStatus and the payload documents
//! envelope.rs — SignedEnvelope, SecurityBlock, StatusUpdate, signable bytes
//! builder.rs  — EnvelopeBuilder and transaction id generation
//! signing.rs  — signing envelopes and status updates
//! audit.rs    — append-only audit entries
//! ```
//!
//! ## Design Decisions
//!
//! - Signatures are detached and cover canonical JSON (see
//!   [`crate::crypto::canonical`]), not struct bytes. Any signer that can
//!   produce sorted-key compact JSON can interoperate.
//! - Money is integer minor units. Weights and coordinates are `f64`; JSON
//!   float round-tripping is exact with `serde_json`'s `float_roundtrip`.
//! - The duplicate/conflict decision on resubmission is made on the payload
//!   digest, which is also the `checksum` the shipper signs.

pub mod audit;
pub mod builder;
pub mod envelope;
pub mod signing;
pub mod types;

pub use audit::{actions, AuditEntry};
pub use builder::{generate_transaction_id, EnvelopeBuilder};
pub use envelope::{
    payload_digest, validate_transaction_id, EnvelopeError, SecurityBlock, SignedEnvelope,
    StatusUpdate,
};
pub use signing::{sign_envelope, sign_status_update};
pub use types::{
    BatchDetails, BillOfLading, CommercialInvoice, ErpIdentifiers, ErpParty, GeoLocation,
    LineItem, PackingSlip, ShipmentPayload, ShipmentStatus, TransitType,
};

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use chrono::NaiveDate;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    /// The Westerville widget shipment every test ships.
    pub fn sample_payload() -> ShipmentPayload {
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
                4,
            ),
            bill_of_lading: BillOfLading {
                bol_number: "BOL-998877".into(),
                carrier: "Buckeye Freight".into(),
                transit_type: TransitType::Truck,
                origin: "Westerville, OH".into(),
                destination: "Columbus, OH".into(),
                pickup_date: date(2024, 1, 1),
                delivery_date: Some(date(2024, 1, 3)),
            },
            batch_details: BatchDetails {
                batch_id: "BATCH-2308-01".into(),
                lot_number: "LOT-77".into(),
                manufacture_date: date(2023, 8, 15),
                expiry_date: Some(date(2025, 8, 14)),
                serial_numbers: vec!["SN-0001".into(), "SN-0002".into()],
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
}
