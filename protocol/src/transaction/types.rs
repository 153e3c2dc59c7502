//! Core type definitions for ShipSync shipments.
//!
//! These are the documents a shipment carries: packing slip, bill of lading,
//! batch details, commercial invoice, the ERP identifiers of every party, and
//! where the shipment was when the event happened.
//!
//! Everything here round-trips through both JSON (the wire) and bincode (the
//! store), so no `skip_serializing_if`, no untagged enums, no `flatten`.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// ShipmentStatus
// ---------------------------------------------------------------------------

/// Business lifecycle of a shipment.
///
/// ```text
/// INITIATED ──► IN_TRANSIT ──► DELIVERED ──► CONFIRMED
///     │              │              │
///     └──────────────┴──────────────┴──────► REJECTED
/// ```
///
/// Forward moves may skip a step (a receiver can confirm a delivery nobody
/// scanned in transit). Backward moves and self-transitions never apply.
/// `CONFIRMED` and `REJECTED` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShipmentStatus {
    /// Created by the shipper, not yet picked up.
    Initiated,
    /// Picked up by the carrier.
    InTransit,
    /// Dropped at the receiver's dock.
    Delivered,
    /// Receiver signed off on the delivery.
    Confirmed,
    /// Refused or cancelled. Terminal.
    Rejected,
}

impl ShipmentStatus {
    /// Position in the forward order. `Rejected` sits outside it.
    fn rank(&self) -> Option<u8> {
        match self {
            Self::Initiated => Some(0),
            Self::InTransit => Some(1),
            Self::Delivered => Some(2),
            Self::Confirmed => Some(3),
            Self::Rejected => None,
        }
    }

    /// Whether no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Confirmed | Self::Rejected)
    }

    /// Whether moving from `self` to `next` is allowed.
    pub fn can_transition_to(&self, next: ShipmentStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match (self.rank(), next.rank()) {
            (_, None) => true,
            (Some(from), Some(to)) => to > from,
            (None, Some(_)) => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initiated => "INITIATED",
            Self::InTransit => "IN_TRANSIT",
            Self::Delivered => "DELIVERED",
            Self::Confirmed => "CONFIRMED",
            Self::Rejected => "REJECTED",
        }
    }
}

impl fmt::Display for ShipmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ShipmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "INITIATED" => Ok(Self::Initiated),
            "IN_TRANSIT" => Ok(Self::InTransit),
            "DELIVERED" => Ok(Self::Delivered),
            "CONFIRMED" => Ok(Self::Confirmed),
            "REJECTED" => Ok(Self::Rejected),
            other => Err(format!("unknown shipment status: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// TransitType
// ---------------------------------------------------------------------------

/// How the freight moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitType {
    Truck,
    Rail,
    Air,
    Ocean,
    Intermodal,
    Parcel,
}

// ---------------------------------------------------------------------------
// Documents
// ---------------------------------------------------------------------------

/// One line on the packing slip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub sku: String,
    pub description: String,
    pub quantity: u32,
    /// Weight of a single unit, kilograms.
    pub unit_weight_kg: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackingSlip {
    pub items: Vec<LineItem>,
    pub total_weight_kg: f64,
    pub pallet_count: u32,
}

impl PackingSlip {
    /// Build a slip from its lines, computing the total weight.
    pub fn from_items(items: Vec<LineItem>, pallet_count: u32) -> Self {
        let total_weight_kg = items
            .iter()
            .map(|i| i.unit_weight_kg * f64::from(i.quantity))
            .sum();
        Self {
            items,
            total_weight_kg,
            pallet_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillOfLading {
    pub bol_number: String,
    pub carrier: String,
    pub transit_type: TransitType,
    pub origin: String,
    pub destination: String,
    pub pickup_date: NaiveDate,
    pub delivery_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchDetails {
    pub batch_id: String,
    pub lot_number: String,
    pub manufacture_date: NaiveDate,
    pub expiry_date: Option<NaiveDate>,
    pub serial_numbers: Vec<String>,
}

/// Commercial invoice. Monetary values are integers in the currency's
/// smallest unit (cents for USD). No floating point near money.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommercialInvoice {
    pub invoice_number: String,
    pub total_value: u64,
    pub tax_amount: u64,
    /// ISO 4217 code, e.g. `USD`.
    pub currency: String,
    pub payment_terms: String,
}

/// A party's identity in its own ERP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErpParty {
    /// ERP product, e.g. `SYTELINE` or `SAP`.
    pub system: String,
    /// The party's id within that ERP.
    pub erp_id: String,
    /// Sales or delivery order number on that side, if any.
    pub order_number: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErpIdentifiers {
    pub shipper: ErpParty,
    pub receiver: ErpParty,
    pub carrier: ErpParty,
    pub po_number: String,
}

/// Where the shipment was when the event was recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoLocation {
    pub latitude: f64,
    pub longitude: f64,
    pub address: String,
}

impl fmt::Display for GeoLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:.4}, {:.4})", self.address, self.latitude, self.longitude)
    }
}

// ---------------------------------------------------------------------------
// ShipmentPayload
// ---------------------------------------------------------------------------

/// The business content of a shipment. This is what the checksum covers and
/// what decides whether a resubmission is a duplicate or a conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShipmentPayload {
    pub packing_slip: PackingSlip,
    pub bill_of_lading: BillOfLading,
    pub batch_details: BatchDetails,
    pub commercial_invoice: CommercialInvoice,
    pub erp_identifiers: ErpIdentifiers,
    pub location: GeoLocation,
}
