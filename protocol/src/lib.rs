// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # ShipSync — Core Library
//!
//! ShipSync relays signed shipment documents (packing slip, bill of lading,
//! invoice, ERP references) from a shipper, through a bridge, to a receiver,
//! and refuses to lose or alter one on the way.
//!
//! The stance is simple: verify before you store, store before you
//! acknowledge, and never un-store. A bridge that can't reach its next hop
//! keeps the record and says so; it does not pretend the shipment vanished.
//!
//! ## Architecture
//!
//! - **crypto** — ES256K and Ed25519 keys, signatures, canonical JSON, hashing.
//! - **transaction** — Shipment documents, the signed envelope, status updates.
//! - **trust** — The trusted sender registry and the signature verifier.
//! - **storage** — The transaction store on sled. Append-only audit trails.
//! - **wire** — Length-prefixed JSON frames and the message set.
//! - **relay** — The engine, the listener, the client, and forwarding.
//! - **config** — Protocol constants and defaults.
//!
//! ## Design Philosophy
//!
//! 1. A signature either verifies against the registry or it doesn't. There
//!    is no "probably fine".
//! 2. Every I/O has a deadline. A stalled peer costs one task, not the node.
//! 3. The audit trail only grows. If something went wrong, it's in there.
//! 4. If it touches a shipment, it has tests. Plural.

pub mod config;
pub mod crypto;
pub mod relay;
pub mod storage;
pub mod transaction;
pub mod trust;
pub mod wire;
