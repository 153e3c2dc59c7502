//! # Relay Module
//!
//! Moves signed shipments between nodes. Everything that touches a socket
//! lives here; everything below it (codec, verifier, store) is synchronous
//! or at least socket-agnostic.
//!
//! ## Architecture
//!
//! ```text
//!   shipper ──RelayClient──► RelayListener ──► RelayEngine ──► TransactionStore
//!                                                  │
//!                                                  ├─► Forwarder ──RelayClient──► next hop
//!                                                  ├─► ErpGateway
//!                                                  └─► Forwarder ──RelayClient──► originator
//! ```
//!
//! ```text
//! engine.rs   — per-transaction state machine and dispatch
//! listener.rs — accept loop, one task per connection
//! client.rs   — one-shot outbound sends with retry
//! forward.rs  — next-hop forwarding, completion notices, backoff
//! erp.rs      — ERP collaborator trait and the mock
//! observer.rs — hooks for metrics
//! config.rs   — node role and timeouts
//! error.rs    — RelayError and its wire mapping
//! ```

pub mod client;
pub mod config;
pub mod engine;
pub mod erp;
pub mod error;
pub mod forward;
pub mod listener;
pub mod observer;

pub use client::{ClientError, RelayClient};
pub use config::{RelayConfig, RelayRole};
pub use engine::RelayEngine;
pub use erp::{ErpError, ErpGateway, MockErp};
pub use error::{RelayError, RelayResult};
pub use forward::{Forwarder, RetryPolicy};
pub use listener::RelayListener;
pub use observer::{NoopObserver, RelayObserver};
