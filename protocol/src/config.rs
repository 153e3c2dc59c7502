//! # Protocol Configuration & Constants
//!
//! Every magic number in ShipSync lives here. If you're hardcoding a port or
//! a timeout somewhere else, move it here and reference the constant.
//!
//! Runtime overrides (CLI flags, environment variables) are assembled into
//! [`RelayConfig`](crate::relay::RelayConfig) by the node binary; these values
//! are the defaults it starts from.

use std::time::Duration;

// ---------------------------------------------------------------------------
// Protocol Version
// ---------------------------------------------------------------------------

/// Wire protocol version. Carried in status responses so operators can tell
/// mismatched deployments apart in the logs.
pub const PROTOCOL_VERSION: &str = "0.1.0";

/// Protocol family name, used in log lines and the HTTP status endpoint.
pub const PROTOCOL_NAME: &str = "ShipSync";

// ---------------------------------------------------------------------------
// Framing
// ---------------------------------------------------------------------------

/// Length of the big-endian frame header in bytes.
pub const FRAME_HEADER_LEN: usize = 4;

/// Default maximum frame body size. A full shipment payload with a few
/// hundred line items is well under 100 KiB; 1 MiB leaves room without
/// letting a peer make us allocate arbitrary amounts of memory.
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

// ---------------------------------------------------------------------------
// Cryptographic Parameters
// ---------------------------------------------------------------------------

/// ECDSA over secp256k1 with SHA-256. The default for shippers.
pub const ALGORITHM_ES256K: &str = "ES256K";

/// Ed25519. Accepted for carriers and handheld scanners.
pub const ALGORITHM_ED25519: &str = "Ed25519";

/// Raw signature length for both supported schemes (`r || s` for ECDSA).
pub const SIGNATURE_LENGTH: usize = 64;

/// SEC1 compressed secp256k1 public key length.
pub const ES256K_PUBLIC_KEY_LENGTH: usize = 33;

/// Ed25519 public key length.
pub const ED25519_PUBLIC_KEY_LENGTH: usize = 32;

// ---------------------------------------------------------------------------
// Timing Constants
// ---------------------------------------------------------------------------

/// Read/write deadline for a single inbound connection. A handler that
/// stalls past this is aborted.
pub const CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Deadline for establishing an outbound connection to the next hop.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// How long an inbound submitter is kept waiting for the forwarding outcome
/// before being acknowledged at the `STORED` stage.
pub const ACK_WAIT: Duration = Duration::from_secs(20);

/// Forwarding attempts before a transaction is left for reconciliation.
pub const FORWARD_MAX_ATTEMPTS: u32 = 5;

/// Delay before the first forwarding retry. Doubles on each attempt.
pub const FORWARD_BASE_DELAY: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Network Parameters
// ---------------------------------------------------------------------------

/// Default bridge listener port (shipper submissions).
pub const DEFAULT_BRIDGE_PORT: u16 = 65432;

/// Default completion listener port on the shipper side.
pub const DEFAULT_COMPLETION_PORT: u16 = 65433;

/// Default receiver listener port (relayed payloads from the bridge).
pub const DEFAULT_RECEIVER_PORT: u16 = 65434;

/// Default HTTP browsing API port.
pub const DEFAULT_API_PORT: u16 = 5000;

/// Default Prometheus metrics port.
pub const DEFAULT_METRICS_PORT: u16 = 9742;

// ---------------------------------------------------------------------------
// Transaction Identifiers
// ---------------------------------------------------------------------------

/// Prefix for shipper-generated transaction ids.
pub const SHIPMENT_ID_PREFIX: &str = "SHP";

/// Maximum accepted transaction id length.
pub const MAX_TRANSACTION_ID_LEN: usize = 128;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ports_are_distinct() {
        let ports = [
            DEFAULT_BRIDGE_PORT,
            DEFAULT_COMPLETION_PORT,
            DEFAULT_RECEIVER_PORT,
            DEFAULT_API_PORT,
            DEFAULT_METRICS_PORT,
        ];
        for (i, a) in ports.iter().enumerate() {
            for b in &ports[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_timing_constants_sanity() {
        // The submitter must not be kept waiting longer than the connection
        // deadline allows, or every slow forward turns into a timeout.
        assert!(ACK_WAIT < CONNECTION_TIMEOUT);
        assert!(CONNECT_TIMEOUT <= CONNECTION_TIMEOUT);
        assert!(FORWARD_MAX_ATTEMPTS > 0);
    }

    #[test]
    fn test_frame_limit_fits_header() {
        assert!(MAX_FRAME_BYTES <= u32::MAX as usize);
        assert_eq!(FRAME_HEADER_LEN, 4);
    }
}
