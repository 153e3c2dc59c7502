//! # Wire Protocol
//!
//! Length-prefixed JSON frames and the messages they carry. One message in,
//! one response out, connection closed. No sessions, no pipelining.

pub mod frame;
pub mod message;

pub use frame::{FrameCodec, FramingError};
pub use message::{CompletionNotice, ErrorCode, RelayMessage, RelayResponse, ResponseStatus};
