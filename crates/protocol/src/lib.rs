//! Memcached binary protocol.
//!
//! This crate provides the wire format spoken between the client and each
//! cache node:
//! - Opcodes and response status codes
//! - The fixed 24-byte request/response header
//! - Request encoding and response decoding
//! - Extras layouts and expiration encoding
//!
//! It performs no I/O; the client crate owns sockets.

pub mod error;
pub mod extras;
pub mod frame;
pub mod header;
pub mod opcode;
pub mod status;

pub use error::{ProtocolError, Result};
pub use frame::{Request, Response};
pub use header::{RequestHeader, ResponseHeader, HEADER_LEN, MAGIC_REQUEST, MAGIC_RESPONSE};
pub use opcode::Opcode;
pub use status::Status;

/// Longest key the protocol accepts, in bytes.
pub const MAX_KEY_LEN: usize = 250;
