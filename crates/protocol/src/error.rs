//! Error types for wire decoding.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Malformed or unexpected bytes on the wire.
///
/// Any of these means the byte stream can no longer be trusted, so the
/// connection that produced it must be discarded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("bad magic byte 0x{0:02x}")]
    BadMagic(u8),
    #[error("header declares {extras} extras + {key} key bytes but body is {body}")]
    InconsistentLengths { extras: u8, key: u16, body: u32 },
    #[error("body of {declared} bytes exceeds limit of {limit}")]
    BodyTooLarge { declared: u32, limit: u32 },
    #[error("unexpected opcode 0x{0:02x}")]
    UnexpectedOpcode(u8),
    #[error("opaque mismatch: expected {expected}, got {actual}")]
    OpaqueMismatch { expected: u32, actual: u32 },
    #[error("malformed extras: expected {expected} bytes, got {actual}")]
    MalformedExtras { expected: usize, actual: usize },
    #[error("malformed value: {0}")]
    MalformedValue(&'static str),
    #[error("key of {0} bytes exceeds protocol maximum")]
    KeyTooLong(usize),
}
