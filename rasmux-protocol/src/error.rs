//! Protocol error types.

use thiserror::Error;

/// Protocol-level errors that can occur while framing, encoding or decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unexpected end of buffer: need {needed} more bytes")]
    UnexpectedEof { needed: usize },

    #[error("nullable size has the null flag set with non-zero payload: {0:#04x}")]
    NullFlagViolation(u8),

    #[error("varint overflows 64 bits")]
    VarintOverflow,

    #[error("packet too large: {size} bytes (max {max})")]
    PacketTooLarge { size: usize, max: usize },

    #[error("invalid UTF-8 in string value")]
    InvalidUtf8,

    #[error("unknown endpoint message kind: {0:#04x}")]
    UnknownMessageKind(u8),

    #[error("timestamp out of range: {0} ticks")]
    TimestampOutOfRange(i64),

    #[error("invalid signature length: {0} (expected 16 or 32)")]
    InvalidSignatureLength(usize),

    #[error("invalid service version: {0}")]
    InvalidServiceVersion(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
