//! Protocol error types.

use thiserror::Error;

/// Errors produced while framing a byte stream or decoding PDU bodies.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid command_length {length}: a complete header is {min} bytes")]
    InvalidLength { length: u32, min: u32 },

    #[error("PDU too large: {size} bytes (max {max})")]
    PduTooLarge { size: u32, max: u32 },

    #[error("receive buffer overflow: {size} bytes (max {max})")]
    BufferOverflow { size: usize, max: usize },

    #[error("truncated PDU body: field '{field}' missing or unterminated")]
    Truncated { field: &'static str },

    #[error("invalid UTF-8 in field '{field}'")]
    InvalidUtf8 { field: &'static str },
}
