//! Protocol error types

use thiserror::Error;

/// Errors produced while encoding or decoding USB/IP PDUs
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Command code is not part of the USB/IP protocol
    #[error("Unknown USB/IP command: {command:#06x}")]
    UnknownCommand { command: u32 },

    /// Command code is valid but not allowed in this direction
    /// (only RET_SUBMIT and RET_UNLINK may arrive from the server)
    #[error("Unexpected USB/IP command on ingress: {command:#06x}")]
    UnexpectedCommand { command: u32 },

    /// Reply announces a payload larger than the protocol allows
    #[error("Payload too large: {size} bytes (max: {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// Buffer too small to hold a complete PDU
    #[error("Truncated PDU: expected {expected} bytes, got {actual}")]
    TruncatedPdu { expected: usize, actual: usize },

    /// I/O error while reading or writing a PDU
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Type alias for protocol results
pub type Result<T> = std::result::Result<T, ProtocolError>;
