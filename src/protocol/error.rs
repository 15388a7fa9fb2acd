//! Protocol error types

use thiserror::Error;

use super::MessageType;

/// Errors raised while validating or decoding wire messages
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Fewer bytes than the header or its declared length require
    #[error("truncated message: need {needed} bytes, got {got}")]
    Truncated {
        /// Bytes required
        needed: usize,
        /// Bytes available
        got: usize,
    },

    /// Invalid magic number
    #[error("invalid magic number: expected 0x53594E45, got {found:#x}")]
    BadMagic {
        /// Found magic number
        found: u32,
    },

    /// Version byte other than the supported one
    #[error("unsupported protocol version {found}")]
    UnsupportedVersion {
        /// Found version byte
        found: u8,
    },

    /// Type byte that names no known message
    #[error("unknown message type: {type_byte:#x}")]
    UnknownMessageType {
        /// Unknown type byte
        type_byte: u8,
    },

    /// Header was valid but the body failed type-specific validation
    #[error("malformed {message} payload: need {needed} bytes, got {got}")]
    Malformed {
        /// Message kind being decoded
        message: MessageType,
        /// Bytes the payload must hold
        needed: usize,
        /// Bytes the payload holds
        got: usize,
    },

    /// A message declares more bytes than any transport will carry
    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge {
        /// Declared size
        size: usize,
        /// Maximum allowed
        max: usize,
    },
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
