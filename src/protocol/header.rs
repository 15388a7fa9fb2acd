//! Synesthesia message header
//!
//! The header is 20 bytes, packed, little-endian.

use super::{Error, HEADER_SIZE, MAGIC_NUMBER, MessageType, PROTOCOL_VERSION, Result};

/// Message header
///
/// # Wire Format
///
/// ```text
/// 0                   1                   2                   3
/// 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                        Magic Number (4)                       |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |    Version    | Message Type  |       Payload Length (2)      |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                        Sequence (4)                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                                                               |
/// +                      Timestamp µs (8)                         +
/// |                                                               |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    magic: u32,
    version: u8,
    msg_type: u8,
    length: u16,
    sequence: u32,
    timestamp: u64,
}

impl MessageHeader {
    /// Create a new message header
    #[must_use]
    pub fn new(msg_type: MessageType, length: u16, sequence: u32, timestamp: u64) -> Self {
        Self {
            magic: MAGIC_NUMBER,
            version: PROTOCOL_VERSION,
            msg_type: msg_type.as_u8(),
            length,
            sequence,
            timestamp,
        }
    }

    /// Get magic number
    #[must_use]
    pub const fn magic(&self) -> u32 {
        self.magic
    }

    /// Get version byte
    #[must_use]
    pub const fn version(&self) -> u8 {
        self.version
    }

    /// Get message type byte
    #[must_use]
    pub const fn msg_type_byte(&self) -> u8 {
        self.msg_type
    }

    /// Get message type, if the byte names one
    #[must_use]
    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::from_u8(self.msg_type)
    }

    /// Get payload length
    #[must_use]
    pub const fn length(&self) -> u16 {
        self.length
    }

    /// Get sequence number
    #[must_use]
    pub const fn sequence(&self) -> u32 {
        self.sequence
    }

    /// Get timestamp (µs since the sender's monotonic epoch)
    #[must_use]
    pub const fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Total encoded size of the message this header describes
    #[must_use]
    pub const fn total_len(&self) -> usize {
        HEADER_SIZE + self.length as usize
    }

    /// Validate magic and version
    pub fn validate(&self) -> Result<()> {
        if self.magic != MAGIC_NUMBER {
            return Err(Error::BadMagic { found: self.magic });
        }

        if self.version != PROTOCOL_VERSION {
            return Err(Error::UnsupportedVersion {
                found: self.version,
            });
        }

        Ok(())
    }

    /// Convert to bytes (little-endian)
    #[must_use]
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];

        bytes[0..4].copy_from_slice(&self.magic.to_le_bytes());
        bytes[4] = self.version;
        bytes[5] = self.msg_type;
        bytes[6..8].copy_from_slice(&self.length.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.sequence.to_le_bytes());
        bytes[12..20].copy_from_slice(&self.timestamp.to_le_bytes());

        bytes
    }

    /// Parse and validate from bytes (little-endian)
    ///
    /// Only the first [`HEADER_SIZE`] bytes are read; checking the declared
    /// length against the buffer is left to [`super::decode_header`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let Some(raw) = bytes.first_chunk::<HEADER_SIZE>() else {
            return Err(Error::Truncated {
                needed: HEADER_SIZE,
                got: bytes.len(),
            });
        };

        let header = Self {
            magic: u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]),
            version: raw[4],
            msg_type: raw[5],
            length: u16::from_le_bytes([raw[6], raw[7]]),
            sequence: u32::from_le_bytes([raw[8], raw[9], raw[10], raw[11]]),
            timestamp: u64::from_le_bytes([
                raw[12], raw[13], raw[14], raw[15], raw[16], raw[17], raw[18], raw[19],
            ]),
        };

        header.validate()?;
        Ok(header)
    }
}
