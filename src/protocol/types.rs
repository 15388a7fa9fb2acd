//! Message types, error codes, capability flags and colour spaces

use std::fmt;

/// Wire message types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum MessageType {
    /// Client looking for a server
    DiscoveryRequest = 0x01,
    /// Server advertising its endpoint
    DiscoveryResponse = 0x02,

    /// One frame of colour samples
    ColourData = 0x10,

    /// Smoothing / colour-space / frequency-range settings
    ConfigUpdate = 0x20,

    /// Liveness probe
    Ping = 0x30,
    /// Liveness reply
    Pong = 0x31,

    /// Error (or success-coded) response
    Error = 0xFF,
}

impl MessageType {
    /// Convert from byte
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::DiscoveryRequest),
            0x02 => Some(Self::DiscoveryResponse),
            0x10 => Some(Self::ColourData),
            0x20 => Some(Self::ConfigUpdate),
            0x30 => Some(Self::Ping),
            0x31 => Some(Self::Pong),
            0xFF => Some(Self::Error),
            _ => None,
        }
    }

    /// Convert to byte
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Whether this type travels over the discovery channel
    #[must_use]
    pub const fn is_discovery(self) -> bool {
        matches!(self, Self::DiscoveryRequest | Self::DiscoveryResponse)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::DiscoveryRequest => "DiscoveryRequest",
            Self::DiscoveryResponse => "DiscoveryResponse",
            Self::ColourData => "ColourData",
            Self::ConfigUpdate => "ConfigUpdate",
            Self::Ping => "Ping",
            Self::Pong => "Pong",
            Self::Error => "Error",
        };
        write!(f, "{name}")
    }
}

/// Numeric codes carried by error responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u32)]
pub enum ErrorCode {
    /// Not an error; used for the pong reply
    Success = 0,
    /// Message could not be parsed or is not accepted here
    InvalidMessage = 1,
    /// Peer speaks another protocol version
    UnsupportedVersion = 2,
    /// Message exceeded a size bound
    BufferOverflow = 3,
    /// Socket-level failure
    TransportError = 4,
    /// Encoding failure
    SerialisationError = 5,
}

impl ErrorCode {
    /// Convert from the wire value
    #[must_use]
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Success),
            1 => Some(Self::InvalidMessage),
            2 => Some(Self::UnsupportedVersion),
            3 => Some(Self::BufferOverflow),
            4 => Some(Self::TransportError),
            5 => Some(Self::SerialisationError),
            _ => None,
        }
    }

    /// Convert to the wire value
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self as u32
    }
}

/// Colour space selector carried by config updates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u32)]
pub enum ColourSpace {
    /// Plain RGB
    #[default]
    Rgb = 0,
    /// CIE L*a*b*
    Lab = 1,
    /// CIE XYZ
    Xyz = 2,
}

impl ColourSpace {
    /// Convert from the wire value
    #[must_use]
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Rgb),
            1 => Some(Self::Lab),
            2 => Some(Self::Xyz),
            _ => None,
        }
    }

    /// Convert to the wire value
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self as u32
    }
}

/// Capability bit flags advertised in discovery responses
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Capabilities(u32);

impl Capabilities {
    /// Server streams colour frames
    pub const COLOUR_DATA_STREAMING: u32 = 1 << 0;
    /// Server accepts config updates
    pub const CONFIG_UPDATES: u32 = 1 << 1;
    /// Server answers discovery requests
    pub const REAL_TIME_DISCOVERY: u32 = 1 << 2;
    /// Server can emit Lab colours
    pub const LAB_COLOUR_SPACE: u32 = 1 << 3;
    /// Server can emit XYZ colours
    pub const XYZ_COLOUR_SPACE: u32 = 1 << 4;

    /// Create empty capabilities
    #[must_use]
    pub const fn new() -> Self {
        Self(0)
    }

    /// Wrap raw bits; unknown bits are kept so newer peers round-trip
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Raw bits
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Set a flag
    #[must_use]
    pub const fn with(mut self, flag: u32) -> Self {
        self.0 |= flag;
        self
    }

    /// Check if flag is set
    #[must_use]
    pub const fn has(self, flag: u32) -> bool {
        (self.0 & flag) != 0
    }
}

impl fmt::Display for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (Self::COLOUR_DATA_STREAMING, "STREAMING"),
            (Self::CONFIG_UPDATES, "CONFIG"),
            (Self::REAL_TIME_DISCOVERY, "DISCOVERY"),
            (Self::LAB_COLOUR_SPACE, "LAB"),
            (Self::XYZ_COLOUR_SPACE, "XYZ"),
        ];
        let parts: Vec<&str> = names
            .iter()
            .filter(|(flag, _)| self.has(*flag))
            .map(|(_, name)| *name)
            .collect();
        if parts.is_empty() {
            write!(f, "NONE")
        } else {
            write!(f, "{}", parts.join(" | "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_roundtrip() {
        let types = [
            MessageType::DiscoveryRequest,
            MessageType::DiscoveryResponse,
            MessageType::ColourData,
            MessageType::ConfigUpdate,
            MessageType::Ping,
            MessageType::Pong,
            MessageType::Error,
        ];

        for msg_type in types {
            let byte = msg_type.as_u8();
            let decoded = MessageType::from_u8(byte).unwrap();
            assert_eq!(msg_type, decoded);
        }
        assert_eq!(MessageType::from_u8(0x42), None);
    }

    #[test]
    fn test_capabilities() {
        let caps = Capabilities::new()
            .with(Capabilities::COLOUR_DATA_STREAMING)
            .with(Capabilities::LAB_COLOUR_SPACE);

        assert!(caps.has(Capabilities::COLOUR_DATA_STREAMING));
        assert!(caps.has(Capabilities::LAB_COLOUR_SPACE));
        assert!(!caps.has(Capabilities::XYZ_COLOUR_SPACE));
        assert_eq!(caps.bits(), 0x09);
        assert_eq!(caps.to_string(), "STREAMING | LAB");
    }

    #[test]
    fn test_codes_from_wire() {
        assert_eq!(ErrorCode::from_u32(1), Some(ErrorCode::InvalidMessage));
        assert_eq!(ErrorCode::from_u32(99), None);
        assert_eq!(ColourSpace::from_u32(2), Some(ColourSpace::Xyz));
        assert_eq!(ColourSpace::from_u32(3), None);
    }
}
