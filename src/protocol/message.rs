//! Decoded message bodies
//!
//! These are owned values; nothing here borrows from a network buffer.

use super::{Capabilities, ColourSpace, ErrorCode, MessageType};

/// One spectral colour sample
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ColourDatum {
    /// Frequency in Hz
    pub frequency: f32,
    /// Wavelength in nm
    pub wavelength: f32,
    /// Red component
    pub r: f32,
    /// Green component
    pub g: f32,
    /// Blue component
    pub b: f32,
    /// Spectral magnitude
    pub magnitude: f32,
    /// Spectral phase
    pub phase: f32,
}

/// One analysis window worth of colour samples
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ColourFrame {
    /// Samples, in the order the producer emitted them
    pub samples: Vec<ColourDatum>,
    /// Audio sample rate in Hz
    pub sample_rate: u32,
    /// FFT window size
    pub fft_size: u32,
    /// When the audio frame was produced (µs, producer's clock)
    pub timestamp: u64,
}

/// Client looking for a server
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DiscoveryRequest {
    /// Client display name (at most 63 bytes on the wire)
    pub client_name: String,
    /// Client version
    pub client_version: u32,
}

/// Server advertising where to connect
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DiscoveryResponse {
    /// Server display name (at most 63 bytes on the wire)
    pub server_name: String,
    /// Server version
    pub server_version: u32,
    /// IPC port, zero for path-addressed endpoints
    pub ipc_port: u16,
    /// IPC endpoint path (at most 255 bytes on the wire)
    pub ipc_path: String,
    /// Advertised features
    pub capabilities: Capabilities,
}

/// Processing settings exchanged in both directions
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ConfigUpdate {
    /// Whether temporal smoothing is on
    pub smoothing_enabled: bool,
    /// Smoothing factor; consumers clamp it to `[0, 1]`
    pub smoothing_factor: f32,
    /// Raw colour-space selector, see [`ConfigUpdate::colour_space_kind`]
    pub colour_space: u32,
    /// Lower frequency bound in Hz
    pub frequency_min: u32,
    /// Upper frequency bound in Hz
    pub frequency_max: u32,
}

impl ConfigUpdate {
    /// Typed colour space, if the selector is known
    #[must_use]
    pub fn colour_space_kind(&self) -> Option<ColourSpace> {
        ColourSpace::from_u32(self.colour_space)
    }

    /// Smoothing factor clamped to `[0, 1]`
    #[must_use]
    pub fn clamped_smoothing_factor(&self) -> f32 {
        self.smoothing_factor.clamp(0.0, 1.0)
    }
}

impl Default for ConfigUpdate {
    fn default() -> Self {
        Self {
            smoothing_enabled: true,
            smoothing_factor: 0.8,
            colour_space: ColourSpace::Rgb.as_u32(),
            frequency_min: 20,
            frequency_max: 20_000,
        }
    }
}

/// Error (or success-coded) response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ErrorResponse {
    /// Raw error code, see [`ErrorResponse::error_code`]
    pub code: u32,
    /// Human-readable text (at most 255 bytes on the wire)
    pub message: String,
}

impl ErrorResponse {
    /// Typed error code, if known
    #[must_use]
    pub fn error_code(&self) -> Option<ErrorCode> {
        ErrorCode::from_u32(self.code)
    }

    /// Whether this response reports success (the pong reply)
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.code == ErrorCode::Success.as_u32()
    }
}

/// Any decoded message body
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Discovery request
    DiscoveryRequest(DiscoveryRequest),
    /// Discovery response
    DiscoveryResponse(DiscoveryResponse),
    /// Colour frame
    ColourData(ColourFrame),
    /// Config update
    ConfigUpdate(ConfigUpdate),
    /// Ping (no body)
    Ping,
    /// Pong (no body)
    Pong,
    /// Error response
    Error(ErrorResponse),
}

impl Message {
    /// Wire type of this body
    #[must_use]
    pub const fn message_type(&self) -> MessageType {
        match self {
            Self::DiscoveryRequest(_) => MessageType::DiscoveryRequest,
            Self::DiscoveryResponse(_) => MessageType::DiscoveryResponse,
            Self::ColourData(_) => MessageType::ColourData,
            Self::ConfigUpdate(_) => MessageType::ConfigUpdate,
            Self::Ping => MessageType::Ping,
            Self::Pong => MessageType::Pong,
            Self::Error(_) => MessageType::Error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_helpers() {
        let config = ConfigUpdate {
            smoothing_factor: 1.7,
            colour_space: 1,
            ..ConfigUpdate::default()
        };

        assert_eq!(config.colour_space_kind(), Some(ColourSpace::Lab));
        assert!((config.clamped_smoothing_factor() - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_error_response_success() {
        let pong = ErrorResponse {
            code: 0,
            message: "pong".into(),
        };
        assert!(pong.is_success());
        assert_eq!(pong.error_code(), Some(ErrorCode::Success));
    }
}
