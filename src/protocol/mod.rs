//! Synesthesia wire protocol
//!
//! This module provides the wire format, message types, and codec shared by
//! the server and client. Every integer and float on the wire is little-endian.

mod codec;
mod error;
mod header;
mod message;
pub(crate) mod metrics;
mod types;

pub use codec::{
    Envelope, SequenceCounter, decode, decode_body, decode_header, encode_colour_data,
    encode_colour_data_into, encode_config_update, encode_discovery_request,
    encode_discovery_response, encode_error, encode_ping, encode_pong, frame_len,
    timestamp_micros,
};
pub use error::{Error, Result};
pub use header::MessageHeader;
pub use message::{
    ColourDatum, ColourFrame, ConfigUpdate, DiscoveryRequest, DiscoveryResponse, ErrorResponse,
    Message,
};
pub use metrics::MetricsSnapshot;
pub use types::{Capabilities, ColourSpace, ErrorCode, MessageType};

/// Protocol magic number: "SYNE" in ASCII
pub const MAGIC_NUMBER: u32 = 0x5359_4E45;

/// The only protocol version this crate speaks
pub const PROTOCOL_VERSION: u8 = 1;

/// Header size in bytes
pub const HEADER_SIZE: usize = 20;

/// Largest message, header included, that may travel over a transport (64 KiB)
pub const MAX_MESSAGE_SIZE: usize = 65_536;

/// Size of one encoded [`ColourDatum`] (seven `f32`)
pub const COLOUR_DATUM_SIZE: usize = 28;

/// Fixed part of a colour-data payload: sample rate, FFT size, count, frame timestamp
pub const COLOUR_DATA_FIXED_SIZE: usize = 20;

/// Maximum number of colour samples that fit in one message
pub const MAX_COLOURS_PER_MESSAGE: usize =
    (MAX_MESSAGE_SIZE - HEADER_SIZE - COLOUR_DATA_FIXED_SIZE) / COLOUR_DATUM_SIZE;

/// Capacity of client/server name fields, terminator included
pub const NAME_CAPACITY: usize = 64;

/// Capacity of the IPC path field, terminator included
pub const PATH_CAPACITY: usize = 256;

/// Capacity of the error message field, terminator included
pub const ERROR_MESSAGE_CAPACITY: usize = 256;

/// Default UDP discovery port
pub const DEFAULT_DISCOVERY_PORT: u16 = 19_851;

/// Default local IPC endpoint
pub const DEFAULT_IPC_ENDPOINT: &str = "/tmp/synesthesia_api";
