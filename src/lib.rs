//! Synesthesia API - real-time colour-data streaming over local IPC
//!
//! This library streams colour frames derived from audio analysis to external
//! consumers and accepts configuration updates back from them. It includes a
//! fixed binary wire protocol, a Unix-socket IPC transport, UDP discovery, an
//! adaptive-rate broadcast server and an auto-reconnecting client.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use synesthesia_api::{Client, ClientConfig, ClientEvent};
//!
//! let (client, events) = Client::new(ClientConfig::default());
//! client.discover_and_connect()?;
//!
//! for event in events {
//!     if let ClientEvent::ColourData { frame, .. } = event {
//!         println!("{} colours at {} Hz", frame.samples.len(), frame.sample_rate);
//!     }
//! }
//! # Ok::<(), synesthesia_api::ClientError>(())
//! ```
//!
//! # Features
//!
//! - **Bounds-checked codec** - every length and count is validated before it is trusted
//! - **Adaptive frame rate** - one client gets the maximum rate, more clients share it
//! - **Buffer pooling** - the broadcast path reuses its encode buffers
//! - **Discovery** - clients find servers with a UDP broadcast
//!
//! All integers and floats on the wire are little-endian.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

#[cfg(unix)]
pub mod client;
pub mod protocol;
#[cfg(unix)]
pub mod server;
pub mod transport;

#[cfg(unix)]
pub use client::{Client, ClientConfig, ClientError, ClientEvent, ClientState, ServerInfo};
pub use protocol::{
    Capabilities, ColourDatum, ColourFrame, ColourSpace, ConfigUpdate, Error, ErrorCode,
    MAGIC_NUMBER, MAX_COLOURS_PER_MESSAGE, MAX_MESSAGE_SIZE, Message, MessageHeader, MessageType,
    MetricsSnapshot, Result,
};
#[cfg(unix)]
pub use server::{FrameProvider, Server, ServerConfig, ServerError, ServerEvent};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Snapshot of the process-wide protocol counters.
#[must_use]
pub fn metrics() -> MetricsSnapshot {
    MetricsSnapshot::capture()
}
