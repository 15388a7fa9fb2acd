//! Transport-level error types.

use std::io;

use thiserror::Error;

/// Unified error type for transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Underlying socket failure.
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
    /// Binding or connecting to the endpoint failed.
    #[error("cannot open endpoint {endpoint}: {source}")]
    Endpoint {
        /// Path or address that could not be opened.
        endpoint: String,
        /// Cause reported by the OS.
        #[source]
        source: io::Error,
    },
    /// Operation needs a running transport.
    #[error("transport is not running")]
    NotRunning,
    /// `start` was called twice.
    #[error("transport is already running")]
    AlreadyRunning,
    /// No peer is registered under the given id.
    #[error("unknown peer {0}")]
    UnknownPeer(String),
    /// A target string could not be turned into a socket address.
    #[error("invalid target address {0}")]
    InvalidTarget(String),
    /// Message exceeds what a single transport message may carry.
    #[error("message too large: {len} bytes (max {max})")]
    MessageTooLarge {
        /// Length of the message provided by the caller.
        len: usize,
        /// Maximum message length supported by the transport.
        max: usize,
    },
    /// One or more peers failed during a fan-out.
    #[error("broadcast failed for {failed} of {total} peers")]
    PartialBroadcast {
        /// Peers whose send failed.
        failed: usize,
        /// Peers targeted.
        total: usize,
    },
}
