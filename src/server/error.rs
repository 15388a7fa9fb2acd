//! Server error types.

use thiserror::Error;

use crate::protocol;
use crate::transport::{PeerId, TransportError};

/// Errors surfaced by [`super::Server`].
#[derive(Debug, Error)]
pub enum ServerError {
    /// Transport failure.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// A peer connected while the server was full.
    #[error("peer {peer} rejected: {max_clients} clients already connected")]
    CapacityExceeded {
        /// Rejected peer.
        peer: PeerId,
        /// Configured limit.
        max_clients: usize,
    },
    /// A peer sent bytes that do not decode.
    #[error("invalid message from {peer}: {source}")]
    InvalidMessage {
        /// Offending peer.
        peer: PeerId,
        /// Decode failure.
        #[source]
        source: protocol::Error,
    },
    /// A peer sent a well-formed message the server does not accept.
    #[error("unsupported {message_type} from {peer}")]
    UnsupportedMessage {
        /// Offending peer.
        peer: PeerId,
        /// Type byte as received.
        message_type: String,
    },
    /// Configuration cannot be run.
    #[error("invalid server config: {0}")]
    InvalidConfig(String),
}
