//! Client error types.

use std::time::Duration;

use thiserror::Error;

use crate::transport::TransportError;

/// Errors surfaced by [`super::Client`].
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport failure.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// No server answered in time.
    #[error("no discovery response within {0:?}")]
    DiscoveryTimeout(Duration),
    /// A reconnect attempt was abandoned because the client is shutting down.
    #[error("connection attempt cancelled")]
    Cancelled,
    /// Operation needs an active server connection.
    #[error("not connected to a server")]
    NotConnected,
    /// The server answered with an error response.
    #[error("server reported error {code}: {message}")]
    Server {
        /// Raw error code.
        code: u32,
        /// Text sent by the server.
        message: String,
    },
}
