//! Message transports
//!
//! Two implementations share the [`Transport`] contract:
//!
//! - [`IpcTransport`]: connection-oriented local socket, server or client mode
//! - [`DiscoveryTransport`]: connectionless UDP used for server discovery
//!
//! Transports report what happens on the wire as [`TransportEvent`]s pushed
//! into the channel they were built with. Once `stop` returns no further
//! events are produced.

mod buffer;
mod discovery;
mod error;
mod framing;
#[cfg(unix)]
mod ipc;

use std::io;
use std::time::Duration;

use bytes::Bytes;

pub use buffer::BufferPool;
pub use discovery::{DiscoveryConfig, DiscoveryMode, DiscoveryTransport};
pub use error::TransportError;
#[cfg(unix)]
pub use ipc::{IpcConfig, IpcMode, IpcTransport};

/// Identifier of a transport counterpart.
///
/// IPC peers are named `client_<n>`; the discovery transport uses the
/// sender's socket address.
pub type PeerId = String;

/// Peer id a client-mode transport uses for the server.
pub const SERVER_PEER_ID: &str = "server";

/// Upper bound on how long a dispatch loop waits before rechecking for shutdown.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Something observed by a transport's dispatch loop.
#[derive(Debug)]
pub enum TransportEvent {
    /// A complete message (IPC) or datagram (discovery) arrived.
    Message {
        /// Raw message bytes, header included.
        bytes: Bytes,
        /// Who sent it.
        peer: PeerId,
    },
    /// A peer connected or went away.
    Connection {
        /// Affected peer.
        peer: PeerId,
        /// `true` on connect, `false` on disconnect.
        connected: bool,
    },
    /// A non-fatal transport failure.
    Error(TransportError),
}

/// Send and receive opaque messages to and from named peers.
pub trait Transport: Send + Sync {
    /// Open the endpoint and spawn the dispatch loop.
    fn start(&self) -> Result<(), TransportError>;

    /// Close the endpoint and join the dispatch loop. Calling it twice is a no-op.
    fn stop(&self);

    /// Whether the dispatch loop is live.
    fn is_running(&self) -> bool;

    /// Send to one peer; `None` picks the transport's default target.
    fn send(&self, bytes: &[u8], target: Option<&str>) -> Result<(), TransportError>;

    /// Send to every reachable peer.
    fn broadcast(&self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Human-readable description of the local endpoint.
    fn endpoint_info(&self) -> String;

    /// Peers currently connected. Connectionless transports return none.
    fn connected_peers(&self) -> Vec<PeerId>;
}

pub(crate) fn io_err_is_timeout(kind: io::ErrorKind) -> bool {
    use io::ErrorKind::{TimedOut, WouldBlock};
    [WouldBlock, TimedOut].contains(&kind)
}

/// Join a dispatch thread unless we are running on it.
pub(crate) fn join_worker(handle: std::thread::JoinHandle<()>) {
    if handle.thread().id() == std::thread::current().id() {
        return;
    }
    if handle.join().is_err() {
        tracing::error!("transport dispatch thread panicked");
    }
}
