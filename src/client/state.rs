//! Connection state and last-known server details.

use std::fmt;
use std::path::PathBuf;
use std::time::Instant;

use crate::protocol::{Capabilities, DiscoveryResponse};

/// Client connection lifecycle.
///
/// `Idle → Discovering → Connected → Disconnected → Discovering ...` until
/// [`super::Client::disconnect`] returns the client to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Never connected, or explicitly disconnected.
    Idle,
    /// Waiting for a discovery response.
    Discovering,
    /// Streaming from a server.
    Connected,
    /// Connection lost; a reconnect may be pending.
    Disconnected,
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Discovering => "discovering",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}

/// What the client knows about its server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerInfo {
    /// Advertised name; empty after a direct connect.
    pub name: String,
    /// Advertised version; zero after a direct connect.
    pub version: u32,
    /// Advertised capabilities.
    pub capabilities: Capabilities,
    /// IPC endpoint in use.
    pub endpoint: PathBuf,
    /// When the last colour frame arrived.
    pub last_data: Option<Instant>,
    /// When the last success-coded response arrived.
    pub last_pong: Option<Instant>,
}

impl ServerInfo {
    pub(crate) fn from_discovery(response: &DiscoveryResponse) -> Self {
        Self {
            name: response.server_name.clone(),
            version: response.server_version,
            capabilities: response.capabilities,
            endpoint: PathBuf::from(&response.ipc_path),
            last_data: None,
            last_pong: None,
        }
    }

    pub(crate) fn direct(endpoint: PathBuf) -> Self {
        Self {
            endpoint,
            ..Self::default()
        }
    }
}

impl fmt::Display for ServerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name.is_empty() {
            write!(f, "{}", self.endpoint.display())
        } else {
            write!(
                f,
                "{} v{} at {} [{}]",
                self.name,
                self.version,
                self.endpoint.display(),
                self.capabilities
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let info = ServerInfo::from_discovery(&DiscoveryResponse {
            server_name: "Synesthesia".into(),
            server_version: 2,
            ipc_port: 0,
            ipc_path: "/tmp/s".into(),
            capabilities: Capabilities::new().with(Capabilities::CONFIG_UPDATES),
        });
        assert_eq!(info.to_string(), "Synesthesia v2 at /tmp/s [CONFIG]");
        assert_eq!(
            ServerInfo::direct(PathBuf::from("/tmp/s")).to_string(),
            "/tmp/s"
        );
        assert_eq!(ClientState::Discovering.to_string(), "discovering");
    }
}
