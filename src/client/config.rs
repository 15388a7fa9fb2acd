//! Client configuration.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use crate::protocol::DEFAULT_DISCOVERY_PORT;
use crate::transport::{DiscoveryConfig, IpcConfig};

/// Client configuration.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ClientConfig {
    /// Name sent in discovery requests.
    pub client_name: String,
    /// Version sent in discovery requests.
    pub client_version: u32,
    /// UDP port servers answer discovery on.
    pub discovery_port: u16,
    /// Where discovery requests are sent.
    pub discovery_address: IpAddr,
    /// How long to wait for the first discovery response.
    pub discovery_timeout: Duration,
    /// How long a send to the server may block.
    pub connection_timeout: Duration,
    /// Reconnect after the server connection drops.
    pub auto_reconnect: bool,
    /// Delay between reconnect attempts.
    pub reconnect_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_name: "Synesthesia Client".into(),
            client_version: 1,
            discovery_port: DEFAULT_DISCOVERY_PORT,
            discovery_address: IpAddr::V4(Ipv4Addr::BROADCAST),
            discovery_timeout: Duration::from_secs(5),
            connection_timeout: Duration::from_secs(3),
            auto_reconnect: true,
            reconnect_interval: Duration::from_secs(2),
        }
    }
}

impl ClientConfig {
    pub(crate) fn discovery_config(&self) -> DiscoveryConfig {
        DiscoveryConfig {
            port: self.discovery_port,
            broadcast_address: self.discovery_address,
            ..DiscoveryConfig::default()
        }
    }

    pub(crate) fn ipc_config(&self, endpoint: &std::path::Path) -> IpcConfig {
        IpcConfig {
            write_timeout: self.connection_timeout,
            ..IpcConfig::with_endpoint(endpoint)
        }
    }
}
