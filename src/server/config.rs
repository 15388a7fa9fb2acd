//! Server configuration.

use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use super::ServerError;
use crate::protocol::{
    COLOUR_DATA_FIXED_SIZE, COLOUR_DATUM_SIZE, Capabilities, DEFAULT_DISCOVERY_PORT,
    DEFAULT_IPC_ENDPOINT, HEADER_SIZE,
};
use crate::transport::{DiscoveryConfig, IpcConfig};

/// Samples a pooled buffer is sized for up front.
const TYPICAL_COLOURS_PER_FRAME: usize = 256;

/// Bytes reserved for each pooled broadcast buffer.
pub const POOLED_BUFFER_SIZE: usize =
    HEADER_SIZE + COLOUR_DATA_FIXED_SIZE + TYPICAL_COLOURS_PER_FRAME * COLOUR_DATUM_SIZE;

/// Server configuration.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ServerConfig {
    /// Name advertised in discovery responses.
    pub server_name: String,
    /// Version advertised in discovery responses.
    pub server_version: u32,
    /// UDP port the discovery responder listens on.
    pub discovery_port: u16,
    /// Interface the discovery responder binds.
    pub discovery_bind_address: IpAddr,
    /// Local socket path for the IPC transport.
    pub ipc_endpoint: PathBuf,
    /// Feature flags advertised to clients.
    pub capabilities: Capabilities,
    /// Peers beyond this count are not registered.
    pub max_clients: usize,
    /// Run the UDP discovery responder.
    pub enable_discovery: bool,
    /// Frame-rate floor while clients are connected.
    pub base_fps: u32,
    /// Frame rate with exactly one client.
    pub max_fps: u32,
    /// Loop rate with no clients.
    pub idle_fps: u32,
    /// Scale the frame rate with the client count; otherwise hold `base_fps`.
    pub adaptive_frame_rate: bool,
    /// Reuse broadcast buffers from a pool.
    pub pre_allocate_buffers: bool,
    /// Number of pooled buffers.
    pub buffer_pool_size: usize,
    /// Fan accepted client config updates back out to every client.
    pub rebroadcast_config_updates: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_name: "Synesthesia".into(),
            server_version: 1,
            discovery_port: DEFAULT_DISCOVERY_PORT,
            discovery_bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            ipc_endpoint: PathBuf::from(DEFAULT_IPC_ENDPOINT),
            capabilities: Capabilities::new()
                .with(Capabilities::COLOUR_DATA_STREAMING)
                .with(Capabilities::CONFIG_UPDATES)
                .with(Capabilities::REAL_TIME_DISCOVERY)
                .with(Capabilities::LAB_COLOUR_SPACE),
            max_clients: 16,
            enable_discovery: true,
            base_fps: 60,
            max_fps: 300,
            idle_fps: 20,
            adaptive_frame_rate: true,
            pre_allocate_buffers: true,
            buffer_pool_size: 128,
            rebroadcast_config_updates: true,
        }
    }
}

impl ServerConfig {
    /// Reject settings the broadcast loop cannot run with.
    pub fn validate(&self) -> Result<(), ServerError> {
        if self.base_fps == 0 || self.max_fps == 0 || self.idle_fps == 0 {
            return Err(ServerError::InvalidConfig(
                "frame rates must be non-zero".into(),
            ));
        }
        if self.max_fps < self.base_fps {
            return Err(ServerError::InvalidConfig(format!(
                "max_fps ({}) is below base_fps ({})",
                self.max_fps, self.base_fps
            )));
        }
        if self.ipc_endpoint.as_os_str().is_empty() {
            return Err(ServerError::InvalidConfig("ipc_endpoint is empty".into()));
        }
        Ok(())
    }

    pub(crate) fn ipc_config(&self) -> IpcConfig {
        IpcConfig::with_endpoint(&self.ipc_endpoint)
    }

    pub(crate) fn discovery_config(&self) -> DiscoveryConfig {
        DiscoveryConfig {
            port: self.discovery_port,
            bind_address: self.discovery_bind_address,
            ..DiscoveryConfig::default()
        }
    }
}
