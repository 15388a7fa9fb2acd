//! Connectionless UDP transport for server discovery.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, instrument, trace, warn};

use super::{
    POLL_INTERVAL, PeerId, Transport, TransportError, TransportEvent, io_err_is_timeout,
    join_worker,
};
use crate::protocol::{DEFAULT_DISCOVERY_PORT, MAX_MESSAGE_SIZE};

/// Which side of the discovery exchange this transport serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DiscoveryMode {
    /// Listen on the well-known port and answer requests.
    Server,
    /// Bind an ephemeral port and broadcast requests.
    Client,
}

/// Discovery transport configuration.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DiscoveryConfig {
    /// Well-known discovery port.
    pub port: u16,
    /// Local interface to bind.
    pub bind_address: IpAddr,
    /// Destination for broadcasts and untargeted sends.
    pub broadcast_address: IpAddr,
    /// How long one receive waits before rechecking for shutdown.
    pub read_timeout: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_DISCOVERY_PORT,
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            broadcast_address: IpAddr::V4(Ipv4Addr::BROADCAST),
            read_timeout: POLL_INTERVAL,
        }
    }
}

impl DiscoveryConfig {
    fn broadcast_target(&self) -> SocketAddr {
        SocketAddr::new(self.broadcast_address, self.port)
    }

    /// Accept `ip:port` or a bare IP, which gets the discovery port.
    fn resolve(&self, target: &str) -> Result<SocketAddr, TransportError> {
        if let Ok(addr) = target.parse::<SocketAddr>() {
            return Ok(addr);
        }
        target
            .parse::<IpAddr>()
            .map(|ip| SocketAddr::new(ip, self.port))
            .map_err(|_| TransportError::InvalidTarget(target.to_owned()))
    }
}

/// Shared UDP socket handle.
#[derive(Debug, Clone)]
struct SocketBinding {
    socket: Arc<UdpSocket>,
}

impl SocketBinding {
    fn bind(addr: SocketAddr, broadcast: bool, timeout: Duration) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(addr).map_err(|source| TransportError::Endpoint {
            endpoint: addr.to_string(),
            source,
        })?;
        socket.set_broadcast(broadcast)?;
        socket.set_read_timeout(Some(timeout))?;
        Ok(Self {
            socket: Arc::new(socket),
        })
    }

    fn send_to(&self, buf: &[u8], addr: SocketAddr) -> Result<usize, TransportError> {
        Ok(self.socket.send_to(buf, addr)?)
    }

    fn recv_from(&self, buf: &mut [u8]) -> std::io::Result<(usize, SocketAddr)> {
        self.socket.recv_from(buf)
    }

    fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.socket.local_addr()?)
    }
}

/// UDP discovery transport.
///
/// Every datagram is delivered as a [`TransportEvent::Message`] tagged with
/// the sender's address, which can be passed back to [`Transport::send`] as
/// the reply target.
#[derive(Debug)]
pub struct DiscoveryTransport {
    config: DiscoveryConfig,
    mode: DiscoveryMode,
    running: Arc<AtomicBool>,
    socket: Mutex<Option<SocketBinding>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    events: Sender<TransportEvent>,
}

impl DiscoveryTransport {
    /// Create a stopped transport that will report into `events`.
    #[must_use]
    pub fn new(config: DiscoveryConfig, mode: DiscoveryMode, events: Sender<TransportEvent>) -> Self {
        Self {
            config,
            mode,
            running: Arc::new(AtomicBool::new(false)),
            socket: Mutex::new(None),
            worker: Mutex::new(None),
            events,
        }
    }

    /// Address the socket is bound to, while running.
    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        self.binding()?.local_addr()
    }

    fn binding(&self) -> Result<SocketBinding, TransportError> {
        self.socket
            .lock()
            .expect("discovery socket mutex poisoned")
            .clone()
            .ok_or(TransportError::NotRunning)
    }

    fn check_len(bytes: &[u8]) -> Result<(), TransportError> {
        if bytes.len() > MAX_MESSAGE_SIZE {
            return Err(TransportError::MessageTooLarge {
                len: bytes.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }
        Ok(())
    }
}

fn receive_loop(socket: &SocketBinding, running: &AtomicBool, events: &Sender<TransportEvent>) {
    let mut buf = vec![0u8; MAX_MESSAGE_SIZE];

    while running.load(Ordering::Acquire) {
        match socket.recv_from(&mut buf) {
            Ok((len, addr)) => {
                trace!(%addr, len, "datagram received");
                let event = TransportEvent::Message {
                    bytes: Bytes::copy_from_slice(&buf[..len]),
                    peer: addr.to_string(),
                };
                if events.send(event).is_err() {
                    debug!("event receiver dropped, stopping discovery loop");
                    break;
                }
            }
            Err(err) if io_err_is_timeout(err.kind()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => {}
            Err(err) => {
                warn!(error = %err, "discovery receive failed");
                let _ = events.send(TransportEvent::Error(err.into()));
                thread::sleep(POLL_INTERVAL);
            }
        }
    }
}

impl Transport for DiscoveryTransport {
    #[instrument(level = "debug", skip(self), fields(mode = ?self.mode))]
    fn start(&self) -> Result<(), TransportError> {
        let mut worker = self.worker.lock().expect("discovery worker mutex poisoned");
        if worker.is_some() {
            return Err(TransportError::AlreadyRunning);
        }

        let (port, broadcast) = match self.mode {
            DiscoveryMode::Server => (self.config.port, false),
            DiscoveryMode::Client => (0, true),
        };
        let socket = SocketBinding::bind(
            SocketAddr::new(self.config.bind_address, port),
            broadcast,
            self.config.read_timeout,
        )?;
        debug!(local = %socket.local_addr()?, "discovery socket bound");

        *self.socket.lock().expect("discovery socket mutex poisoned") = Some(socket.clone());
        self.running.store(true, Ordering::Release);

        let running = Arc::clone(&self.running);
        let events = self.events.clone();
        let handle = thread::Builder::new()
            .name("synesthesia-discovery".into())
            .spawn(move || {
                receive_loop(&socket, &running, &events);
                running.store(false, Ordering::Release);
            })?;
        *worker = Some(handle);
        Ok(())
    }

    #[instrument(level = "debug", skip(self))]
    fn stop(&self) {
        self.running.store(false, Ordering::Release);
        let handle = self
            .worker
            .lock()
            .expect("discovery worker mutex poisoned")
            .take();
        if let Some(handle) = handle {
            join_worker(handle);
        }
        self.socket
            .lock()
            .expect("discovery socket mutex poisoned")
            .take();
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    #[instrument(level = "trace", skip(self, bytes), fields(len = bytes.len()))]
    fn send(&self, bytes: &[u8], target: Option<&str>) -> Result<(), TransportError> {
        Self::check_len(bytes)?;
        let addr = match target {
            Some(target) if !target.is_empty() => self.config.resolve(target)?,
            _ => self.config.broadcast_target(),
        };
        self.binding()?.send_to(bytes, addr)?;
        Ok(())
    }

    fn broadcast(&self, bytes: &[u8]) -> Result<(), TransportError> {
        self.send(bytes, None)
    }

    fn endpoint_info(&self) -> String {
        match self.local_addr() {
            Ok(addr) => format!("udp://{addr}"),
            Err(_) => format!("udp://{}:{}", self.config.bind_address, self.config.port),
        }
    }

    fn connected_peers(&self) -> Vec<PeerId> {
        Vec::new()
    }
}

impl Drop for DiscoveryTransport {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn loopback(port: u16) -> DiscoveryConfig {
        DiscoveryConfig {
            port,
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            broadcast_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            ..DiscoveryConfig::default()
        }
    }

    #[test]
    fn test_resolve_targets() {
        let config = DiscoveryConfig::default();
        assert_eq!(
            config.resolve("10.0.0.7:4000").unwrap(),
            "10.0.0.7:4000".parse().unwrap()
        );
        assert_eq!(
            config.resolve("10.0.0.7").unwrap(),
            SocketAddr::new("10.0.0.7".parse().unwrap(), DEFAULT_DISCOVERY_PORT)
        );
        assert!(matches!(
            config.resolve("not an address"),
            Err(TransportError::InvalidTarget(_))
        ));
    }

    #[test]
    fn test_send_requires_start() {
        let (tx, _rx) = mpsc::channel();
        let transport = DiscoveryTransport::new(loopback(0), DiscoveryMode::Client, tx);
        assert!(matches!(
            transport.send(b"hello", None),
            Err(TransportError::NotRunning)
        ));
        assert!(transport.connected_peers().is_empty());
    }

    #[test]
    fn test_datagram_exchange() {
        let (server_tx, server_rx) = mpsc::channel();
        let server = DiscoveryTransport::new(loopback(0), DiscoveryMode::Server, server_tx);
        server.start().unwrap();
        let port = server.local_addr().unwrap().port();

        let (client_tx, client_rx) = mpsc::channel();
        let client = DiscoveryTransport::new(loopback(port), DiscoveryMode::Client, client_tx);
        client.start().unwrap();
        client.broadcast(b"who is there").unwrap();

        let TransportEvent::Message { bytes, peer } =
            server_rx.recv_timeout(Duration::from_secs(2)).unwrap()
        else {
            panic!("expected a message");
        };
        assert_eq!(&bytes[..], b"who is there");

        server.send(b"me", Some(peer.as_str())).unwrap();
        let TransportEvent::Message { bytes, .. } =
            client_rx.recv_timeout(Duration::from_secs(2)).unwrap()
        else {
            panic!("expected a message");
        };
        assert_eq!(&bytes[..], b"me");

        client.stop();
        server.stop();
        server.stop();
        assert!(!server.is_running());
    }
}
