//! Colour-data server
//!
//! The server owns an IPC transport in server mode and, optionally, a UDP
//! discovery responder. Three threads run while it is started:
//!
//! - the broadcast loop, which pulls frames from the [`FrameProvider`] and
//!   fans them out at a rate chosen by [`FrameRatePolicy`]
//! - the IPC dispatcher, which tracks peers and answers control messages
//! - the discovery dispatcher, which answers discovery requests
//!
//! Everything the owner needs to react to arrives as a [`ServerEvent`].

mod config;
mod error;
mod rate;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, info, instrument, trace, warn};

pub use config::{POOLED_BUFFER_SIZE, ServerConfig};
pub use error::ServerError;
pub use rate::{FRAME_TIME_WINDOW, FrameRatePolicy, FrameTimeWindow};

use crate::protocol::metrics::{MessageDirection, Metrics};
use crate::protocol::{
    COLOUR_DATA_FIXED_SIZE, COLOUR_DATUM_SIZE, ColourFrame, ConfigUpdate, DiscoveryResponse,
    ErrorCode, HEADER_SIZE, MAX_COLOURS_PER_MESSAGE, Message, MessageType, SequenceCounter,
    decode, decode_body, decode_header, encode_colour_data_into, encode_config_update,
    encode_discovery_response, encode_error,
};
use crate::transport::{
    BufferPool, DiscoveryMode, DiscoveryTransport, IpcMode, IpcTransport, POLL_INTERVAL, PeerId,
    Transport, TransportError, TransportEvent,
};

/// How often the broadcast loop re-evaluates its target frame rate.
const CLIENT_CHECK_INTERVAL: Duration = Duration::from_millis(100);

/// How often the broadcast loop logs its performance counters.
const PERFORMANCE_LOG_INTERVAL: Duration = Duration::from_secs(10);

/// Source of colour frames pulled by the broadcast loop.
///
/// Returning `None`, or a frame with no samples, skips the current tick.
pub trait FrameProvider: Send {
    /// Produce the next frame to broadcast.
    fn next_frame(&mut self) -> Option<ColourFrame>;
}

impl<F> FrameProvider for F
where
    F: FnMut() -> Option<ColourFrame> + Send,
{
    fn next_frame(&mut self) -> Option<ColourFrame> {
        self()
    }
}

/// Something the owner of a [`Server`] may want to react to.
#[derive(Debug)]
pub enum ServerEvent {
    /// A client sent a valid config update.
    ConfigUpdate {
        /// Requested settings.
        config: ConfigUpdate,
        /// Client that sent it.
        peer: PeerId,
    },
    /// A client was registered.
    PeerConnected(PeerId),
    /// A registered client went away.
    PeerDisconnected(PeerId),
    /// A client connected while the server was full and was not registered.
    PeerRejected(PeerId),
    /// A non-fatal failure.
    Error(ServerError),
}

struct ServerInner {
    config: ServerConfig,
    policy: FrameRatePolicy,
    running: AtomicBool,
    sequence: SequenceCounter,
    ipc: IpcTransport,
    ipc_events: Mutex<Receiver<TransportEvent>>,
    discovery: Option<(DiscoveryTransport, Mutex<Receiver<TransportEvent>>)>,
    peers: Mutex<Vec<PeerId>>,
    provider: Mutex<Option<Box<dyn FrameProvider>>>,
    pool: Mutex<Option<BufferPool>>,
    frame_times: Mutex<FrameTimeWindow>,
    current_fps: AtomicU32,
    high_performance: AtomicBool,
    frames_sent: AtomicU64,
    events: Sender<ServerEvent>,
}

/// Colour-data server.
pub struct Server {
    inner: Arc<ServerInner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Server {
    /// Create a stopped server and the channel its events arrive on.
    #[must_use]
    pub fn new(config: ServerConfig) -> (Self, Receiver<ServerEvent>) {
        let (events, events_rx) = mpsc::channel();

        let (ipc_tx, ipc_rx) = mpsc::channel();
        let ipc = IpcTransport::new(config.ipc_config(), IpcMode::Server, ipc_tx);

        let discovery = config.enable_discovery.then(|| {
            let (tx, rx) = mpsc::channel();
            let transport =
                DiscoveryTransport::new(config.discovery_config(), DiscoveryMode::Server, tx);
            (transport, Mutex::new(rx))
        });

        let inner = ServerInner {
            policy: FrameRatePolicy::from_config(&config),
            current_fps: AtomicU32::new(config.base_fps),
            config,
            running: AtomicBool::new(false),
            sequence: SequenceCounter::new(),
            ipc,
            ipc_events: Mutex::new(ipc_rx),
            discovery,
            peers: Mutex::new(Vec::new()),
            provider: Mutex::new(None),
            pool: Mutex::new(None),
            frame_times: Mutex::new(FrameTimeWindow::default()),
            high_performance: AtomicBool::new(false),
            frames_sent: AtomicU64::new(0),
            events,
        };

        (
            Self {
                inner: Arc::new(inner),
                workers: Mutex::new(Vec::new()),
            },
            events_rx,
        )
    }

    /// Bind the endpoints and spawn the server threads.
    ///
    /// Starting a running server is a no-op.
    #[instrument(level = "info", skip(self), fields(endpoint = %self.inner.config.ipc_endpoint.display()))]
    pub fn start(&self) -> Result<(), ServerError> {
        let mut workers = self.workers.lock().expect("server worker mutex poisoned");
        if self.inner.running.load(Ordering::Acquire) {
            return Ok(());
        }
        self.inner.config.validate()?;
        // Events queued by a previous run refer to peers that no longer exist
        self.inner.drain_stale_events();

        if self.inner.config.pre_allocate_buffers {
            *self.inner.pool.lock().expect("buffer pool mutex poisoned") = Some(BufferPool::new(
                POOLED_BUFFER_SIZE,
                self.inner.config.buffer_pool_size,
            ));
        }

        self.inner.ipc.start()?;
        if let Some((discovery, _)) = &self.inner.discovery {
            if let Err(err) = discovery.start() {
                self.inner.ipc.stop();
                return Err(err.into());
            }
        }

        self.inner.running.store(true, Ordering::Release);

        let spawned = self.spawn_workers(&mut workers);
        if let Err(err) = spawned {
            drop(workers);
            self.stop();
            return Err(TransportError::from(err).into());
        }

        info!(
            name = %self.inner.config.server_name,
            max_clients = self.inner.config.max_clients,
            discovery = self.inner.config.enable_discovery,
            "server started"
        );
        Ok(())
    }

    fn spawn_workers(&self, workers: &mut Vec<JoinHandle<()>>) -> std::io::Result<()> {
        let inner = Arc::clone(&self.inner);
        workers.push(
            thread::Builder::new()
                .name("synesthesia-broadcast".into())
                .spawn(move || inner.broadcast_loop())?,
        );

        let inner = Arc::clone(&self.inner);
        workers.push(
            thread::Builder::new()
                .name("synesthesia-ipc-dispatch".into())
                .spawn(move || inner.ipc_dispatch_loop())?,
        );

        if self.inner.discovery.is_some() {
            let inner = Arc::clone(&self.inner);
            workers.push(
                thread::Builder::new()
                    .name("synesthesia-discovery-dispatch".into())
                    .spawn(move || inner.discovery_dispatch_loop())?,
            );
        }
        Ok(())
    }

    /// Stop every thread, close the endpoints and forget all peers.
    ///
    /// Calling it twice is a no-op.
    #[instrument(level = "info", skip(self))]
    pub fn stop(&self) {
        self.inner.running.store(false, Ordering::Release);

        self.inner.ipc.stop();
        if let Some((discovery, _)) = &self.inner.discovery {
            discovery.stop();
        }

        let workers: Vec<_> = self
            .workers
            .lock()
            .expect("server worker mutex poisoned")
            .drain(..)
            .collect();
        let stopped = !workers.is_empty();
        for handle in workers {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                warn!("server thread panicked");
            }
        }

        let forgotten: Vec<PeerId> = self
            .inner
            .peers
            .lock()
            .expect("peer list mutex poisoned")
            .drain(..)
            .collect();
        for _ in &forgotten {
            Metrics::record_connection_close();
        }
        self.inner.pool.lock().expect("buffer pool mutex poisoned").take();
        self.inner.high_performance.store(false, Ordering::Relaxed);

        if stopped {
            info!(
                frames_sent = self.inner.frames_sent.load(Ordering::Relaxed),
                "server stopped"
            );
        }
    }

    /// Whether the server threads are live.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Install the frame source pulled by the broadcast loop.
    pub fn set_frame_provider<P>(&self, provider: P)
    where
        P: FrameProvider + 'static,
    {
        *self
            .inner
            .provider
            .lock()
            .expect("frame provider mutex poisoned") = Some(Box::new(provider));
    }

    /// Remove the frame source; the loop keeps running but sends nothing.
    pub fn clear_frame_provider(&self) {
        self.inner
            .provider
            .lock()
            .expect("frame provider mutex poisoned")
            .take();
    }

    /// Pull one frame and send it to every registered client.
    ///
    /// Returns `Ok(false)` when nothing was sent: no clients, no provider, or
    /// the provider had no frame.
    pub fn broadcast_colour_data(&self) -> Result<bool, ServerError> {
        self.inner.broadcast_colour_data()
    }

    /// Send a config update to every registered client.
    pub fn broadcast_config_update(&self, config: &ConfigUpdate) -> Result<(), ServerError> {
        self.inner.broadcast_config_update(config)
    }

    /// Registered clients, in connection order.
    #[must_use]
    pub fn connected_clients(&self) -> Vec<PeerId> {
        self.inner.peers.lock().expect("peer list mutex poisoned").clone()
    }

    /// Configuration the server was built with.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    /// Frame rate the broadcast loop is currently aiming for.
    #[must_use]
    pub fn current_fps(&self) -> u32 {
        self.inner.current_fps.load(Ordering::Relaxed)
    }

    /// Whether clients are connected and the loop runs above `base_fps`.
    #[must_use]
    pub fn is_high_performance_mode(&self) -> bool {
        self.inner.high_performance.load(Ordering::Relaxed)
    }

    /// Mean broadcast-loop iteration time over the last [`FRAME_TIME_WINDOW`] frames.
    #[must_use]
    pub fn average_frame_time(&self) -> Duration {
        self.inner
            .frame_times
            .lock()
            .expect("frame time mutex poisoned")
            .average()
    }

    /// Colour frames sent since construction.
    #[must_use]
    pub fn total_frames_sent(&self) -> u64 {
        self.inner.frames_sent.load(Ordering::Relaxed)
    }

    /// IPC endpoint description.
    #[must_use]
    pub fn endpoint_info(&self) -> String {
        self.inner.ipc.endpoint_info()
    }

    /// Address the discovery responder is bound to, while running.
    #[must_use]
    pub fn discovery_addr(&self) -> Option<SocketAddr> {
        self.inner
            .discovery
            .as_ref()
            .and_then(|(discovery, _)| discovery.local_addr().ok())
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop();
    }
}

impl ServerInner {
    fn emit(&self, event: ServerEvent) {
        if self.events.send(event).is_err() {
            trace!("server event receiver dropped");
        }
    }

    fn drain_stale_events(&self) {
        let ipc_events = self.ipc_events.lock().expect("ipc event mutex poisoned");
        while ipc_events.try_recv().is_ok() {}
        if let Some((_, events)) = &self.discovery {
            let events = events.lock().expect("discovery event mutex poisoned");
            while events.try_recv().is_ok() {}
        }
    }

    fn registered_peers(&self) -> Vec<PeerId> {
        self.peers.lock().expect("peer list mutex poisoned").clone()
    }

    fn register_peer(&self, peer: &str) -> Result<(), ServerError> {
        let mut peers = self.peers.lock().expect("peer list mutex poisoned");
        if peers.len() >= self.config.max_clients {
            return Err(ServerError::CapacityExceeded {
                peer: peer.to_owned(),
                max_clients: self.config.max_clients,
            });
        }
        peers.push(peer.to_owned());
        Metrics::record_connection_open();
        Ok(())
    }

    fn unregister_peer(&self, peer: &str) -> bool {
        let mut peers = self.peers.lock().expect("peer list mutex poisoned");
        let Some(index) = peers.iter().position(|p| p == peer) else {
            return false;
        };
        peers.remove(index);
        Metrics::record_connection_close();
        true
    }

    /// Send to the given peers, trying every one before reporting failures.
    fn fan_out(&self, peers: &[PeerId], bytes: &[u8]) -> Result<(), ServerError> {
        let failed = peers
            .iter()
            .filter(|peer| match self.ipc.send(bytes, Some(peer.as_str())) {
                Ok(()) => false,
                Err(err) => {
                    self.drop_unresponsive(peer, &err);
                    true
                }
            })
            .count();

        if failed > 0 {
            return Err(TransportError::PartialBroadcast {
                failed,
                total: peers.len(),
            }
            .into());
        }
        Ok(())
    }

    /// A failed or timed-out write may have left part of a message on the
    /// stream, so the peer is cut off. The IPC dispatcher then reports it gone.
    fn drop_unresponsive(&self, peer: &str, err: &TransportError) {
        if matches!(err, TransportError::UnknownPeer(_)) {
            debug!(%peer, "client went away before send");
            return;
        }
        warn!(%peer, error = %err, "send failed, disconnecting client");
        if let Err(err) = self.ipc.disconnect_peer(peer) {
            debug!(%peer, error = %err, "client already gone");
        }
    }

    fn broadcast_colour_data(&self) -> Result<bool, ServerError> {
        let peers = self.registered_peers();
        if peers.is_empty() {
            return Ok(false);
        }

        let frame = {
            let mut provider = self.provider.lock().expect("frame provider mutex poisoned");
            match provider.as_mut() {
                Some(provider) => provider.next_frame(),
                None => return Ok(false),
            }
        };
        let Some(frame) = frame.filter(|frame| !frame.samples.is_empty()) else {
            return Ok(false);
        };

        let count = frame.samples.len().min(MAX_COLOURS_PER_MESSAGE);
        let size = HEADER_SIZE + COLOUR_DATA_FIXED_SIZE + count * COLOUR_DATUM_SIZE;
        let pool = self.pool.lock().expect("buffer pool mutex poisoned").clone();
        let mut buffer = match &pool {
            Some(pool) => pool.acquire(size),
            None => Vec::with_capacity(size),
        };

        encode_colour_data_into(&mut buffer, &frame, self.sequence.next());
        let started = Instant::now();
        let result = self.fan_out(&peers, &buffer);
        Metrics::record_broadcast(started.elapsed());
        Metrics::record_message(MessageDirection::Sent, MessageType::ColourData);

        if let Some(pool) = &pool {
            pool.release(buffer);
        }
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        result.map(|()| true)
    }

    fn broadcast_config_update(&self, config: &ConfigUpdate) -> Result<(), ServerError> {
        let peers = self.registered_peers();
        if peers.is_empty() {
            return Ok(());
        }
        let message = encode_config_update(config, self.sequence.next());
        Metrics::record_message(MessageDirection::Sent, MessageType::ConfigUpdate);
        self.fan_out(&peers, &message)
    }

    fn send_error(&self, peer: &str, code: ErrorCode, text: &str, sequence: u32) {
        let reply = encode_error(code, text, sequence);
        Metrics::record_message(MessageDirection::Sent, MessageType::Error);
        if let Err(err) = self.ipc.send(&reply, Some(peer)) {
            self.drop_unresponsive(peer, &err);
        }
    }

    fn reject_message(&self, peer: &str, text: &str, error: ServerError) {
        debug!(%peer, error = %error, "rejecting message");
        self.send_error(peer, ErrorCode::InvalidMessage, text, self.sequence.next());
        self.emit(ServerEvent::Error(error));
    }

    fn handle_ipc_message(&self, bytes: &Bytes, peer: &str) {
        let header = match decode_header(bytes) {
            Ok(header) => header,
            Err(source) => {
                Metrics::record_decode_error();
                let error = ServerError::InvalidMessage {
                    peer: peer.to_owned(),
                    source,
                };
                self.reject_message(peer, "failed to parse message", error);
                return;
            }
        };

        let Some(message_type) = header.message_type() else {
            let error = ServerError::UnsupportedMessage {
                peer: peer.to_owned(),
                message_type: format!("type 0x{:02X}", header.msg_type_byte()),
            };
            self.reject_message(peer, "unsupported message type", error);
            return;
        };
        Metrics::record_message(MessageDirection::Received, message_type);
        trace!(%peer, %message_type, sequence = header.sequence(), "message received");

        match message_type {
            MessageType::ConfigUpdate => {
                let payload = &bytes[HEADER_SIZE..header.total_len()];
                match decode_body(message_type, payload) {
                    Ok(Message::ConfigUpdate(config)) => self.apply_config_update(config, peer),
                    Ok(other) => {
                        trace!(%peer, message_type = %other.message_type(), "unexpected body");
                    }
                    Err(source) => {
                        Metrics::record_decode_error();
                        let error = ServerError::InvalidMessage {
                            peer: peer.to_owned(),
                            source,
                        };
                        self.reject_message(peer, "invalid config update", error);
                    }
                }
            }
            MessageType::Ping => {
                self.send_error(peer, ErrorCode::Success, "pong", header.sequence());
            }
            other => {
                let error = ServerError::UnsupportedMessage {
                    peer: peer.to_owned(),
                    message_type: other.to_string(),
                };
                self.reject_message(peer, "unsupported message type", error);
            }
        }
    }

    fn apply_config_update(&self, config: ConfigUpdate, peer: &str) {
        debug!(%peer, ?config, "config update received");
        self.emit(ServerEvent::ConfigUpdate {
            config,
            peer: peer.to_owned(),
        });
        if self.config.rebroadcast_config_updates {
            if let Err(err) = self.broadcast_config_update(&config) {
                debug!(error = %err, "config rebroadcast incomplete");
            }
        }
    }

    fn handle_connection(&self, peer: PeerId, connected: bool) {
        if connected {
            match self.register_peer(&peer) {
                Ok(()) => {
                    info!(%peer, "client connected");
                    self.emit(ServerEvent::PeerConnected(peer));
                }
                Err(err) => {
                    warn!(error = %err, "client not registered");
                    self.emit(ServerEvent::PeerRejected(peer));
                }
            }
        } else if self.unregister_peer(&peer) {
            info!(%peer, "client disconnected");
            self.emit(ServerEvent::PeerDisconnected(peer));
        }
    }

    fn ipc_dispatch_loop(&self) {
        let events = self.ipc_events.lock().expect("ipc event mutex poisoned");
        while self.running.load(Ordering::Acquire) {
            match events.recv_timeout(POLL_INTERVAL) {
                Ok(TransportEvent::Message { bytes, peer }) => self.handle_ipc_message(&bytes, &peer),
                Ok(TransportEvent::Connection { peer, connected }) => {
                    self.handle_connection(peer, connected);
                }
                Ok(TransportEvent::Error(err)) => {
                    warn!(error = %err, "ipc transport error");
                    self.emit(ServerEvent::Error(err.into()));
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    fn handle_discovery_message(&self, discovery: &DiscoveryTransport, bytes: &[u8], peer: &str) {
        let request = match decode(bytes) {
            Ok(envelope) => match envelope.message {
                Message::DiscoveryRequest(request) => request,
                other => {
                    trace!(%peer, message_type = %other.message_type(), "ignoring discovery traffic");
                    return;
                }
            },
            Err(err) => {
                Metrics::record_decode_error();
                debug!(%peer, error = %err, "ignoring malformed discovery datagram");
                return;
            }
        };
        Metrics::record_message(MessageDirection::Received, MessageType::DiscoveryRequest);
        debug!(
            %peer,
            client = %request.client_name,
            version = request.client_version,
            "discovery request"
        );

        let response = DiscoveryResponse {
            server_name: self.config.server_name.clone(),
            server_version: self.config.server_version,
            ipc_port: 0,
            ipc_path: self.config.ipc_endpoint.display().to_string(),
            capabilities: self.config.capabilities,
        };
        let bytes = encode_discovery_response(&response, self.sequence.next());
        Metrics::record_message(MessageDirection::Sent, MessageType::DiscoveryResponse);
        if let Err(err) = discovery.send(&bytes, Some(peer)) {
            warn!(%peer, error = %err, "cannot answer discovery request");
            self.emit(ServerEvent::Error(err.into()));
        }
    }

    fn discovery_dispatch_loop(&self) {
        let Some((discovery, events)) = &self.discovery else {
            return;
        };
        let events = events.lock().expect("discovery event mutex poisoned");
        while self.running.load(Ordering::Acquire) {
            match events.recv_timeout(POLL_INTERVAL) {
                Ok(TransportEvent::Message { bytes, peer }) => {
                    self.handle_discovery_message(discovery, &bytes, &peer);
                }
                Ok(TransportEvent::Connection { .. }) => {}
                Ok(TransportEvent::Error(err)) => {
                    self.emit(ServerEvent::Error(err.into()));
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    fn update_target_fps(&self, clients: usize) -> u32 {
        let fps = self.policy.target_fps(clients);
        let previous = self.current_fps.swap(fps, Ordering::Relaxed);
        self.high_performance
            .store(self.policy.is_high_performance(clients, fps), Ordering::Relaxed);
        if previous != fps {
            debug!(clients, fps, "target frame rate changed");
        }
        fps
    }

    fn broadcast_loop(&self) {
        let mut frame_duration =
            FrameRatePolicy::frame_duration(self.current_fps.load(Ordering::Relaxed));
        let mut last_check: Option<Instant> = None;
        let mut last_log = Instant::now();

        while self.running.load(Ordering::Acquire) {
            let frame_start = Instant::now();

            if last_check.is_none_or(|at| frame_start - at >= CLIENT_CHECK_INTERVAL) {
                let clients = self.peers.lock().expect("peer list mutex poisoned").len();
                frame_duration = FrameRatePolicy::frame_duration(self.update_target_fps(clients));
                last_check = Some(frame_start);
            }

            if let Err(err) = self.broadcast_colour_data() {
                debug!(error = %err, "frame broadcast incomplete");
            }

            let elapsed = frame_start.elapsed();
            self.frame_times
                .lock()
                .expect("frame time mutex poisoned")
                .record(elapsed);

            if let Some(remaining) = frame_duration.checked_sub(elapsed) {
                thread::sleep(remaining);
            }

            if last_log.elapsed() >= PERFORMANCE_LOG_INTERVAL {
                last_log = Instant::now();
                debug!(
                    fps = self.current_fps.load(Ordering::Relaxed),
                    avg_frame_us = self
                        .frame_times
                        .lock()
                        .expect("frame time mutex poisoned")
                        .average()
                        .as_micros(),
                    frames_sent = self.frames_sent.load(Ordering::Relaxed),
                    "broadcast loop performance"
                );
            }
        }
    }
}
