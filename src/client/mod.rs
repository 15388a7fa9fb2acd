//! Colour-data client
//!
//! A [`Client`] finds a server over UDP discovery (or is pointed at an
//! endpoint directly), connects an IPC transport to it and turns what the
//! server sends into [`ClientEvent`]s. While a session is active one event
//! thread decodes inbound messages and, if enabled, reconnects after the
//! server goes away.

mod config;
mod error;
mod state;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use tracing::{debug, info, instrument, trace, warn};

pub use config::ClientConfig;
pub use error::ClientError;
pub use state::{ClientState, ServerInfo};

use crate::protocol::metrics::{MessageDirection, Metrics};
use crate::protocol::{
    ColourFrame, ConfigUpdate, DiscoveryRequest, DiscoveryResponse, Message, MessageType,
    SequenceCounter, decode, encode_config_update, encode_discovery_request, encode_ping,
};
use crate::transport::{
    DiscoveryMode, DiscoveryTransport, IpcMode, IpcTransport, POLL_INTERVAL, SERVER_PEER_ID,
    Transport, TransportError, TransportEvent,
};

/// Something the owner of a [`Client`] may want to react to.
#[derive(Debug)]
pub enum ClientEvent {
    /// A colour frame arrived.
    ColourData {
        /// Decoded frame.
        frame: ColourFrame,
        /// Sequence number of the message that carried it.
        sequence: u32,
    },
    /// The server pushed new settings.
    ConfigUpdate(ConfigUpdate),
    /// The server connection came up or went down.
    ConnectionStatus {
        /// Whether the client is now connected.
        connected: bool,
        /// Description of the server, or of why the connection ended.
        info: String,
    },
    /// A non-fatal failure, including error responses from the server.
    Error(ClientError),
}

struct ClientInner {
    config: ClientConfig,
    state: Mutex<ClientState>,
    session_active: AtomicBool,
    sequence: SequenceCounter,
    ipc: Mutex<Option<Arc<IpcTransport>>>,
    ipc_tx: Sender<TransportEvent>,
    ipc_rx: Mutex<Receiver<TransportEvent>>,
    discovery: DiscoveryTransport,
    discovery_rx: Mutex<Receiver<TransportEvent>>,
    server: Mutex<ServerInfo>,
    direct_endpoint: Mutex<Option<PathBuf>>,
    events: Sender<ClientEvent>,
}

/// Colour-data client.
pub struct Client {
    inner: Arc<ClientInner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Client {
    /// Create an idle client and the channel its events arrive on.
    #[must_use]
    pub fn new(config: ClientConfig) -> (Self, Receiver<ClientEvent>) {
        let (events, events_rx) = mpsc::channel();
        let (ipc_tx, ipc_rx) = mpsc::channel();
        let (discovery_tx, discovery_rx) = mpsc::channel();
        let discovery =
            DiscoveryTransport::new(config.discovery_config(), DiscoveryMode::Client, discovery_tx);

        let inner = ClientInner {
            config,
            state: Mutex::new(ClientState::Idle),
            session_active: AtomicBool::new(false),
            sequence: SequenceCounter::new(),
            ipc: Mutex::new(None),
            ipc_tx,
            ipc_rx: Mutex::new(ipc_rx),
            discovery,
            discovery_rx: Mutex::new(discovery_rx),
            server: Mutex::new(ServerInfo::default()),
            direct_endpoint: Mutex::new(None),
            events,
        };

        (
            Self {
                inner: Arc::new(inner),
                worker: Mutex::new(None),
            },
            events_rx,
        )
    }

    /// Broadcast a discovery request and connect to the first server that answers.
    ///
    /// Blocks for at most `discovery_timeout` waiting for a response.
    #[instrument(level = "info", skip(self))]
    pub fn discover_and_connect(&self) -> Result<(), ClientError> {
        self.inner.direct_endpoint.lock().expect("endpoint mutex poisoned").take();
        self.ensure_event_thread()?;
        self.inner.discover_and_connect(|| false)
    }

    /// Connect to a known endpoint without discovery.
    #[instrument(level = "info", skip(self, endpoint), fields(endpoint = %endpoint.as_ref().display()))]
    pub fn connect_to_server(&self, endpoint: impl AsRef<Path>) -> Result<(), ClientError> {
        let endpoint = endpoint.as_ref().to_path_buf();
        *self.inner.direct_endpoint.lock().expect("endpoint mutex poisoned") =
            Some(endpoint.clone());
        self.ensure_event_thread()?;
        self.inner.connect(ServerInfo::direct(endpoint))
    }

    /// Close the connection and stop reconnecting.
    #[instrument(level = "info", skip(self))]
    pub fn disconnect(&self) {
        self.inner.session_active.store(false, Ordering::Release);
        let handle = self.worker.lock().expect("client worker mutex poisoned").take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                warn!("client event thread panicked");
            }
        }

        self.inner.discovery.stop();
        let was_connected = self.inner.state() == ClientState::Connected;
        if let Some(ipc) = self.inner.ipc.lock().expect("ipc mutex poisoned").take() {
            ipc.stop();
        }
        self.inner.set_state(ClientState::Idle);
        if was_connected {
            self.inner.emit(ClientEvent::ConnectionStatus {
                connected: false,
                info: "disconnected".into(),
            });
        }
    }

    /// Whether the client has a live server connection.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.state() == ClientState::Connected
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ClientState {
        self.inner.state()
    }

    /// Send new settings to the server.
    pub fn send_config_update(&self, config: &ConfigUpdate) -> Result<(), ClientError> {
        let message = encode_config_update(config, self.inner.sequence.next());
        self.inner.send(&message)?;
        Metrics::record_message(MessageDirection::Sent, MessageType::ConfigUpdate);
        Ok(())
    }

    /// Send a ping; returns the sequence number the reply will carry.
    pub fn ping(&self) -> Result<u32, ClientError> {
        let sequence = self.inner.sequence.next();
        self.inner.send(&encode_ping(sequence))?;
        Metrics::record_message(MessageDirection::Sent, MessageType::Ping);
        Ok(sequence)
    }

    /// Last-known server details.
    #[must_use]
    pub fn server_info(&self) -> ServerInfo {
        self.inner.server.lock().expect("server info mutex poisoned").clone()
    }

    /// Configuration the client was built with.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    fn ensure_event_thread(&self) -> Result<(), ClientError> {
        let mut worker = self.worker.lock().expect("client worker mutex poisoned");
        if worker.is_some() {
            return Ok(());
        }

        self.inner.session_active.store(true, Ordering::Release);
        let inner = Arc::clone(&self.inner);
        let handle = thread::Builder::new()
            .name("synesthesia-client".into())
            .spawn(move || inner.event_loop())
            .map_err(TransportError::from)?;
        *worker = Some(handle);
        Ok(())
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl ClientInner {
    fn emit(&self, event: ClientEvent) {
        if self.events.send(event).is_err() {
            trace!("client event receiver dropped");
        }
    }

    fn state(&self) -> ClientState {
        *self.state.lock().expect("client state mutex poisoned")
    }

    fn set_state(&self, state: ClientState) -> ClientState {
        std::mem::replace(
            &mut *self.state.lock().expect("client state mutex poisoned"),
            state,
        )
    }

    fn send(&self, bytes: &[u8]) -> Result<(), ClientError> {
        if self.state() != ClientState::Connected {
            return Err(ClientError::NotConnected);
        }
        let ipc = self
            .ipc
            .lock()
            .expect("ipc mutex poisoned")
            .clone()
            .ok_or(ClientError::NotConnected)?;
        ipc.send(bytes, None)?;
        Ok(())
    }

    fn wait_for_response(
        &self,
        cancelled: &dyn Fn() -> bool,
    ) -> Result<DiscoveryResponse, ClientError> {
        let events = self.discovery_rx.lock().expect("discovery event mutex poisoned");
        while events.try_recv().is_ok() {}

        let request = DiscoveryRequest {
            client_name: self.config.client_name.clone(),
            client_version: self.config.client_version,
        };
        self.discovery
            .broadcast(&encode_discovery_request(&request, self.sequence.next()))?;
        Metrics::record_message(MessageDirection::Sent, MessageType::DiscoveryRequest);

        let deadline = Instant::now() + self.config.discovery_timeout;
        loop {
            if cancelled() {
                return Err(ClientError::Cancelled);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ClientError::DiscoveryTimeout(self.config.discovery_timeout));
            }

            match events.recv_timeout(remaining.min(POLL_INTERVAL)) {
                Ok(TransportEvent::Message { bytes, peer }) => match decode(&bytes) {
                    Ok(envelope) => {
                        if let Message::DiscoveryResponse(response) = envelope.message {
                            Metrics::record_message(
                                MessageDirection::Received,
                                MessageType::DiscoveryResponse,
                            );
                            debug!(%peer, server = %response.server_name, "discovery response");
                            return Ok(response);
                        }
                    }
                    Err(err) => {
                        Metrics::record_decode_error();
                        trace!(%peer, error = %err, "ignoring discovery datagram");
                    }
                },
                Ok(_) | Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(TransportError::NotRunning.into());
                }
            }
        }
    }

    fn discover_and_connect(&self, cancelled: impl Fn() -> bool) -> Result<(), ClientError> {
        let previous = self.set_state(ClientState::Discovering);

        let discovered = match self.discovery.start() {
            Ok(()) | Err(TransportError::AlreadyRunning) => self.wait_for_response(&cancelled),
            Err(err) => Err(err.into()),
        };
        self.discovery.stop();

        let result = discovered.and_then(|response| self.connect(ServerInfo::from_discovery(&response)));
        if let Err(err) = &result {
            debug!(error = %err, "discovery failed");
            let fallback = match previous {
                ClientState::Idle | ClientState::Discovering => ClientState::Idle,
                ClientState::Connected | ClientState::Disconnected => ClientState::Disconnected,
            };
            let mut state = self.state.lock().expect("client state mutex poisoned");
            if *state == ClientState::Discovering {
                *state = fallback;
            }
        }
        result
    }

    fn connect(&self, info: ServerInfo) -> Result<(), ClientError> {
        let transport = Arc::new(IpcTransport::new(
            self.config.ipc_config(&info.endpoint),
            IpcMode::Client,
            self.ipc_tx.clone(),
        ));
        transport.start()?;

        let previous = self
            .ipc
            .lock()
            .expect("ipc mutex poisoned")
            .replace(Arc::clone(&transport));
        if let Some(previous) = previous {
            previous.stop();
        }

        let description = info.to_string();
        *self.server.lock().expect("server info mutex poisoned") = info;
        self.set_state(ClientState::Connected);
        info!(server = %description, "connected");
        self.emit(ClientEvent::ConnectionStatus {
            connected: true,
            info: description,
        });

        // A loss reported before the state flipped was ignored; report it again.
        if !transport.is_running() {
            debug!("server closed the connection during connect");
            let _ = self.ipc_tx.send(TransportEvent::Connection {
                peer: SERVER_PEER_ID.to_owned(),
                connected: false,
            });
        }
        Ok(())
    }

    fn reconnect(&self) -> Result<(), ClientError> {
        let endpoint = self
            .direct_endpoint
            .lock()
            .expect("endpoint mutex poisoned")
            .clone();
        match endpoint {
            Some(endpoint) => self.connect(ServerInfo::direct(endpoint)),
            None => self.discover_and_connect(|| !self.session_active.load(Ordering::Acquire)),
        }
    }

    fn handle_message(&self, bytes: &[u8]) {
        let envelope = match decode(bytes) {
            Ok(envelope) => envelope,
            Err(err) => {
                Metrics::record_decode_error();
                trace!(error = %err, "dropping undecodable message");
                return;
            }
        };
        Metrics::record_message(MessageDirection::Received, envelope.message.message_type());

        match envelope.message {
            Message::ColourData(frame) => {
                self.server
                    .lock()
                    .expect("server info mutex poisoned")
                    .last_data = Some(Instant::now());
                self.emit(ClientEvent::ColourData {
                    frame,
                    sequence: envelope.header.sequence(),
                });
            }
            Message::ConfigUpdate(config) => self.emit(ClientEvent::ConfigUpdate(config)),
            Message::Pong => self.record_pong(envelope.header.sequence()),
            Message::Error(response) if response.is_success() => {
                self.record_pong(envelope.header.sequence());
            }
            Message::Error(response) => {
                debug!(code = response.code, message = %response.message, "server error");
                self.emit(ClientEvent::Error(ClientError::Server {
                    code: response.code,
                    message: response.message,
                }));
            }
            other => trace!(message_type = %other.message_type(), "ignoring message"),
        }
    }

    fn record_pong(&self, sequence: u32) {
        trace!(sequence, "pong");
        self.server
            .lock()
            .expect("server info mutex poisoned")
            .last_pong = Some(Instant::now());
    }

    /// Returns whether the loss should trigger a reconnect.
    fn handle_connection_lost(&self) -> bool {
        let mut state = self.state.lock().expect("client state mutex poisoned");
        if *state != ClientState::Connected {
            return false;
        }
        *state = ClientState::Disconnected;
        drop(state);

        warn!("server connection lost");
        self.emit(ClientEvent::ConnectionStatus {
            connected: false,
            info: "connection lost".into(),
        });
        self.config.auto_reconnect
    }

    fn event_loop(&self) {
        let events = self.ipc_rx.lock().expect("ipc event mutex poisoned");
        let mut retry_at: Option<Instant> = None;

        while self.session_active.load(Ordering::Acquire) {
            match events.recv_timeout(POLL_INTERVAL) {
                Ok(TransportEvent::Message { bytes, .. }) => self.handle_message(&bytes),
                Ok(TransportEvent::Connection {
                    connected: false, ..
                }) => {
                    if self.handle_connection_lost() {
                        retry_at = Some(Instant::now() + self.config.reconnect_interval);
                    }
                }
                Ok(TransportEvent::Connection { .. }) => {}
                Ok(TransportEvent::Error(err)) => {
                    debug!(error = %err, "ipc transport error");
                    self.emit(ClientEvent::Error(err.into()));
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }

            if retry_at.is_some_and(|at| Instant::now() >= at) {
                match self.reconnect() {
                    Ok(()) => retry_at = None,
                    Err(err) => {
                        debug!(error = %err, "reconnect attempt failed");
                        retry_at = Some(Instant::now() + self.config.reconnect_interval);
                    }
                }
            }
        }
    }
}
