//! Connection-oriented local IPC over Unix domain sockets.
//!
//! In server mode one dispatch thread waits for readiness on the listener and
//! every peer socket at once, with a timeout of [`POLL_INTERVAL`], then
//! accepts or drains whichever are ready. In client mode the dispatch thread blocks on the single server
//! socket with a read timeout of [`POLL_INTERVAL`].

use std::collections::HashMap;
use std::fs;
use std::io::{self, Read, Write};
use std::net::Shutdown;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use polling::{Event, Events, Poller};
use tracing::{debug, info, instrument, trace, warn};

use super::framing::StreamAssembler;
use super::{
    POLL_INTERVAL, PeerId, SERVER_PEER_ID, Transport, TransportError, TransportEvent,
    io_err_is_timeout, join_worker,
};
use crate::protocol::metrics::Metrics;
use crate::protocol::{DEFAULT_IPC_ENDPOINT, MAX_MESSAGE_SIZE};

const READ_CHUNK: usize = 4096;
const WRITE_BACKOFF: Duration = Duration::from_micros(200);

/// Which end of the IPC endpoint this transport is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum IpcMode {
    /// Bind the endpoint and accept many peers.
    Server,
    /// Connect to a server's endpoint.
    Client,
}

/// IPC transport configuration.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IpcConfig {
    /// Socket path.
    pub endpoint: PathBuf,
    /// How long a blocking read waits before rechecking for shutdown.
    pub read_timeout: Duration,
    /// Give up on a peer that has not drained a message within this long.
    pub write_timeout: Duration,
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            endpoint: PathBuf::from(DEFAULT_IPC_ENDPOINT),
            read_timeout: POLL_INTERVAL,
            write_timeout: Duration::from_secs(1),
        }
    }
}

impl IpcConfig {
    /// Configuration for the given socket path with default timeouts.
    #[must_use]
    pub fn with_endpoint(endpoint: impl Into<PathBuf>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug)]
struct Shared {
    running: AtomicBool,
    peers: Mutex<HashMap<PeerId, Arc<UnixStream>>>,
    events: Sender<TransportEvent>,
}

impl Shared {
    fn emit(&self, event: TransportEvent) {
        if self.events.send(event).is_err() {
            trace!("event receiver dropped");
        }
    }

    fn peer(&self, id: &str) -> Option<Arc<UnixStream>> {
        self.peers
            .lock()
            .expect("peer map mutex poisoned")
            .get(id)
            .cloned()
    }

    fn snapshot(&self) -> Vec<(PeerId, Arc<UnixStream>)> {
        self.peers
            .lock()
            .expect("peer map mutex poisoned")
            .iter()
            .map(|(id, stream)| (id.clone(), Arc::clone(stream)))
            .collect()
    }

    fn remove(&self, id: &str) -> Option<Arc<UnixStream>> {
        self.peers
            .lock()
            .expect("peer map mutex poisoned")
            .remove(id)
    }

    fn close_all(&self) {
        let drained: Vec<_> = self
            .peers
            .lock()
            .expect("peer map mutex poisoned")
            .drain()
            .collect();
        for (_, stream) in drained {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    /// Feed freshly read bytes through the assembler and emit whole messages.
    fn deliver(&self, assembler: &mut StreamAssembler, data: &[u8], peer: &str) {
        assembler.extend(data);
        loop {
            match assembler.next_message() {
                Ok(Some(bytes)) => self.emit(TransportEvent::Message {
                    bytes,
                    peer: peer.to_owned(),
                }),
                Ok(None) => break,
                Err(err) => {
                    Metrics::record_decode_error();
                    warn!(%peer, error = %err, "discarding unsynchronised stream data");
                    break;
                }
            }
        }
    }
}

/// Write all of `bytes`, retrying partial and would-block writes until `timeout`.
fn write_fully(mut stream: &UnixStream, bytes: &[u8], timeout: Duration) -> io::Result<()> {
    let deadline = Instant::now() + timeout;
    let mut written = 0;

    while written < bytes.len() {
        match stream.write(&bytes[written..]) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => written += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) if io_err_is_timeout(err.kind()) => {
                if Instant::now() >= deadline {
                    return Err(io::ErrorKind::TimedOut.into());
                }
                thread::sleep(WRITE_BACKOFF);
            }
            Err(err) => return Err(err),
        }
    }

    Ok(())
}

struct PeerReader {
    id: PeerId,
    stream: Arc<UnixStream>,
    assembler: StreamAssembler,
}

enum ReadOutcome {
    Idle,
    Active,
    Closed(Option<io::Error>),
}

impl PeerReader {
    /// Drain whatever the socket has ready.
    fn pump(&mut self, shared: &Shared, chunk: &mut [u8]) -> ReadOutcome {
        let mut outcome = ReadOutcome::Idle;
        loop {
            match (&*self.stream).read(chunk) {
                Ok(0) => return ReadOutcome::Closed(None),
                Ok(n) => {
                    shared.deliver(&mut self.assembler, &chunk[..n], &self.id);
                    outcome = ReadOutcome::Active;
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) if io_err_is_timeout(err.kind()) => return outcome,
                Err(err) => return ReadOutcome::Closed(Some(err)),
            }
        }
    }
}

/// Key the listener is registered under; peers use their connection number.
const LISTENER_KEY: usize = usize::MAX;

struct ServerDispatch {
    poller: Poller,
    listener: UnixListener,
    readers: HashMap<usize, PeerReader>,
    next_peer: usize,
}

impl ServerDispatch {
    fn new(listener: UnixListener) -> io::Result<Self> {
        let poller = Poller::new()?;
        // SAFETY: the listener is owned by this struct and deleted from the poller on drop.
        unsafe { poller.add(&listener, Event::readable(LISTENER_KEY))? };
        Ok(Self {
            poller,
            listener,
            readers: HashMap::new(),
            next_peer: 1,
        })
    }

    fn accept_pending(&mut self, shared: &Shared) {
        loop {
            match self.listener.accept() {
                Ok((stream, _)) => self.register(stream, shared),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) if io_err_is_timeout(err.kind()) => break,
                Err(err) => {
                    warn!(error = %err, "accept failed");
                    shared.emit(TransportEvent::Error(err.into()));
                    break;
                }
            }
        }
        if let Err(err) = self
            .poller
            .modify(&self.listener, Event::readable(LISTENER_KEY))
        {
            warn!(error = %err, "cannot re-arm listener");
            shared.emit(TransportEvent::Error(err.into()));
        }
    }

    fn register(&mut self, stream: UnixStream, shared: &Shared) {
        let key = self.next_peer;
        if let Err(err) = stream.set_nonblocking(true) {
            warn!(error = %err, "cannot configure accepted socket");
            shared.emit(TransportEvent::Error(err.into()));
            return;
        }
        // SAFETY: every peer is deleted from the poller in `close` before its socket drops.
        if let Err(err) = unsafe { self.poller.add(&stream, Event::readable(key)) } {
            warn!(error = %err, "cannot watch accepted socket");
            shared.emit(TransportEvent::Error(err.into()));
            return;
        }
        self.next_peer += 1;

        let id = format!("client_{key}");
        let stream = Arc::new(stream);
        shared
            .peers
            .lock()
            .expect("peer map mutex poisoned")
            .insert(id.clone(), Arc::clone(&stream));
        debug!(peer = %id, "peer connected");
        shared.emit(TransportEvent::Connection {
            peer: id.clone(),
            connected: true,
        });
        self.readers.insert(
            key,
            PeerReader {
                id,
                stream,
                assembler: StreamAssembler::new(),
            },
        );
    }

    fn service(&mut self, key: usize, shared: &Shared, chunk: &mut [u8]) {
        let Some(reader) = self.readers.get_mut(&key) else {
            return;
        };
        match reader.pump(shared, chunk) {
            ReadOutcome::Idle | ReadOutcome::Active => {
                if let Err(err) = self.poller.modify(&*reader.stream, Event::readable(key)) {
                    self.close(key, shared, Some(err));
                }
            }
            ReadOutcome::Closed(err) => self.close(key, shared, err),
        }
    }

    fn close(&mut self, key: usize, shared: &Shared, err: Option<io::Error>) {
        let Some(reader) = self.readers.remove(&key) else {
            return;
        };
        let _ = self.poller.delete(&*reader.stream);
        if let Some(err) = err {
            warn!(peer = %reader.id, error = %err, "peer read failed");
            shared.emit(TransportEvent::Error(err.into()));
        }
        if let Some(stream) = shared.remove(&reader.id) {
            let _ = stream.shutdown(Shutdown::Both);
        }
        debug!(peer = %reader.id, "peer disconnected");
        shared.emit(TransportEvent::Connection {
            peer: reader.id,
            connected: false,
        });
    }

    fn run(&mut self, shared: &Shared) {
        let mut events = Events::new();
        let mut ready: Vec<usize> = Vec::new();
        let mut chunk = vec![0u8; READ_CHUNK];

        while shared.running.load(Ordering::Acquire) {
            events.clear();
            match self.poller.wait(&mut events, Some(POLL_INTERVAL)) {
                Ok(_) => {}
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    warn!(error = %err, "readiness wait failed, stopping ipc server");
                    shared.emit(TransportEvent::Error(err.into()));
                    break;
                }
            }

            ready.clear();
            ready.extend(events.iter().map(|event| event.key));
            for &key in &ready {
                if key == LISTENER_KEY {
                    self.accept_pending(shared);
                } else {
                    self.service(key, shared, &mut chunk);
                }
            }
        }
    }
}

impl Drop for ServerDispatch {
    fn drop(&mut self) {
        for reader in self.readers.values() {
            let _ = self.poller.delete(&*reader.stream);
        }
        let _ = self.poller.delete(&self.listener);
    }
}

fn client_loop(stream: &Arc<UnixStream>, shared: &Shared) {
    let mut reader = PeerReader {
        id: SERVER_PEER_ID.to_owned(),
        stream: Arc::clone(stream),
        assembler: StreamAssembler::new(),
    };
    let mut chunk = vec![0u8; READ_CHUNK];

    let error = loop {
        if !shared.running.load(Ordering::Acquire) {
            return;
        }
        match reader.pump(shared, &mut chunk) {
            ReadOutcome::Idle | ReadOutcome::Active => {}
            ReadOutcome::Closed(err) => break err,
        }
    };

    // A stop() in progress owns the teardown and wants silence.
    if shared.running.swap(false, Ordering::AcqRel) {
        if let Some(err) = error {
            shared.emit(TransportEvent::Error(err.into()));
        }
        shared.remove(SERVER_PEER_ID);
        info!("connection to server lost");
        shared.emit(TransportEvent::Connection {
            peer: SERVER_PEER_ID.to_owned(),
            connected: false,
        });
    }
}

/// Unix domain socket transport.
#[derive(Debug)]
pub struct IpcTransport {
    config: IpcConfig,
    mode: IpcMode,
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl IpcTransport {
    /// Create a stopped transport that will report into `events`.
    #[must_use]
    pub fn new(config: IpcConfig, mode: IpcMode, events: Sender<TransportEvent>) -> Self {
        Self {
            config,
            mode,
            shared: Arc::new(Shared {
                running: AtomicBool::new(false),
                peers: Mutex::new(HashMap::new()),
                events,
            }),
            worker: Mutex::new(None),
        }
    }

    /// Forcibly drop one peer. Its disconnection is reported by the dispatch loop.
    pub fn disconnect_peer(&self, id: &str) -> Result<(), TransportError> {
        let stream = self
            .shared
            .peer(id)
            .ok_or_else(|| TransportError::UnknownPeer(id.to_owned()))?;
        stream.shutdown(Shutdown::Both)?;
        Ok(())
    }

    fn remove_socket_file(&self) {
        match fs::remove_file(&self.config.endpoint) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => warn!(
                endpoint = %self.config.endpoint.display(),
                error = %err,
                "cannot remove socket file"
            ),
        }
    }

    fn spawn_server(&self) -> Result<JoinHandle<()>, TransportError> {
        self.remove_socket_file();
        let listener =
            UnixListener::bind(&self.config.endpoint).map_err(|source| TransportError::Endpoint {
                endpoint: self.config.endpoint.display().to_string(),
                source,
            })?;
        listener.set_nonblocking(true)?;
        let mut dispatch = ServerDispatch::new(listener)?;
        info!(endpoint = %self.config.endpoint.display(), "ipc server listening");

        self.shared.running.store(true, Ordering::Release);
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("synesthesia-ipc-server".into())
            .spawn(move || dispatch.run(&shared))?;
        Ok(handle)
    }

    fn spawn_client(&self) -> Result<JoinHandle<()>, TransportError> {
        let stream = UnixStream::connect(&self.config.endpoint).map_err(|source| {
            TransportError::Endpoint {
                endpoint: self.config.endpoint.display().to_string(),
                source,
            }
        })?;
        stream.set_read_timeout(Some(self.config.read_timeout))?;
        stream.set_write_timeout(Some(self.config.write_timeout))?;
        info!(endpoint = %self.config.endpoint.display(), "connected to ipc server");

        let stream = Arc::new(stream);
        self.shared
            .peers
            .lock()
            .expect("peer map mutex poisoned")
            .insert(SERVER_PEER_ID.to_owned(), Arc::clone(&stream));
        self.shared.running.store(true, Ordering::Release);
        self.shared.emit(TransportEvent::Connection {
            peer: SERVER_PEER_ID.to_owned(),
            connected: true,
        });

        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("synesthesia-ipc-client".into())
            .spawn(move || client_loop(&stream, &shared))?;
        Ok(handle)
    }

    fn write_to(&self, id: &str, stream: &UnixStream, bytes: &[u8]) -> Result<(), TransportError> {
        write_fully(stream, bytes, self.config.write_timeout).map_err(|err| {
            debug!(peer = %id, error = %err, "write failed");
            TransportError::from(err)
        })
    }
}

impl Transport for IpcTransport {
    #[instrument(level = "debug", skip(self), fields(mode = ?self.mode))]
    fn start(&self) -> Result<(), TransportError> {
        let mut worker = self.worker.lock().expect("ipc worker mutex poisoned");
        if let Some(handle) = worker.take() {
            if self.shared.running.load(Ordering::Acquire) {
                *worker = Some(handle);
                return Err(TransportError::AlreadyRunning);
            }
            // Previous connection ended on its own; reap it before reconnecting.
            join_worker(handle);
        }

        let spawned = match self.mode {
            IpcMode::Server => self.spawn_server(),
            IpcMode::Client => self.spawn_client(),
        };
        match spawned {
            Ok(handle) => {
                *worker = Some(handle);
                Ok(())
            }
            Err(err) => {
                self.shared.running.store(false, Ordering::Release);
                self.shared.close_all();
                Err(err)
            }
        }
    }

    #[instrument(level = "debug", skip(self), fields(mode = ?self.mode))]
    fn stop(&self) {
        self.shared.running.store(false, Ordering::Release);
        let handle = self.worker.lock().expect("ipc worker mutex poisoned").take();
        let Some(handle) = handle else {
            return;
        };

        // Unblocks a client read; the server loop notices the flag within one sweep.
        if self.mode == IpcMode::Client {
            if let Some(stream) = self.shared.peer(SERVER_PEER_ID) {
                let _ = stream.shutdown(Shutdown::Both);
            }
        }
        join_worker(handle);
        self.shared.close_all();

        if self.mode == IpcMode::Server {
            self.remove_socket_file();
        }
        debug!("ipc transport stopped");
    }

    fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    #[instrument(level = "trace", skip(self, bytes), fields(len = bytes.len()))]
    fn send(&self, bytes: &[u8], target: Option<&str>) -> Result<(), TransportError> {
        if bytes.len() > MAX_MESSAGE_SIZE {
            return Err(TransportError::MessageTooLarge {
                len: bytes.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }
        if !self.is_running() {
            return Err(TransportError::NotRunning);
        }

        let id = match (self.mode, target) {
            (IpcMode::Server, Some(id)) if !id.is_empty() => id,
            (IpcMode::Server, _) => return self.broadcast(bytes),
            (IpcMode::Client, _) => SERVER_PEER_ID,
        };
        let stream = self
            .shared
            .peer(id)
            .ok_or_else(|| TransportError::UnknownPeer(id.to_owned()))?;
        self.write_to(id, &stream, bytes)
    }

    fn broadcast(&self, bytes: &[u8]) -> Result<(), TransportError> {
        if !self.is_running() {
            return Err(TransportError::NotRunning);
        }

        let peers = self.shared.snapshot();
        let total = peers.len();
        let failed = peers
            .iter()
            .filter(|(id, stream)| self.write_to(id, stream, bytes).is_err())
            .count();

        if failed > 0 {
            return Err(TransportError::PartialBroadcast { failed, total });
        }
        Ok(())
    }

    fn endpoint_info(&self) -> String {
        format!("unix://{}", self.config.endpoint.display())
    }

    fn connected_peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self
            .shared
            .peers
            .lock()
            .expect("peer map mutex poisoned")
            .keys()
            .cloned()
            .collect();
        peers.sort();
        peers
    }
}

impl Drop for IpcTransport {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ConfigUpdate, Message, decode, encode_config_update, encode_ping};
    use std::sync::mpsc::{self, Receiver};

    const WAIT: Duration = Duration::from_secs(2);

    fn socket_path(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join("ipc.sock")
    }

    fn expect_connection(rx: &Receiver<TransportEvent>) -> (PeerId, bool) {
        loop {
            match rx.recv_timeout(WAIT).expect("no event") {
                TransportEvent::Connection { peer, connected } => return (peer, connected),
                TransportEvent::Message { .. } => panic!("unexpected message"),
                TransportEvent::Error(_) => {}
            }
        }
    }

    fn expect_message(rx: &Receiver<TransportEvent>) -> (PeerId, Vec<u8>) {
        loop {
            match rx.recv_timeout(WAIT).expect("no event") {
                TransportEvent::Message { bytes, peer } => return (peer, bytes.to_vec()),
                _ => {}
            }
        }
    }

    #[test]
    fn test_client_requires_listening_server() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, _rx) = mpsc::channel();
        let client = IpcTransport::new(
            IpcConfig::with_endpoint(socket_path(&dir)),
            IpcMode::Client,
            tx,
        );
        assert!(matches!(
            client.start(),
            Err(TransportError::Endpoint { .. })
        ));
        assert!(!client.is_running());
    }

    #[test]
    fn test_exchange_and_disconnect() {
        let dir = tempfile::tempdir().unwrap();
        let path = socket_path(&dir);

        let (server_tx, server_rx) = mpsc::channel();
        let server = IpcTransport::new(IpcConfig::with_endpoint(&path), IpcMode::Server, server_tx);
        server.start().unwrap();
        assert!(path.exists());
        assert!(matches!(server.start(), Err(TransportError::AlreadyRunning)));

        let (client_tx, client_rx) = mpsc::channel();
        let client = IpcTransport::new(IpcConfig::with_endpoint(&path), IpcMode::Client, client_tx);
        client.start().unwrap();
        assert_eq!(expect_connection(&client_rx), (SERVER_PEER_ID.to_owned(), true));

        let (peer, connected) = expect_connection(&server_rx);
        assert!(connected);
        assert!(peer.starts_with("client_"));
        assert_eq!(server.connected_peers(), vec![peer.clone()]);

        // Two messages in one write arrive as two events
        let mut burst = encode_ping(1);
        burst.extend_from_slice(&encode_config_update(&ConfigUpdate::default(), 2));
        client.send(&burst, None).unwrap();
        let (from, first) = expect_message(&server_rx);
        assert_eq!(from, peer);
        assert_eq!(decode(&first).unwrap().message, Message::Ping);
        let (_, second) = expect_message(&server_rx);
        assert_eq!(decode(&second).unwrap().header.sequence(), 2);

        let pong = encode_ping(3);
        server.send(&pong, Some(peer.as_str())).unwrap();
        let (from, received) = expect_message(&client_rx);
        assert_eq!(from, SERVER_PEER_ID);
        assert_eq!(received, pong);

        assert!(matches!(
            server.send(&pong, Some("client_999")),
            Err(TransportError::UnknownPeer(_))
        ));

        client.stop();
        assert_eq!(expect_connection(&server_rx), (peer, false));
        assert!(server.connected_peers().is_empty());

        server.stop();
        server.stop();
        assert!(!path.exists());
    }

    #[test]
    fn test_server_stop_is_seen_by_client() {
        let dir = tempfile::tempdir().unwrap();
        let path = socket_path(&dir);

        let (server_tx, server_rx) = mpsc::channel();
        let server = IpcTransport::new(IpcConfig::with_endpoint(&path), IpcMode::Server, server_tx);
        server.start().unwrap();

        let (client_tx, client_rx) = mpsc::channel();
        let client = IpcTransport::new(IpcConfig::with_endpoint(&path), IpcMode::Client, client_tx);
        client.start().unwrap();
        expect_connection(&client_rx);
        expect_connection(&server_rx);

        server.stop();
        assert_eq!(
            expect_connection(&client_rx),
            (SERVER_PEER_ID.to_owned(), false)
        );
        assert!(!client.is_running());
        assert!(matches!(
            client.send(&encode_ping(0), None),
            Err(TransportError::NotRunning)
        ));
    }

    #[test]
    fn test_broadcast_reaches_every_peer() {
        let dir = tempfile::tempdir().unwrap();
        let path = socket_path(&dir);

        let (server_tx, server_rx) = mpsc::channel();
        let server = IpcTransport::new(IpcConfig::with_endpoint(&path), IpcMode::Server, server_tx);
        server.start().unwrap();

        let mut clients = Vec::new();
        for _ in 0..3 {
            let (tx, rx) = mpsc::channel();
            let client = IpcTransport::new(IpcConfig::with_endpoint(&path), IpcMode::Client, tx);
            client.start().unwrap();
            expect_connection(&rx);
            expect_connection(&server_rx);
            clients.push((client, rx));
        }
        assert_eq!(server.connected_peers().len(), 3);

        let message = encode_config_update(&ConfigUpdate::default(), 11);
        server.broadcast(&message).unwrap();
        for (_, rx) in &clients {
            assert_eq!(expect_message(rx).1, message);
        }
    }

    #[test]
    fn test_disconnect_peer_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = socket_path(&dir);

        let (server_tx, server_rx) = mpsc::channel();
        let server = IpcTransport::new(IpcConfig::with_endpoint(&path), IpcMode::Server, server_tx);
        server.start().unwrap();

        let (client_tx, client_rx) = mpsc::channel();
        let client = IpcTransport::new(IpcConfig::with_endpoint(&path), IpcMode::Client, client_tx);
        client.start().unwrap();
        expect_connection(&client_rx);
        let (peer, _) = expect_connection(&server_rx);

        server.disconnect_peer(&peer).unwrap();
        assert_eq!(expect_connection(&server_rx), (peer.clone(), false));
        assert_eq!(
            expect_connection(&client_rx),
            (SERVER_PEER_ID.to_owned(), false)
        );
        assert!(server.connected_peers().is_empty());
        assert!(matches!(
            server.disconnect_peer(&peer),
            Err(TransportError::UnknownPeer(_))
        ));
    }

    #[test]
    fn test_idle_server_wakes_for_late_peer_and_stops_promptly() {
        let dir = tempfile::tempdir().unwrap();
        let path = socket_path(&dir);

        let (server_tx, server_rx) = mpsc::channel();
        let server = IpcTransport::new(IpcConfig::with_endpoint(&path), IpcMode::Server, server_tx);
        server.start().unwrap();

        // Several idle wait timeouts pass before anyone connects
        thread::sleep(POLL_INTERVAL * 3);
        let (client_tx, _client_rx) = mpsc::channel();
        let client = IpcTransport::new(IpcConfig::with_endpoint(&path), IpcMode::Client, client_tx);
        client.start().unwrap();
        let (peer, connected) = expect_connection(&server_rx);
        assert!(connected);

        client.send(&encode_ping(9), None).unwrap();
        let (from, bytes) = expect_message(&server_rx);
        assert_eq!(from, peer);
        assert_eq!(decode(&bytes).unwrap().header.sequence(), 9);

        let started = Instant::now();
        server.stop();
        assert!(started.elapsed() < POLL_INTERVAL * 5);
    }

    #[test]
    fn test_oversized_send_rejected() {
        let (tx, _rx) = mpsc::channel();
        let server = IpcTransport::new(IpcConfig::default(), IpcMode::Server, tx);
        let big = vec![0u8; MAX_MESSAGE_SIZE + 1];
        assert!(matches!(
            server.send(&big, None),
            Err(TransportError::MessageTooLarge { .. })
        ));
    }
}
