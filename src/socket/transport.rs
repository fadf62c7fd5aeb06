//! Blocking network transports backing the sockets.
//!
//! Every connection is served by plain OS threads; the dispatcher only ever
//! sees the inbox queues these threads fill.

use std::collections::HashMap;
use std::io::{self, BufReader, BufWriter};
use std::net::{Ipv4Addr, Shutdown, SocketAddr, SocketAddrV4, TcpListener, TcpStream, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use super::frame::{decode_frame, encode_frame, read_frame, write_frame};
use super::poll::PollQueue;
use super::Frame;

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(10);
const CLOSE_POLL_INTERVAL: Duration = Duration::from_millis(100);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);
const RECONNECT_INITIAL_DELAY: Duration = Duration::from_millis(10);
const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(1);
/// Largest UDP payload carried by one datagram.
const MAX_DATAGRAM: usize = 65_507;

/// Shared close flag for a socket's threads.
#[derive(Clone, Default)]
pub(crate) struct CloseFlag(Arc<AtomicBool>);

impl CloseFlag {
    pub fn close(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Sleep up to `duration`, waking early if closed. Returns `true` if closed.
    fn sleep(&self, duration: Duration) -> bool {
        let mut remaining = duration;
        while !remaining.is_zero() {
            if self.is_closed() {
                return true;
            }
            let step = remaining.min(ACCEPT_POLL_INTERVAL);
            thread::sleep(step);
            remaining -= step;
        }
        self.is_closed()
    }
}

fn spawn_named<F>(name: String, f: F) -> io::Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new().name(name).spawn(f)
}

/// Open TCP streams owned by a socket, shut down together on close.
#[derive(Clone, Default)]
pub(crate) struct Connections {
    next_id: Arc<AtomicU64>,
    streams: Arc<Mutex<HashMap<u64, TcpStream>>>,
}

impl Connections {
    fn track(&self, stream: &TcpStream) -> io::Result<u64> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.streams.lock().insert(id, stream.try_clone()?);
        Ok(id)
    }

    fn forget(&self, id: u64) {
        self.streams.lock().remove(&id);
    }

    pub fn shutdown_all(&self) {
        for (_, stream) in self.streams.lock().drain() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}

/// Accept loop of a bound TCP socket.
pub(crate) struct TcpAcceptor {
    handle: Option<JoinHandle<()>>,
}

impl TcpAcceptor {
    pub fn spawn<F>(name: String, addr: SocketAddr, closed: CloseFlag, on_accept: F) -> io::Result<Self>
    where
        F: Fn(TcpStream) + Send + 'static,
    {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        let handle = spawn_named(name, move || loop {
            if closed.is_closed() {
                break;
            }
            match listener.accept() {
                Ok((stream, peer)) => {
                    if let Err(e) = stream.set_nonblocking(false) {
                        warn!(peer = %peer, error = %e, "Failed to configure accepted stream");
                        continue;
                    }
                    let _ = stream.set_nodelay(true);
                    debug!(local = %local_addr, peer = %peer, "Accepted connection");
                    on_accept(stream);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                }
                Err(e) => {
                    warn!(local = %local_addr, error = %e, "Accept failed");
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                }
            }
        })?;
        Ok(Self {
            handle: Some(handle),
        })
    }

    /// Wait for the accept loop to exit. The close flag must already be set.
    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Read frames from `stream` into `inbox` until the stream ends.
fn read_into(stream: TcpStream, inbox: &PollQueue<Frame>) {
    let peer = stream.peer_addr().ok();
    let mut reader = BufReader::new(stream);
    loop {
        match read_frame(&mut reader) {
            Ok(frame) => {
                if inbox.push(frame).is_err() {
                    trace!(peer = ?peer, "Inbox full, frame dropped");
                }
            }
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                debug!(peer = ?peer, "Connection closed by peer");
                break;
            }
            Err(e) => {
                debug!(peer = ?peer, error = %e, "Connection read ended");
                break;
            }
        }
    }
}

/// Spawn a reader thread for an accepted subscriber connection.
pub(crate) fn spawn_reader(
    name: String,
    stream: TcpStream,
    inbox: Arc<PollQueue<Frame>>,
    connections: Connections,
) -> io::Result<()> {
    let id = connections.track(&stream)?;
    spawn_named(name, move || {
        read_into(stream, &inbox);
        connections.forget(id);
    })?;
    Ok(())
}

/// Keep a connection to `addr` alive, running `session` on each
/// established stream until the flag is closed.
pub(crate) fn spawn_connector<F>(
    name: String,
    addr: SocketAddr,
    closed: CloseFlag,
    connections: Connections,
    mut session: F,
) -> io::Result<JoinHandle<()>>
where
    F: FnMut(TcpStream, &CloseFlag) + Send + 'static,
{
    spawn_named(name, move || {
        let mut delay = RECONNECT_INITIAL_DELAY;
        while !closed.is_closed() {
            match TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT) {
                Ok(stream) => {
                    delay = RECONNECT_INITIAL_DELAY;
                    let _ = stream.set_nodelay(true);
                    debug!(remote = %addr, "Connected");
                    let id = match connections.track(&stream) {
                        Ok(id) => id,
                        Err(e) => {
                            warn!(remote = %addr, error = %e, "Failed to track connection");
                            continue;
                        }
                    };
                    // a close racing the connect must still interrupt the session
                    if closed.is_closed() {
                        connections.forget(id);
                        break;
                    }
                    session(stream, &closed);
                    connections.forget(id);
                }
                Err(e) => {
                    trace!(remote = %addr, error = %e, delay = ?delay, "Connect failed, retrying");
                    if closed.sleep(delay) {
                        break;
                    }
                    delay = (delay * 2).min(RECONNECT_MAX_DELAY);
                }
            }
        }
    })
}

/// Session body for a connecting subscriber.
pub(crate) fn reader_session(inbox: Arc<PollQueue<Frame>>) -> impl FnMut(TcpStream, &CloseFlag) {
    move |stream, _closed| read_into(stream, &inbox)
}

/// Session body for a connecting publisher: drain the outbound pipe into
/// the stream until it fails or the socket closes.
pub(crate) fn writer_session(outbound: Receiver<Frame>) -> impl FnMut(TcpStream, &CloseFlag) {
    move |stream, closed| {
        let peer = stream.peer_addr().ok();
        let mut writer = BufWriter::new(stream);
        loop {
            match outbound.recv_timeout(CLOSE_POLL_INTERVAL) {
                Ok(frame) => {
                    if let Err(e) = write_frame(&mut writer, &frame) {
                        debug!(peer = ?peer, error = %e, "Write failed, reconnecting");
                        return;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    if closed.is_closed() {
                        return;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => return,
            }
        }
    }
}

/// Outbound pipe of a connecting publisher. Frames queue up to the
/// high-water mark while the connection is down.
pub(crate) fn outbound_pipe(capacity: usize) -> (Sender<Frame>, Receiver<Frame>) {
    bounded(capacity)
}

/// Returns `false` if the pipe was full and the frame was dropped.
pub(crate) fn offer(pipe: &Sender<Frame>, frame: Frame) -> bool {
    match pipe.try_send(frame) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => false,
    }
}

struct Peer {
    tx: Sender<Frame>,
    alive: Arc<AtomicBool>,
}

/// Connected subscribers of a bound publisher, each with its own writer.
#[derive(Clone)]
pub(crate) struct PeerSet {
    capacity: usize,
    peers: Arc<Mutex<Vec<Peer>>>,
    connections: Connections,
}

impl PeerSet {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            peers: Arc::new(Mutex::new(Vec::new())),
            connections: Connections::default(),
        }
    }

    pub fn add(&self, name: String, stream: TcpStream) -> io::Result<()> {
        let id = self.connections.track(&stream)?;
        let (tx, rx) = bounded::<Frame>(self.capacity);
        let alive = Arc::new(AtomicBool::new(true));
        let connections = self.connections.clone();
        let peer_alive = alive.clone();
        spawn_named(name, move || {
            let peer = stream.peer_addr().ok();
            let mut writer = BufWriter::new(stream);
            for frame in rx.iter() {
                if let Err(e) = write_frame(&mut writer, &frame) {
                    debug!(peer = ?peer, error = %e, "Subscriber connection lost");
                    break;
                }
            }
            peer_alive.store(false, Ordering::Release);
            connections.forget(id);
        })?;
        self.peers.lock().push(Peer { tx, alive });
        Ok(())
    }

    /// Offer a frame to every live peer. Returns how many accepted it.
    pub fn broadcast(&self, frame: &Frame) -> usize {
        let mut peers = self.peers.lock();
        peers.retain(|p| p.alive.load(Ordering::Acquire));
        peers
            .iter()
            .filter(|p| offer(&p.tx, frame.clone()))
            .count()
    }

    pub fn len(&self) -> usize {
        self.peers.lock().len()
    }

    pub fn close(&self) {
        self.peers.lock().clear();
        self.connections.shutdown_all();
    }
}

/// Bind a UDP socket receiving datagrams for `address:port`, joining the
/// group when the address is multicast.
pub(crate) fn bind_udp_receiver(address: Ipv4Addr, port: u16) -> io::Result<UdpSocket> {
    let socket = if address.is_multicast() {
        let socket = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port))?;
        socket.join_multicast_v4(&address, &Ipv4Addr::UNSPECIFIED)?;
        socket
    } else {
        UdpSocket::bind(SocketAddrV4::new(address, port))?
    };
    socket.set_read_timeout(Some(CLOSE_POLL_INTERVAL))?;
    Ok(socket)
}

pub(crate) fn spawn_udp_reader(
    name: String,
    socket: UdpSocket,
    inbox: Arc<PollQueue<Frame>>,
    closed: CloseFlag,
) -> io::Result<JoinHandle<()>> {
    spawn_named(name, move || {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        while !closed.is_closed() {
            match socket.recv_from(&mut buf) {
                Ok((len, from)) => match decode_frame(&buf[..len]) {
                    Ok(frame) => {
                        if inbox.push(frame).is_err() {
                            trace!(from = %from, "Inbox full, datagram dropped");
                        }
                    }
                    Err(e) => debug!(from = %from, error = %e, "Discarding undecodable datagram"),
                },
                Err(e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::TimedOut => {}
                Err(e) => {
                    warn!(error = %e, "UDP receive failed");
                    if closed.sleep(CLOSE_POLL_INTERVAL) {
                        break;
                    }
                }
            }
        }
    })
}

/// Sending half for `pgm://` endpoints.
pub(crate) struct UdpSender {
    socket: UdpSocket,
    target: SocketAddrV4,
}

impl UdpSender {
    pub fn connect(address: Ipv4Addr, port: u16) -> io::Result<Self> {
        let socket = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0))?;
        if address.is_multicast() {
            socket.set_multicast_loop_v4(true)?;
        }
        Ok(Self {
            socket,
            target: SocketAddrV4::new(address, port),
        })
    }

    pub fn send(&self, frame: &Frame) -> io::Result<()> {
        let encoded = encode_frame(frame)?;
        if encoded.len() > MAX_DATAGRAM {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("frame of {} bytes exceeds datagram limit", encoded.len()),
            ));
        }
        self.socket.send_to(&encoded, self.target)?;
        Ok(())
    }
}
