use std::net::{SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam::channel::Sender;
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::context::InprocHub;
use super::poll::{PollId, Pollable, ReadyWaker};
use super::transport::{self, CloseFlag, Connections, PeerSet, TcpAcceptor, UdpSender};
use super::{Frame, SocketContext, SocketError, DEFAULT_HIGH_WATER_MARK};
use crate::endpoint::SocketEndpoint;

enum Attachment {
    Inproc {
        hub: Arc<InprocHub>,
        bound: bool,
    },
    TcpBound {
        acceptor: TcpAcceptor,
        peers: PeerSet,
    },
    TcpConnected {
        pipe: Sender<Frame>,
    },
    Udp(UdpSender),
}

#[derive(Default)]
struct State {
    attachments: Vec<(SocketEndpoint, Attachment)>,
    closed: bool,
}

/// Publishing side of a pub/sub pair.
///
/// Registered with a dispatcher for lifecycle bookkeeping only; it never
/// becomes readable, so its readiness handler is a no-op.
pub struct PublisherSocket {
    id: PollId,
    name: String,
    context: SocketContext,
    high_water_mark: usize,
    close_flag: CloseFlag,
    connections: Connections,
    state: Mutex<State>,
    sent: AtomicU64,
}

impl PublisherSocket {
    pub fn new(context: &SocketContext) -> Self {
        Self::with_high_water_mark(context, DEFAULT_HIGH_WATER_MARK)
    }

    pub fn with_high_water_mark(context: &SocketContext, high_water_mark: usize) -> Self {
        let id = PollId::next();
        Self {
            id,
            name: format!("pub-{}", id),
            context: context.clone(),
            high_water_mark: high_water_mark.max(1),
            close_flag: CloseFlag::default(),
            connections: Connections::default(),
            state: Mutex::new(State::default()),
            sent: AtomicU64::new(0),
        }
    }

    /// Accept subscribers at `endpoint`.
    pub fn bind(&self, endpoint: &SocketEndpoint) -> Result<(), SocketError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(SocketError::Closed);
        }
        let attachment = match endpoint {
            SocketEndpoint::InProcess { identity } => {
                let hub = self.context.hub(identity);
                hub.claim(identity)?;
                Attachment::Inproc { hub, bound: true }
            }
            SocketEndpoint::Tcp { address, port } => {
                let addr = SocketAddr::V4(SocketAddrV4::new(*address, port.get()));
                let peers = PeerSet::new(self.high_water_mark);
                let accepted = peers.clone();
                let name = self.name.clone();
                let acceptor = TcpAcceptor::spawn(
                    format!("{}-accept", self.name),
                    addr,
                    self.close_flag.clone(),
                    move |stream| {
                        if let Err(e) = accepted.add(format!("{}-write", name), stream) {
                            debug!(error = %e, "Failed to start subscriber writer");
                        }
                    },
                )
                .map_err(|e| SocketError::io(endpoint, e))?;
                Attachment::TcpBound { acceptor, peers }
            }
            SocketEndpoint::Multicast { address, port } => Attachment::Udp(
                UdpSender::connect(*address, port.get())
                    .map_err(|e| SocketError::io(endpoint, e))?,
            ),
        };
        debug!(socket = %self.name, endpoint = %endpoint, "Publisher bound");
        state.attachments.push((endpoint.clone(), attachment));
        Ok(())
    }

    /// Deliver to a subscriber bound at `endpoint`.
    pub fn connect(&self, endpoint: &SocketEndpoint) -> Result<(), SocketError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(SocketError::Closed);
        }
        let attachment = match endpoint {
            SocketEndpoint::InProcess { identity } => Attachment::Inproc {
                hub: self.context.hub(identity),
                bound: false,
            },
            SocketEndpoint::Tcp { address, port } => {
                let addr = SocketAddr::V4(SocketAddrV4::new(*address, port.get()));
                let (pipe, outbound) = transport::outbound_pipe(self.high_water_mark);
                transport::spawn_connector(
                    format!("{}-connect", self.name),
                    addr,
                    self.close_flag.clone(),
                    self.connections.clone(),
                    transport::writer_session(outbound),
                )
                .map_err(|e| SocketError::io(endpoint, e))?;
                Attachment::TcpConnected { pipe }
            }
            SocketEndpoint::Multicast { address, port } => Attachment::Udp(
                UdpSender::connect(*address, port.get())
                    .map_err(|e| SocketError::io(endpoint, e))?,
            ),
        };
        debug!(socket = %self.name, endpoint = %endpoint, "Publisher connected");
        state.attachments.push((endpoint.clone(), attachment));
        Ok(())
    }

    /// Send one frame to every peer.
    ///
    /// Peers at their high-water mark silently miss the frame.
    pub fn send(&self, frame: Frame) -> Result<(), SocketError> {
        let state = self.state.lock();
        if state.closed {
            return Err(SocketError::Closed);
        }
        if state.attachments.is_empty() {
            return Err(SocketError::NotOpen);
        }
        for (endpoint, attachment) in &state.attachments {
            match attachment {
                Attachment::Inproc { hub, .. } => {
                    hub.deliver(&frame);
                }
                Attachment::TcpBound { peers, .. } => {
                    peers.broadcast(&frame);
                }
                Attachment::TcpConnected { pipe } => {
                    if !transport::offer(pipe, frame.clone()) {
                        trace!(endpoint = %endpoint, "Outbound pipe full, frame dropped");
                    }
                }
                Attachment::Udp(sender) => {
                    sender
                        .send(&frame)
                        .map_err(|e| SocketError::io(endpoint, e))?;
                }
            }
        }
        self.sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        let state = self.state.lock();
        !state.closed && !state.attachments.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Frames handed to the transports so far.
    pub fn sent_count(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Number of subscribers connected to bound TCP endpoints.
    pub fn peer_count(&self) -> usize {
        self.state
            .lock()
            .attachments
            .iter()
            .map(|(_, a)| match a {
                Attachment::TcpBound { peers, .. } => peers.len(),
                _ => 0,
            })
            .sum()
    }

    /// Release every endpoint. Idempotent.
    pub fn close(&self) {
        let attachments = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            std::mem::take(&mut state.attachments)
        };
        self.close_flag.close();
        self.connections.shutdown_all();
        for (endpoint, attachment) in attachments {
            match attachment {
                Attachment::Inproc { hub, bound } => {
                    if bound {
                        hub.release();
                    }
                }
                Attachment::TcpBound { mut acceptor, peers } => {
                    peers.close();
                    acceptor.join();
                }
                Attachment::TcpConnected { .. } | Attachment::Udp(_) => {}
            }
            trace!(socket = %self.name, endpoint = %endpoint, "Publisher endpoint released");
        }
        debug!(socket = %self.name, "Publisher closed");
    }
}

impl Drop for PublisherSocket {
    fn drop(&mut self) {
        self.close();
    }
}

impl Pollable for PublisherSocket {
    fn poll_id(&self) -> PollId {
        self.id
    }

    fn attach(&self, _waker: ReadyWaker) {}

    fn detach(&self) {}

    fn on_ready(&self) {}
}
