use std::net::{SocketAddr, SocketAddrV4};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::context::InprocHub;
use super::poll::{PollId, PollQueue, Pollable, ReadyHandler, ReadyWaker};
use super::transport::{self, CloseFlag, Connections, TcpAcceptor};
use super::{Frame, SocketContext, SocketError, DEFAULT_HIGH_WATER_MARK};
use crate::endpoint::SocketEndpoint;

enum Attachment {
    Inproc { hub: Arc<InprocHub>, bound: bool },
    TcpBound { acceptor: TcpAcceptor },
    TcpConnected,
    Udp,
}

#[derive(Default)]
struct State {
    attachments: Vec<(SocketEndpoint, Attachment)>,
    closed: bool,
}

/// Receiving side of a pub/sub pair, subscribed to every frame.
///
/// Frames from all transports land in one inbox; the socket becomes ready
/// whenever the inbox is non-empty.
pub struct SubscriberSocket {
    name: String,
    context: SocketContext,
    inbox: Arc<PollQueue<Frame>>,
    close_flag: CloseFlag,
    connections: Connections,
    state: Mutex<State>,
}

impl SubscriberSocket {
    pub fn new(context: &SocketContext) -> Self {
        Self::with_high_water_mark(context, DEFAULT_HIGH_WATER_MARK)
    }

    pub fn with_high_water_mark(context: &SocketContext, high_water_mark: usize) -> Self {
        let inbox = Arc::new(PollQueue::new(high_water_mark.max(1)));
        Self {
            name: format!("sub-{}", inbox.poll_id()),
            context: context.clone(),
            inbox,
            close_flag: CloseFlag::default(),
            connections: Connections::default(),
            state: Mutex::new(State::default()),
        }
    }

    /// Handler run on the poll thread while frames are waiting.
    pub fn on_receive_ready(&self, handler: ReadyHandler) {
        self.inbox.set_ready_handler(handler);
    }

    /// Accept publishers at `endpoint`.
    pub fn bind(&self, endpoint: &SocketEndpoint) -> Result<(), SocketError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(SocketError::Closed);
        }
        let attachment = match endpoint {
            SocketEndpoint::InProcess { identity } => {
                let hub = self.context.hub(identity);
                hub.claim(identity)?;
                hub.add_reader(self.inbox.poll_id(), self.inbox.clone());
                Attachment::Inproc { hub, bound: true }
            }
            SocketEndpoint::Tcp { address, port } => {
                let addr = SocketAddr::V4(SocketAddrV4::new(*address, port.get()));
                let inbox = self.inbox.clone();
                let connections = self.connections.clone();
                let name = self.name.clone();
                let acceptor = TcpAcceptor::spawn(
                    format!("{}-accept", self.name),
                    addr,
                    self.close_flag.clone(),
                    move |stream| {
                        let spawned = transport::spawn_reader(
                            format!("{}-read", name),
                            stream,
                            inbox.clone(),
                            connections.clone(),
                        );
                        if let Err(e) = spawned {
                            debug!(error = %e, "Failed to start publisher reader");
                        }
                    },
                )
                .map_err(|e| SocketError::io(endpoint, e))?;
                Attachment::TcpBound { acceptor }
            }
            SocketEndpoint::Multicast { .. } => self.open_udp(endpoint)?,
        };
        debug!(socket = %self.name, endpoint = %endpoint, "Subscriber bound");
        state.attachments.push((endpoint.clone(), attachment));
        Ok(())
    }

    /// Receive from a publisher bound at `endpoint`.
    ///
    /// Succeeds before the publisher exists; the connection is retried in
    /// the background.
    pub fn connect(&self, endpoint: &SocketEndpoint) -> Result<(), SocketError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(SocketError::Closed);
        }
        let attachment = match endpoint {
            SocketEndpoint::InProcess { identity } => {
                let hub = self.context.hub(identity);
                hub.add_reader(self.inbox.poll_id(), self.inbox.clone());
                Attachment::Inproc { hub, bound: false }
            }
            SocketEndpoint::Tcp { address, port } => {
                let addr = SocketAddr::V4(SocketAddrV4::new(*address, port.get()));
                transport::spawn_connector(
                    format!("{}-connect", self.name),
                    addr,
                    self.close_flag.clone(),
                    self.connections.clone(),
                    transport::reader_session(self.inbox.clone()),
                )
                .map_err(|e| SocketError::io(endpoint, e))?;
                Attachment::TcpConnected
            }
            SocketEndpoint::Multicast { .. } => self.open_udp(endpoint)?,
        };
        debug!(socket = %self.name, endpoint = %endpoint, "Subscriber connected");
        state.attachments.push((endpoint.clone(), attachment));
        Ok(())
    }

    fn open_udp(&self, endpoint: &SocketEndpoint) -> Result<Attachment, SocketError> {
        let SocketEndpoint::Multicast { address, port } = endpoint else {
            return Err(SocketError::NotOpen);
        };
        let socket = transport::bind_udp_receiver(*address, port.get())
            .map_err(|e| SocketError::io(endpoint, e))?;
        transport::spawn_udp_reader(
            format!("{}-udp", self.name),
            socket,
            self.inbox.clone(),
            self.close_flag.clone(),
        )
        .map_err(|e| SocketError::io(endpoint, e))?;
        Ok(Attachment::Udp)
    }

    /// Take the next waiting frame, if any.
    pub fn try_receive(&self) -> Option<Frame> {
        self.inbox.try_pop()
    }

    /// Frames waiting in the inbox.
    pub fn pending(&self) -> usize {
        self.inbox.len()
    }

    pub fn is_open(&self) -> bool {
        let state = self.state.lock();
        !state.closed && !state.attachments.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Release every endpoint and discard waiting frames. Idempotent.
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
                    hub.remove_reader(self.inbox.poll_id());
                    if bound {
                        hub.release();
                    }
                }
                Attachment::TcpBound { mut acceptor } => acceptor.join(),
                Attachment::TcpConnected | Attachment::Udp => {}
            }
            trace!(socket = %self.name, endpoint = %endpoint, "Subscriber endpoint released");
        }
        self.inbox.clear();
        debug!(socket = %self.name, "Subscriber closed");
    }
}

impl Drop for SubscriberSocket {
    fn drop(&mut self) {
        self.close();
    }
}

impl Pollable for SubscriberSocket {
    fn poll_id(&self) -> PollId {
        self.inbox.poll_id()
    }

    fn attach(&self, waker: ReadyWaker) {
        self.inbox.attach(waker);
    }

    fn detach(&self) {
        self.inbox.detach();
    }

    fn on_ready(&self) {
        self.inbox.on_ready();
    }
}
