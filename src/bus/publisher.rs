//! Publisher side of a relay.
//!
//! Frames are enqueued by any number of threads and sent by the dispatcher's
//! poll thread, which owns the publisher socket's send path.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{check_cancelled, BusError, LifecycleState, MessageBus, Result, DRAIN_BATCH_SIZE};
use crate::dispatcher::SocketDispatcher;
use crate::endpoint::DualEndpoint;
use crate::socket::{Frame, PollQueue, PublisherSocket, SocketContext};
use crate::stream::{Observer, SharedError, Subject};

/// Default outbound queue limit, in frames.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

/// Publishes frames into a relay's incoming address.
///
/// The first publish starts the publisher; there is exactly one start even
/// when many threads publish concurrently.
#[derive(Clone)]
pub struct BusPublisher {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    bus_endpoint: DualEndpoint,
    dispatcher: Arc<SocketDispatcher>,
    socket: Arc<PublisherSocket>,
    queue: Arc<PollQueue<Frame>>,
    lifecycle: Mutex<LifecycleState>,
    started: AtomicBool,
    errors: Subject<SharedError>,
    sent: AtomicU64,
    failed: AtomicU64,
}

impl BusPublisher {
    pub fn new(
        bus_endpoint: DualEndpoint,
        dispatcher: Arc<SocketDispatcher>,
        context: &SocketContext,
    ) -> Self {
        Self::with_queue_capacity(bus_endpoint, dispatcher, context, DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_queue_capacity(
        bus_endpoint: DualEndpoint,
        dispatcher: Arc<SocketDispatcher>,
        context: &SocketContext,
        queue_capacity: usize,
    ) -> Self {
        let inner = Arc::new(Inner {
            name: format!("publisher -> {}", bus_endpoint.incoming()),
            bus_endpoint,
            dispatcher,
            socket: Arc::new(PublisherSocket::new(context)),
            queue: Arc::new(PollQueue::new(queue_capacity.max(1))),
            lifecycle: Mutex::new(LifecycleState::default()),
            started: AtomicBool::new(false),
            errors: Subject::new(),
            sent: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        });
        let weak: Weak<Inner> = Arc::downgrade(&inner);
        inner.queue.set_ready_handler(Arc::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.drain();
            }
        }));
        Self { inner }
    }

    /// Enqueue a frame for sending, starting the publisher if needed.
    ///
    /// Returns once the frame is queued; send failures are reported on
    /// [`errors`](Self::errors).
    pub fn publish(&self, frame: Frame) -> Result<()> {
        if !self.inner.started.load(Ordering::Acquire) {
            self.start()?;
        }
        let capacity = self.inner.queue.capacity();
        self.inner
            .queue
            .push(frame)
            .map_err(|_| BusError::QueueFull(capacity))
    }

    /// Error channel for asynchronous send failures.
    pub fn errors(&self) -> &Subject<SharedError> {
        &self.inner.errors
    }

    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::Acquire)
    }

    pub fn queue_capacity(&self) -> usize {
        self.inner.queue.capacity()
    }

    /// Frames waiting to be sent.
    pub fn pending(&self) -> usize {
        self.inner.queue.len()
    }

    pub fn sent_count(&self) -> u64 {
        self.inner.sent.load(Ordering::Relaxed)
    }

    pub fn failed_count(&self) -> u64 {
        self.inner.failed.load(Ordering::Relaxed)
    }

    /// Connect the socket (first start only), register the queue and socket
    /// with the dispatcher and make sure it is running.
    pub fn start(&self) -> Result<()> {
        let inner = &self.inner;
        let mut state = inner.lifecycle.lock();
        if state.disposed {
            return Err(BusError::Disposed("publisher"));
        }
        if state.started {
            return Ok(());
        }
        if !inner.socket.is_open() {
            inner.socket.connect(inner.bus_endpoint.incoming())?;
        }
        inner.dispatcher.connect(inner.queue.clone())?;
        inner.dispatcher.connect(inner.socket.clone())?;
        if let Err(e) = inner.dispatcher.start() {
            inner.disconnect();
            return Err(e.into());
        }
        state.started = true;
        inner.started.store(true, Ordering::Release);
        info!(endpoint = %inner.bus_endpoint.incoming(), "Publisher started");
        Ok(())
    }

    /// Unregister from the dispatcher. Queued frames are kept and sent after
    /// the next start.
    pub fn stop(&self) -> Result<()> {
        let inner = &self.inner;
        {
            let mut state = inner.lifecycle.lock();
            if !state.started {
                return Ok(());
            }
            inner.disconnect();
            state.started = false;
            inner.started.store(false, Ordering::Release);
        }
        inner.dispatcher.stop_if_idle();
        info!(
            endpoint = %inner.bus_endpoint.incoming(),
            sent = self.sent_count(),
            pending = self.pending(),
            "Publisher stopped"
        );
        Ok(())
    }
}

impl Inner {
    fn drain(&self) {
        for _ in 0..DRAIN_BATCH_SIZE {
            let Some(frame) = self.queue.try_pop() else {
                break;
            };
            match self.socket.send(frame) {
                Ok(()) => {
                    self.sent.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    self.failed.fetch_add(1, Ordering::Relaxed);
                    self.report(BusError::Socket(e));
                }
            }
        }
    }

    fn report(&self, error: BusError) {
        warn!(endpoint = %self.bus_endpoint.incoming(), error = %error, "Publish failed");
        self.errors.next(&Arc::new(error));
    }

    fn disconnect(&self) {
        self.dispatcher.disconnect(self.queue.as_ref());
        self.dispatcher.disconnect(self.socket.as_ref());
    }

    fn dispose(&self) {
        let was_started = {
            let mut state = self.lifecycle.lock();
            if state.disposed {
                return;
            }
            self.disconnect();
            self.socket.close();
            self.queue.clear();
            state.disposed = true;
            self.started.store(false, Ordering::Release);
            std::mem::take(&mut state.started)
        };
        if was_started {
            self.dispatcher.stop_if_idle();
        }
        self.errors.complete();
        debug!(endpoint = %self.bus_endpoint.incoming(), "Publisher disposed");
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl Observer<Frame> for BusPublisher {
    fn on_next(&self, frame: &Frame) {
        if let Err(e) = self.publish(frame.clone()) {
            self.inner.report(e);
        }
    }

    fn on_error(&self, error: SharedError) {
        warn!(endpoint = %self.inner.bus_endpoint.incoming(), error = %error, "Upstream error");
        self.inner.errors.next(&error);
    }

    fn on_completed(&self) {
        if let Err(e) = self.stop() {
            self.inner.report(e);
        }
    }
}

#[async_trait]
impl MessageBus for BusPublisher {
    fn name(&self) -> &str {
        &self.inner.name
    }

    async fn start_async(&self, cancel: CancellationToken) -> Result<()> {
        check_cancelled(&cancel)?;
        self.start()
    }

    async fn stop_async(&self, cancel: CancellationToken) -> Result<()> {
        check_cancelled(&cancel)?;
        self.stop()
    }

    fn dispose(&self) {
        self.inner.dispose();
    }
}
