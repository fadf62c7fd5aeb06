//! Subscriber side of a relay.
//!
//! Exposes the frames arriving at a relay's outgoing address as an
//! [`Observable`]. The number of observers drives the lifecycle: the first
//! subscription starts the subscriber, removing the last one stops it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::{check_cancelled, BusError, LifecycleState, MessageBus, Result, DRAIN_BATCH_SIZE};
use crate::dispatcher::SocketDispatcher;
use crate::endpoint::DualEndpoint;
use crate::socket::{Frame, SocketContext, SubscriberSocket};
use crate::stream::{Observable, Observer, ObserverSet, ScheduledObserver, Subscription};

/// Frame stream from a relay's outgoing address.
#[derive(Clone)]
pub struct BusSubscriber {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    bus_endpoint: DualEndpoint,
    dispatcher: Arc<SocketDispatcher>,
    socket: Arc<SubscriberSocket>,
    observers: ObserverSet<Frame>,
    lifecycle: Mutex<LifecycleState>,
    scheduler: Option<Handle>,
    received: AtomicU64,
    malformed: AtomicU64,
}

impl BusSubscriber {
    pub fn new(
        bus_endpoint: DualEndpoint,
        dispatcher: Arc<SocketDispatcher>,
        context: &SocketContext,
    ) -> Self {
        Self::build(bus_endpoint, dispatcher, context, None)
    }

    /// Deliver notifications on `scheduler` instead of the poll thread.
    ///
    /// Each observer keeps its own ordered queue on the runtime.
    pub fn with_scheduler(
        bus_endpoint: DualEndpoint,
        dispatcher: Arc<SocketDispatcher>,
        context: &SocketContext,
        scheduler: Handle,
    ) -> Self {
        Self::build(bus_endpoint, dispatcher, context, Some(scheduler))
    }

    fn build(
        bus_endpoint: DualEndpoint,
        dispatcher: Arc<SocketDispatcher>,
        context: &SocketContext,
        scheduler: Option<Handle>,
    ) -> Self {
        let inner = Arc::new(Inner {
            name: format!("subscriber <- {}", bus_endpoint.outgoing()),
            bus_endpoint,
            dispatcher,
            socket: Arc::new(SubscriberSocket::new(context)),
            observers: ObserverSet::new(),
            lifecycle: Mutex::new(LifecycleState::default()),
            scheduler,
            received: AtomicU64::new(0),
            malformed: AtomicU64::new(0),
        });
        let weak: Weak<Inner> = Arc::downgrade(&inner);
        inner.socket.on_receive_ready(Arc::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.receive_batch();
            }
        }));
        Self { inner }
    }

    pub fn is_started(&self) -> bool {
        self.inner.lifecycle.lock().started
    }

    pub fn observer_count(&self) -> usize {
        self.inner.observers.len()
    }

    /// Well-formed frames delivered so far.
    pub fn received_count(&self) -> u64 {
        self.inner.received.load(Ordering::Relaxed)
    }

    /// Frames rejected for not having exactly two parts.
    pub fn malformed_count(&self) -> u64 {
        self.inner.malformed.load(Ordering::Relaxed)
    }

    pub fn start(&self) -> Result<()> {
        self.inner.start()
    }

    pub fn stop(&self) -> Result<()> {
        self.inner.stop()
    }
}

impl Inner {
    fn start(&self) -> Result<()> {
        let mut state = self.lifecycle.lock();
        self.start_locked(&mut state)
    }

    fn start_locked(&self, state: &mut LifecycleState) -> Result<()> {
        if state.disposed {
            return Err(BusError::Disposed("subscriber"));
        }
        if state.started {
            return Ok(());
        }
        if !self.socket.is_open() {
            self.socket.connect(self.bus_endpoint.outgoing())?;
        }
        self.dispatcher.connect(self.socket.clone())?;
        if let Err(e) = self.dispatcher.start() {
            self.dispatcher.disconnect(self.socket.as_ref());
            return Err(e.into());
        }
        state.started = true;
        info!(endpoint = %self.bus_endpoint.outgoing(), "Subscriber started");
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        let stopped = {
            let mut state = self.lifecycle.lock();
            self.stop_locked(&mut state)
        };
        if stopped {
            self.after_stop();
        }
        Ok(())
    }

    /// Returns whether the subscriber was running.
    fn stop_locked(&self, state: &mut LifecycleState) -> bool {
        if !state.started {
            return false;
        }
        self.dispatcher.disconnect(self.socket.as_ref());
        state.started = false;
        true
    }

    // Runs without the lifecycle lock: the dispatcher may join its thread.
    fn after_stop(&self) {
        self.dispatcher.stop_if_idle();
        info!(
            endpoint = %self.bus_endpoint.outgoing(),
            received = self.received.load(Ordering::Relaxed),
            "Subscriber stopped"
        );
    }

    /// Start if observers exist and the subscriber is stopped.
    ///
    /// The observer count is read under the lifecycle lock, so a concurrent
    /// removal of the last observer cannot stop the subscriber after this
    /// decision.
    fn on_subscribed(&self) -> Result<()> {
        let mut state = self.lifecycle.lock();
        if state.started || state.disposed || self.observers.is_empty() {
            return Ok(());
        }
        self.start_locked(&mut state)
    }

    /// Stop if the last observer has left.
    fn on_unsubscribed(&self) {
        let stopped = {
            let mut state = self.lifecycle.lock();
            self.observers.is_empty() && self.stop_locked(&mut state)
        };
        if stopped {
            self.after_stop();
        }
    }

    fn receive_batch(&self) {
        for _ in 0..DRAIN_BATCH_SIZE {
            let Some(frame) = self.socket.try_receive() else {
                break;
            };
            match frame.message_type() {
                Ok(_) => {
                    self.received.fetch_add(1, Ordering::Relaxed);
                    self.observers.emit_next(&frame);
                }
                Err(e) => {
                    self.malformed.fetch_add(1, Ordering::Relaxed);
                    debug!(parts = frame.part_count(), "Malformed frame received");
                    self.observers.emit_error(Arc::new(BusError::Protocol(e)));
                }
            }
        }
    }

    fn dispose(&self) {
        let was_started = {
            let mut state = self.lifecycle.lock();
            if state.disposed {
                return;
            }
            self.dispatcher.disconnect(self.socket.as_ref());
            self.socket.close();
            state.disposed = true;
            std::mem::take(&mut state.started)
        };
        if was_started {
            self.dispatcher.stop_if_idle();
        }
        self.observers.emit_completed();
        debug!(endpoint = %self.bus_endpoint.outgoing(), "Subscriber disposed");
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl Observable<Frame> for BusSubscriber {
    fn subscribe(&self, observer: Arc<dyn Observer<Frame>>) -> Subscription {
        let observer = match &self.inner.scheduler {
            Some(handle) => ScheduledObserver::spawn(handle, observer),
            None => observer,
        };
        let (id, _) = self.inner.observers.insert(observer.clone());
        if let Err(e) = self.inner.on_subscribed() {
            error!(endpoint = %self.inner.bus_endpoint.outgoing(), error = %e, "Failed to start subscriber");
            observer.on_error(Arc::new(e));
        }
        let weak = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.observers.remove(id);
                inner.on_unsubscribed();
            }
        })
    }
}

#[async_trait]
impl MessageBus for BusSubscriber {
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
