//! Standalone relay.
//!
//! Binds a subscriber socket on the incoming address and a publisher socket
//! on the outgoing address, and forwards every frame verbatim from one to
//! the other on the dispatcher's poll thread.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{check_cancelled, BusError, LifecycleState, MessageBus, Result, DRAIN_BATCH_SIZE};
use crate::dispatcher::SocketDispatcher;
use crate::endpoint::DualEndpoint;
use crate::socket::{PublisherSocket, SocketContext, SubscriberSocket};

/// Frame relay between the two addresses of a [`DualEndpoint`].
#[derive(Clone)]
pub struct DualSocketBus {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    endpoint: DualEndpoint,
    dispatcher: Arc<SocketDispatcher>,
    incoming: Arc<SubscriberSocket>,
    outgoing: Arc<PublisherSocket>,
    lifecycle: Mutex<LifecycleState>,
    relayed: AtomicU64,
}

impl DualSocketBus {
    pub fn new(
        endpoint: DualEndpoint,
        dispatcher: Arc<SocketDispatcher>,
        context: &SocketContext,
    ) -> Self {
        let inner = Arc::new(Inner {
            name: format!("relay {}", endpoint),
            incoming: Arc::new(SubscriberSocket::new(context)),
            outgoing: Arc::new(PublisherSocket::new(context)),
            endpoint,
            dispatcher,
            lifecycle: Mutex::new(LifecycleState::default()),
            relayed: AtomicU64::new(0),
        });
        let weak: Weak<Inner> = Arc::downgrade(&inner);
        inner.incoming.on_receive_ready(Arc::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.relay_batch();
            }
        }));
        Self { inner }
    }

    pub fn endpoint(&self) -> &DualEndpoint {
        &self.inner.endpoint
    }

    pub fn dispatcher(&self) -> &Arc<SocketDispatcher> {
        &self.inner.dispatcher
    }

    pub fn is_started(&self) -> bool {
        self.inner.lifecycle.lock().started
    }

    /// Frames forwarded so far.
    pub fn relayed_count(&self) -> u64 {
        self.inner.relayed.load(Ordering::Relaxed)
    }

    /// Bind both sockets (first start only), register them with the
    /// dispatcher and make sure it is running.
    pub fn start(&self) -> Result<()> {
        let inner = &self.inner;
        let mut state = inner.lifecycle.lock();
        if state.disposed {
            return Err(BusError::Disposed("relay"));
        }
        if state.started {
            return Ok(());
        }
        // a failed bind leaves the other socket open for the next attempt
        if !inner.incoming.is_open() {
            inner.incoming.bind(inner.endpoint.incoming())?;
        }
        if !inner.outgoing.is_open() {
            inner.outgoing.bind(inner.endpoint.outgoing())?;
        }
        inner.dispatcher.connect(inner.incoming.clone())?;
        inner.dispatcher.connect(inner.outgoing.clone())?;
        if let Err(e) = inner.dispatcher.start() {
            inner.disconnect();
            return Err(e.into());
        }
        state.started = true;
        info!(endpoint = %inner.endpoint, dispatcher = inner.dispatcher.id(), "Relay started");
        Ok(())
    }

    /// Unregister both sockets; stops the dispatcher if nothing else uses it.
    pub fn stop(&self) -> Result<()> {
        let inner = &self.inner;
        {
            let mut state = inner.lifecycle.lock();
            if !state.started {
                return Ok(());
            }
            inner.disconnect();
            state.started = false;
        }
        // outside the lifecycle lock: stopping joins the poll thread
        inner.dispatcher.stop_if_idle();
        info!(endpoint = %inner.endpoint, relayed = self.relayed_count(), "Relay stopped");
        Ok(())
    }
}

impl Inner {
    fn relay_batch(&self) {
        for _ in 0..DRAIN_BATCH_SIZE {
            let Some(frame) = self.incoming.try_receive() else {
                break;
            };
            match self.outgoing.send(frame) {
                Ok(()) => {
                    self.relayed.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => warn!(endpoint = %self.endpoint, error = %e, "Relay send failed"),
            }
        }
    }

    fn disconnect(&self) {
        self.dispatcher.disconnect(self.incoming.as_ref());
        self.dispatcher.disconnect(self.outgoing.as_ref());
    }

    fn dispose(&self) {
        let was_started = {
            let mut state = self.lifecycle.lock();
            if state.disposed {
                return;
            }
            self.disconnect();
            self.incoming.close();
            self.outgoing.close();
            state.disposed = true;
            std::mem::take(&mut state.started)
        };
        if was_started {
            self.dispatcher.stop_if_idle();
        }
        debug!(endpoint = %self.endpoint, "Relay disposed");
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[async_trait]
impl MessageBus for DualSocketBus {
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
