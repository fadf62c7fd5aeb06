//! Socket dispatcher.
//!
//! Multiplexes readiness of any number of [`Pollable`]s onto one dedicated
//! poll thread. Components register their sockets and queues with
//! [`connect`](SocketDispatcher::connect) and the dispatcher runs their
//! readiness handlers, one at a time, on the poll thread.
//!
//! Registration and loop lifecycle are independent: pollables may be added
//! or removed while the loop runs, and the loop may be stopped and started
//! again while the registrations are kept.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, info};

use crate::socket::poll::LoopEvent;
use crate::socket::{PollId, Pollable, ReadyWaker};

/// Result type for dispatcher operations.
pub type Result<T> = std::result::Result<T, DispatchError>;

/// Errors that can occur while operating a dispatcher.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Dispatcher '{0}' has been disposed")]
    Disposed(String),

    #[error("Failed to spawn poll thread: {0}")]
    Spawn(#[source] std::io::Error),
}

#[derive(Default)]
struct Registry {
    endpoints: HashMap<PollId, Arc<dyn Pollable>>,
    events: Option<Sender<LoopEvent>>,
    disposed: bool,
}

struct PollThread {
    events: Sender<LoopEvent>,
    stopped: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct Lifecycle {
    running: Option<PollThread>,
    /// Stopped loops that have not been joined yet.
    retired: Vec<JoinHandle<()>>,
}

/// Shared poll loop for a set of sockets.
///
/// Lock order is lifecycle before registry. The poll thread only takes the
/// registry lock, never while running a handler, and no lock is held while
/// joining a poll thread, so handlers may start or stop the dispatcher.
pub struct SocketDispatcher {
    id: String,
    registry: Arc<Mutex<Registry>>,
    lifecycle: Mutex<Lifecycle>,
    dispatching: AtomicBool,
}

impl Default for SocketDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl SocketDispatcher {
    pub fn new() -> Self {
        Self::with_id(format!("dispatcher-{}", uuid::Uuid::new_v4()))
    }

    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            registry: Arc::new(Mutex::new(Registry::default())),
            lifecycle: Mutex::new(Lifecycle::default()),
            dispatching: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_dispatching(&self) -> bool {
        self.dispatching.load(Ordering::Acquire)
    }

    pub fn endpoint_count(&self) -> usize {
        self.registry.lock().endpoints.len()
    }

    pub fn is_disposed(&self) -> bool {
        self.registry.lock().disposed
    }

    /// Register a pollable. Returns `false` if it was already registered.
    ///
    /// If the loop is running the pollable is attached immediately.
    pub fn connect(&self, pollable: Arc<dyn Pollable>) -> Result<bool> {
        let mut registry = self.registry.lock();
        if registry.disposed {
            return Err(DispatchError::Disposed(self.id.clone()));
        }
        let id = pollable.poll_id();
        if registry.endpoints.contains_key(&id) {
            return Ok(false);
        }
        if let Some(events) = &registry.events {
            pollable.attach(ReadyWaker::new(events.clone(), id));
        }
        registry.endpoints.insert(id, pollable);
        debug!(dispatcher = %self.id, poll_id = %id, "Endpoint connected");
        Ok(true)
    }

    /// Unregister a pollable. Returns `false` if it was not registered.
    pub fn disconnect(&self, pollable: &dyn Pollable) -> bool {
        let id = pollable.poll_id();
        let removed = self.registry.lock().endpoints.remove(&id);
        match removed {
            Some(pollable) => {
                pollable.detach();
                debug!(dispatcher = %self.id, poll_id = %id, "Endpoint disconnected");
                true
            }
            None => false,
        }
    }

    /// Start the poll loop. No-op if it is already running.
    pub fn start(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock();
        loop {
            if self.registry.lock().disposed {
                return Err(DispatchError::Disposed(self.id.clone()));
            }
            if lifecycle.running.is_some() {
                return Ok(());
            }
            let current = thread::current().id();
            let Some(pos) = lifecycle
                .retired
                .iter()
                .position(|h| h.thread().id() != current)
            else {
                break;
            };
            // wait for the previous loop to finish its last handler
            let retired = lifecycle.retired.swap_remove(pos);
            drop(lifecycle);
            let _ = retired.join();
            lifecycle = self.lifecycle.lock();
        }

        let (events, receiver) = unbounded();
        {
            let mut registry = self.registry.lock();
            for (id, pollable) in &registry.endpoints {
                pollable.attach(ReadyWaker::new(events.clone(), *id));
            }
            registry.events = Some(events.clone());
        }

        let registry = self.registry.clone();
        let stopped = Arc::new(AtomicBool::new(false));
        let loop_stopped = stopped.clone();
        let id = self.id.clone();
        let spawned = thread::Builder::new()
            .name(format!("{}-poll", self.id))
            .spawn(move || run_loop(&id, &registry, &loop_stopped, receiver));
        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                self.detach_all();
                error!(dispatcher = %self.id, error = %e, "Failed to start poll loop");
                return Err(DispatchError::Spawn(e));
            }
        };

        lifecycle.running = Some(PollThread {
            events,
            stopped,
            handle,
        });
        self.dispatching.store(true, Ordering::Release);
        info!(dispatcher = %self.id, endpoints = self.endpoint_count(), "Dispatcher started");
        Ok(())
    }

    /// Stop the poll loop, keeping registrations. No-op if not running.
    ///
    /// Blocks until the loop exits, unless called from the poll thread
    /// itself, in which case the loop exits after the current handler.
    pub fn stop(&self) {
        self.stop_when(|| true);
    }

    /// Stop the poll loop only if no endpoints are registered. The check and
    /// the stop are atomic with respect to [`start`](Self::start).
    pub fn stop_if_idle(&self) -> bool {
        self.stop_when(|| self.endpoint_count() == 0)
    }

    fn stop_when(&self, condition: impl FnOnce() -> bool) -> bool {
        let handle = {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.running.is_none() || !condition() {
                return false;
            }
            let Some(running) = lifecycle.running.take() else {
                return false;
            };
            self.detach_all();
            self.dispatching.store(false, Ordering::Release);
            running.stopped.store(true, Ordering::Release);
            let _ = running.events.send(LoopEvent::Stop);
            info!(dispatcher = %self.id, "Dispatcher stopped");

            if running.handle.thread().id() == thread::current().id() {
                lifecycle.retired.push(running.handle);
                return true;
            }
            running.handle
        };
        if handle.join().is_err() {
            error!(dispatcher = %self.id, "Poll thread panicked");
        }
        true
    }

    /// Stop the loop and drop every registration. Idempotent.
    pub fn dispose(&self) {
        self.stop();
        let endpoints = {
            let mut registry = self.registry.lock();
            if registry.disposed {
                return;
            }
            registry.disposed = true;
            std::mem::take(&mut registry.endpoints)
        };
        for pollable in endpoints.values() {
            pollable.detach();
        }
        debug!(dispatcher = %self.id, "Dispatcher disposed");
    }

    fn detach_all(&self) {
        let mut registry = self.registry.lock();
        registry.events = None;
        for pollable in registry.endpoints.values() {
            pollable.detach();
        }
    }
}

impl Drop for SocketDispatcher {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn run_loop(id: &str, registry: &Mutex<Registry>, stopped: &AtomicBool, events: Receiver<LoopEvent>) {
    debug!(dispatcher = %id, "Poll loop running");
    while let Ok(event) = events.recv() {
        if stopped.load(Ordering::Acquire) {
            break;
        }
        match event {
            LoopEvent::Ready(poll_id) => {
                let pollable = registry.lock().endpoints.get(&poll_id).cloned();
                if let Some(pollable) = pollable {
                    if catch_unwind(AssertUnwindSafe(|| pollable.on_ready())).is_err() {
                        error!(dispatcher = %id, poll_id = %poll_id, "Readiness handler panicked");
                    }
                }
            }
            LoopEvent::Stop => break,
        }
    }
    debug!(dispatcher = %id, "Poll loop exited");
}
