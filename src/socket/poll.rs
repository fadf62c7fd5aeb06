//! Readiness plumbing between sockets and the dispatcher.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam::channel::Sender;
use parking_lot::{Mutex, RwLock};

static NEXT_POLL_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a pollable inside a dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PollId(u64);

impl PollId {
    pub fn next() -> Self {
        PollId(NEXT_POLL_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for PollId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Events consumed by a dispatcher's poll loop.
#[derive(Debug)]
pub(crate) enum LoopEvent {
    Ready(PollId),
    Stop,
}

/// Handle used by a pollable to announce it has work.
#[derive(Debug, Clone)]
pub struct ReadyWaker {
    events: Sender<LoopEvent>,
    id: PollId,
}

impl ReadyWaker {
    pub(crate) fn new(events: Sender<LoopEvent>, id: PollId) -> Self {
        Self { events, id }
    }

    /// Returns `false` once the poll loop is gone.
    pub fn wake(&self) -> bool {
        self.events.send(LoopEvent::Ready(self.id)).is_ok()
    }
}

/// Something the dispatcher can watch.
///
/// `attach` is called when the pollable joins a running loop, `detach` when
/// it leaves or the loop stops. `on_ready` always runs on the poll thread.
pub trait Pollable: Send + Sync {
    fn poll_id(&self) -> PollId;
    fn attach(&self, waker: ReadyWaker);
    fn detach(&self);
    fn on_ready(&self);
}

/// Callback run on the poll thread when a queue has items.
pub type ReadyHandler = Arc<dyn Fn() + Send + Sync>;

/// Multi-producer queue that signals readiness to a dispatcher.
///
/// At most one readiness event is outstanding at a time. If the handler
/// leaves items behind (bounded drain) the queue signals again, so it is
/// revisited after other pending pollables.
pub struct PollQueue<T> {
    id: PollId,
    capacity: usize,
    items: Mutex<VecDeque<T>>,
    waker: Mutex<Option<ReadyWaker>>,
    signalled: AtomicBool,
    handler: RwLock<Option<ReadyHandler>>,
}

impl<T: Send> PollQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            id: PollId::next(),
            capacity,
            items: Mutex::new(VecDeque::new()),
            waker: Mutex::new(None),
            signalled: AtomicBool::new(false),
            handler: RwLock::new(None),
        }
    }

    pub fn set_ready_handler(&self, handler: ReadyHandler) {
        *self.handler.write() = Some(handler);
    }

    /// Enqueue an item. Returns it back if the queue is at capacity.
    pub fn push(&self, item: T) -> Result<(), T> {
        {
            let mut items = self.items.lock();
            if items.len() >= self.capacity {
                return Err(item);
            }
            items.push_back(item);
        }
        self.notify();
        Ok(())
    }

    pub fn try_pop(&self) -> Option<T> {
        self.items.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&self) {
        self.items.lock().clear();
    }

    fn notify(&self) {
        if self.signalled.swap(true, Ordering::AcqRel) {
            return;
        }
        let delivered = match self.waker.lock().as_ref() {
            Some(waker) => waker.wake(),
            None => false,
        };
        if !delivered {
            self.signalled.store(false, Ordering::Release);
        }
    }
}

impl<T: Send> Pollable for PollQueue<T> {
    fn poll_id(&self) -> PollId {
        self.id
    }

    fn attach(&self, waker: ReadyWaker) {
        *self.waker.lock() = Some(waker);
        self.signalled.store(false, Ordering::Release);
        if !self.is_empty() {
            self.notify();
        }
    }

    fn detach(&self) {
        *self.waker.lock() = None;
        self.signalled.store(false, Ordering::Release);
    }

    fn on_ready(&self) {
        self.signalled.store(false, Ordering::Release);
        let handler = self.handler.read().clone();
        if let Some(handler) = handler {
            handler();
        }
        if !self.is_empty() {
            self.notify();
        }
    }
}
