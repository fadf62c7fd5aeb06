//! In-process address space.
//!
//! `inproc://` endpoints only exist inside one [`SocketContext`]. Contexts
//! are cheap to clone; clones share the same address space. A subscriber
//! may connect before anything binds the address.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::poll::{PollId, PollQueue};
use super::{Frame, SocketError};

#[derive(Clone, Default)]
pub struct SocketContext {
    hubs: Arc<Mutex<HashMap<String, Arc<InprocHub>>>>,
}

impl SocketContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn hub(&self, identity: &str) -> Arc<InprocHub> {
        self.hubs
            .lock()
            .entry(identity.to_string())
            .or_insert_with(|| Arc::new(InprocHub::default()))
            .clone()
    }

    /// Number of in-process addresses currently known.
    pub fn address_count(&self) -> usize {
        self.hubs.lock().len()
    }
}

/// Fan-out point behind one in-process address.
#[derive(Default)]
pub(crate) struct InprocHub {
    state: Mutex<HubState>,
}

#[derive(Default)]
struct HubState {
    bound: bool,
    readers: Vec<(PollId, Arc<PollQueue<Frame>>)>,
}

impl InprocHub {
    pub fn claim(&self, identity: &str) -> Result<(), SocketError> {
        let mut state = self.state.lock();
        if state.bound {
            return Err(SocketError::AddressInUse(format!("inproc://{}", identity)));
        }
        state.bound = true;
        Ok(())
    }

    pub fn release(&self) {
        self.state.lock().bound = false;
    }

    pub fn add_reader(&self, id: PollId, inbox: Arc<PollQueue<Frame>>) {
        self.state.lock().readers.push((id, inbox));
    }

    pub fn remove_reader(&self, id: PollId) {
        self.state.lock().readers.retain(|(reader, _)| *reader != id);
    }

    /// Deliver a frame to every reader. Full inboxes drop the frame.
    pub fn deliver(&self, frame: &Frame) -> usize {
        let readers: Vec<_> = self
            .state
            .lock()
            .readers
            .iter()
            .map(|(_, inbox)| inbox.clone())
            .collect();
        readers
            .into_iter()
            .filter(|inbox| inbox.push(frame.clone()).is_ok())
            .count()
    }
}
