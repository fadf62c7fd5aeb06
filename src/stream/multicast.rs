use std::sync::Arc;

use parking_lot::Mutex;

use super::{Observer, ObserverSet, Subscription};

/// Shared downstream side of a published pipeline.
///
/// The upstream subscription exists exactly while at least one observer is
/// registered: the first subscriber connects it, the last one to leave
/// releases it. Both decisions are made under the upstream lock against the
/// current observer count, so racing subscribe/unsubscribe calls settle on
/// the right state.
pub(crate) struct Multicast<T> {
    observers: ObserverSet<T>,
    upstream: Mutex<Option<Subscription>>,
}

impl<T: 'static> Multicast<T> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            observers: ObserverSet::new(),
            upstream: Mutex::new(None),
        })
    }

    pub fn observers(&self) -> &ObserverSet<T> {
        &self.observers
    }

    pub fn is_connected(&self) -> bool {
        self.upstream.lock().is_some()
    }

    pub fn subscribe(
        self: &Arc<Self>,
        observer: Arc<dyn Observer<T>>,
        connect: impl FnOnce() -> Subscription,
    ) -> Subscription {
        let (id, _) = self.observers.insert(observer);
        {
            let mut upstream = self.upstream.lock();
            if upstream.is_none() && !self.observers.is_empty() {
                *upstream = Some(connect());
            }
        }
        let weak = Arc::downgrade(self);
        Subscription::new(move || {
            if let Some(this) = weak.upgrade() {
                this.observers.remove(id);
                this.release_if_idle();
            }
        })
    }

    fn release_if_idle(&self) {
        let released = {
            let mut upstream = self.upstream.lock();
            if self.observers.is_empty() {
                upstream.take()
            } else {
                None
            }
        };
        // dropped outside the lock; releasing may stop the source
        drop(released);
    }
}
