use std::sync::Arc;

use parking_lot::Mutex;

use super::{Observable, Observer, SharedError, Subscription};

/// Observer list with snapshot emission.
///
/// Notifications iterate a snapshot taken under the lock, so observers may
/// subscribe or unsubscribe from inside a callback.
pub struct ObserverSet<T> {
    inner: Mutex<Inner<T>>,
}

struct Inner<T> {
    next_id: u64,
    observers: Vec<(u64, Arc<dyn Observer<T>>)>,
}

impl<T> Default for ObserverSet<T> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_id: 0,
                observers: Vec::new(),
            }),
        }
    }
}

impl<T> ObserverSet<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an observer. Returns its key and whether it is the first.
    pub fn insert(&self, observer: Arc<dyn Observer<T>>) -> (u64, bool) {
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.observers.push((id, observer));
        (id, inner.observers.len() == 1)
    }

    /// Remove an observer. Returns `true` if the set became empty.
    pub fn remove(&self, id: u64) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.observers.len();
        inner.observers.retain(|(key, _)| *key != id);
        before != inner.observers.len() && inner.observers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().observers.is_empty()
    }

    fn snapshot(&self) -> Vec<Arc<dyn Observer<T>>> {
        self.inner
            .lock()
            .observers
            .iter()
            .map(|(_, o)| o.clone())
            .collect()
    }

    pub fn emit_next(&self, value: &T) {
        for observer in self.snapshot() {
            observer.on_next(value);
        }
    }

    pub fn emit_error(&self, error: SharedError) {
        for observer in self.snapshot() {
            observer.on_error(error.clone());
        }
    }

    pub fn emit_completed(&self) {
        for observer in self.snapshot() {
            observer.on_completed();
        }
    }
}

/// Hot multicast source.
pub struct Subject<T> {
    observers: Arc<ObserverSet<T>>,
}

impl<T> Default for Subject<T> {
    fn default() -> Self {
        Self {
            observers: Arc::new(ObserverSet::new()),
        }
    }
}

impl<T> Clone for Subject<T> {
    fn clone(&self) -> Self {
        Self {
            observers: self.observers.clone(),
        }
    }
}

impl<T: 'static> Subject<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    pub fn next(&self, value: &T) {
        self.observers.emit_next(value);
    }

    pub fn error(&self, error: SharedError) {
        self.observers.emit_error(error);
    }

    pub fn complete(&self) {
        self.observers.emit_completed();
    }
}

impl<T: 'static> Observable<T> for Subject<T> {
    fn subscribe(&self, observer: Arc<dyn Observer<T>>) -> Subscription {
        let (id, _) = self.observers.insert(observer);
        let observers = Arc::downgrade(&self.observers);
        Subscription::new(move || {
            if let Some(observers) = observers.upgrade() {
                observers.remove(id);
            }
        })
    }
}
