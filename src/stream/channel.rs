use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{Observable, Observer, SharedError, Subscription};

/// One stream notification.
#[derive(Debug, Clone)]
pub enum Notification<T> {
    Next(T),
    Error(SharedError),
    Completed,
}

impl<T> Notification<T> {
    pub fn into_value(self) -> Option<T> {
        match self {
            Notification::Next(value) => Some(value),
            _ => None,
        }
    }
}

/// Observer forwarding notifications into an unbounded tokio channel.
///
/// The sender is dropped on completion, so the receiver ends after the
/// `Completed` notification.
pub struct ChannelObserver<T> {
    tx: Mutex<Option<mpsc::UnboundedSender<Notification<T>>>>,
}

impl<T> ChannelObserver<T> {
    pub fn new(tx: mpsc::UnboundedSender<Notification<T>>) -> Self {
        Self {
            tx: Mutex::new(Some(tx)),
        }
    }

    fn send(&self, notification: Notification<T>) {
        if let Some(tx) = self.tx.lock().as_ref() {
            let _ = tx.send(notification);
        }
    }
}

impl<T: Clone + Send> Observer<T> for ChannelObserver<T> {
    fn on_next(&self, value: &T) {
        self.send(Notification::Next(value.clone()));
    }

    fn on_error(&self, error: SharedError) {
        self.send(Notification::Error(error));
    }

    fn on_completed(&self) {
        if let Some(tx) = self.tx.lock().take() {
            let _ = tx.send(Notification::Completed);
        }
    }
}

/// Subscribe to `source` and receive its notifications on a channel.
pub fn observe_channel<T, O>(source: &O) -> (Subscription, mpsc::UnboundedReceiver<Notification<T>>)
where
    T: Clone + Send + 'static,
    O: Observable<T> + ?Sized,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let subscription = source.subscribe(Arc::new(ChannelObserver::new(tx)));
    (subscription, rx)
}
