use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::mpsc;

use super::{Notification, Observer, SharedError};

/// Moves notifications for one observer onto a tokio runtime.
///
/// Each observer gets its own forwarding task, so notification order is
/// preserved per observer and a slow observer never blocks the poll thread.
pub struct ScheduledObserver<T> {
    tx: mpsc::UnboundedSender<Notification<T>>,
}

impl<T: Clone + Send + Sync + 'static> ScheduledObserver<T> {
    pub fn spawn(handle: &Handle, inner: Arc<dyn Observer<T>>) -> Arc<dyn Observer<T>> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Notification<T>>();
        handle.spawn(async move {
            while let Some(notification) = rx.recv().await {
                match notification {
                    Notification::Next(value) => inner.on_next(&value),
                    Notification::Error(error) => inner.on_error(error),
                    Notification::Completed => {
                        inner.on_completed();
                        break;
                    }
                }
            }
        });
        Arc::new(Self { tx })
    }
}

impl<T: Clone + Send + Sync + 'static> Observer<T> for ScheduledObserver<T> {
    fn on_next(&self, value: &T) {
        let _ = self.tx.send(Notification::Next(value.clone()));
    }

    fn on_error(&self, error: SharedError) {
        let _ = self.tx.send(Notification::Error(error));
    }

    fn on_completed(&self) {
        let _ = self.tx.send(Notification::Completed);
    }
}
