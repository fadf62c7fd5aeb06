//! Push-based streams.
//!
//! Frames and decoded messages are delivered through [`Observer`]s
//! registered on an [`Observable`]. Subscribing returns a [`Subscription`]
//! that releases the registration when dropped.
//!
//! Notifications run synchronously on the thread that produced them (the
//! dispatcher's poll thread for bus traffic) unless a scheduler is
//! configured on the subscriber.

mod channel;
mod decoded;
mod message_stream;
mod multicast;
mod scheduled;
mod subject;

pub use channel::{observe_channel, ChannelObserver, Notification};
pub use decoded::{CommandStream, DecodedStream, EventStream, QueryStream, TypedStream};
pub use message_stream::MessageStream;
pub use scheduled::ScheduledObserver;
pub use subject::{ObserverSet, Subject};

use std::sync::Arc;

use crate::bus::BusError;

/// Error delivered on a stream's error channel.
pub type SharedError = Arc<BusError>;

/// Receiver of stream notifications.
pub trait Observer<T>: Send + Sync {
    fn on_next(&self, value: &T);

    fn on_error(&self, error: SharedError) {
        let _ = error;
    }

    fn on_completed(&self) {}
}

/// Source of stream notifications.
pub trait Observable<T>: Send + Sync {
    fn subscribe(&self, observer: Arc<dyn Observer<T>>) -> Subscription;
}

/// Registration handle. Dropping it unsubscribes.
#[must_use = "dropping a subscription unsubscribes immediately"]
pub struct Subscription {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// A subscription with nothing to release.
    pub fn empty() -> Self {
        Self { release: None }
    }

    pub fn unsubscribe(mut self) {
        self.release_now();
    }

    pub fn is_active(&self) -> bool {
        self.release.is_some()
    }

    fn release_now(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release_now();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

struct FnObserver<F> {
    on_next: F,
}

impl<T, F> Observer<T> for FnObserver<F>
where
    F: Fn(&T) + Send + Sync,
{
    fn on_next(&self, value: &T) {
        (self.on_next)(value)
    }
}

/// Observer that only handles values.
pub fn observer_fn<T, F>(on_next: F) -> Arc<dyn Observer<T>>
where
    T: 'static,
    F: Fn(&T) + Send + Sync + 'static,
{
    Arc::new(FnObserver { on_next })
}
