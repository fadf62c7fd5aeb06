use std::marker::PhantomData;
use std::sync::{Arc, Weak};

use tracing::warn;

use super::multicast::Multicast;
use super::{Observable, Observer, SharedError, Subscription};
use crate::bus::BusError;
use crate::message::Message;
use crate::serialization::MessageSerializer;
use crate::socket::Frame;

/// Typed view over a frame stream.
///
/// Keeps frames whose type label is `T::MESSAGE_TYPE`, decodes each one
/// once, and shares the decoded value with every observer. The upstream
/// frame subscription is opened by the first observer and closed when the
/// last one leaves.
pub struct MessageStream<T: Message> {
    source: Arc<dyn Observable<Frame>>,
    serializer: MessageSerializer,
    multicast: Arc<Multicast<Arc<T>>>,
}

impl<T: Message> Clone for MessageStream<T> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
            serializer: self.serializer.clone(),
            multicast: self.multicast.clone(),
        }
    }
}

impl<T: Message> MessageStream<T> {
    pub fn new(source: Arc<dyn Observable<Frame>>, serializer: MessageSerializer) -> Self {
        Self {
            source,
            serializer,
            multicast: Multicast::new(),
        }
    }

    /// Whether the upstream frame subscription is open.
    pub fn is_connected(&self) -> bool {
        self.multicast.is_connected()
    }

    pub fn observer_count(&self) -> usize {
        self.multicast.observers().len()
    }
}

impl<T: Message> Observable<Arc<T>> for MessageStream<T> {
    fn subscribe(&self, observer: Arc<dyn Observer<Arc<T>>>) -> Subscription {
        let decoder: Arc<dyn Observer<Frame>> = Arc::new(FrameDecoder::<T> {
            serializer: self.serializer.clone(),
            target: Arc::downgrade(&self.multicast),
            _message: PhantomData,
        });
        let source = self.source.clone();
        self.multicast
            .subscribe(observer, move || source.subscribe(decoder))
    }
}

struct FrameDecoder<T: Message> {
    serializer: MessageSerializer,
    target: Weak<Multicast<Arc<T>>>,
    _message: PhantomData<fn() -> T>,
}

impl<T: Message> Observer<Frame> for FrameDecoder<T> {
    fn on_next(&self, frame: &Frame) {
        let Some(target) = self.target.upgrade() else {
            return;
        };
        let body = match frame.message_type() {
            Ok(label) if label != T::MESSAGE_TYPE => return,
            Ok(_) => frame.serialized_message(),
            Err(e) => Err(e),
        };
        let decoded = body
            .map_err(BusError::from)
            .and_then(|body| self.serializer.decode::<T>(body).map_err(BusError::from));
        match decoded {
            Ok(message) => target.observers().emit_next(&Arc::new(message)),
            Err(e) => {
                warn!(message_type = T::MESSAGE_TYPE, error = %e, "Failed to decode frame");
                target.observers().emit_error(Arc::new(e));
            }
        }
    }

    fn on_error(&self, error: SharedError) {
        if let Some(target) = self.target.upgrade() {
            target.observers().emit_error(error);
        }
    }

    fn on_completed(&self) {
        if let Some(target) = self.target.upgrade() {
            target.observers().emit_completed();
        }
    }
}
