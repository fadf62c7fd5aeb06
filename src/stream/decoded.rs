use std::marker::PhantomData;
use std::sync::{Arc, Weak};

use tracing::{trace, warn};

use super::multicast::Multicast;
use super::{Observable, Observer, SharedError, Subscription};
use crate::bus::BusError;
use crate::message::{Command, Event, Message, MessageKind, Query};
use crate::serialization::{DecodedMessage, MessageSerializer, SerializationError};
use crate::socket::Frame;

/// Unfiltered decoding view over a frame stream.
///
/// Every frame whose type label is registered with the serializer is
/// decoded once and shared with all observers as a [`DecodedMessage`].
/// Frames with unregistered labels are skipped.
#[derive(Clone)]
pub struct DecodedStream {
    source: Arc<dyn Observable<Frame>>,
    serializer: MessageSerializer,
    kind: Option<MessageKind>,
    multicast: Arc<Multicast<DecodedMessage>>,
}

impl DecodedStream {
    pub fn new(source: Arc<dyn Observable<Frame>>, serializer: MessageSerializer) -> Self {
        Self {
            source,
            serializer,
            kind: None,
            multicast: Multicast::new(),
        }
    }

    /// Restrict the stream to one message category.
    pub fn of_kind(
        source: Arc<dyn Observable<Frame>>,
        serializer: MessageSerializer,
        kind: MessageKind,
    ) -> Self {
        Self {
            kind: Some(kind),
            ..Self::new(source, serializer)
        }
    }

    pub fn commands(source: Arc<dyn Observable<Frame>>, serializer: MessageSerializer) -> Self {
        Self::of_kind(source, serializer, MessageKind::Command)
    }

    pub fn events(source: Arc<dyn Observable<Frame>>, serializer: MessageSerializer) -> Self {
        Self::of_kind(source, serializer, MessageKind::Event)
    }

    pub fn queries(source: Arc<dyn Observable<Frame>>, serializer: MessageSerializer) -> Self {
        Self::of_kind(source, serializer, MessageKind::Query)
    }

    pub fn kind(&self) -> Option<MessageKind> {
        self.kind
    }

    pub fn serializer(&self) -> &MessageSerializer {
        &self.serializer
    }

    pub fn is_connected(&self) -> bool {
        self.multicast.is_connected()
    }
}

impl Observable<DecodedMessage> for DecodedStream {
    fn subscribe(&self, observer: Arc<dyn Observer<DecodedMessage>>) -> Subscription {
        let decoder: Arc<dyn Observer<Frame>> = Arc::new(AnyDecoder {
            serializer: self.serializer.clone(),
            kind: self.kind,
            target: Arc::downgrade(&self.multicast),
        });
        let source = self.source.clone();
        self.multicast
            .subscribe(observer, move || source.subscribe(decoder))
    }
}

struct AnyDecoder {
    serializer: MessageSerializer,
    kind: Option<MessageKind>,
    target: Weak<Multicast<DecodedMessage>>,
}

impl AnyDecoder {
    fn decode(&self, frame: &Frame) -> Result<Option<DecodedMessage>, BusError> {
        let label = frame.message_type()?;
        let registry = self.serializer.registry();
        let Some(kind) = registry.kind_of(label) else {
            trace!(message_type = label, "Skipping unregistered message type");
            return Ok(None);
        };
        if self.kind.is_some_and(|wanted| wanted != kind) {
            return Ok(None);
        }
        let decoded = self.serializer.decode_any(frame.serialized_message()?)?;
        if decoded.message_type() != label {
            return Err(SerializationError::TypeMismatch {
                expected: label.to_string(),
                actual: decoded.message_type().to_string(),
            }
            .into());
        }
        Ok(Some(decoded))
    }
}

impl Observer<Frame> for AnyDecoder {
    fn on_next(&self, frame: &Frame) {
        let Some(target) = self.target.upgrade() else {
            return;
        };
        match self.decode(frame) {
            Ok(Some(message)) => target.observers().emit_next(&message),
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "Failed to decode frame");
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

/// Type-filtering view over a [`DecodedStream`].
///
/// Values that are not a `T` are dropped silently.
pub struct TypedStream<T: Message> {
    source: Arc<dyn Observable<DecodedMessage>>,
    _message: PhantomData<fn() -> T>,
}

/// Stream of one command type.
pub type CommandStream<T> = TypedStream<T>;
/// Stream of one event type.
pub type EventStream<T> = TypedStream<T>;
/// Stream of one query type.
pub type QueryStream<T> = TypedStream<T>;

impl<T: Message> Clone for TypedStream<T> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
            _message: PhantomData,
        }
    }
}

impl<T: Message> TypedStream<T> {
    /// Filter `decoded` down to `T`, registering `T` so its frames decode.
    pub fn new(decoded: &DecodedStream) -> Result<Self, SerializationError> {
        decoded.serializer().register::<T>()?;
        Ok(Self {
            source: Arc::new(decoded.clone()),
            _message: PhantomData,
        })
    }
}

impl<T: Command> TypedStream<T> {
    pub fn commands(
        frames: Arc<dyn Observable<Frame>>,
        serializer: MessageSerializer,
    ) -> Result<Self, SerializationError> {
        Self::new(&DecodedStream::commands(frames, serializer))
    }
}

impl<T: Event> TypedStream<T> {
    pub fn events(
        frames: Arc<dyn Observable<Frame>>,
        serializer: MessageSerializer,
    ) -> Result<Self, SerializationError> {
        Self::new(&DecodedStream::events(frames, serializer))
    }
}

impl<T: Query> TypedStream<T> {
    pub fn queries(
        frames: Arc<dyn Observable<Frame>>,
        serializer: MessageSerializer,
    ) -> Result<Self, SerializationError> {
        Self::new(&DecodedStream::queries(frames, serializer))
    }
}

impl<T: Message> Observable<Arc<T>> for TypedStream<T> {
    fn subscribe(&self, observer: Arc<dyn Observer<Arc<T>>>) -> Subscription {
        self.source.subscribe(Arc::new(Downcast { inner: observer }))
    }
}

struct Downcast<T> {
    inner: Arc<dyn Observer<Arc<T>>>,
}

impl<T: Message> Observer<DecodedMessage> for Downcast<T> {
    fn on_next(&self, message: &DecodedMessage) {
        if let Some(value) = message.downcast::<T>() {
            self.inner.on_next(&value);
        }
    }

    fn on_error(&self, error: SharedError) {
        self.inner.on_error(error);
    }

    fn on_completed(&self) {
        self.inner.on_completed();
    }
}
