//! relaybus - socket-based publish/subscribe relay.
//!
//! A standalone relay (`DualSocketBus`) listens on an incoming address and
//! re-broadcasts every frame on an outgoing address. Publishers push frames
//! into the incoming side, subscribers receive from the outgoing side, and
//! typed streams decode the frames back into application messages.
//!
//! All socket I/O for a process is multiplexed by a shared
//! [`SocketDispatcher`](dispatcher::SocketDispatcher) running a single poll
//! thread.

pub mod bus;
pub mod config;
pub mod dispatcher;
pub mod endpoint;
pub mod hosting;
pub mod message;
pub mod serialization;
pub mod sink;
pub mod socket;
pub mod stream;
pub mod utils;

pub use bus::{
    BusError, BusPublisher, BusSubscriber, DualSocketBus, MessageBus, Result, DRAIN_BATCH_SIZE,
};
pub use dispatcher::SocketDispatcher;
pub use endpoint::{DualEndpoint, Port, Protocol, SocketEndpoint};
pub use hosting::MessageBusService;
pub use message::{Command, Event, Message, MessageKind, Query};
pub use serialization::{Codec, DecodedMessage, MessageSerializer, TypeRegistry};
pub use sink::MessageSink;
pub use socket::{Frame, SocketContext};
pub use stream::{
    observe_channel, observer_fn, DecodedStream, MessageStream, Observable, Observer, SharedError,
    Subject, Subscription, TypedStream,
};
