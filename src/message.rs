//! Application message model.
//!
//! Every type that travels over the bus implements [`Message`]. The
//! `MESSAGE_TYPE` label is written into the first frame part and into the
//! serialization envelope, so it must be stable across processes.

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Category of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Command,
    Event,
    Query,
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageKind::Command => write!(f, "command"),
            MessageKind::Event => write!(f, "event"),
            MessageKind::Query => write!(f, "query"),
        }
    }
}

/// A value that can be published on the bus.
pub trait Message: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Stable type label used on the wire.
    const MESSAGE_TYPE: &'static str;
    /// Category of this message.
    const KIND: MessageKind;
}

/// Marker for messages that request a state change.
pub trait Command: Message {}

/// Marker for messages that record something that happened.
pub trait Event: Message {}

/// Marker for messages that ask for data.
pub trait Query: Message {}

/// Declare a message type.
///
/// The label defaults to the bare type name.
///
/// ```
/// use relaybus::impl_message;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Serialize, Deserialize)]
/// struct OrderPlaced {
///     id: u64,
/// }
///
/// impl_message!(OrderPlaced, Event);
/// ```
#[macro_export]
macro_rules! impl_message {
    ($ty:ident, $kind:ident) => {
        $crate::impl_message!($ty, $kind, stringify!($ty));
    };
    ($ty:ident, $kind:ident, $label:expr) => {
        impl $crate::message::Message for $ty {
            const MESSAGE_TYPE: &'static str = $label;
            const KIND: $crate::message::MessageKind = $crate::message::MessageKind::$kind;
        }
        impl $crate::message::$kind for $ty {}
    };
}
