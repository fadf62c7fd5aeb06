//! Typed publishing.
//!
//! [`MessageSink`] turns application messages into frames and hands them to
//! a [`BusPublisher`].

use tracing::trace;

use crate::bus::{BusPublisher, Result};
use crate::message::{Command, Event, Message, Query};
use crate::serialization::MessageSerializer;

/// Publishes typed messages through a relay.
#[derive(Clone)]
pub struct MessageSink {
    publisher: BusPublisher,
    serializer: MessageSerializer,
}

impl MessageSink {
    pub fn new(publisher: BusPublisher, serializer: MessageSerializer) -> Self {
        Self {
            publisher,
            serializer,
        }
    }

    pub fn publisher(&self) -> &BusPublisher {
        &self.publisher
    }

    pub fn serializer(&self) -> &MessageSerializer {
        &self.serializer
    }

    /// Serialize `message` and enqueue it on the publisher.
    pub fn publish<T: Message>(&self, message: &T) -> Result<()> {
        let frame = self.serializer.to_frame(message)?;
        trace!(message_type = T::MESSAGE_TYPE, bytes = frame.byte_len(), "Publishing message");
        self.publisher.publish(frame)
    }

    pub fn publish_command<T: Command>(&self, command: &T) -> Result<()> {
        self.publish(command)
    }

    pub fn publish_event<T: Event>(&self, event: &T) -> Result<()> {
        self.publish(event)
    }

    pub fn publish_query<T: Query>(&self, query: &T) -> Result<()> {
        self.publish(query)
    }
}
