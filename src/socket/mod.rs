//! Publish/subscribe sockets.
//!
//! A [`PublisherSocket`] fans every frame out to all connected subscribers;
//! a [`SubscriberSocket`] collects frames from all publishers it is
//! connected to into an inbox the dispatcher polls. Sockets are allocated
//! eagerly and opened explicitly with `bind` / `connect`.
//!
//! Delivery is best effort: frames are dropped for peers whose queues are at
//! the high-water mark, and a bound publisher drops frames until a
//! subscriber has joined.

mod context;
pub mod frame;
pub mod poll;
mod publisher;
mod subscriber;
mod transport;

pub use context::SocketContext;
pub use frame::{Frame, FrameError};
pub use poll::{PollId, PollQueue, Pollable, ReadyHandler, ReadyWaker};
pub use publisher::PublisherSocket;
pub use subscriber::SubscriberSocket;

use std::io;

/// Default per-peer queue limit, in frames.
pub const DEFAULT_HIGH_WATER_MARK: usize = 1000;

/// Errors raised by socket operations.
#[derive(Debug, thiserror::Error)]
pub enum SocketError {
    #[error("Address already in use: {0}")]
    AddressInUse(String),

    #[error("I/O error on {endpoint}: {source}")]
    Io {
        endpoint: String,
        #[source]
        source: io::Error,
    },

    #[error("Socket is neither bound nor connected")]
    NotOpen,

    #[error("Socket is closed")]
    Closed,
}

impl SocketError {
    fn io(endpoint: &impl std::fmt::Display, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::AddrInUse {
            SocketError::AddressInUse(endpoint.to_string())
        } else {
            SocketError::Io {
                endpoint: endpoint.to_string(),
                source,
            }
        }
    }
}
