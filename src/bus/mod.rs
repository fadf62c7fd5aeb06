//! Relay bus components.
//!
//! This module contains:
//! - `DualSocketBus`: standalone relay from an incoming to an outgoing address
//! - `BusPublisher`: pushes frames into a relay's incoming address
//! - `BusSubscriber`: observable frame stream from a relay's outgoing address
//! - `MessageBus` trait: lifecycle surface consumed by hosting
//!
//! All three share a [`SocketDispatcher`](crate::dispatcher::SocketDispatcher)
//! and drive their sockets from its poll thread.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::dispatcher::DispatchError;
use crate::endpoint::EndpointError;
use crate::serialization::SerializationError;
use crate::socket::{FrameError, SocketError};

mod publisher;
mod relay;
mod subscriber;

pub use publisher::{BusPublisher, DEFAULT_QUEUE_CAPACITY};
pub use relay::DualSocketBus;
pub use subscriber::BusSubscriber;

/// Most frames a readiness handler processes before yielding the poll
/// thread to other sockets.
pub const DRAIN_BATCH_SIZE: usize = 100;

// ============================================================================
// Errors
// ============================================================================

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors that can occur during bus operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Endpoint error: {0}")]
    Endpoint(#[from] EndpointError),

    #[error("Socket error: {0}")]
    Socket(#[from] SocketError),

    #[error("Dispatcher error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] FrameError),

    #[error("{0} has been disposed")]
    Disposed(&'static str),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Outbound queue full ({0} frames)")]
    QueueFull(usize),
}

// ============================================================================
// Lifecycle
// ============================================================================

/// Lifecycle surface of a bus component.
///
/// Start and stop are idempotent and complete fully or not at all; a
/// cancelled token is honoured before any work is done.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Human-readable component name for logs.
    fn name(&self) -> &str;

    async fn start_async(&self, cancel: CancellationToken) -> Result<()>;

    async fn stop_async(&self, cancel: CancellationToken) -> Result<()>;

    /// Release sockets and registrations. Idempotent; the component cannot
    /// be started again afterwards.
    fn dispose(&self);
}

pub(crate) fn check_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(BusError::Cancelled)
    } else {
        Ok(())
    }
}

/// Lifecycle flags shared by the bus components, guarded by their
/// lifecycle lock.
#[derive(Debug, Default)]
pub(crate) struct LifecycleState {
    /// Endpoints are registered with the dispatcher.
    pub started: bool,
    pub disposed: bool,
}

#[cfg(test)]
mod tests;
