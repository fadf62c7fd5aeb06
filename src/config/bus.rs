//! Relay, dispatcher and publisher configuration types.

use serde::Deserialize;

use crate::bus::DEFAULT_QUEUE_CAPACITY;

/// Relay address pair, in `tcp://`, `inproc://` or `pgm://` form.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Address publishers send to.
    pub incoming: String,
    /// Address subscribers read from.
    pub outgoing: String,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            incoming: "tcp://127.0.0.1:5555".to_string(),
            outgoing: "tcp://127.0.0.1:5556".to_string(),
        }
    }
}

/// Dispatcher configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Poll thread name prefix. Generated when unset.
    pub id: Option<String>,
}

/// Publisher configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    /// Outbound queue limit, in frames.
    pub queue_capacity: usize,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}
