use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Wire wrapper around a serialized message body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    /// Type tag of the wrapped message.
    pub message_type: String,
    /// Codec-serialized message body.
    pub payload: Bytes,
}

impl MessageEnvelope {
    pub fn new(message_type: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            message_type: message_type.into(),
            payload: payload.into(),
        }
    }
}
