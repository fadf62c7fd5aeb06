//! Envelope protocol.
//!
//! A message is wrapped in a [`MessageEnvelope`] carrying its type tag and
//! its codec-serialized body; the envelope itself is then serialized with
//! the same codec and optionally gzip-compressed. Decoding reverses the
//! steps and resolves the concrete type either statically (`decode::<T>`)
//! or through the [`TypeRegistry`] (`decode_any`).

mod envelope;
mod registry;
mod serializer;

pub use envelope::MessageEnvelope;
pub use registry::{DecodedMessage, TypeRegistry};
pub use serializer::{MessageSerializer, MAX_DECOMPRESSED_SIZE};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Result type for serialization operations.
pub type Result<T> = std::result::Result<T, SerializationError>;

/// Errors that can occur while encoding or decoding messages.
#[derive(Debug, thiserror::Error)]
pub enum SerializationError {
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Bincode codec error: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("Compression error: {0}")]
    Compression(#[source] std::io::Error),

    #[error("Decompressed envelope exceeds {0} bytes")]
    DecompressedTooLarge(usize),

    #[error("Type mismatch: expected '{expected}', envelope holds '{actual}'")]
    TypeMismatch { expected: String, actual: String },

    #[error("Unknown message type '{0}'")]
    UnknownType(String),

    #[error("Message type '{0}' is already registered for a different Rust type")]
    DuplicateType(String),
}

/// Serialization codec.
///
/// Both sides of a bus must agree on the codec.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    /// Self-describing JSON.
    #[default]
    Json,
    /// Compact binary encoding.
    Bincode,
}

impl Codec {
    pub fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        match self {
            Codec::Json => Ok(serde_json::to_vec(value)?),
            Codec::Bincode => Ok(bincode::serialize(value)?),
        }
    }

    pub fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        match self {
            Codec::Json => Ok(serde_json::from_slice(bytes)?),
            Codec::Bincode => Ok(bincode::deserialize(bytes)?),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Codec::Json => "json",
            Codec::Bincode => "bincode",
        }
    }
}
