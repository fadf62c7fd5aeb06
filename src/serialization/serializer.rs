use std::io::{Read, Write};
use std::sync::Arc;

use bytes::Bytes;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use super::{Codec, DecodedMessage, MessageEnvelope, Result, SerializationError, TypeRegistry};
use crate::message::Message;
use crate::socket::Frame;

/// Upper bound on a decompressed envelope, same as the wire frame limit.
pub const MAX_DECOMPRESSED_SIZE: usize = crate::socket::frame::MAX_FRAME_SIZE;

/// Encodes messages into envelopes and back.
///
/// The registry is explicitly owned; serializers that must understand each
/// other's runtime-resolved types should share one via
/// [`MessageSerializer::with_registry`].
#[derive(Clone)]
pub struct MessageSerializer {
    codec: Codec,
    compress: bool,
    registry: Arc<TypeRegistry>,
}

impl Default for MessageSerializer {
    fn default() -> Self {
        Self::new(Codec::default())
    }
}

impl MessageSerializer {
    /// Create a serializer with its own empty registry.
    pub fn new(codec: Codec) -> Self {
        Self::with_registry(codec, Arc::new(TypeRegistry::new()))
    }

    pub fn with_registry(codec: Codec, registry: Arc<TypeRegistry>) -> Self {
        Self {
            codec,
            compress: false,
            registry,
        }
    }

    /// Gzip every encoded envelope (and expect gzip when decoding).
    pub fn compressed(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    pub fn is_compressed(&self) -> bool {
        self.compress
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    /// Register `T` so it can be resolved by [`decode_any`](Self::decode_any).
    pub fn register<T: Message>(&self) -> Result<bool> {
        self.registry.register::<T>()
    }

    /// Encode a message into envelope bytes.
    pub fn encode<T: Message>(&self, message: &T) -> Result<Bytes> {
        let envelope = self.envelope(message)?;
        if self.compress {
            gzip(&envelope).map(Bytes::from)
        } else {
            Ok(Bytes::from(envelope))
        }
    }

    /// Decode envelope bytes into a `T`.
    pub fn decode<T: Message>(&self, bytes: &[u8]) -> Result<T> {
        if self.compress {
            self.decode_envelope(&gunzip(bytes)?)
        } else {
            self.decode_envelope(bytes)
        }
    }

    /// Decode envelope bytes into whatever registered type they hold.
    pub fn decode_any(&self, bytes: &[u8]) -> Result<DecodedMessage> {
        let envelope: MessageEnvelope = if self.compress {
            self.codec.deserialize(&gunzip(bytes)?)?
        } else {
            self.codec.deserialize(bytes)?
        };
        self.registry
            .decode(self.codec, &envelope.message_type, &envelope.payload)
    }

    /// Encode and gzip a message regardless of the configured compression.
    pub fn encode_compressed<T: Message>(&self, message: &T) -> Result<Bytes> {
        gzip(&self.envelope(message)?).map(Bytes::from)
    }

    /// Inverse of [`encode_compressed`](Self::encode_compressed).
    pub fn decode_compressed<T: Message>(&self, bytes: &[u8]) -> Result<T> {
        self.decode_envelope(&gunzip(bytes)?)
    }

    /// Build the two-part wire frame `[type label, envelope]` for a message.
    pub fn to_frame<T: Message>(&self, message: &T) -> Result<Frame> {
        Ok(Frame::message(T::MESSAGE_TYPE, self.encode(message)?))
    }

    fn envelope<T: Message>(&self, message: &T) -> Result<Vec<u8>> {
        self.registry.register::<T>()?;
        let payload = self.codec.serialize(message)?;
        let envelope = MessageEnvelope::new(T::MESSAGE_TYPE, payload);
        self.codec.serialize(&envelope)
    }

    fn decode_envelope<T: Message>(&self, bytes: &[u8]) -> Result<T> {
        self.registry.register::<T>()?;
        let envelope: MessageEnvelope = self.codec.deserialize(bytes)?;
        if envelope.message_type != T::MESSAGE_TYPE {
            return Err(SerializationError::TypeMismatch {
                expected: T::MESSAGE_TYPE.to_string(),
                actual: envelope.message_type,
            });
        }
        self.codec.deserialize(&envelope.payload)
    }
}

fn gzip(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(bytes)
        .map_err(SerializationError::Compression)?;
    encoder.finish().map_err(SerializationError::Compression)
}

fn gunzip(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut decoded = Vec::new();
    GzDecoder::new(bytes)
        .take(MAX_DECOMPRESSED_SIZE as u64 + 1)
        .read_to_end(&mut decoded)
        .map_err(SerializationError::Compression)?;
    if decoded.len() > MAX_DECOMPRESSED_SIZE {
        return Err(SerializationError::DecompressedTooLarge(MAX_DECOMPRESSED_SIZE));
    }
    Ok(decoded)
}
