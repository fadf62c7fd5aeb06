use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use super::{Codec, Result, SerializationError};
use crate::message::{Message, MessageKind};

type DecodeFn = fn(Codec, &[u8]) -> Result<Arc<dyn Any + Send + Sync>>;

fn decode_erased<T: Message>(codec: Codec, bytes: &[u8]) -> Result<Arc<dyn Any + Send + Sync>> {
    let value: T = codec.deserialize(bytes)?;
    Ok(Arc::new(value))
}

#[derive(Clone, Copy)]
struct TypeEntry {
    type_id: TypeId,
    kind: MessageKind,
    decode: DecodeFn,
}

/// Registry of message types known to a serializer.
///
/// Registration is additive only: once a tag maps to a type it never
/// changes. Lookups take a shared lock; registration takes the write lock so
/// concurrent first-time registrations of the same type are serialized.
#[derive(Default)]
pub struct TypeRegistry {
    entries: RwLock<HashMap<String, TypeEntry>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `T` under its message type label.
    ///
    /// Returns `true` when the type was newly added.
    pub fn register<T: Message>(&self) -> Result<bool> {
        if let Some(existing) = self.entries.read().get(T::MESSAGE_TYPE) {
            return Self::check_same::<T>(existing).map(|_| false);
        }

        let mut entries = self.entries.write();
        if let Some(existing) = entries.get(T::MESSAGE_TYPE) {
            return Self::check_same::<T>(existing).map(|_| false);
        }
        entries.insert(
            T::MESSAGE_TYPE.to_string(),
            TypeEntry {
                type_id: TypeId::of::<T>(),
                kind: T::KIND,
                decode: decode_erased::<T>,
            },
        );
        debug!(message_type = T::MESSAGE_TYPE, kind = %T::KIND, "Registered message type");
        Ok(true)
    }

    fn check_same<T: Message>(entry: &TypeEntry) -> Result<()> {
        if entry.type_id == TypeId::of::<T>() {
            Ok(())
        } else {
            Err(SerializationError::DuplicateType(T::MESSAGE_TYPE.to_string()))
        }
    }

    pub fn contains(&self, message_type: &str) -> bool {
        self.entries.read().contains_key(message_type)
    }

    pub fn kind_of(&self, message_type: &str) -> Option<MessageKind> {
        self.entries.read().get(message_type).map(|e| e.kind)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Decode a message body whose concrete type is only known at runtime.
    pub(crate) fn decode(
        &self,
        codec: Codec,
        message_type: &str,
        payload: &[u8],
    ) -> Result<DecodedMessage> {
        let entry = self
            .entries
            .read()
            .get(message_type)
            .copied()
            .ok_or_else(|| SerializationError::UnknownType(message_type.to_string()))?;
        let value = (entry.decode)(codec, payload)?;
        Ok(DecodedMessage {
            message_type: message_type.to_string(),
            kind: entry.kind,
            value,
        })
    }
}

/// A message decoded without static knowledge of its type.
#[derive(Clone)]
pub struct DecodedMessage {
    message_type: String,
    kind: MessageKind,
    value: Arc<dyn Any + Send + Sync>,
}

impl DecodedMessage {
    pub fn message_type(&self) -> &str {
        &self.message_type
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn is<T: Message>(&self) -> bool {
        self.value.is::<T>()
    }

    /// Recover the concrete message, if it is a `T`.
    pub fn downcast<T: Message>(&self) -> Option<Arc<T>> {
        self.value.clone().downcast::<T>().ok()
    }
}

impl std::fmt::Debug for DecodedMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodedMessage")
            .field("message_type", &self.message_type)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}
