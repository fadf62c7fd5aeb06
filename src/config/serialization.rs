//! Serialization configuration.

use serde::Deserialize;

use crate::serialization::Codec;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SerializationConfig {
    /// `json` or `bincode`. Both sides of a relay must agree.
    pub codec: Codec,
    /// Gzip envelopes.
    pub compression: bool,
}
