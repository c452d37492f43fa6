//! Serializer seam.
//!
//! The store applies one codec identically to object and metadata payloads.
//! Decode failures surface as [`Error::Decode`], never as silent absence.

use crate::error::{Error, Result};
use crate::value::Value;

/// Pluggable value serializer/deserializer.
///
/// Implementations must round-trip: `decode(encode(v)) == v` for every value
/// they accept.
pub trait ValueCodec: Send + Sync {
    /// Serialize a value to bytes.
    fn encode(&self, value: &Value) -> Result<Vec<u8>>;

    /// Deserialize bytes back into a value.
    fn decode(&self, bytes: &[u8]) -> Result<Value>;
}

/// Default codec: MessagePack via `rmp-serde`.
#[derive(Debug, Default, Clone, Copy)]
pub struct MsgpackCodec;

impl ValueCodec for MsgpackCodec {
    fn encode(&self, value: &Value) -> Result<Vec<u8>> {
        rmp_serde::to_vec(value).map_err(|e| Error::Encode(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value> {
        rmp_serde::from_slice(bytes).map_err(|e| Error::Decode(e.to_string()))
    }
}
