use serde::{Deserialize, Serialize};

use crate::{NodeId, TransportError};

/// Wire message shared by both link kinds.
///
/// ```json
/// {"type": 1, "sender": 0, "data": {"message": "hello world"}}
/// ```
///
/// `type` stays a raw integer here; mapping it onto known message kinds
/// is the dispatcher's job, so an unknown kind still decodes and can be
/// reported instead of being rejected at the frame level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Message type id.
    #[serde(rename = "type")]
    pub msg_type: u16,

    /// Node that built the message.
    pub sender: NodeId,

    /// Type-specific payload.
    #[serde(default)]
    pub data: serde_json::Value,
}

impl Envelope {
    pub fn new(msg_type: u16, sender: NodeId, data: serde_json::Value) -> Self {
        Self {
            msg_type,
            sender,
            data,
        }
    }

    /// Serialize to JSON bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, TransportError> {
        serde_json::to_vec(self).map_err(TransportError::Serialization)
    }

    /// Deserialize from JSON bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self, TransportError> {
        serde_json::from_slice(data).map_err(TransportError::Deserialization)
    }
}
