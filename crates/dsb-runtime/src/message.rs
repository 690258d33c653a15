use std::fmt;

use dsb_transport::{Envelope, NodeId};

use crate::RuntimeError;

/// Every message type the node knows how to route.
///
/// On the wire the type is a small integer; anything outside this set is
/// reported as [`RuntimeError::UnknownMessageType`] at dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MessageKind {
    HelloWorld,
    Heartbeat,
}

impl MessageKind {
    pub const ALL: [MessageKind; 2] = [MessageKind::HelloWorld, MessageKind::Heartbeat];

    /// Wire code.
    pub const fn code(self) -> u16 {
        match self {
            MessageKind::HelloWorld => 1,
            MessageKind::Heartbeat => 2,
        }
    }

    /// Kind of a received envelope.
    pub fn of(envelope: &Envelope) -> Result<Self, RuntimeError> {
        Self::try_from(envelope.msg_type)
    }

    /// Build an envelope of this kind.
    pub fn envelope(self, sender: NodeId, data: serde_json::Value) -> Envelope {
        Envelope::new(self.code(), sender, data)
    }
}

impl TryFrom<u16> for MessageKind {
    type Error = RuntimeError;

    fn try_from(code: u16) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(MessageKind::HelloWorld),
            2 => Ok(MessageKind::Heartbeat),
            other => Err(RuntimeError::UnknownMessageType(other)),
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageKind::HelloWorld => write!(f, "HELLO_WORLD"),
            MessageKind::Heartbeat => write!(f, "HEARTBEAT"),
        }
    }
}
