use dsb_transport::{NodeId, TransportError};

use crate::message::MessageKind;

/// Runtime-level errors.
///
/// Wraps transport errors and adds the routing, readiness and fault
/// injection failures of the node runtime. None of them is fatal to the
/// process: callers log and carry on.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("no channel to node {0}")]
    UnknownPeer(NodeId),

    #[error("unknown message type {0}")]
    UnknownMessageType(u16),

    #[error("no module registered for message type {0}")]
    UnregisteredMessageType(MessageKind),

    #[error("invalid fault profile: {0:?}")]
    InvalidFaultProfile(String),

    #[error("communication layer already started")]
    AlreadyStarted,

    #[error("status probe of node {node_id} failed: {reason}")]
    Probe { node_id: NodeId, reason: String },

    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("monitoring API error: {0}")]
    Api(#[source] std::io::Error),
}
