use std::io;
use std::path::PathBuf;

use crate::NodeId;

/// Everything that can go wrong below the resolver.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("cannot bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("cannot reach node {node_id}: {source}")]
    Connect {
        node_id: NodeId,
        #[source]
        source: io::Error,
    },

    #[error("writing to node {node_id}: {source}")]
    Send {
        node_id: NodeId,
        #[source]
        source: io::Error,
    },

    #[error("reading from the network: {0}")]
    Receive(#[source] io::Error),

    #[error("cannot encode envelope: {0}")]
    Serialization(#[source] serde_json::Error),

    #[error("cannot decode envelope: {0}")]
    Deserialization(#[source] serde_json::Error),

    #[error("frame of {size} bytes exceeds the {max} byte limit")]
    MessageTooLarge { size: usize, max: usize },

    #[error("outbound queue to node {node_id} is full (capacity {capacity})")]
    QueueFull { node_id: NodeId, capacity: usize },

    #[error("cannot read hosts file {}: {source}", path.display())]
    ClusterFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid cluster entry on line {line}: {reason}")]
    InvalidCluster { line: usize, reason: String },

    #[error("duplicate node id {0} in cluster")]
    DuplicateNode(NodeId),

    #[error("not a node id: {0:?}")]
    InvalidNodeId(String),
}
