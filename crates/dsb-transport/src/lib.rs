//! dsb transport layer.
//!
//! Two kinds of links connect every pair of cluster nodes:
//!
//! - a **reliable** link: a bounded FIFO queue drained by a send loop over a
//!   persistent TCP connection, length-prefixed JSON frames;
//! - a **self-stabilizing** link: the latest full snapshot for a peer,
//!   resent as a single UDP datagram every period, no acks, no backlog.
//!
//! Neither link knows what the messages mean. Everything they need from
//! the owning node (run gate, fault profile, metric hooks, inbound
//! dispatch) goes through [`LinkContext`].
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use dsb_transport::{
//!     ClusterDirectory, Envelope, LinkContext, NodeId, ReliableReceiver, ReliableSender,
//!     TransportConfig,
//! };
//!
//! # async fn example(ctx: Arc<dyn LinkContext>) -> Result<(), dsb_transport::TransportError> {
//! let cluster = ClusterDirectory::localhost(2);
//! let config = TransportConfig::new();
//!
//! let me = cluster.get(NodeId::new(0)).unwrap();
//! let peer = cluster.get(NodeId::new(1)).unwrap().clone();
//!
//! let _receiver = ReliableReceiver::bind(&config.bind_addr(me.reliable_port), &config, ctx.clone()).await?;
//! let sender = ReliableSender::spawn(peer, &config, ctx);
//!
//! let envelope = Envelope::new(1, me.id, serde_json::json!({"message": "hello"}));
//! sender.enqueue(Arc::new(envelope))?;
//! # Ok(())
//! # }
//! ```

mod cluster;
mod config;
mod envelope;
mod error;
mod frame;
mod link;
mod queue;
mod reliable;
mod stabilizing;

pub use cluster::{
    ClusterDirectory, NodeDescriptor, DEFAULT_MONITORING_BASE_PORT, DEFAULT_RELIABLE_BASE_PORT,
    DEFAULT_STABILIZING_BASE_PORT,
};
pub use config::TransportConfig;
pub use envelope::Envelope;
pub use error::TransportError;
pub use frame::{read_frame, write_frame};
pub use link::{ChannelKind, LinkContext};
pub use reliable::{ReliableReceiver, ReliableSender};
pub use stabilizing::{DatagramTransport, StabilizingReceiver, StabilizingSender};

use std::fmt;
use std::str::FromStr;

/// Cluster member identity: a small integer, dense from zero.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct NodeId(u32);

impl NodeId {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

impl From<u32> for NodeId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl FromStr for NodeId {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u32>()
            .map(Self)
            .map_err(|_| TransportError::InvalidNodeId(s.to_string()))
    }
}
