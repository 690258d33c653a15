use std::fmt;

use crate::{Envelope, NodeDescriptor, NodeId};

/// Which of the two parallel links a message travelled on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    /// Ordered TCP link for application messages.
    Reliable,
    /// Periodic UDP link for full-state snapshots.
    Stabilizing,
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelKind::Reliable => write!(f, "RELIABLE"),
            ChannelKind::Stabilizing => write!(f, "STABILIZING"),
        }
    }
}

/// What a link needs from the node that owns it.
///
/// Implemented by the resolver's shared state. Every method is called from
/// link tasks and must not block.
pub trait LinkContext: Send + Sync + 'static {
    /// This node's id.
    fn local_id(&self) -> NodeId;

    /// True once the whole cluster is running. Gates the
    /// self-stabilizing senders.
    fn is_running(&self) -> bool;

    /// True while this node simulates an unresponsive (silent) node.
    /// Suppresses sending only.
    fn is_unresponsive(&self) -> bool;

    /// A message left this node towards `to`.
    fn on_message_sent(&self, to: &NodeDescriptor, channel: ChannelKind);

    /// The reliable queue towards `to` now holds `depth` messages.
    fn on_queue_depth(&self, to: &NodeDescriptor, depth: usize);

    /// A decoded message arrived. Called in arrival order per connection.
    fn on_message_received(&self, envelope: Envelope, channel: ChannelKind);
}
